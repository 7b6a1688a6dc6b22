//! Compiled-in microgames for the harness
//!
//! These reference implementations show how to implement the `Microgame`
//! trait and make up the static catalog the host registers at startup.

use microgame_core::register_microgame;
use microgame_core::registry::{Catalog, RegistryError};

pub mod dodge;
pub mod mash;

pub use dodge::Dodge;
pub use mash::Mash;

/// Author namespace of every compiled-in microgame
pub const AUTHOR: &str = "builtin";

pub const PACK: &str = "starter";

/// Register every compiled-in microgame
pub fn register_all(catalog: &mut Catalog) -> Result<(), RegistryError> {
    register_microgame!(catalog, Mash)?;
    register_microgame!(catalog, Dodge)?;
    Ok(())
}
