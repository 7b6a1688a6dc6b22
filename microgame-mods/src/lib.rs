//! Script bundle support for the microgame harness
//!
//! - `loader`: discovers `<root>/<author>/<bundle>/main.lua` bundles and
//!   registers them into a `Catalog`
//! - `lua`: the restricted Lua runtime behind each bundle
//! - `scaffold`: creates new bundle skeletons

pub mod loader;
pub mod lua;
pub mod scaffold;

pub use loader::{discover, load_mods, register_mods, DiscoveredMod, DiscoveryReport, ModLoadError, ENTRY_FILE};
pub use lua::{BundleOrigin, LuaMicrogame, ScriptError};
pub use scaffold::{sanitize_name, scaffold, ScaffoldError};
