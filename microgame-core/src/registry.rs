//! Microgame catalog
//!
//! The host owns one `Catalog`. Compiled-in microgames and discovered mods
//! are registered into it at startup; afterwards it is sealed and only read.
//! Every `create` builds a fresh instance for one play-through.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::adapter::MicrogameAdapter;
use crate::erased::{ErasedMicrogame, MicrogameError};
use crate::typed::{DescriptorError, Microgame, MicrogameDescriptor, MicrogameId};

/// Factory building one play-through's microgame instance
pub type MicrogameFactory = Box<dyn Fn() -> Result<Box<dyn ErasedMicrogame>, MicrogameError>>;

/// Where a catalog entry came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    Builtin,
    Mod(PathBuf),
}

/// One registered microgame
pub struct CatalogEntry {
    descriptor: MicrogameDescriptor,
    source: EntrySource,
    factory: MicrogameFactory,
}

impl CatalogEntry {
    pub fn descriptor(&self) -> &MicrogameDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> &EntrySource {
        &self.source
    }
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("id", &self.descriptor.id())
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Microgame `{0}` is already registered")]
    Duplicate(MicrogameId),
    #[error("Invalid descriptor: {0}")]
    Invalid(#[from] DescriptorError),
    #[error("Catalog is sealed; cannot register `{0}`")]
    Sealed(MicrogameId),
}

/// Registry mapping `author:name` to microgame factories
#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<MicrogameId, CatalogEntry>,
    order: Vec<MicrogameId>,
    sealed: bool,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a microgame under its descriptor's id
    ///
    /// Fails if the descriptor is invalid, the id is taken or the catalog
    /// has been sealed. Nothing is registered on failure.
    pub fn register(
        &mut self,
        descriptor: MicrogameDescriptor,
        source: EntrySource,
        factory: MicrogameFactory,
    ) -> Result<MicrogameId, RegistryError> {
        descriptor.validate()?;
        let id = descriptor.id();
        if self.sealed {
            return Err(RegistryError::Sealed(id));
        }
        if self.entries.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }

        debug!("Registering microgame {} from {:?}", id, source);
        self.entries.insert(
            id.clone(),
            CatalogEntry {
                descriptor,
                source,
                factory,
            },
        );
        self.order.push(id.clone());
        Ok(id)
    }

    /// Register a compiled-in microgame; `make` builds a fresh instance
    pub fn register_typed<T, F>(&mut self, make: F) -> Result<MicrogameId, RegistryError>
    where
        T: Microgame,
        F: Fn() -> T + 'static,
    {
        let descriptor = make().descriptor();
        self.register(
            descriptor,
            EntrySource::Builtin,
            Box::new(move || Ok(Box::new(MicrogameAdapter::new(make())) as Box<dyn ErasedMicrogame>)),
        )
    }

    /// Build a fresh instance for one play-through
    ///
    /// Returns `None` if the id is not registered.
    pub fn create(
        &self,
        id: &MicrogameId,
    ) -> Option<Result<Box<dyn ErasedMicrogame>, MicrogameError>> {
        self.entries.get(id).map(|entry| (entry.factory)())
    }

    pub fn get(&self, id: &MicrogameId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// Ids in registration order
    pub fn ids(&self) -> &[MicrogameId] {
        &self.order
    }

    /// Entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_registered(&self, id: &MicrogameId) -> bool {
        self.entries.contains_key(id)
    }

    /// Stop accepting registrations
    pub fn seal(&mut self) {
        if !self.sealed {
            info!("Catalog sealed with {} microgames", self.order.len());
        }
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// Convenience macro for registering compiled-in microgames
///
/// Expands to `Catalog::register_typed` with the type's `Default` impl.
///
/// ```ignore
/// register_microgame!(catalog, Mash)?;
/// ```
#[macro_export]
macro_rules! register_microgame {
    ($catalog:expr, $game_type:ty) => {
        $catalog.register_typed(<$game_type>::default)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MicrogameContext;
    use crate::state_machine::{Modifiers, UndecidedFinish};
    use crate::typed::{Color, InputKind, Rgb};

    #[derive(Default)]
    struct TestGame {
        name: String,
    }

    impl TestGame {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    impl Microgame for TestGame {
        type State = ();

        fn descriptor(&self) -> MicrogameDescriptor {
            MicrogameDescriptor {
                prompt: "WAIT!".to_string(),
                name: self.name.clone(),
                author: "test".to_string(),
                pack: Some("unit".to_string()),
                rgb: Rgb::Fixed(Color::WHITE),
                duration: 3.0,
                input: InputKind::Keys,
                url_prefix: String::new(),
            }
        }

        fn start(&mut self, _ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
            Ok(())
        }
    }

    fn id(s: &str) -> MicrogameId {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_and_create() {
        let mut catalog = Catalog::new();
        let registered = catalog.register_typed(|| TestGame::named("wait")).unwrap();
        assert_eq!(registered, id("test:wait"));

        let mut game = catalog.create(&id("test:wait")).unwrap().unwrap();
        assert_eq!(game.descriptor().prompt, "WAIT!");

        let mut ctx = MicrogameContext::new(3.0, Modifiers::default(), UndecidedFinish::Neutral, "", 0);
        ctx.begin();
        game.start(&mut ctx).unwrap();
    }

    #[test]
    fn test_create_unknown() {
        let catalog = Catalog::new();
        assert!(catalog.create(&id("nobody:nothing")).is_none());
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut catalog = Catalog::new();
        catalog.register_typed(|| TestGame::named("wait")).unwrap();

        let err = catalog.register_typed(|| TestGame::named("wait")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(ref dup) if *dup == id("test:wait")));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let mut catalog = Catalog::new();
        let err = catalog.register_typed(|| TestGame::named("")).unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(DescriptorError::EmptyField("name"))));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_sealed_catalog_rejects_registration() {
        let mut catalog = Catalog::new();
        catalog.register_typed(|| TestGame::named("one")).unwrap();
        catalog.seal();

        let err = catalog.register_typed(|| TestGame::named("two")).unwrap_err();
        assert!(matches!(err, RegistryError::Sealed(_)));
        assert!(catalog.is_sealed());
        assert!(!catalog.is_registered(&id("test:two")));
    }

    #[test]
    fn test_registration_order_and_sources() {
        let mut catalog = Catalog::new();
        for name in ["c", "a", "b"] {
            catalog.register_typed(move || TestGame::named(name)).unwrap();
        }

        let names: Vec<_> = catalog.ids().iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert!(catalog
            .entries()
            .all(|entry| *entry.source() == EntrySource::Builtin));
    }

    #[test]
    fn test_register_macro() {
        let mut catalog = Catalog::new();
        // Default name is empty, which the catalog refuses
        assert!(crate::register_microgame!(catalog, TestGame).is_err());
    }

    #[test]
    fn test_factory_errors_surface_on_create() {
        let mut catalog = Catalog::new();
        let descriptor = TestGame::named("broken").descriptor();
        catalog
            .register(
                descriptor,
                EntrySource::Mod(PathBuf::from("mods/test/broken")),
                Box::new(|| -> Result<Box<dyn ErasedMicrogame>, MicrogameError> {
                    Err(MicrogameError::Script("boom".to_string()))
                }),
            )
            .unwrap();

        let result = catalog.create(&id("test:broken")).unwrap();
        assert!(matches!(result, Err(MicrogameError::Script(_))));
    }
}
