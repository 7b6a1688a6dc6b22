//! Catalog initialization
//!
//! Builds the catalog once at startup: compiled-in microgames first, then
//! every bundle under the mods root. The catalog is sealed afterwards.

use std::path::Path;

use microgame_core::registry::{Catalog, EntrySource, RegistryError};
use microgame_mods::loader::{load_mods, DiscoveryReport};
use tracing::{debug, info};

/// Build and seal the catalog
///
/// Broken bundles are skipped and returned in the report; only a failure to
/// register the compiled-in microgames is an error.
pub async fn build_catalog(mods_root: &Path) -> Result<(Catalog, DiscoveryReport), RegistryError> {
    let mut catalog = Catalog::new();
    games_builtin::register_all(&mut catalog)?;
    let builtin = catalog.len();

    let report = load_mods(mods_root, &mut catalog).await;
    catalog.seal();

    info!(
        "Initialized catalog with {} microgames ({} built in, {} mods)",
        catalog.len(),
        builtin,
        report.registered.len()
    );
    for entry in catalog.entries() {
        let source = match entry.source() {
            EntrySource::Builtin => "builtin".to_string(),
            EntrySource::Mod(dir) => dir.display().to_string(),
        };
        debug!("  - {} ({})", entry.descriptor().id(), source);
    }

    Ok((catalog, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgame_core::typed::MicrogameId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builtins_then_mods() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("alice").join("catch");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("main.lua"),
            r#"return { prompt = "CATCH!", duration = 3, start = function(ctx) end }"#,
        )
        .unwrap();

        let (catalog, report) = build_catalog(root.path()).await.unwrap();

        assert!(catalog.is_sealed());
        assert_eq!(report.registered, vec![MicrogameId::new("alice", "catch")]);
        assert_eq!(catalog.ids().len(), 3);
        assert_eq!(catalog.ids()[2], MicrogameId::new("alice", "catch"));
    }

    #[tokio::test]
    async fn test_missing_mods_root_keeps_builtins() {
        let root = TempDir::new().unwrap();
        let (catalog, report) = build_catalog(&root.path().join("missing")).await.unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(report.failures.len(), 1);
    }
}
