//! On-disk bundle discovery
//!
//! Bundles live at `<root>/<author>/<bundle>/main.lua`. Discovery walks the
//! two directory levels in name order, evaluates each entry file once to read
//! its descriptor, and registers a factory that re-evaluates the source for
//! every play-through. A broken bundle yields one `ModLoadError` and is
//! skipped; the rest still load.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use microgame_core::erased::{ErasedMicrogame, MicrogameError};
use microgame_core::registry::{Catalog, EntrySource, RegistryError};
use microgame_core::typed::{MicrogameDescriptor, MicrogameId};

use crate::lua::{BundleOrigin, LuaMicrogame, ScriptError};

/// Entry file every bundle must contain
pub const ENTRY_FILE: &str = "main.lua";

#[derive(Debug, thiserror::Error)]
pub enum ModLoadError {
    #[error("Cannot read mods root {}: {source}", path.display())]
    Root { path: PathBuf, source: io::Error },
    #[error("Cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Bundle {} has no main.lua", path.display())]
    MissingEntry { path: PathBuf },
    #[error("Bundle {} failed to load: {source}", path.display())]
    Script { path: PathBuf, source: ScriptError },
    #[error("Bundle {} was not registered: {source}", path.display())]
    Register { path: PathBuf, source: RegistryError },
}

impl ModLoadError {
    /// Directory or file the error refers to
    pub fn path(&self) -> &Path {
        match self {
            ModLoadError::Root { path, .. }
            | ModLoadError::Io { path, .. }
            | ModLoadError::MissingEntry { path }
            | ModLoadError::Script { path, .. }
            | ModLoadError::Register { path, .. } => path,
        }
    }
}

/// A bundle whose entry file evaluated to a valid descriptor
#[derive(Debug, Clone)]
pub struct DiscoveredMod {
    pub origin: BundleOrigin,
    pub descriptor: MicrogameDescriptor,
    pub source: Rc<str>,
}

/// Outcome of registering discovered bundles
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<MicrogameId>,
    pub failures: Vec<ModLoadError>,
}

/// Walk `root` and evaluate every bundle found
///
/// Results come back in author then bundle name order. A missing or
/// unreadable root is reported as a single error.
pub async fn discover(root: &Path) -> Vec<Result<DiscoveredMod, ModLoadError>> {
    let (authors, skipped) = match subdirectories(root).await {
        Ok(listing) => listing,
        Err(source) => {
            return vec![Err(ModLoadError::Root {
                path: root.to_path_buf(),
                source,
            })]
        }
    };

    let mut results: Vec<_> = skipped.into_iter().map(Err).collect();
    for (author, author_dir) in authors {
        let bundles = match subdirectories(&author_dir).await {
            Ok((bundles, skipped)) => {
                results.extend(skipped.into_iter().map(Err));
                bundles
            }
            Err(source) => {
                results.push(Err(ModLoadError::Io {
                    path: author_dir,
                    source,
                }));
                continue;
            }
        };

        for (name, dir) in bundles {
            let origin = BundleOrigin::new(author.clone(), name, dir);
            results.push(load_bundle(origin).await);
        }
    }
    results
}

async fn load_bundle(origin: BundleOrigin) -> Result<DiscoveredMod, ModLoadError> {
    let entry = origin.dir.join(ENTRY_FILE);
    let source = match tokio::fs::read_to_string(&entry).await {
        Ok(source) => source,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ModLoadError::MissingEntry { path: origin.dir })
        }
        Err(source) => return Err(ModLoadError::Io { path: entry, source }),
    };

    let game = LuaMicrogame::from_source(&source, &origin).map_err(|source| {
        ModLoadError::Script {
            path: entry.clone(),
            source,
        }
    })?;
    let descriptor = game.descriptor().clone();
    debug!("Discovered {} at {}", descriptor.id(), origin.dir.display());

    Ok(DiscoveredMod {
        origin,
        descriptor,
        source: Rc::from(source),
    })
}

/// Immediate subdirectories as `(name, path)`, sorted by name
///
/// Files and dot-directories are skipped. An entry whose type cannot be read
/// comes back as its own error so its siblings still load.
async fn subdirectories(dir: &Path) -> io::Result<(Vec<(String, PathBuf)>, Vec<ModLoadError>)> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut dirs = Vec::new();
    let mut failures = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match classify(entry.path(), entry.file_type().await) {
            Listing::Dir(name, path) => dirs.push((name, path)),
            Listing::Skip => {}
            Listing::Failed(error) => failures.push(error),
        }
    }
    dirs.sort();
    Ok((dirs, failures))
}

#[derive(Debug)]
enum Listing {
    Dir(String, PathBuf),
    Skip,
    Failed(ModLoadError),
}

fn classify(path: PathBuf, file_type: io::Result<std::fs::FileType>) -> Listing {
    let file_type = match file_type {
        Ok(file_type) => file_type,
        Err(source) => return Listing::Failed(ModLoadError::Io { path, source }),
    };
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return Listing::Skip,
    };
    if !file_type.is_dir() || name.starts_with('.') {
        return Listing::Skip;
    }
    Listing::Dir(name, path)
}

/// Register discovery results; failures are logged and collected
pub fn register_mods(
    catalog: &mut Catalog,
    results: Vec<Result<DiscoveredMod, ModLoadError>>,
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for result in results {
        let discovered = match result {
            Ok(discovered) => discovered,
            Err(error) => {
                warn!("Skipping bundle: {}", error);
                report.failures.push(error);
                continue;
            }
        };

        let DiscoveredMod {
            origin,
            descriptor,
            source,
        } = discovered;
        let path = origin.dir.clone();
        let factory_origin = origin.clone();
        let expected = descriptor.id();
        let factory = Box::new(move || -> Result<Box<dyn ErasedMicrogame>, MicrogameError> {
            let game = LuaMicrogame::from_source(&source, &factory_origin)
                .map_err(|e| MicrogameError::Script(e.to_string()))?;
            let id = game.descriptor().id();
            if id != expected {
                return Err(MicrogameError::Script(format!(
                    "bundle registered as {} now describes {}",
                    expected, id
                )));
            }
            Ok(Box::new(game))
        });

        match catalog.register(descriptor, EntrySource::Mod(path.clone()), factory) {
            Ok(id) => report.registered.push(id),
            Err(source) => {
                let error = ModLoadError::Register { path, source };
                warn!("Skipping bundle: {}", error);
                report.failures.push(error);
            }
        }
    }

    info!(
        "Loaded {} mods ({} failed)",
        report.registered.len(),
        report.failures.len()
    );
    report
}

/// Discover bundles under `root` and register them into `catalog`
pub async fn load_mods(root: &Path, catalog: &mut Catalog) -> DiscoveryReport {
    let results = discover(root).await;
    register_mods(catalog, results)
}
