//! New bundle scaffolding
//!
//! Creates `<root>/<author>/<name>/main.lua` from a fixed skeleton. Names are
//! sanitized to alphanumerics, `_` and `-`; an existing bundle is never
//! touched.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::info;

use microgame_core::typed::MicrogameId;

use crate::loader::ENTRY_FILE;

#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    #[error("`{0}` has no usable characters after sanitizing")]
    EmptyName(String),
    #[error("Bundle {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Cannot write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Keep alphanumerics, `_` and `-`
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Skeleton `main.lua` for a new bundle
pub fn template(id: &MicrogameId) -> String {
    format!(
        r#"-- {id}
return {{
  prompt = "{prompt}!",
  author = "{author}",
  name = "{name}",
  duration = 4,
  input = "keys",
  rgb = {{ 0, 0, 0 }},

  load = function(ctx)
    return true
  end,

  start = function(ctx)
    ctx.on_update(function(ctx, dt)
    end)

    ctx.on_input(function(ctx, event)
    end)

    ctx.on_timeout(function(ctx)
      ctx.finish()
    end)
  end,
}}
"#,
        id = id,
        prompt = id.name.to_uppercase(),
        author = id.author,
        name = id.name,
    )
}

/// Create a bundle skeleton for `id` under `root`
///
/// Returns the new bundle directory. Fails without writing anything if the
/// directory already exists.
pub async fn scaffold(root: &Path, id: &MicrogameId) -> Result<PathBuf, ScaffoldError> {
    let author = sanitize_name(&id.author);
    let name = sanitize_name(&id.name);
    if author.is_empty() {
        return Err(ScaffoldError::EmptyName(id.author.clone()));
    }
    if name.is_empty() {
        return Err(ScaffoldError::EmptyName(id.name.clone()));
    }

    let dir = root.join(&author).join(&name);
    if tokio::fs::try_exists(&dir).await.map_err(io_err(&dir))? {
        return Err(ScaffoldError::AlreadyExists(dir));
    }
    tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

    let entry = dir.join(ENTRY_FILE);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&entry)
        .await
        .map_err(io_err(&entry))?;
    file.write_all(template(&MicrogameId::new(author, name)).as_bytes())
        .await
        .map_err(io_err(&entry))?;
    file.flush().await.map_err(io_err(&entry))?;

    info!("Created bundle {}", dir.display());
    Ok(dir)
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ScaffoldError {
    let path = path.to_path_buf();
    move |source| ScaffoldError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::discover;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("jump-rope_2"), "jump-rope_2");
        assert_eq!(sanitize_name("Don't stop!"), "Dontstop");
        assert_eq!(sanitize_name("../../etc"), "etc");
        assert_eq!(sanitize_name("!!!"), "");
    }

    #[test]
    fn test_template_is_deterministic() {
        let id = MicrogameId::new("alice", "catch");
        assert_eq!(template(&id), template(&id));
        assert!(template(&id).starts_with("-- alice:catch\n"));
        assert!(template(&id).contains("prompt = \"CATCH!\""));
    }

    #[tokio::test]
    async fn test_scaffold_creates_loadable_bundle() {
        let root = TempDir::new().unwrap();
        let id: MicrogameId = "alice:jump rope!".parse().unwrap();

        let dir = scaffold(root.path(), &id).await.unwrap();
        assert_eq!(dir, root.path().join("alice").join("jumprope"));

        let results = discover(root.path()).await;
        assert_eq!(results.len(), 1);
        let discovered = results.into_iter().next().unwrap().unwrap();
        assert_eq!(discovered.descriptor.id(), MicrogameId::new("alice", "jumprope"));
    }

    #[tokio::test]
    async fn test_scaffold_twice_fails_without_writing() {
        let root = TempDir::new().unwrap();
        let id = MicrogameId::new("alice", "catch");

        let dir = scaffold(root.path(), &id).await.unwrap();
        let entry = dir.join(ENTRY_FILE);
        std::fs::write(&entry, "-- edited").unwrap();

        let err = scaffold(root.path(), &id).await.unwrap_err();
        assert!(matches!(err, ScaffoldError::AlreadyExists(ref existing) if *existing == dir));
        assert_eq!(std::fs::read_to_string(&entry).unwrap(), "-- edited");
    }

    #[tokio::test]
    async fn test_scaffold_rejects_empty_name() {
        let root = TempDir::new().unwrap();
        let id = MicrogameId::new("alice", "???");

        let err = scaffold(root.path(), &id).await.unwrap_err();
        assert!(matches!(err, ScaffoldError::EmptyName(_)));
        assert!(!root.path().join("alice").exists());
    }
}
