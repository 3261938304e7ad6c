use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "PAGEBERT_DATA_DIR";

const XDG_PREFIX: &str = "pagebert";
const CONFIG_DB: &str = "config.redb";
const STORE_DB: &str = "store.redb";

/// Where a data root came from, for `status` and debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSource {
    Flag,
    Env,
    Xdg,
}

impl RootSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RootSource::Flag => "--data-dir",
            RootSource::Env => DATA_DIR_ENV_VAR,
            RootSource::Xdg => "xdg",
        }
    }
}

/// Directory holding the settings database and the item store.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: RootSource,
}

impl DataDir {
    /// Resolve and create the data root: `--data-dir`, then
    /// `PAGEBERT_DATA_DIR`, then `$XDG_DATA_HOME/pagebert`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let env = std::env::var_os(DATA_DIR_ENV_VAR);
        let (root, source) = match pick_root(explicit, env) {
            Some(picked) => picked,
            None => (xdg_root()?, RootSource::Xdg),
        };

        if root.exists() && !root.is_dir() {
            return Err(Error::DataDir(root));
        }
        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        debug!(root = %root.display(), source = source.as_str(), "data directory");

        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> RootSource {
        self.source
    }

    /// Settings database, see [`ConfigDb`](crate::ConfigDb).
    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_DB)
    }

    /// Item store, see [`EmbeddingDb`](crate::EmbeddingDb).
    pub fn store_db(&self) -> PathBuf {
        self.root.join(STORE_DB)
    }

    /// Whether anything has been loaded yet. Searching an empty root is
    /// allowed but always returns nothing.
    pub fn has_store(&self) -> bool {
        self.store_db().is_file()
    }
}

/// Explicit path wins over a non-empty environment value.
fn pick_root(
    explicit: Option<&Path>,
    env: Option<OsString>,
) -> Option<(PathBuf, RootSource)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), RootSource::Flag));
    }
    env.filter(|v| !v.is_empty())
        .map(|v| (PathBuf::from(v), RootSource::Env))
}

fn xdg_root() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(XDG_PREFIX)
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_environment() {
        let picked = pick_root(
            Some(Path::new("/flag")),
            Some(OsString::from("/env")),
        );
        assert_eq!(picked, Some((PathBuf::from("/flag"), RootSource::Flag)));
    }

    #[test]
    fn empty_environment_falls_through() {
        assert_eq!(pick_root(None, Some(OsString::new())), None);
        assert_eq!(pick_root(None, None), None);
        assert_eq!(
            pick_root(None, Some(OsString::from("/env"))),
            Some((PathBuf::from("/env"), RootSource::Env))
        );
    }

    #[test]
    fn databases_live_under_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
        assert_eq!(dir.source(), RootSource::Flag);
        assert_eq!(dir.config_db(), nested.join("config.redb"));
        assert_eq!(dir.store_db(), nested.join("store.redb"));
        assert!(!dir.has_store());
    }

    #[test]
    fn file_in_place_of_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = DataDir::resolve(Some(&file)).unwrap_err();
        assert!(matches!(err, Error::DataDir(p) if p == file));
    }
}
