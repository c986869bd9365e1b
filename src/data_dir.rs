//! Where hydrag keeps its state: the collection store, the optional
//! `config.json` and the batch reports.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "HYDRAG_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the data directory and make sure it exists. `--data-dir` wins
    /// over `HYDRAG_DATA_DIR`, which wins over `$XDG_DATA_HOME/hydrag`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV_VAR) {
                Some(value) => PathBuf::from(value),
                None => xdg_data_home()?,
            },
        };
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The redb file holding every collection.
    pub fn store_db(&self) -> PathBuf {
        self.root.join("collections.redb")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Default location for batch reports, created on demand.
    pub fn reports_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("reports");
        ensure_dir(&path)?;
        Ok(path)
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("hydrag")
        .get_data_home()
        .ok_or_else(|| Error::Config("no XDG data home for hydrag".into()))
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|_| Error::DataDir(path.to_path_buf()))
}
