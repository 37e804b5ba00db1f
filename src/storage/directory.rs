//! Directory-backed cassette store

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{validate_cassette_name, CassetteWriter, ResourceLoader};
use crate::Result;

/// Reads `<cassette_dir>/<name>.json`, writes `<output_dir>/<name>.json`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    cassette_dir: PathBuf,
    output_dir: PathBuf,
}

impl DirectoryStore {
    /// Store that reads and writes the same directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cassette_dir: dir.clone(),
            output_dir: dir,
        }
    }

    /// Store that writes recordings somewhere other than where it reads them
    pub fn with_output_dir(cassette_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cassette_dir: cassette_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Directory cassettes are loaded from
    #[must_use]
    pub fn cassette_dir(&self) -> &Path {
        &self.cassette_dir
    }

    /// Directory recordings are written to
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path cassette `name` is loaded from
    #[must_use]
    pub fn cassette_path(&self, name: &str) -> PathBuf {
        self.cassette_dir.join(file_name(name))
    }

    /// Path cassette `name` is written to
    #[must_use]
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(file_name(name))
    }
}

fn file_name(name: &str) -> String {
    format!("{name}.json")
}

impl ResourceLoader for DirectoryStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        validate_cassette_name(name)?;
        let path = self.cassette_path(name);

        match std::fs::read(&path) {
            Ok(data) => {
                info!("Loaded cassette {} ({} bytes)", path.display(), data.len());
                Ok(Some(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No cassette at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl CassetteWriter for DirectoryStore {
    fn persist(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_cassette_name(name)?;
        std::fs::create_dir_all(&self.output_dir)?;

        // Write beside the target, then rename over it
        let mut file = NamedTempFile::new_in(&self.output_dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;

        let path = self.output_path(name);
        file.persist(&path).map_err(|e| e.error)?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}
