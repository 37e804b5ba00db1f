//! Cassette storage collaborators

mod directory;
mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

use crate::{Result, TapedeckError};

/// Loads serialized cassettes by name
pub trait ResourceLoader: Send + Sync {
    /// Load the bytes of cassette `name`
    ///
    /// `Ok(None)` means the cassette does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the cassette exists but cannot be read
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Persists serialized cassettes by name
pub trait CassetteWriter: Send + Sync {
    /// Replace the stored bytes of cassette `name`
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be written
    fn persist(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Validate a cassette name before it is used as a storage key
///
/// # Errors
///
/// Returns error if the name is empty, too long, or could escape the
/// storage directory
pub fn validate_cassette_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(TapedeckError::InvalidCassetteName(format!(
            "Cassette name too long: {} > 255",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}
