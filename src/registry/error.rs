//! Registry error types

use super::source::SourceId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Source not found
    SourceNotFound(SourceId),
    /// Source already registered
    SourceAlreadyExists(SourceId),
    /// Source reached its subscriber limit
    AtCapacity(SourceId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::SourceNotFound(id) => write!(f, "Source not found: {}", id),
            RegistryError::SourceAlreadyExists(id) => {
                write!(f, "Source already exists: {}", id)
            }
            RegistryError::AtCapacity(id) => write!(f, "Source at client capacity: {}", id),
        }
    }
}

impl std::error::Error for RegistryError {}
