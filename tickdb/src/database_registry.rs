//! Registry of open databases, keyed by name.
//!
//! Each database is one file at `{base_directory}/{name}.tick`. Databases are
//! opened on first use and shared between requests through an `Arc`.
//!
//! # Thread Safety
//!
//! The name map is guarded by an `RwLock`; lookups of already-open databases
//! only take the read lock. Each [`Database`] serializes its own writers.
//!
//! # Invariants
//!
//! - Each name maps to at most one open `Database` instance
//! - All names are validated before they reach the filesystem

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::storage::{Database, DatabaseError};

/// Maximum length for a database name.
const MAX_NAME_LENGTH: usize = 128;

/// File extension of database files.
const FILE_EXTENSION: &str = "tick";

/// Registry of open databases under one directory.
pub struct DatabaseRegistry {
    /// Map from database name to shared database instance.
    databases: RwLock<HashMap<String, Arc<Database>>>,
    /// Directory where database files are stored.
    base_directory: PathBuf,
}

impl DatabaseRegistry {
    #[must_use]
    pub fn new(base_directory: PathBuf) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            base_directory,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.base_directory.join(format!("{name}.{FILE_EXTENSION}"))
    }

    /// Create a new, empty database.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] if a file for `name` exists.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // False positive - we need the lock held during insert
    pub fn create(&self, name: &str) -> Result<Arc<Database>, RegistryError> {
        validate_name(name)?;

        let mut databases = self
            .databases
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;

        let path = self.path(name);
        if databases.contains_key(name) || path.exists() {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }

        let database = Arc::new(Database::open(&path)?);
        databases.insert(name.to_string(), Arc::clone(&database));
        tracing::info!("Created database '{}'", name);

        Ok(database)
    }

    /// Get an existing database, opening its file on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no file exists for `name`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // False positive - we need the lock held during insert
    pub fn get(&self, name: &str) -> Result<Arc<Database>, RegistryError> {
        validate_name(name)?;

        // Fast path: already open (read lock only)
        {
            let databases = self
                .databases
                .read()
                .map_err(|_| RegistryError::LockPoisoned)?;
            if let Some(db) = databases.get(name) {
                return Ok(Arc::clone(db));
            }
        }

        let mut databases = self
            .databases
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;

        // Double-check: another thread may have opened it while we waited for the write lock
        if let Some(db) = databases.get(name) {
            return Ok(Arc::clone(db));
        }

        let path = self.path(name);
        if !path.is_file() {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        let database = Arc::new(Database::open(&path)?);
        databases.insert(name.to_string(), Arc::clone(&database));
        tracing::info!("Opened database '{}'", name);

        Ok(database)
    }

    /// Close a database and remove its file.
    ///
    /// Unflushed changes are discarded. The map stays locked until the file is
    /// gone so a concurrent [`DatabaseRegistry::get`] cannot reopen it.
    #[allow(clippy::significant_drop_tightening)] // The lock must cover remove_file
    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        validate_name(name)?;

        let mut databases = self
            .databases
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;

        let path = self.path(name);
        let was_open = databases.remove(name).is_some();

        if !path.is_file() {
            if was_open {
                tracing::warn!("Database '{}' was open but its file is missing", name);
            }
            return Err(RegistryError::NotFound(name.to_string()));
        }

        std::fs::remove_file(&path).map_err(RegistryError::Io)?;
        tracing::info!("Deleted database '{}'", name);
        Ok(())
    }

    /// Names of all databases in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>, RegistryError> {
        let entries = match std::fs::read_dir(&self.base_directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::Io(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(RegistryError::Io)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| validate_name(stem).is_ok());
            if let Some(name) = name {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Error returned when validating a database name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameValidationError {
    /// The name is empty.
    Empty,
    /// The name exceeds the maximum length.
    TooLong,
    /// The name contains invalid characters.
    InvalidCharacters,
}

impl std::fmt::Display for NameValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "database name must not be empty"),
            Self::TooLong => write!(
                f,
                "database name exceeds maximum length of {MAX_NAME_LENGTH} characters"
            ),
            Self::InvalidCharacters => write!(
                f,
                "database name contains invalid characters; only alphanumeric, hyphens, and underscores are allowed"
            ),
        }
    }
}

impl std::error::Error for NameValidationError {}

/// Validate that a database name is well-formed.
///
/// Valid names are non-empty, at most 128 characters, and contain only
/// alphanumeric characters, hyphens, and underscores. This keeps names from
/// escaping the database directory.
///
/// # Examples
///
/// ```
/// use tickdb::database_registry::validate_name;
///
/// assert!(validate_name("prices-2016").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("../evil").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), NameValidationError> {
    if name.is_empty() {
        return Err(NameValidationError::Empty);
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(NameValidationError::TooLong);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(NameValidationError::InvalidCharacters);
    }

    Ok(())
}

/// Errors that can occur during registry operations.
#[derive(Debug)]
pub enum RegistryError {
    /// A database with this name already exists.
    AlreadyExists(String),
    /// No database with this name exists.
    NotFound(String),
    /// The name is not acceptable.
    InvalidName(NameValidationError),
    /// The database could not be opened.
    Database(DatabaseError),
    /// Directory or file operation failed.
    Io(std::io::Error),
    /// A thread panicked while holding the registry lock.
    LockPoisoned,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(name) => write!(f, "database '{name}' already exists"),
            Self::NotFound(name) => write!(f, "database '{name}' not found"),
            Self::InvalidName(e) => write!(f, "{e}"),
            Self::Database(e) => write!(f, "database error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::LockPoisoned => write!(f, "registry lock poisoned"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(e) => Some(e),
            Self::Database(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::AlreadyExists(_) | Self::NotFound(_) | Self::LockPoisoned => None,
        }
    }
}

impl From<NameValidationError> for RegistryError {
    fn from(e: NameValidationError) -> Self {
        Self::InvalidName(e)
    }
}

impl From<DatabaseError> for RegistryError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}
