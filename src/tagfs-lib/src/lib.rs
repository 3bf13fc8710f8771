mod item;
mod name;
mod tag_path;

pub use item::{Item, ItemId, ItemType};
pub use name::{base_name, clean_name, is_valid_name, parse_control_name, split_id_prefix, ParsedName};
pub use tag_path::{TagPath, CONTENT_DIR, NEGATION_DIR, RENAME_RECEIVER_DIR};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagFsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not empty: {0}")]
    NotEmpty(String),
    #[error("invalid argument: {0}")]
    InvalidParam(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("not a directory: {0}")]
    NotDirectory(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("operation not permitted: {0}")]
    NotPermitted(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl TagFsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TagFsError::NotFound(_))
    }
}

pub type TagFsResult<T> = std::result::Result<T, TagFsError>;

impl From<std::io::Error> for TagFsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => TagFsError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => TagFsError::AccessDenied(err.to_string()),
            _ => TagFsError::IoError(err.to_string()),
        }
    }
}
