//! 错误类型

use std::path::PathBuf;

use thiserror::Error;

use crate::core::Oid;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at offset {offset}: {reason}")]
    Parse { offset: u64, reason: String },

    #[error("Index serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid index file {path:?}: {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    #[error("Index entry missing for key {0}")]
    IndexEntryMissing(String),

    #[error("Variation module \"{0}\" referenced but not loaded")]
    ModuleNotLoaded(String),

    #[error("Variation module \"{module}\" failed at {oid}: {reason}")]
    ModuleFailed {
        module: String,
        oid: Oid,
        reason: String,
    },

    #[error("Bad module options: {0}")]
    BadOptions(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn parse(offset: u64, reason: impl Into<String>) -> Self {
        StoreError::Parse {
            offset,
            reason: reason.into(),
        }
    }

    pub fn module_failed(module: &str, oid: &Oid, reason: impl Into<String>) -> Self {
        StoreError::ModuleFailed {
            module: module.to_string(),
            oid: oid.clone(),
            reason: reason.into(),
        }
    }
}
