//! Error types for Trove
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::objects::ObjectId;

/// Result type alias using TroveError
pub type Result<T> = std::result::Result<T, TroveError>;

/// Unified error type for Trove operations
#[derive(Debug, Error)]
pub enum TroveError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read at offset {addr}: expected {expected} bytes, got {actual}")]
    ShortRead { addr: u64, expected: u64, actual: u64 },

    // -------------------------------------------------------------------------
    // Store Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store is not initialized (closed or never opened)")]
    NotInitialized,

    #[error("Store already open: {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("Store refuses writes after a failed commit: {0}")]
    Poisoned(String),

    // -------------------------------------------------------------------------
    // Heap Errors
    // -------------------------------------------------------------------------
    #[error("Allocator error: {0}")]
    Allocator(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Object Errors
    // -------------------------------------------------------------------------
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Failed to restore object {id}: {reason}")]
    Restore { id: ObjectId, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("No active transaction")]
    NoTransaction,

    #[error("Commit conflict on objects {ids:?} and roots {roots:?}")]
    CommitConflict { ids: Vec<ObjectId>, roots: Vec<String> },

    #[error("Transaction error: {0}")]
    Transaction(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TroveError {
    /// True for the one error kind callers are expected to handle by retrying
    /// with a fresh transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TroveError::CommitConflict { .. })
    }
}
