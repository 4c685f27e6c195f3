//! Transaction Module
//!
//! Optimistic transactions over object storage.
//!
//! ## Responsibilities
//! - Restore objects lazily into a transaction (proxy → live)
//! - Detect changed objects at commit by comparing encodings
//! - Detect conflicts with transactions that committed in the meantime
//! - Keep the root mapping (name → object ID, stored as object 0)
//! - Track the current transaction of each thread
//!
//! ## Commit Flow
//! ```text
//!   live objects ──encode──▶ unchanged? ──yes──▶ read set
//!                                 │
//!                                 no ──────────▶ write set
//!
//!   conflict log (own) ──check──▶ ok ──▶ record in other logs
//!                                          │
//!                                          ▼
//!                      delete ──▶ write ──▶ roots ──▶ flush
//! ```

mod cache;
mod conflict;
pub mod context;
mod object;
mod transaction;

use std::collections::BTreeMap;

use crate::objects::ObjectId;

pub use cache::{CachedObject, SweepCache};
pub use conflict::ConflictLog;
pub use object::{decode, encode, ObjectRef, Persisted, Persistent, Ref};
pub use transaction::{Observed, Transaction};

/// Object ID of the root mapping
pub const ROOTS_ID: ObjectId = 0;

/// Root name → object ID
pub type Roots = BTreeMap<String, ObjectId>;

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Aborted,
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes
    Active,

    /// Inside `commit`
    Committing,

    /// Finished; only `restart` brings it back
    Terminated(Outcome),
}
