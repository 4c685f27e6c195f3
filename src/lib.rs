//! # Trove
//!
//! An embedded, single-file, transactional object store:
//! - Persistent free-list heap inside one data file
//! - Objects addressed by stable integer IDs
//! - Named roots as entry points into the object graph
//! - Optimistic transactions with first-committer-wins conflict detection
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Store (open / close / begin)                 │
//! │        caches · open transaction registry · roots            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Transactions                             │
//! │         (proxies → live objects, commit / abort)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────▼────────────┐
//!          │      ObjectStorage      │
//!          │   (id → blob, resize)   │
//!          └────────────┬────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   IdTable   │          │   FileMem   │
//!   │ (id → slot) │─────────▶│   (heap)    │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                          ┌────────┴────────┐
//!                          ▼                 ▼
//!                   ┌─────────────┐   ┌─────────────┐
//!                   │  AllocTab   │   │     RAF     │
//!                   │ (intervals) │   │ (file I/O)  │
//!                   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use trove::{Config, Store};
//!
//! # fn main() -> trove::Result<()> {
//! let store = Store::open(Config::builder().path("./app.trove").build())?;
//!
//! let mut txn = store.begin()?;
//! txn.set_root("greeting", String::from("hello"))?;
//! txn.commit()?;
//!
//! let mut txn = store.begin()?;
//! let greeting: Option<&String> = txn.get_root("greeting")?;
//! assert_eq!(greeting.map(String::as_str), Some("hello"));
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod alloc;
pub mod heap;
pub mod objects;
pub mod txn;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TroveError};
pub use config::Config;
pub use objects::ObjectId;
pub use store::Store;
pub use txn::{Persistent, Ref, Transaction};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Trove
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
