//! Commit conflict detection
//!
//! Every open transaction owns a log. When a transaction commits, its read,
//! write and root sets are recorded in the logs of all other open
//! transactions; each of those checks its own sets against its log when it
//! commits. First committer wins.

use std::collections::BTreeSet;

use crate::error::{Result, TroveError};
use crate::objects::ObjectId;

/// What other transactions committed since the owner began
#[derive(Debug, Default, Clone)]
pub struct ConflictLog {
    written: BTreeSet<ObjectId>,

    /// Diagnostic only: `check` ignores foreign reads, surfaced through
    /// `Transaction::observed`
    read: BTreeSet<ObjectId>,

    roots: BTreeSet<String>,
    commits: u64,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one foreign commit
    pub fn record<'a>(
        &mut self,
        read: &BTreeSet<ObjectId>,
        written: &BTreeSet<ObjectId>,
        roots: impl IntoIterator<Item = &'a String>,
    ) {
        self.read.extend(read.iter().copied());
        self.written.extend(written.iter().copied());
        self.roots.extend(roots.into_iter().cloned());
        self.commits += 1;
    }

    /// Fail if the owner's sets collide with recorded foreign writes
    ///
    /// A collision is an ID the owner wrote or read that someone else
    /// wrote, or a root both wrote.
    pub fn check<'a>(
        &self,
        read: &BTreeSet<ObjectId>,
        written: &BTreeSet<ObjectId>,
        roots: impl IntoIterator<Item = &'a String>,
    ) -> Result<()> {
        let ids: Vec<ObjectId> = written
            .union(read)
            .filter(|id| self.written.contains(id))
            .copied()
            .collect();
        let roots: Vec<String> = roots
            .into_iter()
            .filter(|name| self.roots.contains(*name))
            .cloned()
            .collect();

        if ids.is_empty() && roots.is_empty() {
            Ok(())
        } else {
            Err(TroveError::CommitConflict { ids, roots })
        }
    }

    /// Number of foreign commits recorded
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn written(&self) -> &BTreeSet<ObjectId> {
        &self.written
    }

    pub fn read(&self) -> &BTreeSet<ObjectId> {
        &self.read
    }

    pub fn roots(&self) -> &BTreeSet<String> {
        &self.roots
    }
}
