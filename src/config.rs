//! Configuration for Trove
//!
//! Centralized configuration with sensible defaults. The allocator and
//! resize constants are tuning knobs, not format constants: a file written
//! with one set of values opens fine with another.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TroveError};

/// Main configuration for a Trove store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Path of the single data file
    pub path: PathBuf,

    // -------------------------------------------------------------------------
    // Heap Configuration
    // -------------------------------------------------------------------------
    /// Allocation granularity in bytes; every allocation is a multiple of it
    pub block_size: u64,

    /// A free interval smaller than `requested * greedy_slack` is handed out
    /// whole instead of being split
    pub greedy_slack: f64,

    /// Growth factor applied when the header no longer fits its slot
    pub header_growth: f64,

    // -------------------------------------------------------------------------
    // Object Storage Configuration
    // -------------------------------------------------------------------------
    /// An object shrinking below this fraction of its allocation is moved
    /// to a fresh, smaller allocation
    pub shrink_threshold: f64,

    /// Headroom factor applied when an object is (re)allocated by `set`
    pub object_growth: f64,

    /// Number of ID slots in a freshly created ID table
    pub id_table_capacity: u64,

    /// Growth factor of the ID table when it runs out of slots
    pub id_table_growth: f64,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// Begin a transaction implicitly when `Store::with_transaction` finds
    /// none entered on the current thread
    pub auto_transaction: bool,

    /// Age used by `Store::sweep_caches_default`
    pub cache_max_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./trove.db"),
            block_size: 16,
            greedy_slack: 1.3,
            header_growth: 1.5,
            shrink_threshold: 0.2,
            object_growth: 1.5,
            id_table_capacity: 100,
            id_table_growth: 1.5,
            auto_transaction: false,
            cache_max_age: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values the heap cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(TroveError::Config("block_size must be > 0".to_string()));
        }
        if self.greedy_slack < 1.0 {
            return Err(TroveError::Config(format!(
                "greedy_slack must be >= 1.0, got {}",
                self.greedy_slack
            )));
        }
        if self.header_growth < 1.0 || self.object_growth < 1.0 {
            return Err(TroveError::Config(
                "header_growth and object_growth must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.shrink_threshold) {
            return Err(TroveError::Config(format!(
                "shrink_threshold must be in [0, 1), got {}",
                self.shrink_threshold
            )));
        }
        if self.id_table_capacity == 0 {
            return Err(TroveError::Config(
                "id_table_capacity must be > 0".to_string(),
            ));
        }
        if self.id_table_growth <= 1.0 {
            return Err(TroveError::Config(format!(
                "id_table_growth must be > 1.0, got {}",
                self.id_table_growth
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the allocation block size (in bytes)
    pub fn block_size(mut self, size: u64) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the greedy allocation slack factor
    pub fn greedy_slack(mut self, slack: f64) -> Self {
        self.config.greedy_slack = slack;
        self
    }

    /// Set the header slot growth factor
    pub fn header_growth(mut self, factor: f64) -> Self {
        self.config.header_growth = factor;
        self
    }

    /// Set the object shrink threshold
    pub fn shrink_threshold(mut self, threshold: f64) -> Self {
        self.config.shrink_threshold = threshold;
        self
    }

    /// Set the object reallocation growth factor
    pub fn object_growth(mut self, factor: f64) -> Self {
        self.config.object_growth = factor;
        self
    }

    /// Set the initial ID table capacity
    pub fn id_table_capacity(mut self, capacity: u64) -> Self {
        self.config.id_table_capacity = capacity;
        self
    }

    /// Set the ID table growth factor
    pub fn id_table_growth(mut self, factor: f64) -> Self {
        self.config.id_table_growth = factor;
        self
    }

    /// Enable or disable implicit transactions
    pub fn auto_transaction(mut self, enabled: bool) -> Self {
        self.config.auto_transaction = enabled;
        self
    }

    /// Set the default cache sweep age
    pub fn cache_max_age(mut self, age: Duration) -> Self {
        self.config.cache_max_age = age;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
