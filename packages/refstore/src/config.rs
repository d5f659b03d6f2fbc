//! Store configuration.
//!
//! Loaded from `store_config.json` in the store directory. Every field has a
//! default so a partial (or missing) file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::key::DIRECT_ENTRY_KEY_OVERHEAD;

/// File name of the JSON config inside a store directory.
pub const CONFIG_FILE_NAME: &str = "store_config.json";

/// LMDB's compiled-in maximum key size.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 511;

/// Values up to this many bytes are stored inline in keys.
pub const DEFAULT_DIRECT_KEY_THRESHOLD: usize = 32;

const DEFAULT_PURGE_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Width of the content hash used by hash lookup tables.
///
/// Persisted in the store metadata on first open; a store cannot be reopened
/// with a different width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashLength {
    Integer,
    Long,
    Long128,
}

impl HashLength {
    /// Hash width in bytes.
    pub fn width(self) -> usize {
        match self {
            HashLength::Integer => 4,
            HashLength::Long => 8,
            HashLength::Long128 => 16,
        }
    }

    pub fn from_width(width: u8) -> Option<Self> {
        match width {
            4 => Some(HashLength::Integer),
            8 => Some(HashLength::Long),
            16 => Some(HashLength::Long128),
            _ => None,
        }
    }
}

impl Default for HashLength {
    fn default() -> Self {
        HashLength::Long
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Longest key the underlying store accepts.
    pub max_key_length: usize,
    /// Variable keys up to this size are stored inline (DIRECT).
    pub direct_key_threshold: usize,
    pub hash_length: HashLength,
    /// Upper bound on disambiguators probed for one hash before giving up.
    pub max_hash_clash_probes: usize,
    /// Whether `put` replaces the value of an existing key.
    pub overwrite_existing: bool,
    /// Streams not accessed for this long are eligible for `purge_old_data`.
    pub purge_age_ms: u64,
    /// Number of idle scratch buffers kept by the buffer pool.
    pub buffer_pool_capacity: usize,
    /// LMDB map size.
    pub map_size_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            direct_key_threshold: DEFAULT_DIRECT_KEY_THRESHOLD,
            hash_length: HashLength::default(),
            max_hash_clash_probes: 1000,
            overwrite_existing: true,
            purge_age_ms: DEFAULT_PURGE_AGE_MS,
            buffer_pool_capacity: 16,
            map_size_bytes: 1 << 30,
        }
    }
}

impl StoreConfig {
    /// Read config from a store directory. Returns None if the file doesn't exist.
    pub fn read_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Write config to a store directory.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let max_direct = self.max_key_length.saturating_sub(DIRECT_ENTRY_KEY_OVERHEAD);
        if self.direct_key_threshold == 0 || self.direct_key_threshold > max_direct {
            return Err(StoreError::ConfigMismatch(format!(
                "direct_key_threshold ({}) must be in 1..={} for max_key_length {}",
                self.direct_key_threshold, max_direct, self.max_key_length
            )));
        }
        if self.max_hash_clash_probes == 0 || self.max_hash_clash_probes > u16::MAX as usize + 1 {
            return Err(StoreError::ConfigMismatch(format!(
                "max_hash_clash_probes ({}) must be in 1..={}",
                self.max_hash_clash_probes,
                u16::MAX as usize + 1
            )));
        }
        Ok(())
    }
}
