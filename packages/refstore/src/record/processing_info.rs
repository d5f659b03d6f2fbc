//! Per-stream processing metadata.
//!
//! ```text
//! Offset  Size  Field
//! 0       8     create time (epoch ms, i64 BE)
//! 8       8     last accessed time
//! 16      8     effective time
//! 24      1     processing state
//! ```
//!
//! Every field sits at a fixed offset so a single field can be rewritten
//! without decoding the rest.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::primitive::FixedWidth;
use crate::error::{Result, StoreError};

pub const CREATE_TIME_OFFSET: usize = 0;
pub const LAST_ACCESSED_TIME_OFFSET: usize = 8;
pub const EFFECTIVE_TIME_OFFSET: usize = 16;
pub const STATE_OFFSET: usize = 24;
pub const ENCODED_LEN: usize = 25;

/// Current wall clock time in epoch millis.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessingState {
    LoadInProgress = 0,
    PurgeInProgress = 1,
    Complete = 2,
    Failed = 3,
    Terminated = 4,
    ReadyForPurge = 5,
    PurgeFailed = 6,
}

impl ProcessingState {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::LoadInProgress,
            1 => Self::PurgeInProgress,
            2 => Self::Complete,
            3 => Self::Failed,
            4 => Self::Terminated,
            5 => Self::ReadyForPurge,
            6 => Self::PurgeFailed,
            other => {
                return Err(StoreError::corruption(format!(
                    "unknown processing state {}",
                    other
                )))
            }
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadInProgress => "LOAD_IN_PROGRESS",
            Self::PurgeInProgress => "PURGE_IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Terminated => "TERMINATED",
            Self::ReadyForPurge => "READY_FOR_PURGE",
            Self::PurgeFailed => "PURGE_FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingInfo {
    pub create_time_ms: i64,
    pub last_accessed_time_ms: i64,
    pub effective_time_ms: i64,
    pub state: ProcessingState,
}

impl ProcessingInfo {
    /// New record created at `now`, last accessed at `now`.
    pub fn new(now: i64, effective_time_ms: i64, state: ProcessingState) -> Self {
        Self {
            create_time_ms: now,
            last_accessed_time_ms: now,
            effective_time_ms,
            state,
        }
    }

    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut buf = [0u8; ENCODED_LEN];
        buf[CREATE_TIME_OFFSET..LAST_ACCESSED_TIME_OFFSET]
            .copy_from_slice(&self.create_time_ms.to_be_bytes());
        buf[LAST_ACCESSED_TIME_OFFSET..EFFECTIVE_TIME_OFFSET]
            .copy_from_slice(&self.last_accessed_time_ms.to_be_bytes());
        buf[EFFECTIVE_TIME_OFFSET..STATE_OFFSET]
            .copy_from_slice(&self.effective_time_ms.to_be_bytes());
        buf[STATE_OFFSET] = self.state as u8;
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        check_len(bytes)?;
        Ok(Self {
            create_time_ms: i64::read_at(bytes, CREATE_TIME_OFFSET)?,
            last_accessed_time_ms: read_last_accessed(bytes)?,
            effective_time_ms: i64::read_at(bytes, EFFECTIVE_TIME_OFFSET)?,
            state: read_state(bytes)?,
        })
    }
}

fn check_len(bytes: &[u8]) -> Result<()> {
    if bytes.len() != ENCODED_LEN {
        return Err(StoreError::corruption(format!(
            "processing info of {} bytes, expected {}",
            bytes.len(),
            ENCODED_LEN
        )));
    }
    Ok(())
}

pub fn read_last_accessed(bytes: &[u8]) -> Result<i64> {
    i64::read_at(bytes, LAST_ACCESSED_TIME_OFFSET)
}

pub fn read_state(bytes: &[u8]) -> Result<ProcessingState> {
    ProcessingState::from_u8(u8::read_at(bytes, STATE_OFFSET)?)
}

pub fn write_last_accessed(bytes: &mut [u8], time_ms: i64) -> Result<()> {
    check_len(bytes)?;
    time_ms.write_at(bytes, LAST_ACCESSED_TIME_OFFSET)
}

pub fn write_state(bytes: &mut [u8], state: ProcessingState) -> Result<()> {
    check_len(bytes)?;
    (state as u8).write_at(bytes, STATE_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProcessingInfo {
        ProcessingInfo {
            create_time_ms: 1_000,
            last_accessed_time_ms: 2_000,
            effective_time_ms: -3,
            state: ProcessingState::LoadInProgress,
        }
    }

    #[test]
    fn test_fixed_offsets() {
        let bytes = sample().encode();
        assert_eq!(&bytes[0..8], &1_000i64.to_be_bytes());
        assert_eq!(&bytes[8..16], &2_000i64.to_be_bytes());
        assert_eq!(&bytes[16..24], &(-3i64).to_be_bytes());
        assert_eq!(bytes[24], 0);
        assert_eq!(ProcessingInfo::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_single_field_updates() {
        let mut bytes = sample().encode();
        write_last_accessed(&mut bytes, 9_999).unwrap();
        write_state(&mut bytes, ProcessingState::Complete).unwrap();

        let info = ProcessingInfo::decode(&bytes).unwrap();
        assert_eq!(info.last_accessed_time_ms, 9_999);
        assert_eq!(info.state, ProcessingState::Complete);
        assert_eq!(info.create_time_ms, 1_000, "untouched field changed");
        assert_eq!(info.effective_time_ms, -3, "untouched field changed");
    }

    #[test]
    fn test_state_values() {
        for v in 0..=6u8 {
            assert_eq!(ProcessingState::from_u8(v).unwrap() as u8, v);
        }
        assert_eq!(ProcessingState::from_u8(7).unwrap_err().code(), "CORRUPTION");
        assert_eq!(ProcessingState::PurgeFailed.as_str(), "PURGE_FAILED");
    }

    #[test]
    fn test_wrong_length() {
        assert!(ProcessingInfo::decode(&[0u8; 24]).is_err());
        assert!(write_state(&mut [0u8; 26], ProcessingState::Failed).is_err());
    }

    #[test]
    fn test_now_is_positive() {
        assert!(now_ms() > 1_600_000_000_000);
    }
}
