// src/core/id.rs

//! Connection id generation.
//!
//! Ids are Sonyflake-style 63-bit integers:
//!
//! ```text
//! | 39 bits: time in 10 ms units since 2023-01-01 | 8 bits: sequence | 16 bits: machine id |
//! ```
//!
//! Ids from one generator are strictly increasing and never zero.

use crate::core::RiftError;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BIT_LEN_TIME: u32 = 39;
const BIT_LEN_SEQUENCE: u32 = 8;
const BIT_LEN_MACHINE_ID: u32 = 16;

const MAX_SEQUENCE: u16 = (1 << BIT_LEN_SEQUENCE) - 1;
const MAX_ELAPSED: u64 = 1 << BIT_LEN_TIME;

/// 2023-01-01T00:00:00Z.
const DEFAULT_EPOCH: Duration = Duration::from_secs(1_672_531_200);
const TIME_UNIT_MS: u128 = 10;

/// Source of unique, non-zero connection ids.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> Result<u64, RiftError>;
}

#[derive(Debug)]
struct SonyflakeState {
    elapsed: u64,
    sequence: u16,
}

#[derive(Debug)]
pub struct SonyflakeGenerator {
    machine_id: u16,
    epoch: SystemTime,
    state: Mutex<SonyflakeState>,
}

impl SonyflakeGenerator {
    pub fn new(machine_id: u16) -> Self {
        Self::with_epoch(machine_id, UNIX_EPOCH + DEFAULT_EPOCH)
    }

    pub fn with_epoch(machine_id: u16, epoch: SystemTime) -> Self {
        Self {
            machine_id,
            epoch,
            state: Mutex::new(SonyflakeState {
                elapsed: 0,
                sequence: MAX_SEQUENCE,
            }),
        }
    }

    pub fn machine_id(&self) -> u16 {
        self.machine_id
    }

    fn current_elapsed(&self) -> u64 {
        // A clock set before the epoch counts as the epoch itself.
        let since = SystemTime::now()
            .duration_since(self.epoch)
            .unwrap_or_default();
        (since.as_millis() / TIME_UNIT_MS) as u64
    }
}

impl IdGenerator for SonyflakeGenerator {
    fn next_id(&self) -> Result<u64, RiftError> {
        let now = self.current_elapsed();
        let mut state = self.state.lock();

        if now > state.elapsed {
            state.elapsed = now;
            state.sequence = 0;
        } else if state.sequence == MAX_SEQUENCE {
            // Sequence exhausted in this unit, or the clock went backwards:
            // borrow the next unit instead of waiting for it.
            state.elapsed += 1;
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }

        if state.elapsed >= MAX_ELAPSED {
            return Err(RiftError::Internal("id generator time overflow".into()));
        }

        Ok(state.elapsed << (BIT_LEN_SEQUENCE + BIT_LEN_MACHINE_ID)
            | u64::from(state.sequence) << BIT_LEN_MACHINE_ID
            | u64::from(self.machine_id))
    }
}

/// Splits an id into its `(elapsed, sequence, machine_id)` parts.
pub fn decompose(id: u64) -> (u64, u16, u16) {
    let machine_id = (id & ((1 << BIT_LEN_MACHINE_ID) - 1)) as u16;
    let sequence = ((id >> BIT_LEN_MACHINE_ID) & u64::from(MAX_SEQUENCE)) as u16;
    let elapsed = id >> (BIT_LEN_SEQUENCE + BIT_LEN_MACHINE_ID);
    (elapsed, sequence, machine_id)
}
