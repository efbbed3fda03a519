//! Detection of a board's flash encryption state.
//!
//! `espefuse summary` prints one line per efuse. The `FLASH_CRYPT_CNT` line
//! looks like this:
//!
//! ```text
//! FLASH_CRYPT_CNT (BLOCK0)    Flash encryption mode counter       = 7 R/W (0b1111111)
//! ```
//!
//! Flash encryption is on when the counter has an odd number of bits set.
//! The ESP32 only ever burns the counter bit by bit, so the only "on" values
//! that occur are the ones in [`ACTIVE_COUNTER_VALUES`].
use std::fmt;

use crate::tool::Toolchain;

/// Name of the efuse holding the flash encryption counter.
pub const COUNTER_FIELD: &str = "FLASH_CRYPT_CNT";

/// Counter values meaning flash encryption is enabled.
pub const ACTIVE_COUNTER_VALUES: [u32; 4] = [1, 7, 31, 127];

/// The outcome of looking for the counter in an efuse summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterReading {
    Value(u32),
    /// No line starts with [`COUNTER_FIELD`].
    LineMissing,
    /// The line exists but has no integer after its `=` token.
    ValueMissing,
    /// The efuse tool could not be run or reported failure.
    ProbeFailed,
}

impl fmt::Display for CounterReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterReading::Value(v) => write!(f, "{COUNTER_FIELD}={v}"),
            CounterReading::LineMissing => write!(f, "{COUNTER_FIELD} line not found"),
            CounterReading::ValueMissing => write!(f, "{COUNTER_FIELD} value not found"),
            CounterReading::ProbeFailed => write!(f, "{COUNTER_FIELD} could not be read"),
        }
    }
}

/// Flash encryption state of the attached board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionState {
    Inactive,
    Active,
    Indeterminate,
}

impl fmt::Display for EncryptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EncryptionState::Inactive => "flash encryption disabled",
            EncryptionState::Active => "flash encryption enabled",
            EncryptionState::Indeterminate => "flash encryption state unknown",
        };
        f.write_str(s)
    }
}

impl CounterReading {
    pub fn state(self) -> EncryptionState {
        match self {
            CounterReading::Value(v) if ACTIVE_COUNTER_VALUES.contains(&v) => {
                EncryptionState::Active
            }
            CounterReading::Value(_) => EncryptionState::Inactive,
            _ => EncryptionState::Indeterminate,
        }
    }
}

/// Finds the flash encryption counter in `espefuse summary` output.
pub fn parse_counter(summary: &str) -> CounterReading {
    let Some(line) = summary
        .lines()
        .find(|line| line.split_whitespace().next() == Some(COUNTER_FIELD))
    else {
        return CounterReading::LineMissing;
    };

    let mut tokens = line.split_whitespace().skip_while(|t| *t != "=");
    match tokens.nth(1).map(str::parse::<u32>) {
        Some(Ok(v)) => CounterReading::Value(v),
        _ => CounterReading::ValueMissing,
    }
}

/// A single probe of the attached board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub reading: CounterReading,
    pub state: EncryptionState,
}

/// Reads the counter from the board currently attached to the configured
/// port. Never cached: the operator may swap boards between probes.
pub fn probe(tools: &Toolchain<'_>) -> Probe {
    let reading = match tools.efuse_summary() {
        Ok(summary) => parse_counter(&summary),
        Err(e) => {
            log::warn!("efuse summary failed: {e}");
            CounterReading::ProbeFailed
        }
    };

    let state = reading.state();
    log::info!("{reading} ({state})");
    Probe { reading, state }
}
