//! Wake-cycle state kept in retained memory across deep sleep.
//!
//! Everything in RAM is lost when the node goes into deep sleep, except for a few bytes of
//! retained (RTC) memory. Those bytes tell the next wake where the CCS811 stands in its
//! conditioning and baseline process. Three layouts exist in the field:
//!
//! ```text
//! length  layout    byte 0            byte 1
//! ──────  ────────  ────────────────  ──────────────────────
//!   0     empty     -                 -                       true power-on
//!   1     legacy    runs remaining    -                       loaded implied false
//!   2     current   runs remaining    baseline loaded (0/1)
//! ```
//!
//! The legacy layout was written by firmware that had no baseline support at all, so a node
//! running it could never have loaded a baseline into the sensor. Reading it as
//! `baseline_loaded = false` is therefore exact, not a guess. Only the current layout is ever
//! written.

/// Length of the current retained layout, the only one we write.
pub const ENCODED_LEN: usize = 2;

/// Where the gas sensor stands in its conditioning and calibration process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct WakeCycleState {
    /// Conditioning runs left before gas readings can be trusted.
    pub runs_remaining: u8,
    /// A stored baseline has been written into the sensor since it was last (re)initialized.
    pub baseline_loaded: bool,
}

impl WakeCycleState {
    /// State written on true power-on: the full conditioning period ahead, no baseline loaded.
    pub const fn fresh(conditioning_runs: u8) -> Self {
        WakeCycleState {
            runs_remaining: conditioning_runs,
            baseline_loaded: false,
        }
    }

    /// Account for one more wake. The counter never goes below zero.
    pub const fn advance(self) -> Self {
        WakeCycleState {
            runs_remaining: self.runs_remaining.saturating_sub(1),
            baseline_loaded: self.baseline_loaded,
        }
    }

    /// Record that the stored baseline has been written into the sensor.
    pub const fn with_baseline_loaded(self) -> Self {
        WakeCycleState {
            runs_remaining: self.runs_remaining,
            baseline_loaded: true,
        }
    }

    pub const fn is_conditioned(self) -> bool {
        self.runs_remaining == 0
    }

    /// Serialize to the current two byte layout.
    pub const fn encode(self) -> [u8; ENCODED_LEN] {
        [self.runs_remaining, self.baseline_loaded as u8]
    }
}

/// The retained memory could not be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// More bytes than any layout we have ever written.
    UnsupportedLength(usize),
    /// The baseline-loaded byte was neither 0 nor 1.
    InvalidFlag(u8),
}

/// The retained layouts, keyed by length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainedLayout {
    Empty,
    Legacy { runs_remaining: u8 },
    Current { runs_remaining: u8, loaded_flag: u8 },
}

impl RetainedLayout {
    /// Classify raw retained bytes. Nothing is validated beyond the length.
    pub fn identify(bytes: &[u8]) -> Result<Self, DecodeError> {
        match *bytes {
            [] => Ok(RetainedLayout::Empty),
            [runs_remaining] => Ok(RetainedLayout::Legacy { runs_remaining }),
            [runs_remaining, loaded_flag] => Ok(RetainedLayout::Current {
                runs_remaining,
                loaded_flag,
            }),
            _ => Err(DecodeError::UnsupportedLength(bytes.len())),
        }
    }

    /// Interpret the layout. `Ok(None)` means true power-on.
    pub fn into_state(self) -> Result<Option<WakeCycleState>, DecodeError> {
        match self {
            RetainedLayout::Empty => Ok(None),
            RetainedLayout::Legacy { runs_remaining } => Ok(Some(WakeCycleState {
                runs_remaining,
                baseline_loaded: false,
            })),
            RetainedLayout::Current {
                runs_remaining,
                loaded_flag,
            } => {
                let baseline_loaded = match loaded_flag {
                    0 => false,
                    1 => true,
                    other => return Err(DecodeError::InvalidFlag(other)),
                };
                Ok(Some(WakeCycleState {
                    runs_remaining,
                    baseline_loaded,
                }))
            }
        }
    }
}

/// Decode retained bytes. `Ok(None)` signals true power-on.
pub fn decode(bytes: &[u8]) -> Result<Option<WakeCycleState>, DecodeError> {
    RetainedLayout::identify(bytes)?.into_state()
}
