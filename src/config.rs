//! Node configuration.
//!
//! Pin assignment and bus setup belong to the board support code that builds a `Node`; this is
//! only what the wake cycle itself needs to know.
use crate::ccs811::{DriveMode, SENSOR_ADDRESS};

/// Conditioning runs after power-on. With one wake a minute this is the 20 minute conditioning
/// period the datasheet asks for before readings are accurate (section 8.1).
pub const CONDITIONING_RUNS: u8 = 20;

/// How the status LED reports the outcome of a wake cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct IndicatorConfig {
    /// Pulses after a cycle that completed normally.
    pub success_pulses: u8,
    /// Pulses after a cycle that failed.
    pub failure_pulses: u8,
    pub on_ms: u32,
    pub off_ms: u32,
}

impl IndicatorConfig {
    pub const fn new() -> Self {
        Self {
            success_pulses: 1,
            failure_pulses: 3,
            on_ms: 100,
            off_ms: 100,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the wake cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// I2C address of the CCS811.
    pub sensor_address: u8,
    /// Wakes after power-on before gas readings are shown.
    pub conditioning_runs: u8,
    /// Drive mode programmed on power-on. Later wakes leave the sensor running as it is.
    pub startup_mode: DriveMode,
    pub indicator: IndicatorConfig,
}

impl NodeConfig {
    pub const fn new() -> Self {
        Self {
            sensor_address: SENSOR_ADDRESS,
            conditioning_runs: CONDITIONING_RUNS,
            startup_mode: DriveMode::LowPower60s,
            indicator: IndicatorConfig::new(),
        }
    }

    /// Sensor on the alternate address, or some other change of defaults.
    pub const fn with_sensor_address(mut self, address: u8) -> Self {
        self.sensor_address = address;
        self
    }

    pub const fn with_conditioning_runs(mut self, runs: u8) -> Self {
        self.conditioning_runs = runs;
        self
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}
