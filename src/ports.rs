//! Collaborators of the wake cycle.
//!
//! The humidity/temperature sensor, the e-paper display, battery measurement, retained memory
//! and deep sleep all live outside this crate. Board support code implements these traits and
//! hands the implementations to `Node::new`. The manual baseline-capture button and the status
//! LED are plain `embedded-hal` digital pins.

/// Ambient conditions from the humidity/temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct Environment {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
}

/// What a wake cycle shows on the display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    /// Equivalent CO2 in ppm, `None` while the value can't be trusted.
    pub eco2: Option<u16>,
    /// TVOC in ppb, `None` while the value can't be trusted.
    pub tvoc: Option<u16>,
    pub battery_volts: Option<f32>,
    /// A stored baseline was written to the sensor during this cycle.
    pub baseline_just_loaded: bool,
}

impl Reading {
    /// A reading with no gas values.
    pub fn new(environment: Environment, battery_volts: Option<f32>) -> Self {
        Reading {
            temperature: environment.temperature,
            humidity: environment.humidity,
            eco2: None,
            tvoc: None,
            battery_volts,
            baseline_just_loaded: false,
        }
    }
}

/// Humidity/temperature sensor.
pub trait EnvironmentSensor {
    type Error;

    fn measure(&mut self) -> Result<Environment, Self::Error>;
}

/// Low power display showing the latest reading.
pub trait DisplaySink {
    type Error;

    /// Draw `reading`. With `full_redraw` the whole panel is refreshed, otherwise a partial
    /// update is enough.
    fn update(&mut self, reading: &Reading, full_redraw: bool) -> Result<(), Self::Error>;

    /// Put the panel into its lowest power state before deep sleep.
    fn sleep(&mut self) -> Result<(), Self::Error>;
}

/// Battery voltage measurement.
pub trait BatterySampler {
    type Error;

    fn volts(&mut self) -> Result<f32, Self::Error>;
}

/// The small memory region that survives deep sleep (RTC memory on most parts).
///
/// It is empty after a true power-on.
pub trait RetainedMemory {
    /// Copy the retained bytes into `buffer` and return how many there are. Bytes that don't fit
    /// are dropped, but still counted.
    fn read(&mut self, buffer: &mut [u8]) -> usize;

    /// Replace the retained bytes.
    fn write(&mut self, bytes: &[u8]);
}

/// Deep sleep. On hardware this doesn't return; the next wake starts from reset.
pub trait DeepSleep {
    fn deep_sleep(&mut self);
}
