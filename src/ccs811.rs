//! CCS811 driver.
//!
//! The CCS811 measures equivalent CO2 (eCO2) in ppm and Total Volatile Organic Compounds (TVOC)
//! in ppb. It is driven through a set of addressed registers: write the register number, then
//! either write the register's bytes or read them back.
//!
//! [CCS811 Datasheet](https://www.sciosense.com/wp-content/uploads/documents/SC-001232-DS-3-CCS811B-Datasheet-Revision-2.pdf)
//!
//! All section and figure references in this file are to that datasheet.
//!
//! Creating a `Ccs811` walks the start-up sequence below. The last step is skipped when no drive
//! mode is requested: a node waking in the middle of its conditioning period must leave the
//! sensor's running algorithm alone, restarting it would reset the conditioning.
//!
//! ```text
//!        Probe address (0x5A)  ──► NACK ──►  DeviceNotFound
//!                  │
//!                  ▼
//!        Read HW_ID (0x20)  ──► != 0x81 ──►  WrongHardware
//!                  │
//!                  ▼
//!        Read STATUS (0x00) ──► APP_VALID clear ──► ApplicationNotValid
//!                  │
//!                  ▼
//!          Drive mode given? ──► No ──► done (sensor keeps running as it was)
//!                  │
//!                  ▼
//!                 Yes
//!                  │
//!                  ▼
//!         Write APP_START (0xF4)
//!                  │
//!                  ▼
//!      Write MEAS_MODE (0x01) = mode << 4 | INT_DATARDY
//! ```
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, I2c};

/// CCS811 sensor's I2C address, with the ADDR pin pulled low.
pub const SENSOR_ADDRESS: u8 = 0x5A;

/// Address when the ADDR pin is pulled high.
pub const SENSOR_ADDRESS_ALT: u8 = 0x5B;

/// The value every CCS811 reports in its HW_ID register.
pub const HARDWARE_ID: u8 = 0x81;

/// Written to SW_RESET to reset the sensor into boot mode. Section 8.2, Figure 30.
pub(crate) const RESET_SEQUENCE: [u8; 4] = [0x11, 0xE5, 0x72, 0x8A];

/// Registers of the CCS811. Figure 8 (application) and Figure 22 (bootloader).
pub enum Register {
    /// 1 byte read.
    Status = 0x00,
    /// 1 byte read/write. Drive mode and interrupt settings.
    MeasMode = 0x01,
    /// Up to 8 bytes read. eCO2 and TVOC as big-endian 16-bit values first.
    AlgResultData = 0x02,
    /// 4 bytes write. Humidity and temperature compensation.
    EnvData = 0x05,
    /// 2 bytes read/write.
    Baseline = 0x11,
    /// 1 byte read. Always 0x81.
    HwId = 0x20,
    /// 1 byte read. Why the status error bit is set.
    ErrorId = 0xE0,
    /// 4 bytes write. Bootloader only.
    AppErase = 0xF1,
    /// 9 bytes write. Bootloader only.
    AppData = 0xF2,
    /// 0 bytes write. Bootloader only.
    AppVerify = 0xF3,
    /// 0 bytes write. Leaves the bootloader, starts the application.
    AppStart = 0xF4,
    /// 4 bytes write of RESET_SEQUENCE.
    SwReset = 0xFF,
}

/// Status register bits. Figure 12.
pub enum Status {
    /// An error occurred, see the ERROR_ID register.
    Error = 0b0000_0001,
    /// A new eCO2/TVOC sample is ready in ALG_RESULT_DATA.
    DataReady = 0b0000_1000,
    /// Valid application firmware is loaded.
    AppValid = 0b0001_0000,
    /// Bootloader finished verifying the application.
    AppVerify = 0b0010_0000,
    /// 0 is boot mode, 1 is application mode.
    FwMode = 0b1000_0000,
}

/// Bit 3 of MEAS_MODE: raise nINT whenever a new sample is ready. The node wakes from deep sleep
/// on that pin.
const INT_DATARDY: u8 = 0b0000_1000;

/// Measurement drive modes. Section 6, Figure 13.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum DriveMode {
    /// Idle, no measurements.
    Idle = 0b000,
    /// A measurement every second.
    Constant1s = 0b001,
    /// Pulse heating, a measurement every 10 seconds.
    Pulse10s = 0b010,
    /// Low power pulse heating, a measurement every 60 seconds.
    LowPower60s = 0b011,
    /// A measurement every 250ms, raw data only.
    Constant250ms = 0b100,
}

impl DriveMode {
    /// The value written to MEAS_MODE for this mode.
    pub fn meas_mode(self) -> u8 {
        ((self as u8) << 4) | INT_DATARDY
    }
}

/// SensorStatus is the content of the STATUS register.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct SensorStatus(pub u8);

impl SensorStatus {
    pub fn new(status: u8) -> Self {
        SensorStatus(status)
    }

    /// The ERROR_ID register holds details about a failure.
    pub fn has_error(self) -> bool {
        (self.0 & Status::Error as u8) != 0
    }

    /// ALG_RESULT_DATA holds a sample that hasn't been read yet. Results read while this is
    /// clear are stale, or zero straight after start-up.
    pub fn is_data_ready(self) -> bool {
        (self.0 & Status::DataReady as u8) != 0
    }

    pub fn is_app_valid(self) -> bool {
        (self.0 & Status::AppValid as u8) != 0
    }

    pub fn is_app_verified(self) -> bool {
        (self.0 & Status::AppVerify as u8) != 0
    }

    /// True when running the application, false in boot mode.
    pub fn is_app_mode(self) -> bool {
        (self.0 & Status::FwMode as u8) != 0
    }
}

/// One eCO2/TVOC sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct GasReading {
    /// Equivalent CO2 in ppm. The sensor clips this to 400..=8192.
    pub eco2: u16,
    /// Total volatile organic compounds in ppb. Clipped to 0..=1187.
    pub tvoc: u16,
}

impl GasReading {
    /// Figure 14: eCO2 high byte, eCO2 low byte, TVOC high byte, TVOC low byte.
    fn from_bytes(data: [u8; 4]) -> Self {
        GasReading {
            eco2: u16::from_be_bytes([data[0], data[1]]),
            tvoc: u16::from_be_bytes([data[2], data[3]]),
        }
    }
}

/// Driver errors.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// I2C bus error
    I2c(E),
    /// Nothing acknowledged the configured address. Usually wiring, or nWAKE not pulled low.
    DeviceNotFound,
    /// Something answered, but its HW_ID is not 0x81.
    WrongHardware(u8),
    /// The status register says no valid application firmware is loaded.
    ApplicationNotValid,
}

/// Encode humidity and temperature for the ENV_DATA register. Section 4.5, Figure 27.
///
/// Humidity is sent as a whole percentage shifted left by one; the half-percent bit and the
/// second byte are left at zero. Temperature is sent with an offset of 25°C: the integer part in
/// the top seven bits and the fraction in 1/512ths in the bottom nine.
///
/// Values are clamped to what the register can hold: 0..=127 %RH and -25..=102.998°C.
pub fn encode_environment(humidity: f32, temperature: f32) -> [u8; 4] {
    // Clamp as floats first, so out of range or infinite input can't overflow the integer math.
    let humidity = libm::floorf(humidity.clamp(0.0, 127.0)) as u8;

    let temperature = temperature.clamp(-25.0, 102.998);
    let whole = libm::floorf(temperature);
    // Fraction is in [0, 1), round it to 1/512ths without spilling into the integer part.
    let fraction = (libm::roundf((temperature - whole) * 512.0) as u16).min(511);
    let whole = (whole as i16 + 25) as u16;
    let temperature = ((whole << 9) | fraction).to_be_bytes();

    [humidity << 1, 0x00, temperature[0], temperature[1]]
}

/// A CCS811 on the I2C bus `I`, validated and (optionally) started.
///
/// This is the per-wake sensor session: it owns the bus for as long as it lives and remembers
/// the last eCO2/TVOC values it read. Pass `&mut bus` to keep the bus after the session ends.
pub struct Ccs811<I>
where
    I: I2c,
{
    i2c: I,
    address: u8,
    mode: Option<DriveMode>,
    eco2: u16,
    tvoc: u16,
}

impl<E, I> Ccs811<I>
where
    I: I2c<Error = E>,
    E: i2c::Error,
{
    /// Validate the sensor and, if `mode` is given, start its application in that drive mode.
    ///
    /// With `mode` set to `None` nothing is written to the sensor. Use that when the sensor has
    /// been running across a deep sleep and its internal state has to be kept.
    pub fn new(i2c: I, address: u8, mode: Option<DriveMode>) -> Result<Self, Error<E>> {
        let mut ccs811 = Ccs811 {
            i2c,
            address,
            mode,
            eco2: 0,
            tvoc: 0,
        };

        ccs811.validate_device_present()?;
        ccs811.validate_hardware()?;
        ccs811.validate_application_present()?;
        if let Some(mode) = mode {
            ccs811.start_application()?;
            ccs811.set_mode(mode)?;
        }

        Ok(ccs811)
    }

    /// Last eCO2 value read, in ppm.
    pub fn eco2(&self) -> u16 {
        self.eco2
    }

    /// Last TVOC value read, in ppb.
    pub fn tvoc(&self) -> u16 {
        self.tvoc
    }

    /// The drive mode this session programmed, `None` if it left the sensor as it was.
    pub fn mode(&self) -> Option<DriveMode> {
        self.mode
    }

    pub fn status(&mut self) -> Result<SensorStatus, Error<E>> {
        let mut status = [0u8; 1];
        self.read_register(Register::Status, &mut status)?;
        let status = SensorStatus::new(status[0]);
        trace!(
            "ccs811 status: valid {}, ready {}, error {}",
            status.is_app_valid(),
            status.is_data_ready(),
            status.has_error()
        );
        Ok(status)
    }

    /// Read the latest eCO2 and TVOC values.
    ///
    /// This does not look at the data-ready bit. The values are only fresh if `status()` reported
    /// data ready; see `read_if_ready`.
    pub fn read(&mut self) -> Result<GasReading, Error<E>> {
        let mut data = [0u8; 4];
        self.read_register(Register::AlgResultData, &mut data)?;

        let reading = GasReading::from_bytes(data);
        self.eco2 = reading.eco2;
        self.tvoc = reading.tvoc;
        Ok(reading)
    }

    /// Read eCO2 and TVOC if a new sample is ready, `None` otherwise.
    ///
    /// If the sensor flags an error, its ERROR_ID is logged. The flag is informational here: the
    /// sample, if any, is still returned.
    pub fn read_if_ready(&mut self) -> Result<Option<GasReading>, Error<E>> {
        let status = self.status()?;
        if status.has_error() {
            let error_id = self.error_id()?;
            warn!("ccs811 reports error id {=u8:#x}", error_id);
        }
        if !status.is_data_ready() {
            debug!("ccs811 data not ready");
            return Ok(None);
        }
        self.read().map(Some)
    }

    /// Send humidity (%RH) and temperature (°C) so the sensor can compensate for them.
    pub fn put_environment_data(
        &mut self,
        humidity: f32,
        temperature: f32,
    ) -> Result<(), Error<E>> {
        self.write_register(Register::EnvData, &encode_environment(humidity, temperature))
    }

    /// Read the sensor's current baseline. The value is opaque, only useful for `put_baseline`.
    pub fn baseline(&mut self) -> Result<u16, Error<E>> {
        let mut baseline = [0u8; 2];
        self.read_register(Register::Baseline, &mut baseline)?;
        Ok(u16::from_be_bytes(baseline))
    }

    /// Restore a baseline previously read with `baseline`.
    pub fn put_baseline(&mut self, baseline: u16) -> Result<(), Error<E>> {
        self.write_register(Register::Baseline, &baseline.to_be_bytes())
    }

    /// Read the ERROR_ID register. Figure 25 describes the individual bits.
    pub fn error_id(&mut self) -> Result<u8, Error<E>> {
        let mut error_id = [0u8; 1];
        self.read_register(Register::ErrorId, &mut error_id)?;
        Ok(error_id[0])
    }

    /// Reset the sensor into boot mode. This undoes conditioning and the loaded baseline.
    ///
    /// The sensor needs 2ms before it answers again, which this waits out.
    pub fn reset(mut self, delay: &mut impl DelayNs) -> Result<I, Error<E>> {
        self.write_register(Register::SwReset, &RESET_SEQUENCE)?;
        delay.delay_ms(2);
        Ok(self.i2c)
    }

    /// End the session and hand back the I2C bus `I`.
    pub fn release(self) -> I {
        self.i2c
    }

    /// Probe the address with an address-only write. A NACK means nothing is there.
    fn validate_device_present(&mut self) -> Result<(), Error<E>> {
        match self.i2c.write(self.address, &[]) {
            Ok(()) => Ok(()),
            Err(e) => match e.kind() {
                ErrorKind::NoAcknowledge(_) => Err(Error::DeviceNotFound),
                _ => Err(Error::I2c(e)),
            },
        }
    }

    fn validate_hardware(&mut self) -> Result<(), Error<E>> {
        let mut hardware_id = [0u8; 1];
        self.read_register(Register::HwId, &mut hardware_id)?;
        if hardware_id[0] != HARDWARE_ID {
            return Err(Error::WrongHardware(hardware_id[0]));
        }
        Ok(())
    }

    fn validate_application_present(&mut self) -> Result<(), Error<E>> {
        if !self.status()?.is_app_valid() {
            return Err(Error::ApplicationNotValid);
        }
        Ok(())
    }

    /// APP_START takes no data, only the register address.
    fn start_application(&mut self) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &[Register::AppStart as u8])
            .map_err(Error::I2c)
    }

    fn set_mode(&mut self, mode: DriveMode) -> Result<(), Error<E>> {
        debug!("ccs811 drive mode {}", mode);
        self.write_register(Register::MeasMode, &[mode.meas_mode()])
    }

    fn read_register(&mut self, register: Register, buffer: &mut [u8]) -> Result<(), Error<E>> {
        let register = register as u8;
        self.i2c
            .write_read(self.address, &[register], buffer)
            .map_err(Error::I2c)?;
        trace!("read register {=u8:#x}: {=[u8]:#x}", register, &*buffer);
        Ok(())
    }

    /// Registers are at most four bytes long, plus one for the register address.
    fn write_register(&mut self, register: Register, data: &[u8]) -> Result<(), Error<E>> {
        let register = register as u8;
        trace!("write register {=u8:#x}: {=[u8]:#x}", register, data);
        let mut frame = [0u8; 5];
        frame[0] = register;
        frame[1..=data.len()].copy_from_slice(data);
        self.i2c
            .write(self.address, &frame[..=data.len()])
            .map_err(Error::I2c)
    }
}
