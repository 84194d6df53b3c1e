//! CCS811 application firmware upgrade.
//!
//! The CCS811 ships with a bootloader that can replace the application firmware. The flow, from
//! the datasheet's bootloader section (Figure 22 onwards):
//!
//! ```text
//!        SW_RESET (0xFF) 11 E5 72 8A      sensor restarts in boot mode
//!                  │
//!                  ▼
//!        APP_ERASE (0xF1) E7 A7 E6 09     wait 500 ms
//!                  │
//!                  ▼
//!        APP_DATA (0xF2) + 8 bytes   ◄─┐  wait 50 ms per block
//!                  │                   │
//!                  ▼                   │
//!            more image? ──► Yes ──────┘
//!                  │
//!                  ▼
//!        APP_VERIFY (0xF3)                wait 500 ms
//!                  │
//!                  ▼
//!        STATUS (0x00): APP_VALID set?
//! ```
//!
//! Once verified, power cycle the sensor (or send APP_START) to run the new application.
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::ccs811::{Register, SensorStatus, RESET_SEQUENCE};

/// Key written to APP_ERASE to unlock the erase.
const ERASE_SEQUENCE: [u8; 4] = [0xE7, 0xA7, 0xE6, 0x09];

/// The bootloader takes the image in blocks of this many bytes.
pub const BLOCK_LEN: usize = 8;

/// Bootloader errors.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// I2C bus error
    I2c(E),
    /// A block longer than `BLOCK_LEN` was passed to `write_block`.
    BlockTooLong(usize),
    /// The bootloader did not accept the downloaded image.
    VerifyFailed,
}

/// A CCS811 in (or about to enter) boot mode.
pub struct Ccs811Bootloader<I>
where
    I: I2c,
{
    i2c: I,
    address: u8,
}

impl<E, I> Ccs811Bootloader<I>
where
    I: I2c<Error = E>,
{
    pub fn new(i2c: I, address: u8) -> Self {
        Ccs811Bootloader { i2c, address }
    }

    /// Reset the sensor, which restarts it in boot mode.
    pub fn enter_boot_mode(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.write(Register::SwReset, &RESET_SEQUENCE)?;
        delay.delay_ms(100);
        Ok(())
    }

    /// Erase the current application.
    pub fn erase_application(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.write(Register::AppErase, &ERASE_SEQUENCE)?;
        delay.delay_ms(500);
        Ok(())
    }

    /// Send one block of the application image. The final block may be short.
    pub fn write_block(&mut self, block: &[u8], delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        if block.len() > BLOCK_LEN {
            return Err(Error::BlockTooLong(block.len()));
        }
        self.write(Register::AppData, block)?;
        delay.delay_ms(50);
        Ok(())
    }

    /// Ask the bootloader to verify the image, then report whether it is now a valid application.
    pub fn verify_application(&mut self, delay: &mut impl DelayNs) -> Result<bool, Error<E>> {
        self.write(Register::AppVerify, &[])?;
        delay.delay_ms(500);

        let mut status = [0u8; 1];
        self.i2c
            .write_read(self.address, &[Register::Status as u8], &mut status)
            .map_err(Error::I2c)?;
        let status = SensorStatus::new(status[0]);
        debug!(
            "bootloader verify: verified {}, valid {}",
            status.is_app_verified(),
            status.is_app_valid()
        );
        Ok(status.is_app_valid())
    }

    /// Replace the application firmware with `image`.
    pub fn upgrade(&mut self, image: &[u8], delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        info!("ccs811 firmware upgrade: {=usize} bytes", image.len());
        self.enter_boot_mode(delay)?;
        self.erase_application(delay)?;
        for block in image.chunks(BLOCK_LEN) {
            self.write_block(block, delay)?;
        }
        if !self.verify_application(delay)? {
            error!("ccs811 firmware upgrade failed verification");
            return Err(Error::VerifyFailed);
        }
        info!("ccs811 firmware upgrade done, power cycle the sensor");
        Ok(())
    }

    /// Hand back the I2C bus `I`.
    pub fn release(self) -> I {
        self.i2c
    }

    fn write(&mut self, register: Register, data: &[u8]) -> Result<(), Error<E>> {
        let mut frame = [0u8; BLOCK_LEN + 1];
        frame[0] = register as u8;
        frame[1..=data.len()].copy_from_slice(data);
        self.i2c
            .write(self.address, &frame[..=data.len()])
            .map_err(Error::I2c)
    }
}
