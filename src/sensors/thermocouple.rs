//! MAX6675 K-type thermocouple converter.
//!
//! The converter shares SCLK/MISO with the ADC but has its own chip-select,
//! driven by hand from a GPIO. The SPI endpoint is opened for each read and
//! dropped right after so the two devices never hold the bus together.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;

use crate::error::{LabError, Result};

use super::bus_error;
use super::calibration::round2;

const DEGREES_PER_COUNT: f64 = 0.25;
const OPEN_INPUT_BIT: u16 = 0x0004;

/// Opens a fresh SPI endpoint per read.
pub trait SpiOpener {
    type Device: SpiDevice;

    fn open(&mut self) -> Result<Self::Device>;
}

pub struct Max6675<O, CS, D> {
    opener: O,
    chip_select: CS,
    delay: D,
    conversion_delay_ms: u32,
}

impl<O, CS, D> Max6675<O, CS, D>
where
    O: SpiOpener,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(opener: O, mut chip_select: CS, delay: D, conversion_delay_ms: u32) -> Result<Self> {
        chip_select
            .set_high()
            .map_err(|err| LabError::Bus(format!("MAX6675 chip-select: {err:?}")))?;
        Ok(Self {
            opener,
            chip_select,
            delay,
            conversion_delay_ms,
        })
    }

    /// Temperature in °C, or NaN when the converter flags an open thermocouple.
    pub fn read_temperature(&mut self) -> Result<f64> {
        let raw = self.read_word()?;
        if raw & OPEN_INPUT_BIT != 0 {
            return Ok(f64::NAN);
        }
        Ok(decode(raw))
    }

    fn read_word(&mut self) -> Result<u16> {
        self.chip_select
            .set_low()
            .map_err(|err| LabError::Bus(format!("MAX6675 chip-select: {err:?}")))?;
        self.delay.delay_ms(self.conversion_delay_ms);

        let result = self.transfer();

        // Release chip-select whatever the transfer did.
        let released = self.chip_select.set_high();
        let word = result?;
        released.map_err(|err| LabError::Bus(format!("MAX6675 chip-select: {err:?}")))?;
        Ok(word)
    }

    fn transfer(&mut self) -> Result<u16> {
        let mut device = self.opener.open()?;
        let mut buf = [0u8; 2];
        device
            .read(&mut buf)
            .map_err(|err| bus_error("MAX6675", err))?;
        drop(device);
        Ok(u16::from_be_bytes(buf))
    }
}

/// Drop the three status bits and scale to °C.
pub fn decode(raw: u16) -> f64 {
    round2(f64::from(raw >> 3) * DEGREES_PER_COUNT)
}
