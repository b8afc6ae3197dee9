//! MCP3008 8-channel, 10-bit SPI ADC.
//!
//! Single-ended conversion: send `[start, (single | channel) << 4, 0]` and the
//! converted value comes back in the low two bits of byte 1 and all of byte 2.

use embedded_hal::spi::SpiDevice;

use crate::error::{LabError, Result};

use super::bus_error;

pub const ADC_CHANNELS: u8 = 8;
const ADC_FULL_SCALE: f64 = 1024.0;

const START_BIT: u8 = 0x01;
const SINGLE_ENDED: u8 = 0x08;

pub struct Mcp3008<SPI> {
    spi: SPI,
    vref: f64,
}

impl<SPI: SpiDevice> Mcp3008<SPI> {
    pub fn new(spi: SPI, vref: f64) -> Self {
        Self { spi, vref }
    }

    pub fn vref(&self) -> f64 {
        self.vref
    }

    /// Raw 10-bit conversion result for `channel`.
    pub fn read_raw(&mut self, channel: u8) -> Result<u16> {
        if channel >= ADC_CHANNELS {
            return Err(LabError::ChannelOutOfRange {
                channel,
                available: ADC_CHANNELS,
            });
        }

        let command = [START_BIT, (SINGLE_ENDED + channel) << 4, 0x00];
        let mut response = [0u8; 3];
        self.spi
            .transfer(&mut response, &command)
            .map_err(|err| bus_error("MCP3008", err))?;

        Ok((u16::from(response[1] & 0x03) << 8) | u16::from(response[2]))
    }

    pub fn read_channel(&mut self, channel: u8) -> Result<f64> {
        let raw = self.read_raw(channel)?;
        Ok(f64::from(raw) * self.vref / ADC_FULL_SCALE)
    }

    pub fn release(self) -> SPI {
        self.spi
    }
}
