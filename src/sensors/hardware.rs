//! Raspberry Pi bindings for the probe drivers (spidev + GPIO through rppal).

use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};
use log::{error, info};
use rppal::gpio::{Gpio, OutputPin as GpioOutput};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::error::{LabError, Result};
use crate::settings::{AdcSettings, Settings, ThermocoupleSettings};

use super::adc::Mcp3008;
use super::thermocouple::{Max6675, SpiOpener};
use super::ProbeArray;

pub type PiProbeArray = ProbeArray<PiSpi, PiSpiOpener, PiPin, ThreadDelay>;

pub struct PiSpi(Spi);

impl ErrorType for PiSpi {
    type Error = ErrorKind;
}

impl SpiDevice for PiSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> std::result::Result<(), ErrorKind> {
        for op in operations {
            let outcome = match op {
                Operation::Read(buf) => self.0.read(buf).map(|_| ()),
                Operation::Write(buf) => self.0.write(buf).map(|_| ()),
                Operation::Transfer(read, write) => self.0.transfer(read, write).map(|_| ()),
                Operation::TransferInPlace(buf) => {
                    let outgoing = buf.to_vec();
                    self.0.transfer(buf, &outgoing).map(|_| ())
                }
                Operation::DelayNs(ns) => {
                    thread::sleep(Duration::from_nanos(u64::from(*ns)));
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                error!("spidev transfer failed: {err}");
                return Err(ErrorKind::Other);
            }
        }
        Ok(())
    }
}

/// Opens `/dev/spidevB.S` on demand; the handle closes when dropped.
pub struct PiSpiOpener {
    bus: Bus,
    slave_select: SlaveSelect,
    clock_hz: u32,
}

impl SpiOpener for PiSpiOpener {
    type Device = PiSpi;

    fn open(&mut self) -> Result<PiSpi> {
        Spi::new(self.bus, self.slave_select, self.clock_hz, Mode::Mode0)
            .map(PiSpi)
            .map_err(|err| LabError::device(format!("{:?}/{:?}", self.bus, self.slave_select), err))
    }
}

pub struct PiPin(GpioOutput);

impl embedded_hal::digital::ErrorType for PiPin {
    type Error = std::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for PiPin {
    fn set_low(&mut self) -> std::result::Result<(), Self::Error> {
        self.0.set_low();
        Ok(())
    }

    fn set_high(&mut self) -> std::result::Result<(), Self::Error> {
        self.0.set_high();
        Ok(())
    }
}

pub struct ThreadDelay;

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

pub fn open_probe_array(settings: &Settings) -> Result<PiProbeArray> {
    let adc = open_adc(&settings.adc)?;
    let thermocouple = open_thermocouple(&settings.thermocouple)?;
    let channels: Vec<u8> = (0..settings.thermistor_channels).collect();

    info!(
        "Opened probes: MCP3008 on SPI{}.{} ({} channels), MAX6675 on SPI{}.{} with CS GPIO{}",
        settings.adc.bus,
        settings.adc.slave_select,
        channels.len(),
        settings.thermocouple.bus,
        settings.thermocouple.slave_select,
        settings.thermocouple.cs_pin
    );

    ProbeArray::new(adc, thermocouple, channels, settings.calibration)
}

fn open_adc(cfg: &AdcSettings) -> Result<Mcp3008<PiSpi>> {
    let bus = spi_bus(cfg.bus)?;
    let ss = slave_select(cfg.slave_select)?;
    let spi = Spi::new(bus, ss, cfg.clock_hz, Mode::Mode0)
        .map_err(|err| LabError::device(format!("spidev{}.{}", cfg.bus, cfg.slave_select), err))?;
    Ok(Mcp3008::new(PiSpi(spi), cfg.vref))
}

fn open_thermocouple(cfg: &ThermocoupleSettings) -> Result<Max6675<PiSpiOpener, PiPin, ThreadDelay>> {
    let opener = PiSpiOpener {
        bus: spi_bus(cfg.bus)?,
        slave_select: slave_select(cfg.slave_select)?,
        clock_hz: cfg.clock_hz,
    };
    let pin = Gpio::new()
        .and_then(|gpio| gpio.get(cfg.cs_pin))
        .map_err(|err| LabError::device(format!("GPIO{}", cfg.cs_pin), err))?
        .into_output_high();

    Max6675::new(opener, PiPin(pin), ThreadDelay, cfg.conversion_delay_ms)
}

fn spi_bus(index: u8) -> Result<Bus> {
    match index {
        0 => Ok(Bus::Spi0),
        1 => Ok(Bus::Spi1),
        2 => Ok(Bus::Spi2),
        3 => Ok(Bus::Spi3),
        4 => Ok(Bus::Spi4),
        5 => Ok(Bus::Spi5),
        6 => Ok(Bus::Spi6),
        other => Err(LabError::InvalidParameter {
            name: "spi bus",
            reason: format!("no SPI{other} on this board"),
        }),
    }
}

fn slave_select(index: u8) -> Result<SlaveSelect> {
    match index {
        0 => Ok(SlaveSelect::Ss0),
        1 => Ok(SlaveSelect::Ss1),
        2 => Ok(SlaveSelect::Ss2),
        other => Err(LabError::InvalidParameter {
            name: "slave select",
            reason: format!("unsupported chip select {other}"),
        }),
    }
}
