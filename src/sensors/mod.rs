pub mod adc;
pub mod calibration;
#[cfg(target_os = "linux")]
pub mod hardware;
pub mod thermocouple;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};
use crate::settings::Settings;

use adc::Mcp3008;
use calibration::CalibrationCurve;
use thermocouple::{Max6675, SpiOpener};

pub use calibration::voltage_to_temperature;

/// One pass over every configured probe, already in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    pub thermistors: Vec<f64>,
    pub thermocouple: f64,
}

/// Everything the sampling loop needs from the hardware. The loop takes
/// ownership of the array for the whole session and hands it back on stop.
pub trait SensorArray: Send {
    fn thermistor_count(&self) -> usize;

    /// Blocking. Unconvertible thermistor voltages come back as NaN; bus
    /// failures are errors.
    fn sample(&mut self) -> Result<Readings>;
}

/// MCP3008 thermistor channels plus a MAX6675 thermocouple.
pub struct ProbeArray<SPI, O, CS, D> {
    adc: Mcp3008<SPI>,
    thermocouple: Max6675<O, CS, D>,
    channels: Vec<u8>,
    curve: CalibrationCurve,
}

impl<SPI, O, CS, D> ProbeArray<SPI, O, CS, D>
where
    SPI: SpiDevice,
    O: SpiOpener,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(
        adc: Mcp3008<SPI>,
        thermocouple: Max6675<O, CS, D>,
        channels: Vec<u8>,
        curve: CalibrationCurve,
    ) -> Result<Self> {
        if let Some(&channel) = channels.iter().find(|&&ch| ch >= adc::ADC_CHANNELS) {
            return Err(LabError::ChannelOutOfRange {
                channel,
                available: adc::ADC_CHANNELS,
            });
        }
        Ok(Self {
            adc,
            thermocouple,
            channels,
            curve,
        })
    }

    pub fn curve(&self) -> CalibrationCurve {
        self.curve
    }
}

impl<SPI, O, CS, D> SensorArray for ProbeArray<SPI, O, CS, D>
where
    SPI: SpiDevice + Send,
    O: SpiOpener + Send,
    CS: OutputPin + Send,
    D: DelayNs + Send,
{
    fn thermistor_count(&self) -> usize {
        self.channels.len()
    }

    fn sample(&mut self) -> Result<Readings> {
        let mut thermistors = Vec::with_capacity(self.channels.len());
        for &channel in &self.channels {
            let voltage = self.adc.read_channel(channel)?;
            thermistors.push(self.curve.voltage_to_temperature(voltage));
        }
        let thermocouple = self.thermocouple.read_temperature()?;
        Ok(Readings {
            thermistors,
            thermocouple,
        })
    }
}

/// Open the configured probes. Only Linux has a hardware backend.
pub fn open_sensor_array(settings: &Settings) -> Result<Box<dyn SensorArray>> {
    #[cfg(target_os = "linux")]
    {
        let array = hardware::open_probe_array(settings)?;
        Ok(Box::new(array))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = settings;
        Err(LabError::device("spi", "SPI probes are only supported on Linux"))
    }
}

pub(crate) fn bus_error<E: embedded_hal::spi::Error>(device: &str, err: E) -> LabError {
    LabError::Bus(format!("{device}: {:?}", err.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::adc::tests::ScriptedSpi;
    use std::convert::Infallible;

    struct FixedOpener(Vec<u8>);

    impl SpiOpener for FixedOpener {
        type Device = ScriptedSpi;

        fn open(&mut self) -> Result<ScriptedSpi> {
            Ok(ScriptedSpi {
                responses: vec![self.0.clone()],
                ..Default::default()
            })
        }
    }

    struct NoPin;

    impl embedded_hal::digital::ErrorType for NoPin {
        type Error = Infallible;
    }

    impl OutputPin for NoPin {
        fn set_low(&mut self) -> std::result::Result<(), Infallible> {
            Ok(())
        }

        fn set_high(&mut self) -> std::result::Result<(), Infallible> {
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn array(adc_replies: Vec<Vec<u8>>, channels: Vec<u8>) -> Result<ProbeArray<ScriptedSpi, FixedOpener, NoPin, NoDelay>> {
        let adc = Mcp3008::new(
            ScriptedSpi {
                responses: adc_replies,
                ..Default::default()
            },
            3.3,
        );
        let max = Max6675::new(FixedOpener(vec![0x03, 0x20]), NoPin, NoDelay, 10)?;
        ProbeArray::new(adc, max, channels, CalibrationCurve::default())
    }

    #[test]
    fn samples_every_channel_in_order() {
        let replies = vec![
            vec![0, 0x02, 0x00],
            vec![0, 0x00, 0x00],
            vec![0, 0x03, 0xFF],
            vec![0, 0x02, 0x00],
        ];
        let mut probes = array(replies, vec![0, 1, 2, 3]).unwrap();
        let readings = probes.sample().unwrap();

        assert_eq!(probes.thermistor_count(), 4);
        assert_eq!(readings.thermistors.len(), 4);
        assert_eq!(readings.thermistors[0], 25.0);
        assert!(readings.thermistors[1].is_nan());
        assert!(readings.thermistors[2].is_finite());
        assert_eq!(readings.thermistors[3], 25.0);
        assert_eq!(readings.thermocouple, 25.0);
    }

    #[test]
    fn rejects_unknown_channels_up_front() {
        assert!(matches!(
            array(Vec::new(), vec![0, 9]),
            Err(LabError::ChannelOutOfRange { channel: 9, .. })
        ));
    }
}
