//! Thermistor calibration: resistor divider followed by Steinhart–Hart.
//!
//! The thermistor sits on the low side of a divider with a fixed resistor on
//! the high side, so the ADC sees `V = Vref * R_t / (R_fixed + R_t)` inverted as
//! `R_t = R_fixed * (Vref / V - 1)`. A higher voltage therefore means a lower
//! NTC resistance and a higher temperature.

use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};

const KELVIN_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationCurve {
    pub fixed_resistor_ohms: f64,
    pub vref: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl CalibrationCurve {
    /// 10 kΩ NTC behind a 10 kΩ divider at 3.3 V.
    pub const THERMISTOR_10K: CalibrationCurve = CalibrationCurve {
        fixed_resistor_ohms: 10_000.0,
        vref: 3.3,
        a: 1.285210645e-3,
        b: 2.124174560e-4,
        c: 1.438197044e-7,
    };

    /// Returns NaN for readings that have no physical interpretation: zero or
    /// negative voltage (disconnected probe) and voltages at or above `vref`.
    pub fn voltage_to_temperature(&self, voltage: f64) -> f64 {
        if !voltage.is_finite() || voltage <= 0.0 {
            return f64::NAN;
        }

        let resistance = self.fixed_resistor_ohms * (self.vref / voltage - 1.0);
        self.resistance_to_temperature(resistance)
    }

    pub fn resistance_to_temperature(&self, ohms: f64) -> f64 {
        if !ohms.is_finite() || ohms <= 0.0 {
            return f64::NAN;
        }

        let ln_r = ohms.ln();
        let inverse_kelvin = self.a + self.b * ln_r + self.c * ln_r.powi(3);
        round2(1.0 / inverse_kelvin - KELVIN_OFFSET)
    }
}

impl Default for CalibrationCurve {
    fn default() -> Self {
        Self::THERMISTOR_10K
    }
}

/// Convenience for callers that want the default 10 kΩ curve.
pub fn voltage_to_temperature(voltage: f64) -> f64 {
    CalibrationCurve::THERMISTOR_10K.voltage_to_temperature(voltage)
}

/// Promote a NaN reading to `CalibrationUndefined` for callers that need a
/// hard failure instead of a sentinel.
pub fn checked(voltage: f64, celsius: f64) -> Result<f64> {
    if celsius.is_nan() {
        Err(LabError::CalibrationUndefined { voltage })
    } else {
        Ok(celsius)
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
