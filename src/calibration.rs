//! Runtime-adjustable calibration records.
//!
//! The defaults reproduce the fixed conversions in [`crate::utils`]; a JSON
//! file can override any subset of them without recompiling.

use std::f64::consts::LN_10;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uom::si::electric_potential::volt;
use uom::si::f32::{ElectricPotential, ThermodynamicTemperature};
use uom::si::thermodynamic_temperature::{degree_celsius, kelvin};

use crate::error::{Error, Result};
use crate::utils::{ADC_FULL_SCALE, ADC_REFERENCE_VOLTAGE, ITEMP_OFFSET, ITEMP_SCALE};

/// Molar gas constant, J/(mol·K).
pub const GAS_CONSTANT: f64 = 8.31446261815324;
/// Faraday constant, C/mol.
pub const FARADAY_CONSTANT: f64 = 96485.33212;

/// Linear ADC code to voltage conversion.
///
/// Coefficients are kept in double precision so the default record gives
/// exactly [`crate::utils::raw2volt`].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcCalibration {
    pub reference_voltage: f64,
    pub full_scale: f64,
}

impl Default for AdcCalibration {
    fn default() -> Self {
        Self {
            reference_voltage: ADC_REFERENCE_VOLTAGE,
            full_scale: ADC_FULL_SCALE,
        }
    }
}

impl AdcCalibration {
    pub fn to_volts(&self, code: f32) -> f32 {
        ((code as f64 / self.full_scale) * self.reference_voltage) as f32
    }

    pub fn voltage(&self, code: f32) -> ElectricPotential {
        ElectricPotential::new::<volt>(self.to_volts(code))
    }

    pub fn is_in_range(&self, code: f32) -> bool {
        (0.0..=self.full_scale).contains(&(code as f64))
    }
}

/// Affine correction `scale * raw + offset` for the board's internal
/// temperature sensor.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureCalibration {
    pub scale: f32,
    pub offset: f32,
}

impl Default for TemperatureCalibration {
    fn default() -> Self {
        Self {
            scale: ITEMP_SCALE,
            offset: ITEMP_OFFSET,
        }
    }
}

impl TemperatureCalibration {
    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        self.scale * raw + self.offset
    }
}

/// Nernst slope in V/pH at `temp_c` degrees Celsius, ≈0.05916 V/pH at 25 °C.
pub fn nernst_slope(temp_c: f32) -> f32 {
    let t = ThermodynamicTemperature::new::<degree_celsius>(temp_c).get::<kelvin>() as f64;
    (GAS_CONSTANT * t / FARADAY_CONSTANT * LN_10) as f32
}

/// Linear pH calibration through two buffer solutions: `pH = a * V + b`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoPointCalibration {
    pub ph1: f32,
    pub v1: f32,
    pub ph2: f32,
    pub v2: f32,
}

impl Default for TwoPointCalibration {
    fn default() -> Self {
        Self {
            ph1: 7.00,
            v1: 2.500,
            ph2: 4.00,
            v2: 3.000,
        }
    }
}

impl TwoPointCalibration {
    pub fn ph(&self, volts: f32) -> f32 {
        let (ph1, v1, ph2, v2) = (self.ph1 as f64, self.v1 as f64, self.ph2 as f64, self.v2 as f64);
        if (v2 - v1).abs() < 1e-12 {
            return f32::NAN;
        }
        let a = (ph2 - ph1) / (v2 - v1);
        let b = ph1 - a * v1;
        (a * volts as f64 + b) as f32
    }
}

/// Nernst model: `pH = 7 + sign * (V - E0) / S(T)`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NernstCalibration {
    /// Electrode potential at pH 7, volts.
    pub e0: f32,
    pub temperature_c: f32,
    /// -1 when the voltage falls as pH rises.
    pub sign: i8,
    /// Use the board's calibrated temperature instead of `temperature_c` when one is available.
    pub use_measured_temperature: bool,
}

impl Default for NernstCalibration {
    fn default() -> Self {
        Self {
            e0: 2.500,
            temperature_c: 25.0,
            sign: -1,
            use_measured_temperature: false,
        }
    }
}

impl NernstCalibration {
    pub fn effective_temperature(&self, measured_c: Option<f32>) -> f32 {
        match measured_c {
            Some(t) if self.use_measured_temperature && t.is_finite() => t,
            _ => self.temperature_c,
        }
    }

    pub fn ph(&self, volts: f32, temp_c: f32) -> f32 {
        let s = nernst_slope(temp_c);
        if !(s > 0.0) {
            return f32::NAN;
        }
        7.0 + self.sign as f32 * (volts - self.e0) / s
    }
}

/// Every calibration the monitor applies, loadable from a JSON file.
///
/// Sections missing from the file keep their defaults.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSet {
    pub adc: AdcCalibration,
    pub temperature: TemperatureCalibration,
    pub two_point: TwoPointCalibration,
    pub nernst: NernstCalibration,
}

impl CalibrationSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(text)?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.adc.full_scale > 0.0) || !self.adc.full_scale.is_finite() {
            return Err(Error::Calibration(format!(
                "adc.full_scale must be positive, got {}",
                self.adc.full_scale
            )));
        }
        if !self.adc.reference_voltage.is_finite() {
            return Err(Error::Calibration(format!(
                "adc.reference_voltage is not finite: {}",
                self.adc.reference_voltage
            )));
        }
        let coefficients = [
            ("temperature.scale", self.temperature.scale),
            ("temperature.offset", self.temperature.offset),
            ("two_point.ph1", self.two_point.ph1),
            ("two_point.v1", self.two_point.v1),
            ("two_point.ph2", self.two_point.ph2),
            ("two_point.v2", self.two_point.v2),
            ("nernst.e0", self.nernst.e0),
            ("nernst.temperature_c", self.nernst.temperature_c),
        ];
        if let Some((name, value)) = coefficients.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Calibration(format!("{} is not finite: {}", name, value)));
        }
        if self.nernst.sign != 1 && self.nernst.sign != -1 {
            return Err(Error::Calibration(format!(
                "nernst.sign must be 1 or -1, got {}",
                self.nernst.sign
            )));
        }
        Ok(())
    }
}
