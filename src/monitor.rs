use std::time::Instant;

use uom::si::electric_potential::volt;

use crate::calibration::{CalibrationSet, nernst_slope};
use crate::data_models::{LineReading, Sample, SampleFlags};
use crate::history::SampleHistory;

/// Turns firmware readings into calibrated samples and keeps their history.
#[derive(Debug)]
pub struct Monitor {
    calibration: CalibrationSet,
    history: SampleHistory,
    started_at: Instant,
}

impl Monitor {
    pub fn new(calibration: CalibrationSet, capacity: usize, started_at: Instant) -> Self {
        Self {
            calibration,
            history: SampleHistory::with_capacity(capacity),
            started_at,
        }
    }

    pub fn calibration(&self) -> &CalibrationSet {
        &self.calibration
    }

    pub fn set_calibration(&mut self, calibration: CalibrationSet) {
        self.calibration = calibration;
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    /// Clears the history and restarts the relative clock at `at`.
    pub fn reset(&mut self, at: Instant) {
        self.history.clear();
        self.started_at = at;
    }

    /// Builds a sample from `reading` received at `at` and records it.
    ///
    /// Returns `None` when the reading has neither a voltage nor an ADC code.
    pub fn ingest(&mut self, reading: LineReading, at: Instant) -> Option<Sample> {
        let cal = &self.calibration;
        let mut flags = SampleFlags::empty();

        let voltage = match (reading.voltage, reading.raw_adc) {
            (Some(v), _) => v,
            (None, Some(code)) => {
                flags |= SampleFlags::VOLTAGE_FROM_ADC;
                if !cal.adc.is_in_range(code) {
                    flags |= SampleFlags::ADC_OUT_OF_RANGE;
                }
                cal.adc.voltage(code).get::<volt>()
            }
            (None, None) => return None,
        };
        if !voltage.is_finite() {
            flags |= SampleFlags::NON_FINITE;
        }

        let temperature_c = reading.raw_temperature.map(|raw| cal.temperature.apply(raw));
        let ph_two_point = cal.two_point.ph(voltage);
        let ph_nernst = cal
            .nernst
            .ph(voltage, cal.nernst.effective_temperature(temperature_c));
        if ph_two_point.is_nan() || ph_nernst.is_nan() {
            flags |= SampleFlags::PH_UNDEFINED;
        }

        let elapsed = at.saturating_duration_since(self.started_at).as_secs_f64();
        let sample = Sample {
            t_rel: (elapsed * 1000.0).round() / 1000.0,
            voltage,
            ph_two_point,
            ph_nernst,
            temperature_c,
            device_ph: reading.device_ph,
            flags,
        };
        self.history.push(sample.clone());
        Some(sample)
    }

    /// One-line summary of the latest sample.
    pub fn status_line(&self) -> Option<String> {
        let last = self.history.latest()?;
        let temp_c = self.calibration.nernst.effective_temperature(last.temperature_c);
        let mut line = format!(
            "t={:.1}s | V={:.4} V | pH(2p)={:.3} | pH(Nernst)={:.3} | S_Nernst={:.5} V/pH",
            last.t_rel,
            last.voltage,
            last.ph_two_point,
            last.ph_nernst,
            nernst_slope(temp_c),
        );
        if let Some(t) = last.temperature_c {
            line.push_str(&format!(" | T={:.2} °C", t));
        }
        if !last.flags.is_empty() {
            line.push_str(&format!(" | flags={}", last.flags.names().join(",")));
        }
        Some(line)
    }
}
