use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::data_models::Sample;
use crate::error::Result;

/// Upper bound on retained samples.
pub const MAX_HISTORY: usize = 10_000;

pub const CSV_HEADER: &str = "t_rel,V,pH_2p,pH_nernst,temp_c,device_pH,flags";

/// Bounded sample history, oldest samples are dropped first.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }
}

impl SampleHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HISTORY);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// The last `n` samples, oldest first.
    pub fn window(&self, n: usize) -> impl Iterator<Item = &Sample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    /// Writes the whole history, or only the last `window` samples, to `path`.
    pub fn export_csv(&self, path: impl AsRef<Path>, window: Option<usize>) -> Result<usize> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        let rows = match window {
            Some(n) => write_csv(&mut writer, self.window(n))?,
            None => write_csv(&mut writer, self.iter())?,
        };
        writer.flush()?;
        info!("已导出 {} 条样本到 {}", rows, path.display());
        Ok(rows)
    }
}

fn optional_cell(value: Option<f32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes `samples` as CSV with [`CSV_HEADER`], returning the row count.
pub fn write_csv<'a, W: Write>(
    writer: &mut W,
    samples: impl IntoIterator<Item = &'a Sample>,
) -> Result<usize> {
    writeln!(writer, "{}", CSV_HEADER)?;
    let mut rows = 0;
    for s in samples {
        writeln!(
            writer,
            "{:.3},{},{},{},{},{},{}",
            s.t_rel,
            s.voltage,
            s.ph_two_point,
            s.ph_nernst,
            optional_cell(s.temperature_c),
            optional_cell(s.device_ph),
            s.flags.names().join("|"),
        )?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::SampleFlags;

    fn sample(t_rel: f64, voltage: f32) -> Sample {
        Sample {
            t_rel,
            voltage,
            ph_two_point: 7.0,
            ph_nernst: 7.0,
            temperature_c: None,
            device_ph: None,
            flags: SampleFlags::empty(),
        }
    }

    #[test]
    fn drops_oldest_beyond_capacity() {
        let mut history = SampleHistory::with_capacity(3);
        for i in 0..5 {
            history.push(sample(i as f64, i as f32));
        }
        assert_eq!(history.len(), 3);
        let times: Vec<f64> = history.iter().map(|s| s.t_rel).collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest().unwrap().t_rel, 4.0);
    }

    #[test]
    fn capacity_is_bounded() {
        assert_eq!(SampleHistory::with_capacity(0).capacity(), 1);
        assert_eq!(SampleHistory::with_capacity(50_000).capacity(), MAX_HISTORY);
        assert_eq!(SampleHistory::default().capacity(), MAX_HISTORY);
    }

    #[test]
    fn window_returns_tail() {
        let mut history = SampleHistory::with_capacity(10);
        for i in 0..6 {
            history.push(sample(i as f64, 0.0));
        }
        let tail: Vec<f64> = history.window(2).map(|s| s.t_rel).collect();
        assert_eq!(tail, vec![4.0, 5.0]);
        assert_eq!(history.window(100).count(), 6);
        assert_eq!(history.window(0).count(), 0);
    }

    #[test]
    fn clear_empties() {
        let mut history = SampleHistory::with_capacity(4);
        history.push(sample(0.0, 1.0));
        history.clear();
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn csv_rows() {
        let mut s = sample(1.5, 2.5);
        s.ph_nernst = f32::NAN;
        s.temperature_c = Some(23.5);
        s.flags = SampleFlags::PH_UNDEFINED | SampleFlags::VOLTAGE_FROM_ADC;
        let mut out = Vec::new();
        let rows = write_csv(&mut out, [&sample(0.0, 2.0), &s]).unwrap();
        assert_eq!(rows, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "0.000,2,7,7,,,");
        assert_eq!(lines[2], "1.500,2.5,7,NaN,23.5,,ph_undefined|voltage_from_adc");
    }

    #[test]
    fn export_window_to_file() {
        let mut history = SampleHistory::with_capacity(10);
        for i in 0..4 {
            history.push(sample(i as f64, 1.0));
        }
        let path = std::env::temp_dir().join(format!("phmon-history-{}.csv", std::process::id()));
        assert_eq!(history.export_csv(&path, Some(2)).unwrap(), 2);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("2.000,"));
    }
}
