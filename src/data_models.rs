use bitflags::bitflags;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize};

/// 固件一行文本中携带的原始数值
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineReading {
    /// Voltage already converted on the board, volts.
    pub voltage: Option<f32>,
    /// Raw ADC code.
    pub raw_adc: Option<f32>,
    /// Raw internal temperature reading.
    pub raw_temperature: Option<f32>,
    /// pH computed by the firmware itself.
    pub device_ph: Option<f32>,
}

impl LineReading {
    pub fn is_empty(&self) -> bool {
        self.voltage.is_none()
            && self.raw_adc.is_none()
            && self.raw_temperature.is_none()
            && self.device_ph.is_none()
    }
}

bitflags! {
    /// 样本质量标志
    #[derive(Default, Serialize, Deserialize)]
    pub struct SampleFlags: u8 {
        const ADC_OUT_OF_RANGE = 0b0000_0001; // ADC 码超出满量程
        const NON_FINITE = 0b0000_0010;       // 电压为 NaN/Inf
        const PH_UNDEFINED = 0b0000_0100;     // 任一 pH 模型无定义
        const VOLTAGE_FROM_ADC = 0b0000_1000; // 电压由 ADC 码换算
    }
}

impl SampleFlags {
    pub fn names(&self) -> Vec<&'static str> {
        let all = [
            (Self::ADC_OUT_OF_RANGE, "adc_out_of_range"),
            (Self::NON_FINITE, "non_finite"),
            (Self::PH_UNDEFINED, "ph_undefined"),
            (Self::VOLTAGE_FROM_ADC, "voltage_from_adc"),
        ];
        all.iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// 一次完整的测量结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds since the monitor clock started, millisecond resolution.
    pub t_rel: f64,
    pub voltage: f32,
    pub ph_two_point: f32,
    pub ph_nernst: f32,
    pub temperature_c: Option<f32>,
    pub device_ph: Option<f32>,
    #[serde(serialize_with = "serialize_flags")]
    pub flags: SampleFlags,
}

// 标志序列化为名称列表
fn serialize_flags<S>(flags: &SampleFlags, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let names = flags.names();
    let mut seq = serializer.serialize_seq(Some(names.len()))?;
    for name in names {
        seq.serialize_element(name)?;
    }
    seq.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_names_in_bit_order() {
        let flags = SampleFlags::PH_UNDEFINED | SampleFlags::ADC_OUT_OF_RANGE;
        assert_eq!(flags.names(), vec!["adc_out_of_range", "ph_undefined"]);
        assert!(SampleFlags::empty().names().is_empty());
    }

    #[test]
    fn sample_json_shape() {
        let sample = Sample {
            t_rel: 1.25,
            voltage: 2.5,
            ph_two_point: 7.0,
            ph_nernst: f32::NAN,
            temperature_c: None,
            device_ph: Some(6.5),
            flags: SampleFlags::PH_UNDEFINED,
        };
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["t_rel"], 1.25);
        assert_eq!(value["voltage"], 2.5);
        assert!(value["ph_nernst"].is_null());
        assert!(value["temperature_c"].is_null());
        assert_eq!(value["device_ph"], 6.5);
        assert_eq!(value["flags"], serde_json::json!(["ph_undefined"]));
    }

    #[test]
    fn empty_reading() {
        assert!(LineReading::default().is_empty());
        let reading = LineReading {
            raw_adc: Some(12.0),
            ..Default::default()
        };
        assert!(!reading.is_empty());
    }
}
