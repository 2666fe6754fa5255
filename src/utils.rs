// ADC原始值转物理值

/// Full-scale code of the board's 12-bit ADC.
pub const ADC_FULL_SCALE: f64 = 4095.0;
/// ADC reference voltage in volts.
pub const ADC_REFERENCE_VOLTAGE: f64 = 3.3;

/// Scale of the internal temperature correction (≈1 when only the offset is corrected).
pub const ITEMP_SCALE: f32 = 1.000;
/// Offset of the internal temperature correction, the sensor reads 1.5 °C high.
pub const ITEMP_OFFSET: f32 = -1.50;

/// Converts a raw 12-bit ADC code to volts: `(dat / 4095) * 3.3`.
///
/// Codes outside `0..=4095` are not rejected, the result extrapolates linearly.
/// Non-finite input propagates (NaN in, NaN out).
pub const fn raw2volt(dat: f32) -> f32 {
    // 中间计算使用双精度，最后一次舍入到 f32
    ((dat as f64 / ADC_FULL_SCALE) * ADC_REFERENCE_VOLTAGE) as f32
}

/// Applies the fixed offset/scale correction to an internal temperature reading.
pub const fn itemp2cal(dat: f32) -> f32 {
    let a = ITEMP_SCALE;
    let b = ITEMP_OFFSET;
    a * dat + b
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn raw2volt_endpoints() {
        assert_eq!(raw2volt(0.0), 0.0);
        assert_abs_diff_eq!(raw2volt(4095.0), 3.3, epsilon = 1e-6);
        assert_abs_diff_eq!(raw2volt(2047.5), 1.65, epsilon = 1e-6);
    }

    #[test]
    fn raw2volt_extrapolates_outside_range() {
        assert_abs_diff_eq!(raw2volt(8190.0), 6.6, epsilon = 1e-5);
        assert_abs_diff_eq!(raw2volt(-4095.0), -3.3, epsilon = 1e-6);
    }

    #[test]
    fn raw2volt_is_linear_and_monotonic() {
        let mut last = raw2volt(0.0);
        for code in (1..=4095).step_by(7) {
            let code = code as f32;
            let v = raw2volt(code);
            assert!(v >= last);
            assert!((0.0..=3.3).contains(&v));
            assert_abs_diff_eq!(v, (code / 4095.0) * 3.3, epsilon = 2e-6);
            last = v;
        }
    }

    #[test]
    fn raw2volt_is_const_evaluable() {
        const HALF: f32 = raw2volt(4095.0 / 2.0);
        assert_abs_diff_eq!(HALF, 1.65, epsilon = 1e-6);
        assert_eq!(HALF.to_bits(), raw2volt(4095.0 / 2.0).to_bits());
    }

    #[test]
    fn itemp2cal_removes_offset() {
        assert_eq!(itemp2cal(25.0), 23.5);
        assert_eq!(itemp2cal(0.0), -1.5);
        assert_eq!(itemp2cal(-40.0), -41.5);
        for t in [-12.25_f32, 3.0, 36.6, 101.0] {
            assert_abs_diff_eq!(itemp2cal(t), t - 1.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        for x in [0.0_f32, 1.0, 1234.5, 4095.0, -7.0] {
            assert_eq!(raw2volt(x).to_bits(), raw2volt(x).to_bits());
            assert_eq!(itemp2cal(x).to_bits(), itemp2cal(x).to_bits());
        }
    }

    #[test]
    fn non_finite_values_propagate() {
        assert!(raw2volt(f32::NAN).is_nan());
        assert!(itemp2cal(f32::NAN).is_nan());
        assert_eq!(raw2volt(f32::INFINITY), f32::INFINITY);
        assert_eq!(raw2volt(f32::NEG_INFINITY), f32::NEG_INFINITY);
        assert_eq!(itemp2cal(f32::INFINITY), f32::INFINITY);
        assert_eq!(itemp2cal(f32::NEG_INFINITY), f32::NEG_INFINITY);
    }
}
