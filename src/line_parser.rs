//! Parser for the text lines the board prints on its serial port.
//!
//! Firmware revisions disagree on the format, so the parser accepts keyed
//! values (`V=2.97`, `Voltaje: 2.97 V | pH: 7.01`), comma separated pairs
//! (`V,2.97,pH,7.01`), JSON objects and bare numbers.

use serde_json::{Map, Value};

use crate::data_models::LineReading;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Field {
    Voltage,
    RawAdc,
    RawTemperature,
    Ph,
}

fn field_for_key(key: &str) -> Option<Field> {
    match key.to_ascii_lowercase().as_str() {
        "v" | "volt" | "volts" | "voltage" | "voltaje" | "real voltage" | "vin" => {
            Some(Field::Voltage)
        }
        "adc" | "raw" | "dat" | "code" => Some(Field::RawAdc),
        "t" | "temp" | "itemp" | "temperature" | "temperatura" => Some(Field::RawTemperature),
        "ph" => Some(Field::Ph),
        _ => None,
    }
}

fn trim_key(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '=' | '"' | '\'' | '{' | '}'))
}

/// Resolves the key for a number from the text between it and the previous number.
fn key_field(prefix: &str) -> Option<Field> {
    let segment = prefix
        .rsplit(|c: char| matches!(c, ',' | ';' | '|' | '\t'))
        .map(trim_key)
        .find(|s| !s.is_empty())?;
    field_for_key(segment).or_else(|| {
        segment
            .split_whitespace()
            .last()
            .map(trim_key)
            .and_then(field_for_key)
    })
}

/// Finds every number in `line` as `(start, end, value)` byte ranges.
fn scan_numbers(line: &str) -> Vec<(usize, usize, f32)> {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let digit_at = |k: usize| k < len && bytes[k].is_ascii_digit();
    let mut numbers = Vec::new();
    let mut i = 0;
    while i < len {
        let start = i;
        // 紧跟字母的数字属于单词（如 ch1、pH2）
        let glued = line[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let mut j = i;
        if matches!(bytes[j], b'+' | b'-') {
            j += 1;
        }
        if glued || !digit_at(j) {
            i += line[i..].chars().next().map_or(1, char::len_utf8);
            continue;
        }
        while digit_at(j) {
            j += 1;
        }
        if j < len && bytes[j] == b'.' && digit_at(j + 1) {
            j += 1;
            while digit_at(j) {
                j += 1;
            }
        }
        if j < len && matches!(bytes[j], b'e' | b'E') {
            let mut k = j + 1;
            if k < len && matches!(bytes[k], b'+' | b'-') {
                k += 1;
            }
            if digit_at(k) {
                while digit_at(k) {
                    k += 1;
                }
                j = k;
            }
        }
        if let Ok(value) = line[start..j].parse::<f32>() {
            numbers.push((start, j, value));
        }
        i = j;
    }
    numbers
}

fn assign(reading: &mut LineReading, field: Field, value: f32) {
    let slot = match field {
        Field::Voltage => &mut reading.voltage,
        Field::RawAdc => &mut reading.raw_adc,
        Field::RawTemperature => &mut reading.raw_temperature,
        Field::Ph => &mut reading.device_ph,
    };
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn parse_json(line: &str) -> Option<LineReading> {
    let object: Map<String, Value> = serde_json::from_str(line).ok()?;
    let mut reading = LineReading::default();
    for (key, value) in &object {
        if let (Some(field), Some(x)) = (field_for_key(key.trim()), value.as_f64()) {
            assign(&mut reading, field, x as f32);
        }
    }
    (!reading.is_empty()).then_some(reading)
}

/// Parses one firmware line. Returns `None` when it carries no number.
///
/// Without any recognised key the first number is taken as the voltage.
pub fn parse_line(line: &str) -> Option<LineReading> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        if let Some(reading) = parse_json(line) {
            return Some(reading);
        }
    }

    let numbers = scan_numbers(line);
    let mut reading = LineReading::default();
    let mut prev_end = 0;
    for &(start, end, value) in &numbers {
        if let Some(field) = key_field(&line[prev_end..start]) {
            assign(&mut reading, field, value);
        }
        prev_end = end;
    }
    if reading.is_empty() {
        reading.voltage = Some(numbers.first()?.2);
    }
    Some(reading)
}
