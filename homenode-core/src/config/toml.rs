//! Simple TOML parser for node configuration
//!
//! A minimal parser for the subset of TOML the node configuration uses.
//! It does NOT support the full TOML spec.
//!
//! Supported features:
//! - Key = value pairs (string, integer, boolean)
//! - Integers in decimal or `0x` hexadecimal
//! - Single-line integer arrays: `adv_data = [0x02, 0x01, 0x06]`
//! - `[section]` headers
//! - Comments (# ...)

use heapless::{String, Vec};
use homenode_protocol::PairingMode;

use super::types::{is_valid_pin, NodeConfig};

/// Configuration parse error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Unknown section header
    InvalidSection,
    /// Unknown key in a known section
    UnknownKey,
    /// Value has the wrong type or is out of range
    InvalidValue,
    /// String or array exceeds its capacity
    TooLong,
    /// PIN is not 4 to 6 digits
    InvalidPin,
    /// Line is neither a header, a comment nor `key = value`
    Syntax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Root,
    Radio,
    Timing,
}

/// Parse TOML text into a [`NodeConfig`]
///
/// Keys that are absent keep their default values.
pub fn parse_config(input: &str) -> Result<NodeConfig, ConfigError> {
    let mut config = NodeConfig::new();
    let mut section = Section::Root;

    for line in input.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = match line[1..line.len() - 1].trim() {
                "radio" => Section::Radio,
                "timing" => Section::Timing,
                _ => return Err(ConfigError::InvalidSection),
            };
            continue;
        }

        let (key, value) = parse_key_value(line).ok_or(ConfigError::Syntax)?;
        apply_value(section, key, value, &mut config)?;
    }

    if !is_valid_pin(&config.radio.pin) {
        return Err(ConfigError::InvalidPin);
    }

    Ok(config)
}

fn apply_value(
    section: Section,
    key: &str,
    value: &str,
    config: &mut NodeConfig,
) -> Result<(), ConfigError> {
    match section {
        Section::Root => match key {
            "version" => config.version = parse_int(value)?,
            _ => return Err(ConfigError::UnknownKey),
        },
        Section::Radio => {
            let radio = &mut config.radio;
            match key {
                "name" => radio.name = parse_heapless_string(value)?,
                "keep_name" => radio.keep_name = parse_bool(value)?,
                "pin" => radio.pin = parse_heapless_string(value)?,
                "pairing_mode" => radio.pairing_mode = parse_pairing_mode(value)?,
                "adv_data" => radio.adv_data = parse_bytes(value)?,
                "scan_response" => radio.scan_response = parse_bytes(value)?,
                "adv_interval" => radio.adv_interval = parse_int(value)?,
                "visible" => radio.visible = parse_bool(value)?,
                _ => return Err(ConfigError::UnknownKey),
            }
        }
        Section::Timing => {
            let timing = &mut config.timing;
            match key {
                "tick_ms" => timing.tick_ms = parse_nonzero(value)?,
                "response_timeout_ticks" => timing.response_timeout_ticks = parse_nonzero(value)?,
                "reset_settle_ticks" => timing.reset_settle_ticks = parse_int(value)?,
                "retry_timeout_ticks" => timing.retry_timeout_ticks = parse_nonzero(value)?,
                "max_retries" => timing.max_retries = parse_int(value)?,
                "eval_interval_ticks" => timing.eval_interval_ticks = parse_nonzero(value)?,
                _ => return Err(ConfigError::UnknownKey),
            }
        }
    }
    Ok(())
}

/// Split `key = value`, dropping a trailing comment outside quotes
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let eq_pos = line.find('=')?;
    let key = line[..eq_pos].trim();
    let value = line[eq_pos + 1..].trim();

    let value = match value.find('#') {
        Some(hash_pos) if value[..hash_pos].matches('"').count() % 2 == 0 => {
            value[..hash_pos].trim()
        }
        _ => value,
    };

    if key.is_empty() || value.is_empty() {
        return None;
    }

    Some((key, value))
}

/// Parse a quoted string value
fn parse_string(value: &str) -> Result<&str, ConfigError> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        Ok(&value[1..value.len() - 1])
    } else {
        Err(ConfigError::InvalidValue)
    }
}

fn parse_heapless_string<const N: usize>(value: &str) -> Result<String<N>, ConfigError> {
    let mut out = String::new();
    out.push_str(parse_string(value)?)
        .map_err(|_| ConfigError::TooLong)?;
    Ok(out)
}

/// Parse a decimal or `0x` hexadecimal integer
fn parse_int<T: TryFrom<u32>>(value: &str) -> Result<T, ConfigError> {
    let raw = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    }
    .map_err(|_| ConfigError::InvalidValue)?;
    T::try_from(raw).map_err(|_| ConfigError::InvalidValue)
}

fn parse_nonzero<T: TryFrom<u32> + PartialEq + Default>(value: &str) -> Result<T, ConfigError> {
    let parsed: T = parse_int(value)?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue);
    }
    Ok(parsed)
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue),
    }
}

/// Parse a single-line integer array into bytes
fn parse_bytes<const N: usize>(value: &str) -> Result<Vec<u8, N>, ConfigError> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or(ConfigError::InvalidValue)?;

    let mut out = Vec::new();
    for item in inner.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        out.push(parse_int(item)?).map_err(|_| ConfigError::TooLong)?;
    }
    Ok(out)
}

fn parse_pairing_mode(value: &str) -> Result<PairingMode, ConfigError> {
    match parse_string(value)? {
        "display_only" => Ok(PairingMode::DisplayOnly),
        "display_yes_no" => Ok(PairingMode::DisplayYesNo),
        "keyboard_only" => Ok(PairingMode::KeyboardOnly),
        "no_input_no_output" => Ok(PairingMode::NoInputNoOutput),
        "just_work" => Ok(PairingMode::JustWork),
        _ => Err(ConfigError::InvalidValue),
    }
}
