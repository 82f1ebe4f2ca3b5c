//! Build script for homenode-firmware
//!
//! - Sets up linker search paths for memory.x
//! - Validates node.toml at compile time

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const PAIRING_MODES: [&str; 5] = [
    "display_only",
    "display_yes_no",
    "keyboard_only",
    "no_input_no_output",
    "just_work",
];

const TIMING_KEYS: [&str; 6] = [
    "tick_ms",
    "response_timeout_ticks",
    "reset_settle_ticks",
    "retry_timeout_ticks",
    "max_retries",
    "eval_interval_ticks",
];

fn main() {
    setup_linker();
    validate_config();
}

/// Set up linker search paths for memory.x
fn setup_linker() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let memory_x = include_bytes!("memory.x");
    let mut f = File::create(out_dir.join("memory.x")).unwrap();
    f.write_all(memory_x).unwrap();

    println!("cargo:rustc-link-search={}", out_dir.display());

    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}

/// Validate node.toml at compile time
fn validate_config() {
    println!("cargo:rerun-if-changed=node.toml");

    let config_path = Path::new("node.toml");

    if !config_path.exists() {
        panic!(
            "\n\
            ╔══════════════════════════════════════════════════════════════════╗\n\
            ║  ERROR: node.toml not found!                                     ║\n\
            ║                                                                  ║\n\
            ║  The firmware embeds node.toml as its default configuration.     ║\n\
            ║  Please create one in the homenode-firmware directory.           ║\n\
            ╚══════════════════════════════════════════════════════════════════╝\n"
        );
    }

    let config_content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            panic!(
                "\n\
                ╔══════════════════════════════════════════════════════════════════╗\n\
                ║  ERROR: Failed to read node.toml                                 ║\n\
                ║                                                                  ║\n\
                ║  Error: {:<56} ║\n\
                ╚══════════════════════════════════════════════════════════════════╝\n",
                e
            );
        }
    };

    let config: toml::Value = match toml::from_str(&config_content) {
        Ok(value) => value,
        Err(e) => {
            let error_msg = e.to_string();
            panic!(
                "\n\
                ╔══════════════════════════════════════════════════════════════════╗\n\
                ║  ERROR: Invalid TOML syntax in node.toml                         ║\n\
                ╠══════════════════════════════════════════════════════════════════╣\n\
                {}\n\
                ╚══════════════════════════════════════════════════════════════════╝\n",
                format_error_lines(&error_msg)
            );
        }
    };

    let mut errors = Vec::new();
    validate_sections(&config, &mut errors);
    validate_radio(&config, &mut errors);
    validate_timing(&config, &mut errors);

    if !errors.is_empty() {
        panic!(
            "\n\
            ╔══════════════════════════════════════════════════════════════════╗\n\
            ║  ERROR: Invalid configuration in node.toml                       ║\n\
            ╠══════════════════════════════════════════════════════════════════╣\n\
            {}\n\
            ╚══════════════════════════════════════════════════════════════════╝\n",
            errors
                .iter()
                .map(|e| format!("║  • {:<62} ║", e))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    println!("cargo:warning=node.toml validated successfully");
}

/// Format error message lines with box drawing
fn format_error_lines(msg: &str) -> String {
    msg.lines()
        .map(|line| {
            let truncated = if line.len() > 64 {
                format!("{}...", &line[..61])
            } else {
                line.to_string()
            };
            format!("║  {:<64} ║", truncated)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The firmware parser rejects unknown sections, so catch them here first
fn validate_sections(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(table) = config.as_table() else {
        return;
    };
    for (key, value) in table {
        match (key.as_str(), value) {
            ("radio" | "timing", toml::Value::Table(_)) => {}
            ("version", toml::Value::Integer(1)) => {}
            ("version", _) => errors.push("'version' must be 1".to_string()),
            (other, _) => errors.push(format!("unknown key or section '{}'", other)),
        }
    }
}

/// Validate the [radio] section
fn validate_radio(config: &toml::Value, errors: &mut Vec<String>) {
    let radio = match config.get("radio") {
        Some(toml::Value::Table(t)) => t,
        _ => return,
    };

    if let Some(name) = radio.get("name") {
        match name.as_str() {
            Some(n) if n.len() <= 16 => {}
            Some(_) => errors.push("[radio] name must be at most 16 bytes".to_string()),
            None => errors.push("[radio] name must be a string".to_string()),
        }
    }

    if let Some(pin) = radio.get("pin") {
        let valid = pin
            .as_str()
            .map(|p| (4..=6).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if !valid {
            errors.push("[radio] pin must be 4 to 6 digits".to_string());
        }
    }

    if let Some(mode) = radio.get("pairing_mode") {
        if !mode.as_str().map(|m| PAIRING_MODES.contains(&m)).unwrap_or(false) {
            errors.push(format!(
                "[radio] pairing_mode must be one of {}",
                PAIRING_MODES.join(", ")
            ));
        }
    }

    for key in ["adv_data", "scan_response"] {
        let Some(value) = radio.get(key) else {
            continue;
        };
        match value.as_array() {
            Some(bytes) if bytes.len() > 31 => {
                errors.push(format!("[radio] {} must be at most 31 bytes", key))
            }
            Some(bytes) => {
                let all_bytes = bytes
                    .iter()
                    .all(|b| matches!(b.as_integer(), Some(0..=255)));
                if !all_bytes {
                    errors.push(format!("[radio] {} entries must be 0-255", key));
                }
            }
            None => errors.push(format!("[radio] {} must be an array", key)),
        }
    }

    if let Some(interval) = radio.get("adv_interval") {
        if !matches!(interval.as_integer(), Some(32..=16384)) {
            errors.push("[radio] adv_interval must be 32-16384".to_string());
        }
    }
}

/// Validate the [timing] section
fn validate_timing(config: &toml::Value, errors: &mut Vec<String>) {
    let timing = match config.get("timing") {
        Some(toml::Value::Table(t)) => t,
        _ => return,
    };

    for (key, value) in timing {
        if !TIMING_KEYS.contains(&key.as_str()) {
            errors.push(format!("[timing] unknown key '{}'", key));
            continue;
        }
        let max = if key == "max_retries" { 255 } else { 65535 };
        let min = if key == "max_retries" || key == "reset_settle_ticks" {
            0
        } else {
            1
        };
        match value.as_integer() {
            Some(n) if (min..=max).contains(&n) => {}
            _ => errors.push(format!("[timing] {} must be {}-{}", key, min, max)),
        }
    }
}
