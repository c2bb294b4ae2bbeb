//! Hardware sensor readings from the `sensors` utility (lm-sensors).
//!
//! Two output shapes are understood, and may be mixed in one dump:
//!
//! ```text
//! coretemp-isa-0000
//! Adapter: ISA adapter
//! Core 0:       +42.0°C  (high = +105.0°C, crit = +105.0°C)
//!
//! acpitz-virtual-0
//! Adapter: Virtual device
//! temp1:
//!   temp1_input: 26.800
//!   temp1_crit: 105.000
//! ```
//!
//! Inline readings are keyed by their label (`Core 0`), indented raw
//! readings by `<chip>_<field>` (`acpitz-virtual-0_temp1_input`). An inline
//! label seen twice, for example `Core 0` under two chips, keeps the last
//! value and logs a warning.

use std::collections::BTreeMap;
use std::process::Command;

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use super::error::SensorError;
use super::types::RawMetricRecord;
use crate::config::SensorsConfig;

lazy_static! {
    static ref INLINE_READING: Regex =
        Regex::new(r"^([^:]+):\s+([+-]?\d+(?:\.\d+)?)\s*°C").expect("inline sensor pattern");
    static ref NESTED_READING: Regex =
        Regex::new(r"^\s+([^:\s][^:]*):\s*([+-]?\d+(?:\.\d+)?)\s*$").expect("nested sensor pattern");
}

pub type SensorReadings = BTreeMap<String, f64>;

/// Parses a sensor dump. Lines that match neither shape are skipped.
pub fn parse_sensors(text: &str) -> SensorReadings {
    let mut readings = SensorReadings::new();
    let mut chip: Option<&str> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            chip = None;
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            let Some(chip) = chip else { continue };
            if let Some(caps) = NESTED_READING.captures(line) {
                if let Ok(value) = caps[2].parse::<f64>() {
                    record(&mut readings, format!("{}_{}", chip, caps[1].trim()), value);
                }
            }
            continue;
        }

        if let Some(caps) = INLINE_READING.captures(line) {
            if let Ok(value) = caps[2].parse::<f64>() {
                record(&mut readings, caps[1].trim().to_string(), value);
            }
        } else if !line.contains(':') {
            chip = Some(line.trim());
        }
    }

    readings
}

fn record(readings: &mut SensorReadings, key: String, value: f64) {
    if let Some(previous) = readings.insert(key.clone(), value) {
        warn!(
            "Sensor reading '{}' seen twice ({} then {}); keeping the last",
            key, previous, value
        );
    }
}

impl From<SensorReadings> for RawMetricRecord {
    fn from(readings: SensorReadings) -> Self {
        RawMetricRecord::nested(readings)
    }
}

/// Produces raw sensor text. Failures are tolerated by the host engine.
pub trait SensorSource: Send {
    fn read(&mut self) -> Result<String, SensorError>;
}

/// Runs the sensor utility as a subprocess.
#[derive(Clone, Debug)]
pub struct SensorsCommand {
    program: String,
    args: Vec<String>,
}

impl SensorsCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        SensorsCommand {
            program: program.into(),
            args,
        }
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl Default for SensorsCommand {
    fn default() -> Self {
        SensorsCommand::from(&SensorsConfig::default())
    }
}

impl From<&SensorsConfig> for SensorsCommand {
    fn from(config: &SensorsConfig) -> Self {
        SensorsCommand::new(config.command.clone(), config.args.clone())
    }
}

impl SensorSource for SensorsCommand {
    fn read(&mut self) -> Result<String, SensorError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| SensorError::Spawn {
                command: self.display(),
                source,
            })?;

        if !output.status.success() {
            return Err(SensorError::Exit {
                command: self.display(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Command output: {}: {} bytes", self.display(), text.len());
        Ok(text)
    }
}
