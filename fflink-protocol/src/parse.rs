//! Typed parsers for device responses.
//!
//! One parser per command family, each a pure function from the response
//! payload text to a typed report. A token that should be numeric but is not
//! produces a [`ProtocolError::Malformed`] carrying the raw payload; parsers
//! never substitute defaults for values the device failed to report.

use crate::codec::ResponseUnit;
use crate::command::Command;
use crate::error::ProtocolError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Current and target temperature of one heater, in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeaterReading {
    pub current: f64,
    pub target: f64,
}

/// Parsed `M105` reply.
///
/// The Finder always reports the extruder (`T0`); the heated-bed channel
/// (`B`) is absent on unheated models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureReport {
    pub extruder: HeaterReading,
    pub bed: Option<HeaterReading>,
}

/// Parsed `M114` reply: head position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Extruder position, when the firmware reports it.
    pub e: Option<f64>,
}

/// Parsed `M119` reply: which endstop switches are currently triggered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndstopReport {
    /// Endstop name (as reported, e.g. `X-max` or `x_min`) to triggered flag.
    pub endstops: BTreeMap<String, bool>,
}

/// Parsed `M27` reply: print progress in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressReport {
    pub printed_bytes: u64,
    pub total_bytes: u64,
}

impl ProgressReport {
    /// Completion percentage rounded to two decimals, or `None` when the
    /// firmware reports a zero-length file (idle printer).
    pub fn percentage(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some((self.printed_bytes as f64 / self.total_bytes as f64 * 10_000.0).round() / 100.0)
    }
}

/// Parsed `M115` reply: firmware-reported key/value fields
/// (machine type, firmware version, build volume, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterInfo {
    pub fields: BTreeMap<String, String>,
}

/// A typed result for one executed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Reply {
    /// Bare acknowledgement; the completion marker arrived.
    Ok,
    Temperature(TemperatureReport),
    Position(HeadPosition),
    Endstops(EndstopReport),
    Progress(ProgressReport),
    Info(PrinterInfo),
}

/// Parses a response unit with the parser registered for the command.
///
/// The keyword-to-parser mapping is closed and resolved here at compile
/// time; commands without a structured payload yield [`Reply::Ok`].
pub fn parse_reply(command: &Command, unit: &ResponseUnit) -> Result<Reply, ProtocolError> {
    match command {
        Command::Temperature => Ok(Reply::Temperature(parse_temperature(unit)?)),
        Command::Position => Ok(Reply::Position(parse_position(unit)?)),
        Command::Endstops => Ok(Reply::Endstops(parse_endstops(unit)?)),
        Command::Progress => Ok(Reply::Progress(parse_progress(unit)?)),
        Command::Info => Ok(Reply::Info(parse_info(unit)?)),
        _ => Ok(Reply::Ok),
    }
}

/// Parses `T0:<cur> /<tgt> B:<cur> /<tgt>` (the firmware is inconsistent
/// about the space before the slash; both forms appear in the wild).
pub fn parse_temperature(unit: &ResponseUnit) -> Result<TemperatureReport, ProtocolError> {
    for line in unit.data_lines() {
        if let Some(extruder) = heater_channel(&line, "T0")? {
            let bed = heater_channel(&line, "B")?;
            return Ok(TemperatureReport { extruder, bed });
        }
    }
    Err(ProtocolError::malformed("temperature", unit.payload()))
}

/// Extracts one `<label>:<cur>[ ]/<tgt>` channel from a temperature line.
/// Returns `Ok(None)` when the label is absent.
fn heater_channel(line: &str, label: &str) -> Result<Option<HeaterReading>, ProtocolError> {
    let marker = format!("{}:", label);
    let Some(idx) = line.find(&marker) else {
        return Ok(None);
    };
    let rest = &line[idx + marker.len()..];
    let (current, rest) = take_number(rest)
        .ok_or_else(|| ProtocolError::malformed("temperature", line.to_string()))?;
    let rest = rest.trim_start();
    let target = match rest.strip_prefix('/') {
        Some(after) => {
            take_number(after.trim_start())
                .ok_or_else(|| ProtocolError::malformed("temperature", line.to_string()))?
                .0
        }
        None => return Err(ProtocolError::malformed("temperature", line.to_string())),
    };
    Ok(Some(HeaterReading { current, target }))
}

/// Parses `X:<x> Y:<y> Z:<z>` with an optional `E` coordinate.
pub fn parse_position(unit: &ResponseUnit) -> Result<HeadPosition, ProtocolError> {
    for line in unit.data_lines() {
        let x = coordinate(&line, 'X')?;
        let y = coordinate(&line, 'Y')?;
        let z = coordinate(&line, 'Z')?;
        if let (Some(x), Some(y), Some(z)) = (x, y, z) {
            let e = coordinate(&line, 'E')?;
            return Ok(HeadPosition { x, y, z, e });
        }
    }
    Err(ProtocolError::malformed("position", unit.payload()))
}

fn coordinate(line: &str, axis: char) -> Result<Option<f64>, ProtocolError> {
    let marker = format!("{}:", axis);
    let Some(idx) = line.find(&marker) else {
        return Ok(None);
    };
    match take_number(&line[idx + marker.len()..]) {
        Some((value, _)) => Ok(Some(value)),
        None => Err(ProtocolError::malformed("position", line.to_string())),
    }
}

/// Parses endstop pairs out of an `M119` reply.
///
/// The firmware formats these either as `X-max:0` tokens on one line or as
/// `x_min: TRIGGERED` lines. Pairs whose name does not mention min/max are
/// status fields (`MachineStatus: READY`), not endstops, and are skipped.
pub fn parse_endstops(unit: &ResponseUnit) -> Result<EndstopReport, ProtocolError> {
    let mut endstops = BTreeMap::new();
    for line in unit.data_lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let (name, value) = if let Some(name) = token.strip_suffix(':') {
                // `name:` followed by its value as the next token, unless
                // that token is itself a pair (then this was a line label)
                match tokens.get(i + 1) {
                    Some(next) if !next.contains(':') => {
                        i += 2;
                        (name, *next)
                    }
                    _ => {
                        i += 1;
                        continue;
                    }
                }
            } else if let Some((name, value)) = token.rsplit_once(':') {
                i += 1;
                (name, value)
            } else {
                i += 1;
                continue;
            };

            let lowered = name.to_ascii_lowercase();
            if !lowered.contains("min") && !lowered.contains("max") {
                continue;
            }
            let triggered = match value.to_ascii_lowercase().as_str() {
                "triggered" | "1" => true,
                "open" | "0" => false,
                _ => return Err(ProtocolError::malformed("endstop", line.to_string())),
            };
            endstops.insert(name.to_string(), triggered);
        }
    }
    if endstops.is_empty() {
        return Err(ProtocolError::malformed("endstop", unit.payload()));
    }
    Ok(EndstopReport { endstops })
}

/// Parses `<printed>/<total>` byte counts out of an `M27` reply
/// (`SD printing byte 1234/5678`).
pub fn parse_progress(unit: &ResponseUnit) -> Result<ProgressReport, ProtocolError> {
    for line in unit.data_lines() {
        for token in line.split_whitespace() {
            if let Some((printed, total)) = token.split_once('/') {
                if let (Ok(printed), Ok(total)) = (printed.parse(), total.parse()) {
                    return Ok(ProgressReport {
                        printed_bytes: printed,
                        total_bytes: total,
                    });
                }
            }
        }
    }
    Err(ProtocolError::malformed("progress", unit.payload()))
}

/// Parses the `key: value` lines of an `M115` reply.
pub fn parse_info(unit: &ResponseUnit) -> Result<PrinterInfo, ProtocolError> {
    let mut fields = BTreeMap::new();
    for line in unit.data_lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                fields.insert(key.to_string(), value.to_string());
            }
        }
    }
    if fields.is_empty() {
        return Err(ProtocolError::malformed("info", unit.payload()));
    }
    Ok(PrinterInfo { fields })
}

/// Takes a leading signed decimal number off `input`, returning it and the
/// remainder. `None` when no digits lead the input.
fn take_number(input: &str) -> Option<(f64, &str)> {
    let mut end = 0;
    for (i, c) in input.char_indices() {
        if c == '-' && i == 0 {
            end = i + 1;
        } else if c.is_ascii_digit() || c == '.' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    if end == 0 {
        return None;
    }
    input[..end].parse().ok().map(|n| (n, &input[end..]))
}
