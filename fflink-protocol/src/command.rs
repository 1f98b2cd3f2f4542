//! Typed command set for the Finder control protocol.
//!
//! The firmware understands a small, closed set of G/M-codes. Rather than
//! dispatching on raw strings, each supported command is a variant here and
//! carries exactly the parameters the firmware accepts for it.

use crate::error::ProtocolError;
use crate::MAX_FILENAME_LEN;
use std::fmt;

/// A printable axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// One command the firmware accepts.
///
/// Construction is infallible for everything except [`Command::FileOpen`],
/// whose filename is validated at encode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `M601 S1` - request control mode. Must be the first frame on any
    /// connection; the firmware ignores everything until it is acknowledged.
    Handshake,
    /// `M115` - firmware/model information.
    Info,
    /// `M105` - extruder and bed temperatures.
    Temperature,
    /// `M114` - current head position.
    Position,
    /// `M119` - endstop switch states.
    Endstops,
    /// `M27` - print progress in bytes.
    Progress,
    /// `G28` - home all axes, or one axis if given.
    Home { axis: Option<Axis> },
    /// `G1` - linear move. Omitted coordinates keep their current value.
    /// Feedrate is mm/min.
    Move {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feedrate: u32,
    },
    /// `M146` - set the chamber LED color. Always solid (`f0`), not blinking.
    Led { r: u8, g: u8, b: u8 },
    /// `M25` - pause the running print.
    Pause,
    /// `M24` - resume a paused print.
    Resume,
    /// `M26` - cancel the running print.
    Stop,
    /// `M650` - announce an incoming file transfer.
    PrepareUpload,
    /// `M28 <size> 0:/user/<name>` - open a file for write.
    FileOpen { size: u64, name: String },
    /// `M29` - close the file opened by `FileOpen`.
    FileClose,
}

impl Command {
    /// The command keyword as it appears on the wire.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Handshake => "M601",
            Command::Info => "M115",
            Command::Temperature => "M105",
            Command::Position => "M114",
            Command::Endstops => "M119",
            Command::Progress => "M27",
            Command::Home { .. } => "G28",
            Command::Move { .. } => "G1",
            Command::Led { .. } => "M146",
            Command::Pause => "M25",
            Command::Resume => "M24",
            Command::Stop => "M26",
            Command::PrepareUpload => "M650",
            Command::FileOpen { .. } => "M28",
            Command::FileClose => "M29",
        }
    }

    /// Parameter tokens in wire order. Empty for bare commands.
    pub fn params(&self) -> Result<Vec<String>, ProtocolError> {
        let params = match self {
            Command::Handshake => vec!["S1".to_string()],
            Command::Home { axis: Some(axis) } => vec![axis.to_string()],
            Command::Move { x, y, z, feedrate } => {
                let mut p = Vec::new();
                if let Some(x) = x {
                    p.push(format!("X{}", x));
                }
                if let Some(y) = y {
                    p.push(format!("Y{}", y));
                }
                if let Some(z) = z {
                    p.push(format!("Z{}", z));
                }
                p.push(format!("F{}", feedrate));
                p
            }
            Command::Led { r, g, b } => {
                vec![
                    format!("r{}", r),
                    format!("g{}", g),
                    format!("b{}", b),
                    "f0".to_string(),
                ]
            }
            Command::FileOpen { size, name } => {
                validate_filename(name)?;
                vec![size.to_string(), format!("0:/user/{}", name)]
            }
            _ => Vec::new(),
        };

        for token in &params {
            if token
                .bytes()
                .any(|b| b == b'\r' || b == b'\n' || b == b'~')
            {
                return Err(ProtocolError::ReservedCharacter(token.clone()));
            }
        }
        Ok(params)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Checks the firmware's filename constraints: at most 36 bytes, no frame
/// prefix or line breaks.
pub fn validate_filename(name: &str) -> Result<(), ProtocolError> {
    if name.len() > MAX_FILENAME_LEN {
        return Err(ProtocolError::FilenameTooLong {
            len: name.len(),
            max: MAX_FILENAME_LEN,
        });
    }
    if name.is_empty()
        || name
            .bytes()
            .any(|b| b == b'\r' || b == b'\n' || b == b'~')
    {
        return Err(ProtocolError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(Command::Temperature.keyword(), "M105");
        assert_eq!(Command::Home { axis: None }.keyword(), "G28");
        assert_eq!(Command::FileClose.keyword(), "M29");
    }

    #[test]
    fn test_move_skips_omitted_axes() {
        let cmd = Command::Move {
            x: Some(50.0),
            y: None,
            z: Some(10.5),
            feedrate: 3000,
        };
        assert_eq!(cmd.params().unwrap(), vec!["X50", "Z10.5", "F3000"]);
    }

    #[test]
    fn test_led_params() {
        let cmd = Command::Led { r: 255, g: 0, b: 64 };
        assert_eq!(cmd.params().unwrap(), vec!["r255", "g0", "b64", "f0"]);
    }

    #[test]
    fn test_file_open_path() {
        let cmd = Command::FileOpen {
            size: 12345,
            name: "part.gcode".to_string(),
        };
        assert_eq!(cmd.params().unwrap(), vec!["12345", "0:/user/part.gcode"]);
    }

    #[test]
    fn test_filename_too_long() {
        let name = "x".repeat(37);
        assert!(matches!(
            validate_filename(&name),
            Err(ProtocolError::FilenameTooLong { len: 37, max: 36 })
        ));
    }

    #[test]
    fn test_filename_reserved_chars() {
        assert!(validate_filename("bad~name").is_err());
        assert!(validate_filename("bad\r\nname").is_err());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("fine.gcode").is_ok());
    }

    #[test]
    fn test_home_axis_param() {
        let cmd = Command::Home { axis: Some(Axis::Z) };
        assert_eq!(cmd.params().unwrap(), vec!["Z"]);
        let cmd = Command::Home { axis: None };
        assert!(cmd.params().unwrap().is_empty());
    }
}
