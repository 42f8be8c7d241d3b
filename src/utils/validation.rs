use std::time::Duration;

use crate::port::PortRange;
use crate::process::KillSignal;
use crate::{Error, Result};

pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(Error::InvalidInput(
            "invalid port: 0 (must be 1-65535)".to_string(),
        ));
    }
    Ok(())
}

/// Parse a single port argument. Used as a clap value parser.
pub fn parse_port(s: &str) -> Result<u16> {
    let port = s
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::InvalidInput(format!("invalid port: {s:?}")))?;
    validate_port(port).map_err(|_| Error::InvalidInput(format!("invalid port: {s:?}")))?;
    Ok(port)
}

/// Parse `START-END` into an inclusive range.
pub fn parse_range(s: &str) -> Result<PortRange> {
    s.parse()
}

/// Parse a duration such as `500ms`, `2s`, `1.5s`, `1m` or `1h`.
///
/// A bare number is read as seconds, so `0` disables whatever it configures.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let invalid = || Error::InvalidInput(format!("invalid duration: {s:?}"));
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let seconds = match unit {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(invalid()),
    };

    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

/// Parse a signal name. Accepts `TERM`, `INT`, `KILL` with or without the
/// `SIG` prefix, in any case.
pub fn parse_signal(s: &str) -> Result<KillSignal> {
    s.parse()
}

/// Validate the environment variable name used by `run --env`.
pub fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid environment variable name: {name:?}"
        )))
    }
}
