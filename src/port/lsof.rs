use super::{parse_local_address, Listener, ListenerSource};

/// `lsof -nP -iTCP -sTCP:LISTEN`
///
/// ```text
/// COMMAND   PID  USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
/// node    12345 alice   23u  IPv4 0x1234      0t0  TCP *:3000 (LISTEN)
/// ```
pub struct LsofSource;

const ARGS: &[&str] = &["-nP", "-iTCP", "-sTCP:LISTEN"];

impl ListenerSource for LsofSource {
    fn name(&self) -> &'static str {
        "lsof"
    }

    fn args(&self) -> &'static [&'static str] {
        ARGS
    }

    fn parse_line(&self, line: &str) -> Option<Listener> {
        if line.starts_with("COMMAND ") {
            return None;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return None;
        }

        // NAME is the last column but lsof may append `(LISTEN)` or split it,
        // so scan right-to-left for the first token carrying a numeric port.
        let (address, port) = fields[3..]
            .iter()
            .rev()
            .filter(|token| **token != "(LISTEN)")
            .find_map(|token| parse_local_address(token).map(|(_, port)| (*token, port)))?;

        let address = address.split("->").next().unwrap_or(address);
        let pid = fields[1].parse().unwrap_or(0);

        Some(Listener::tcp(
            port,
            pid,
            fields[2],
            unescape_command(fields[0]),
            address,
        ))
    }
}

/// lsof prints non-printable bytes in COMMAND as `\xNN`.
fn unescape_command(raw: &str) -> String {
    if !raw.contains("\\x") {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find("\\x") {
        out.push_str(&rest[..idx]);
        let hex = rest.get(idx + 2..idx + 4);
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(byte) if byte.is_ascii() => {
                out.push(byte as char);
                rest = &rest[idx + 4..];
            }
            _ => {
                out.push_str("\\x");
                rest = &rest[idx + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}
