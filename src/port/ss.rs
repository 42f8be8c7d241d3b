use std::sync::OnceLock;

use regex::Regex;

use super::{parse_local_address, Listener, ListenerSource};

/// `ss -ltnpH`
///
/// ```text
/// LISTEN 0 4096 127.0.0.1:3000 0.0.0.0:* users:(("node",pid=12345,fd=22))
/// ```
///
/// `ss` does not report the owning user; enrichment fills it in later.
pub struct SsSource;

const ARGS: &[&str] = &["-ltnpH"];

fn pid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"pid=(\d+)").ok()).as_ref()
}

fn command_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""([^"]+)""#).ok()).as_ref()
}

impl ListenerSource for SsSource {
    fn name(&self) -> &'static str {
        "ss"
    }

    fn args(&self) -> &'static [&'static str] {
        ARGS
    }

    fn parse_line(&self, line: &str) -> Option<Listener> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            return None;
        }

        // Column 4 is the local address; fall back to the first parsable
        // address for rows where ss shifts the columns.
        let (local, port) = fields
            .get(3)
            .and_then(|f| parse_local_address(f).map(|(_, port)| (*f, port)))
            .or_else(|| {
                fields
                    .iter()
                    .filter(|f| !f.starts_with("users:"))
                    .find_map(|f| parse_local_address(f).map(|(_, port)| (*f, port)))
            })?;

        let pid = pid_pattern()
            .and_then(|re| re.captures(line))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let command = command_pattern()
            .and_then(|re| re.captures(line))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or("");

        Some(Listener::tcp(port, pid, "", command, local))
    }
}
