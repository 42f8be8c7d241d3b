pub mod directory;
pub mod lsof;
pub mod ss;

use std::fmt;
use std::future::Future;
use std::ops::RangeInclusive;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tracing::{debug, trace, warn};

use crate::config::Settings;
use crate::{Error, Result};

pub use directory::{Directory, ListenerQuery};
pub use lsof::LsofSource;
pub use ss::SsSource;

/// One TCP socket in LISTEN state and the process holding it.
///
/// A port may show up several times (one row per socket or address family),
/// so `(port, pid)` is the identity used for de-duplication. The optional
/// fields are only present after enrichment and are left out of JSON when
/// unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub port: u16,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Numeric owner; filled by enrichment, never by discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    pub proto: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl Listener {
    pub fn tcp(
        port: u16,
        pid: u32,
        user: impl Into<String>,
        command: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            port,
            pid,
            user: user.into(),
            command: command.into(),
            proto: "tcp".to_string(),
            address: address.into(),
            ..Default::default()
        }
    }

    /// Case-insensitive substring match against the command name, the
    /// executable path and the full command line. `needle` must already be
    /// lowercase.
    pub fn matches_filter(&self, needle: &str) -> bool {
        let haystacks = [
            Some(self.command.as_str()),
            self.executable.as_deref(),
            self.command_line.as_deref(),
        ];
        haystacks
            .into_iter()
            .flatten()
            .any(|h| h.to_lowercase().contains(needle))
    }
}

/// Inclusive port range with `1 <= start <= end <= 65535`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub const FULL: PortRange = PortRange {
        start: 1,
        end: u16::MAX,
    };

    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(Error::InvalidInput(format!(
                "invalid range \"{start}-{end}\" (must be 1-65535 and start<=end)"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn iter(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl FromStr for PortRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s.trim().split_once('-').ok_or_else(|| {
            Error::InvalidInput(format!("invalid range {s:?} (expected start-end)"))
        })?;
        let start: u16 = start
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid range start {:?}", start.trim())))?;
        let end: u16 = end
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid range end {:?}", end.trim())))?;
        PortRange::new(start, end)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split a local address token into host and port.
///
/// Accepts `*:3000`, `127.0.0.1:3000`, `localhost:3000`, `[::1]:3000` and
/// `ss`-style scoped addresses such as `127.0.0.53%lo:53`. Service names
/// (`*:http`), wildcards (`*:*`) and ports outside 1-65535 are rejected.
pub fn parse_local_address(token: &str) -> Option<(String, u16)> {
    // lsof prints established sockets as `local->peer`
    let token = token.split("->").next().unwrap_or(token);

    let (host, port_str) = if let Some(rest) = token.strip_prefix('[') {
        let close = rest.find(']')?;
        let port_str = rest[close + 1..].strip_prefix(':')?;
        (&token[..close + 2], port_str)
    } else {
        let colon = token.rfind(':')?;
        (&token[..colon], &token[colon + 1..])
    };

    if port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u16 = port_str.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

/// A line-oriented grammar for one listening-socket enumeration tool.
///
/// Implementations only parse; running the tool is [`PortManager`]'s job, so
/// every grammar can be tested against fixed sample text.
pub trait ListenerSource: Send + Sync {
    /// Tool name, also the program looked up on PATH.
    fn name(&self) -> &'static str;

    fn args(&self) -> &'static [&'static str];

    /// Parse one line. `None` means the line is not a listener (header,
    /// service-name port, garbage) and is skipped.
    fn parse_line(&self, line: &str) -> Option<Listener>;

    fn parse(&self, output: &str) -> Vec<Listener> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = self.parse_line(line);
                if parsed.is_none() {
                    trace!(source = self.name(), line, "skipping unparsable line");
                }
                parsed
            })
            .collect()
    }
}

/// Pick the first supported discovery tool found on PATH.
pub fn detect_source() -> Result<Box<dyn ListenerSource>> {
    let candidates: [Box<dyn ListenerSource>; 2] = [Box::new(LsofSource), Box::new(SsSource)];
    for source in candidates {
        if let Ok(path) = which::which(source.name()) {
            debug!(tool = source.name(), path = %path.display(), "selected discovery backend");
            return Ok(source);
        }
    }
    Err(Error::ToolUnavailable)
}

/// Run an external tool to completion under a deadline.
///
/// The child is killed if the deadline passes or the returned future is
/// dropped, so a hung tool never outlives the call.
pub(crate) async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<std::process::Output> {
    let mut cmd = TokioCommand::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::CommandFailed(format!(
            "{program} could not be started: {e}"
        ))),
        Err(_) => {
            warn!(tool = program, timeout_ms = timeout.as_millis() as u64, "tool timed out");
            Err(Error::Timeout {
                tool: program.to_string(),
                after: timeout,
            })
        }
    }
}

/// Anything that can produce a fresh snapshot of the TCP listeners.
pub trait ListenerScan: Send + Sync {
    /// Query the OS for every current TCP listener. Nothing is cached.
    fn scan(&self) -> impl Future<Output = Result<Vec<Listener>>> + Send;

    /// Fresh listeners on a single port.
    fn listeners_on(&self, port: u16) -> impl Future<Output = Result<Vec<Listener>>> + Send {
        async move {
            let mut listeners = self.scan().await?;
            listeners.retain(|l| l.port == port);
            Ok(listeners)
        }
    }

    fn has_listener(&self, port: u16) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(!self.listeners_on(port).await?.is_empty()) }
    }
}

/// Discovery front door: owns the selected backend and the tool deadline.
pub struct PortManager {
    source: Box<dyn ListenerSource>,
    tool_timeout: Duration,
}

impl PortManager {
    /// Select a backend from PATH. Fails with [`Error::ToolUnavailable`] when
    /// neither `lsof` nor `ss` is installed.
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self::with_source(detect_source()?, settings.tool_timeout))
    }

    pub fn with_source(source: Box<dyn ListenerSource>, tool_timeout: Duration) -> Self {
        Self {
            source,
            tool_timeout,
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }
}

impl ListenerScan for PortManager {
    async fn scan(&self) -> Result<Vec<Listener>> {
        let name = self.source.name();
        let output = run_tool(name, self.source.args(), self.tool_timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            // lsof exits 1 when nothing matches; treat an empty failure as "no listeners"
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.trim().is_empty() {
                debug!(tool = name, status = ?output.status, stderr = %stderr.trim(), "tool reported no listeners");
                return Ok(Vec::new());
            }
            debug!(tool = name, status = ?output.status, "tool exited non-zero, parsing partial output");
        }

        let listeners = self.source.parse(&stdout);
        debug!(tool = name, count = listeners.len(), "discovered listeners");
        Ok(listeners)
    }
}
