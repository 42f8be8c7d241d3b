use std::fmt;
use std::time::Duration;

/// Error types for the portctl application.
///
/// Every failure that reaches the command boundary is one of these. Partial
/// process information and targets that exit before they are signaled are
/// not errors and never show up here.
#[derive(Debug, Clone)]
pub enum Error {
    /// I/O operation failed
    IoError(String),
    /// Failed to parse data
    ParseError(String),
    /// Malformed port, range, signal, duration or other argument
    InvalidInput(String),
    /// Neither `lsof` nor `ss` is available on PATH
    ToolUnavailable,
    /// An external tool could not be run
    CommandFailed(String),
    /// An external tool did not finish before its deadline
    Timeout { tool: String, after: Duration },
    /// A kill target belongs to another user and `--force` was not given
    OwnershipDenied { pid: u32, owner: Option<String> },
    /// The OS refused to deliver a signal
    PermissionDenied(String),
    /// Every candidate port was taken
    AllocationExhausted { start: u16, end: u16 },
    /// Other generic error
    Other(String),
}

impl Error {
    /// Process exit code used when this error ends a command.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(msg) => write!(f, "I/O error: {msg}"),
            Error::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Error::InvalidInput(msg) => write!(f, "{msg}"),
            Error::ToolUnavailable => write!(
                f,
                "no supported port lister found (need `lsof` or `ss` in PATH)"
            ),
            Error::CommandFailed(msg) => {
                if ["lsof", "ss", "ps"].iter().any(|tool| msg.starts_with(tool)) {
                    write!(
                        f,
                        "Command failed: {msg}. Make sure required system tools are installed"
                    )
                } else {
                    write!(f, "Command execution failed: {msg}")
                }
            }
            Error::Timeout { tool, after } => {
                write!(f, "{tool} did not finish within {}ms", after.as_millis())
            }
            Error::OwnershipDenied { pid, owner } => match owner {
                Some(owner) => write!(
                    f,
                    "refusing to kill pid {pid} owned by {owner:?} (use --force to override)"
                ),
                None => write!(
                    f,
                    "refusing to kill pid {pid} with unknown owner (use --force to override)"
                ),
            },
            Error::PermissionDenied(msg) => {
                write!(
                    f,
                    "Permission denied: {msg}. Try running with 'sudo' for system processes"
                )
            }
            Error::AllocationExhausted { start, end } => {
                write!(f, "no free TCP port found in {start}-{end}")
            }
            Error::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(format!("{e:#}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(e.to_string())
    }
}

/// A specialized `Result` type for portctl operations.
pub type Result<T> = std::result::Result<T, Error>;
