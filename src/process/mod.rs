pub mod enrich;
pub mod terminate;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

pub use enrich::{Enrich, Enricher};
pub use terminate::{KillReport, KillRequest, KillState, KillStatus, Target, TerminationController};

/// Signals `kill` is allowed to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KillSignal {
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGKILL")]
    Kill,
}

impl KillSignal {
    /// SIGKILL cannot be escalated any further.
    pub fn is_final(self) -> bool {
        matches!(self, KillSignal::Kill)
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KillSignal::Term => "SIGTERM",
            KillSignal::Int => "SIGINT",
            KillSignal::Kill => "SIGKILL",
        };
        f.write_str(name)
    }
}

impl FromStr for KillSignal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "TERM" => Ok(KillSignal::Term),
            "INT" => Ok(KillSignal::Int),
            "KILL" => Ok(KillSignal::Kill),
            _ => Err(Error::InvalidInput(format!(
                "unsupported signal {s:?} (use TERM, INT or KILL)"
            ))),
        }
    }
}

#[cfg(unix)]
impl From<KillSignal> for nix::sys::signal::Signal {
    fn from(signal: KillSignal) -> Self {
        use nix::sys::signal::Signal;
        match signal {
            KillSignal::Term => Signal::SIGTERM,
            KillSignal::Int => Signal::SIGINT,
            KillSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process had already exited.
    Gone,
}

/// Delivers signals to processes.
pub trait Signaller: Send + Sync {
    fn send(&self, pid: u32, signal: KillSignal) -> Result<SignalOutcome>;
}

/// Identity that target owners are compared against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub uid: Option<u32>,
    pub name: Option<String>,
}

impl Caller {
    #[cfg(unix)]
    pub fn current() -> Self {
        use nix::unistd::{getuid, User};
        let uid = getuid();
        let name = match User::from_uid(uid) {
            Ok(Some(user)) => Some(user.name),
            _ => std::env::var("USER").ok().filter(|u| !u.is_empty()),
        };
        Self {
            uid: Some(uid.as_raw()),
            name,
        }
    }

    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self {
            uid: None,
            name: std::env::var("USERNAME").ok().filter(|u| !u.is_empty()),
        }
    }

    /// Whether a process owned by `uid`/`user` belongs to the caller. When
    /// both uids are known they decide alone; `ps` may cut long login names,
    /// so names are only compared as a fallback.
    pub fn owns(&self, uid: Option<u32>, user: &str) -> bool {
        match (self.uid, uid) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => matches!(&self.name, Some(name) if !user.is_empty() && user == name),
        }
    }
}

/// Full login name for a uid.
#[cfg(unix)]
pub fn user_name(uid: u32) -> Option<String> {
    use nix::unistd::{Uid, User};
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[cfg(not(unix))]
pub fn user_name(_uid: u32) -> Option<String> {
    None
}

pub struct ProcessManager;

impl ProcessManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Signaller for ProcessManager {
    #[cfg(unix)]
    fn send(&self, pid: u32, signal: KillSignal) -> Result<SignalOutcome> {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // pid 0 and negative pids address process groups
        let raw = i32::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| Error::InvalidInput(format!("invalid pid: {pid}")))?;

        match kill(Pid::from_raw(raw), nix::sys::signal::Signal::from(signal)) {
            Ok(()) => {
                debug!(pid, %signal, "signal delivered");
                Ok(SignalOutcome::Delivered)
            }
            Err(Errno::ESRCH) => {
                debug!(pid, %signal, "process already gone");
                Ok(SignalOutcome::Gone)
            }
            Err(Errno::EPERM) => Err(Error::PermissionDenied(format!(
                "cannot send {signal} to pid {pid}"
            ))),
            Err(e) => Err(Error::IoError(format!(
                "failed to send {signal} to pid {pid}: {e}"
            ))),
        }
    }

    #[cfg(not(unix))]
    fn send(&self, pid: u32, signal: KillSignal) -> Result<SignalOutcome> {
        Err(Error::Other(format!(
            "sending {signal} to pid {pid} is not supported on this platform"
        )))
    }
}
