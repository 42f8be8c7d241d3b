//! Best-effort process details for listeners.
//!
//! Discovery only yields pid, user and a short command name. Enrichment adds
//! the owner uid, parent pid, full command line, executable path and working
//! directory.
//! It never fails: whatever cannot be read is left unset.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::debug;

use super::user_name;
use crate::config::Settings;
use crate::port::{run_tool, Listener};

/// Fills optional process fields on a set of listeners in place.
pub trait Enrich: Send + Sync {
    fn enrich(&self, listeners: &mut [Listener]) -> impl Future<Output = ()> + Send;
}

/// One row of `ps -o pid= -o ppid= -o uid= -o user= -o command=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsRow {
    pub ppid: u32,
    pub uid: Option<u32>,
    /// As printed by `ps`, which may shorten long names (`longuse+`).
    pub user: String,
    pub command_line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcPaths {
    pub cwd: Option<String>,
    pub executable: Option<String>,
}

pub struct Enricher {
    tool_timeout: Duration,
    fanout: usize,
    proc_root: Option<PathBuf>,
}

impl Enricher {
    pub fn new(settings: &Settings) -> Self {
        let proc_root = Path::new("/proc/self").exists().then(|| PathBuf::from("/proc"));
        Self {
            tool_timeout: settings.tool_timeout,
            fanout: settings.enrich_fanout.max(1),
            proc_root,
        }
    }

    async fn query_ps(&self, pids: &[u32]) -> HashMap<u32, PsRow> {
        let pid_list = pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let args = [
            "-p",
            pid_list.as_str(),
            "-o",
            "pid=",
            "-o",
            "ppid=",
            "-o",
            "uid=",
            "-o",
            "user=",
            "-o",
            "command=",
        ];

        // ps exits non-zero when some pids are gone; the rest is still valid
        match run_tool("ps", &args, self.tool_timeout).await {
            Ok(output) => parse_ps_output(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!(error = %e, "ps enrichment unavailable");
                HashMap::new()
            }
        }
    }

    async fn query_paths(&self, pids: &[u32]) -> HashMap<u32, ProcPaths> {
        let lookups: Vec<_> = pids
            .iter()
            .map(|&pid| async move { (pid, self.paths_for(pid).await) })
            .collect();
        stream::iter(lookups)
            .buffer_unordered(self.fanout)
            .collect()
            .await
    }

    async fn paths_for(&self, pid: u32) -> ProcPaths {
        match &self.proc_root {
            Some(root) => {
                let base = root.join(pid.to_string());
                ProcPaths {
                    cwd: read_link(&base.join("cwd")).await,
                    executable: read_link(&base.join("exe")).await,
                }
            }
            None => self.lsof_paths(pid).await,
        }
    }

    async fn lsof_paths(&self, pid: u32) -> ProcPaths {
        let pid_arg = pid.to_string();
        let args = ["-p", pid_arg.as_str(), "-a", "-d", "cwd,txt", "-Fn"];
        match run_tool("lsof", &args, self.tool_timeout).await {
            Ok(output) => parse_lsof_paths(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!(pid, error = %e, "lsof path lookup failed");
                ProcPaths::default()
            }
        }
    }
}

impl Enrich for Enricher {
    async fn enrich(&self, listeners: &mut [Listener]) {
        let pids: Vec<u32> = listeners
            .iter()
            .map(|l| l.pid)
            .filter(|pid| *pid > 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if pids.is_empty() {
            return;
        }

        let rows = self.query_ps(&pids).await;
        let paths = self.query_paths(&pids).await;
        debug!(
            pids = pids.len(),
            ps_rows = rows.len(),
            "enriched listener processes"
        );

        apply_ps_rows(listeners, &rows);
        apply_paths(listeners, &paths);
    }
}

/// Copy `ps` rows onto the listeners with matching pids. A missing user is
/// resolved from the uid first, since `ps` shortens long login names.
pub fn apply_ps_rows(listeners: &mut [Listener], rows: &HashMap<u32, PsRow>) {
    for listener in listeners.iter_mut() {
        let Some(row) = rows.get(&listener.pid) else {
            continue;
        };
        if row.ppid > 0 {
            listener.ppid = Some(row.ppid);
        }
        if row.uid.is_some() {
            listener.uid = row.uid;
        }
        if !row.command_line.is_empty() {
            listener.command_line = Some(row.command_line.clone());
        }
        if listener.user.is_empty() {
            if let Some(name) = row.uid.and_then(user_name) {
                listener.user = name;
            } else if !row.user.is_empty() {
                listener.user = row.user.clone();
            }
        }
    }
}

fn apply_paths(listeners: &mut [Listener], paths: &HashMap<u32, ProcPaths>) {
    for listener in listeners.iter_mut() {
        if let Some(found) = paths.get(&listener.pid) {
            if found.cwd.is_some() {
                listener.cwd = found.cwd.clone();
            }
            if found.executable.is_some() {
                listener.executable = found.executable.clone();
            }
        }
    }
}

async fn read_link(path: &Path) -> Option<String> {
    tokio::fs::read_link(path)
        .await
        .ok()
        .map(|target| target.to_string_lossy().into_owned())
}

/// Parse `ps` output with pid, ppid, uid and user columns followed by the
/// full command line, which may contain spaces.
pub fn parse_ps_output(output: &str) -> HashMap<u32, PsRow> {
    output
        .lines()
        .filter_map(|line| {
            let (fields, rest) = split_leading(line, 4);
            if fields.len() < 4 {
                return None;
            }
            let pid = fields[0].parse().ok()?;
            Some((
                pid,
                PsRow {
                    ppid: fields[1].parse().unwrap_or(0),
                    uid: fields[2].parse().ok(),
                    user: fields[3].to_string(),
                    command_line: rest.trim_end().to_string(),
                },
            ))
        })
        .collect()
}

/// Parse `lsof -Fn` field output. `f` lines name the descriptor, `n` lines
/// carry the path. The first `txt` entry is the executable.
pub fn parse_lsof_paths(output: &str) -> ProcPaths {
    let mut paths = ProcPaths::default();
    let mut fd = "";
    for line in output.lines() {
        let Some(tag) = line.chars().next() else {
            continue;
        };
        let value = &line[tag.len_utf8()..];
        match tag {
            'f' => fd = value,
            'n' if fd == "cwd" && paths.cwd.is_none() => paths.cwd = Some(value.to_string()),
            'n' if fd == "txt" && paths.executable.is_none() => {
                paths.executable = Some(value.to_string())
            }
            _ => {}
        }
    }
    paths
}

/// Split off the first `n` whitespace-separated fields and return the
/// remainder untouched.
fn split_leading(line: &str, n: usize) -> (Vec<&str>, &str) {
    let mut rest = line.trim_start();
    let mut fields = Vec::with_capacity(n);
    while fields.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (fields, rest)
}
