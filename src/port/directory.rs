use std::collections::HashSet;

use tracing::debug;

use super::{Listener, ListenerScan};
use crate::process::Enrich;
use crate::utils::validate_port;
use crate::Result;

/// Options for [`Directory::query`].
#[derive(Debug, Clone, Default)]
pub struct ListenerQuery {
    pub port: Option<u16>,
    /// Case-insensitive match on command, executable or command line.
    pub filter: Option<String>,
    /// Collapse rows sharing the same `(port, pid)`.
    pub unique: bool,
    /// Fill in ppid, command line, executable and cwd.
    pub enrich: bool,
}

/// Read-only view over the current listeners: list, filter, look up a port.
pub struct Directory<'a, S, E> {
    scanner: &'a S,
    enricher: &'a E,
}

impl<'a, S: ListenerScan, E: Enrich> Directory<'a, S, E> {
    pub fn new(scanner: &'a S, enricher: &'a E) -> Self {
        Self { scanner, enricher }
    }

    /// Fresh listeners matching `query`, sorted by port then pid.
    pub async fn query(&self, query: &ListenerQuery) -> Result<Vec<Listener>> {
        if let Some(port) = query.port {
            validate_port(port)?;
        }

        let mut listeners = self.scanner.scan().await?;
        if let Some(port) = query.port {
            filter_by_port(&mut listeners, port);
        }

        let needle = query
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        // Filtering looks at executable and command line, so it needs enrichment too.
        if query.enrich || needle.is_some() {
            self.enricher.enrich(&mut listeners).await;
        }
        if let Some(needle) = needle {
            filter_by_text(&mut listeners, needle);
        }
        if query.unique {
            dedup_by_port_pid(&mut listeners);
        }
        sort_listeners(&mut listeners);

        debug!(count = listeners.len(), ?query, "listener query complete");
        Ok(listeners)
    }

    /// Every listener on `port`, enriched. Empty when the port is free.
    pub async fn who(&self, port: u16) -> Result<Vec<Listener>> {
        validate_port(port)?;
        let mut listeners = self.scanner.listeners_on(port).await?;
        self.enricher.enrich(&mut listeners).await;
        sort_listeners(&mut listeners);
        Ok(listeners)
    }
}

pub fn filter_by_port(listeners: &mut Vec<Listener>, port: u16) {
    listeners.retain(|l| l.port == port);
}

pub fn filter_by_text(listeners: &mut Vec<Listener>, needle: &str) {
    let needle = needle.to_lowercase();
    listeners.retain(|l| l.matches_filter(&needle));
}

/// Keep the first row for each `(port, pid)`.
pub fn dedup_by_port_pid(listeners: &mut Vec<Listener>) {
    let mut seen = HashSet::new();
    listeners.retain(|l| seen.insert((l.port, l.pid)));
}

/// Stable sort by port, then pid.
pub fn sort_listeners(listeners: &mut [Listener]) {
    listeners.sort_by_key(|l| (l.port, l.pid));
}
