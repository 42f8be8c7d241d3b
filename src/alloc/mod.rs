//! Free-port selection.
//!
//! A candidate is accepted only if its advisory lock can be taken and a bind
//! probe succeeds. Candidates are tried in order: preferred ports first, then
//! the range from low to high.

pub mod lock;

use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;

use tracing::debug;

use crate::config::Settings;
use crate::port::PortRange;
use crate::{Error, Result};

pub use lock::PortLock;

/// Whether `port` can be bound right now on loopback and on the wildcard
/// address. The probe socket is closed before returning.
pub fn bind_probe(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    [Ipv4Addr::LOCALHOST, Ipv4Addr::UNSPECIFIED]
        .into_iter()
        .all(|addr| TcpListener::bind((addr, port)).is_ok())
}

/// Preferred ports first (zero skipped), then the whole range.
pub fn candidates(prefer: &[u16], range: PortRange) -> impl Iterator<Item = u16> + '_ {
    prefer
        .iter()
        .copied()
        .filter(|p| *p != 0)
        .chain(range.iter())
}

pub struct Allocator {
    lock_dir: PathBuf,
}

impl Allocator {
    pub fn new(settings: &Settings) -> Self {
        Self::with_lock_dir(settings.lock_dir.clone())
    }

    pub fn with_lock_dir(lock_dir: PathBuf) -> Self {
        Self { lock_dir }
    }

    /// Pick a free port and keep its lock until the returned handle is
    /// released or dropped.
    pub fn pick_and_lock(&self, prefer: &[u16], range: PortRange) -> Result<PortLock> {
        fs::create_dir_all(&self.lock_dir).map_err(|e| {
            Error::IoError(format!(
                "cannot create lock directory {}: {e}",
                self.lock_dir.display()
            ))
        })?;

        for port in candidates(prefer, range) {
            let lock = match PortLock::try_acquire(&self.lock_dir, port) {
                Ok(Some(lock)) => lock,
                Ok(None) => continue,
                Err(e) => {
                    debug!(port, error = %e, "skipping port, lock failed");
                    continue;
                }
            };
            if bind_probe(port) {
                debug!(port, "allocated port");
                return Ok(lock);
            }
            debug!(port, "port busy");
        }

        Err(Error::AllocationExhausted {
            start: range.start(),
            end: range.end(),
        })
    }

    /// Pick a free port. The lock is only held during selection.
    pub fn pick(&self, prefer: &[u16], range: PortRange) -> Result<u16> {
        let lock = self.pick_and_lock(prefer, range)?;
        let port = lock.port();
        lock.release()?;
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn two_free_ports() -> (u16, u16) {
        let a = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let b = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        (a.local_addr().unwrap().port(), b.local_addr().unwrap().port())
    }

    fn single(port: u16) -> PortRange {
        PortRange::new(port, port).unwrap()
    }

    #[test]
    fn test_candidates_order() {
        let range = PortRange::new(3000, 3002).unwrap();
        let order: Vec<u16> = candidates(&[8080, 0, 3001], range).collect();
        assert_eq!(order, vec![8080, 3001, 3000, 3001, 3002]);
    }

    #[test]
    fn test_bind_probe_detects_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!bind_probe(port));
        drop(listener);
        assert!(!bind_probe(0));
    }

    #[test]
    fn test_pick_skips_busy_preferred_port() {
        let dir = tempdir().unwrap();
        let allocator = Allocator::with_lock_dir(dir.path().to_path_buf());

        let busy = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();
        let fallback = free_port();

        let picked = allocator.pick(&[busy_port], single(fallback)).unwrap();
        assert_eq!(picked, fallback);
    }

    #[test]
    fn test_pick_exhausted() {
        let dir = tempdir().unwrap();
        let allocator = Allocator::with_lock_dir(dir.path().to_path_buf());

        let busy = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = busy.local_addr().unwrap().port();

        let err = allocator.pick(&[], single(port)).unwrap_err();
        assert!(matches!(err, Error::AllocationExhausted { .. }));
    }

    #[test]
    fn test_concurrent_allocations_get_distinct_ports() {
        let dir = tempdir().unwrap();
        let allocator = Allocator::with_lock_dir(dir.path().to_path_buf());
        let (first_port, second_port) = two_free_ports();

        let first = allocator
            .pick_and_lock(&[first_port, second_port], single(second_port))
            .unwrap();
        let second = allocator
            .pick_and_lock(&[first_port, second_port], single(second_port))
            .unwrap();

        assert_ne!(first.port(), second.port());
        assert!(allocator
            .pick_and_lock(&[first_port], single(second_port))
            .is_err());

        drop(first);
        let again = allocator.pick_and_lock(&[first_port], single(second_port)).unwrap();
        assert_eq!(again.port(), first_port);
    }

    #[test]
    fn test_locked_port_is_skipped_even_if_bindable() {
        let dir = tempdir().unwrap();
        let allocator = Allocator::with_lock_dir(dir.path().to_path_buf());
        let port = free_port();

        let _held = PortLock::try_acquire(dir.path(), port).unwrap().unwrap();
        assert!(allocator.pick(&[port], single(port)).is_err());
    }
}
