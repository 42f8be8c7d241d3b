//! Port-scoped process termination.
//!
//! `kill` resolves the processes listening on a port, checks that they belong
//! to the caller, sends the requested signal and then watches the port. If
//! the port is still busy when the grace period ends, the same targets get
//! SIGKILL.
//!
//! The flow is a small state machine:
//!
//! ```text
//! Idle -> TargetsResolved -> OwnershipChecked -> Approved -> Signaled -> Confirmed
//!  |                                |               |            \
//!  v                                v               v             -> Escalating -> ForceKilled
//! NoTargets                      Denied         DryReported
//! ```
//!
//! Ownership compares numeric uids. Discovery never reports them, so targets
//! are enriched first unless `--force` makes ownership moot.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{Caller, Enrich, KillSignal, SignalOutcome, Signaller};
use crate::port::{Listener, ListenerScan};
use crate::utils::validate_port;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillState {
    Idle,
    NoTargets,
    TargetsResolved,
    OwnershipChecked,
    Denied,
    Approved,
    DryReported,
    Signaled,
    Confirmed,
    Escalating,
    ForceKilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KillStatus {
    /// Nothing was listening.
    Idle,
    /// Targets were reported but not signaled.
    DryRun,
    Signaled,
}

/// A process selected for signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub pid: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct KillRequest {
    pub port: u16,
    pub signal: KillSignal,
    /// Grace period before escalating to SIGKILL. Zero disables escalation.
    pub timeout: Duration,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillReport {
    pub port: u16,
    pub status: KillStatus,
    /// Number of targets the signal was actually delivered to.
    pub signaled: usize,
    /// Last signal sent; SIGKILL after escalation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<KillSignal>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub escalated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
    /// Targets the first signal could not be delivered to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<u32>,
    /// Final state.
    #[serde(skip)]
    pub state: KillState,
    /// Every state visited, starting at `Idle`.
    #[serde(skip)]
    pub trail: Vec<KillState>,
}

impl KillReport {
    fn new(port: u16, status: KillStatus, trail: Vec<KillState>) -> Self {
        Self {
            port,
            status,
            signaled: 0,
            signal: None,
            escalated: false,
            targets: Vec::new(),
            failed: Vec::new(),
            state: trail.last().copied().unwrap_or(KillState::Idle),
            trail,
        }
    }
}

pub struct TerminationController<'a, S, E, G> {
    scanner: &'a S,
    enricher: &'a E,
    signaller: &'a G,
    caller: Caller,
    poll_interval: Duration,
}

impl<'a, S, E, G> TerminationController<'a, S, E, G>
where
    S: ListenerScan,
    E: Enrich,
    G: Signaller,
{
    pub fn new(
        scanner: &'a S,
        enricher: &'a E,
        signaller: &'a G,
        caller: Caller,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scanner,
            enricher,
            signaller,
            caller,
            poll_interval,
        }
    }

    pub async fn run(&self, request: &KillRequest) -> Result<KillReport> {
        validate_port(request.port)?;
        let port = request.port;
        let mut trail = vec![KillState::Idle];

        let mut listeners = self.scanner.listeners_on(port).await?;
        let mut targets = resolve_targets(&listeners);
        if targets.is_empty() {
            transition(port, &mut trail, KillState::NoTargets);
            return Ok(KillReport::new(port, KillStatus::Idle, trail));
        }
        transition(port, &mut trail, KillState::TargetsResolved);

        if !request.force && targets.iter().any(|t| t.uid.is_none()) {
            self.enricher.enrich(&mut listeners).await;
            targets = resolve_targets(&listeners);
        }

        transition(port, &mut trail, KillState::OwnershipChecked);
        if !request.force {
            if let Err(e) = check_ownership(&targets, &self.caller) {
                transition(port, &mut trail, KillState::Denied);
                return Err(e);
            }
        }
        transition(port, &mut trail, KillState::Approved);

        if request.dry_run {
            transition(port, &mut trail, KillState::DryReported);
            let mut report = KillReport::new(port, KillStatus::DryRun, trail);
            report.targets = targets;
            return Ok(report);
        }

        let mut signaled = 0;
        let mut failed = Vec::new();
        let mut first_error = None;
        for target in &targets {
            info!(port, pid = target.pid, command = %target.command, signal = %request.signal, "sending signal");
            match self.signaller.send(target.pid, request.signal) {
                Ok(SignalOutcome::Delivered) => signaled += 1,
                Ok(SignalOutcome::Gone) => debug!(pid = target.pid, "target exited before signal"),
                Err(e) => {
                    warn!(pid = target.pid, error = %e, "signal not delivered");
                    failed.push(target.pid);
                    first_error.get_or_insert(e);
                }
            }
        }
        // nothing went out at all: report the cause, not an empty success
        if failed.len() == targets.len() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        transition(port, &mut trail, KillState::Signaled);

        let mut escalated = false;
        if !request.timeout.is_zero() && !request.signal.is_final() {
            if self.wait_until_free(port, request.timeout).await? {
                transition(port, &mut trail, KillState::Confirmed);
            } else {
                transition(port, &mut trail, KillState::Escalating);
                warn!(
                    port,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "port still in use, escalating to SIGKILL"
                );
                for target in &targets {
                    if let Err(e) = self.signaller.send(target.pid, KillSignal::Kill) {
                        debug!(pid = target.pid, error = %e, "SIGKILL failed");
                    }
                }
                transition(port, &mut trail, KillState::ForceKilled);
                escalated = true;
            }
        }

        let mut report = KillReport::new(port, KillStatus::Signaled, trail);
        report.signaled = signaled;
        report.signal = Some(if escalated {
            KillSignal::Kill
        } else {
            request.signal
        });
        report.escalated = escalated;
        report.targets = targets;
        report.failed = failed;
        Ok(report)
    }

    /// Poll until nothing listens on `port` or `timeout` elapses. The last
    /// check lands on the deadline, never past it.
    async fn wait_until_free(&self, port: u16, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
            if !self.scanner.has_listener(port).await? {
                return Ok(true);
            }
        }
    }
}

/// One target per distinct positive pid, in discovery order.
pub fn resolve_targets(listeners: &[Listener]) -> Vec<Target> {
    let mut seen = HashSet::new();
    listeners
        .iter()
        .filter(|l| l.pid > 0 && seen.insert(l.pid))
        .map(|l| Target {
            pid: l.pid,
            command: l.command.clone(),
            user: l.user.clone(),
            uid: l.uid,
        })
        .collect()
}

/// Every target must be owned by `caller`. An unknown owner, or an unknown
/// caller, counts as a mismatch.
pub fn check_ownership(targets: &[Target], caller: &Caller) -> Result<()> {
    for target in targets {
        if !caller.owns(target.uid, &target.user) {
            return Err(Error::OwnershipDenied {
                pid: target.pid,
                owner: (!target.user.is_empty()).then(|| target.user.clone()),
            });
        }
    }
    Ok(())
}

fn transition(port: u16, trail: &mut Vec<KillState>, next: KillState) {
    debug!(port, from = ?trail.last(), to = ?next, "kill state");
    trail.push(next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::enrich::{apply_ps_rows, parse_ps_output};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant as StdInstant;

    /// Fake host: a listener table plus processes that either honor or
    /// ignore each signal.
    struct FakeHost {
        listeners: Mutex<Vec<Listener>>,
        ignored: Vec<KillSignal>,
        gone: Vec<u32>,
        denied: Vec<u32>,
        sent: Mutex<Vec<(u32, KillSignal, StdInstant)>>,
    }

    impl FakeHost {
        fn new(listeners: Vec<Listener>) -> Self {
            Self {
                listeners: Mutex::new(listeners),
                ignored: Vec::new(),
                gone: Vec::new(),
                denied: Vec::new(),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn ignoring(mut self, signal: KillSignal) -> Self {
            self.ignored.push(signal);
            self
        }

        fn sent(&self) -> Vec<(u32, KillSignal)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(pid, sig, _)| (*pid, *sig))
                .collect()
        }
    }

    impl ListenerScan for FakeHost {
        async fn scan(&self) -> Result<Vec<Listener>> {
            Ok(self.listeners.lock().unwrap().clone())
        }
    }

    impl Signaller for FakeHost {
        fn send(&self, pid: u32, signal: KillSignal) -> Result<SignalOutcome> {
            if self.denied.contains(&pid) {
                return Err(Error::PermissionDenied(format!("pid {pid}")));
            }
            if self.gone.contains(&pid) {
                self.listeners.lock().unwrap().retain(|l| l.pid != pid);
                return Ok(SignalOutcome::Gone);
            }
            self.sent
                .lock()
                .unwrap()
                .push((pid, signal, StdInstant::now()));
            if !self.ignored.contains(&signal) {
                self.listeners.lock().unwrap().retain(|l| l.pid != pid);
            }
            Ok(SignalOutcome::Delivered)
        }
    }

    /// Enrichment that knows the owner of some pids.
    struct OwnerLookup(HashMap<u32, (u32, &'static str)>);

    impl Enrich for OwnerLookup {
        async fn enrich(&self, listeners: &mut [Listener]) {
            for l in listeners.iter_mut() {
                if let Some((uid, user)) = self.0.get(&l.pid) {
                    l.uid = Some(*uid);
                    l.user = user.to_string();
                }
            }
        }
    }

    /// Enrichment fed from captured `ps` output.
    struct PsCapture(&'static str);

    impl Enrich for PsCapture {
        async fn enrich(&self, listeners: &mut [Listener]) {
            apply_ps_rows(listeners, &parse_ps_output(self.0));
        }
    }

    const CALLER_UID: u32 = 4_000_000_123;

    fn alice() -> Caller {
        Caller {
            uid: Some(CALLER_UID),
            name: Some("alice".to_string()),
        }
    }

    fn no_owners() -> OwnerLookup {
        OwnerLookup(HashMap::new())
    }

    fn request(port: u16) -> KillRequest {
        KillRequest {
            port,
            signal: KillSignal::Term,
            timeout: Duration::from_millis(300),
            force: false,
            dry_run: false,
        }
    }

    fn controller<'a, E: Enrich>(
        host: &'a FakeHost,
        enricher: &'a E,
    ) -> TerminationController<'a, FakeHost, E, FakeHost> {
        TerminationController::new(host, enricher, host, alice(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_idle_port() {
        let host = FakeHost::new(vec![Listener::tcp(8080, 5, "alice", "nginx", "*:8080")]);
        let enricher = no_owners();
        let report = controller(&host, &enricher).run(&request(3000)).await.unwrap();

        assert_eq!(report.status, KillStatus::Idle);
        assert_eq!(report.signaled, 0);
        assert_eq!(report.state, KillState::NoTargets);
        assert!(host.sent().is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"port": 3000, "status": "idle", "signaled": 0})
        );
    }

    #[tokio::test]
    async fn test_graceful_exit_is_confirmed() {
        let host = FakeHost::new(vec![
            Listener::tcp(3000, 42, "alice", "node", "*:3000"),
            Listener::tcp(3000, 42, "alice", "node", "[::]:3000"),
        ]);
        let enricher = no_owners();
        let report = controller(&host, &enricher).run(&request(3000)).await.unwrap();

        assert_eq!(report.status, KillStatus::Signaled);
        assert_eq!(report.signaled, 1);
        assert_eq!(report.signal, Some(KillSignal::Term));
        assert!(!report.escalated);
        assert_eq!(report.state, KillState::Confirmed);
        assert_eq!(host.sent(), vec![(42, KillSignal::Term)]);
    }

    #[tokio::test]
    async fn test_escalates_once_after_timeout() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "alice", "node", "*:3000")])
            .ignoring(KillSignal::Term);
        let enricher = no_owners();
        let req = request(3000);

        let started = StdInstant::now();
        let report = controller(&host, &enricher).run(&req).await.unwrap();

        assert_eq!(report.signal, Some(KillSignal::Kill));
        assert!(report.escalated);
        assert_eq!(report.state, KillState::ForceKilled);
        assert_eq!(
            host.sent(),
            vec![(42, KillSignal::Term), (42, KillSignal::Kill)]
        );

        let sent = host.sent.lock().unwrap();
        let kill_at = sent[1].2;
        assert!(kill_at.duration_since(started) >= req.timeout);
    }

    #[tokio::test]
    async fn test_zero_timeout_never_escalates() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "alice", "node", "*:3000")])
            .ignoring(KillSignal::Term);
        let enricher = no_owners();
        let mut req = request(3000);
        req.timeout = Duration::ZERO;

        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert_eq!(report.state, KillState::Signaled);
        assert_eq!(host.sent(), vec![(42, KillSignal::Term)]);
    }

    #[tokio::test]
    async fn test_sigkill_request_does_not_escalate() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "alice", "node", "*:3000")])
            .ignoring(KillSignal::Kill);
        let enricher = no_owners();
        let mut req = request(3000);
        req.signal = KillSignal::Kill;

        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert!(!report.escalated);
        assert_eq!(host.sent(), vec![(42, KillSignal::Kill)]);
    }

    #[tokio::test]
    async fn test_foreign_owner_is_denied() {
        let host = FakeHost::new(vec![
            Listener::tcp(3000, 42, "alice", "node", "*:3000"),
            Listener::tcp(3000, 43, "root", "nginx", "*:3000"),
        ]);
        let enricher = no_owners();
        let err = controller(&host, &enricher)
            .run(&request(3000))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OwnershipDenied { pid: 43, .. }));
        assert!(host.sent().is_empty());
    }

    #[tokio::test]
    async fn test_force_skips_ownership() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 43, "root", "nginx", "*:3000")]);
        let enricher = no_owners();
        let mut req = request(3000);
        req.force = true;

        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert_eq!(report.signaled, 1);
    }

    #[tokio::test]
    async fn test_unknown_owner_is_looked_up() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "", "node", "*:3000")]);
        let enricher = OwnerLookup([(42, (CALLER_UID, "alice"))].into_iter().collect());
        let report = controller(&host, &enricher).run(&request(3000)).await.unwrap();
        assert_eq!(report.signaled, 1);
        assert_eq!(report.targets[0].user, "alice");
        assert_eq!(report.targets[0].uid, Some(CALLER_UID));

        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "", "node", "*:3000")]);
        let enricher = no_owners();
        let err = controller(&host, &enricher)
            .run(&request(3000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OwnershipDenied { owner: None, .. }));
    }

    #[tokio::test]
    async fn test_shortened_ps_name_still_matches_caller_uid() {
        let host = FakeHost::new(vec![Listener::tcp(
            47123,
            12173,
            "",
            "python3",
            "127.0.0.1:47123",
        )]);
        let enricher = PsCapture("  12173     1 4000000123 longuse+ python3 -m http.server\n");
        let caller = Caller {
            uid: Some(CALLER_UID),
            name: Some("longusername_dev".to_string()),
        };
        let controller =
            TerminationController::new(&host, &enricher, &host, caller, Duration::from_millis(20));
        let mut req = request(47123);
        req.dry_run = true;

        let report = controller.run(&req).await.unwrap();
        assert_eq!(report.status, KillStatus::DryRun);
        assert_eq!(report.targets[0].pid, 12173);
        assert_eq!(report.targets[0].uid, Some(CALLER_UID));
    }

    #[tokio::test]
    async fn test_same_name_with_other_uid_is_denied() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "alice", "node", "*:3000")]);
        let enricher = OwnerLookup([(42, (0, "alice"))].into_iter().collect());
        let err = controller(&host, &enricher)
            .run(&request(3000))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OwnershipDenied { pid: 42, .. }));
        assert!(host.sent().is_empty());
    }

    #[tokio::test]
    async fn test_state_trail() {
        let host = FakeHost::new(vec![Listener::tcp(3000, 42, "alice", "node", "*:3000")]);
        let enricher = no_owners();
        let mut req = request(3000);
        req.dry_run = true;

        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert_eq!(
            report.trail,
            vec![
                KillState::Idle,
                KillState::TargetsResolved,
                KillState::OwnershipChecked,
                KillState::Approved,
                KillState::DryReported,
            ]
        );
        assert_eq!(report.state, KillState::DryReported);

        req.dry_run = false;
        req.force = true;
        let host = FakeHost::new(vec![Listener::tcp(3000, 43, "root", "nginx", "*:3000")])
            .ignoring(KillSignal::Term);
        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert_eq!(
            report.trail,
            vec![
                KillState::Idle,
                KillState::TargetsResolved,
                KillState::OwnershipChecked,
                KillState::Approved,
                KillState::Signaled,
                KillState::Escalating,
                KillState::ForceKilled,
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let host = FakeHost::new(vec![
            Listener::tcp(3000, 42, "alice", "node", "*:3000"),
            Listener::tcp(3000, 0, "", "", "*:3000"),
        ]);
        let enricher = no_owners();
        let mut req = request(3000);
        req.dry_run = true;

        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert_eq!(report.status, KillStatus::DryRun);
        assert_eq!(report.targets.len(), 1);
        assert!(host.sent().is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "dry-run");
        assert_eq!(json["targets"][0]["pid"], 42);
    }

    #[tokio::test]
    async fn test_exited_target_is_not_counted() {
        let mut host = FakeHost::new(vec![
            Listener::tcp(3000, 42, "alice", "node", "*:3000"),
            Listener::tcp(3000, 44, "alice", "node", "*:3000"),
        ]);
        host.gone.push(44);
        let enricher = no_owners();

        let report = controller(&host, &enricher).run(&request(3000)).await.unwrap();
        assert_eq!(report.signaled, 1);
        assert_eq!(report.targets.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_delivery_still_reports() {
        let mut host = FakeHost::new(vec![
            Listener::tcp(3000, 42, "alice", "node", "*:3000"),
            Listener::tcp(3000, 43, "alice", "node", "*:3000"),
        ]);
        host.denied.push(43);
        let enricher = no_owners();
        let mut req = request(3000);
        req.timeout = Duration::ZERO;

        let report = controller(&host, &enricher).run(&req).await.unwrap();
        assert_eq!(report.status, KillStatus::Signaled);
        assert_eq!(report.signaled, 1);
        assert_eq!(report.failed, vec![43]);
        assert_eq!(host.sent(), vec![(42, KillSignal::Term)]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"], serde_json::json!([43]));
    }

    #[tokio::test]
    async fn test_permission_error_propagates() {
        let mut host = FakeHost::new(vec![Listener::tcp(3000, 42, "alice", "node", "*:3000")]);
        host.denied.push(42);
        let enricher = no_owners();

        let err = controller(&host, &enricher)
            .run(&request(3000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_resolve_targets_dedups_and_skips_unknown_pids() {
        let listeners = vec![
            Listener::tcp(3000, 42, "alice", "node", "*:3000"),
            Listener::tcp(3000, 0, "", "", "*:3000"),
            Listener::tcp(3000, 42, "alice", "node", "[::]:3000"),
            Listener::tcp(3000, 7, "alice", "deno", "*:3000"),
        ];
        let pids: Vec<u32> = resolve_targets(&listeners).iter().map(|t| t.pid).collect();
        assert_eq!(pids, vec![42, 7]);
    }

    #[test]
    fn test_check_ownership_without_caller() {
        let targets = vec![Target {
            pid: 1,
            command: "init".into(),
            user: "alice".into(),
            uid: None,
        }];
        let bob = Caller {
            uid: None,
            name: Some("bob".to_string()),
        };
        assert!(check_ownership(&targets, &alice()).is_ok());
        assert!(check_ownership(&targets, &bob).is_err());
        assert!(check_ownership(&targets, &Caller::default()).is_err());
    }
}
