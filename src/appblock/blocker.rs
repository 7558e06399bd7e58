//! The app blocker scan loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{AppBlockError, ProcessError};
use super::process::{ProcessInfo, ProcessTable};
use super::rules::{Rule, first_match, is_protected};
use super::{MIN_SCAN_INTERVAL, Mode};
use crate::config::AppSettings;
use crate::telemetry::{AuditLogger, EntryKind};

/// How often `is_alive` is polled during the strict grace period.
const ALIVE_POLL: Duration = Duration::from_millis(100);

/// Static configuration for an [`AppBlocker`].
#[derive(Debug, Clone)]
pub struct AppBlockerConfig {
    /// Compiled rules, checked in order.
    pub rules: Vec<Rule>,
    /// Whether survivors of the grace period are force-killed.
    pub mode: Mode,
    /// Time a terminated process gets to exit in strict mode.
    pub grace: Duration,
    /// Pause between scans.
    pub interval: Duration,
    /// Log matches without signalling anything.
    pub dry_run: bool,
}

impl AppBlockerConfig {
    /// Combine compiled rules with resolved app settings.
    pub fn from_settings(rules: Vec<Rule>, settings: &AppSettings) -> Self {
        Self {
            rules,
            mode: settings.mode,
            grace: settings.grace,
            interval: settings.interval.max(MIN_SCAN_INTERVAL),
            dry_run: settings.dry_run,
        }
    }
}

/// Counters for one pass over the process table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Processes that matched a rule.
    pub matched: usize,
    /// Graceful terminations delivered.
    pub terminated: usize,
    /// Forced kills delivered.
    pub killed: usize,
    /// Matches left alone because access was denied.
    pub skipped: usize,
    /// Snapshot or signal failures.
    pub errors: usize,
}

/// Scans the process table and terminates matching processes.
pub struct AppBlocker {
    table: Arc<dyn ProcessTable>,
    config: AppBlockerConfig,
    audit: Arc<AuditLogger>,
    self_pid: u32,
}

impl AppBlocker {
    /// Create a blocker that treats the current process as "self".
    pub fn new(
        table: Arc<dyn ProcessTable>,
        config: AppBlockerConfig,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            table,
            config,
            audit,
            self_pid: std::process::id(),
        }
    }

    /// Override the pid treated as "self". Used by tests.
    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = pid;
        self
    }

    /// The configuration this blocker runs with.
    pub fn config(&self) -> &AppBlockerConfig {
        &self.config
    }

    /// Scan until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "App blocker started: {} rule(s), mode={}, interval={:?}{}",
            self.config.rules.len(),
            self.config.mode,
            self.config.interval,
            if self.config.dry_run { ", dry run" } else { "" }
        );

        loop {
            tokio::select! {
                report = self.scan_once() => {
                    if report != ScanReport::default() {
                        debug!("App scan: {:?}", report);
                    }
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
            }
        }

        info!("App blocker stopped");
    }

    /// One pass over the process table.
    pub async fn scan_once(&self) -> ScanReport {
        let mut report = ScanReport::default();

        let processes = match self.snapshot().await {
            Ok(processes) => processes,
            Err(e) => {
                warn!("App scan failed: {}", e);
                self.audit.record(EntryKind::App, "scan", 0, "ERROR", "-");
                report.errors += 1;
                return report;
            }
        };

        for process in &processes {
            if process.pid == self.self_pid || is_protected(&process.name, process.exe.as_deref())
            {
                continue;
            }
            let Some(rule) = first_match(&self.config.rules, &process.name, process.exe.as_deref())
            else {
                continue;
            };

            report.matched += 1;
            if self.config.dry_run {
                self.audit_process(process, "MATCH-DRYRUN", rule);
                continue;
            }
            self.enforce(process, rule, &mut report).await;
        }

        report
    }

    async fn snapshot(&self) -> Result<Vec<ProcessInfo>, AppBlockError> {
        let table = Arc::clone(&self.table);
        tokio::task::spawn_blocking(move || table.snapshot()).await?
    }

    async fn enforce(&self, process: &ProcessInfo, rule: &Rule, report: &mut ScanReport) {
        let pid = process.pid;
        let table = Arc::clone(&self.table);
        let terminated = tokio::task::spawn_blocking(move || table.terminate(pid))
            .await
            .unwrap_or_else(|e| Err(ProcessError::Other(e.to_string())));

        if !self.settle(process, rule, terminated, "TERMINATE", report) {
            return;
        }
        report.terminated += 1;

        if self.config.mode == Mode::Polite || !self.still_alive_after_grace(pid).await {
            return;
        }

        let table = Arc::clone(&self.table);
        let killed = tokio::task::spawn_blocking(move || table.kill(pid))
            .await
            .unwrap_or_else(|e| Err(ProcessError::Other(e.to_string())));
        if self.settle(process, rule, killed, "KILL", report) {
            report.killed += 1;
        }
    }

    /// Audit the outcome of a signal. Returns true if it was delivered.
    fn settle(
        &self,
        process: &ProcessInfo,
        rule: &Rule,
        result: Result<(), ProcessError>,
        action: &str,
        report: &mut ScanReport,
    ) -> bool {
        match result {
            Ok(()) => {
                info!("{} {} (pid {}) rule={}", action, process.display_name(), process.pid, rule.pattern);
                self.audit_process(process, action, rule);
                true
            }
            Err(ProcessError::ProcessGone) => false,
            Err(ProcessError::AccessDenied) => {
                debug!("Access denied for {} (pid {})", process.display_name(), process.pid);
                self.audit_process(process, "SKIP-ACCESSDENIED", rule);
                report.skipped += 1;
                false
            }
            Err(ProcessError::Other(message)) => {
                warn!(
                    "{} failed for {} (pid {}): {}",
                    action,
                    process.display_name(),
                    process.pid,
                    message
                );
                self.audit_entry(
                    process,
                    "ERROR",
                    &format!("rule={};error={}", rule.pattern, message),
                );
                report.errors += 1;
                false
            }
        }
    }

    async fn still_alive_after_grace(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.config.grace;
        loop {
            let table = Arc::clone(&self.table);
            let alive = tokio::task::spawn_blocking(move || table.is_alive(pid))
                .await
                .unwrap_or(false);
            if !alive {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep(ALIVE_POLL.min(deadline - now)).await;
        }
    }

    fn audit_process(&self, process: &ProcessInfo, decision: &str, rule: &Rule) {
        self.audit_entry(process, decision, &format!("rule={}", rule.pattern));
    }

    fn audit_entry(&self, process: &ProcessInfo, decision: &str, annotation: &str) {
        self.audit.record(
            EntryKind::App,
            &process.display_name(),
            process.pid,
            decision,
            annotation,
        );
    }
}
