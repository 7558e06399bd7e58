//! Daemon orchestration and lifecycle management.
//!
//! This module wires the components together: it loads settings and rules,
//! opens the audit log, binds the listeners, spawns the proxies, the PAC
//! responder and the app blocker, and tears everything down on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::appblock::{
    AppBlocker, AppBlockerConfig, ProcessTable, SysinfoProcessTable, compile_rules,
};
use crate::cli::Cli;
use crate::config::{ConfigLoader, Ruleset, Settings, load_ruleset};
use crate::pac::{PacServer, pac_url};
use crate::proxy::{PolicyEngine, ProxyConfig, ProxyKind, ProxyServer, bind_with_fallback};
use crate::sysproxy::{self, ProxyToggleGuard};
use crate::telemetry::AuditLogger;

/// How long each task gets to wind down after shutdown is broadcast.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Validated inputs for one daemon run.
pub struct Orchestrator {
    settings: Settings,
    ruleset: Ruleset,
    process_table: Option<Arc<dyn ProcessTable>>,
}

impl Orchestrator {
    /// Build from already resolved settings and a parsed ruleset.
    pub fn new(settings: Settings, ruleset: Ruleset) -> Self {
        Self {
            settings,
            ruleset,
            process_table: None,
        }
    }

    /// Load config files, apply CLI overrides and read the ruleset.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config = ConfigLoader::new()
            .load(cli)
            .context("Failed to load configuration")?;
        debug!("Loaded configuration: {:?}", config);

        let settings = config.resolve().context("Invalid configuration")?;
        let ruleset = load_ruleset(&settings.blocklist_path).with_context(|| {
            format!("Failed to load ruleset {}", settings.blocklist_path.display())
        })?;

        Ok(Self::new(settings, ruleset))
    }

    /// Use a specific process table for the app blocker.
    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.process_table = Some(table);
        self
    }

    /// The resolved settings this run will use.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bind listeners and spawn every component.
    pub async fn start(self) -> Result<RunningDaemon> {
        let Orchestrator {
            settings,
            ruleset,
            process_table,
        } = self;

        let policy = PolicyEngine::from_ruleset(&ruleset).context("Invalid ruleset")?;
        info!(
            "Loaded {} blocked domain(s) and {} network(s)",
            policy.blocked_domain_count(),
            policy.network_count()
        );

        let audit = Arc::new(
            AuditLogger::open(&settings.audit_path, settings.audit_format).with_context(|| {
                format!("Failed to open audit log {}", settings.audit_path.display())
            })?,
        );

        let host = settings.listen_host;
        let http_listener = bind_with_fallback(host, settings.http_port, "HTTP proxy")
            .await
            .context("Failed to bind HTTP proxy")?;
        let socks_listener = bind_with_fallback(host, settings.socks_port, "SOCKS5 proxy")
            .await
            .context("Failed to bind SOCKS5 proxy")?;
        let pac_listener = bind_with_fallback(host, settings.pac_port, "PAC responder")
            .await
            .context("Failed to bind PAC responder")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let proxy_config = ProxyConfig {
            policy: Arc::new(policy),
            audit: Arc::clone(&audit),
            limits: settings.limits,
        };

        let http_server = ProxyServer::new(
            ProxyKind::Http,
            http_listener,
            proxy_config.clone(),
            shutdown_rx.clone(),
        );
        let socks_server = ProxyServer::new(
            ProxyKind::Socks5,
            socks_listener,
            proxy_config,
            shutdown_rx.clone(),
        );
        let http_addr = http_server.local_addr()?;
        let socks_addr = socks_server.local_addr()?;

        let pac_server = PacServer::new(pac_listener, http_addr, socks_addr, shutdown_rx.clone());
        let pac_addr = pac_server.local_addr()?;

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = vec![
            ("HTTP proxy", spawn_logged("HTTP proxy", http_server.run())),
            ("SOCKS5 proxy", spawn_logged("SOCKS5 proxy", socks_server.run())),
            ("PAC responder", spawn_logged("PAC responder", pac_server.run())),
        ];

        let rules = compile_rules(ruleset.apps.patterns());
        if !settings.apps.enabled {
            info!("App blocker disabled");
        } else if rules.is_empty() {
            info!("No app rules; app blocker not started");
        } else {
            let table: Arc<dyn ProcessTable> = match process_table {
                Some(table) => table,
                None => Arc::new(SysinfoProcessTable::new()),
            };
            let blocker = AppBlocker::new(
                table,
                AppBlockerConfig::from_settings(rules, &settings.apps),
                Arc::clone(&audit),
            );
            tasks.push(("App blocker", tokio::spawn(blocker.run(shutdown_rx.clone()))));
        }

        let guard = if settings.enable_pac {
            match sysproxy::enable_pac(&pac_url(pac_addr)) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!("Could not set system PAC automatically: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(RunningDaemon {
            http_addr,
            socks_addr,
            pac_addr,
            shutdown_tx,
            tasks,
            audit,
            guard,
        })
    }
}

/// Handle to a started daemon.
pub struct RunningDaemon {
    http_addr: SocketAddr,
    socks_addr: SocketAddr,
    pac_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    audit: Arc<AuditLogger>,
    guard: Option<ProxyToggleGuard>,
}

impl RunningDaemon {
    /// Bound address of the HTTP proxy.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Bound address of the SOCKS5 proxy.
    pub fn socks_addr(&self) -> SocketAddr {
        self.socks_addr
    }

    /// Bound address of the PAC responder.
    pub fn pac_addr(&self) -> SocketAddr {
        self.pac_addr
    }

    /// URL of the served PAC script.
    pub fn pac_url(&self) -> String {
        pac_url(self.pac_addr)
    }

    /// Names of the running components.
    pub fn components(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Stop every component, restore the system proxy and flush the audit log.
    pub async fn shutdown(self) {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("{} stopped", name),
                Ok(Err(e)) => warn!("{} task failed: {}", name, e),
                Err(_) => {
                    warn!("{} did not stop within {:?}; aborting", name, TASK_JOIN_TIMEOUT);
                    handle.abort();
                }
            }
        }

        if let Some(guard) = self.guard
            && let Err(e) = guard.restore()
        {
            warn!("Could not restore system proxy setting: {}", e);
        }

        self.audit.shutdown().await;
    }
}

fn spawn_logged<F>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<(), crate::proxy::ProxyError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            error!("{} stopped with error: {}", name, e);
        }
    })
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to wait for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to wait for Ctrl-C")?;
    }

    Ok(())
}

/// Run the daemon until a shutdown signal arrives.
pub async fn run(cli: &Cli) -> Result<()> {
    let daemon = Orchestrator::from_cli(cli)?.start().await?;

    println!("[HTTP proxy]   {}", daemon.http_addr());
    println!("[SOCKS5 proxy] {}", daemon.socks_addr());
    println!("[PAC]          {}", daemon.pac_url());
    println!("Press Ctrl-C to stop.");

    let waited = wait_for_shutdown_signal().await;
    daemon.shutdown().await;
    waited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, apps_enabled: bool) -> Settings {
        let toml = format!(
            r#"
            [proxy]
            http_port = 0
            socks_port = 0
            pac_port = 0

            [audit]
            path = "{}"

            [apps]
            enabled = {}
            dry_run = true
            "#,
            dir.path().join("traffic.log").display(),
            apps_enabled
        );
        let config: Config = toml::from_str(&toml).unwrap();
        config.resolve().unwrap()
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let ruleset = Ruleset::from_json(r#"{"blocked": ["example.com"], "apps": ["no-such-app-*"]}"#)
            .unwrap();

        let daemon = Orchestrator::new(settings(&dir, true), ruleset)
            .start()
            .await
            .unwrap();

        assert_ne!(daemon.http_addr().port(), 0);
        assert_ne!(daemon.socks_addr().port(), 0);
        assert!(daemon.pac_url().ends_with("/proxy.pac"));
        assert!(daemon.components().contains(&"App blocker"));

        tokio::time::timeout(Duration::from_secs(10), daemon.shutdown())
            .await
            .unwrap();
        assert!(dir.path().join("traffic.log").exists());
    }

    #[tokio::test]
    async fn test_app_blocker_skipped_without_rules() {
        let dir = TempDir::new().unwrap();
        let ruleset = Ruleset::from_json(r#"{"blocked": ["example.com"]}"#).unwrap();

        let daemon = Orchestrator::new(settings(&dir, true), ruleset)
            .start()
            .await
            .unwrap();
        assert!(!daemon.components().contains(&"App blocker"));
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_ip_rule_is_fatal() {
        let dir = TempDir::new().unwrap();
        let ruleset = Ruleset::from_json(r#"{"ips": ["not-an-ip"]}"#).unwrap();

        let result = Orchestrator::new(settings(&dir, false), ruleset).start().await;
        assert!(result.is_err());
    }
}
