use std::path::Path;
use std::sync::Arc;

use adapters::conntrack::NetlinkConnTrack;
use adapters::firewall::IptablesInstaller;
use adapters::http::server::run_http_server;
use adapters::http::state::AppState;
use adapters::nfqueue::NfQueueFactory;
use application::decision_cache::DecisionCacheInvalidator;
use application::dispatcher::PacketDispatcher;
use application::health_monitor::HealthMonitor;
use application::interception_queue::{InterceptionQueue, QueueOptions};
use application::policy::StaticPolicy;
use domain::firewall::entity::RuleSet;
use infrastructure::config::AgentConfig;
use infrastructure::constants::{GRACEFUL_SHUTDOWN_TIMEOUT, PENDING_VERDICT_TIMEOUT};
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::primary::verdict_policy::VerdictPolicy;
use ports::secondary::conntrack_port::ConnTrackPort;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::queue_socket_port::QueueSocketFactory;
use ports::secondary::rule_installer_port::RuleInstallerPort;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// Load the config file and initialize logging with CLI overrides
/// applied.
pub fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let config = AgentConfig::load(Path::new(&cli.config))?;
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;
    Ok(config)
}

/// Run the agent startup sequence and block until shutdown.
#[allow(clippy::too_many_lines)]
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config and initialize logging ───────────────────────
    let config = load_config(cli)?;

    // Service root span, fields appear in every subsequent log entry
    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "markwall",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        queues = config.interception.queues.len(),
        install_rules = config.interception.install_rules,
        "markwall agent starting"
    );

    // ── 2. Metrics and cancellation ─────────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());
    let metrics_port = Arc::clone(&metrics) as Arc<dyn MetricsPort>;
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 3. Bind the kernel queues ───────────────────────────────────
    let options = QueueOptions {
        channel_capacity: config.interception.channel_capacity,
        overflow_verdict: config.interception.overflow_verdict,
        ..QueueOptions::default()
    };
    let queues = open_queues(&config, options, &metrics_port, &cancel_token).await?;

    // ── 4. Hook the queues into the packet path ─────────────────────
    let installer = IptablesInstaller::new();
    let rule_sets = if config.interception.install_rules {
        match install_rules(&installer, config.interception.rule_sets()?) {
            Ok(sets) => sets,
            Err(e) => {
                destroy_queues(&queues).await;
                return Err(e);
            }
        }
    } else {
        info!("rule installation disabled, expecting externally managed NFQUEUE rules");
        Vec::new()
    };

    // ── 5. Decision cache (optional) ────────────────────────────────
    let invalidator = match NetlinkConnTrack::open() {
        Ok(conntrack) => Some(Arc::new(DecisionCacheInvalidator::new(
            Arc::new(conntrack) as Arc<dyn ConnTrackPort>,
            config.interception.families(),
            Arc::clone(&metrics_port),
        ))),
        Err(e) => {
            warn!(error = %e, "conntrack unavailable, decision invalidation disabled");
            None
        }
    };

    // ── 6. Health watchdog ──────────────────────────────────────────
    let monitor = HealthMonitor::new(
        &queues,
        config.health.error_threshold,
        config.health.interval(),
        Arc::clone(&metrics_port),
    );
    let health_handle = tokio::spawn(monitor.run(cancel_token.clone()));

    // ── 7. Packet dispatcher ────────────────────────────────────────
    let policy = StaticPolicy::new(
        config.policy.default_verdict,
        config.policy.log_packets,
    );
    info!(verdict = %policy.verdict(), "static verdict policy loaded");
    let dispatcher = PacketDispatcher::new(
        queues.clone(),
        Arc::new(policy) as Arc<dyn VerdictPolicy>,
        Arc::clone(&metrics_port),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(None, cancel_token.clone()));

    // ── 8. HTTP server ──────────────────────────────────────────────
    let http_handle = if config.agent.http_enabled {
        let mut state = AppState::new(Arc::clone(&metrics), queues.clone());
        if let Some(inv) = &invalidator {
            state = state.with_invalidator(Arc::clone(inv));
        }
        let state = Arc::new(state);
        let http_bind = config.agent.bind_address.clone();
        let http_port = config.agent.http_port;
        let http_shutdown = cancel_token.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_http_server(
                state,
                &http_bind,
                http_port,
                http_shutdown.cancelled_owned(),
            )
            .await
            {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };

    // ── 9. Ready, wait for cancellation ─────────────────────────────
    info!("agent ready, waiting for shutdown signal");
    cancel_token.cancelled().await;

    // ── 10. Ordered shutdown sequence ───────────────────────────────
    info!("shutdown phase 1: unhooking firewall rules");
    for set in &rule_sets {
        if let Err(e) = installer.remove(set) {
            warn!(family = %set.family, error = %e, "firewall rule removal failed");
        }
    }

    info!("shutdown phase 2: draining buffered packets");
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, dispatcher_handle)
        .await
        .is_err()
    {
        warn!("dispatcher did not finish draining in time");
    }
    let _ = health_handle.await;

    info!("shutdown phase 3: closing kernel queues");
    destroy_queues(&queues).await;

    if let Some(handle) = http_handle {
        info!("shutdown phase 4: draining HTTP connections");
        let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, handle).await;
    }

    info!("agent stopped");
    Ok(())
}

/// Open every configured queue. If one fails, the ones already open are
/// destroyed before the error is returned.
async fn open_queues(
    config: &AgentConfig,
    options: QueueOptions,
    metrics: &Arc<dyn MetricsPort>,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<Arc<InterceptionQueue>>> {
    let factory = Arc::new(NfQueueFactory) as Arc<dyn QueueSocketFactory>;
    let mut queues = Vec::with_capacity(config.interception.queues.len());

    for queue_config in config.interception.queue_configs() {
        let label = queue_config.label();
        match InterceptionQueue::open(
            Arc::clone(&factory),
            queue_config,
            options,
            Arc::clone(metrics),
            cancel,
        ) {
            Ok(queue) => queues.push(queue),
            Err(e) => {
                error!(queue = %label, error = %e, "failed to open interception queue");
                destroy_queues(&queues).await;
                return Err(anyhow::anyhow!("failed to open queue {label}: {e}"));
            }
        }
    }
    Ok(queues)
}

/// Install every rule set. On failure, the sets already installed and the
/// failing one are removed again.
fn install_rules(
    installer: &impl RuleInstallerPort,
    sets: Vec<RuleSet>,
) -> anyhow::Result<Vec<RuleSet>> {
    for (i, set) in sets.iter().enumerate() {
        if let Err(e) = installer.install(set) {
            error!(family = %set.family, error = %e, "firewall rule installation failed");
            for installed in &sets[..=i] {
                if let Err(cleanup) = installer.remove(installed) {
                    warn!(family = %installed.family, error = %cleanup, "cleanup after failed install incomplete");
                }
            }
            return Err(e.into());
        }
    }
    Ok(sets)
}

async fn destroy_queues(queues: &[Arc<InterceptionQueue>]) {
    for queue in queues {
        if !queue.shutdown(PENDING_VERDICT_TIMEOUT).await {
            warn!(
                queue = %queue.label(),
                pending = queue.pending_verdicts(),
                "closed with verdicts still in flight"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use domain::common::entity::AddressFamily;
    use domain::common::error::DomainError;

    #[derive(Default)]
    struct FakeInstaller {
        fail_family: Option<AddressFamily>,
        log: Mutex<Vec<String>>,
    }

    impl RuleInstallerPort for FakeInstaller {
        fn install(&self, rules: &RuleSet) -> Result<(), DomainError> {
            self.log.lock().unwrap().push(format!("install {}", rules.family));
            if self.fail_family == Some(rules.family) {
                return Err(DomainError::RuleInstall("boom".to_string()));
            }
            Ok(())
        }

        fn remove(&self, rules: &RuleSet) -> Result<(), DomainError> {
            self.log.lock().unwrap().push(format!("remove {}", rules.family));
            Ok(())
        }
    }

    fn rule_sets() -> Vec<RuleSet> {
        AgentConfig::default().interception.rule_sets().unwrap()
    }

    #[test]
    fn install_rules_installs_every_family() {
        let installer = FakeInstaller::default();
        let sets = install_rules(&installer, rule_sets()).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(
            *installer.log.lock().unwrap(),
            vec!["install ipv4".to_string(), "install ipv6".to_string()]
        );
    }

    #[test]
    fn failed_install_rolls_back_every_family_touched() {
        let installer = FakeInstaller {
            fail_family: Some(AddressFamily::Ipv6),
            ..FakeInstaller::default()
        };
        let err = install_rules(&installer, rule_sets()).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(
            *installer.log.lock().unwrap(),
            vec![
                "install ipv4".to_string(),
                "install ipv6".to_string(),
                "remove ipv4".to_string(),
                "remove ipv6".to_string(),
            ]
        );
    }
}
