//! OCPP central system server binary.
//!
//! Reads configuration from TOML (`CSMS_CONFIG` or
//! `~/.config/gridlink-csms/config.toml`), wires the session layer,
//! engines, and workers, and serves the OCPP WebSocket endpoint until
//! SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use gridlink_csms::application::commands::CommandService;
use gridlink_csms::application::events::EventPublisher;
use gridlink_csms::application::handlers::{Dispatcher, HandlerContext};
use gridlink_csms::application::services::{
    AuthorizationService, ChargePointService, FirmwareManager, HeartbeatWatchdog, ProfileLedger,
    TransactionEngine, V2gEngine,
};
use gridlink_csms::application::session::SessionRegistry;
use gridlink_csms::config::{default_config_path, AppConfig};
use gridlink_csms::infrastructure::{
    build_acceptor, BroadcastBus, MemoryCache, MemoryChargerRepo, MemoryTransactionRepo,
    MemoryUserRepo, TariffOracle,
};
use gridlink_csms::interfaces::ws::OcppServer;
use gridlink_csms::support::shutdown::ShutdownCoordinator;

/// TTL of cached id-token resolutions.
const AUTHORIZATION_CACHE_TTL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("CSMS_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(config) => {
            init_tracing(&config.logging.level);
            info!("Configuration loaded from {}", config_path.display());
            config
        }
        Err(e) => {
            let config = AppConfig::default();
            init_tracing(&config.logging.level);
            error!("Failed to load config: {}. Using defaults.", e);
            config
        }
    };

    info!("Starting GridLink OCPP central system...");

    // ── Prometheus metrics recorder ────────────────────────────
    if config.metrics.enabled {
        let scrape_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(scrape_addr)
            .install()
            .expect("Failed to install Prometheus metrics recorder");
        info!("Prometheus scrape endpoint on http://{}/metrics", scrape_addr);
    }

    // ── Shutdown coordination ──────────────────────────────────
    let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout_s);
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    // ── Collaborator ports (in-memory reference implementations) ──
    let chargers = MemoryChargerRepo::shared();
    let transactions = MemoryTransactionRepo::shared();
    let users: Arc<MemoryUserRepo> = Arc::new(MemoryUserRepo::new());
    let cache = MemoryCache::shared();
    cache.start_sweeper(shutdown_signal.clone());
    let bus = BroadcastBus::shared();
    let pricing_oracle = Arc::new(TariffOracle::new(config.pricing_config()));

    // ── Application wiring ─────────────────────────────────────
    let publisher = EventPublisher::new(bus.clone());
    let charge_points = ChargePointService::new(chargers.clone());
    let authorization =
        AuthorizationService::new(users, cache.clone(), AUTHORIZATION_CACHE_TTL);
    let profiles = Arc::new(ProfileLedger::new());

    let registry = SessionRegistry::shared(config.security.reconnect_debounce_s);
    let commands = CommandService::new(registry.clone());

    let transaction_engine = TransactionEngine::new(
        transactions,
        charge_points.clone(),
        authorization.clone(),
        publisher.clone(),
        profiles.clone(),
        config.pricing_config(),
    );

    let v2g = V2gEngine::new(
        config.v2g_config(),
        commands.clone(),
        chargers,
        pricing_oracle,
        publisher.clone(),
        profiles,
    );
    v2g.start_price_poll(shutdown_signal.clone());
    v2g.start_site_balancer(shutdown_signal.clone(), config.v2g.rebalance_interval_s);

    let firmware = FirmwareManager::new(commands.clone(), publisher.clone());

    let dispatcher = Dispatcher::new(Arc::new(HandlerContext {
        charge_points: charge_points.clone(),
        transactions: transaction_engine,
        authorization,
        v2g: v2g.clone(),
        firmware,
        publisher: publisher.clone(),
        heartbeat_interval_s: config.ocpp.heartbeat_interval_s,
    }));

    // ── Heartbeat watchdog ─────────────────────────────────────
    HeartbeatWatchdog::new(
        registry.clone(),
        charge_points.clone(),
        Duration::from_secs(config.ocpp.heartbeat_check_interval_s),
    )
    .start(shutdown_signal.clone());

    // ── OCPP WebSocket server ──────────────────────────────────
    let mut server = OcppServer::new(
        config.server.host.clone(),
        config.server.port,
        config.security_config(),
        config.session_config(),
        dispatcher,
        registry.clone(),
        publisher,
        charge_points,
        v2g,
    )
    .with_shutdown(shutdown_signal.clone());

    if let Some(tls_settings) = config.tls_settings() {
        let acceptor = build_acceptor(&tls_settings)?;
        server = server.with_tls(acceptor);
        info!("TLS enabled for the OCPP listener");
    }

    info!("Server started. Press Ctrl+C to shutdown gracefully.");

    let server_task = tokio::spawn(async move { server.run().await });

    match server_task.await {
        Ok(Ok(())) => info!("OCPP server stopped"),
        Ok(Err(e)) => error!("OCPP server error: {}", e),
        Err(e) => error!("OCPP server task panicked: {}", e),
    }

    registry.close_all("process exit");
    info!("GridLink central system shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
