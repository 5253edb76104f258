/**
 * GIGGLE ROUTER - Entry point
 *
 * ROLE: Wires configuration, the OSC listener, haptic zones, the timeout
 * watchdog, the console display and the OSCQuery service, then runs until
 * Ctrl+C or Enter.
 *
 * STARTUP: any configuration error or conflicting parameter type aborts the
 * process before a single datagram is read.
 */

mod algorithms;
mod config;
mod models;
mod oscquery;
mod parameter;
mod router;
mod telemetry;
mod transport;
mod zone;

use crate::config::{load_zone_configs, RouterSettings, ZoneConfig};
use crate::oscquery::OscQueryService;
use crate::router::{Router, RouterError};
use crate::telemetry::{ConsoleDisplay, SharedTelemetry, TraceTelemetry};
use crate::transport::UdpMotorSender;
use crate::zone::{HapticZone, ZoneDeps};

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DISPLAY_REFRESH: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stderr keeps stdout free for the display
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = RouterSettings::from_env().context("invalid process settings")?;
    let configs = load_zone_configs(&settings.config_path)
        .await
        .with_context(|| format!("cannot load zones from {}", settings.config_path.display()))?;
    info!(zones = configs.len(), path = %settings.config_path.display(), "configuration loaded");

    let socket = transport::bind_listener(settings.bind_ip, settings.osc_port)
        .await
        .context("cannot bind OSC socket")?;
    let osc_addr = socket.local_addr()?;
    let http = TcpListener::bind((settings.bind_ip, settings.oscquery_port))
        .await
        .context("cannot bind OSCQuery listener")?;
    let http_addr = http.local_addr()?;

    let oscquery =
        OscQueryService::new(settings.service_name.clone(), osc_addr.ip(), osc_addr.port());
    let display = settings.display.then(|| Arc::new(ConsoleDisplay::new()));
    let telemetry: SharedTelemetry = match &display {
        Some(d) => d.clone(),
        None => Arc::new(TraceTelemetry),
    };
    let deps = ZoneDeps {
        sender: Arc::new(UdpMotorSender::bind().context("cannot bind motor socket")?),
        telemetry,
    };

    let mut router = Router::new(Arc::new(oscquery.clone()));
    let zones = build_zones(&configs, &deps, &mut router)?;
    for (address, value_type) in router.addresses() {
        info!(address, %value_type, "accepting");
    }
    let router = Arc::new(router);

    let listener = transport::spawn_osc_listener(socket, router);
    let watchdog = zone::spawn_timeout_watchdog(zones.clone(), zone::POLL_INTERVAL);

    if let Some(display) = &display {
        display.set_header(vec![
            settings.service_name.clone(),
            format!("OSCQuery service active at http://{http_addr}"),
            format!("Listening for OSC packets on port {}", osc_addr.port()),
        ]);
        display.spawn_refresh(DISPLAY_REFRESH);
    }

    let app = oscquery.router();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(http, app).await {
            error!("OSCQuery server stopped: {e}");
        }
    });

    info!(osc = %osc_addr, oscquery = %http_addr, "router running");
    wait_for_exit().await;

    info!("shutting down");
    listener.abort();
    watchdog.abort();
    server.abort();
    Ok(())
}

/// One zone per config entry, all bound to `router`.
fn build_zones(
    configs: &[ZoneConfig],
    deps: &ZoneDeps,
    router: &mut Router,
) -> Result<Vec<Arc<HapticZone>>, RouterError> {
    configs.iter().map(|config| HapticZone::build(config, deps, router)).collect()
}

async fn wait_for_exit() {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
        _ = stdin.next_line() => info!("Enter pressed"),
    }
}
