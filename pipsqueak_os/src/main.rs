// src/main.rs
mod client;
mod clock;
mod config;
mod controller;
mod crypto;
mod errors;
mod indicators;
mod net;
mod sensors;
mod state;

use std::net::SocketAddr;

use anyhow::Result;
use pipsqueak_protocol::{ProtocolKind, RequestSet};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::errors::DeviceError;
use crate::net::Transport;

#[tokio::main]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pipsqueak_os=info".parse().unwrap())
                .add_directive("pipsqueak_protocol=info".parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap()),
        )
        .compact()
        .init();

    // -------- config + crypto ----------
    let cfg = config::Cli::parse_and_build_config()?;
    let crypto = crypto::Crypto::from_config(&cfg)?;
    let server = resolve(&cfg.server_addr()).await?;
    info!(?cfg, %server, "Pipsqueak starting");
    info!(
        event = "wifi",
        ssid = %cfg.wifi_ssid,
        secured = !cfg.wifi_password.is_empty(),
        "network association is left to the host"
    );

    // -------- simulated hardware ----------
    let plant = sensors::sim::Plant::shared(cfg.ambient);
    let bus = sensors::sim::SimulatedBus::new(plant.clone(), cfg.board_sensor_address);
    let outputs = sensors::sim::PlantOutputs::new(plant);

    // -------- requests, announced at boot ----------
    let mut requests = RequestSet::new(cfg.device_id, crypto.engine());
    requests.reboot.report_normal_reboot();
    requests.setpoint.set_reboot();

    let poll_period = Duration::from_millis(cfg.poll_ms);
    let mut state = state::DeviceState::new(cfg, Box::new(clock::SystemClock::new()));
    let mut controller = controller::Controller::new(outputs);
    let mut sensors = sensors::SensorService::new(bus);
    let mut indicators = indicators::Indicators::new();
    let mut session = client::Session::new(net::tcp::TcpTransport::new(), server, requests);
    session.enqueue(ProtocolKind::Setpoint);
    session.enqueue(ProtocolKind::ReportReboot);

    let mut ticker = time::interval(poll_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Pipsqueak running. Press Ctrl+C to stop…");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // -------- main loop ----------
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let wifi_up = session.transport().link_up();
                state.set_wifi_connected(wifi_up);
                state.poll(wifi_up);
                sensors.poll(&mut state);
                controller.poll(&mut state);
                session.poll(&mut state);
                indicators.poll(&state, wifi_up);
            }
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(?e, "failed to install Ctrl+C handler");
                }
                break;
            }
        }
    }

    info!(
        event = "shutdown",
        pending_events = state.status_event_depth(),
        session = ?session.phase(),
        controller = ?controller.mode(state.millis()),
        "shutdown signal received; exiting."
    );
    Ok(())
}

async fn resolve(addr: &str) -> Result<SocketAddr, DeviceError> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| DeviceError::Config(format!("server address {addr} did not resolve")))
}
