//! Reconnaissance engine demo application
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::path::PathBuf;

use log::{error, info, warn};

use structopt::StructOpt;

use shadow::prelude::*;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "wlan0")]
    /// WiFi interface to drive
    pub interface: String,

    #[structopt(long, default_value = "passive")]
    /// Operation mode (passive, capture, drop)
    pub mode: String,

    #[structopt(long, use_delimiter = true)]
    /// Channels to hop, comma separated (defaults to 1,6,11 + low 5GHz)
    pub channels: Vec<u8>,

    #[structopt(long, default_value = "500ms")]
    /// Channel hop interval
    pub hop_interval: humantime::Duration,

    #[structopt(long)]
    /// Skip the setup AP and scan immediately
    pub no_setup: bool,

    #[structopt(long)]
    /// Randomize the interface MAC address before starting
    pub randomize_mac: bool,

    #[structopt(long, default_value = "captures")]
    /// Directory for handshake captures
    pub captures_dir: PathBuf,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_ignore_str("tokio")
        .build();
    let _ = simplelog::SimpleLogger::init(opts.log_level, log_cfg);

    info!("Starting shadow-recon");

    let mode = Mode::parse(&opts.mode)?;

    let mut config = Config::default();
    config.scan.interface = opts.interface.clone();
    config.scan.hop_interval_ms = opts.hop_interval.as_millis() as u64;
    if !opts.channels.is_empty() {
        config.scan.channels_2g = opts.channels.clone();
        config.scan.channels_5g = Vec::new();
    }
    config.autostart.mode = mode;
    config.ap.enabled = !opts.no_setup;
    config.capture.captures_dir = opts.captures_dir.clone();

    let source = LiveSource::new();
    let injector = MonitorInjector::new();

    // Single-threaded cooperative runtime
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let mut radio = IwRadio::new(opts.interface.clone());

        match IwRadio::list_interfaces().await {
            Ok(interfaces) if !interfaces.contains(&opts.interface) => {
                warn!(
                    "Interface {} not found (available: {:?})",
                    opts.interface, interfaces
                );
            }
            _ => (),
        }

        if !radio.check_nexutil().await {
            warn!("Nexmon not detected, firmware monitor fallback unavailable");
        }

        if opts.randomize_mac {
            match radio.randomize_mac().await {
                Ok(mac) => info!("Interface MAC randomized to {}", mac),
                Err(e) => warn!("MAC randomization failed: {}", e),
            }
        }

        let orchestrator = Orchestrator::new(config, radio, source, injector, SystemTimer::new());

        if let Err(e) = orchestrator.initialize().await {
            error!("Initialization failed: {}", e);
            return Err(anyhow::anyhow!("init error: {}", e));
        }

        // Without a setup phase, go straight to scanning
        if orchestrator.state() == DeviceState::Idle {
            orchestrator.start_scanning().await?;
        }

        let status_loop = async {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;

                let status = orchestrator.status();
                info!(
                    "[{}] aps: {} clients: {} probes: {} handshakes: {} ch: {:?}",
                    status.state,
                    status.ap_count,
                    status.client_count,
                    status.probe_count,
                    status.handshake_count,
                    status.channel,
                );
            }
        };

        tokio::select! {
            _ = orchestrator.run() => {
                info!("Orchestrator exited ({})", orchestrator.state());
            }
            _ = status_loop => (),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = orchestrator.stop().await;
            }
        }

        Ok(())
    })
}
