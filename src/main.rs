// src/main.rs - Warmplate host entry point
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use warmplate::clock::SoftRtc;
use warmplate::config;
use warmplate::control::ControlLoop;
use warmplate::hardware::SimulatedPlate;
use warmplate::scheduler::Scheduler;
use warmplate::web::api::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "warmplate", about = "Heated-plate controller host")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(default_value = "warmplate.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting Warmplate host");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    tracing::info!("Loading configuration from: {}", args.config);

    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Target range {}..={} C, hard limit {} C",
        config.control.temp_min,
        config.control.temp_max,
        config.control.hard_limit
    );
    tracing::info!(
        "PID: Kp={:.2}, Ki={:.2}, Kd={:.2}",
        config.pid.kp,
        config.pid.ki,
        config.pid.kd
    );
    tracing::info!(
        "Timer max {} min, preheat lead {} min",
        config.scheduler.max_heating_minutes,
        config.scheduler.preheat_minutes
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    // No hardware attached on a host build: run against the simulated plate.
    let (sensor, heater) = SimulatedPlate::pair();

    let control = ControlLoop::new(&config, Box::new(sensor), Box::new(heater));
    let control_handle = control.handle();
    control.spawn(shutdown_tx.subscribe());

    let rtc = SoftRtc::from_system_time();
    rtc.spawn(shutdown_tx.subscribe());

    let scheduler = Scheduler::new(&config, control_handle.clone(), Arc::new(rtc.clone()));
    let scheduler_handle = scheduler.handle();
    scheduler.spawn(shutdown_tx.subscribe());

    // Stand-in for the original buzzer hook: log each countdown expiry.
    let mut expiry_rx = scheduler_handle.subscribe_expiry();
    tokio::spawn(async move {
        while expiry_rx.recv().await.is_ok() {
            tracing::info!("Timer expired - heater auto-stopped");
        }
    });

    let app = api::create_router(AppState {
        control: control_handle,
        scheduler: scheduler_handle,
        rtc,
    });

    let listener = tokio::net::TcpListener::bind(&config.web.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    let _ = shutdown_tx.send(());
    Ok(())
}
