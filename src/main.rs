use anyhow::Result;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use modbus_server_rust::cli::{build_cli, handle_subcommands};
use modbus_server_rust::services::{open_port, RtuServer};
use modbus_server_rust::{Config, MemoryDevice, ModbusServer};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = build_cli().get_matches();
    let config = Config::from_matches(&matches)?;

    if handle_subcommands(&matches, &config)? {
        return Ok(());
    }

    config.validate()?;
    info!("🖥️  Modbus RTU server v{}", modbus_server_rust::VERSION);

    let device = MemoryDevice::from_config(&config.registers);
    let server = ModbusServer::new(config.server.device_id, device)?
        .with_broadcast(config.server.accept_broadcast);
    let port = open_port(&config)?;
    let mut rtu = RtuServer::new(port, server);

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Ctrl+C received, shutting down"),
            Err(e) => error!("❌ Cannot listen for Ctrl+C: {}", e),
        }
        signal_flag.store(true, Ordering::SeqCst);
    });

    // The serial port blocks, keep it off the async workers.
    let worker = tokio::task::spawn_blocking(move || {
        let result = rtu.run(&shutdown);
        rtu.stats().log_summary();
        result
    });

    worker.await??;
    Ok(())
}
