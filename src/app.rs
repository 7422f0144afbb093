//! Top-level wiring: owns the long-lived handles (register bank, state,
//! event bus) and spawns the four concurrent tasks that stand in for the
//! design's four OS threads (§5).

use crate::config::Config;
use crate::event_bus::EventBusClient;
use crate::logging::{get_logger, init_logging, watch_kernel_log_level};
use crate::registers::RegisterBank;
use crate::state::AppState;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Runs the reflector until the process receives a shutdown signal.
pub async fn run(config: Config) -> crate::error::Result<()> {
    init_logging(&config.logging)?;
    let logger = get_logger("app");
    logger.info("EVSE Modbus reflector starting up");

    let kernel_loglevel_path = PathBuf::from(config.logging.kernel_loglevel_path.clone());
    let kernel_poll = Duration::from_millis(config.logging.kernel_loglevel_poll_ms);
    tokio::spawn(async move {
        watch_kernel_log_level(&kernel_loglevel_path, kernel_poll).await;
    });

    let bank = Arc::new(RegisterBank::new());
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<crate::event_bus::Command>();

    let initial_state = crate::coldstart::run(&config, &bank, &command_tx).await;
    let state = Arc::new(Mutex::new(initial_state));

    // The event bus is owned by two halves: the sending half drains the
    // command channel fed by T-modbus and T-failsafe; the receiving half
    // feeds the ingest router. §5: "send and recv on separate halves."
    let sender_config = config.event_bus.clone();
    tokio::spawn(async move {
        let mut client = EventBusClient::new(&sender_config);
        while let Some(command) = command_rx.recv().await {
            client.send_with_reconnect(&command).await;
        }
    });

    let ingest_state = state.clone();
    let ingest_bank = bank.clone();
    let ingest_config = config.clone();
    tokio::spawn(async move {
        let mut client = EventBusClient::new(&ingest_config.event_bus);
        loop {
            let msg = client.receive_with_reconnect().await;
            crate::ingest::handle_message(&msg, &ingest_state, &ingest_bank, &ingest_config);
        }
    });

    let datetime_bank = bank.clone();
    let tick = Duration::from_secs(config.watchdog.tick_interval_seconds);
    tokio::spawn(async move {
        crate::watchdog::run_datetime_task(datetime_bank, tick).await;
    });

    let session_bank = bank.clone();
    let session_state = state.clone();
    tokio::spawn(async move {
        crate::watchdog::run_session_task(session_bank, session_state, tick).await;
    });

    let failsafe_bank = bank.clone();
    let failsafe_state = state.clone();
    let failsafe_commands = command_tx.clone();
    let failsafe_config = config.watchdog.clone();
    tokio::spawn(async move {
        crate::watchdog::run_failsafe_task(failsafe_bank, failsafe_state, failsafe_commands, failsafe_config)
            .await;
    });

    let modbus_bank = bank.clone();
    let modbus_commands = command_tx.clone();
    let bind_address = config.modbus.bind_address.clone();
    let port = config.modbus.port;
    let modbus_handle = tokio::spawn(async move {
        crate::modbus_server::run(&bind_address, port, modbus_bank, modbus_commands).await
    });

    tokio::select! {
        result = modbus_handle => {
            match result {
                Ok(Ok(())) => logger.info("Modbus server exited normally"),
                Ok(Err(e)) => logger.error(&format!("Modbus server exited with error: {e}")),
                Err(e) => logger.error(&format!("Modbus server task panicked: {e}")),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            logger.info("received shutdown signal");
        }
    }

    Ok(())
}
