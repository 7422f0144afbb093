//! Modbus TCP server: accepts a single client, answers standard read/write
//! function codes against the register bank, and detects writes to the
//! three control registers so they can be re-published onto the event bus.
//!
//! Grounded in `tokio_modbus::server::{Service, tcp::Server}`'s accept /
//! serve pattern: the library's `Request` enum it hands `Service::call` IS
//! the "raw request" the design calls for inspecting, so there is no
//! separate wire-level decode step here.

use crate::error::Result;
use crate::event_bus::Command;
use crate::logging::get_logger;
use crate::registers::{RegisterBank, CHARGING_CURRENT, FAILSAFE_CURRENT, FAILSAFE_TIMEOUT};
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

/// Holding addresses whose writes are re-published as commands, paired
/// with the constructor that turns a post-write value into a [`Command`].
fn control_command_for(addr: u16, value: u16) -> Option<Command> {
    match addr {
        FAILSAFE_CURRENT => Some(Command::failsafe_current(value)),
        FAILSAFE_TIMEOUT => Some(Command::failsafe_timeout(value)),
        CHARGING_CURRENT => Some(Command::modbus_tcp_current(value)),
        _ => None,
    }
}

/// Per-connection `Service` implementation. Holds the permit that enforces
/// `MAX_CONNECTION = 1`; dropping the service (connection end) releases it.
struct ReflectorService {
    bank: Arc<RegisterBank>,
    commands: mpsc::UnboundedSender<Command>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl ReflectorService {
    fn publish_if_control(&self, addr: u16, value: u16) {
        if let Some(cmd) = control_command_for(addr, value) {
            let _ = self.commands.send(cmd);
        }
    }

    fn publish_range_if_control(&self, addr: u16, values: &[u16]) {
        for (i, &value) in values.iter().enumerate() {
            self.publish_if_control(addr.wrapping_add(i as u16), value);
        }
    }
}

impl tokio_modbus::server::Service for ReflectorService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = Exception;
    type Future =
        std::pin::Pin<Box<dyn future::Future<Output = Result<Response, Exception>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let bank = self.bank.clone();
        let result = match req {
            Request::ReadInputRegisters(addr, count) => bank
                .read_input_range(addr, count)
                .map(Response::ReadInputRegisters)
                .ok_or(Exception::IllegalDataAddress),
            Request::ReadHoldingRegisters(addr, count) => bank
                .read_holding_range(addr, count)
                .map(Response::ReadHoldingRegisters)
                .ok_or(Exception::IllegalDataAddress),
            Request::WriteSingleRegister(addr, value) => {
                match bank.apply_write_single_holding(addr, value) {
                    Some(written) => {
                        self.publish_if_control(addr, written);
                        Ok(Response::WriteSingleRegister(addr, written))
                    }
                    None => Err(Exception::IllegalDataAddress),
                }
            }
            Request::WriteMultipleRegisters(addr, values) => {
                match bank.apply_write_multiple_holding(addr, &values) {
                    Some(written) => {
                        self.publish_range_if_control(addr, &written);
                        Ok(Response::WriteMultipleRegisters(addr, values.len() as u16))
                    }
                    None => Err(Exception::IllegalDataAddress),
                }
            }
            Request::ReadWriteMultipleRegisters(read_addr, read_count, write_addr, values) => {
                match bank.apply_write_multiple_holding(write_addr, &values) {
                    Some(written) => {
                        self.publish_range_if_control(write_addr, &written);
                        match bank.read_holding_range(read_addr, read_count) {
                            Some(read_values) => Ok(Response::ReadWriteMultipleRegisters(read_values)),
                            None => Err(Exception::IllegalDataAddress),
                        }
                    }
                    None => Err(Exception::IllegalDataAddress),
                }
            }
            _ => Err(Exception::IllegalFunction),
        };
        Box::pin(future::ready(result))
    }
}

/// Runs the Modbus TCP server until the process is shut down. Owns the
/// forwarding of control-register writes onto the event bus via a channel
/// so the library's per-connection service stays synchronous.
pub async fn run(
    bind_address: &str,
    port: u16,
    bank: Arc<RegisterBank>,
    commands: mpsc::UnboundedSender<Command>,
) -> Result<()> {
    let logger = get_logger("modbus_server");
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(|e| crate::error::EvseError::modbus(format!("invalid bind address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| crate::error::EvseError::modbus(format!("bind failed: {e}")))?;
    let server = Server::new(listener);
    let connection_slot = Arc::new(Semaphore::new(1));

    logger.info(&format!("Modbus TCP server listening on {addr}"));

    let on_connected = move |stream: tokio::net::TcpStream, peer: SocketAddr| {
        let bank = bank.clone();
        let commands = commands.clone();
        let connection_slot = connection_slot.clone();
        async move {
            match connection_slot.try_acquire_owned() {
                Ok(permit) => accept_tcp_connection(stream, peer, move |_client_addr| {
                    Ok(Some(ReflectorService {
                        bank: bank.clone(),
                        commands: commands.clone(),
                        _permit: permit,
                    }))
                }),
                Err(_) => {
                    tracing::warn!("refusing connection from {peer}: one client already active");
                    Ok(None)
                }
            }
        }
    };

    let on_process_error = move |err: std::io::Error| {
        tracing::warn!("Modbus TCP connection error: {err}");
    };

    server
        .serve(&on_connected, on_process_error)
        .await
        .map_err(|e| crate::error::EvseError::modbus(format!("server loop exited: {e}")))
}
