//! # EVSE Modbus Reflector
//!
//! The Modbus TCP personality of an EV charging station: a register map
//! reflecting live operational state to external energy-management
//! clients, a Modbus TCP server, an event-bus ingest pipeline, and a
//! failsafe/watchdog loop that reverts the commanded current when the
//! client stops refreshing its alive register.
//!
//! ## Architecture
//!
//! - `config`: configuration loading and validation
//! - `logging`: structured logging, daily rotation, kernel loglevel watch
//! - `error`: crate-wide error type
//! - `registers`: the register map (C1)
//! - `modbus_server`: the Modbus TCP server (C2)
//! - `event_bus`: the event-bus IPC endpoint (C3)
//! - `state`: typed domain state (C4)
//! - `ingest`: the inbound message router (C5)
//! - `watchdog`: the date/time, session, and failsafe loops (C6)
//! - `coldstart`: the boot-time SQLite loader (C7)
//! - `app`: top-level wiring of the above into the running process

pub mod app;
pub mod coldstart;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod ingest;
pub mod logging;
pub mod modbus_server;
pub mod registers;
pub mod state;
pub mod watchdog;

pub use config::Config;
pub use error::{EvseError, Result};
