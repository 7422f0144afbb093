//! Event bus endpoint: the dealer-style IPC connection to the station's
//! internal message bus.
//!
//! Messages are newline-delimited JSON documents over a Unix domain
//! socket. The server thread (C2) only sends; the ingest thread (C5) only
//! receives, matching §5's "send and recv on separate halves" discipline.
//! A dropped socket is reopened with backoff rather than killing the
//! owning task, following the same reconnect shape as the teacher's
//! `ModbusConnectionManager::execute_with_reconnect`.

use crate::config::EventBusConfig;
use crate::error::{EvseError, Result};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

/// An inbound event message: a `type` discriminator plus a free-form
/// payload, exactly as the ingest router expects it (§4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub msg_type: Value,
    #[serde(flatten)]
    pub payload: Value,
}

/// A command published by the core back onto the bus (§4.3).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "failsafeCurrent")]
    FailsafeCurrent { data: AmpsPayload },
    #[serde(rename = "failsafeTimeout")]
    FailsafeTimeout { data: SecondsPayload },
    #[serde(rename = "modbusTcpCurrent")]
    ModbusTcpCurrent { data: AmpsPayload },
    #[serde(rename = "GeneralStatus")]
    GeneralStatus {},
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AmpsPayload {
    pub value: u16,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SecondsPayload {
    pub value: u16,
}

impl Command {
    pub fn failsafe_current(value: u16) -> Self {
        Command::FailsafeCurrent {
            data: AmpsPayload { value },
        }
    }

    pub fn failsafe_timeout(value: u16) -> Self {
        Command::FailsafeTimeout {
            data: SecondsPayload { value },
        }
    }

    pub fn modbus_tcp_current(value: u16) -> Self {
        Command::ModbusTcpCurrent {
            data: AmpsPayload { value },
        }
    }

    pub fn general_status() -> Self {
        Command::GeneralStatus {}
    }
}

/// A connected dealer-style endpoint. Reads go through a line-framed
/// reader; writes are flushed raw newline-terminated JSON since the
/// endpoint never needs to read-and-write in the same call.
pub struct EventBusClient {
    config: EventBusConfig,
    reader: Option<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: Option<OwnedWriteHalf>,
    logger: crate::logging::StructuredLogger,
}

impl EventBusClient {
    pub fn new(config: &EventBusConfig) -> Self {
        Self {
            config: config.clone(),
            reader: None,
            writer: None,
            logger: get_logger("event_bus"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some() && self.writer.is_some()
    }

    /// Open the Unix domain socket and announce the client identity.
    pub async fn connect(&mut self) -> Result<()> {
        let stream = UnixStream::connect(&self.config.socket_path)
            .await
            .map_err(|e| {
                EvseError::event_bus(format!(
                    "failed to connect to {}: {}",
                    self.config.socket_path, e
                ))
            })?;
        let (read_half, mut write_half) = stream.into_split();
        let identity = serde_json::json!({"type": "identity", "client_id": self.config.client_id});
        let mut line = identity.to_string();
        line.push('\n');
        write_half
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EvseError::event_bus(format!("failed to send identity: {}", e)))?;

        self.reader = Some(FramedRead::new(read_half, LinesCodec::new()));
        self.writer = Some(write_half);
        self.logger.info("Connected to event bus");
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    /// Send a command, reconnecting with backoff on transient failure.
    /// TransientIO per §7: logged, non-fatal, never propagated past this call.
    pub async fn send_with_reconnect(&mut self, command: &Command) {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        loop {
            if !self.is_connected() {
                if let Err(e) = self.connect().await {
                    self.logger.error(&format!("reconnect failed: {}", e));
                    sleep(delay).await;
                    continue;
                }
            }
            match self.send(command).await {
                Ok(()) => return,
                Err(e) => {
                    self.logger
                        .warn(&format!("send failed, will reconnect: {}", e));
                    self.disconnect().await;
                    sleep(delay).await;
                }
            }
        }
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EvseError::event_bus("not connected"))?;
        let mut line =
            serde_json::to_string(command).map_err(|e| EvseError::event_bus(e.to_string()))?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EvseError::event_bus(e.to_string()))
    }

    /// Receive the next inbound message, reconnecting with backoff if the
    /// socket has dropped.
    pub async fn receive_with_reconnect(&mut self) -> InboundMessage {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        loop {
            if !self.is_connected() {
                if let Err(e) = self.connect().await {
                    self.logger.error(&format!("reconnect failed: {}", e));
                    sleep(delay).await;
                    continue;
                }
            }
            match self.receive().await {
                Ok(Some(msg)) => return msg,
                Ok(None) => {
                    self.logger.warn("event bus closed, reconnecting");
                    self.disconnect().await;
                    sleep(delay).await;
                }
                Err(e) => {
                    self.logger.warn(&format!("receive failed: {}", e));
                    self.disconnect().await;
                    sleep(delay).await;
                }
            }
        }
    }

    async fn receive(&mut self) -> Result<Option<InboundMessage>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| EvseError::event_bus("not connected"))?;
        match reader.next().await {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    return Ok(None);
                }
                match serde_json::from_str::<InboundMessage>(&line) {
                    Ok(msg) => Ok(Some(msg)),
                    Err(e) => {
                        self.logger
                            .warn(&format!("dropping malformed message: {}", e));
                        Ok(None)
                    }
                }
            }
            Some(Err(e)) => Err(EvseError::event_bus(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_type_tag() {
        let cmd = Command::failsafe_current(10);
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "failsafeCurrent");
        assert_eq!(json["data"]["value"], 10);
    }

    #[test]
    fn general_status_has_no_payload_fields() {
        let cmd = Command::general_status();
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "GeneralStatus");
    }

    #[test]
    fn inbound_message_parses_type_and_payload() {
        let raw = r#"{"type":"StatusNotification","status":"Charging","vendorErrorCode":0}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, Value::String("StatusNotification".to_string()));
        assert_eq!(msg.payload["status"], "Charging");
    }
}
