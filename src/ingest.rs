//! Ingest router: consumes inbound event-bus messages, mutates the state
//! model, then derives the register writes each message implies.
//!
//! Grounded in the original `ChargeStation::updateStation`'s
//! dispatch-on-`type` shape: unknown types are dropped silently, a
//! non-string `type` is dropped with a warning, and within a single
//! message the state mutation always precedes its register writes.

use crate::config::Config;
use crate::event_bus::InboundMessage;
use crate::logging::get_logger;
use crate::registers::{
    self, RegisterBank, ACTIVE_POWER_L1, ACTIVE_POWER_L2, ACTIVE_POWER_L3, ACTIVE_POWER_TOTAL,
    CABLE_MAX_CURRENT, CABLE_STATE, CHARGEPOINT_ID, CHARGEPOINT_POWER, CHARGEPOINT_STATE,
    CHARGING_STATE, CURRENT_L1, CURRENT_L2, CURRENT_L3, EQUIPMENT_STATE, EVSE_FAULT_CODE,
    EVSE_MAX_CURRENT, EVSE_MIN_CURRENT, METER_READING, NUMBER_OF_PHASES, SERIAL_NUMBER,
    SESSION_ENERGY, SESSION_END_TIME, SESSION_MAX_CURRENT, SESSION_START_TIME, VOLTAGE_L1,
    VOLTAGE_L2, VOLTAGE_L3,
};
use crate::state::{AppState, ChargePointStatus, SessionStatus, StationStatus};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Dispatches one inbound message, updating `state` and then `bank`.
/// Returns nothing: every failure mode in §4.5/§7 is drop-and-log, never
/// propagated.
pub fn handle_message(
    msg: &InboundMessage,
    state: &Arc<Mutex<AppState>>,
    bank: &RegisterBank,
    config: &Config,
) {
    let logger = get_logger("ingest");

    let msg_type = match &msg.msg_type {
        Value::String(s) => s.as_str(),
        _ => {
            logger.warn("received invalid msg type");
            return;
        }
    };
    logger.debug(&format!("received: {}", msg_type));

    match msg_type {
        "StatusNotification" => handle_status_notification(msg, state, bank),
        "MeterValues" => handle_meter_values(msg, state, bank),
        "pilotState" => handle_pilot_state(msg, state, bank),
        "proximityState" => handle_proximity_state(msg, state, bank),
        "ChargeStationStatusNotification" => handle_station_status(msg, state, bank),
        "ChargeSessionStatus" => handle_session_status(msg, state, bank),
        "serialNumber" => handle_serial_number(msg, state, bank),
        "phaseType" => handle_phase_type(msg, state, bank),
        "powerOptimizer" => handle_power_optimizer(msg, state),
        "powerOptimizerLimits" => handle_power_optimizer_limits(msg, state),
        "ocppUpdate" => handle_ocpp_update(state, bank, config),
        "AuthorizationStatus" => handle_authorization_status(msg, state),
        "currentOfferedEv" => handle_current_offered_ev(msg, state, bank),
        "minCurrent" => handle_min_current(msg, state, bank),
        "maximumCurrent" => handle_max_current(msg, state, bank),
        "proximityPilotCurrent" => handle_proximity_pilot_current(msg, state, bank),
        other => logger.debug(&format!("ignoring unknown message type: {}", other)),
    }
}

fn str_field<'a>(msg: &'a InboundMessage, field: &str) -> Option<&'a str> {
    msg.payload.get(field).and_then(Value::as_str)
}

fn u64_field(msg: &InboundMessage, field: &str) -> Option<u64> {
    msg.payload.get(field).and_then(Value::as_u64)
}

fn i64_field(msg: &InboundMessage, field: &str) -> Option<i64> {
    msg.payload.get(field).and_then(Value::as_i64)
}

fn u16_field(msg: &InboundMessage, field: &str) -> Option<u16> {
    msg.payload
        .get(field)
        .and_then(Value::as_u64)
        .map(|v| v as u16)
}

fn write_equipment_and_charge_state(state: &AppState, bank: &RegisterBank) {
    bank.write_ro_u16(
        CHARGEPOINT_STATE,
        registers::chargepoint_state_code(state.point.status),
    );
    bank.write_ro_u16(
        CHARGING_STATE,
        registers::charging_state_code(state.point.status),
    );
    bank.write_ro_u16(
        EQUIPMENT_STATE,
        registers::equipment_state_code(state.station.status, state.point.status),
    );
}

fn handle_status_notification(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(status_str) = str_field(msg, "status") else {
        get_logger("ingest").warn("StatusNotification missing status field");
        return;
    };
    let Some(status) = ChargePointStatus::from_str(status_str) else {
        get_logger("ingest").warn(&format!("unknown ChargePointStatus: {}", status_str));
        return;
    };
    let vendor_error_code = u16_field(msg, "vendorErrorCode").unwrap_or(0);

    let snapshot = {
        let mut guard = state.lock().unwrap();
        guard.point.status = status;
        guard.point.vendor_error_code = vendor_error_code;
        guard.clone()
    };

    write_equipment_and_charge_state(&snapshot, bank);
    bank.write_ro_u16(EVSE_FAULT_CODE, vendor_error_code);
}

fn handle_station_status(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(status_str) = str_field(msg, "status") else {
        return;
    };
    let Some(status) = StationStatus::from_str(status_str) else {
        get_logger("ingest").warn(&format!("unknown ChargeStationStatus: {}", status_str));
        return;
    };
    let snapshot = {
        let mut guard = state.lock().unwrap();
        guard.station.status = status;
        guard.clone()
    };
    write_equipment_and_charge_state(&snapshot, bank);
}

fn handle_pilot_state(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(pilot) = u16_field(msg, "pilotState") else {
        return;
    };
    let pilot = pilot as u8;
    let proximity = {
        let mut guard = state.lock().unwrap();
        guard.point.pilot_state = pilot;
        guard.point.proximity_state
    };
    bank.write_ro_u16(CABLE_STATE, registers::cable_state_code(pilot, proximity));
}

fn handle_proximity_state(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(proximity) = u16_field(msg, "proximityState") else {
        return;
    };
    let proximity = proximity as u8;
    let pilot = {
        let mut guard = state.lock().unwrap();
        guard.point.proximity_state = proximity;
        guard.point.pilot_state
    };
    bank.write_ro_u16(CABLE_STATE, registers::cable_state_code(pilot, proximity));
}

fn handle_session_status(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(status_str) = str_field(msg, "status") else {
        return;
    };
    let Some(status) = SessionStatus::from_str(status_str) else {
        get_logger("ingest").warn(&format!("unknown ChargeSessionStatus: {}", status_str));
        return;
    };
    let start_time = i64_field(msg, "startTime").unwrap_or(0);
    let stop_time = i64_field(msg, "finishTime").unwrap_or(0);
    let initial_energy = u64_field(msg, "initialEnergy").unwrap_or(0);
    let last_energy = u64_field(msg, "lastEnergy").unwrap_or(0);

    {
        let mut guard = state.lock().unwrap();
        guard.session.status = status;
        guard.session.start_time = start_time;
        guard.session.stop_time = stop_time;
        guard.session.initial_energy = initial_energy;
        guard.session.last_energy = last_energy;
    }

    let phase_energy = state.lock().unwrap().point.total_active_energy_wh();
    bank.write_ro_u32(SESSION_ENERGY, phase_energy.saturating_sub(initial_energy) as u32);
    bank.write_ro_u32(SESSION_START_TIME, registers::epoch_seconds_to_hhmmss(start_time));
    bank.write_ro_u32(SESSION_END_TIME, registers::epoch_seconds_to_hhmmss(stop_time));
}

fn handle_serial_number(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(serial) = str_field(msg, "serialNumber") else {
        return;
    };
    {
        let mut guard = state.lock().unwrap();
        guard.station.serial = serial.to_string();
    }
    bank.write_ro_string(SERIAL_NUMBER, serial, registers::SERIAL_NUMBER_SPAN);
}

fn handle_phase_type(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(phases) = u16_field(msg, "phaseType") else {
        return;
    };
    {
        let mut guard = state.lock().unwrap();
        guard.station.phase_count = phases as u8;
    }
    bank.write_ro_u16(NUMBER_OF_PHASES, phases);
}

fn handle_power_optimizer(msg: &InboundMessage, state: &Arc<Mutex<AppState>>) {
    if let Some(enabled) = msg.payload.get("powerOptimizer").and_then(Value::as_bool) {
        state.lock().unwrap().station.power_optimizer = enabled;
    }
}

fn handle_power_optimizer_limits(msg: &InboundMessage, state: &Arc<Mutex<AppState>>) {
    let min = u16_field(msg, "min");
    let max = u16_field(msg, "max");
    let mut guard = state.lock().unwrap();
    if let Some(min) = min {
        guard.station.power_optimizer_min = min;
    }
    if let Some(max) = max {
        guard.station.power_optimizer_max = max;
    }
}

fn handle_ocpp_update(state: &Arc<Mutex<AppState>>, bank: &RegisterBank, config: &Config) {
    match crate::coldstart::reload_chargepoint_id(&config.persistence.webconfig_db) {
        Ok(Some(id)) => {
            {
                state.lock().unwrap().station.charge_point_id = id.clone();
            }
            bank.write_ro_string(CHARGEPOINT_ID, &id, registers::CHARGEPOINT_ID_SPAN);
        }
        Ok(None) => get_logger("ingest").warn("ocppUpdate: no chargePointId row found"),
        Err(e) => get_logger("ingest").error(&format!("ocppUpdate reload failed: {}", e)),
    }
}

fn handle_authorization_status(msg: &InboundMessage, state: &Arc<Mutex<AppState>>) {
    let Some(status_str) = str_field(msg, "status") else {
        return;
    };
    let status = match status_str {
        "Timeout" => crate::state::AuthorizationStatus::Timeout,
        "Start" => crate::state::AuthorizationStatus::Start,
        "Finish" => crate::state::AuthorizationStatus::Finish,
        other => {
            get_logger("ingest").warn(&format!("unknown AuthorizationStatus: {}", other));
            return;
        }
    };
    state.lock().unwrap().point.authorization_status = status;
}

fn handle_current_offered_ev(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(value) = u16_field(msg, "currentOfferedToEv") else {
        return;
    };
    let reason = match str_field(msg, "reason") {
        Some("NormalReason") | None => crate::state::CurrentOfferReason::NormalReason,
        Some(_) => crate::state::CurrentOfferReason::OtherReason,
    };
    {
        let mut guard = state.lock().unwrap();
        guard.point.current_offered_to_ev = value;
        guard.point.current_offer_reason = reason;
    }
    bank.write_ro_u16(SESSION_MAX_CURRENT, value);
}

fn handle_min_current(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(value) = u16_field(msg, "minCurrent") else {
        return;
    };
    state.lock().unwrap().point.min_current = value;
    bank.write_ro_u16(EVSE_MIN_CURRENT, value);
}

fn handle_max_current(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(value) = u16_field(msg, "maximumCurrent") else {
        return;
    };
    state.lock().unwrap().point.max_current = value;
    bank.write_ro_u16(EVSE_MAX_CURRENT, value);
    // CHARGEPOINT_POWER = 230 * maxCurrent, per §4.1.
    bank.write_ro_u32(CHARGEPOINT_POWER, 230 * u32::from(value));
}

fn handle_proximity_pilot_current(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(value) = u16_field(msg, "proximityPilotCurrent") else {
        return;
    };
    state.lock().unwrap().point.cable_max_current = value;
    bank.write_ro_u16(CABLE_MAX_CURRENT, value);
}

/// Round `numerator / denominator` to the nearest integer (half away from zero).
fn round_div(numerator: u64, denominator: u64) -> u32 {
    ((numerator + denominator / 2) / denominator) as u32
}

fn handle_meter_values(msg: &InboundMessage, state: &Arc<Mutex<AppState>>, bank: &RegisterBank) {
    let Some(meter_values) = msg.payload.get("meterValue").and_then(Value::as_array) else {
        return;
    };

    let mut guard = state.lock().unwrap();
    for entry in meter_values {
        let Some(samples) = entry.get("sampledValue").and_then(Value::as_array) else {
            continue;
        };
        for sample in samples {
            let Some(measurand) = sample.get("measurand").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = sample
                .get("value")
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            else {
                continue;
            };
            let phase = sample.get("phase").and_then(Value::as_str);

            match measurand {
                "Energy.Active.Import.Register" => {
                    guard.point.phases[0].active_energy_wh = value as u32;
                }
                "Current.Import" => {
                    if let Some(idx) = phase_index(phase) {
                        guard.point.phases[idx].current_a = value as u16;
                    }
                }
                "Power.Active.Import" => {
                    if let Some(idx) = phase_index(phase) {
                        guard.point.phases[idx].active_power_w = value as u32;
                    }
                }
                "Voltage" => {
                    if let Some(idx) = phase_index(phase) {
                        guard.point.phases[idx].voltage_mv = value as u32;
                    }
                }
                _ => {}
            }
        }
    }

    let phases = guard.point.phases;
    drop(guard);

    bank.write_ro_u16(CURRENT_L1, phases[0].current_a);
    bank.write_ro_u16(CURRENT_L2, phases[1].current_a);
    bank.write_ro_u16(CURRENT_L3, phases[2].current_a);
    bank.write_ro_u16(VOLTAGE_L1, round_div(u64::from(phases[0].voltage_mv), 1000));
    bank.write_ro_u16(VOLTAGE_L2, round_div(u64::from(phases[1].voltage_mv), 1000));
    bank.write_ro_u16(VOLTAGE_L3, round_div(u64::from(phases[2].voltage_mv), 1000));
    bank.write_ro_u32(ACTIVE_POWER_L1, phases[0].active_power_w);
    bank.write_ro_u32(ACTIVE_POWER_L2, phases[1].active_power_w);
    bank.write_ro_u32(ACTIVE_POWER_L3, phases[2].active_power_w);
    let total_power: u32 = phases.iter().map(|p| p.active_power_w).sum();
    bank.write_ro_u32(ACTIVE_POWER_TOTAL, total_power);
    bank.write_ro_u32(
        METER_READING,
        round_div(u64::from(phases[0].active_energy_wh), 10_000),
    );
}

fn phase_index(phase: Option<&str>) -> Option<usize> {
    match phase {
        Some("L1") => Some(0),
        Some("L2") => Some(1),
        Some("L3") => Some(2),
        _ => None,
    }
}
