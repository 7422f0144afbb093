//! Cold-start loader: reads the four external, read-only SQLite databases
//! at boot and seeds [`crate::state::AppState`] and the register bank from
//! them. Any failure degrades to the type's defaults and is logged, never
//! fatal — the process always continues (§4.7/§7).

use crate::config::{Config, PersistenceConfig};
use crate::logging::get_logger;
use crate::registers::{self, RegisterBank};
use crate::state::{AppState, ChargePointStatus, SessionStatus, StationStatus};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

fn open_read_only(path: &str) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
}

/// Loads station identity and optimizer settings from `agent.db`'s
/// `chargeStation INNER JOIN deviceDetails USING(ID)`.
fn load_station_from_agent_db(conn: &Connection, station: &mut crate::state::Station) {
    let row = conn
        .query_row(
            "SELECT phaseType, powerOptimizer, powerOptimizerMin, powerOptimizerMax, \
             serialNumber, acpwVersion \
             FROM chargeStation INNER JOIN deviceDetails USING(ID)",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<bool>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional();

    match row {
        Ok(Some((phase, optimizer, opt_min, opt_max, serial, acpw))) => {
            if let Some(phase) = phase {
                station.phase_count = phase as u8;
            }
            if let Some(optimizer) = optimizer {
                station.power_optimizer = optimizer;
            }
            if let Some(opt_min) = opt_min {
                station.power_optimizer_min = opt_min as u16;
            }
            if let Some(opt_max) = opt_max {
                station.power_optimizer_max = opt_max as u16;
            }
            if let Some(serial) = serial {
                station.serial = serial;
            }
            if let Some(acpw) = acpw {
                station.acpw_firmware_version = acpw;
            }
        }
        Ok(None) => get_logger("coldstart").warn("agent.db: no chargeStation row found"),
        Err(e) => get_logger("coldstart").error(&format!("agent.db query failed: {e}")),
    }
}

/// Loads live connector state from `agent.db`'s `chargePoints WHERE
/// chargePointId=1`.
fn load_point_from_agent_db(conn: &Connection, point: &mut crate::state::ChargePoint) {
    let row = conn
        .query_row(
            "SELECT status, vendorErrorCode, pilotState, proximityState, minCurrent, \
             maxCurrent, availableCurrent, currentOfferedToEv, cableMaxCurrent, \
             failsafeCurrent, failsafeTimeout \
             FROM chargePoints WHERE chargePointId = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                    row.get::<_, Option<i64>>(9)?,
                    row.get::<_, Option<i64>>(10)?,
                ))
            },
        )
        .optional();

    match row {
        Ok(Some((
            status,
            vendor_error_code,
            pilot,
            proximity,
            min_current,
            max_current,
            available_current,
            current_offered,
            cable_max,
            failsafe_current,
            failsafe_timeout,
        ))) => {
            if let Some(status) = status.and_then(|s| ChargePointStatus::from_str(&s)) {
                point.status = status;
            }
            if let Some(v) = vendor_error_code {
                point.vendor_error_code = v as u16;
            }
            if let Some(v) = pilot {
                point.pilot_state = v as u8;
            }
            if let Some(v) = proximity {
                point.proximity_state = v as u8;
            }
            if let Some(v) = min_current {
                point.min_current = v as u16;
            }
            if let Some(v) = max_current {
                point.max_current = v as u16;
            }
            if let Some(v) = available_current {
                point.available_current = v as u16;
            }
            if let Some(v) = current_offered {
                point.current_offered_to_ev = v as u16;
            }
            if let Some(v) = cable_max {
                point.cable_max_current = v as u16;
            }
            if let Some(v) = failsafe_current {
                point.failsafe_current = v as u16;
            }
            if let Some(v) = failsafe_timeout {
                point.failsafe_timeout = v as u16;
            }
        }
        Ok(None) => get_logger("coldstart").warn("agent.db: no chargePoints row found"),
        Err(e) => get_logger("coldstart").error(&format!("chargePoints query failed: {e}")),
    }
}

/// Loads the most recent active session from `agent.db`'s
/// `activeChargeSession WHERE id=1`.
fn load_session_from_agent_db(conn: &Connection, session: &mut crate::state::ChargeSession) {
    let row = conn
        .query_row(
            "SELECT startTime, finishTime, initialEnergy, lastEnergy, status \
             FROM activeChargeSession WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional();

    match row {
        Ok(Some((start, finish, initial, last, status))) => {
            if let Some(start) = start {
                session.start_time = start;
            }
            // a null finishTime means the session is still open: stopTime=0
            session.stop_time = finish.unwrap_or(0);
            if let Some(initial) = initial {
                session.initial_energy = initial as u64;
            }
            if let Some(last) = last {
                session.last_energy = last as u64;
            }
            if let Some(status) = status.and_then(|s| SessionStatus::from_str(&s)) {
                session.status = status;
            }
        }
        Ok(None) => get_logger("coldstart").warn("agent.db: no activeChargeSession row found"),
        Err(e) => get_logger("coldstart").error(&format!("activeChargeSession query failed: {e}")),
    }
}

/// Loads `ocppSettings.chargePointId` from `webconfig.db`.
pub fn reload_chargepoint_id(webconfig_db: &str) -> crate::error::Result<Option<String>> {
    let conn = open_read_only(webconfig_db)?;
    let id: Option<String> = conn
        .query_row("SELECT chargePointId FROM ocppSettings", [], |row| row.get(0))
        .optional()?;
    Ok(id)
}

fn load_from_webconfig_db(path: &str, station: &mut crate::state::Station) {
    match reload_chargepoint_id(path) {
        Ok(Some(id)) => station.charge_point_id = id,
        Ok(None) => get_logger("coldstart").warn("webconfig.db: no ocppSettings row found"),
        Err(e) => get_logger("coldstart").error(&format!("webconfig.db query failed: {e}")),
    }
}

/// Loads model and brand (from `customer`) from `vfactory.db`'s
/// `deviceDetails`.
fn load_from_vfactory_db(path: &str, station: &mut crate::state::Station) {
    let result = (|| -> rusqlite::Result<Option<(Option<String>, Option<String>)>> {
        let conn = open_read_only(path)?;
        conn.query_row(
            "SELECT model, customer FROM deviceDetails",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    })();

    match result {
        Ok(Some((model, brand))) => {
            if let Some(model) = model {
                station.model = model;
            }
            if let Some(brand) = brand {
                station.brand = brand;
            }
        }
        Ok(None) => get_logger("coldstart").warn("vfactory.db: no deviceDetails row found"),
        Err(e) => get_logger("coldstart").error(&format!("vfactory.db query failed: {e}")),
    }
}

/// Loads `deviceInfo.hmiVersion` from `system.db`.
fn load_from_system_db(path: &str, station: &mut crate::state::Station) {
    let result = (|| -> rusqlite::Result<Option<String>> {
        let conn = open_read_only(path)?;
        conn.query_row("SELECT hmiVersion FROM deviceInfo", [], |row| row.get(0))
            .optional()
    })();

    match result {
        Ok(Some(hmi)) => station.hmi_firmware_version = hmi,
        Ok(None) => get_logger("coldstart").warn("system.db: no deviceInfo row found"),
        Err(e) => get_logger("coldstart").error(&format!("system.db query failed: {e}")),
    }
}

/// Loads everything reachable from the four databases into a fresh
/// [`AppState`]. Every read degrades to the type's defaults on failure;
/// this function itself never returns an error.
pub fn load(config: &PersistenceConfig) -> AppState {
    let mut state = AppState::default();
    state.station.status = StationStatus::Initializing;

    match open_read_only(&config.agent_db) {
        Ok(conn) => {
            load_station_from_agent_db(&conn, &mut state.station);
            load_point_from_agent_db(&conn, &mut state.point);
            load_session_from_agent_db(&conn, &mut state.session);
        }
        Err(e) => get_logger("coldstart").error(&format!("agent.db open failed: {e}")),
    }

    load_from_webconfig_db(&config.webconfig_db, &mut state.station);
    load_from_vfactory_db(&config.vfactory_db, &mut state.station);
    load_from_system_db(&config.system_db, &mut state.station);

    state
}

/// Seeds every register C1 exposes from a freshly loaded [`AppState`].
/// Called once at boot, before any concurrent task starts writing.
pub fn seed_registers(bank: &RegisterBank, state: &AppState) {
    bank.write_ro_string(registers::SERIAL_NUMBER, &state.station.serial, registers::SERIAL_NUMBER_SPAN);
    bank.write_ro_string(
        registers::CHARGEPOINT_ID,
        &state.station.charge_point_id,
        registers::CHARGEPOINT_ID_SPAN,
    );
    bank.write_ro_string(registers::BRAND, &state.station.brand, registers::BRAND_SPAN);
    bank.write_ro_string(registers::MODEL, &state.station.model, registers::MODEL_SPAN);
    bank.write_ro_string(
        registers::FIRMWARE_VERSION,
        &state.station.firmware_version(),
        registers::FIRMWARE_VERSION_SPAN,
    );
    bank.write_ro_u16(registers::NUMBER_OF_PHASES, u16::from(state.station.phase_count));
    bank.write_ro_u32(
        registers::CHARGEPOINT_POWER,
        230 * u32::from(state.point.max_current),
    );

    bank.write_ro_u16(
        registers::CHARGEPOINT_STATE,
        registers::chargepoint_state_code(state.point.status),
    );
    bank.write_ro_u16(
        registers::CHARGING_STATE,
        registers::charging_state_code(state.point.status),
    );
    bank.write_ro_u16(
        registers::EQUIPMENT_STATE,
        registers::equipment_state_code(state.station.status, state.point.status),
    );
    bank.write_ro_u16(
        registers::CABLE_STATE,
        registers::cable_state_code(state.point.pilot_state, state.point.proximity_state),
    );
    bank.write_ro_u16(registers::EVSE_FAULT_CODE, state.point.vendor_error_code);

    bank.write_ro_u16(registers::SESSION_MAX_CURRENT, state.point.current_offered_to_ev);
    bank.write_ro_u16(registers::EVSE_MIN_CURRENT, state.point.min_current);
    bank.write_ro_u16(registers::EVSE_MAX_CURRENT, state.point.max_current);
    bank.write_ro_u16(registers::CABLE_MAX_CURRENT, state.point.cable_max_current);

    bank.write_rw_u16(registers::FAILSAFE_CURRENT, state.point.failsafe_current);
    bank.write_rw_u16(registers::FAILSAFE_TIMEOUT, state.point.failsafe_timeout);
    bank.write_rw_u16(registers::CHARGING_CURRENT, state.point.modbus_tcp_current);

    let session_energy = state
        .point
        .total_active_energy_wh()
        .saturating_sub(state.session.initial_energy);
    bank.write_ro_u32(registers::SESSION_ENERGY, session_energy as u32);
    bank.write_ro_u32(
        registers::SESSION_START_TIME,
        registers::epoch_seconds_to_hhmmss(state.session.start_time),
    );
    bank.write_ro_u32(
        registers::SESSION_END_TIME,
        registers::epoch_seconds_to_hhmmss(state.session.stop_time),
    );
}

/// Runs the full cold-start sequence: load, seed, then publish
/// `GeneralStatus` so the event bus sends a fresh snapshot.
pub async fn run(
    config: &Config,
    bank: &RegisterBank,
    commands: &tokio::sync::mpsc::UnboundedSender<crate::event_bus::Command>,
) -> AppState {
    let state = load(&config.persistence);
    seed_registers(bank, &state);
    let _ = commands.send(crate::event_bus::Command::general_status());
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn agent_db_fixture() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE deviceDetails(ID INTEGER PRIMARY KEY, acpwVersion TEXT);
             CREATE TABLE chargeStation(ID INTEGER PRIMARY KEY, phaseType INTEGER, \
                 powerOptimizer INTEGER, powerOptimizerMin INTEGER, powerOptimizerMax INTEGER, \
                 serialNumber TEXT);
             INSERT INTO deviceDetails VALUES (1, '2.0');
             INSERT INTO chargeStation VALUES (1, 3, 1, 6, 32, 'SN123');
             CREATE TABLE chargePoints(chargePointId INTEGER PRIMARY KEY, status TEXT, \
                 vendorErrorCode INTEGER, pilotState INTEGER, proximityState INTEGER, \
                 minCurrent INTEGER, maxCurrent INTEGER, availableCurrent INTEGER, \
                 currentOfferedToEv INTEGER, cableMaxCurrent INTEGER, failsafeCurrent INTEGER, \
                 failsafeTimeout INTEGER);
             INSERT INTO chargePoints VALUES (1, 'Available', 0, 1, 0, 6, 32, 32, 16, 32, 6, 60);
             CREATE TABLE activeChargeSession(id INTEGER PRIMARY KEY, startTime INTEGER, \
                 finishTime INTEGER, initialEnergy INTEGER, lastEnergy INTEGER, status TEXT);
             INSERT INTO activeChargeSession VALUES (1, 1000, NULL, 500, 1500, 'Started');",
        )
        .unwrap();
        (dir, path.to_string_lossy().to_string())
    }

    #[test]
    fn loads_station_point_and_session_from_agent_db() {
        let (_dir, agent_path) = agent_db_fixture();
        let config = PersistenceConfig {
            agent_db: agent_path,
            vfactory_db: "/nonexistent/vfactory.db".to_string(),
            system_db: "/nonexistent/system.db".to_string(),
            webconfig_db: "/nonexistent/webconfig.db".to_string(),
        };

        let state = load(&config);
        assert_eq!(state.station.phase_count, 3);
        assert!(state.station.power_optimizer);
        assert_eq!(state.station.serial, "SN123");
        assert_eq!(state.point.status, ChargePointStatus::Available);
        assert_eq!(state.point.failsafe_current, 6);
        assert_eq!(state.session.status, SessionStatus::Started);
        assert_eq!(state.session.stop_time, 0);
        assert_eq!(state.session.last_energy, 1500);
    }

    #[test]
    fn missing_databases_degrade_to_defaults_without_panicking() {
        let config = PersistenceConfig {
            agent_db: "/nonexistent/agent.db".to_string(),
            vfactory_db: "/nonexistent/vfactory.db".to_string(),
            system_db: "/nonexistent/system.db".to_string(),
            webconfig_db: "/nonexistent/webconfig.db".to_string(),
        };
        let state = load(&config);
        assert_eq!(state.station.status, StationStatus::Initializing);
        assert_eq!(state.point.status, ChargePointStatus::Available);
        assert_eq!(state.session.status, SessionStatus::Stopped);
    }

    #[test]
    fn seed_registers_writes_identity_and_derived_registers() {
        let (_dir, agent_path) = agent_db_fixture();
        let config = PersistenceConfig {
            agent_db: agent_path,
            vfactory_db: "/nonexistent/vfactory.db".to_string(),
            system_db: "/nonexistent/system.db".to_string(),
            webconfig_db: "/nonexistent/webconfig.db".to_string(),
        };
        let mut state = load(&config);
        state.point.phases[0].active_energy_wh = 600;
        state.point.phases[1].active_energy_wh = 500;
        state.point.phases[2].active_energy_wh = 400;
        let bank = RegisterBank::new();
        seed_registers(&bank, &state);

        assert_eq!(
            bank.read_u16(registers::Bank::Input, registers::SERIAL_NUMBER),
            Some(u16::from(b'S'))
        );
        assert_eq!(
            bank.read_u16(registers::Bank::Holding, registers::FAILSAFE_CURRENT),
            Some(6)
        );
        assert_eq!(
            bank.read_u32(registers::Bank::Input, registers::SESSION_ENERGY),
            Some(1000)
        );
    }
}
