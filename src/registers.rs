//! Register map: owns the input (read-only) and holding (read-write) Modbus
//! register banks, the fixed address map, and the width/scaling/encoding
//! helpers used to keep them up to date.
//!
//! Every write is change-detecting: a write that would not change a cell's
//! value is a no-op and does not log.

use crate::logging::get_logger;
use std::sync::Mutex;

/// Size of the input (read-only) bank. No input register is mapped past
/// `SESSION_END_TIME` (1512) + its 2-register width, but the spec fixes the
/// span at `[0, 6001)`.
pub const INPUT_BANK_LEN: usize = 6001;

/// Size of the holding (read-write) bank. Must reach `ALIVE_REGISTER`
/// (6000) and leave room for auxiliary control registers above it.
pub const HOLDING_BANK_LEN: usize = 7515;

/// A client liveness token: the failsafe watchdog zeroes it every period
/// and expects the client to rewrite it faster than the period elapses.
pub const ALIVE_REGISTER: u16 = 6000;

pub const SERIAL_NUMBER: u16 = 100;
pub const SERIAL_NUMBER_SPAN: usize = 30;
pub const CHARGEPOINT_ID: u16 = 130;
pub const CHARGEPOINT_ID_SPAN: usize = 60;
pub const BRAND: u16 = 190;
pub const BRAND_SPAN: usize = 20;
pub const MODEL: u16 = 210;
pub const MODEL_SPAN: usize = 20;
pub const FIRMWARE_VERSION: u16 = 230;
pub const FIRMWARE_VERSION_SPAN: usize = 60;
pub const DATE: u16 = 290;
pub const TIME: u16 = 294;
pub const CHARGEPOINT_POWER: u16 = 400;
pub const NUMBER_OF_PHASES: u16 = 404;

pub const CHARGEPOINT_STATE: u16 = 1000;
pub const CHARGING_STATE: u16 = 1001;
pub const EQUIPMENT_STATE: u16 = 1002;
pub const CABLE_STATE: u16 = 1004;
pub const EVSE_FAULT_CODE: u16 = 1006;
pub const CURRENT_L1: u16 = 1008;
pub const CURRENT_L2: u16 = 1010;
pub const CURRENT_L3: u16 = 1012;
pub const VOLTAGE_L1: u16 = 1014;
pub const VOLTAGE_L2: u16 = 1016;
pub const VOLTAGE_L3: u16 = 1018;
pub const ACTIVE_POWER_TOTAL: u16 = 1020;
pub const ACTIVE_POWER_L1: u16 = 1024;
pub const ACTIVE_POWER_L2: u16 = 1028;
pub const ACTIVE_POWER_L3: u16 = 1032;
pub const METER_READING: u16 = 1036;

pub const SESSION_MAX_CURRENT: u16 = 1100;
pub const EVSE_MIN_CURRENT: u16 = 1102;
pub const EVSE_MAX_CURRENT: u16 = 1104;
pub const CABLE_MAX_CURRENT: u16 = 1106;

pub const SESSION_ENERGY: u16 = 1502;
pub const SESSION_START_TIME: u16 = 1504;
pub const SESSION_DURATION: u16 = 1508;
pub const SESSION_END_TIME: u16 = 1512;

pub const FAILSAFE_CURRENT: u16 = 2000;
pub const FAILSAFE_TIMEOUT: u16 = 2002;
pub const CHARGING_CURRENT: u16 = 5004;

/// The three holding addresses whose writes are re-published onto the
/// event bus as control commands (see [`crate::modbus_server`]).
pub const CONTROL_REGISTERS: [u16; 3] = [FAILSAFE_CURRENT, FAILSAFE_TIMEOUT, CHARGING_CURRENT];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Input,
    Holding,
}

/// The two parallel register banks addressed by 16-bit register number.
pub struct RegisterBank {
    input: Mutex<Vec<u16>>,
    holding: Mutex<Vec<u16>>,
    logger: crate::logging::StructuredLogger,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(vec![0u16; INPUT_BANK_LEN]),
            holding: Mutex::new(vec![0u16; HOLDING_BANK_LEN]),
            logger: get_logger("registers"),
        }
    }

    fn bank(&self, bank: Bank) -> &Mutex<Vec<u16>> {
        match bank {
            Bank::Input => &self.input,
            Bank::Holding => &self.holding,
        }
    }

    /// Change-detecting write of a single 16-bit register.
    fn write_u16_in(&self, bank: Bank, addr: u16, value: u16) {
        let mut cells = self.bank(bank).lock().unwrap();
        let idx = addr as usize;
        if idx >= cells.len() {
            self.logger
                .warn(&format!("write to out-of-range address {}", addr));
            return;
        }
        if cells[idx] != value {
            cells[idx] = value;
            self.logger
                .trace(&format!("{:?}[{}] = {}", bank, addr, value));
        }
    }

    /// Change-detecting write of a 32-bit value across two consecutive
    /// registers: `addr` gets the high 16 bits, `addr+1` the low 16 bits.
    fn write_u32_in(&self, bank: Bank, addr: u16, value: u32) {
        self.write_u16_in(bank, addr, (value >> 16) as u16);
        self.write_u16_in(bank, addr.wrapping_add(1), (value & 0xFFFF) as u16);
    }

    /// Change-detecting write of a string, one byte per register, starting
    /// at `addr`. Truncated to `max_span` registers; addresses beyond the
    /// string's length (up to `max_span`) are left untouched. Strings are
    /// not NUL-terminated.
    fn write_string_in(&self, bank: Bank, addr: u16, value: &str, max_span: usize) {
        for (i, byte) in value.bytes().take(max_span).enumerate() {
            let a = addr.wrapping_add(i as u16);
            self.write_u16_in(bank, a, u16::from(byte));
        }
    }

    pub fn write_ro_u16(&self, addr: u16, value: u16) {
        self.write_u16_in(Bank::Input, addr, value);
    }

    pub fn write_ro_u32(&self, addr: u16, value: u32) {
        self.write_u32_in(Bank::Input, addr, value);
    }

    pub fn write_ro_string(&self, addr: u16, value: &str, max_span: usize) {
        self.write_string_in(Bank::Input, addr, value, max_span);
    }

    pub fn write_rw_u16(&self, addr: u16, value: u16) {
        self.write_u16_in(Bank::Holding, addr, value);
    }

    pub fn write_rw_u32(&self, addr: u16, value: u32) {
        self.write_u32_in(Bank::Holding, addr, value);
    }

    /// Read a single register from either bank.
    pub fn read_u16(&self, bank: Bank, addr: u16) -> Option<u16> {
        self.bank(bank).lock().unwrap().get(addr as usize).copied()
    }

    /// Read a u32 spanning two consecutive registers from either bank.
    pub fn read_u32(&self, bank: Bank, addr: u16) -> Option<u32> {
        let hi = self.read_u16(bank, addr)? as u32;
        let lo = self.read_u16(bank, addr.wrapping_add(1))? as u32;
        Some((hi << 16) | lo)
    }

    /// Count of holding registers, used by the Modbus server to answer
    /// reads and bound writes.
    pub fn holding_len(&self) -> usize {
        self.holding.lock().unwrap().len()
    }

    /// Count of input registers.
    pub fn input_len(&self) -> usize {
        self.input.lock().unwrap().len()
    }

    /// Snapshot a contiguous range of the holding bank (used by the Modbus
    /// server to answer Read Holding Registers).
    pub fn read_holding_range(&self, addr: u16, count: u16) -> Option<Vec<u16>> {
        let cells = self.holding.lock().unwrap();
        let start = addr as usize;
        let end = start.checked_add(count as usize)?;
        cells.get(start..end).map(<[u16]>::to_vec)
    }

    /// Snapshot a contiguous range of the input bank (used by the Modbus
    /// server to answer Read Input Registers).
    pub fn read_input_range(&self, addr: u16, count: u16) -> Option<Vec<u16>> {
        let cells = self.input.lock().unwrap();
        let start = addr as usize;
        let end = start.checked_add(count as usize)?;
        cells.get(start..end).map(<[u16]>::to_vec)
    }

    /// Apply a client write to a single holding register, as performed by
    /// function code 0x06. Returns the post-write value on success.
    pub fn apply_write_single_holding(&self, addr: u16, value: u16) -> Option<u16> {
        let mut cells = self.holding.lock().unwrap();
        let idx = addr as usize;
        if idx >= cells.len() {
            return None;
        }
        cells[idx] = value;
        Some(value)
    }

    /// Apply a client write to multiple holding registers, as performed by
    /// function codes 0x10 and 0x17's write half. Returns the post-write
    /// values on success.
    pub fn apply_write_multiple_holding(&self, addr: u16, values: &[u16]) -> Option<Vec<u16>> {
        let mut cells = self.holding.lock().unwrap();
        let start = addr as usize;
        let end = start.checked_add(values.len())?;
        if end > cells.len() {
            return None;
        }
        cells[start..end].copy_from_slice(values);
        Some(values.to_vec())
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

/// CHARGEPOINT_STATE encoding, in declaration order (Available=0 .. Faulted=8).
pub fn chargepoint_state_code(status: crate::state::ChargePointStatus) -> u16 {
    use crate::state::ChargePointStatus::*;
    match status {
        Available => 0,
        Preparing => 1,
        Charging => 2,
        SuspendedEVSE => 3,
        SuspendedEV => 4,
        Finishing => 5,
        Reserved => 6,
        Unavailable => 7,
        Faulted => 8,
    }
}

/// CHARGING_STATE is 1 only while CHARGEPOINT_STATE encodes Charging (2).
pub fn charging_state_code(status: crate::state::ChargePointStatus) -> u16 {
    u16::from(chargepoint_state_code(status) == 2)
}

/// EQUIPMENT_STATE derivation, evaluated in order, first match wins.
pub fn equipment_state_code(
    station_status: crate::state::StationStatus,
    point_status: crate::state::ChargePointStatus,
) -> u16 {
    use crate::state::{ChargePointStatus, StationStatus};
    if station_status == StationStatus::Initializing {
        0
    } else if point_status == ChargePointStatus::Faulted {
        2
    } else if station_status == StationStatus::InstallingFirmware {
        4
    } else if point_status == ChargePointStatus::Unavailable {
        3
    } else {
        1
    }
}

/// CABLE_STATE derivation from proximity/pilot state.
pub fn cable_state_code(pilot_state: u8, proximity_state: u8) -> u16 {
    if proximity_state == 1 {
        return 0;
    }
    match pilot_state {
        0 | 1 => 1,
        2 | 4 => 2,
        3 | 5 => 3,
        _ => 1,
    }
}

/// Converts epoch seconds to the wall-clock `HHMMSS` decimal encoding used
/// by SESSION_START_TIME/SESSION_END_TIME (and TIME), per §4.1. Seconds
/// before the epoch and out-of-range timestamps fall back to 0.
pub fn epoch_seconds_to_hhmmss(epoch_seconds: i64) -> u32 {
    use chrono::{DateTime, Timelike, Utc};
    let Some(dt) = DateTime::<Utc>::from_timestamp(epoch_seconds.max(0), 0) else {
        return 0;
    };
    dt.hour() * 10_000 + dt.minute() * 100 + dt.second()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_write_splits_high_low() {
        let bank = RegisterBank::new();
        bank.write_ro_u32(400, 0x0001_0002);
        assert_eq!(bank.read_u16(Bank::Input, 400), Some(1));
        assert_eq!(bank.read_u16(Bank::Input, 401), Some(2));
        assert_eq!(bank.read_u32(Bank::Input, 400), Some(0x0001_0002));
    }

    #[test]
    fn u32_roundtrip_quickcheck_like() {
        let bank = RegisterBank::new();
        for v in [0u32, 1, 0xFFFF, 0x1_0000, 0xDEAD_BEEF, u32::MAX] {
            bank.write_ro_u32(1020, v);
            assert_eq!(bank.read_u32(Bank::Input, 1020), Some(v));
        }
    }

    #[test]
    fn string_encoding_one_byte_per_register_no_nul() {
        let bank = RegisterBank::new();
        bank.write_ro_string(SERIAL_NUMBER, "ABC123", SERIAL_NUMBER_SPAN);
        for (i, b) in "ABC123".bytes().enumerate() {
            assert_eq!(
                bank.read_u16(Bank::Input, SERIAL_NUMBER + i as u16),
                Some(u16::from(b))
            );
        }
        // beyond the written length, the reserved span stays zero (untouched)
        assert_eq!(
            bank.read_u16(Bank::Input, SERIAL_NUMBER + 6),
            Some(0)
        );
    }

    #[test]
    fn string_write_leaves_stale_tail_when_shortened() {
        let bank = RegisterBank::new();
        bank.write_ro_string(BRAND, "LongBrand", BRAND_SPAN);
        bank.write_ro_string(BRAND, "Hi", BRAND_SPAN);
        assert_eq!(bank.read_u16(Bank::Input, BRAND), Some(u16::from(b'H')));
        assert_eq!(bank.read_u16(Bank::Input, BRAND + 1), Some(u16::from(b'i')));
        // stale tail from the longer previous write remains (spec: not cleared)
        assert_eq!(bank.read_u16(Bank::Input, BRAND + 2), Some(u16::from(b'n')));
    }

    #[test]
    fn change_detecting_write_is_a_noop_when_value_unchanged() {
        let bank = RegisterBank::new();
        bank.write_rw_u16(FAILSAFE_CURRENT, 10);
        bank.write_rw_u16(FAILSAFE_CURRENT, 10);
        assert_eq!(bank.read_u16(Bank::Holding, FAILSAFE_CURRENT), Some(10));
    }

    #[test]
    fn charging_state_is_one_only_when_charging() {
        use crate::state::ChargePointStatus::*;
        assert_eq!(charging_state_code(Charging), 1);
        for s in [
            Available,
            Preparing,
            SuspendedEVSE,
            SuspendedEV,
            Finishing,
            Reserved,
            Unavailable,
            Faulted,
        ] {
            assert_eq!(charging_state_code(s), 0);
        }
    }

    #[test]
    fn equipment_state_precedence() {
        use crate::state::{ChargePointStatus, StationStatus};
        assert_eq!(
            equipment_state_code(StationStatus::Initializing, ChargePointStatus::Faulted),
            0,
            "station initializing wins over everything"
        );
        assert_eq!(
            equipment_state_code(StationStatus::Normal, ChargePointStatus::Faulted),
            2
        );
        assert_eq!(
            equipment_state_code(StationStatus::InstallingFirmware, ChargePointStatus::Available),
            4
        );
        assert_eq!(
            equipment_state_code(StationStatus::Normal, ChargePointStatus::Unavailable),
            3
        );
        assert_eq!(
            equipment_state_code(StationStatus::Normal, ChargePointStatus::Available),
            1
        );
    }

    #[test]
    fn cable_state_from_proximity_and_pilot() {
        assert_eq!(cable_state_code(3, 0), 3);
        assert_eq!(cable_state_code(3, 1), 0, "cable present overridden by no-cable proximity");
        assert_eq!(cable_state_code(0, 0), 1);
        assert_eq!(cable_state_code(1, 0), 1);
        assert_eq!(cable_state_code(2, 0), 2);
        assert_eq!(cable_state_code(4, 0), 2);
        assert_eq!(cable_state_code(5, 0), 3);
    }

    #[test]
    fn apply_write_single_holding_reports_post_write_value() {
        let bank = RegisterBank::new();
        let v = bank.apply_write_single_holding(FAILSAFE_CURRENT, 10);
        assert_eq!(v, Some(10));
        assert_eq!(bank.read_u16(Bank::Holding, FAILSAFE_CURRENT), Some(10));
    }

    #[test]
    fn apply_write_multiple_holding_rejects_out_of_range() {
        let bank = RegisterBank::new();
        let values = vec![1u16; 10];
        assert!(
            bank.apply_write_multiple_holding((HOLDING_BANK_LEN - 5) as u16, &values)
                .is_none()
        );
    }
}
