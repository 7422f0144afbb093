//! Typed domain state: station identity, live charge-point state, and the
//! active charge session.
//!
//! These are plain records with pure setters; the only derived logic lives
//! in [`crate::registers`]'s encoding helpers, which read these types but
//! never own them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationStatus {
    Normal,
    Initializing,
    WaitingForConfiguration,
    InstallingFirmware,
    WaitingForMasterAddition,
    AddedUserCard,
    RemovedUserCard,
    WaitingForConnection,
}

impl Default for StationStatus {
    fn default() -> Self {
        StationStatus::Initializing
    }
}

impl StationStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        use StationStatus::*;
        Some(match s {
            "Normal" => Normal,
            "Initializing" => Initializing,
            "WaitingForConfiguration" => WaitingForConfiguration,
            "InstallingFirmware" => InstallingFirmware,
            "WaitingForMasterAddition" => WaitingForMasterAddition,
            "AddedUserCard" => AddedUserCard,
            "RemovedUserCard" => RemovedUserCard,
            "WaitingForConnection" => WaitingForConnection,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl Default for ChargePointStatus {
    fn default() -> Self {
        ChargePointStatus::Available
    }
}

impl ChargePointStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        use ChargePointStatus::*;
        Some(match s {
            "Available" => Available,
            "Preparing" => Preparing,
            "Charging" => Charging,
            "SuspendedEVSE" => SuspendedEVSE,
            "SuspendedEV" => SuspendedEV,
            "Finishing" => Finishing,
            "Reserved" => Reserved,
            "Unavailable" => Unavailable,
            "Faulted" => Faulted,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Timeout,
    Start,
    Finish,
}

impl Default for AuthorizationStatus {
    fn default() -> Self {
        AuthorizationStatus::Timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Operative,
    Inoperative,
}

impl Default for Availability {
    fn default() -> Self {
        Availability::Operative
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentOfferReason {
    NormalReason,
    OtherReason,
}

impl Default for CurrentOfferReason {
    fn default() -> Self {
        CurrentOfferReason::NormalReason
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Started,
    Stopped,
    Paused,
    Suspended,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Stopped
    }
}

impl SessionStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        use SessionStatus::*;
        Some(match s {
            "Started" => Started,
            "Stopped" => Stopped,
            "Paused" => Paused,
            "Suspended" => Suspended,
            _ => return None,
        })
    }
}

/// Three measurements kept per phase, as reported by `MeterValues`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseMeasurement {
    /// millivolts, as received
    pub voltage_mv: u32,
    /// amps
    pub current_a: u16,
    /// watts
    pub active_power_w: u32,
    /// Wh, cumulative
    pub active_energy_wh: u32,
}

/// Station identity and configuration. Created once at cold-start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Station {
    pub serial: String,
    pub brand: String,
    pub model: String,
    pub hmi_firmware_version: String,
    pub acpw_firmware_version: String,
    pub charge_point_id: String,
    pub phase_count: u8,
    pub power_optimizer: bool,
    pub power_optimizer_min: u16,
    pub power_optimizer_max: u16,
    pub status: StationStatus,
}

impl Station {
    /// FIRMWARE_VERSION is the HMI and ACPW versions concatenated, per §4.1.
    pub fn firmware_version(&self) -> String {
        format!("{}{}", self.hmi_firmware_version, self.acpw_firmware_version)
    }
}

/// Live connector state: the single charge point this station exposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargePoint {
    pub status: ChargePointStatus,
    pub authorization_status: AuthorizationStatus,
    pub vendor_error_code: u16,
    /// IEC 61851 control-pilot PWM state, 0-5.
    pub pilot_state: u8,
    /// cable-presence contact; 1 = no cable.
    pub proximity_state: u8,
    pub phases: [PhaseMeasurement; 3],
    pub availability: Availability,
    pub min_current: u16,
    pub max_current: u16,
    pub available_current: u16,
    pub current_offered_to_ev: u16,
    pub current_offer_reason: CurrentOfferReason,
    pub cable_max_current: u16,
    pub failsafe_current: u16,
    pub failsafe_timeout: u16,
    pub modbus_tcp_current: u16,
}

impl ChargePoint {
    pub fn total_active_energy_wh(&self) -> u64 {
        self.phases
            .iter()
            .map(|p| u64::from(p.active_energy_wh))
            .sum()
    }
}

/// An active or most-recently-active charge session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeSession {
    pub start_time: i64,
    pub stop_time: i64,
    pub initial_energy: u64,
    pub last_energy: u64,
    pub status: SessionStatus,
}

impl ChargeSession {
    /// SESSION_ENERGY, per §3: `lastEnergy - initialEnergy`; never negative.
    pub fn session_energy(&self) -> u64 {
        self.last_energy.saturating_sub(self.initial_energy)
    }

    /// SESSION_DURATION at time `now` (epoch seconds); non-negative.
    pub fn duration_seconds(&self, now: i64) -> u64 {
        (now - self.start_time).max(0) as u64
    }
}

/// Top-level container bundling station identity, the single charge
/// point, and its current session. Owned by the top-level wiring and
/// mutated only by the ingest router (single writer).
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub station: Station,
    pub point: ChargePoint,
    pub session: ChargeSession,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_version_concatenates_hmi_and_acpw() {
        let mut station = Station::default();
        station.hmi_firmware_version = "1.2".to_string();
        station.acpw_firmware_version = "3.4".to_string();
        assert_eq!(station.firmware_version(), "1.23.4");
    }

    #[test]
    fn session_energy_never_negative() {
        let mut session = ChargeSession::default();
        session.initial_energy = 1500;
        session.last_energy = 1000;
        assert_eq!(session.session_energy(), 0);
        session.last_energy = 2000;
        assert_eq!(session.session_energy(), 500);
    }

    #[test]
    fn session_duration_never_negative() {
        let mut session = ChargeSession::default();
        session.start_time = 1000;
        assert_eq!(session.duration_seconds(1030), 30);
        assert_eq!(session.duration_seconds(500), 0);
    }

    #[test]
    fn status_parsing_round_trips_known_values() {
        assert_eq!(
            ChargePointStatus::from_str("Charging"),
            Some(ChargePointStatus::Charging)
        );
        assert_eq!(ChargePointStatus::from_str("Bogus"), None);
        assert_eq!(
            StationStatus::from_str("WaitingForConnection"),
            Some(StationStatus::WaitingForConnection)
        );
        assert_eq!(
            SessionStatus::from_str("Suspended"),
            Some(SessionStatus::Suspended)
        );
    }

    #[test]
    fn total_active_energy_sums_all_phases() {
        let mut point = ChargePoint::default();
        point.phases[0].active_energy_wh = 600;
        point.phases[1].active_energy_wh = 500;
        point.phases[2].active_energy_wh = 400;
        assert_eq!(point.total_active_energy_wh(), 1500);
    }
}
