//! Periodic tasks: date/time registers, session duration/energy, and the
//! failsafe current watchdog.
//!
//! Each task is a long-lived `tokio::spawn`'d loop standing in for one of
//! the design's OS threads (§5); the coarse per-write mutex on
//! [`crate::registers::RegisterBank`] is what keeps these concurrent
//! writers safe.

use crate::config::WatchdogConfig;
use crate::event_bus::Command;
use crate::registers::{
    RegisterBank, ALIVE_REGISTER, DATE, FAILSAFE_CURRENT, FAILSAFE_TIMEOUT, SESSION_DURATION,
    SESSION_ENERGY, TIME,
};
use crate::state::{AppState, SessionStatus};
use chrono::{Datelike, Timelike, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Runs the date/time task forever: every second, formats `YYMMDD` and
/// `HHMMSS` as decimal integers and writes them to the input bank.
pub async fn run_datetime_task(bank: Arc<RegisterBank>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let now = Utc::now();
        let date = u32::from(now.year().rem_euclid(100) as u32) * 10_000
            + now.month() * 100
            + now.day();
        let time = now.hour() * 10_000 + now.minute() * 100 + now.second();
        bank.write_ro_u32(DATE, date);
        bank.write_ro_u32(TIME, time);
    }
}

/// Runs the session task forever: while a session is active, derives
/// SESSION_ENERGY and SESSION_DURATION every tick.
pub async fn run_session_task(bank: Arc<RegisterBank>, state: Arc<Mutex<AppState>>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let guard = state.lock().unwrap();
        let session = guard.session.clone();
        if session.status == SessionStatus::Stopped {
            continue;
        }
        let session_energy = guard
            .point
            .total_active_energy_wh()
            .saturating_sub(session.initial_energy);
        drop(guard);
        let now = Utc::now().timestamp();
        bank.write_ro_u32(SESSION_ENERGY, session_energy);
        bank.write_ro_u32(SESSION_DURATION, session.duration_seconds(now) as u32);
    }
}

/// Runs the failsafe watchdog forever. Period `P = max(min_period,
/// round(failsafeTimeout / 2))` seconds; recomputed every tick since the
/// client may change `failsafeTimeout` at any time.
pub async fn run_failsafe_task(
    bank: Arc<RegisterBank>,
    state: Arc<Mutex<AppState>>,
    commands: mpsc::UnboundedSender<Command>,
    config: WatchdogConfig,
) {
    loop {
        let failsafe_timeout = bank
            .read_u16(crate::registers::Bank::Holding, FAILSAFE_TIMEOUT)
            .unwrap_or(0);
        let period_secs = ((f64::from(failsafe_timeout) / 2.0).round() as u64)
            .max(config.min_period_seconds);
        tokio::time::sleep(Duration::from_secs(period_secs)).await;

        let alive = bank.read_u16(crate::registers::Bank::Holding, ALIVE_REGISTER).unwrap_or(0);
        let failsafe_current = bank
            .read_u16(crate::registers::Bank::Holding, FAILSAFE_CURRENT)
            .unwrap_or(0);
        let modbus_tcp_current = state.lock().unwrap().point.modbus_tcp_current;

        if alive == 0 && failsafe_current != modbus_tcp_current {
            state.lock().unwrap().point.modbus_tcp_current = failsafe_current;
            let _ = commands.send(Command::modbus_tcp_current(failsafe_current));
        }
        bank.write_rw_u16(ALIVE_REGISTER, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_task_derives_duration_and_energy_on_one_tick() {
        let bank = Arc::new(RegisterBank::new());
        let state = Arc::new(Mutex::new(AppState::default()));
        {
            let mut guard = state.lock().unwrap();
            guard.session.status = SessionStatus::Started;
            guard.session.start_time = Utc::now().timestamp() - 30;
            guard.session.initial_energy = 1000;
            guard.session.last_energy = 1500;
            guard.point.phases[0].active_energy_wh = 600;
            guard.point.phases[1].active_energy_wh = 500;
            guard.point.phases[2].active_energy_wh = 400;
        }

        let bank_clone = bank.clone();
        let state_clone = state.clone();
        let handle = tokio::spawn(async move {
            run_session_task(bank_clone, state_clone, Duration::from_millis(10)).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let duration = bank
            .read_u32(crate::registers::Bank::Input, SESSION_DURATION)
            .unwrap();
        assert!(duration >= 29, "expected ~30s duration, got {duration}");
        assert_eq!(
            bank.read_u32(crate::registers::Bank::Input, SESSION_ENERGY),
            Some(500)
        );
    }

    #[tokio::test]
    async fn failsafe_task_publishes_fallback_when_alive_register_is_zero() {
        let bank = Arc::new(RegisterBank::new());
        let state = Arc::new(Mutex::new(AppState::default()));
        bank.write_rw_u16(FAILSAFE_TIMEOUT, 0); // period floors to min_period_seconds
        bank.write_rw_u16(FAILSAFE_CURRENT, 6);
        state.lock().unwrap().point.modbus_tcp_current = 16;
        bank.write_rw_u16(ALIVE_REGISTER, 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = WatchdogConfig {
            min_period_seconds: 1,
            tick_interval_seconds: 1,
        };

        let bank_clone = bank.clone();
        let state_clone = state.clone();
        let handle = tokio::spawn(async move {
            run_failsafe_task(bank_clone, state_clone, tx, config).await;
        });

        let cmd = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("expected a command within the failsafe period")
            .expect("channel should not close");
        handle.abort();

        match cmd {
            Command::ModbusTcpCurrent { data } => assert_eq!(data.value, 6),
            _ => panic!("expected ModbusTcpCurrent fallback command"),
        }
        assert_eq!(
            bank.read_u16(crate::registers::Bank::Holding, ALIVE_REGISTER),
            Some(0)
        );
    }
}
