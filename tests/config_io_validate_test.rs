use evse_modbus_reflector::config::Config;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.modbus.bind_address = "10.0.0.5".to_string();
    cfg.logging.directory = tmp_dir.path().to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.modbus.bind_address, "10.0.0.5");
    assert_eq!(loaded.logging.directory, cfg.logging.directory);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    cfg.modbus.bind_address.clear();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.modbus.port = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.modbus.max_connections = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.event_bus.socket_path.clear();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.watchdog.min_period_seconds = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}
