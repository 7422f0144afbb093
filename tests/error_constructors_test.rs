use evse_modbus_reflector::error::EvseError;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(EvseError::config("x"), EvseError::Config { .. }));
    assert!(matches!(EvseError::modbus("x"), EvseError::Modbus { .. }));
    assert!(matches!(
        EvseError::registers("x"),
        EvseError::Registers { .. }
    ));
    assert!(matches!(
        EvseError::event_bus("x"),
        EvseError::EventBus { .. }
    ));
}

#[test]
fn error_constructors_group_2() {
    assert!(matches!(
        EvseError::persistence("x"),
        EvseError::Persistence { .. }
    ));
    assert!(matches!(EvseError::io("x"), EvseError::Io { .. }));
    assert!(matches!(
        EvseError::watchdog("x"),
        EvseError::Watchdog { .. }
    ));
    assert!(matches!(
        EvseError::generic("x"),
        EvseError::Generic { .. }
    ));
}

#[test]
fn error_constructors_group_3() {
    assert!(matches!(
        EvseError::validation("f", "m"),
        EvseError::Validation { .. }
    ));
    let ser = EvseError::Serialization {
        message: "s".into(),
    };
    assert!(matches!(ser, EvseError::Serialization { .. }));
}

#[test]
fn display_messages() {
    let e = EvseError::validation("field", "bad");
    let s = format!("{}", e);
    assert!(s.contains("Validation error"));
}
