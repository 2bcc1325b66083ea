use obsctl::{
    ControllerError, ControllerType, RegistryError, ResultCode, SpawnError, TransportError,
    TryRecvError,
};
use std::error::Error;
use std::io;

#[test]
fn test_registry_error_shutting_down() {
    let err = RegistryError::ShuttingDown("ObservationControl{1}".to_string());
    let msg = format!("{}", err);
    assert!(msg.contains("ObservationControl{1}"));
    assert!(msg.contains("shutting down"));
    assert!(err.source().is_none());
}

#[test]
fn test_registry_error_service_unavailable() {
    let err = RegistryError::ServiceUnavailable {
        name: "ObservationControl{2}".to_string(),
        source: TransportError::InvalidAddress("nowhere".to_string()),
    };
    let msg = format!("{}", err);
    assert!(msg.contains("could not open its service"));
    assert!(msg.contains("nowhere"));
    assert!(err.source().is_some());
}

#[test]
fn test_controller_error_from_transport() {
    let err: ControllerError = TransportError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)).into();
    assert!(format!("{}", err).contains("spawner link failed"));
    assert!(err.source().is_some());

    let err = ControllerError::MissingArgument("spawner address");
    assert_eq!(err.to_string(), "missing argument: spawner address");
}

#[test]
fn test_spawn_error_result_codes() {
    let err = SpawnError::ProgramNotFound(ControllerType::BeamControl);
    assert_eq!(err.result_code(), ResultCode::ProgramNotFound);
    assert_eq!(err.to_string(), "no program found for BeamControl");

    let err = SpawnError::StartFailed {
        program: "obs-beam-ctl".to_string(),
        source: io::Error::from(io::ErrorKind::PermissionDenied),
    };
    assert_eq!(err.result_code(), ResultCode::StartFailed);
    assert!(err.to_string().starts_with("failed to launch obs-beam-ctl"));
    assert!(err.source().is_some());
}

#[test]
fn test_transport_error_display() {
    assert_eq!(
        TransportError::MessageTooLarge(12).to_string(),
        "Message too large: 12 bytes"
    );
    assert!(
        TransportError::InvalidAddress("x".to_string())
            .to_string()
            .contains("Invalid service address")
    );
}

#[test]
fn test_try_recv_error_display() {
    assert_eq!(TryRecvError::Empty.to_string(), "no completion queued");
    assert_eq!(
        TryRecvError::Disconnected.to_string(),
        "completion port is disconnected"
    );
}
