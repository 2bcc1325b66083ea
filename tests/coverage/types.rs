use obsctl::{ControllerName, ControllerType, EndpointId, NameError, ResultCode, shared_name};

#[test]
fn test_controller_type_codes_round_trip() {
    for controller_type in ControllerType::ALL {
        assert_eq!(
            ControllerType::from_code(controller_type.code()),
            Some(controller_type)
        );
        assert_eq!(
            controller_type.name().parse::<ControllerType>().unwrap(),
            controller_type
        );
    }
    assert_eq!(ControllerType::from_code(0), None);
    assert_eq!(ControllerType::from_code(99), None);
}

#[test]
fn test_only_station_types_are_shared() {
    let shared: Vec<ControllerType> = ControllerType::ALL
        .into_iter()
        .filter(|t| t.is_shared())
        .collect();
    assert_eq!(
        shared,
        vec![
            ControllerType::StationControl,
            ControllerType::DigitalBoardControl
        ]
    );
}

#[test]
fn test_controller_name_display() {
    let full = ControllerName::new(ControllerType::BeamControl, 3, 42);
    assert_eq!(full.to_string(), "BeamControl:3{42}");

    let bare = ControllerName::new(ControllerType::OnlineControl, 0, 0);
    assert_eq!(bare.to_string(), "OnlineControl");

    let no_instance = ControllerName::new(ControllerType::TbbControl, 0, 7);
    assert_eq!(no_instance.to_string(), "TbbControl{7}");
}

#[test]
fn test_controller_name_parse() {
    let name: ControllerName = "StationControl:2{4711}".parse().unwrap();
    assert_eq!(name.controller_type, ControllerType::StationControl);
    assert_eq!(name.instance, 2);
    assert_eq!(name.observation, 4711);

    let name: ControllerName = "OfflineControl{12}".parse().unwrap();
    assert_eq!(name.instance, 0);
    assert_eq!(name.observation, 12);
}

#[test]
fn test_controller_name_parse_errors() {
    assert_eq!(
        "Telescope:1".parse::<ControllerName>(),
        Err(NameError::UnknownType("Telescope".to_string()))
    );
    assert!(matches!(
        "BeamControl:x".parse::<ControllerName>(),
        Err(NameError::Malformed(_))
    ));
    assert!(matches!(
        "BeamControl{12".parse::<ControllerName>(),
        Err(NameError::Malformed(_))
    ));
}

#[test]
fn test_shared_name_drops_observation_for_shared_types() {
    assert_eq!(shared_name("StationControl:1{500}"), "StationControl:1");
    assert_eq!(shared_name("DigitalBoardControl{9}"), "DigitalBoardControl");
    assert_eq!(shared_name("BeamControl:1{500}"), "BeamControl:1{500}");
    assert_eq!(shared_name("not a controller"), "not a controller");
}

#[test]
fn test_result_code_success() {
    assert!(ResultCode::Ok.is_ok());
    assert!(ResultCode::AlreadyRunning.is_ok());
    assert!(!ResultCode::StartFailed.is_ok());
    assert!(!ResultCode::MaxRetriesExceeded.is_ok());
    assert_eq!(ResultCode::IllegalTransition.to_string(), "illegal transition");
}

#[test]
fn test_endpoint_display() {
    assert_eq!(EndpointId(7).to_string(), "ep#7");
}
