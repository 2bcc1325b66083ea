use obsctl::transport::{
    LinkEvent, Links, ServiceAddress, TransportError, advertise, receive_message, send_message,
};
use obsctl::{ControllerState, Message, ResultCode};
use tokio::io::AsyncWriteExt;

#[test]
fn test_service_address_parse() {
    assert_eq!(
        "tcp://node001:24001".parse::<ServiceAddress>().unwrap(),
        ServiceAddress::Tcp("node001:24001".to_string())
    );
    assert_eq!(
        "10.0.0.1:80".parse::<ServiceAddress>().unwrap(),
        ServiceAddress::Tcp("10.0.0.1:80".to_string())
    );
    assert_eq!(
        "unix:///tmp/spawner.sock".parse::<ServiceAddress>().unwrap(),
        ServiceAddress::Unix("/tmp/spawner.sock".to_string())
    );
    assert!(matches!(
        "node001".parse::<ServiceAddress>(),
        Err(TransportError::InvalidAddress(_))
    ));
    assert!("tcp://:80".parse::<ServiceAddress>().is_err());
}

#[test]
fn test_service_address_display_parses_back() {
    for address in [
        ServiceAddress::Tcp("127.0.0.1:9000".to_string()),
        ServiceAddress::Unix("/run/obs/registry.sock".to_string()),
    ] {
        assert_eq!(address.to_string().parse::<ServiceAddress>().unwrap(), address);
    }
}

#[test]
fn test_advertise_replaces_wildcard_host() {
    let bound = ServiceAddress::Tcp("0.0.0.0:4100".to_string());
    assert_eq!(
        advertise(&bound, "node007"),
        ServiceAddress::Tcp("node007:4100".to_string())
    );

    let explicit = ServiceAddress::Tcp("127.0.0.1:4100".to_string());
    assert_eq!(advertise(&explicit, "node007"), explicit);

    let unix = ServiceAddress::Unix("/tmp/a.sock".to_string());
    assert_eq!(advertise(&unix, "node007"), unix);
}

#[tokio::test]
async fn test_framed_messages_over_stream() {
    let (mut near, mut far) = tokio::io::duplex(1024);
    let request = Message::request("BeamControl:1{5}", ControllerState::Claim).unwrap();
    let reply =
        Message::reply("BeamControl:1{5}", ControllerState::Claimed, ResultCode::Ok).unwrap();

    send_message(&mut near, &request).await.unwrap();
    send_message(&mut near, &reply).await.unwrap();

    let first: Message = receive_message(&mut far).await.unwrap();
    let second: Message = receive_message(&mut far).await.unwrap();
    assert_eq!(first, request);
    assert_eq!(second, reply);
    assert_eq!(second.kind(), "reply");
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
    let (mut near, mut far) = tokio::io::duplex(64);
    near.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

    let result: Result<Message, _> = receive_message(&mut far).await;
    assert!(matches!(result, Err(TransportError::MessageTooLarge(_))));
}

#[test]
fn test_messages_without_signal() {
    assert!(Message::request("x", ControllerState::Created).is_none());
    assert!(Message::reply("x", ControllerState::AnyState, ResultCode::Ok).is_none());
}

#[tokio::test]
async fn test_links_deliver_and_report_close() {
    let (mut links, mut events) = Links::new();
    let (near, mut far) = tokio::io::duplex(1024);
    let endpoint = links.attach(Box::new(near));
    assert!(links.contains(endpoint));

    let announcement = Message::Announcement {
        name: "StationControl:1".to_string(),
    };
    assert!(links.send(endpoint, announcement.clone()));
    let received: Message = receive_message(&mut far).await.unwrap();
    assert_eq!(received, announcement);

    let started = Message::Started {
        name: "StationControl:1".to_string(),
        result: ResultCode::AlreadyRunning,
    };
    send_message(&mut far, &started).await.unwrap();
    match events.recv().await {
        Some(LinkEvent::Received { endpoint: from, message }) => {
            assert_eq!(from, endpoint);
            assert_eq!(message, started);
        }
        _ => panic!("expected a received message"),
    }

    drop(far);
    match events.recv().await {
        Some(LinkEvent::Closed { endpoint: closed }) => assert_eq!(closed, endpoint),
        _ => panic!("expected the link to close"),
    }

    links.remove(endpoint);
    assert!(!links.contains(endpoint));
    assert!(!links.send(endpoint, announcement));
}
