use obsctl::{
    CompletedState, CompletionPort, CompletionTimer, ControllerState, ControllerType, ResultCode,
    TryRecvError,
};
use std::time::Instant;

fn completed(name: &str) -> CompletedState {
    CompletedState {
        name: name.to_string(),
        controller_type: ControllerType::BeamControl,
        observation: 3,
        requested_state: ControllerState::Claim,
        current_state: ControllerState::Claimed,
        establish_time: Instant::now(),
        failed: false,
        result: ResultCode::Ok,
    }
}

#[test]
fn test_port_try_recv() {
    let (tx, mut port) = CompletionPort::channel();
    assert_eq!(port.try_recv(), Err(TryRecvError::Empty));

    let event = completed("BeamControl:1{3}");
    tx.send(event.clone()).unwrap();
    assert_eq!(port.try_recv(), Ok(event));

    drop(tx);
    assert_eq!(port.try_recv(), Err(TryRecvError::Disconnected));
}

#[tokio::test]
async fn test_port_recv_in_order() {
    let (tx, mut port) = CompletionPort::channel();
    tx.send(completed("a")).unwrap();
    tx.send(completed("b")).unwrap();
    drop(tx);

    assert_eq!(port.recv().await.map(|c| c.name), Some("a".to_string()));
    assert_eq!(port.recv().await.map(|c| c.name), Some("b".to_string()));
    assert_eq!(port.recv().await, None);
}

#[tokio::test]
async fn test_timer_fires_once() {
    let (notify, mut timer) = CompletionTimer::channel();
    assert!(!timer.try_fired());

    notify.send(()).unwrap();
    assert!(timer.try_fired());
}

#[tokio::test]
async fn test_replaced_timer_resolves_false() {
    let (notify, timer) = CompletionTimer::channel();
    drop(notify);
    assert!(!timer.fired().await);

    let (notify, timer) = CompletionTimer::channel();
    notify.send(()).unwrap();
    assert!(timer.fired().await);
}
