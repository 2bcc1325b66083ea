use obsctl::{
    CompletedState, CompletionPort, ControllerConfig, ControllerRuntime, ControllerState,
    ControllerType, RegistryConfig, RegistryHandle, ResultCode, ServiceAddress, SpawnerConfig,
    SpawnerServer, TransitionStep, impl_controller,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, timeout};

type Steps = Arc<Mutex<Vec<TransitionStep>>>;

struct Recorder {
    steps: Steps,
}

impl_controller! {
    Recorder, io::Error => |self, step| {
        self.steps.lock().unwrap().push(step.clone());
        Ok(())
    }
}

fn find_program(controller_type: ControllerType) -> Option<PathBuf> {
    Some(PathBuf::from(controller_type.program()))
}

fn no_program(_: ControllerType) -> Option<PathBuf> {
    None
}

/// Spawner whose "processes" are controller runtimes on the test runtime.
async fn start_spawner(
    address: ServiceAddress,
    locator: fn(ControllerType) -> Option<PathBuf>,
    steps: Steps,
    launches: Arc<AtomicUsize>,
) -> ServiceAddress {
    let launcher = move |_: &Path, shared: &str, spawner: &str| -> io::Result<()> {
        let spawner: ServiceAddress = spawner.parse().map_err(io::Error::other)?;
        launches.fetch_add(1, Ordering::SeqCst);
        let runtime = ControllerRuntime::new(
            shared,
            spawner,
            Recorder {
                steps: Arc::clone(&steps),
            },
            ControllerConfig::default(),
        );
        tokio::spawn(async move {
            let _ = runtime.run().await;
        });
        Ok(())
    };

    let server = SpawnerServer::bind(&address, SpawnerConfig::default(), locator, launcher)
        .await
        .unwrap();
    let local = server.local_address().clone();
    tokio::spawn(server.run());
    local
}

fn registry_config(listen: ServiceAddress, spawner: ServiceAddress) -> RegistryConfig {
    RegistryConfig::default()
        .with_listen(listen)
        .with_spawner("node001", spawner)
        .with_tick_interval(Duration::from_millis(50))
}

fn loopback() -> ServiceAddress {
    ServiceAddress::Tcp("127.0.0.1:0".to_string())
}

async fn next_completion(port: &mut CompletionPort) -> CompletedState {
    timeout(Duration::from_secs(5), port.recv())
        .await
        .expect("no completion in time")
        .expect("registry stopped")
}

fn recorded(steps: &Steps) -> Vec<(ControllerState, bool)> {
    steps
        .lock()
        .unwrap()
        .iter()
        .map(|step| (step.request, step.synthesized))
        .collect()
}

#[tokio::test]
async fn test_controller_lifecycle_over_tcp() {
    let steps = Steps::default();
    let launches = Arc::new(AtomicUsize::new(0));
    let spawner = start_spawner(loopback(), find_program, Arc::clone(&steps), Arc::clone(&launches)).await;

    let registry = RegistryHandle::start(
        "ObservationControl{500}",
        "127.0.0.1",
        registry_config(loopback(), spawner),
    );
    let service = registry.open_service().await.unwrap();
    assert!(matches!(service, ServiceAddress::Tcp(_)));
    let mut port = registry.completion_port().unwrap();

    let name = "BeamControl:1{500}";
    assert!(
        registry
            .start_child(name, 500, ControllerType::BeamControl, 1, "node001")
            .await
            .unwrap()
    );

    let connected = next_completion(&mut port).await;
    assert_eq!(connected.name, name);
    assert_eq!(connected.current_state, ControllerState::Connected);
    assert_eq!(
        registry.current_state(name).await.unwrap(),
        Some(ControllerState::Connected)
    );

    assert!(
        registry
            .request_state(ControllerState::Prepare, name, None, None)
            .await
            .unwrap()
    );
    let prepared = next_completion(&mut port).await;
    assert_eq!(prepared.requested_state, ControllerState::Prepare);
    assert_eq!(prepared.current_state, ControllerState::Prepared);
    assert!(!prepared.failed);
    assert_eq!(
        recorded(&steps),
        vec![
            (ControllerState::Claim, true),
            (ControllerState::Prepare, false)
        ]
    );

    registry
        .request_state(ControllerState::Quit, name, None, None)
        .await
        .unwrap();
    let quited = next_completion(&mut port).await;
    assert_eq!(quited.current_state, ControllerState::Quited);
    assert_eq!(registry.count_childs(None, None).await.unwrap(), 0);
    assert_eq!(
        recorded(&steps)[2..],
        [
            (ControllerState::Release, true),
            (ControllerState::Quit, false)
        ]
    );
    assert_eq!(launches.load(Ordering::SeqCst), 1);

    let history = registry.completed_states(None).await.unwrap();
    assert_eq!(history.last().map(|c| c.current_state), Some(ControllerState::Quited));

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shared_controller_serves_two_parents() {
    let steps = Steps::default();
    let launches = Arc::new(AtomicUsize::new(0));
    let spawner = start_spawner(loopback(), find_program, Arc::clone(&steps), Arc::clone(&launches)).await;

    let first = RegistryHandle::start(
        "ObservationControl{601}",
        "127.0.0.1",
        registry_config(loopback(), spawner.clone()),
    );
    let second = RegistryHandle::start(
        "ObservationControl{602}",
        "127.0.0.1",
        registry_config(loopback(), spawner),
    );
    first.open_service().await.unwrap();
    let second_service = second.open_service().await.unwrap();
    let mut first_port = first.completion_port().unwrap();
    let mut second_port = second.completion_port().unwrap();

    first
        .start_child("StationControl:1{601}", 601, ControllerType::StationControl, 1, "node001")
        .await
        .unwrap();
    assert_eq!(
        next_completion(&mut first_port).await.current_state,
        ControllerState::Connected
    );

    second
        .start_child("StationControl:1{602}", 602, ControllerType::StationControl, 1, "node001")
        .await
        .unwrap();
    assert_eq!(
        next_completion(&mut second_port).await.current_state,
        ControllerState::Connected
    );
    assert_eq!(launches.load(Ordering::SeqCst), 1);

    first
        .request_state(ControllerState::Claim, "StationControl:1{601}", None, None)
        .await
        .unwrap();
    assert_eq!(
        next_completion(&mut first_port).await.current_state,
        ControllerState::Claimed
    );
    assert_eq!(
        second.current_state("StationControl:1{602}").await.unwrap(),
        Some(ControllerState::Connected)
    );

    // The first parent leaves; the process stays up for the second
    first
        .request_state(ControllerState::Quit, "StationControl:1{601}", None, None)
        .await
        .unwrap();
    assert_eq!(
        next_completion(&mut first_port).await.current_state,
        ControllerState::Quited
    );

    second
        .request_state(ControllerState::Claim, "StationControl:1{602}", None, None)
        .await
        .unwrap();
    assert_eq!(
        next_completion(&mut second_port).await.current_state,
        ControllerState::Claimed
    );

    second
        .request_state(ControllerState::Quit, "StationControl:1{602}", None, None)
        .await
        .unwrap();
    assert_eq!(
        next_completion(&mut second_port).await.current_state,
        ControllerState::Quited
    );

    let quits: Vec<TransitionStep> = steps
        .lock()
        .unwrap()
        .iter()
        .filter(|step| step.request == ControllerState::Quit)
        .cloned()
        .collect();
    assert_eq!(quits.len(), 1);
    assert_eq!(quits[0].parent, second_service.to_string());
    assert_eq!(quits[0].controller, "StationControl:1{602}");

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_program_fails_start() {
    let spawner = start_spawner(
        loopback(),
        no_program,
        Steps::default(),
        Arc::new(AtomicUsize::new(0)),
    )
    .await;

    let registry = RegistryHandle::start(
        "ObservationControl{700}",
        "127.0.0.1",
        registry_config(loopback(), spawner),
    );
    registry.open_service().await.unwrap();
    let mut port = registry.completion_port().unwrap();

    registry
        .start_child("TbbControl:1{700}", 700, ControllerType::TbbControl, 1, "node001")
        .await
        .unwrap();

    let completed = next_completion(&mut port).await;
    assert!(completed.failed);
    assert_eq!(completed.result, ResultCode::ProgramNotFound);

    let pending = registry.pending_requests("TbbControl:1{700}", None, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, obsctl::ActionStatus::Failed);

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_over_unix_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let spawner_path = dir.path().join("spawner.sock");
    let registry_path = dir.path().join("registry.sock");

    let steps = Steps::default();
    let spawner = start_spawner(
        ServiceAddress::Unix(spawner_path.display().to_string()),
        find_program,
        Arc::clone(&steps),
        Arc::new(AtomicUsize::new(0)),
    )
    .await;
    assert!(matches!(spawner, ServiceAddress::Unix(_)));

    let registry = RegistryHandle::start(
        "ObservationControl{800}",
        "localhost",
        registry_config(
            ServiceAddress::Unix(registry_path.display().to_string()),
            spawner,
        ),
    );
    let service = registry.open_service().await.unwrap();
    assert_eq!(
        service,
        ServiceAddress::Unix(registry_path.display().to_string())
    );
    let timer = registry.completion_timer().unwrap();

    registry
        .start_child("CalibrationControl:1{800}", 800, ControllerType::CalibrationControl, 1, "node001")
        .await
        .unwrap();
    assert!(timeout(Duration::from_secs(5), timer.fired()).await.unwrap());

    let mut port = registry.completion_port().unwrap();
    registry
        .request_state(ControllerState::Claim, "", Some(800), None)
        .await
        .unwrap();
    let claimed = next_completion(&mut port).await;
    assert_eq!(claimed.current_state, ControllerState::Claimed);
    assert_eq!(recorded(&steps), vec![(ControllerState::Claim, false)]);

    assert!(registry.remove_child("CalibrationControl:1{800}").await.unwrap());
    assert_eq!(registry.count_childs(Some(800), None).await.unwrap(), 0);

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handle_fails_after_shutdown() {
    let registry = RegistryHandle::start("ObservationControl{900}", "127.0.0.1", RegistryConfig::default());
    assert_eq!(registry.name(), "ObservationControl{900}");

    registry.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(registry.count_childs(None, None).await.is_err());
}
