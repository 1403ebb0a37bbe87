use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reachylink_api::DaemonState;
use tokio::time::Instant;

use super::*;
use crate::config::ConnectionConfig;
use crate::event::ConnectionEvent;
use crate::model::{HardwareFaultKind, StartErrorKind};
use crate::testing::{FakeApi, FakeLauncher, StatusReply, drain, session};

async fn wait_status(ctx: &SessionContext, status: RobotStatus) {
    let mut rx = ctx.machine.subscribe();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| s.status == status))
        .await
        .unwrap()
        .map(drop)
        .unwrap();
}

fn start_errors(events: &[ConnectionEvent]) -> Vec<StartErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::StartError(err) => Some(err.kind),
            _ => None,
        })
        .collect()
}

fn local(
    mode: ConnectionMode,
) -> (
    SessionContext,
    tokio::sync::broadcast::Receiver<ConnectionEvent>,
    Arc<FakeApi>,
    Arc<FakeLauncher>,
    Arc<dyn ModeStrategy>,
) {
    let api = FakeApi::new();
    let launcher = FakeLauncher::new();
    let serial = (mode == ConnectionMode::Direct).then(|| "/dev/ttyACM0".to_owned());
    let strategy = strategy_for(mode, serial, launcher.clone());
    let (ctx, rx) = session(mode, api.clone(), ConnectionConfig::default());
    (ctx, rx, api, launcher, strategy)
}

// ── Local startup ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn local_fast_path_goes_straight_to_ready() {
    let (ctx, mut rx, api, launcher, strategy) = local(ConnectionMode::Simulated);
    api.set_full_state_ok(true);

    let handle = start_daemon(&ctx, &strategy).await.unwrap();

    assert!(handle.is_none());
    assert_eq!(ctx.machine.status(), RobotStatus::Ready);
    assert!(launcher.launches().is_empty());
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::StartSuccess))
    );
}

#[tokio::test(start_paused = true)]
async fn simulated_launch_starts_daemon_and_becomes_ready() {
    let (ctx, mut rx, api, launcher, strategy) = local(ConnectionMode::Simulated);
    api.script_status([
        StatusReply::State(DaemonState::NotInitialized),
        StatusReply::State(DaemonState::NotInitialized),
    ]);

    let handle = start_daemon(&ctx, &strategy).await.unwrap();
    assert!(handle.is_some());
    assert_eq!(
        launcher.launches(),
        vec![crate::backend::LaunchSpec {
            simulated: true,
            serial_port: None
        }]
    );

    wait_status(&ctx, RobotStatus::Ready).await;

    assert_eq!(api.count("start?wake_up=true"), 1);
    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::StartRequested { wake_up: true }))
    );
    assert!(events.iter().any(|e| matches!(e, ConnectionEvent::StartSuccess)));
}

#[tokio::test(start_paused = true)]
async fn transitional_daemon_states_do_not_trigger_start() {
    let (ctx, _rx, api, _launcher, strategy) = local(ConnectionMode::Simulated);
    api.script_status([
        StatusReply::State(DaemonState::Starting),
        StatusReply::State(DaemonState::Stopping),
        StatusReply::State(DaemonState::Starting),
    ]);

    start_daemon(&ctx, &strategy).await.unwrap();
    wait_status(&ctx, RobotStatus::Ready).await;

    assert_eq!(api.count("status"), 4);
    assert_eq!(api.count("start?wake_up=true"), 0);
}

#[tokio::test(start_paused = true)]
async fn direct_launch_passes_serial_port() {
    let (ctx, _rx, _api, launcher, strategy) = local(ConnectionMode::Direct);
    start_daemon(&ctx, &strategy).await.unwrap();
    assert_eq!(
        launcher.launches()[0].serial_port.as_deref(),
        Some("/dev/ttyACM0")
    );
    assert!(!launcher.launches()[0].simulated);
}

#[tokio::test(start_paused = true)]
async fn startup_deadline_expiry_crashes() {
    let (ctx, mut rx, api, _launcher, strategy) = local(ConnectionMode::Direct);
    api.set_default_status(StatusReply::State(DaemonState::Starting));
    let started = Instant::now();

    start_daemon(&ctx, &strategy).await.unwrap();
    wait_status(&ctx, RobotStatus::Crashed).await;

    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(62));
    let state = ctx.machine.snapshot();
    assert_eq!(
        state.start_error.map(|e| e.kind),
        Some(StartErrorKind::StartupTimeout)
    );
    assert_eq!(start_errors(&drain(&mut rx)), vec![StartErrorKind::StartupTimeout]);
}

#[tokio::test(start_paused = true)]
async fn process_output_rearms_startup_deadline() {
    let (ctx, mut rx, api, launcher, strategy) = local(ConnectionMode::Direct);
    api.set_default_status(StatusReply::State(DaemonState::Starting));
    let started = Instant::now();

    start_daemon(&ctx, &strategy).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    launcher
        .emit(ProcessSignal::Output {
            stream: OutputStream::Stdout,
            line: "INFO: loading robot model".into(),
        })
        .await;

    wait_status(&ctx, RobotStatus::Crashed).await;

    assert!(started.elapsed() >= Duration::from_secs(90));
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::StartupDeadlineRearmed))
    );
}

#[tokio::test(start_paused = true)]
async fn rearm_respects_minimum_interval() {
    let (ctx, mut rx, api, launcher, strategy) = local(ConnectionMode::Direct);
    api.set_default_status(StatusReply::State(DaemonState::Starting));

    start_daemon(&ctx, &strategy).await.unwrap();
    launcher
        .emit(ProcessSignal::Output {
            stream: OutputStream::Stdout,
            line: "INFO: starting".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::DaemonOutput { .. }))
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::StartupDeadlineRearmed))
    );
    assert_eq!(ctx.logs.lines().last().map(String::as_str), Some("INFO: starting"));
}

#[tokio::test(start_paused = true)]
async fn process_exit_while_starting_is_a_crash() {
    let (ctx, mut rx, api, launcher, strategy) = local(ConnectionMode::Simulated);
    api.set_default_status(StatusReply::Unreachable);

    start_daemon(&ctx, &strategy).await.unwrap();
    launcher
        .emit(ProcessSignal::Terminated { code: Some(1) })
        .await;
    wait_status(&ctx, RobotStatus::Crashed).await;

    assert!(ctx.machine.snapshot().is_daemon_crashed);
    assert_eq!(start_errors(&drain(&mut rx)), vec![StartErrorKind::ProcessExited]);
}

#[tokio::test(start_paused = true)]
async fn process_exit_while_ready_is_a_crash() {
    let (ctx, mut rx, _api, launcher, strategy) = local(ConnectionMode::Simulated);

    start_daemon(&ctx, &strategy).await.unwrap();
    wait_status(&ctx, RobotStatus::Ready).await;
    launcher
        .emit(ProcessSignal::Terminated { code: Some(137) })
        .await;
    wait_status(&ctx, RobotStatus::Crashed).await;

    let events = drain(&mut rx);
    assert!(start_errors(&events).is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        ConnectionEvent::Crash {
            previous: RobotStatus::Ready,
            reason: CrashReason::ProcessExited
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn fatal_output_while_ready_attaches_no_fault() {
    let (ctx, mut rx, _api, launcher, strategy) = local(ConnectionMode::Simulated);

    start_daemon(&ctx, &strategy).await.unwrap();
    wait_status(&ctx, RobotStatus::Ready).await;
    drain(&mut rx);
    launcher
        .emit(ProcessSignal::Output {
            stream: OutputStream::Stderr,
            line: "Traceback (most recent call last):".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let state = ctx.machine.snapshot();
    assert_eq!(state.status, RobotStatus::Ready);
    assert!(state.hardware_error.is_none());
    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::DaemonOutput { .. }))
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::HardwareError(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn hardware_fault_holds_starting_and_suspends_deadline() {
    let (ctx, mut rx, api, launcher, strategy) = local(ConnectionMode::Direct);
    api.set_default_status(StatusReply::Unreachable);

    start_daemon(&ctx, &strategy).await.unwrap();
    launcher
        .emit(ProcessSignal::Output {
            stream: OutputStream::Stderr,
            line: "RuntimeError: No Reachy Mini serial port found.".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_secs(200)).await;

    let state = ctx.machine.snapshot();
    assert_eq!(state.status, RobotStatus::Starting);
    assert_eq!(
        state.hardware_error.map(|f| f.kind),
        Some(HardwareFaultKind::NoSerialPort)
    );
    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::HardwareError(_)))
            .count(),
        1
    );
    assert!(start_errors(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn stdout_is_never_classified() {
    let (ctx, _rx, api, launcher, strategy) = local(ConnectionMode::Direct);
    api.set_default_status(StatusReply::Unreachable);

    start_daemon(&ctx, &strategy).await.unwrap();
    launcher
        .emit(ProcessSignal::Output {
            stream: OutputStream::Stdout,
            line: "Traceback (most recent call last):".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(ctx.machine.snapshot().hardware_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn launch_failure_surfaces_start_error() {
    let (ctx, mut rx, _api, launcher, strategy) = local(ConnectionMode::Simulated);
    launcher.set_fail(true);

    let err = start_daemon(&ctx, &strategy).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::Lifecycle(LifecycleFault::LaunchFailed { .. })
    ));
    assert_eq!(ctx.machine.status(), RobotStatus::Crashed);
    assert_eq!(start_errors(&drain(&mut rx)), vec![StartErrorKind::LaunchFailed]);
}

// ── Remote startup ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_unreachable_is_wifi_error() {
    let api = FakeApi::at("http://reachy-mini.local:8000");
    api.set_default_status(StatusReply::Unreachable);
    let strategy = strategy_for(ConnectionMode::Remote, None, FakeLauncher::new());
    let (ctx, mut rx) = session(ConnectionMode::Remote, api, ConnectionConfig::default());

    let err = start_daemon(&ctx, &strategy).await.unwrap_err();

    match err {
        CoreError::WifiConnection { host, .. } => assert_eq!(host, "reachy-mini.local"),
        other => panic!("expected WifiConnection, got {other:?}"),
    }
    assert_eq!(start_errors(&drain(&mut rx)), vec![StartErrorKind::WifiConnection]);
    assert_ne!(ctx.machine.status(), RobotStatus::Crashed);
}

#[tokio::test(start_paused = true)]
async fn remote_start_does_not_force_wake() {
    let api = FakeApi::at("http://reachy-mini.local:8000");
    api.script_status([
        StatusReply::State(DaemonState::Stopped),
        StatusReply::State(DaemonState::Starting),
    ]);
    let launcher = FakeLauncher::new();
    let strategy = strategy_for(ConnectionMode::Remote, None, launcher.clone());
    let (ctx, _rx) = session(ConnectionMode::Remote, api.clone(), ConnectionConfig::default());

    let handle = start_daemon(&ctx, &strategy).await.unwrap();
    assert!(handle.is_some());
    assert_eq!(ctx.machine.status(), RobotStatus::Starting);

    wait_status(&ctx, RobotStatus::Ready).await;

    assert_eq!(api.count("start?wake_up=false"), 1);
    assert_eq!(api.count("start?wake_up=true"), 0);
    assert!(launcher.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_running_daemon_is_ready_immediately() {
    let api = FakeApi::at("http://reachy-mini.local:8000");
    let strategy = strategy_for(ConnectionMode::Remote, None, FakeLauncher::new());
    let (ctx, _rx) = session(ConnectionMode::Remote, api.clone(), ConnectionConfig::default());

    assert!(start_daemon(&ctx, &strategy).await.unwrap().is_none());
    assert_eq!(ctx.machine.status(), RobotStatus::Ready);
    assert_eq!(api.calls(), vec!["status"]);
}

// ── Stop ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_sequence_is_ordered_and_waits_grace_period() {
    let (ctx, _rx, api, launcher, strategy) = local(ConnectionMode::Simulated);
    start_daemon(&ctx, &strategy).await.unwrap();
    wait_status(&ctx, RobotStatus::Ready).await;
    let started = Instant::now();

    stop_daemon(&ctx, strategy.as_ref()).await;

    assert!(started.elapsed() >= Duration::from_millis(4500));
    assert_eq!(ctx.machine.status(), RobotStatus::Stopping);
    assert_eq!(launcher.terminations(), 1);
    let calls = api.calls();
    let app = calls.iter().position(|c| c == "stop-current-app").unwrap();
    let stop = calls.iter().position(|c| c == "stop?goto_sleep=true").unwrap();
    assert!(app < stop);
}

#[tokio::test(start_paused = true)]
async fn stop_after_crash_keeps_crashed_status() {
    let (ctx, _rx, _api, launcher, strategy) = local(ConnectionMode::Simulated);
    start_daemon(&ctx, &strategy).await.unwrap();
    wait_status(&ctx, RobotStatus::Ready).await;
    ctx.machine.crashed(CrashReason::HealthThreshold).unwrap();

    stop_daemon(&ctx, strategy.as_ref()).await;

    assert_eq!(ctx.machine.status(), RobotStatus::Crashed);
    assert_eq!(launcher.terminations(), 1);
}
