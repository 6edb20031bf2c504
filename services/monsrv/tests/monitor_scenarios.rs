//! End-to-end monitor behaviour against the in-process mock device
//!
//! All tests run on a paused clock so poll cadence is exact.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use monsrv::test_utils::{memory_sink, test_connection_config, Fault, MockConnector, MockEvent};
use monsrv::{
    ConnectionConfig, MonSrvError, MonitorService, MonitorState, RegisterDefinition,
    RegisterType, RegisterValue,
};
use voltage_rtdb::SteppingTimeProvider;

fn service_with(
    connector: &Arc<MockConnector>,
    config: ConnectionConfig,
    registers: Vec<RegisterDefinition>,
    retention: usize,
) -> MonitorService {
    MonitorService::new(config, registers, connector.clone(), memory_sink(retention))
        .unwrap()
        .with_clock(Arc::new(SteppingTimeProvider::new(1_700_000_000_000, 1_000)))
}

fn two_registers() -> Vec<RegisterDefinition> {
    vec![
        RegisterDefinition::new(0, 5, RegisterType::Holding).named("H0"),
        RegisterDefinition::new(100, 2, RegisterType::Input).named("I100"),
    ]
}

async fn wait_for_state(service: &MonitorService, predicate: impl Fn(&MonitorState) -> bool) {
    let mut rx = service.subscribe();
    rx.wait_for(|s| predicate(s)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn partial_pass_resets_failures_and_extends_history() {
    let connector = Arc::new(MockConnector::new());
    connector.set_words(RegisterType::Holding, 0, &[1, 2, 3, 4, 5]);
    connector.set_words(RegisterType::Input, 100, &[10, 20]);
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| *s == MonitorState::Monitoring).await;

    // Pass 1 at t=0: both registers
    tokio::time::sleep(Duration::from_millis(500)).await;
    let latest = service.latest().await.unwrap().unwrap();
    let names: Vec<_> = latest.data.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["H0", "I100"]);
    assert_eq!(service.history(10).await.unwrap().len(), 1);
    assert_eq!(service.stats().consecutive_failures, 0);

    // Pass 2 at t=1: H0 answers with an exception
    connector.inject(RegisterType::Holding, 0, Fault::Exception(0x02));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let latest = service.latest().await.unwrap().unwrap();
    assert_eq!(latest.data.len(), 1);
    assert_eq!(latest.data[0].name, "I100");
    assert_eq!(
        latest.data[0].values,
        vec![RegisterValue::Word(10), RegisterValue::Word(20)]
    );
    assert_eq!(service.stats().consecutive_failures, 0);
    assert_eq!(service.history(10).await.unwrap().len(), 2);
    assert_eq!(service.status(), MonitorState::Monitoring);

    service.stop_monitoring().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn connection_failures_stop_at_threshold() {
    let connector = Arc::new(MockConnector::new());
    connector.fail_connects(true);
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| matches!(s, MonitorState::Error(_))).await;
    assert_eq!(connector.stats().connects, 5);

    // No sixth attempt, however long we wait
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.stats().connects, 5);
    assert!(matches!(service.status(), MonitorState::Error(_)));
    assert!(service.latest().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_at_startup_halts_after_threshold_attempts() {
    let connector = Arc::new(MockConnector::new());
    connector.fail_connects(true);
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    // Same order as the binary: start, wait for a halt, stop, shut down
    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| matches!(s, MonitorState::Error(_))).await;

    let err = service.stop_monitoring().await.unwrap_err();
    assert!(matches!(err, MonSrvError::FatalError(_)));
    assert_eq!(errors::VoltageError::from(err).status_code(), 503);
    service.shutdown().await;

    assert_eq!(connector.stats().connects, 5);
    assert_eq!(service.stats().failed_passes, 5);
}

#[tokio::test(start_paused = true)]
async fn stop_during_outage_does_not_wait_for_connect_timeout() {
    let connector = Arc::new(MockConnector::new());
    connector.set_connect_delay(Duration::from_secs(30));
    let config = ConnectionConfig {
        timeout: Duration::from_secs(10),
        ..test_connection_config()
    };
    let service = service_with(&connector, config, two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let started = tokio::time::Instant::now();
    service.stop_monitoring().await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(1));
    assert_eq!(service.status(), MonitorState::Idle);
    assert!(!service.is_connected());
}

#[tokio::test(start_paused = true)]
async fn recovery_before_threshold_keeps_monitoring() {
    let connector = Arc::new(MockConnector::new());
    connector.inject(RegisterType::Holding, 0, Fault::Exception(0x04));
    connector.inject(RegisterType::Input, 100, Fault::Exception(0x04));
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    service.start_monitoring().await.unwrap();

    // Four failed passes at t=0..3
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(service.stats().consecutive_failures, 4);

    connector.clear_faults();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.stats().consecutive_failures, 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(service.status(), MonitorState::Monitoring);

    service.stop_monitoring().await.unwrap();
    assert_eq!(service.status(), MonitorState::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_while_sleeping_exits_within_one_interval() {
    let connector = Arc::new(MockConnector::new());
    let config = ConnectionConfig {
        poll_interval: Duration::from_secs(30),
        ..test_connection_config()
    };
    let service = service_with(&connector, config, two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| *s == MonitorState::Monitoring).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let started = tokio::time::Instant::now();
    service.stop_monitoring().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(30));

    assert_eq!(service.status(), MonitorState::Idle);
    assert!(!service.is_connected());
    assert_eq!(connector.stats().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_mid_pass_finishes_pass_and_releases_session() {
    let connector = Arc::new(MockConnector::new());
    connector.inject(RegisterType::Input, 100, Fault::Delay(Duration::from_secs(2)));
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| *s == MonitorState::Monitoring).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    service.stop_monitoring().await.unwrap();

    // The pass in flight completed and was stored
    let latest = service.latest().await.unwrap().unwrap();
    assert_eq!(latest.data.len(), 2);
    assert_eq!(connector.stats().reads, 2);
    assert!(!service.is_connected());
    assert_eq!(connector.stats().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn history_is_trimmed_to_retention() {
    let connector = Arc::new(MockConnector::new());
    let service = service_with(&connector, test_connection_config(), two_registers(), 3);

    service.start_monitoring().await.unwrap();
    // Passes at t=0..7
    tokio::time::sleep(Duration::from_millis(7500)).await;
    service.stop_monitoring().await.unwrap();

    let history = service.history(100).await.unwrap();
    assert_eq!(history.len(), 3);
    let latest = service.latest().await.unwrap().unwrap();
    assert_eq!(history[0].timestamp, latest.timestamp);
    assert!(history.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
}

#[tokio::test(start_paused = true)]
async fn writes_never_interleave_with_a_pass() {
    let connector = Arc::new(MockConnector::new());
    connector.inject(RegisterType::Holding, 0, Fault::Delay(Duration::from_secs(1)));
    connector.inject(RegisterType::Input, 100, Fault::Delay(Duration::from_secs(1)));
    let service = Arc::new(service_with(
        &connector,
        test_connection_config(),
        two_registers(),
        1000,
    ));

    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| *s == MonitorState::Monitoring).await;

    // Pass 1 runs from t=0 to t=2; the write arrives in the middle
    tokio::time::sleep(Duration::from_millis(500)).await;
    let writer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.write(50, 7).await })
    };
    assert!(writer.await.unwrap().unwrap());

    let events = connector.events();
    assert_eq!(
        &events[..3],
        &[
            MockEvent::Read(RegisterType::Holding, 0),
            MockEvent::Read(RegisterType::Input, 100),
            MockEvent::Write(50),
        ]
    );

    service.stop_monitoring().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn writer_gives_up_on_a_long_pass() {
    let connector = Arc::new(MockConnector::new());
    let config = ConnectionConfig {
        timeout: Duration::from_secs(20),
        lock_timeout: Duration::from_secs(1),
        ..test_connection_config()
    };
    connector.inject(RegisterType::Holding, 0, Fault::Delay(Duration::from_secs(10)));
    let service = service_with(&connector, config, two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    wait_for_state(&service, |s| *s == MonitorState::Monitoring).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = service.write(50, 7).await.unwrap_err();
    assert!(matches!(err, MonSrvError::ResourceBusy(_)));
    assert_eq!(connector.stats().writes, 0);

    service.stop_monitoring().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconfigure_applies_from_next_pass() {
    let connector = Arc::new(MockConnector::new());
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    service
        .reconfigure(vec![
            RegisterDefinition::new(0, 1, RegisterType::Holding),
            RegisterDefinition::new(0, 8, RegisterType::Coil),
            RegisterDefinition::new(4, 2, RegisterType::DiscreteInput),
        ])
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let latest = service.latest().await.unwrap().unwrap();
    let names: Vec<_> = latest.data.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["holding_0", "coils_0", "discrete_inputs_4"]);
    assert_eq!(latest.data[1].values.len(), 8);

    service.stop_monitoring().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_reopened_next_iteration() {
    let connector = Arc::new(MockConnector::new());
    let service = service_with(&connector, test_connection_config(), two_registers(), 1000);

    service.start_monitoring().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.stats().connects, 1);

    connector.inject(RegisterType::Holding, 0, Fault::ConnectionLost);
    tokio::time::sleep(Duration::from_secs(1)).await;
    connector.clear_faults();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(connector.stats().connects, 2);
    assert_eq!(service.stats().consecutive_failures, 0);
    let latest = service.latest().await.unwrap().unwrap();
    assert_eq!(latest.data.len(), 2);

    service.stop_monitoring().await.unwrap();
}
