//! Scan, connection, and radio lifecycle behavior.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use ble_central::{
    CentralManager, ConnectOptions, ConnectionState, ErrorKind, LinkError, LinkEvent,
    PeripheralId, RadioState, ScanFilter, ScanOptions,
};
use ble_link_sim::{ConnectBehavior, SimCommand, SimPeripheral, SimRadio};
use futures_lite::{StreamExt, future};

mod common;
use common::{BATTERY, BATTERY_LEVEL, battery_service, manager_with};

const HEART: PeripheralId = PeripheralId::from_u128(1);
const LAMP: PeripheralId = PeripheralId::from_u128(2);

#[tokio::test]
async fn scan_delivers_matching_advertisers_only() {
    let (central, _sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_name("Pulse").with_service(battery_service()),
        SimPeripheral::new(LAMP).with_name("Lamp"),
    ]);
    let mut stream = central
        .scan(ScanFilter::by_services(vec![BATTERY]), ScanOptions::default())
        .unwrap();
    let discovered = stream.next().await.unwrap();
    assert_eq!(discovered.peripheral.id(), HEART);
    assert_eq!(discovered.peripheral.name().as_deref(), Some("Pulse"));
    assert!(future::poll_once(stream.next()).await.is_none());
}

#[tokio::test]
async fn scan_requires_an_available_radio() {
    let sim = SimRadio::with_state(RadioState::PoweredOff);
    let central = CentralManager::new(Arc::new(sim.clone()));
    let err = central
        .scan(ScanFilter::new(), ScanOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RadioUnavailable);
    assert!(sim.take_commands().is_empty());
}

#[tokio::test]
async fn scan_duration_ends_the_stream() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    let mut stream = central
        .scan(
            ScanFilter::new(),
            ScanOptions {
                duration: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(stream.next().await.unwrap().peripheral.id(), HEART);
    assert!(stream.next().await.is_none());
    let commands = sim.take_commands();
    assert_eq!(commands.last(), Some(&SimCommand::StopScan));
}

#[tokio::test]
async fn a_new_scan_replaces_the_previous_session() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    let mut first = central.scan(ScanFilter::new(), ScanOptions::default()).unwrap();
    assert_eq!(first.next().await.unwrap().peripheral.id(), HEART);
    let mut second = central.scan(ScanFilter::new(), ScanOptions::default()).unwrap();
    // The first stream ends; the second sees the fresh burst.
    assert!(first.next().await.is_none());
    assert_eq!(second.next().await.unwrap().peripheral.id(), HEART);
    let starts = sim
        .take_commands()
        .into_iter()
        .filter(|c| matches!(c, SimCommand::StartScan(_)))
        .count();
    assert_eq!(starts, 2);
}

#[tokio::test]
async fn dropping_the_stream_stops_the_scan() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    let stream = central.scan(ScanFilter::new(), ScanOptions::default()).unwrap();
    drop(stream);
    assert_eq!(sim.take_commands().last(), Some(&SimCommand::StopScan));
}

#[tokio::test]
async fn repeat_advertisements_are_suppressed_by_default() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    let mut stream = central.scan(ScanFilter::new(), ScanOptions::default()).unwrap();
    assert_eq!(stream.next().await.unwrap().peripheral.id(), HEART);
    sim.advertise(HEART);
    assert!(future::poll_once(stream.next()).await.is_none());

    let mut stream = central
        .scan(
            ScanFilter::new(),
            ScanOptions {
                allow_duplicates: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(stream.next().await.unwrap().peripheral.id(), HEART);
    sim.advertise(HEART);
    assert_eq!(stream.next().await.unwrap().peripheral.id(), HEART);
}

#[tokio::test]
async fn repeat_advertisements_update_the_record() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART).with_rssi(-40)]);
    let mut stream = central
        .scan(
            ScanFilter::new(),
            ScanOptions {
                allow_duplicates: true,
                ..Default::default()
            },
        )
        .unwrap();
    let peripheral = stream.next().await.unwrap().peripheral;
    assert_eq!(peripheral.rssi(), Some(-40));
    sim.set_rssi(HEART, -75);
    sim.advertise(HEART);
    stream.next().await.unwrap();
    assert_eq!(peripheral.rssi(), Some(-75));
}

#[tokio::test]
async fn connect_tracks_connection_state() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    central.connect(HEART).await.unwrap();
    assert!(central.is_connected(HEART));
    let peripheral = central.peripheral(HEART).unwrap();
    assert_eq!(peripheral.connection_state(), ConnectionState::Connected);
    assert!(sim.is_connected(HEART));
    assert_eq!(sim.take_commands(), vec![SimCommand::Connect(HEART)]);
}

#[tokio::test]
async fn connecting_while_connected_is_a_noop() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    central.connect(HEART).await.unwrap();
    sim.take_commands();
    central.connect(HEART).await.unwrap();
    assert!(sim.take_commands().is_empty());
}

#[tokio::test]
async fn overlapping_connects_are_refused() {
    let (central, _sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_connect(ConnectBehavior::Hold),
    ]);
    let mut first = pin!(central.connect(HEART));
    assert!(future::poll_once(first.as_mut()).await.is_none());

    let err = central.connect(HEART).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    // The original attempt is unaffected.
    assert!(future::poll_once(first.as_mut()).await.is_none());
}

#[tokio::test]
async fn a_held_connect_resolves_when_completed() {
    let (central, sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_connect(ConnectBehavior::Hold),
    ]);
    let mut attempt = pin!(central.connect(HEART));
    assert!(future::poll_once(attempt.as_mut()).await.is_none());
    assert_eq!(
        central.peripheral(HEART).unwrap().connection_state(),
        ConnectionState::Connecting
    );
    sim.complete_connect(HEART, Ok(()));
    future::poll_once(attempt.as_mut()).await.unwrap().unwrap();
    assert!(central.is_connected(HEART));
}

#[tokio::test]
async fn a_refused_connect_reports_the_transport_error() {
    let (central, _sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_connect(ConnectBehavior::Refuse(LinkError::ConnectionFailed)),
    ]);
    let err = central.connect(HEART).await.unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::Transport(LinkError::ConnectionFailed)
    );
    assert!(!central.is_connected(HEART));
}

#[tokio::test]
async fn connecting_to_an_unknown_id_fails_through_the_link() {
    let (central, _sim) = manager_with(vec![]);
    let err = central.connect(HEART).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport(LinkError::UnknownDevice));
}

#[tokio::test]
async fn connect_times_out_and_cancels_the_attempt() {
    let (central, sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_connect(ConnectBehavior::Hold),
    ]);
    let err = central
        .connect_with_options(
            HEART,
            ConnectOptions {
                timeout: Some(Duration::from_millis(50)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(!central.is_connected(HEART));
    let commands = sim.take_commands();
    assert_eq!(
        commands,
        vec![SimCommand::Connect(HEART), SimCommand::CancelConnect(HEART)]
    );

    // The slot is free again for a later attempt.
    let mut retry = pin!(central.connect(HEART));
    assert!(future::poll_once(retry.as_mut()).await.is_none());
}

#[tokio::test]
async fn dropping_a_connect_future_abandons_the_attempt() {
    let (central, sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_connect(ConnectBehavior::Hold),
    ]);
    {
        let mut attempt = pin!(central.connect(HEART));
        assert!(future::poll_once(attempt.as_mut()).await.is_none());
    }
    assert_eq!(
        sim.take_commands(),
        vec![SimCommand::Connect(HEART), SimCommand::CancelConnect(HEART)]
    );
    assert_eq!(
        central.peripheral(HEART).unwrap().connection_state(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn disconnect_cancels_a_connect_in_flight() {
    let (central, sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_connect(ConnectBehavior::Hold),
    ]);
    let mut attempt = pin!(central.connect(HEART));
    assert!(future::poll_once(attempt.as_mut()).await.is_none());

    central.disconnect(HEART).await.unwrap();
    let resolved = future::poll_once(attempt.as_mut()).await.unwrap();
    assert_eq!(resolved.unwrap_err().kind(), ErrorKind::Canceled);
    assert!(
        sim.take_commands()
            .contains(&SimCommand::CancelConnect(HEART))
    );
}

#[tokio::test]
async fn disconnecting_when_not_connected_is_a_noop() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    central.disconnect(HEART).await.unwrap();
    assert!(sim.take_commands().is_empty());
}

#[tokio::test]
async fn a_requested_disconnect_is_announced_as_such() {
    let (central, _sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    central.connect(HEART).await.unwrap();
    let mut disconnections = central.disconnections();
    central.disconnect(HEART).await.unwrap();
    let disconnection = disconnections.recv().await.unwrap();
    assert_eq!(disconnection.peripheral.id(), HEART);
    assert!(disconnection.requested);
    assert!(disconnection.error.is_none());
}

#[tokio::test]
async fn a_lost_connection_is_announced_with_its_reason() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    central.connect(HEART).await.unwrap();
    let mut disconnections = central.disconnections();
    sim.drop_connection(HEART, Some(LinkError::PeripheralDisconnected));
    let disconnection = disconnections.recv().await.unwrap();
    assert!(!disconnection.requested);
    assert_eq!(
        disconnection.error.unwrap().kind(),
        ErrorKind::Transport(LinkError::PeripheralDisconnected)
    );
    assert!(!central.is_connected(HEART));
}

#[tokio::test]
async fn an_unmatched_connection_event_is_torn_down() {
    let (central, sim) = manager_with(vec![SimPeripheral::new(HEART)]);
    sim.inject(LinkEvent::Connected { id: HEART });
    assert!(!central.is_connected(HEART));
    assert!(sim.take_commands().contains(&SimCommand::Disconnect(HEART)));
}

#[tokio::test]
async fn radio_loss_fails_requests_and_connections() {
    let (central, sim) = manager_with(vec![
        SimPeripheral::new(HEART)
            .with_service(battery_service())
            .with_manual_reads(),
        SimPeripheral::new(LAMP),
    ]);
    central.connect(HEART).await.unwrap();
    central.connect(LAMP).await.unwrap();
    let heart = central.peripheral(HEART).unwrap();
    heart.discover_services(&[]).await.unwrap();
    let mut notifications = heart.subscribe(&BATTERY_LEVEL).await.unwrap();

    let mut states = central.state_updates();
    let mut disconnections = central.disconnections();
    let mut read = pin!(heart.read(&BATTERY_LEVEL));
    assert!(future::poll_once(read.as_mut()).await.is_none());

    sim.set_state(RadioState::PoweredOff);

    let resolved = future::poll_once(read.as_mut()).await.unwrap();
    assert_eq!(resolved.unwrap_err().kind(), ErrorKind::RadioUnavailable);
    assert_eq!(states.recv().await.unwrap(), RadioState::PoweredOff);
    assert_eq!(central.state(), RadioState::PoweredOff);
    assert!(!central.is_connected(HEART));
    assert!(!central.is_connected(LAMP));
    for _ in 0..2 {
        let disconnection = disconnections.recv().await.unwrap();
        assert_eq!(
            disconnection.error.unwrap().kind(),
            ErrorKind::RadioUnavailable
        );
        assert!(!disconnection.requested);
    }
    assert!(notifications.next().await.is_none());
}

#[tokio::test]
async fn a_new_scan_evicts_disconnected_records() {
    let (central, _sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_service(battery_service()),
        SimPeripheral::new(LAMP),
    ]);
    let mut stream = central.scan(ScanFilter::new(), ScanOptions::default()).unwrap();
    stream.next().await.unwrap();
    stream.next().await.unwrap();
    central.connect(HEART).await.unwrap();
    assert_eq!(central.known_peripherals().len(), 2);

    // Only the connected peripheral survives the next scan's admission.
    let filter = ScanFilter {
        ids: vec![PeripheralId::from_u128(99)],
        ..Default::default()
    };
    let _stream = central.scan(filter, ScanOptions::default()).unwrap();
    let known = central.known_peripherals();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].id(), HEART);
}

#[tokio::test]
async fn forget_cancels_requests_and_tears_down() {
    let (central, sim) = manager_with(vec![
        SimPeripheral::new(HEART)
            .with_service(battery_service())
            .with_manual_reads(),
    ]);
    central.connect(HEART).await.unwrap();
    let heart = central.peripheral(HEART).unwrap();
    heart.discover_services(&[]).await.unwrap();
    let mut read = pin!(heart.read(&BATTERY_LEVEL));
    assert!(future::poll_once(read.as_mut()).await.is_none());

    central.forget(HEART);

    let resolved = future::poll_once(read.as_mut()).await.unwrap();
    assert_eq!(resolved.unwrap_err().kind(), ErrorKind::Canceled);
    assert!(central.peripheral(HEART).is_none());
    assert!(central.known_peripherals().is_empty());
    assert!(sim.take_commands().contains(&SimCommand::Disconnect(HEART)));
}

#[tokio::test]
async fn name_filters_match_substrings() {
    let (central, _sim) = manager_with(vec![
        SimPeripheral::new(HEART).with_name("Pulse HR"),
        SimPeripheral::new(LAMP).with_name("Lamp"),
    ]);
    let filter = ScanFilter {
        name: Some("Pulse".to_string()),
        ..Default::default()
    };
    let mut stream = central.scan(filter, ScanOptions::default()).unwrap();
    assert_eq!(stream.next().await.unwrap().peripheral.id(), HEART);
    assert!(future::poll_once(stream.next()).await.is_none());
}
