use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use ble_central::{
    CentralManager, Characteristic, CharacteristicProperties, ConnectOptions, PeripheralId,
    Service, WriteMode,
};
use ble_link_sim::{SimPeripheral, SimRadio};
use btuuid::{BluetoothUuid, BluetoothUuid16};
use futures_lite::StreamExt;
use tracing::info;
use tracing::metadata::LevelFilter;

const MONITOR: PeripheralId = PeripheralId::from_u128(0x2001);
const BATTERY: BluetoothUuid = BluetoothUuid::Uuid16(BluetoothUuid16::new(0x180f));
const BATTERY_LEVEL: BluetoothUuid = BluetoothUuid::Uuid16(BluetoothUuid16::new(0x2a19));

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let sim = SimRadio::new();
    sim.add_peripheral(
        SimPeripheral::new(MONITOR)
            .with_name("Pulse-1")
            .with_service(Service {
                uuid: BATTERY,
                is_primary: true,
                characteristics: vec![Characteristic {
                    uuid: BATTERY_LEVEL,
                    properties: CharacteristicProperties::READ
                        | CharacteristicProperties::WRITE
                        | CharacteristicProperties::NOTIFY,
                }],
            })
            .with_value(BATTERY_LEVEL, &[93]),
    );

    let central = CentralManager::new(Arc::new(sim.clone()));
    let mut disconnections = central.disconnections();

    central
        .connect_with_options(
            MONITOR,
            ConnectOptions {
                timeout: Some(Duration::from_secs(5)),
            },
        )
        .await?;
    let monitor = central.peripheral(MONITOR).expect("connected peripheral");
    info!(
        "connected to {}",
        monitor.name().as_deref().unwrap_or("(unknown)")
    );

    let services = monitor.discover_services(&[BATTERY]).await?;
    for service in &services {
        info!("service {:?}: {} characteristics", service.uuid, service.characteristics.len());
    }

    let level = monitor.read(&BATTERY_LEVEL).await?;
    info!("battery level: {:?}", level);

    monitor.write(&BATTERY_LEVEL, &[90], WriteMode::WithResponse).await?;

    let mut notifications = monitor.subscribe(&BATTERY_LEVEL).await?;
    info!("subscribed");

    sim.notify(MONITOR, &BATTERY_LEVEL, &[89]);
    sim.notify(MONITOR, &BATTERY_LEVEL, &[88]);
    for _ in 0..2 {
        let value = notifications.next().await.ok_or("notification stream ended")?;
        info!("notification: {:?}", value);
    }

    monitor.unsubscribe(&BATTERY_LEVEL).await?;
    central.disconnect(MONITOR).await?;

    let disconnection = disconnections.recv().await?;
    info!(
        "disconnected from {} (requested: {})",
        disconnection.peripheral.name().as_deref().unwrap_or("(unknown)"),
        disconnection.requested
    );

    Ok(())
}
