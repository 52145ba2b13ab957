use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use ble_central::{CentralManager, PeripheralId, RadioState, ScanFilter, ScanOptions};
use ble_link_sim::{SimPeripheral, SimRadio};
use futures_lite::StreamExt;
use tracing::info;
use tracing::metadata::LevelFilter;

const HEART: PeripheralId = PeripheralId::from_u128(0x1001);
const THERMO: PeripheralId = PeripheralId::from_u128(0x1002);

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

    let sim = SimRadio::with_state(RadioState::PoweredOff);
    sim.add_peripheral(
        SimPeripheral::new(HEART)
            .with_name("Pulse-1")
            .with_rssi(-52),
    );
    sim.add_peripheral(
        SimPeripheral::new(THERMO)
            .with_name("Thermo-9")
            .with_rssi(-71),
    );

    let central = CentralManager::new(Arc::new(sim.clone()));

    if !central.state().is_available() {
        let mut updates = central.state_updates();
        sim.set_state(RadioState::PoweredOn);
        loop {
            let state = updates.next().await.unwrap();
            if state.is_available() {
                break;
            }
        }
    }

    info!("starting scan");
    let mut scan = central.scan(
        ScanFilter::new(),
        ScanOptions {
            allow_duplicates: false,
            duration: Some(Duration::from_millis(500)),
        },
    )?;
    info!("scan started");

    sim.advertise(HEART);
    sim.advertise(THERMO);
    sim.advertise(HEART);

    while let Some(discovered) = scan.next().await {
        info!(
            "{}{}: {:?}",
            discovered.peripheral.name().as_deref().unwrap_or("(unknown)"),
            format!(" ({}dBm)", discovered.rssi),
            discovered.advertisement
        );
    }
    info!("scan finished");

    Ok(())
}
