use anyhow::{Context, Result};
use clap::Parser;
use spiderlink::{
    BleTransport, BluetoothTransport, FlightState, Identity, PeripheralRecord, Pilot, Roster,
    Session, SessionConfig, SessionEvent, SimulatedTransport, Swarm, SwarmConfig, SwarmEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "spiderlink",
    about = "Fly a minidrone, or a swarm of them, over BLE",
    version
)]
struct Cli {
    /// Use the in-process simulated BLE stack instead of BlueZ
    #[arg(long)]
    simulate: bool,

    /// Assemble a swarm from IDENTITIES (any minidrone if none are given)
    #[arg(long)]
    swarm: bool,

    /// Swarm enrollment window in seconds
    #[arg(long, default_value_t = spiderlink_shared::timing::ENROLLMENT_TIMEOUT_SECS)]
    timeout: u64,

    /// Seconds to hover before landing
    #[arg(long, default_value_t = 3)]
    hold: u64,

    /// Hardware addresses or advertised names
    identities: Vec<String>,
}

/// How long to wait for the drone to confirm a flying state
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let transport = open_transport(&cli).await?;
    info!("[MAIN] Transport: {}", transport.name());

    if cli.swarm {
        fly_swarm(transport, &cli).await
    } else {
        fly_single(transport, &cli).await
    }
}

async fn open_transport(cli: &Cli) -> Result<Arc<dyn BleTransport>> {
    if !cli.simulate {
        let bluetooth = BluetoothTransport::new()
            .await
            .context("Failed to open the Bluetooth adapter")?;
        return Ok(Arc::new(bluetooth));
    }

    let sim = SimulatedTransport::new().with_firmware(87);
    let names: Vec<String> = if cli.identities.is_empty() {
        let count = if cli.swarm { 3 } else { 1 };
        (1..=count).map(|i| format!("RS_SIM{}", i)).collect()
    } else {
        cli.identities.clone()
    };
    for (i, name) in names.into_iter().enumerate() {
        let record = PeripheralRecord::new(format!("e0:14:00:00:00:{:02x}", i + 1)).with_name(name);
        sim.advertise_after(record, Duration::from_millis(200)).await;
    }
    Ok(Arc::new(sim))
}

async fn fly_single(transport: Arc<dyn BleTransport>, cli: &Cli) -> Result<()> {
    let config = match cli.identities.first() {
        Some(selector) => SessionConfig::for_device(selector.clone()),
        None => SessionConfig::default(),
    };
    if let Identity::Device(selector) = &config.identity {
        info!("[MAIN] Looking for {}", selector);
    }

    let mut session = Session::new(transport, config);
    tokio::spawn(log_session_events(session.subscribe()));

    session.connect().await?;
    session.start_drive_loop().await?;
    if let Ok(Some(rssi)) = session.signal_strength().await {
        info!("[MAIN] Signal strength {} dBm", rssi);
    }

    session.flat_trim().await?;
    let outcome = session.take_off().await?;
    debug!("[MAIN] take off: {:?}", outcome);
    confirm(&session, FlightState::Hovering).await;

    tokio::time::sleep(Duration::from_secs(cli.hold)).await;

    session.land().await?;
    confirm(&session, FlightState::Landed).await;

    session.disconnect().await?;
    Ok(())
}

async fn fly_swarm(transport: Arc<dyn BleTransport>, cli: &Cli) -> Result<()> {
    let config = SwarmConfig {
        roster: Roster::from_entries(cli.identities.clone()),
        enrollment_timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    };

    let mut swarm = Swarm::new(transport, config);
    tokio::spawn(log_swarm_events(swarm.subscribe()));

    let report = swarm.assemble().await?;
    if report.enrolled.is_empty() {
        warn!("[MAIN] No drones enrolled");
        return Ok(());
    }

    let takeoff = swarm.take_off().await;
    info!("[MAIN] Take off: {}/{} completed", takeoff.completed, takeoff.total());
    for (_, member) in swarm.members() {
        confirm(member, FlightState::Hovering).await;
    }

    tokio::time::sleep(Duration::from_secs(cli.hold)).await;

    let landing = swarm.land().await;
    info!("[MAIN] Land: {}/{} completed", landing.completed, landing.total());
    for (_, member) in swarm.members() {
        confirm(member, FlightState::Landed).await;
    }

    swarm.release().await;
    Ok(())
}

/// Wait for a reported flying state, logging instead of failing
async fn confirm(session: &Session, state: FlightState) {
    let label = session.status().label().to_string();
    match tokio::time::timeout(CONFIRM_TIMEOUT, session.wait_for_flight_state(state)).await {
        Ok(Ok(())) => info!("[MAIN] {} is {:?}", label, state),
        Ok(Err(e)) => warn!("[MAIN] {} never reached {:?}: {}", label, state, e),
        Err(_) => warn!("[MAIN] {} did not report {:?} in time", label, state),
    }
}

async fn log_session_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Ready) => info!("[MAIN] Session ready"),
            Ok(SessionEvent::Battery(percent)) => info!("[MAIN] Battery {}%", percent),
            Ok(SessionEvent::LowBattery(percent)) => warn!("[MAIN] Battery low: {}%", percent),
            Ok(SessionEvent::FlightStateChanged { from, to }) => {
                info!("[MAIN] Flight state {:?} -> {:?}", from, to)
            }
            Ok(SessionEvent::ManeuverComplete(setpoint)) => {
                debug!("[MAIN] Maneuver complete: {:?}", setpoint)
            }
            Ok(SessionEvent::Disconnected { reason }) => {
                info!("[MAIN] Disconnected: {}", reason);
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("[MAIN] Missed {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_swarm_events(mut events: broadcast::Receiver<SwarmEvent>) {
    loop {
        match events.recv().await {
            Ok(SwarmEvent::MemberEnrolled { id, name }) => {
                info!("[MAIN] Enrolled {} ({})", name.as_deref().unwrap_or("?"), id)
            }
            Ok(SwarmEvent::EnrollmentFailed { id, reason }) => {
                warn!("[MAIN] Could not enroll {}: {}", id, reason)
            }
            Ok(SwarmEvent::Assembled(report)) => {
                info!(
                    "[MAIN] Swarm assembled with {} drones ({:?})",
                    report.enrolled.len(),
                    report.closed_by
                )
            }
            Ok(SwarmEvent::Released) => {
                info!("[MAIN] Swarm released");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("[MAIN] Missed {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
