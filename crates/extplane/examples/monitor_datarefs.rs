//! Monitor a few flight datarefs.
//!
//! Subscribes to airspeed, altitude and heading, prints every update as it
//! arrives, and reports connection events such as the host going away.
//!
//! # Requirements
//!
//! - X-Plane running with the ExtPlane plugin installed
//! - Host address adjusted for your setup (default 127.0.0.1:51000)
//!
//! # Usage
//!
//! ```sh
//! cargo run -p extplane --example monitor_datarefs
//! ```

use std::time::Duration;

use extplane::{ConnectionEvent, DataRef, ExtPlaneBuilder};

const DATAREFS: &[(&str, f32)] = &[
    ("sim/cockpit2/gauges/indicators/airspeed_kts_pilot", 0.5),
    ("sim/cockpit2/gauges/indicators/altitude_ft_pilot", 10.0),
    ("sim/cockpit2/gauges/indicators/heading_electric_deg_mag_pilot", 1.0),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = "127.0.0.1";
    println!("Connecting to ExtPlane on {}...", host);

    let client = ExtPlaneBuilder::new()
        .host(host)
        .connect_timeout(Duration::from_secs(3))
        .build()?;

    if !client.is_reachable(Duration::from_secs(1)).await {
        println!("Nothing is listening on {}. Is X-Plane running?", client.addr());
        return Ok(());
    }

    let mut events = client.subscribe_events();
    client.start().await?;

    // Fewer updates than the plugin's default rate are plenty for a display.
    client.set_update_interval(Duration::from_millis(200))?;

    let start = tokio::time::Instant::now();
    for (name, accuracy) in DATAREFS {
        client.subscribe(name, Some(*accuracy))?;
        client.register(name, move |dr: &DataRef| {
            let elapsed = start.elapsed();
            println!(
                "{:>6}.{:03}s {:<60} {}",
                elapsed.as_secs(),
                elapsed.subsec_millis(),
                dr.name,
                dr.values.as_deref().unwrap_or_default().join(" ")
            );
        });
    }

    println!("Monitoring for 60 seconds...\n");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(ConnectionEvent::Greeting { version })) => {
                println!("Host speaks ExtPlane protocol {}", version);
            }
            Ok(Ok(ConnectionEvent::ReceiveLoopStopped { error })) => {
                println!("Connection lost: {}", error.unwrap_or_else(|| "stopped".into()));
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("(missed {} events due to lag)", n);
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => break,
            Err(_) => break,
        }
    }

    for (name, _) in DATAREFS {
        client.unsubscribe(name)?;
    }
    // Give the send loop a moment to flush the unsubscribes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.stop().await;

    println!("\nLast known values:");
    for (name, _) in DATAREFS {
        match client.get_value(name) {
            Some(values) => println!("  {:<60} {}", name, values.join(" ")),
            None => println!("  {:<60} (no update received)", name),
        }
    }
    Ok(())
}
