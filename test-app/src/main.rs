// extplane test application -- CLI tool for exercising the ExtPlane client
// against a running simulator.
//
// Usage:
//   extplane-test-app probe
//   extplane-test-app --host 192.168.1.20 watch sim/cockpit2/gauges/indicators/airspeed_kts_pilot
//   extplane-test-app watch --accuracy 0.1 --duration 30 sim/flightmodel/position/latitude \
//       sim/flightmodel/position/longitude
//   extplane-test-app get sim/aircraft/view/acf_tailnum
//   extplane-test-app set sim/cockpit/switches/gear_handle_status 1
//   extplane-test-app set --array sim/cockpit2/engine/actuators/throttle_ratio 0.5 0.5
//   extplane-test-app cmd once sim/lights/landing_lights_toggle
//   extplane-test-app cmd begin sim/engines/engage_starters
//   extplane-test-app interval 0.2
//   extplane-test-app key 12
//   extplane-test-app button 3 --release
//   extplane-test-app -vv monitor --duration 60

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use extplane::{Command as WireCommand, ConnectionEvent, DataRef, ExtPlaneBuilder, ExtPlaneClient};

/// How long to wait for the host to close the connection after `disconnect`.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// extplane test application -- talks to the ExtPlane plugin from the
/// command line.
#[derive(Parser)]
#[command(name = "extplane-test-app", version, about)]
struct Cli {
    /// Simulator host name or IP address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// ExtPlane TCP port.
    #[arg(long, default_value_t = extplane::DEFAULT_PORT)]
    port: u16,

    /// Connection timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    /// `RUST_LOG` takes precedence when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether something accepts connections on host:port.
    Probe,

    /// Subscribe to datarefs and print every update.
    Watch {
        /// Dataref names.
        #[arg(required = true)]
        names: Vec<String>,

        /// Minimum change that triggers an update.
        #[arg(long)]
        accuracy: Option<f32>,

        /// Seconds to watch (0 = until the connection ends).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Print the current value of a dataref.
    Get {
        name: String,

        /// Seconds to wait for the first update.
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },

    /// Write a dataref.
    Set {
        name: String,

        #[arg(required = true)]
        values: Vec<String>,

        /// Send the values in array notation (`[a,b,c]`).
        #[arg(long)]
        array: bool,
    },

    /// Run a simulator command.
    Cmd {
        #[arg(value_enum)]
        phase: CmdPhase,

        name: String,
    },

    /// Set the plugin's minimum update interval, in seconds.
    Interval { seconds: f64 },

    /// Simulate a key press.
    Key { id: u32 },

    /// Press (or release) a joystick button.
    Button {
        id: u32,

        #[arg(long)]
        release: bool,
    },

    /// Print connection events.
    Monitor {
        /// Seconds to monitor (0 = until the connection ends).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CmdPhase {
    Once,
    Begin,
    End,
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(cli: &Cli) -> Result<ExtPlaneClient> {
    ExtPlaneBuilder::new()
        .host(&cli.host)
        .port(cli.port)
        .connect_timeout(Duration::from_millis(cli.timeout_ms))
        .build()
        .context("invalid connection settings")
}

async fn connect(cli: &Cli) -> Result<ExtPlaneClient> {
    let client = build_client(cli)?;
    client
        .start()
        .await
        .with_context(|| format!("failed to connect to {}", client.addr()))?;
    tracing::info!(addr = %client.addr(), "Connected");
    Ok(client)
}

/// Ask the host to close the connection, wait for it to do so, then stop.
///
/// Everything queued before `disconnect` has been written by the time the
/// host closes, so one-shot commands are not lost to an early stop.
async fn finish(client: ExtPlaneClient, mut events: broadcast::Receiver<ConnectionEvent>) -> Result<()> {
    client.send(WireCommand::Disconnect)?;

    let closed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::ReceiveLoopStopped { .. }) => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;
    if closed.is_err() {
        tracing::debug!("Host did not close the connection, stopping anyway");
    }

    client.stop().await;
    Ok(())
}

fn format_values(dr: &DataRef) -> String {
    match &dr.values {
        Some(values) => values.join(" "),
        None => "(no value)".to_string(),
    }
}

fn format_type(dr: &DataRef) -> String {
    dr.data_type
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_probe(cli: &Cli) -> Result<()> {
    let client = build_client(cli)?;
    let start = Instant::now();
    let reachable = client
        .is_reachable(Duration::from_millis(cli.timeout_ms))
        .await;
    let elapsed = start.elapsed();

    if reachable {
        println!("{} is reachable ({:.1} ms)", client.addr(), elapsed.as_secs_f64() * 1000.0);
        Ok(())
    } else {
        bail!("{} is not reachable", client.addr());
    }
}

async fn cmd_watch(cli: &Cli, names: &[String], accuracy: Option<f32>, duration_secs: u64) -> Result<()> {
    let client = connect(cli).await?;
    let mut events = client.subscribe_events();
    let (tx, mut rx) = mpsc::unbounded_channel::<DataRef>();

    for name in names {
        let tx = tx.clone();
        client.register(name, move |dr: &DataRef| {
            let _ = tx.send(dr.clone());
        });
        client.subscribe(name, accuracy)?;
    }
    drop(tx);

    println!("Watching {} dataref(s) on {}...", names.len(), client.addr());
    println!("{:<10} {:<60} {:<10} Value", "Time", "Dataref", "Type");
    println!("{:-<10} {:-<60} {:-<10} {:-<20}", "", "", "", "");

    let start = Instant::now();
    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));
    let mut updates = 0u64;

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            update = rx.recv() => match update {
                Some(dr) => {
                    updates += 1;
                    println!(
                        "{:>9.3}s {:<60} {:<10} {}",
                        start.elapsed().as_secs_f64(),
                        dr.name,
                        format_type(&dr),
                        format_values(&dr)
                    );
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(ConnectionEvent::ReceiveLoopStopped { error }) => {
                    println!("Connection ended: {}", error.unwrap_or_else(|| "stopped".into()));
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(timeout) => {
                if deadline.is_some() {
                    break;
                }
            }
        }
    }

    println!();
    println!("{updates} update(s) in {:.1} s", start.elapsed().as_secs_f64());

    for name in names {
        client.unsubscribe(name)?;
    }
    finish(client, events).await
}

async fn cmd_get(cli: &Cli, name: &str, wait_secs: u64) -> Result<()> {
    let client = connect(cli).await?;
    let events = client.subscribe_events();

    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<DataRef>>();
    let store = Arc::clone(client.store());
    client.register(name, move |dr: &DataRef| {
        if let Some(snapshot) = store.get(&dr.name) {
            let _ = tx.send(snapshot);
        }
    });
    client.subscribe(name, None)?;

    let result = tokio::time::timeout(Duration::from_secs(wait_secs), rx.recv()).await;
    client.unsubscribe(name)?;
    finish(client, events).await?;

    match result {
        Ok(Some(dr)) => {
            println!("{} ({}) = {}", dr.name, format_type(&dr), format_values(&dr));
            Ok(())
        }
        _ => bail!("no update for {name} within {wait_secs} s (unknown dataref?)"),
    }
}

async fn cmd_send(cli: &Cli, command: WireCommand) -> Result<()> {
    let client = connect(cli).await?;
    let events = client.subscribe_events();
    let line = command.render();
    client.send(command)?;
    finish(client, events).await?;
    println!("Sent: {line}");
    Ok(())
}

async fn cmd_monitor(cli: &Cli, duration_secs: u64) -> Result<()> {
    let client = build_client(cli)?;
    let mut event_rx = client.subscribe_events();
    client.start().await?;

    println!("Monitoring connection events on {}...", client.addr());

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, event_rx.recv()).await {
            Ok(Ok(event)) => {
                println!("[event] {event:?}");
                if matches!(event, ConnectionEvent::ReceiveLoopStopped { .. }) {
                    break;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    let status = client.status();
    println!("Loops: send {}, receive {}", status.send, status.receive);
    if let Some(version) = client.protocol_version() {
        println!("Protocol version: {version}");
    }
    client.stop().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Probe => cmd_probe(&cli).await,
        Command::Watch {
            names,
            accuracy,
            duration,
        } => cmd_watch(&cli, names, *accuracy, *duration).await,
        Command::Get { name, wait } => cmd_get(&cli, name, *wait).await,
        Command::Set {
            name,
            values,
            array,
        } => {
            let command = if *array {
                WireCommand::set_array(name.as_str(), values)
            } else {
                WireCommand::set(name.as_str(), values)
            };
            cmd_send(&cli, command).await
        }
        Command::Cmd { phase, name } => {
            let command = match phase {
                CmdPhase::Once => WireCommand::once(name.as_str()),
                CmdPhase::Begin => WireCommand::begin(name.as_str()),
                CmdPhase::End => WireCommand::end(name.as_str()),
            };
            cmd_send(&cli, command).await
        }
        Command::Interval { seconds } => {
            let setting = extplane::RuntimeSetting::UpdateInterval(interval(*seconds)?);
            cmd_send(&cli, WireCommand::RuntimeSetting(setting)).await
        }
        Command::Key { id } => cmd_send(&cli, WireCommand::Key { id: *id }).await,
        Command::Button { id, release } => {
            let command = if *release {
                WireCommand::ButtonRelease { id: *id }
            } else {
                WireCommand::ButtonPress { id: *id }
            };
            cmd_send(&cli, command).await
        }
        Command::Monitor { duration } => cmd_monitor(&cli, *duration).await,
    }
}

/// Convert a user-supplied interval, rejecting values `Duration` cannot hold.
fn interval(seconds: f64) -> Result<Duration> {
    if seconds <= 0.0 {
        bail!("interval must be a positive number of seconds");
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| anyhow::anyhow!("invalid interval {seconds}: {e}"))
}
