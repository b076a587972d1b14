// src/main.rs - probe-host: the Z probe against a simulated machine, G-code on stdin
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use krusty_zprobe::config;
use krusty_zprobe::dispatcher::Dispatcher;
use krusty_zprobe::gcode::CommandOutput;
use krusty_zprobe::probe::ZProbe;
use krusty_zprobe::scheduler::SlowTicker;
use krusty_zprobe::simulator::{MachineCommands, SimMachine, SimProbePin};

/// Run the Z probe module against a simulated machine
#[derive(Parser, Debug)]
#[command(name = "probe-host", about = "Z probe host reading G-code lines from stdin.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "printer.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.to_string_lossy();
    tracing::info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", config_path, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    tracing::info!("Kinematics: {}", config.machine.kinematics);

    let machine = Arc::new(SimMachine::new(
        &config.simulator,
        config.machine.forbids_direct_axis_assignment(),
    ));
    let pin = Arc::new(SimProbePin::new(machine.clone()));

    let mut dispatcher = Dispatcher::new();
    Arc::new(MachineCommands::new(machine.clone())).register(&mut dispatcher);

    let ticker = SlowTicker::new();
    let poller = match ZProbe::configure(&config, machine.clone(), pin) {
        Ok(Some(zprobe)) => {
            zprobe.register(&mut dispatcher);
            Some((zprobe.start(&ticker), zprobe))
        }
        Ok(None) => None,
        Err(e) => {
            tracing::error!("Failed to configure Z probe: {}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let mut out = CommandOutput::new();
        dispatcher.dispatch_line(line, &mut out).await;
        print!("{}", out);
        println!("ok");
    }

    ticker.shutdown();
    if let Some((handle, _zprobe)) = poller {
        handle.await?;
    }
    tracing::info!("probe-host stopped");
    Ok(())
}
