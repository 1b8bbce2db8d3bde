// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT ingestion service CLI
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! mqtt-ingest --config ingest.toml
//!
//! # Override the broker
//! mqtt-ingest --config ingest.toml --host broker.local --port 1884
//!
//! # Keep records in memory instead of calling the backend
//! mqtt-ingest --config ingest.yaml --dry-run
//!
//! # Generate or check a configuration
//! mqtt-ingest gen-config --output ingest.toml
//! mqtt-ingest validate --config ingest.toml
//! ```

use clap::{Parser, Subcommand};
use mqtt_ingest::config::{BackendConfig, DefaultsConfig, OverflowConfig, WorkflowConfig};
use mqtt_ingest::stats::adaptive_interval;
use mqtt_ingest::{
    Backend, HttpBackend, IngestConfig, IngestService, IngestStatsSnapshot, MemoryBackend,
    RouteConfig, SinkKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// MQTT ingestion service
#[derive(Parser, Debug)]
#[command(name = "mqtt-ingest")]
#[command(about = "MQTT ingestion service - ordered writes into a structured backend")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Broker port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Write into an in-memory backend instead of the configured one
    #[arg(long)]
    dry_run: bool,

    /// Statistics reporting interval (seconds, 0 for adaptive)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "ingest.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The service log level may come from its config file.
    let config = match (&args.command, &args.config) {
        (None, Some(path)) => Some(IngestConfig::from_file(path)?),
        _ => None,
    };

    let level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let Some(mut config) = config else {
        eprintln!("Missing --config (see `mqtt-ingest gen-config`)");
        std::process::exit(2);
    };
    if let Some(host) = args.host {
        config.mqtt.host = host;
    }
    if let Some(port) = args.port {
        config.mqtt.port = port;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }

    if args.dry_run {
        tracing::warn!("dry run: records are kept in memory only");
        run(config, Arc::new(MemoryBackend::new())).await
    } else {
        let backend = HttpBackend::new(&config.backend)?;
        run(config, Arc::new(backend)).await
    }
}

async fn run<B: Backend>(
    config: IngestConfig,
    backend: Arc<B>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats_interval = config.stats_interval_secs;
    let mut service = IngestService::new(config, backend)?;

    println!("MQTT Ingestion Service v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!(
        "Broker: {}:{}",
        service.config().mqtt.host,
        service.config().mqtt.port
    );
    for route in service.pipeline().routes().routes() {
        println!("Route: {} -> {:?}", route.pattern.as_str(), route.target);
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let handle = service.run()?;

    // Stats reporting task
    let stats_handle = handle.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            let period = if stats_interval > 0 {
                Duration::from_secs(stats_interval)
            } else {
                adaptive_interval(started.elapsed())
            };
            tokio::time::sleep(period).await;
            if !stats_handle.is_running() {
                break;
            }
            tracing::info!("{}", stats_handle.snapshot());
        }
    });

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    let last = handle.snapshot();
    handle.stop();

    println!("\nFinal Statistics:");
    print_stats(&last);

    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = IngestConfig {
        name: "example-ingest".into(),
        backend: BackendConfig {
            token: Some("${INGEST_TOKEN}".into()),
            ..Default::default()
        },
        overflow: OverflowConfig {
            enabled: true,
            ..Default::default()
        },
        workflow: Some(WorkflowConfig {
            external_id: "raw-to-model".into(),
            version: None,
            trigger_interval_secs: 300,
            debounce_window_secs: 5,
        }),
        defaults: DefaultsConfig {
            instance_space: Some("sp_site".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    config.add_route(RouteConfig::data_model("alarms/frame", "AlarmFrame", "sp_site"));
    config.add_route(
        RouteConfig::data_model("alarms/event/#", "AlarmEvent", "sp_site")
            .normalize_timestamps(true),
    );
    config.add_route(RouteConfig::raw("historian/#"));
    config.add_route(RouteConfig::timeseries("states/#", "sp_site"));
    config.timeseries.status_pipeline = Some("ep-mqtt-ingest".into());

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# MQTT Ingestion Configuration
# Generated by mqtt-ingest gen-config
#
# ${{VAR}} is replaced by the environment variable VAR when loading.

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match IngestConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Service: {}", config.name);
            println!("Broker: {}:{}", config.mqtt.host, config.mqtt.port);
            println!("Routes: {}", config.routes.len());
            for (i, route) in config.routes.iter().enumerate() {
                let target = match route.sink {
                    SinkKind::Raw => "raw rows".to_string(),
                    SinkKind::TimeSeries => format!(
                        "time series {}* in {}",
                        config.timeseries.external_id_prefix,
                        config.instance_space_for(route).unwrap_or("?")
                    ),
                    SinkKind::DataModel => format!(
                        "{} ({})",
                        route.collection.as_deref().unwrap_or("?"),
                        route
                            .kind
                            .unwrap_or_else(|| config.classify.kind_of(
                                route.collection.as_deref().unwrap_or_default()
                            ))
                    ),
                };
                println!("  [{}] {} -> {}", i, route.topic, target);
            }
            if let Some(workflow) = &config.workflow {
                println!("Workflow: {}", workflow.external_id);
            }
            if let Some(pipeline) = &config.timeseries.status_pipeline {
                println!(
                    "Status heartbeat: {} every {}s",
                    pipeline, config.timeseries.status_interval_secs
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &IngestStatsSnapshot) {
    println!("--- Ingestion Statistics ---");
    for (label, kind) in [
        ("Events", &stats.events),
        ("Frames", &stats.frames),
        ("Other", &stats.other),
    ] {
        println!(
            "  {}: {} received, {} written, {} buffered, {} replayed, {} expired, {} evicted, {} errors",
            label,
            kind.received,
            kind.written,
            kind.buffered,
            kind.retried,
            kind.expired,
            kind.evicted,
            kind.errored
        );
    }
    println!(
        "  Total written: {} | Unrouted: {} | Overflowed: {} | Uptime: {}s ({:.1} msg/s)",
        stats.total_written(),
        stats.unrouted,
        stats.overflowed,
        stats.uptime_secs,
        stats.messages_per_second()
    );
    if stats.pending > 0 || stats.overflow > 0 {
        println!(
            "  Discarded at shutdown: {} pending, {} queued",
            stats.pending, stats.overflow
        );
    }
}
