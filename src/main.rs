//! RoboSwarm - Coordination server for a swarm of mobile robots
//!
//! Main entry point for the roboswarm CLI.

use clap::{Parser, Subcommand};
use roboswarm::config::{validate_config, validate_config_result, SwarmConfig};
use roboswarm::server::SwarmServer;
use std::path::{Path, PathBuf};
use std::process;

/// RoboSwarm - PSO coordination server for physical robots
#[derive(Parser, Debug)]
#[command(name = "roboswarm")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/roboswarm/config.yaml)
    #[arg(short, long, env = "ROBOSWARM_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set (e.g. debug, roboswarm::session=trace)
    #[arg(long, default_value = roboswarm::logging::DEFAULT_FILTER)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run the coordination server
    Serve {
        /// TCP port agents connect to
        #[arg(long)]
        tcp_port: Option<u16>,

        /// UDP port for discovery
        #[arg(long)]
        udp_port: Option<u16>,

        /// Start PSO iterations immediately
        #[arg(long)]
        autostart: bool,

        /// Do not read operator commands from stdin
        #[arg(long)]
        no_console: bool,
    },

    /// Check the configuration file and report every problem
    Validate,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = roboswarm::logging::init(&cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> roboswarm::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(SwarmConfig::default_path);

    match cli.command {
        Commands::Init { force } => handle_init_command(&config_path, force),
        Commands::Validate => handle_validate_command(&config_path),
        Commands::Serve {
            tcp_port,
            udp_port,
            autostart,
            no_console,
        } => {
            let mut config = load_or_default(&config_path, cli.config.is_some())?;
            if let Some(port) = tcp_port {
                config.network.tcp_port = port;
            }
            if let Some(port) = udp_port {
                config.network.udp_port = port;
            }
            if autostart {
                config.pso.autostart = true;
            }
            validate_config_result(&config)?;
            handle_serve_command(config, !no_console)
        }
    }
}

/// Load the config file; a missing default file falls back to defaults
fn load_or_default(path: &Path, explicit: bool) -> roboswarm::Result<SwarmConfig> {
    if !explicit && !path.exists() {
        tracing::info!(
            path = %path.display(),
            "No configuration file found, using defaults"
        );
        return Ok(SwarmConfig::new());
    }
    SwarmConfig::load(path)
}

fn handle_serve_command(config: SwarmConfig, console: bool) -> roboswarm::Result<()> {
    let shutdown_timeout = config.shutdown_timeout();
    let runtime = tokio::runtime::Runtime::new()?;

    let result = runtime.block_on(async move {
        let server = SwarmServer::bind(config).await?.with_console(console);
        server.run().await
    });

    // A pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(shutdown_timeout);
    result
}

fn handle_init_command(config_file: &Path, force: bool) -> roboswarm::Result<()> {
    if config_file.exists() && !force {
        println!("Configuration already exists at {}", config_file.display());
        println!();
        println!("To overwrite it, run:");
        println!("  roboswarm init --force");
        return Ok(());
    }

    let config = SwarmConfig::new();
    config.save(config_file)?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust ports, PSO weights and the objective in the file");
    println!("  2. Check it:");
    println!("     roboswarm validate");
    println!("  3. Start the server and type 'start_pso' once robots are connected:");
    println!("     roboswarm serve");

    Ok(())
}

fn handle_validate_command(config_file: &Path) -> roboswarm::Result<()> {
    let config = SwarmConfig::load(config_file)?;

    match validate_config(&config) {
        Ok(()) => {
            println!("✓ {} is valid", config_file.display());
            Ok(())
        }
        Err(errors) => {
            println!("✗ {} has {} problem(s):", config_file.display(), errors.len());
            for error in &errors {
                println!("  - {}", error);
            }
            Err(roboswarm::SwarmError::Config(format!(
                "{} validation error(s)",
                errors.len()
            )))
        }
    }
}
