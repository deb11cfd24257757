use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use rexecd::config::{format_config, Config, ServerSection};
use rexecd::logging::{init_logging, LogConfig, Verbosity};
use rexecd::Daemon;

#[derive(Parser)]
#[command(name = "rexecd")]
#[command(version)]
#[command(about = "Mutual-TLS remote execution and file transfer daemon")]
#[command(
    long_about = "An HTTPS daemon that lets clients holding a certificate signed by the configured CA run commands, spawn processes and move files on this host."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (the default)
    Serve(ServeArgs),
    /// Show the effective configuration
    Config {
        /// Read this config file instead of the default one
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the effective configuration to the default config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Read this config file instead of the default one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    address: Option<String>,

    /// HTTPS port
    #[arg(short, long)]
    port: Option<u16>,

    /// CA certificate used to verify clients (PEM)
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Server certificate (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Server private key (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Show the console menu
    #[arg(long)]
    menu: bool,

    /// Log each request
    #[arg(short, long)]
    verbose: bool,

    /// Log command output and exit codes
    #[arg(short, long)]
    debug: bool,

    /// Only log errors to stderr
    #[arg(short, long)]
    quiet: bool,

    /// Also write a debug-level log to this file
    #[arg(long)]
    log_file: Option<String>,
}

impl ServeArgs {
    /// Command-line values take precedence over the config file.
    fn apply(&self, server: &mut ServerSection) {
        if let Some(address) = &self.address {
            server.bind_address = Some(address.clone());
        }
        if let Some(port) = self.port {
            server.https_port = Some(port);
        }
        if let Some(ca) = &self.ca {
            server.ca = Some(ca.clone());
        }
        if let Some(cert) = &self.cert {
            server.cert = Some(cert.clone());
        }
        if let Some(key) = &self.key {
            server.key = Some(key.clone());
        }
        if self.menu {
            server.enable_menu = Some(true);
        }
        if self.verbose {
            server.verbose = Some(true);
        }
        if self.debug {
            server.debug = Some(true);
        }
        if let Some(log_file) = &self.log_file {
            server.log_file = Some(log_file.clone());
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load().context("Failed to load config"),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config.server);
    let resolved = config.resolve().context("Invalid configuration")?;

    let _guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_flags(args.quiet, resolved.verbose, resolved.debug),
        log_file: config.server.log_file.clone(),
    });

    let mut daemon = Daemon::new(resolved);
    daemon.run().await.context("Daemon failed")?;
    Ok(())
}

fn show_config(path: Option<PathBuf>, init: bool) -> Result<()> {
    let config = load_config(path.as_deref())?;
    let resolved = config.resolve().context("Invalid configuration")?;

    if init {
        let target = Config::config_path()?;
        if target.exists() {
            anyhow::bail!("Config file already exists: {}", target.display());
        }
        Config::from(&resolved)
            .save()
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("Wrote {}", target.display());
        println!();
    }

    println!("{}", format_config(&resolved));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => serve(args).await,
        None => serve(ServeArgs::default()).await,
        Some(Commands::Config { config, init }) => show_config(config, init),
    }
}
