//! Command fan-out over SSH.
//!
//! `fanout remote` runs one command on many hosts with bounded concurrency and
//! reports per-host failures. `fanout shell` starts an agent on one host and
//! runs commands against it interactively.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

use fanout::agent::bootstrap::Bootstrap;
use fanout::error::UsageError;
use fanout::exit_codes;
use fanout::hosts::expand;
use fanout::interactive::{ShellTarget, run_shell};
use fanout::io::config::{DEFAULT_CONFIG_PATH, FanoutConfig, load_config, write_config};
use fanout::io::inventory::CommandInventory;
use fanout::io::lease::ConfigLeases;
use fanout::io::session::SshConnector;
use fanout::io::transport::SshTransport;
use fanout::logging;
use fanout::remote::{RemoteOptions, ReportFormat, run_remote};

#[derive(Parser)]
#[command(name = "fanout", version, about = "Run commands across many hosts over SSH")]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command on every host and report failures.
    Remote {
        /// Host spec, e.g. `web-001-012,db.example.com`.
        #[arg(long)]
        hosts: Option<String>,
        /// Pool prefixes resolved through the inventory command.
        #[arg(long)]
        pools: Option<String>,
        /// Maximum hosts running at once (default: all).
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum seconds between consecutive launches.
        #[arg(long, allow_negative_numbers = true)]
        throttle: Option<f64>,
        /// Kill each host's command after this many seconds.
        #[arg(long, allow_negative_numbers = true)]
        timeout: Option<f64>,
        /// Stop the whole fan-out after this many seconds.
        #[arg(long, allow_negative_numbers = true)]
        deadline: Option<f64>,
        /// Print every host's output, prefixed with the host.
        #[arg(long)]
        show_output: bool,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
        /// Command to run, after `--`.
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Start an agent on one host and run commands interactively.
    Shell {
        /// Lease id, resolved through `[leases]` in the config.
        #[arg(long, conflicts_with = "endpoint", required_unless_present = "endpoint")]
        lease: Option<String>,
        /// Connect to this endpoint directly.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Print the expanded host list without connecting anywhere.
    Hosts {
        #[arg(long)]
        hosts: Option<String>,
        #[arg(long)]
        pools: Option<String>,
    },
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for ReportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => ReportFormat::Text,
            FormatArg::Json => ReportFormat::Json,
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        exit_codes::USAGE
    } else {
        exit_codes::INVALID
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Remote {
            hosts,
            pools,
            limit,
            throttle,
            timeout,
            deadline,
            show_output,
            format,
            command,
        } => {
            let opts = RemoteOptions {
                hosts,
                pools,
                limit,
                throttle_secs: throttle,
                timeout_secs: timeout,
                deadline_secs: deadline,
                show_output,
                format: format.into(),
                command,
            };
            cmd_remote(&cli.config, &opts)
        }
        Command::Shell { lease, endpoint } => {
            let target = match (lease, endpoint) {
                (Some(lease), None) => ShellTarget::Lease(lease),
                (None, Some(endpoint)) => ShellTarget::Endpoint(endpoint),
                _ => {
                    return Err(UsageError(
                        "exactly one of --lease or --endpoint is required".to_string(),
                    )
                    .into());
                }
            };
            cmd_shell(&cli.config, &target)
        }
        Command::Hosts { hosts, pools } => cmd_hosts(&cli.config, hosts, pools),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        ));
    }
    write_config(path, &FanoutConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_remote(config_path: &Path, opts: &RemoteOptions) -> Result<i32> {
    // Usage problems take precedence over a broken config file.
    opts.check_usage()?;
    let config = load_config(config_path)?;
    let transport = SshTransport::new(&config.ssh);
    let inventory = CommandInventory::new(&config.inventory);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = run_remote(opts, &config, &transport, &inventory, &mut out)?;
    out.flush().context("flush stdout")?;
    debug!(complete = report.complete, "remote finished");
    Ok(if report.complete {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_shell(config_path: &Path, target: &ShellTarget) -> Result<i32> {
    let config = load_config(config_path)?;
    let leases = ConfigLeases::new(config.leases.clone());
    let connector = SshConnector::new(&config.ssh);
    let bootstrap = Bootstrap::new(&config.agent.interpreter);
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    let mut err = io::stderr();
    run_shell(
        target,
        &leases,
        &connector,
        &bootstrap,
        &mut input,
        &mut out,
        &mut err,
    )?;
    Ok(exit_codes::OK)
}

fn cmd_hosts(config_path: &Path, hosts: Option<String>, pools: Option<String>) -> Result<i32> {
    let hosts = hosts.unwrap_or_default();
    let pools = pools.unwrap_or_default();
    if hosts.trim().is_empty() && pools.trim().is_empty() {
        return Err(UsageError("one of --hosts or --pools is required".to_string()).into());
    }
    let config = load_config(config_path)?;
    let inventory = CommandInventory::new(&config.inventory);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for host in expand(&hosts, &pools, &inventory)? {
        writeln!(out, "{host}").context("write host")?;
    }
    Ok(exit_codes::OK)
}
