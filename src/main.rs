use clap::{Parser, Subcommand, ValueEnum};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use zonefw::config::{self, AppConfig};
use zonefw::core::rules::assemble_rule;
use zonefw::core::zones::{Zone, ZoneKind};
use zonefw::{Session, utils};

#[derive(Parser)]
#[command(name = "zonefw")]
#[command(about = "Zone-based firewall policy store", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/zonefw/config.json)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create empty storage for every object category
    Init,
    /// Load the policy and validate every rule
    Check,
    /// Print one object collection in its stored order
    List {
        #[arg(value_enum)]
        what: ListTarget,
    },
    /// Print every rule in its persisted form
    Export,
    /// Edit the rule list
    Rule {
        #[command(subcommand)]
        action: RuleCommand,
    },
    /// Edit zones, networks, hosts and groups
    Zone {
        #[command(subcommand)]
        action: ZoneCommand,
    },
    /// Add an address, network, host or group to the blocklist
    Block { item: String },
    /// Remove an entry from the blocklist
    Unblock { item: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListTarget {
    Zones,
    Services,
    Interfaces,
    Rules,
    Blocklist,
}

#[derive(Subcommand)]
enum RuleCommand {
    /// Insert a rule at PLACE (1-based; past the end appends)
    Add {
        place: u32,
        /// Rule text, e.g. `accept service ssh from lan to firewall`
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },
    /// Delete the rule at PLACE
    Del { place: u32 },
}

#[derive(Subcommand)]
enum ZoneCommand {
    /// Create a zone-family object; NAME is dotted, innermost first
    Add {
        name: String,
        #[arg(short, long, default_value = "zone")]
        kind: ZoneKind,
        /// Network (`10.0.0.0/24`) or host address
        #[arg(short, long)]
        address: Option<String>,
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Delete an object
    Del {
        name: String,
        /// Also delete every network, host and group below it
        #[arg(short, long)]
        recursive: bool,
    },
    /// Rename an object within its parent (`pc1.lan.dmz` to `pc2.lan.dmz`)
    Rename { name: String, new_name: String },
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config, cli.verbose);

    match handle_cli(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> zonefw::Result<AppConfig> {
    match path.cloned().or_else(config::default_config_path) {
        Some(path) => config::load_config(&path),
        None => Ok(AppConfig::default()),
    }
}

fn init_logging(config: &AppConfig, verbose: u8) {
    let configured = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let level = match verbose {
        0 => configured,
        1 => configured.max(Level::DEBUG),
        _ => Level::TRACE,
    };

    if config.log_to_file
        && let Some(mut log_path) = utils::get_state_dir()
    {
        log_path.push("zonefw.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    let is_atty = nix::unistd::isatty(std::io::stderr().as_fd()).unwrap_or(false);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(is_atty)
        .with_writer(std::io::stderr)
        .init();
}

/// Opens a session and loads the whole policy.
fn open_loaded(config: AppConfig) -> zonefw::Result<Session> {
    let mut session = Session::open(config)?;
    let report = session.load()?;
    if report.skipped > 0 {
        eprintln!("Warning: {} stored entries were skipped while loading", report.skipped);
    }
    Ok(session)
}

fn handle_cli(command: Commands, config: AppConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Init => {
            let mut session = Session::open(config)?;
            session.init_storage()?;
            session.close()?;
            println!("✓ Storage initialized.");
        }
        Commands::Check => {
            let mut session = open_loaded(config)?;
            session.refresh_dynamic();
            let (caches, errors) = session.analyze_rules();
            let (protects, protect_errors) = session.analyze_protect_rules();
            for (number, e) in &errors {
                let line = session
                    .rules()
                    .get(*number)
                    .map(assemble_rule)
                    .unwrap_or_default();
                eprintln!("✗ rule {number}: {e}\n    {line}");
            }
            for (owner, e) in &protect_errors {
                eprintln!("✗ protect rule on '{owner}': {e}");
            }
            let inactive = caches.iter().filter(|c| !c.active).count();
            println!(
                "{} rules valid ({} inactive), {} protect rules valid, {} failed",
                caches.len(),
                inactive,
                protects.len(),
                errors.len() + protect_errors.len()
            );
            session.close()?;
            if !errors.is_empty() || !protect_errors.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::List { what } => {
            let session = open_loaded(config)?;
            print_list(&session, what);
            session.close()?;
        }
        Commands::Export => {
            let session = open_loaded(config)?;
            for line in session.rules().to_lines() {
                println!("{line}");
            }
            for line in session.blocklist().to_lines() {
                println!("{line}");
            }
            session.close()?;
        }
        Commands::Rule { action } => {
            let mut session = open_loaded(config)?;
            match action {
                RuleCommand::Add { place, line } => {
                    let number = session.insert_rule(place, &line.join(" "))?;
                    println!("✓ Rule inserted as number {number}.");
                }
                RuleCommand::Del { place } => {
                    let rule = session.remove_rule(place)?;
                    println!("✓ Removed: {}", assemble_rule(&rule));
                }
            }
            session.close()?;
        }
        Commands::Zone { action } => {
            let mut session = open_loaded(config)?;
            handle_zone(&mut session, action)?;
            session.close()?;
        }
        Commands::Block { item } => {
            let mut session = open_loaded(config)?;
            session.block(&item)?;
            session.close()?;
            println!("✓ Blocked {item}.");
        }
        Commands::Unblock { item } => {
            let mut session = open_loaded(config)?;
            session.unblock(&item)?;
            session.close()?;
            println!("✓ Unblocked {item}.");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_zone(session: &mut Session, action: ZoneCommand) -> zonefw::Result<()> {
    match action {
        ZoneCommand::Add {
            name,
            kind,
            address,
            comment,
        } => {
            session.new_zone(&name, kind)?;
            if let Some(address) = address {
                session.set_zone_address(&name, &address)?;
            }
            if let Some(comment) = comment {
                session.set_comment(zonefw::backend::Category::Zones, &name, &comment)?;
            }
            println!("✓ Added {kind} {name}.");
        }
        ZoneCommand::Del { name, recursive } => {
            session.delete_zone(&name, recursive)?;
            println!("✓ Deleted {name}.");
        }
        ZoneCommand::Rename { name, new_name } => {
            session.rename_zone(&name, &new_name)?;
            println!("✓ Renamed {name} to {new_name}.");
        }
    }
    Ok(())
}

fn zone_address(zone: &Zone) -> String {
    let mut parts = Vec::new();
    if let Some(net) = zone.ipv4 {
        parts.push(match zone.kind {
            ZoneKind::Network => net.to_string(),
            _ => net.ip().to_string(),
        });
    }
    if let Some(net) = zone.ipv6 {
        parts.push(net.to_string());
    }
    parts.join(" ")
}

fn print_list(session: &Session, what: ListTarget) {
    match what {
        ListTarget::Zones => {
            let zones = session.zones();
            for (handle, zone) in zones.iter() {
                let indent = zone.kind.depth().saturating_sub(1) * 2;
                let state = if zones.is_active(handle) { "" } else { " (inactive)" };
                println!(
                    "{:indent$}{:<8} {:<32} {}{}",
                    "",
                    zone.kind.as_str(),
                    zone.name,
                    zone_address(zone),
                    state
                );
            }
        }
        ListTarget::Services => {
            for (_, service) in session.services().iter() {
                let ports: Vec<String> = service
                    .port_attributes()
                    .into_iter()
                    .map(|(attr, value)| format!("{attr}={value}"))
                    .collect();
                let state = if service.active { "" } else { " (inactive)" };
                println!("{:<24} {}{}", service.name, ports.join(" "), state);
            }
        }
        ListTarget::Interfaces => {
            for (_, iface) in session.interfaces().iter() {
                let state = if iface.active { "" } else { " (inactive)" };
                println!(
                    "{:<16} {:<16} {}{}",
                    iface.name,
                    iface.device,
                    iface.ipv4_text(),
                    state
                );
            }
        }
        ListTarget::Rules => {
            for rule in session.rules().iter() {
                println!("{:>4}  {}", rule.number, assemble_rule(rule));
            }
        }
        ListTarget::Blocklist => {
            for line in session.blocklist().to_lines() {
                println!("{line}");
            }
        }
    }
}
