//! wix-managed CLI - inspect and simulate the managed installer runtime

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use wix_managed::{
    capture_for_deferred, parse_property_list, rehydrate_from_deferred, try_rehydrate, DataBag,
    DeferredContext, InstallMode, ManagedUI, MemorySession, RuntimeConfig, Scenario,
    ScenarioReport, SetupMode, UiOutcome,
};

#[derive(Parser)]
#[command(name = "wix-managed")]
#[command(about = "Managed UI and custom action runtime for WiX installers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: Format,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum InitKind {
    Scenario,
    Config,
}

#[derive(Subcommand)]
enum Commands {
    /// Serialize KEY=VALUE pairs into a data bag string
    Encode {
        /// Entries as KEY=VALUE
        #[arg(value_parser = parse_pair)]
        entries: Vec<(String, String)>,
    },
    /// Decode a data bag string (reads stdin when omitted)
    Decode {
        input: Option<String>,

        /// Reject malformed input instead of yielding an empty bag
        #[arg(long)]
        strict: bool,
    },
    /// Build the CustomActionData payload for a deferred action
    Capture {
        /// Session property as KEY=VALUE
        #[arg(short, long = "property", value_parser = parse_pair)]
        properties: Vec<(String, String)>,

        /// Data bag entry as KEY=VALUE
        #[arg(short, long = "data", value_parser = parse_pair)]
        data: Vec<(String, String)>,

        /// Properties to capture, separated by ';' or ',' (defaults to the config)
        #[arg(short, long)]
        uses: Option<String>,
    },
    /// Decode a CustomActionData payload (reads stdin when omitted)
    Rehydrate {
        input: Option<String>,

        /// Reject malformed payloads instead of yielding an empty context
        #[arg(long)]
        strict: bool,
    },
    /// Show the stock dialog sequence for an install mode
    Dialogs {
        #[arg(short, long, default_value = "install")]
        mode: String,
    },
    /// Run a scenario file through the full install flow
    Simulate {
        /// Scenario file (YAML or JSON)
        scenario: PathBuf,
    },
    /// Write a starter scenario or configuration file
    Init {
        /// What to generate
        #[arg(value_enum, default_value = "scenario")]
        kind: InitKind,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            std::process::exit(2);
        }
    }
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => RuntimeConfig::load_default().context("Failed to load config"),
    }
}

fn read_input(input: &Option<String>) -> Result<String> {
    match input {
        Some(text) => Ok(text.clone()),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

/// Returns `Ok(false)` when the command ran but reports failure
fn run(cli: &Cli) -> Result<bool> {
    match &cli.command {
        Commands::Encode { entries } => {
            let bag: DataBag = entries.iter().cloned().collect();
            let serialized = bag.serialize();
            match cli.format {
                Format::Text => println!("{}", serialized),
                Format::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "serialized": serialized }))?
                ),
            }
            Ok(true)
        }
        Commands::Decode { input, strict } => {
            let text = read_input(input)?;
            let bag = if *strict {
                DataBag::try_deserialize(&text).context("Malformed data bag")?
            } else {
                DataBag::deserialize(&text)
            };
            match cli.format {
                Format::Text => {
                    for (key, value) in bag.iter() {
                        println!("{} = {}", key.cyan(), value);
                    }
                }
                Format::Json => println!("{}", serde_json::to_string_pretty(&bag)?),
            }
            Ok(true)
        }
        Commands::Capture {
            properties,
            data,
            uses,
        } => {
            let config = load_config(cli)?;
            let mut session = MemorySession::new();
            for (key, value) in properties {
                session = session.with_property(key, value);
            }
            let bag: DataBag = data.iter().cloned().collect();
            let keys = match uses {
                Some(list) => parse_property_list(list),
                None => config.deferred_properties.clone(),
            };
            let blob = capture_for_deferred(&session, &keys, &bag);
            match cli.format {
                Format::Text => println!("{}", blob),
                Format::Json => {
                    let value: serde_json::Value = serde_json::from_str(&blob)?;
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
            }
            Ok(true)
        }
        Commands::Rehydrate { input, strict } => {
            let blob = read_input(input)?;
            let context = if *strict {
                try_rehydrate(&blob).context("Malformed CustomActionData")?
            } else {
                rehydrate_from_deferred(&blob)
            };
            print_context(&context, cli.format)?;
            Ok(true)
        }
        Commands::Dialogs { mode } => {
            let mode = parse_mode(mode)?;
            let session = MemorySession::new().install_mode(mode);
            let setup_mode = SetupMode::detect(&session);
            let ui = ManagedUI::default_ui();
            let kinds: Vec<_> = ui
                .sequence_for(setup_mode)
                .map(|d| d.iter().collect())
                .unwrap_or_default();

            match cli.format {
                Format::Text => {
                    println!("{} ({})", "Dialog sequence".bold(), setup_mode);
                    if kinds.is_empty() {
                        println!("  (no managed UI)");
                    }
                    for (index, dialog) in kinds.iter().enumerate() {
                        let mut flags = Vec::new();
                        if !dialog.can_go_back {
                            flags.push("no-back");
                        }
                        if !dialog.can_cancel {
                            flags.push("no-cancel");
                        }
                        let flags = if flags.is_empty() {
                            String::new()
                        } else {
                            format!(" [{}]", flags.join(", ")).dimmed().to_string()
                        };
                        println!("  {}. {} - {}{}", index, dialog.kind, dialog.title, flags);
                    }
                }
                Format::Json => {
                    let list: Vec<_> = kinds
                        .iter()
                        .map(|d| {
                            serde_json::json!({
                                "kind": d.kind,
                                "title": d.title,
                                "can_go_back": d.can_go_back,
                                "can_cancel": d.can_cancel,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&list)?);
                }
            }
            Ok(true)
        }
        Commands::Simulate { scenario } => {
            let config = load_config(cli)?;
            let scenario = Scenario::load(scenario)
                .with_context(|| format!("Failed to load scenario {}", scenario.display()))?;
            let report = scenario.run(&config);
            match cli.format {
                Format::Text => print_report(&report),
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            Ok(report.success)
        }
        Commands::Init {
            kind,
            output,
            force,
        } => {
            let (default_name, content) = match kind {
                InitKind::Scenario => (
                    "scenario.yaml",
                    serde_yaml::to_string(&Scenario::sample())?,
                ),
                InitKind::Config => (
                    ".wixmanaged.yaml",
                    serde_yaml::to_string(&RuntimeConfig::default())?,
                ),
            };
            let path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(default_name));
            write_new(&path, &content, *force)?;
            println!("Created {}", path.display());
            Ok(true)
        }
    }
}

fn parse_mode(mode: &str) -> Result<InstallMode> {
    Ok(match mode.to_lowercase().as_str() {
        "install" => InstallMode::Install,
        "modify" => InstallMode::Modify,
        "repair" => InstallMode::Repair,
        "remove" | "uninstall" => InstallMode::Remove,
        "upgrade" => InstallMode::Upgrade,
        other => bail!("Unknown install mode '{}'", other),
    })
}

fn write_new(path: &Path, content: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_context(context: &DeferredContext, format: Format) -> Result<()> {
    match format {
        Format::Text => {
            println!("{}", "Properties".bold());
            for (key, value) in &context.properties {
                println!("  {} = {}", key.cyan(), value);
            }
            println!("{}", "Data".bold());
            for (key, value) in context.data.iter() {
                println!("  {} = {}", key.cyan(), value);
            }
        }
        Format::Json => println!("{}", serde_json::to_string_pretty(context)?),
    }
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!("{} {} ({})", "Scenario:".bold(), report.name, report.mode);

    println!("\n{}", "Navigation".bold());
    for entry in &report.trace {
        let position = match (&entry.index, &entry.dialog) {
            (Some(index), Some(dialog)) => format!("{}:{}", index, dialog),
            _ => "-".to_string(),
        };
        println!("  {:<18} {:<20} {}", entry.step, position, entry.state.dimmed());
    }

    let outcome = match report.outcome {
        Some(UiOutcome::Completed) | Some(UiOutcome::NotShown) => {
            report.outcome.map(|o| o.to_string().green().to_string())
        }
        Some(o) => Some(o.to_string().red().to_string()),
        None => None,
    };
    println!(
        "  outcome: {}, exit: {}",
        outcome.unwrap_or_else(|| "not shown".to_string()),
        report.exit_status.title()
    );
    for error in &report.errors {
        println!("  {} {}", "error:".red(), error);
    }

    println!("\n{}", "Actions".bold());
    for action in &report.actions {
        let result = if action.result.is_abort() {
            action.result.to_string().red()
        } else {
            action.result.to_string().green()
        };
        println!("  {:<22} {}", action.action, result);
    }

    if let Some(deferred) = &report.deferred {
        println!("\n{}", "Deferred".bold());
        let mut properties: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in &deferred.properties {
            if key != wix_managed::RUNTIME_DATA_PROPERTY {
                properties.insert(key, value);
            }
        }
        for (key, value) in properties {
            println!("  {} = {}", key.cyan(), value);
        }
        for (key, value) in deferred.data.iter() {
            println!("  data.{} = {}", key.cyan(), value);
        }
    }

    println!();
    if report.success {
        println!("{}", "Install flow succeeded".green().bold());
    } else {
        println!("{}", "Install flow aborted".red().bold());
    }
}
