//! CLI entry point for `mailrelay`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use mailrelay::config::Config;
use mailrelay::engine::{AccountStatus, Forwarder, RunSummary};
use mailrelay::ledger::{summarize, Ledger};
use mailrelay::store::NetworkBackend;

#[derive(Parser)]
#[command(
    name = "mailrelay",
    version,
    about = "Forward unread IMAP mail to fixed recipients and clean up afterwards"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true, value_name = "FILE", env = "MAILRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward unread mail, then run the retention sweep (default)
    Run {
        /// Only process these accounts
        #[arg(short, long = "account", value_name = "NAME")]
        accounts: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run only the retention sweep
    Sweep {
        /// Only sweep these accounts
        #[arg(short, long = "account", value_name = "NAME")]
        accounts: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize the forwarded-mail ledger
    Ledger {
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and print the resolved paths
    CheckConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run {
        accounts: Vec::new(),
        json: false,
    });

    // These do not need a configuration file.
    match command {
        Commands::Completions { shell } => return cmd_completions(shell),
        Commands::Manpage => return cmd_manpage(),
        _ => {}
    }

    let config = mailrelay::config::load_config(cli.config.as_deref()).context("Cannot load configuration")?;

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match command {
        Commands::Run { accounts, json } => cmd_run(&config, &accounts, json, false),
        Commands::Sweep { accounts, json } => cmd_run(&config, &accounts, json, true),
        Commands::Ledger { json } => cmd_ledger(&config, json),
        Commands::CheckConfig => cmd_check_config(&config),
        Commands::Completions { .. } | Commands::Manpage => Ok(()),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailrelay::config::data_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailrelay.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailrelay", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Forward (or only sweep) the selected accounts under the run lock.
fn cmd_run(config: &Config, accounts: &[String], json: bool, sweep_only: bool) -> anyhow::Result<()> {
    for name in accounts {
        if !config.accounts.iter().any(|a| &a.name == name) {
            anyhow::bail!("Unknown account '{name}'");
        }
    }

    let backend = NetworkBackend;
    let forwarder = Forwarder::new(config, &backend);
    let _lock = forwarder.ledger().acquire_run_lock()?;

    let summary = if sweep_only {
        forwarder.sweep_only(accounts)?
    } else {
        forwarder.run(accounts)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary_table(&summary);
    }
    Ok(())
}

/// Print per-account ledger statistics.
fn cmd_ledger(config: &Config, json: bool) -> anyhow::Result<()> {
    let ledger = Ledger::new(config.ledger_path());
    let entries = ledger.load_all()?;
    let summary = summarize(&entries);

    if json {
        let output = serde_json::json!({
            "path": ledger.path().to_string_lossy(),
            "entries": entries.len(),
            "accounts": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {:<20} {}", "Ledger", ledger.path().display());
    println!("  {:<20} {}", "Entries", entries.len());
    if !summary.is_empty() {
        println!();
        println!("  {:<20} {:>7}  {:<19}  {:<19}", "Account", "Entries", "Oldest", "Newest");
        println!("  {}", "-".repeat(70));
        for s in &summary {
            let name: String = s.account.chars().take(20).collect();
            println!(
                "  {:<20} {:>7}  {:<19}  {:<19}",
                name, s.entries, s.oldest, s.newest
            );
        }
    }
    println!();
    Ok(())
}

/// Print the resolved configuration without connecting anywhere.
fn cmd_check_config(config: &Config) -> anyhow::Result<()> {
    println!();
    println!("  {:<20} {}", "Accounts", config.accounts.len());
    println!("  {:<20} {}", "Multi-account", config.is_multi_account());
    println!("  {:<20} {:?}", "Forward policy", config.general.forward_policy);
    println!("  {:<20} {}", "Ledger", config.ledger_path().display());
    println!("  {:<20} {}", "Error log", config.error_log_path().display());
    if config.retention.enabled {
        println!(
            "  {:<20} after {} day(s)",
            "Retention", config.retention.delete_after_days
        );
    } else {
        println!("  {:<20} disabled", "Retention");
    }
    println!();
    for account in &config.accounts {
        println!(
            "  {:<20} {}  imap={}:{}  smtp={}:{}  folders={}  recipients={}",
            account.name,
            if account.enabled { "enabled " } else { "disabled" },
            account.imap.host,
            account.imap.port,
            account.smtp.host,
            account.smtp.port,
            account.folders.join(","),
            account.recipients.len()
        );
    }
    println!();
    Ok(())
}

/// Print a run summary as a human-readable table.
fn print_summary_table(summary: &RunSummary) {
    println!();
    println!(
        "  {:<20} {:<10} {:<16} {:>6} {:>9} {:>7} {:>7}",
        "Account", "Status", "Folder", "Unseen", "Forwarded", "Failed", "Deleted"
    );
    println!("  {}", "-".repeat(82));

    for account in &summary.accounts {
        let name: String = account.account.chars().take(20).collect();
        let status = match &account.status {
            AccountStatus::Completed => "ok",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Failed { .. } => "failed",
        };
        let deleted = account
            .sweep
            .as_ref()
            .map(|s| s.deleted.to_string())
            .unwrap_or_else(|| "-".to_string());

        if account.folders.is_empty() {
            println!(
                "  {:<20} {:<10} {:<16} {:>6} {:>9} {:>7} {:>7}",
                name, status, "-", "-", "-", "-", deleted
            );
        }
        for (i, folder) in account.folders.iter().enumerate() {
            let folder_name: String = folder.folder.chars().take(16).collect();
            let (unseen, forwarded, failed) = if folder.skipped {
                ("skip".to_string(), "-".to_string(), "-".to_string())
            } else if folder.error.is_some() {
                ("error".to_string(), "-".to_string(), "-".to_string())
            } else {
                (
                    folder.unseen.to_string(),
                    folder.forwarded.to_string(),
                    (folder.not_forwarded + folder.extract_failed).to_string(),
                )
            };
            let (name_col, status_col, deleted_col) = if i == 0 {
                (name.as_str(), status, deleted.as_str())
            } else {
                ("", "", "")
            };
            println!(
                "  {:<20} {:<10} {:<16} {:>6} {:>9} {:>7} {:>7}",
                name_col, status_col, folder_name, unseen, forwarded, failed, deleted_col
            );
        }

        if let AccountStatus::Failed { reason } = &account.status {
            println!("    {reason}");
        }
        if let Some(err) = &account.sweep_error {
            println!("    retention: {err}");
        }
    }

    println!();
    println!(
        "  {} forwarded, {} deleted, {} account(s) failed",
        summary.forwarded(),
        summary.deleted(),
        summary.failed_accounts()
    );
    println!();
}
