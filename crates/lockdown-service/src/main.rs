use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use lockdown_core::activity::ActivityLogger;
use lockdown_core::input::AdminNotifier;
use lockdown_core::journal::ChainStatus;
use lockdown_core::network::{NetworkConfig, NetworkSuppressor};
use lockdown_core::paths::{data_dir, journal_path, log_dir, settings_path, status_path};
use lockdown_core::storage::{load_settings, save_settings, JsonFileStore, SettingsStore};
use lockdown_core::{
    ActivityJournal, Backends, Category, FanoutLogger, JournalSink, Lockdown, LockdownSettings,
    Selection, TracingActivityLogger,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod status;

const JOURNAL_MAX_BYTES: u64 = 5 * 1024 * 1024;
const CLEANUP_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about = "Exam lockdown agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct DataDirArg {
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl DataDirArg {
    fn resolve(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write default settings to the store
    Init {
        #[command(flatten)]
        dir: DataDirArg,
        /// Overwrite existing settings
        #[arg(long)]
        force: bool,
    },
    /// Run a lockdown session until interrupted
    Run {
        #[command(flatten)]
        dir: DataDirArg,
        /// Enable only these categories
        #[arg(long, value_delimiter = ',')]
        only: Vec<Category>,
        /// Disable these categories
        #[arg(long, value_delimiter = ',')]
        skip: Vec<Category>,
        /// Seconds between status snapshots
        #[arg(long, default_value_t = 5)]
        status_interval: u64,
    },
    /// Print the last status snapshot
    Status {
        #[command(flatten)]
        dir: DataDirArg,
    },
    /// Inspect or edit the persisted block-lists
    Policy {
        #[command(flatten)]
        dir: DataDirArg,
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Read the activity journal
    Journal {
        #[command(flatten)]
        dir: DataDirArg,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        blocked_only: bool,
        /// Check the hash chain instead of listing records
        #[arg(long)]
        verify: bool,
    },
    /// Restore the hosts file left blocked by a crashed session
    RestoreNetwork {
        #[command(flatten)]
        dir: DataDirArg,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyAction {
    List,
    AddKey { combo: String },
    RemoveKey { combo: String },
    AddButton { button: String },
    RemoveButton { button: String },
    BlockAll {
        #[arg(value_parser = parse_switch)]
        state: bool,
    },
    BasicClicks,
    ResetKeys,
}

fn parse_switch(s: &str) -> std::result::Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { dir, force } => init_command(&dir.resolve()?, force),
        Commands::Run {
            dir,
            only,
            skip,
            status_interval,
        } => run_command(&dir.resolve()?, &only, &skip, status_interval).await,
        Commands::Status { dir } => status_command(&dir.resolve()?),
        Commands::Policy { dir, action } => policy_command(&dir.resolve()?, action),
        Commands::Journal {
            dir,
            limit,
            blocked_only,
            verify,
        } => journal_command(&dir.resolve()?, limit, blocked_only, verify),
        Commands::RestoreNetwork { dir } => restore_network_command(&dir.resolve()?),
    }
}

fn open_store(data: &Path) -> Result<Arc<JsonFileStore>> {
    std::fs::create_dir_all(data).with_context(|| format!("creating {}", data.display()))?;
    let path = settings_path(data);
    let store = JsonFileStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

fn open_journal(data: &Path) -> Result<ActivityJournal> {
    let path = journal_path(&log_dir(data));
    ActivityJournal::open(&path, JOURNAL_MAX_BYTES)
        .with_context(|| format!("opening {}", path.display()))
}

fn load_engine(data: &Path, logger: Arc<dyn ActivityLogger>) -> Result<Lockdown> {
    let store = open_store(data)?;
    let settings = load_settings(store.as_ref())?;
    settings.validate()?;
    let backends = Backends::native(&settings);
    Ok(Lockdown::new(settings, store, logger, backends)?)
}

fn init_command(data: &Path, force: bool) -> Result<()> {
    let store = open_store(data)?;
    if !force && store.get(lockdown_core::storage::SETTINGS_KEY)?.is_some() {
        return Err(anyhow!(
            "settings already exist at {}; pass --force to overwrite",
            store.path().display()
        ));
    }
    save_settings(store.as_ref(), &LockdownSettings::default())?;
    std::fs::create_dir_all(log_dir(data))?;
    println!("Default settings written to {}", store.path().display());
    Ok(())
}

fn build_selection(only: &[Category], skip: &[Category]) -> Selection {
    let mut selection = Selection::new();
    if !only.is_empty() {
        for category in Category::ALL {
            selection.insert(category, only.contains(&category));
        }
    }
    for category in skip {
        selection.insert(*category, false);
    }
    selection
}

async fn run_command(
    data: &Path,
    only: &[Category],
    skip: &[Category],
    status_interval: u64,
) -> Result<()> {
    let journal = Arc::new(JournalSink::spawn(Arc::new(open_journal(data)?))?);
    let journal_logger: Arc<dyn ActivityLogger> = journal.clone();
    let logger: Arc<dyn ActivityLogger> = Arc::new(FanoutLogger::new(vec![
        Arc::new(TracingActivityLogger),
        journal_logger,
    ]));

    let engine = load_engine(data, logger)?;
    let notifier: Arc<dyn AdminNotifier> = Arc::new(|| {
        warn!("admin override requested");
        eprintln!("Admin override combination pressed. Press Ctrl-C to end the session.");
    });
    engine.set_admin_notifier(&notifier);
    let engine = Arc::new(Mutex::new(engine));

    let report = engine.lock().start(&build_selection(only, skip));
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "some restrictions could not be enabled");
    }

    let status_file = status_path(data);
    let status_task = status::spawn_status_writer(
        engine.clone(),
        status_file.clone(),
        Duration::from_secs(status_interval.max(1)),
    );

    info!("lockdown running; press Ctrl-C to stop");
    signal::ctrl_c().await?;
    info!("lockdown stopping");
    status_task.abort();

    let mut summary = engine.lock().stop();
    if summary.cleanup_pending {
        warn!(failed = ?summary.failed, "cleanup incomplete; retrying once");
        tokio::time::sleep(CLEANUP_RETRY_DELAY).await;
        summary = engine.lock().stop();
    }
    if let Err(e) = status::write_snapshot(&engine.lock().get_status(), &status_file) {
        warn!(error = %e, "final status snapshot failed");
    }
    journal.close();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.failed.is_empty() {
        return Err(anyhow!(
            "cleanup failed for: {}",
            summary
                .failed
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    Ok(())
}

fn status_command(data: &Path) -> Result<()> {
    let path = status_path(data);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("no status snapshot at {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn policy_command(data: &Path, action: PolicyAction) -> Result<()> {
    let engine = load_engine(data, lockdown_core::activity::noop())?;
    let changed = match action {
        PolicyAction::List => false,
        PolicyAction::AddKey { combo } => engine.add_blocked_key(&combo)?,
        PolicyAction::RemoveKey { combo } => engine.remove_blocked_key(&combo)?,
        PolicyAction::AddButton { button } => !engine.add_blocked_button(&button)?.is_empty(),
        PolicyAction::RemoveButton { button } => !engine.remove_blocked_button(&button)?.is_empty(),
        PolicyAction::BlockAll { state } => {
            engine.set_block_all_buttons(state);
            true
        }
        PolicyAction::BasicClicks => {
            engine.allow_basic_clicks();
            true
        }
        PolicyAction::ResetKeys => {
            engine.reset_keyboard()?;
            true
        }
    };
    if changed {
        engine.save_policy()?;
    }
    println!("{}", serde_json::to_string_pretty(&engine.policy_lists())?);
    Ok(())
}

fn journal_command(data: &Path, limit: usize, blocked_only: bool, verify: bool) -> Result<()> {
    let journal = open_journal(data)?;
    if verify {
        match journal.verify()? {
            ChainStatus::Intact { records } => println!("journal intact ({records} records)"),
            ChainStatus::Broken { seq, reason } => {
                return Err(anyhow!("journal broken at seq {seq}: {reason}"));
            }
        }
        return Ok(());
    }
    for record in journal.recent(limit, blocked_only)? {
        let marker = if record.blocked { "BLOCKED" } else { "ALLOWED" };
        println!(
            "{} #{:<6} {:<8} {:<22} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.seq,
            marker,
            record.kind,
            record.details
        );
    }
    Ok(())
}

fn restore_network_command(data: &Path) -> Result<()> {
    let store = open_store(data)?;
    let settings = load_settings(store.as_ref())?;
    let config = NetworkConfig::from_settings(&settings.network);
    if NetworkSuppressor::recover(&config)? {
        println!("Hosts file restored from {}", config.backup_path().display());
    } else {
        println!("No leftover block section found in {}", config.hosts_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_and_skip_build_selection() {
        let selection =
            build_selection(&[Category::Keyboard, Category::Network], &[Category::Network]);
        assert_eq!(selection.get(&Category::Keyboard), Some(&true));
        assert_eq!(selection.get(&Category::Network), Some(&false));
        assert_eq!(selection.get(&Category::Pointer), Some(&false));

        let skip_only = build_selection(&[], &[Category::Processes]);
        assert_eq!(skip_only.len(), 1);
    }

    #[test]
    fn switch_values_parse() {
        assert_eq!(parse_switch("ON"), Ok(true));
        assert_eq!(parse_switch("off"), Ok(false));
        assert!(parse_switch("maybe").is_err());
    }

    #[test]
    fn cli_parses_category_lists() {
        let cli = Cli::try_parse_from([
            "lockdown-service",
            "run",
            "--only",
            "keyboard,mouse",
            "--skip",
            "internet",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { only, skip, .. } => {
                assert_eq!(only, vec![Category::Keyboard, Category::Pointer]);
                assert_eq!(skip, vec![Category::Network]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init_command(dir.path(), false).unwrap();
        assert!(init_command(dir.path(), false).is_err());
        init_command(dir.path(), true).unwrap();
        assert!(settings_path(dir.path()).exists());
    }
}
