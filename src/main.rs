use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedblock::config::AppConfig;
use feedblock::engine::{BlockActions, DisplayState, FeedGuard};
use feedblock::page::{Document, SharedDocument};
use feedblock::remote::{BlocklistSync, RemoteClient, SyncOutcome};
use feedblock::storage::{FilterSettings, Store, StoreError};

/// Largest page snapshot `scan` will load (20MB).
const MAX_PAGE_SIZE: u64 = 20 * 1024 * 1024;

/// Get the config directory path (~/.config/feedblock/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedblock"))
}

#[derive(Parser, Debug)]
#[command(name = "feedblock", about = "Blocklist overlay engine for social feed pages")]
struct Args {
    /// Config file (default: ~/.config/feedblock/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/feedblock/feedblock.db)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the local blocklist from the remote listing
    Sync,
    /// Show the cached blocklist size, last sync time and filter settings
    Status,
    /// Show filter settings, or change the ones given
    Settings {
        #[arg(long)]
        hide_blocked: Option<bool>,
        #[arg(long)]
        temp_show: Option<bool>,
        #[arg(long)]
        hide_block_btn: Option<bool>,
        #[arg(long)]
        block_non_answers: Option<bool>,
    },
    /// Block an author
    Block { slug: String, author_id: String },
    /// Unblock an author
    Unblock { slug: String, author_id: String },
    /// Run the engine over a saved page and print each item's decision
    Scan {
        page: PathBuf,
        /// Never contact the remote API, even if the blocklist is empty
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to set config directory permissions to 0700"
                );
            }
        }
    }

    let config_path = args.config.unwrap_or_else(|| config_dir.join("config.toml"));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .with_env_overrides();
    tracing::debug!(?config, "Loaded configuration");

    let db_path = args.db.unwrap_or_else(|| config_dir.join("feedblock.db"));
    let store = open_store(&db_path).await?;

    match args.command {
        Command::Status => status(&store).await,
        Command::Settings {
            hide_blocked,
            temp_show,
            hide_block_btn,
            block_non_answers,
        } => {
            let mut settings = store.settings();
            let changed = [hide_blocked, temp_show, hide_block_btn, block_non_answers]
                .iter()
                .any(Option::is_some);
            settings.hide_blocked = hide_blocked.unwrap_or(settings.hide_blocked);
            settings.temp_show = temp_show.unwrap_or(settings.temp_show);
            settings.hide_block_btn = hide_block_btn.unwrap_or(settings.hide_block_btn);
            settings.block_non_answers = block_non_answers.unwrap_or(settings.block_non_answers);
            if changed {
                store
                    .set_settings(settings)
                    .await
                    .context("Failed to save settings")?;
            }
            print_settings(settings);
            Ok(())
        }
        Command::Sync => {
            let client = Arc::new(RemoteClient::new(&config).context("Invalid remote configuration")?);
            let sync = BlocklistSync::new(client, store, config.page_size);
            match sync.sync().await.context("Blocklist sync failed")? {
                SyncOutcome::Completed(count) => println!("Synced {} blocked authors", count),
                SyncOutcome::AlreadyRunning => println!("A sync is already running"),
            }
            Ok(())
        }
        Command::Block { slug, author_id } => toggle(&config, store, &slug, &author_id, true).await,
        Command::Unblock { slug, author_id } => {
            toggle(&config, store, &slug, &author_id, false).await
        }
        Command::Scan { page, offline } => scan(&config, store, &page, offline).await,
    }
}

async fn open_store(path: &Path) -> Result<Store> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Store::open(path_str).await {
        Ok(store) => Ok(store),
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedblock appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn status(store: &Store) -> Result<()> {
    let blocked = store.blocked_ids();
    let last_synced = store
        .last_synced()
        .await
        .context("Failed to read last sync time")?;

    println!("Blocked authors: {}", blocked.len());
    match last_synced {
        Some(at) => println!("Last synced:     {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last synced:     never"),
    }
    print_settings(store.settings());
    Ok(())
}

fn print_settings(settings: FilterSettings) {
    println!("hideBlocked:     {}", settings.hide_blocked);
    println!("tempShow:        {}", settings.temp_show);
    println!("hideBlockBtn:    {}", settings.hide_block_btn);
    println!("blockNonAnswers: {}", settings.block_non_answers);
}

async fn toggle(config: &AppConfig, store: Store, slug: &str, author_id: &str, block: bool) -> Result<()> {
    let client = Arc::new(RemoteClient::new(config).context("Invalid remote configuration")?);
    let actions = BlockActions::new(client, store);
    let state = actions
        .toggle(slug, author_id, !block)
        .await
        .with_context(|| format!("Failed to update block status of {}", slug))?;
    println!("{} ({}): {}", slug, author_id, state.label());
    Ok(())
}

async fn scan(config: &AppConfig, store: Store, page: &Path, offline: bool) -> Result<()> {
    let metadata = std::fs::metadata(page)
        .with_context(|| format!("Failed to read page snapshot: {}", page.display()))?;
    if metadata.len() > MAX_PAGE_SIZE {
        anyhow::bail!("Page snapshot too large: {} bytes", metadata.len());
    }
    let html = std::fs::read_to_string(page)
        .with_context(|| format!("Failed to read page snapshot: {}", page.display()))?;

    let client = Arc::new(RemoteClient::new(config).context("Invalid remote configuration")?);
    let sync = Arc::new(BlocklistSync::new(
        Arc::clone(&client),
        store.clone(),
        config.page_size,
    ));
    let guard = Arc::new(FeedGuard::new(
        SharedDocument::new(Document::from_html(&html)),
        store.clone(),
        sync,
        BlockActions::new(client, store),
        config.debounce(),
    ));

    let report = if offline {
        guard.scan()
    } else {
        guard.start().await
    };

    for decision in guard.decisions() {
        let state = match decision.state {
            DisplayState::Visible => "visible",
            DisplayState::Hidden => "hidden",
            DisplayState::PlaceholderShown => "placeholder",
        };
        println!(
            "{:<6} {:<12} {:<24} {}",
            decision.item.to_string(),
            state,
            decision.author_id,
            decision.author_name
        );
    }
    println!(
        "{} items: {} classified, {} skipped",
        report.items, report.classified, report.skipped
    );
    Ok(())
}
