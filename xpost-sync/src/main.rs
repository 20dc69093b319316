//! xpost-sync - Background daemon that mirrors Weibo accounts to Mastodon
//!
//! Every few minutes it reads the configured users' recent posts, publishes
//! the new ones, and deletes toots that have outlived `delete_after_days`.

use clap::Parser;
use libxpost::config::resolve_config_path;
use libxpost::logging::{LogFormat, LoggingConfig};
use libxpost::platforms::fetch::HttpMediaFetcher;
use libxpost::platforms::mastodon::MastodonClient;
use libxpost::platforms::TargetService;
use libxpost::retention::sweep_expired;
use libxpost::source::weibo::WeiboFeed;
use libxpost::{Config, Database, Result, SyncEngine};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "xpost-sync")]
#[command(version)]
#[command(about = "Mirror Weibo accounts to a Mastodon account")]
#[command(long_about = "\
xpost-sync - Mirror Weibo accounts to a Mastodon account

DESCRIPTION:
    xpost-sync is a long-running daemon. Each cycle it fetches the recent
    posts of every configured user, publishes the ones it has not published
    yet, and records the outcome in a local ledger so nothing is posted
    twice. Posts that keep failing are given up on after a few attempts.

    Between cycles it sleeps a random 5 to 10 minutes (see [poll]). The
    configuration file is re-read at the start of every cycle.

USAGE:
    # Run in foreground (logs to stderr)
    xpost-sync

    # Run a single cycle and exit
    xpost-sync --once

    # Machine-readable logs
    xpost-sync --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current cycle)

CONFIGURATION:
    Configuration file: ~/.config/xpost/config.toml (or $XPOST_CONFIG)
    Ledger database:    ~/.local/share/xpost/ledger.db
    Access token:       ~/.config/xpost/token

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or authentication error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "XPOST_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json, or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::resolve(cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => resolve_config_path()?,
    };
    let mut config = Config::load_from_path(&config_path)?;

    let mut target = connect(&config).await?;
    let db = Arc::new(Database::new(&config.database_path).await?);
    let fetcher = Arc::new(HttpMediaFetcher::new()?);
    let feed = WeiboFeed::new()?;

    info!(
        "xpost-sync starting: {} users -> {}",
        config.user_list.len(),
        target.instance_url()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    loop {
        let engine = SyncEngine::new(db.clone(), target.clone(), fetcher.clone());
        if let Err(e) = engine.run_cycle(&config, &feed).await {
            error!("Sync cycle aborted: {}", e);
        }

        if let Err(e) = sweep_expired(db.as_ref(), target.as_ref(), config.delete_after_days).await {
            error!("Retention sweep aborted: {}", e);
        }

        if cli.once {
            info!("xpost-sync: ran once, exiting");
            break;
        }

        let pause = config.poll.next_sleep();
        info!("Sleeping for {} minutes", pause.as_secs() / 60);
        if sleep_unless_shutdown(pause, &shutdown).await {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        config = reload_config(&config_path, config);
        if instance_changed(&config, target.instance_url()) {
            info!("Target instance changed to {}", config.instance_url());
            match connect(&config).await {
                Ok(client) => target = client,
                Err(e) => error!("Keeping {}: {}", target.instance_url(), e),
            }
        }
    }

    info!("xpost-sync stopped");
    Ok(())
}

/// Build and verify the Mastodon client for the configured instance
async fn connect(config: &Config) -> Result<Arc<MastodonClient>> {
    let mut client = MastodonClient::from_config(config)?;
    client.authenticate().await?;

    if let Err(e) = client.fetch_instance_info().await {
        warn!("Could not read instance limits, assuming {}: {}", client.character_limit(), e);
    }
    if config.toot_len_limit > client.character_limit() {
        warn!(
            "toot_len_limit {} exceeds the instance limit of {}",
            config.toot_len_limit,
            client.character_limit()
        );
    }

    Ok(Arc::new(client))
}

/// Re-read the configuration, keeping `current` if the file is now invalid
fn reload_config(path: &Path, current: Config) -> Config {
    match Config::load_from_path(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Keeping previous configuration: {}", e);
            current
        }
    }
}

/// Whether the configured target differs from the connected one
fn instance_changed(config: &Config, connected_url: &str) -> bool {
    config.instance_url() != connected_url
}

/// Sleep for `duration`, waking every second to check for shutdown
///
/// Returns true if shutdown was requested.
async fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    for _ in 0..duration.as_secs() {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        sleep(Duration::from_secs(1)).await;
    }
    shutdown.load(Ordering::Relaxed)
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libxpost::XpostError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping after the current cycle");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_text(instance: &str, limit: usize) -> String {
        format!(
            r#"
target_instance_url = "{}"
toot_len_limit = {}
max_attachment_count = 4
include_repost = true
standalone_repost = false
include_post_url = true
delete_after_days = 0

[[user_list]]
id = "1669879400"
"#,
            instance, limit
        )
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, config_text("mastodon.example", 500)).unwrap();
        let config = Config::load_from_path(&path).unwrap();

        fs::write(&path, config_text("other.example", 1000)).unwrap();
        let reloaded = reload_config(&path, config);

        assert_eq!(reloaded.toot_len_limit, 1000);
        assert_eq!(reloaded.instance_url(), "https://other.example");
    }

    #[test]
    fn test_reload_keeps_last_good_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, config_text("mastodon.example", 500)).unwrap();
        let config = Config::load_from_path(&path).unwrap();

        fs::write(&path, "target_instance_url = [broken").unwrap();
        let reloaded = reload_config(&path, config.clone());
        assert_eq!(reloaded.instance_url(), config.instance_url());
        assert_eq!(reloaded.toot_len_limit, 500);
        assert_eq!(reloaded.user_list.len(), 1);

        fs::remove_file(&path).unwrap();
        let reloaded = reload_config(&path, reloaded);
        assert_eq!(reloaded.toot_len_limit, 500);
    }

    #[test]
    fn test_instance_change_detection() {
        let config = Config::from_toml(&config_text("mastodon.example/", 500)).unwrap();
        assert!(!instance_changed(&config, "https://mastodon.example"));
        assert!(instance_changed(&config, "https://botsin.space"));
    }
}
