use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod processor;
mod services;

use app::App;
use config::Config;
use error::{AppError, Result};

const STATUS_LIMIT: usize = 10;

#[derive(Debug, Parser)]
#[command(
    name = "note-summary",
    version,
    about = "Monitor Outlook for self-sent notes and create OneNote pages.",
    after_help = "Examples:
  note-summary --auth-only       # Initial authentication
  note-summary --list-notebooks  # Show available notebooks
  note-summary                   # Process pending emails
  note-summary --daemon          # Continuous monitoring"
)]
struct Cli {
    /// Only perform authentication (for initial setup)
    #[arg(long)]
    auth_only: bool,

    /// List available OneNote notebooks and sections
    #[arg(long)]
    list_notebooks: bool,

    /// Run in continuous monitoring mode
    #[arg(long)]
    daemon: bool,

    /// Seconds between checks in daemon mode
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Show what would be processed without making changes
    #[arg(long, conflicts_with = "daemon")]
    dry_run: bool,

    /// Show how many emails were processed and the most recent ones
    #[arg(long)]
    status: bool,

    /// Forget the cached sign-in
    #[arg(long)]
    logout: bool,

    /// Forget which emails were already processed
    #[arg(long)]
    reset_ledger: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("Verbose logging enabled");

    let config = Config::load(cli.config.as_deref()).inspect_err(|e| tracing::error!("{}", e))?;
    let app = App::from_config(&config).await?;

    if cli.logout {
        app.logout().await?;
        println!("Logged out successfully.");
        return Ok(());
    }

    if cli.status {
        return print_status(&app).await;
    }

    if cli.reset_ledger {
        let removed = app.reset_ledger().await?;
        println!("Removed {} processed record(s).", removed);
        return Ok(());
    }

    if cli.auth_only {
        tracing::info!("Running authentication only...");
        return match app.authenticate(true).await? {
            Some(_) => {
                tracing::info!("Authentication successful! Token cached for future use.");
                Ok(())
            }
            None => {
                tracing::error!("Authentication failed.");
                Err(AppError::Unauthenticated)
            }
        };
    }

    authenticate(&app).await?;

    if cli.list_notebooks {
        print_notebooks(&app).await
    } else if cli.daemon {
        let shutdown = shutdown_signal()?;
        tracing::info!("Press Ctrl+C to stop.");
        app.run_loop(Duration::from_secs(cli.interval), shutdown)
            .await;
        Ok(())
    } else {
        app.run_once(cli.dry_run).await?;
        Ok(())
    }
}

/// Silent first, then the device-code prompt.
async fn authenticate(app: &App) -> Result<()> {
    if app.authenticate(false).await?.is_some() {
        return Ok(());
    }

    if !app.has_cached_credential().await {
        tracing::info!("No cached credentials. Starting interactive authentication...");
    }
    if app.authenticate(true).await?.is_some() {
        return Ok(());
    }

    tracing::error!("Failed to authenticate. Run with --auth-only to authenticate.");
    Err(AppError::Unauthenticated)
}

/// The handler is installed before this returns, so an interrupt that
/// arrives mid-pass is held until the loop checks for it.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(async move {
        interrupt.recv().await;
    })
}

#[cfg(windows)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
    Ok(async move {
        ctrl_c.recv().await;
    })
}

async fn print_notebooks(app: &App) -> Result<()> {
    let listing = app
        .list_notebooks()
        .await
        .inspect_err(|e| tracing::error!("Failed to list notebooks: {}", e))?;

    println!("\nAvailable OneNote Notebooks:");
    println!("{}", "=".repeat(50));

    if listing.is_empty() {
        println!("No notebooks found.");
        return Ok(());
    }

    for (notebook, sections) in listing {
        println!("\n  Notebook: {}", notebook.display_name);
        println!("  ID: {}", notebook.id);
        if sections.is_empty() {
            println!("  Sections: (none)");
        } else {
            println!("  Sections:");
            for section in sections {
                println!("    - {}", section.display_name);
            }
        }
    }

    Ok(())
}

async fn print_status(app: &App) -> Result<()> {
    let status = app.status(STATUS_LIMIT).await?;

    println!("Processed emails: {}", status.total);
    if status.recent.is_empty() {
        return Ok(());
    }

    println!("\nMost recent:");
    for record in status.recent {
        println!(
            "  {}  {}  (received {}, page: {})",
            record.processed_at.format("%Y-%m-%d %H:%M:%S"),
            record.subject,
            record.received_at.format("%Y-%m-%d %H:%M:%S"),
            record.page_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_defaults_to_five_minutes() {
        let cli = Cli::try_parse_from(["note-summary", "--daemon"]).unwrap();
        assert!(cli.daemon);
        assert_eq!(cli.interval, 300);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Cli::try_parse_from(["note-summary", "--daemon", "--interval", "0"]).is_err());
        let cli = Cli::try_parse_from(["note-summary", "--daemon", "--interval", "1"]).unwrap();
        assert_eq!(cli.interval, 1);
    }

    #[test]
    fn dry_run_cannot_be_combined_with_daemon() {
        let err = Cli::try_parse_from(["note-summary", "--daemon", "--dry-run"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        assert!(Cli::try_parse_from(["note-summary", "--dry-run"]).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_before_first_poll_is_caught() {
        let shutdown = shutdown_signal().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .unwrap();
    }
}
