//! Command-line interface for contentlib.
//!
//! Provides commands for listing and inspecting catalogue items, renaming,
//! cloning, toggling and deleting them, and watching the content
//! directories for changes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config;
use crate::core::{CollectionEvent, TracingProgress};
use crate::domain::{ContentId, ContentObject};
use crate::library::FolderKind;
use crate::watch::WatchedManager;

/// contentlib - Content catalogue manager
#[derive(Parser, Debug)]
#[command(name = "contentlib")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List items in the catalogue
    List {
        /// Only show disabled items
        #[arg(long)]
        disabled: bool,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show details of an item
    Show {
        /// Content ID
        id: String,
    },

    /// Rename an item
    Rename {
        /// Current content ID
        id: String,

        /// New content ID
        new_id: String,
    },

    /// Copy an item under a new ID
    Clone {
        /// Content ID to copy
        id: String,

        /// ID of the copy
        new_id: String,

        /// Put the copy under the disabled root
        #[arg(long)]
        disabled: bool,
    },

    /// Move an item between the enabled and disabled roots
    Toggle {
        /// Content ID
        id: String,
    },

    /// Move an item to the recycle bin
    Delete {
        /// Content IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Watch content directories and print catalogue changes until Ctrl-C
    Watch,

    /// Empty old recycle bin batches
    Purge {
        /// Remove batches older than this many days
        #[arg(long, default_value = "30")]
        older_than_days: u64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::List { disabled, limit } => list_items(disabled, limit).await,
            Commands::Show { id } => show_item(&id).await,
            Commands::Rename { id, new_id } => rename_item(&id, &new_id).await,
            Commands::Clone {
                id,
                new_id,
                disabled,
            } => clone_item(&id, &new_id, disabled).await,
            Commands::Toggle { id } => toggle_item(&id).await,
            Commands::Delete { ids } => delete_items(&ids).await,
            Commands::Watch => watch().await,
            Commands::Purge { older_than_days } => purge(older_than_days),
            Commands::Config => show_config(),
        }
    }
}

/// Catalogue over the configured roots
fn open_manager() -> Result<WatchedManager<FolderKind>> {
    config::config()?.folder_manager()
}

async fn list_items(only_disabled: bool, limit: usize) -> Result<()> {
    let manager = open_manager()?;
    manager.set_progress_sink(Some(Arc::new(TracingProgress)));
    manager
        .ensure_loaded_async()
        .await
        .context("Failed to load catalogue")?;

    if manager.list().is_empty() {
        println!("Catalogue is empty. Add directories to {}", config::config()?.enabled.display());
        return Ok(());
    }

    println!("{:<32} {:<9} {:>6}  {:<40}", "ID", "STATE", "FILES", "NAME");
    println!("{}", "-".repeat(92));

    let wrappers = manager.list().sorted();
    let mut shown = 0;
    for wrapper in wrappers.iter().filter(|w| !only_disabled || !w.enabled()) {
        if shown == limit {
            break;
        }
        shown += 1;

        let state = if wrapper.enabled() { "enabled" } else { "disabled" };
        match wrapper.loaded_item() {
            Some(item) => println!(
                "{:<32} {:<9} {:>6}  {:<40}",
                wrapper.id(),
                state,
                item.file_count(),
                truncate(&item.name(), 40)
            ),
            None => println!("{:<32} {:<9} {:>6}  {:<40}", wrapper.id(), state, "-", "(failed to load)"),
        }
    }

    println!("\nTotal: {} items", manager.list().len());
    if let Some(error) = manager.last_error() {
        println!("Last error: {}", error);
    }

    Ok(())
}

async fn show_item(id: &str) -> Result<()> {
    let manager = open_manager()?;
    let id = ContentId::new(id);

    let item = manager
        .get_by_id_async(&id)
        .await?
        .with_context(|| format!("Item not found: {}", id))?;
    let manifest = item.manifest();

    println!("ID:       {}", item.id());
    println!("Name:     {}", item.name());
    println!("State:    {}", if item.enabled() { "enabled" } else { "disabled" });
    println!("Location: {}", item.location().display());
    if let Some(version) = &manifest.version {
        println!("Version:  {}", version);
    }
    if !manifest.tags.is_empty() {
        println!("Tags:     {}", manifest.tags.join(", "));
    }
    println!("Files:    {}", item.file_count());
    if let Some(loaded_at) = item.loaded_at() {
        println!("Loaded:   {}", loaded_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

async fn rename_item(id: &str, new_id: &str) -> Result<()> {
    let manager = open_manager()?;
    let id = ContentId::new(id);

    manager.ensure_scanned_async().await?;
    let enabled = manager
        .get_wrapper(&id)
        .with_context(|| format!("Item not found: {}", id))?
        .enabled();

    manager.rename_async(&id, new_id, enabled).await?;
    println!("Renamed {} to {}", id, new_id);
    Ok(())
}

async fn clone_item(id: &str, new_id: &str, disabled: bool) -> Result<()> {
    let manager = open_manager()?;
    manager
        .clone_async(&ContentId::new(id), new_id, !disabled)
        .await?;
    println!("Cloned {} as {}", id, new_id);
    Ok(())
}

async fn toggle_item(id: &str) -> Result<()> {
    let manager = open_manager()?;
    let id = ContentId::new(id);

    manager.toggle_async(&id).await?;
    let enabled = manager
        .get_wrapper(&id)
        .map(|w| w.enabled())
        .unwrap_or_default();
    println!("{} is now {}", id, if enabled { "enabled" } else { "disabled" });
    Ok(())
}

async fn delete_items(ids: &[String]) -> Result<()> {
    let manager = open_manager()?;
    let ids: Vec<ContentId> = ids.iter().map(ContentId::new).collect();

    let deleted = manager.delete_many_async(&ids).await?;
    println!(
        "Moved {} item(s) to {}",
        deleted,
        config::config()?.recycle.display()
    );
    Ok(())
}

async fn watch() -> Result<()> {
    let manager = open_manager()?;

    // Subscribing first makes the scan load everything in the background
    let mut events = manager.list().subscribe();
    manager.ensure_scanned_async().await?;
    manager.start_watching()?;

    println!(
        "Watching {} items in {} (Ctrl-C to stop)",
        manager.list().len(),
        config::config()?.enabled.display()
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} catalogue events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.stop_watching().await;
    Ok(())
}

fn print_event(event: &CollectionEvent) {
    match event {
        CollectionEvent::Reset { count } => println!("* reset ({} items)", count),
        CollectionEvent::Added { id } => println!("+ {}", id),
        CollectionEvent::Removed { id } => println!("- {}", id),
        CollectionEvent::Replaced { old_id, new_id } => println!("~ {} -> {}", old_id, new_id),
    }
}

fn purge(older_than_days: u64) -> Result<()> {
    let bin = config::config()?.recycle_bin();
    let removed = bin
        .purge_older_than(Duration::from_secs(older_than_days * 24 * 60 * 60))
        .with_context(|| format!("Failed to purge {}", bin.dir().display()))?;
    println!("Removed {} batch(es) from {}", removed, bin.dir().display());
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("contentlib configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Enabled:  {}", cfg.enabled.display());
    println!(
        "  Disabled: {}",
        cfg.disabled
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not supported)".to_string())
    );
    println!("  Recycle:  {}", cfg.recycle.display());
    println!();
    println!("Loading:");
    println!("  Concurrency: {}", cfg.manager.load_concurrency);
    println!("  Max passes:  {}", cfg.manager.max_load_passes);
    println!("  Eager:       {}", cfg.manager.eager_load_when_observed);
    println!();
    println!("Watching:");
    println!("  Debounce:     {:?}", cfg.watch.debounce);
    println!("  Shield grace: {:?}", cfg.shield_grace);
    if cfg.watch.ignore_patterns.is_empty() {
        println!("  Ignore:       (none)");
    } else {
        println!("  Ignore:       {}", cfg.watch.ignore_patterns.join(", "));
    }
    if !cfg.attachment_suffixes.is_empty() {
        println!();
        println!("Attachments: {}", cfg.attachment_suffixes.join(", "));
    }

    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
