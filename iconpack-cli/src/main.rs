//! iconpack command-line front end
//!
//! Lists, downloads, and applies icon packs. All logic lives in
//! `iconpack-core`; this binary only parses arguments and renders output.

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use iconpack_core::config::RELEASES_URL;
use iconpack_core::{
    DownloadProgress, HelperInstaller, HttpArchiveFetcher, ReleaseChecker, RevertScope,
    SyncConfig, SyncEngine,
};
use render::DownloadBar;

#[derive(Parser, Debug)]
#[command(name = "iconpack", version)]
#[command(about = "Sync icon packs and apply them as app overlays", long_about = None)]
struct Cli {
    /// Directory holding config.json and downloaded packs.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    /// Where target apps are discovered.
    #[arg(long, global = true)]
    system_apps: Option<PathBuf>,
    /// Where overlays are created.
    #[arg(long, global = true)]
    user_apps: Option<PathBuf>,
    /// Explicit path to the fileicon helper.
    #[arg(long, global = true)]
    helper: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List packs from every source with their install status.
    List,
    /// Download a pack (or update it) and make it active.
    Sync { name: String },
    /// Make an already downloaded pack active.
    Select { name: String },
    /// Show the active pack, installed packs, and overlays.
    Status,
    /// Show which apps have an icon in the active pack.
    Candidates,
    /// Apply the active pack to the given apps, or to all matching apps.
    Apply { targets: Vec<String> },
    /// Remove one overlay, or all overlays when no app is given.
    Revert { target: Option<String> },
    /// Delete a downloaded pack.
    Remove { name: String },
    /// Delete all downloaded packs and forget what was installed.
    ClearCache,
    /// Manage registry sources.
    Sources {
        #[command(subcommand)]
        action: SourcesCommand,
    },
    /// Set the interface language code (e.g. en_us).
    Language { code: String },
    /// Download the fileicon helper into a bin directory.
    InstallHelper {
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Check for pack updates and a newer iconpack release.
    CheckUpdates,
}

#[derive(Subcommand, Debug)]
enum SourcesCommand {
    List,
    Add { url: String },
    Remove { url: String },
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("iconpack_core={}", level).parse()?)
                .add_directive(format!("iconpack={}", level).parse()?)
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();
    Ok(())
}

fn build_config(cli: &Cli) -> SyncConfig {
    let mut config = match &cli.base_dir {
        Some(dir) => SyncConfig::with_base_dir(dir.clone()),
        None => SyncConfig::default(),
    };
    if let Some(dir) = &cli.system_apps {
        config.system_apps_root = dir.clone();
    }
    if let Some(dir) = &cli.user_apps {
        config.user_apps_root = dir.clone();
    }
    config.helper_path = cli.helper.clone();
    config
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cleaning up");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    tracing::debug!("Starting iconpack v{}", iconpack_core::VERSION);

    let config = build_config(&cli);

    let engine = SyncEngine::new(config.clone()).context("Failed to initialize iconpack")?;

    match cli.command {
        Commands::List => {
            let refresh = engine.refresh().await;
            for entry in &refresh.packs {
                println!("{}", render::pack_line(entry));
            }
            for failure in &refresh.failures {
                eprintln!("warning: {}: {}", failure.source, failure.error);
            }
            if refresh.packs.is_empty() && refresh.failures.is_empty() {
                println!("No packs available.");
            }
        }
        Commands::Sync { name } => {
            let refresh = engine.refresh().await;
            let Some(entry) = refresh.find(&name) else {
                for failure in &refresh.failures {
                    eprintln!("warning: {}: {}", failure.source, failure.error);
                }
                anyhow::bail!("No pack named '{}' in any source", name);
            };

            let cancel = cancel_on_ctrl_c();
            let bar = DownloadBar::start(&name);
            let progress = {
                let bar = bar.clone();
                move |p: DownloadProgress| bar.update(p)
            };
            let result = engine.sync(&entry.pack, &progress, &cancel).await;
            bar.finish();

            let handle = result.with_context(|| format!("Failed to sync '{}'", name))?;
            println!(
                "'{}' is installed and active ({} icons)",
                handle.name,
                handle.assets.len()
            );
        }
        Commands::Select { name } => {
            engine.select(&name).await?;
            println!("'{}' is now active", name);
        }
        Commands::Status => {
            let state = engine.state().await;
            match engine.active_pack().await? {
                Some(pack) => println!("Active pack: {} ({} icons)", pack.name, pack.assets.len()),
                None => println!("Active pack: none"),
            }
            for (name, content_id) in &state.installed {
                println!("installed  {:<24} {}", name, content_id);
            }
            for id in engine.overlays().managed_overlays()? {
                let from = state
                    .overlays
                    .get(&id)
                    .map(|o| o.pack.as_str())
                    .unwrap_or("unknown pack");
                println!("overlay    {:<24} {}", id, from);
            }
            if !engine.overlays().helper_available() {
                println!("The fileicon helper is not installed; run `iconpack install-helper`.");
            }
        }
        Commands::Candidates => {
            let candidates = engine.patch_candidates().await?;
            if candidates.is_empty() {
                println!("No apps match the active pack.");
            }
            for candidate in candidates {
                println!(
                    "{} {:<32} {}",
                    if candidate.overlaid { "*" } else { " " },
                    candidate.target.id,
                    candidate.asset.file_name
                );
            }
        }
        Commands::Apply { targets } => {
            let targets: Vec<String> = targets
                .into_iter()
                .map(|t| {
                    if t.ends_with(".app") {
                        t
                    } else {
                        format!("{}.app", t)
                    }
                })
                .collect();
            let report = engine.apply_overlays(&targets).await?;
            render::print_apply_report(&report);
        }
        Commands::Revert { target } => {
            let scope = match target {
                Some(t) if t.ends_with(".app") => RevertScope::Target(t),
                Some(t) => RevertScope::Target(format!("{}.app", t)),
                None => RevertScope::All,
            };
            let removed = engine.revert(&scope).await?;
            println!("Removed {} overlays", removed);
        }
        Commands::Remove { name } => {
            engine.remove_pack(&name).await?;
            println!("Removed '{}'", name);
        }
        Commands::ClearCache => {
            let removed = engine.clear_cache().await?;
            println!("Removed {} packs", removed);
        }
        Commands::Sources { action } => match action {
            SourcesCommand::List => {
                for source in engine.sources().await {
                    println!("{}", source);
                }
            }
            SourcesCommand::Add { url } => {
                if engine.add_source(&url).await? {
                    println!("Added {}", url);
                } else {
                    println!("{} is already configured", url);
                }
            }
            SourcesCommand::Remove { url } => {
                if engine.remove_source(&url).await? {
                    println!("Removed {}", url);
                } else {
                    println!("{} is not configured", url);
                }
            }
        },
        Commands::Language { code } => {
            engine.set_language(&code).await?;
            println!("Language set to {}", code);
        }
        Commands::CheckUpdates => {
            let updates = engine.check_updates().await;
            if updates.is_empty() {
                println!("All installed packs are up to date.");
            }
            for entry in &updates {
                println!("{}", render::pack_line(entry));
            }

            match ReleaseChecker::new(&config.user_agent)?
                .check(RELEASES_URL, iconpack_core::VERSION)
                .await
            {
                Ok(Some(release)) => {
                    println!("iconpack {} is available", release.version);
                    if let Some(url) = release.page_url {
                        println!("  {}", url);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Release check failed: {}", e),
            }
        }
        Commands::InstallHelper { dest } => {
            let dest = dest.unwrap_or_else(|| config.helper_bin_dir.clone());
            let fetcher = Arc::new(HttpArchiveFetcher::new(&config)?);
            let path = HelperInstaller::new(fetcher)
                .install(&dest)
                .await
                .with_context(|| {
                    format!(
                        "Failed to install the helper into {} (re-run with sufficient permissions or pass --dest)",
                        dest.display()
                    )
                })?;
            println!("Installed {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_apply_targets() {
        let cli = Cli::parse_from(["iconpack", "apply", "Safari", "Maps.app"]);
        match cli.command {
            Commands::Apply { targets } => assert_eq!(targets, vec!["Safari", "Maps.app"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_dirs_override_config() {
        let cli = Cli::parse_from([
            "iconpack",
            "status",
            "--base-dir",
            "/tmp/ip",
            "--user-apps",
            "/tmp/apps",
        ]);
        let config = build_config(&cli);
        assert_eq!(config.state_path(), PathBuf::from("/tmp/ip/config.json"));
        assert_eq!(config.user_apps_root, PathBuf::from("/tmp/apps"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
