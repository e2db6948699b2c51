//! `sync` command: run one session against a disk-backed store.

use std::path::PathBuf;
use std::sync::Arc;

use assetsync::config::parse_override;
use assetsync::{
    AssetSource, HttpTransport, LoadOutcome, Loader, LoaderConfig, LoaderEvent, SyncStage,
};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use super::{format_size, open_storage, resolve_store_dir};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Host prefix for the manifest and every asset
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,

    /// Manifest path relative to the host
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<String>,

    /// Store directory (defaults to the platform data directory)
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// INI file with a [loader] section
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override a loader option (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Don't read or write the local cache
    #[arg(long)]
    pub no_cache: bool,

    /// Skip content hash verification
    #[arg(long)]
    pub no_checksum: bool,

    /// Maximum simultaneous downloads
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,
}

impl SyncArgs {
    /// Build the loader configuration: file, then `--set`, then flags.
    pub fn loader_config(&self) -> Result<LoaderConfig, CliError> {
        let mut config = match self.config {
            Some(ref path) => LoaderConfig::load(path)?,
            None => LoaderConfig::default(),
        };

        let overrides = self
            .set
            .iter()
            .map(|raw| parse_override(raw))
            .collect::<Result<Vec<_>, _>>()?;
        config.apply_overrides(overrides)?;

        if let Some(ref host) = self.host {
            config.set("app_host", host)?;
        }
        if let Some(ref manifest) = self.manifest {
            config.manifest_file = manifest.clone();
        }
        if self.no_cache {
            config.use_local_cache = false;
        }
        if self.no_checksum {
            config.perform_checksum = false;
        }
        if let Some(jobs) = self.jobs {
            config.max_concurrent_downloads = jobs.max(1);
        }

        if config.app_host.is_none() {
            return Err(CliError::Config(
                "no host configured; pass --host or set app_host".to_string(),
            ));
        }
        Ok(config)
    }
}

pub async fn run(args: SyncArgs) -> Result<(), CliError> {
    let config = args.loader_config()?;
    let store_dir = resolve_store_dir(args.store)?;
    tracing::debug!(store = %store_dir.display(), "Using store directory");

    let storage = open_storage(store_dir).await?;
    let transport = Arc::new(HttpTransport::new()?);
    let loader = Loader::open(config, storage, transport).await?;

    let bar = progress_bar();
    let renderer = tokio::spawn(render_events(loader.subscribe(), bar.clone()));

    let result = loader.load().await;
    let _ = renderer.await;

    match result {
        Ok(outcome) => {
            bar.finish_with_message("ready");
            print_outcome(&outcome);
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message("failed");
            Err(e.into())
        }
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner} {msg:20} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar
}

async fn render_events(mut events: broadcast::Receiver<LoaderEvent>, bar: ProgressBar) {
    loop {
        match events.recv().await {
            Ok(LoaderEvent::Stage(stage)) => {
                bar.set_message(stage.to_string());
                if stage == SyncStage::Failed {
                    break;
                }
            }
            Ok(LoaderEvent::Progress { loaded, total }) => {
                bar.set_length(total);
                bar.set_position(loaded);
            }
            Ok(LoaderEvent::Ready) | Ok(LoaderEvent::Error(_)) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::trace!("Progress display lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_outcome(outcome: &LoadOutcome) {
    let report = &outcome.report;
    println!(
        "Application {} (manifest {}) from {}",
        outcome.manifest.app_version, outcome.manifest.manifest_version, report.host
    );
    println!(
        "Downloaded {} file(s), {}",
        report.downloaded.len(),
        format_size(report.total_bytes)
    );
    if !report.memory_only.is_empty() {
        println!("Not cached: {}", report.memory_only.join(", "));
    }
    if !report.skipped.is_empty() {
        println!("Skipped optional: {}", report.skipped.join(", "));
    }

    println!();
    for resolution in &outcome.resolutions {
        let source = match &resolution.source {
            AssetSource::Cached { bytes, .. } => format!("cached  {}", format_size(bytes.len() as u64)),
            AssetSource::RemoteOnly { url } => format!("remote  {}", url),
        };
        println!("  {:<40} {}", resolution.activation.path, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SyncArgs {
        SyncArgs {
            host: None,
            manifest: None,
            store: None,
            config: None,
            set: Vec::new(),
            no_cache: false,
            no_checksum: false,
            jobs: None,
        }
    }

    #[test]
    fn test_flags_override_file_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.ini");
        std::fs::write(
            &path,
            "[loader]\napp_host = https://file.test\nmax_concurrent_downloads = 2\n",
        )
        .unwrap();

        let config = SyncArgs {
            config: Some(path),
            set: vec!["maxConcurrentDownloads=3".to_string()],
            host: Some("https://flag.test/".to_string()),
            no_cache: true,
            ..args()
        }
        .loader_config()
        .unwrap();

        assert_eq!(config.host(), "https://flag.test");
        assert_eq!(config.max_concurrent_downloads, 3);
        assert!(!config.use_local_cache);
        assert!(config.perform_checksum);
    }

    #[test]
    fn test_missing_host_rejected() {
        assert!(matches!(args().loader_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_malformed_override_rejected() {
        let result = SyncArgs {
            host: Some("https://h.test".to_string()),
            set: vec!["nonsense".to_string()],
            ..args()
        }
        .loader_config();
        assert!(matches!(result, Err(CliError::Config(_))));
    }
}
