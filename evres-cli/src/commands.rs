use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use event_resolver::{ListingConfig, Resolution, ResolverConfig, ResolverError};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::OutputFormat;
use crate::error::{CliError, Result};
use crate::output::{OutputManager, write_output};

/// Overrides taken from `evres run` flags.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub max_concurrent: Option<usize>,
    pub cache: Option<PathBuf>,
    pub listing_json: Option<PathBuf>,
}

impl RunOverrides {
    fn apply(self, config: &mut ResolverConfig) {
        if let Some(max) = self.max_concurrent {
            config.runner.max_concurrency = max;
        }
        if let Some(cache) = self.cache {
            config.cache.path = cache;
        }
        if let Some(path) = self.listing_json {
            config.listing = Some(ListingConfig::Json { path });
        }
    }
}

pub struct CommandExecutor {
    config: ResolverConfig,
    output: OutputManager,
    token: CancellationToken,
}

impl CommandExecutor {
    pub fn new(config: ResolverConfig, colored: bool, token: CancellationToken) -> Self {
        Self {
            config,
            output: OutputManager::new(colored),
            token,
        }
    }

    pub async fn run(
        mut self,
        overrides: RunOverrides,
        format: OutputFormat,
        output_file: Option<&Path>,
    ) -> Result<()> {
        overrides.apply(&mut self.config);
        let orchestrator = self.config.build_orchestrator(&self.token)?;
        info!(cache = %orchestrator.cache().path().display(), "Starting run");

        let spinner = (format == OutputFormat::Pretty).then(|| spinner("Resolving events..."));
        let result = orchestrator.run(&self.token).await;
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        let report = result?;
        let content = self.output.format_report(&report, &format)?;
        write_output(&content, output_file)
    }

    pub async fn resolve(
        self,
        url: &str,
        timeout: Option<u64>,
        format: OutputFormat,
    ) -> Result<()> {
        let mut config = self.config;
        if let Some(secs) = timeout {
            config.http.timeout_secs = secs;
        }
        let fetcher = config.build_fetcher(&self.token)?;
        let extractor = config.build_extractor(Arc::clone(&fetcher))?;

        let spinner = (format == OutputFormat::Pretty).then(|| spinner("Resolving stream..."));
        let resolution = tokio::select! {
            _ = self.token.cancelled() => Err(CliError::Resolver(ResolverError::Cancelled)),
            resolution = extractor.resolve(url) => Ok(resolution),
        };
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        match resolution? {
            Resolution::Resolved(stream) => {
                let content = self.output.format_stream(&stream, &format)?;
                write_output(&content, None)
            }
            Resolution::Unresolved(reason) => Err(CliError::Unresolved(reason.to_string())),
        }
    }

    pub async fn cache_show(self, format: OutputFormat) -> Result<()> {
        let records = self.config.build_cache().load().await;
        let content = self.output.format_records(&records, &format)?;
        write_output(&content, None)
    }

    pub async fn cache_prune(self) -> Result<()> {
        let cache = self.config.build_cache();
        let removed = cache.prune().await?;
        println!(
            "✓ Removed {removed} expired record(s) from {}",
            cache.path().display()
        );
        Ok(())
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_strings(&[
            "▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪",
        ]));
    }
    pb.set_message(message);
    pb
}
