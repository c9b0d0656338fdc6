//! Scanner orchestrating manifest reads, dispatch and output.

use crate::config::ScanConfig;
use crate::notify::ConsoleOutput;
use crate::registry::{HttpRegistryClient, Prober, RegistryEndpoints};
use crate::resolver::{is_supported, manifest_name, Dispatcher};
use crate::types::{Result, ScanResult};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Scans manifest files, several at a time.
pub struct Scanner {
    config: ScanConfig,
    dispatcher: Dispatcher,
    console: ConsoleOutput,
}

impl Scanner {
    /// Create a scanner probing the given registries over HTTP.
    pub fn new(config: ScanConfig, endpoints: RegistryEndpoints, verbose: bool) -> Result<Self> {
        let client = HttpRegistryClient::new(&config.http_config())?;
        let prober = Prober::new(Arc::new(client), config.retry_policy(), endpoints);
        Ok(Self::with_prober(config, prober, verbose))
    }

    /// Create a scanner around an existing prober.
    pub fn with_prober(config: ScanConfig, prober: Prober, verbose: bool) -> Self {
        let console = ConsoleOutput::new(verbose, config.json, config.quiet);
        Self {
            config,
            dispatcher: Dispatcher::new(prober),
            console,
        }
    }

    pub fn console(&self) -> &ConsoleOutput {
        &self.console
    }

    /// Scan a single manifest file.
    pub async fn scan(&self, path: &Path) -> Result<ScanResult> {
        let start_time = Instant::now();
        let shown = path.display().to_string();
        self.console.print_scan_start(&shown);

        let file_name = manifest_name(&shown).to_string();
        if !is_supported(&file_name) {
            warn!("{} is not a supported manifest, nothing to check", shown);
        }

        let raw = tokio::fs::read(path).await?;
        debug!("Read {} bytes from {}", raw.len(), shown);
        let resolution = self.dispatcher.evaluate(&file_name, &raw).await;
        self.console
            .print_progress(&format!("{}: {} confusable", shown, resolution.flagged.len()));

        Ok(ScanResult {
            file: shown,
            flagged: resolution.flagged,
            duration_secs: start_time.elapsed().as_secs_f64(),
            errors: resolution.errors,
        })
    }

    /// Scan several manifests in parallel, keeping input order.
    pub async fn scan_multiple(&self, paths: Vec<PathBuf>) -> Vec<ScanResult> {
        let parallel_count = self.config.parallel.max(1);
        let progress = self
            .console
            .create_progress_bar(paths.len() as u64, "manifests");

        let mut indexed: Vec<(usize, ScanResult)> = stream::iter(paths.into_iter().enumerate())
            .map(|(idx, path)| {
                let progress = progress.clone();
                async move {
                    let result = match self.scan(&path).await {
                        Ok(r) => r,
                        Err(e) => ScanResult {
                            file: path.display().to_string(),
                            flagged: vec![],
                            duration_secs: 0.0,
                            errors: vec![e.to_string()],
                        },
                    };
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    (idx, result)
                }
            })
            .buffer_unordered(parallel_count)
            .collect()
            .await;

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::stub::ScriptedClient;
    use crate::registry::RetryPolicy;
    use std::time::Duration;

    fn scanner(client: Arc<ScriptedClient>) -> Scanner {
        let prober = Prober::new(
            client,
            RetryPolicy {
                max_retries: 3,
                delay: Duration::ZERO,
            },
            RegistryEndpoints::all_at("http://registry.test"),
        );
        let config = ScanConfig {
            json: true,
            ..ScanConfig::default()
        };
        Scanner::with_prober(config, prober, false)
    }

    #[tokio::test]
    async fn test_scan_multiple_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let package_json = dir.path().join("package.json");
        std::fs::write(&package_json, r#"{"dependencies":{"left-pad":"1.0.0"}}"#).unwrap();
        let requirements = dir.path().join("requirements.txt");
        std::fs::write(&requirements, "requests==2.31.0\n").unwrap();
        let missing = dir.path().join("Gemfile");

        let client = Arc::new(
            ScriptedClient::new().route("http://registry.test/project/requests/", 200, "<html></html>"),
        );
        let results = scanner(client)
            .scan_multiple(vec![package_json, requirements, missing])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].flagged.len(), 1);
        assert_eq!(results[0].flagged[0].package, "left-pad");
        assert!(results[1].flagged.is_empty());
        assert!(results[1].errors.is_empty());
        assert_eq!(results[2].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let readme = dir.path().join("README.md");
        std::fs::write(&readme, "# hello").unwrap();

        let client = Arc::new(ScriptedClient::new());
        let result = scanner(client.clone()).scan(&readme).await.unwrap();

        assert!(result.flagged.is_empty());
        assert_eq!(result.errors, vec!["Unsupported manifest file: README.md".to_string()]);
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_manifest_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let pom = dir.path().join("pom.xml");
        std::fs::write(&pom, "<project><dependencies></project>").unwrap();
        let lock = dir.path().join("Gemfile.lock");
        std::fs::write(&lock, "GEM\n  remote: https://rubygems.org/\n  specs:\n").unwrap();

        let client = Arc::new(ScriptedClient::new());
        let results = scanner(client).scan_multiple(vec![pom, lock]).await;

        assert!(results[0].flagged.is_empty());
        assert_eq!(results[0].errors.len(), 1);
        assert!(results[1].errors.is_empty());
    }
}
