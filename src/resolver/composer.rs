//! PHP Composer manifests: `composer.json`, `composer.lock`, `installed.json`.

use crate::registry::{ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct ComposerJson {
    #[serde(default)]
    require: Map<String, Value>,
    #[serde(default, rename = "require-dev")]
    require_dev: Map<String, Value>,
}

/// Legacy `installed.json`: a bare array of package objects.
#[derive(Debug, Default, Deserialize)]
struct InstalledPackage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    require: Map<String, Value>,
    #[serde(default, rename = "require-dev")]
    require_dev: Map<String, Value>,
}

/// `composer.lock` and Composer 2 `installed.json`.
#[derive(Debug, Default, Deserialize)]
struct LockFile {
    #[serde(default)]
    packages: Vec<LockedPackage>,
    #[serde(default, rename = "packages-dev")]
    packages_dev: Vec<LockedPackage>,
}

#[derive(Debug, Default, Deserialize)]
struct LockedPackage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComposerManifest {
    Project,
    Installed,
}

/// Platform packages describe the runtime, not something on Packagist.
/// See https://getcomposer.org/doc/01-basic-usage.md#platform-packages
pub fn is_platform_package(name: &str) -> bool {
    matches!(
        name,
        "php" | "composer" | "composer-plugin-api" | "composer-runtime-api"
    ) || name.starts_with("php-")
        || name.starts_with("ext-")
        || name.starts_with("lib-")
}

/// Resolver for the Composer ecosystem.
pub struct ComposerResolver {
    manifest: ComposerManifest,
    references: ReferenceList,
}

impl ComposerResolver {
    pub fn new(file_name: &str) -> Self {
        let manifest = if file_name == "composer.json" {
            ComposerManifest::Project
        } else {
            ComposerManifest::Installed
        };

        Self {
            manifest,
            references: ReferenceList::new(Ecosystem::Composer),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }

    fn push_constraints(&mut self, constraints: &Map<String, Value>) {
        for (name, version) in constraints {
            self.references
                .push_unique(name, version.as_str().unwrap_or_default());
        }
    }

    fn read_project(&mut self, raw: &[u8]) -> Result<()> {
        let data: ComposerJson = serde_json::from_slice(raw)?;
        self.push_constraints(&data.require);
        self.push_constraints(&data.require_dev);
        Ok(())
    }

    fn read_installed(&mut self, raw: &[u8]) -> Result<()> {
        match serde_json::from_slice::<Vec<InstalledPackage>>(raw) {
            Ok(packages) => {
                for package in packages {
                    if !package.name.is_empty() {
                        self.references.push_unique(&package.name, &package.version);
                    }
                    self.push_constraints(&package.require);
                    self.push_constraints(&package.require_dev);
                }
            }
            Err(e) => {
                debug!("Not a legacy installed.json array ({}), trying lock file shape", e);
                let lock: LockFile = serde_json::from_slice(raw)?;
                for package in lock.packages.iter().chain(lock.packages_dev.iter()) {
                    if !package.name.is_empty() {
                        self.references.push_unique(&package.name, &package.version);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PackageResolver for ComposerResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        match self.manifest {
            ComposerManifest::Project => self.read_project(raw),
            ComposerManifest::Installed => self.read_installed(raw),
        }
    }

    fn references(&self) -> &[PackageReference] {
        self.references.as_slice()
    }

    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage> {
        let mut flagged = Vec::new();

        for reference in self.references() {
            if is_platform_package(&reference.name) {
                continue;
            }
            // Packagist redirects unknown names to search, so a redirect is a miss.
            let url = prober.endpoints().packagist_package(&reference.name);
            if !prober.is_public(&ProbeRequest::new(url).no_redirects()).await {
                flagged.push(reference.flag());
            }
        }

        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::stub::ScriptedClient;
    use crate::registry::{RegistryEndpoints, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    fn read(file_name: &str, content: &str) -> Vec<(String, String)> {
        let mut resolver = ComposerResolver::new(file_name);
        resolver.read_references(content.as_bytes()).unwrap();
        resolver
            .references()
            .iter()
            .map(|r| (r.name.clone(), r.version.clone()))
            .collect()
    }

    #[test]
    fn test_composer_json_require_and_dev() {
        let refs = read(
            "composer.json",
            r#"{
                "require": {"php": ">=8.1", "acme/billing": "^2.0", "ext-json": "*"},
                "require-dev": {"phpunit/phpunit": "^10", "acme/billing": "^3.0"}
            }"#,
        );

        assert_eq!(
            refs,
            vec![
                ("php".to_string(), ">=8.1".to_string()),
                ("acme/billing".to_string(), "^2.0".to_string()),
                ("ext-json".to_string(), "*".to_string()),
                ("phpunit/phpunit".to_string(), "^10".to_string()),
            ]
        );
    }

    #[test]
    fn test_composer_json_invalid_is_error() {
        let mut resolver = ComposerResolver::new("composer.json");
        assert!(resolver.read_references(b"[1, 2").is_err());
    }

    #[test]
    fn test_legacy_installed_array() {
        let refs = read(
            "installed.json",
            r#"[
                {"name": "acme/logger", "version": "1.4.0", "require": {"psr/log": "^1.0"}},
                {"name": "psr/log", "version": "1.1.4"}
            ]"#,
        );

        assert_eq!(
            refs,
            vec![
                ("acme/logger".to_string(), "1.4.0".to_string()),
                ("psr/log".to_string(), "^1.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_lock_file_shape() {
        let refs = read(
            "composer.lock",
            r#"{
                "content-hash": "abc",
                "packages": [{"name": "acme/http", "version": "v3.1.0"}],
                "packages-dev": [{"name": "acme/http", "version": "v9"}, {"name": "mockery/mockery", "version": "1.6.0"}]
            }"#,
        );

        assert_eq!(
            refs,
            vec![
                ("acme/http".to_string(), "v3.1.0".to_string()),
                ("mockery/mockery".to_string(), "1.6.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_platform_packages() {
        assert!(is_platform_package("php"));
        assert!(is_platform_package("ext-mbstring"));
        assert!(is_platform_package("lib-curl"));
        assert!(is_platform_package("composer-plugin-api"));
        assert!(!is_platform_package("acme/php-tools"));
    }

    #[tokio::test]
    async fn test_platform_packages_never_probed() {
        let mut resolver = ComposerResolver::new("composer.json");
        resolver
            .read_references(br#"{"require": {"php": "^8.2", "ext-intl": "*", "acme/private": "^1"}}"#)
            .unwrap();
        let client = Arc::new(ScriptedClient::new());
        let prober = Prober::new(
            client.clone(),
            RetryPolicy {
                max_retries: 3,
                delay: Duration::ZERO,
            },
            RegistryEndpoints::all_at("http://registry.test"),
        );

        let flagged = resolver.unavailable_references(&prober).await;

        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].name, "composer");
        assert_eq!(flagged[0].package, "acme/private");
        assert_eq!(client.total_calls(), 1);
        assert_eq!(
            client.redirect_flags("http://registry.test/packages/acme/private"),
            vec![false]
        );
    }
}
