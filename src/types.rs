//! Core types and errors for the dependency confusion scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while parsing manifests, probing registries or
/// running the confirmation listener.
#[derive(Error, Debug)]
pub enum DepconfError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("XML parse error: {0}")]
    XmlError(#[from] quick_xml::DeError),

    #[error("Hex decode error: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed {file}: {reason}")]
    StructuralParse { file: String, reason: String },

    #[error("Unsupported manifest file: {0}")]
    UnsupportedManifest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Telegram error: {0}")]
    TelegramError(String),
}

pub type Result<T> = std::result::Result<T, DepconfError>;

/// Packaging ecosystems the resolvers know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Composer,
    Pip,
    Gem,
    Mvn,
    Nuget,
    Docker,
}

impl Ecosystem {
    /// Name used in flagged results.
    pub fn name(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Composer => "composer",
            Ecosystem::Pip => "pip",
            Ecosystem::Gem => "gem",
            Ecosystem::Mvn => "mvn",
            Ecosystem::Nuget => "nuget",
            Ecosystem::Docker => "docker",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dependency reference extracted from a manifest, before any registry check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageReference {
    pub ecosystem: Ecosystem,
    /// Package identifier, possibly composite ("group/artifact", "namespace/repo").
    pub name: String,
    /// Free-form version or constraint string, empty when none was declared.
    pub version: String,
}

impl PackageReference {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            version: version.into(),
        }
    }

    /// Convert into the public result type once the reference was found confusable.
    pub fn flag(&self) -> FlaggedPackage {
        FlaggedPackage {
            name: self.ecosystem.name().to_string(),
            package: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// A package reference that is absent from (or retake-able in) its public registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlaggedPackage {
    /// Ecosystem name ("npm", "pip", ...).
    pub name: String,
    /// Package identifier.
    pub package: String,
    /// Declared version or constraint.
    pub version: String,
}

/// Result of scanning a single manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Path of the manifest that was scanned.
    pub file: String,
    /// Confusable packages found in the manifest.
    pub flagged: Vec<FlaggedPackage>,
    /// Scan duration in seconds.
    pub duration_secs: f64,
    /// Errors that kept the manifest from being scanned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Identity data exfiltrated by a decoy package and reassembled from DNS queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExfiltratedRecord {
    pub hostname: String,
    pub username: String,
    pub working_directory: String,
    pub package_name: String,
    pub source_ip: String,
    pub timestamp: DateTime<Utc>,
}

/// Configuration for HTTP requests against public registries.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (compatible; depconf/0.1)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_uses_ecosystem_name() {
        let reference = PackageReference::new(Ecosystem::Mvn, "com.acme/core", "1.0");
        let flagged = reference.flag();
        assert_eq!(flagged.name, "mvn");
        assert_eq!(flagged.package, "com.acme/core");
        assert_eq!(flagged.version, "1.0");
    }

    #[test]
    fn test_flagged_package_json_shape() {
        let flagged = PackageReference::new(Ecosystem::Npm, "left-pad", "1.0.0").flag();
        let json = serde_json::to_value(&flagged).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "npm", "package": "left-pad", "version": "1.0.0"})
        );
    }
}
