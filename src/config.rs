//! Command line and config file handling.

use crate::exfil::ListenerSettings;
use crate::registry::{RegistryEndpoints, RetryPolicy};
use crate::types::{DepconfError, HttpConfig, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dependency confusion scanner for package manifests.
#[derive(Parser, Debug, Clone)]
#[command(name = "depconf")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to <config dir>/depconf/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Telegram bot token for notifications
    #[arg(long, env = "DEPCONF_TELEGRAM_TOKEN", global = true)]
    pub telegram_token: Option<String>,

    /// Telegram chat ID for notifications
    #[arg(long, env = "DEPCONF_TELEGRAM_CHAT_ID", global = true)]
    pub telegram_chat_id: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Scan manifest files for dependency confusion
    Scan(ScanConfig),
    /// Run the DNS listener that records installs of decoy packages
    Listen(ListenConfig),
    /// List recorded confirmations
    Confirmations(ConfirmationsConfig),
}

/// Configuration for the scan command.
#[derive(Parser, Debug, Clone)]
pub struct ScanConfig {
    /// Manifest files to scan
    #[arg(required_unless_present = "file")]
    pub manifests: Vec<PathBuf>,

    /// File containing manifest paths to scan (one per line)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Maximum retries after a 429 response
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Seconds to wait after a 429 response
    #[arg(long, default_value = "10")]
    pub retry_delay: u64,

    /// Number of manifests to scan in parallel
    #[arg(long, short = 'p', default_value = "4")]
    pub parallel: usize,

    /// Quiet mode: only show output for manifests with findings
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Custom User-Agent string
    #[arg(long)]
    pub user_agent: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            manifests: Vec::new(),
            file: None,
            json: false,
            output: None,
            timeout: 30,
            max_retries: 3,
            retry_delay: 10,
            parallel: 4,
            quiet: false,
            user_agent: None,
        }
    }
}

impl ScanConfig {
    /// HTTP configuration for the registry client.
    pub fn http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            timeout_secs: self.timeout,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }

    /// Manifests from the command line plus those listed in `--file`.
    pub fn load_manifests(&self) -> Result<Vec<PathBuf>> {
        let mut manifests = self.manifests.clone();

        if let Some(ref file_path) = self.file {
            let content = std::fs::read_to_string(file_path)?;
            for line in content.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    manifests.push(PathBuf::from(trimmed));
                }
            }
        }

        Ok(manifests)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_secs(self.retry_delay),
        }
    }
}

/// Configuration for the listen command. Everything else comes from the
/// `[dns]` section of the config file.
#[derive(Parser, Debug, Clone, Default)]
pub struct ListenConfig {
    /// Override the listen address from the config file
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Send a Telegram message for every confirmation
    #[arg(long)]
    pub telegram: bool,
}

/// Configuration for the confirmations command.
#[derive(Parser, Debug, Clone, Default)]
pub struct ConfirmationsConfig {
    /// Output records as JSON
    #[arg(long)]
    pub json: bool,
}

/// Contents of the TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub dns: Option<DnsSection>,
    #[serde(default)]
    pub registries: RegistryEndpoints,
}

/// `[dns]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsSection {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default)]
    pub records: Vec<StaticRecord>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// JSON-lines file for confirmations; kept in memory when unset.
    #[serde(default)]
    pub store: Option<PathBuf>,
}

/// Extra A record served by the listener.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticRecord {
    pub hostname: String,
    pub ip: String,
}

fn default_session_ttl() -> u64 {
    600
}

fn parse_ip(field: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| DepconfError::ConfigError(format!("{} is not an IPv4 address: {}", field, value)))
}

impl DnsSection {
    /// Validate the section into listener settings.
    pub fn settings(&self) -> Result<ListenerSettings> {
        let domain = self.domain.trim().trim_end_matches('.').to_lowercase();
        if domain.is_empty() || self.public_ip.trim().is_empty() {
            return Err(DepconfError::ConfigError(
                "must supply a domain and public IP in the [dns] section".to_string(),
            ));
        }

        let public_ip = parse_ip("public_ip", &self.public_ip)?;
        let records = self
            .records
            .iter()
            .map(|record| Ok((record.hostname.clone(), parse_ip(&record.hostname, &record.ip)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(ListenerSettings {
            domain,
            public_ip,
            records,
            listen: self
                .listen
                .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 53))),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
        })
    }
}

impl FileConfig {
    /// Parse a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the given path, or the default location when it exists.
    /// A missing default file yields the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn dns(&self) -> Result<&DnsSection> {
        self.dns
            .as_ref()
            .ok_or_else(|| DepconfError::ConfigError("missing [dns] section".to_string()))
    }
}

/// `<config dir>/depconf/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("depconf").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[dns]
domain = "Confirm.Example.com."
public_ip = "203.0.113.10"
session_ttl_secs = 120
store = "/var/lib/depconf/confirmations.jsonl"

[[dns.records]]
hostname = "www.confirm.example.com"
ip = "203.0.113.11"

[registries]
npm = "https://npm.mirror.internal"
"#;

    #[test]
    fn test_parse_file_config() {
        let config: FileConfig = toml::from_str(CONFIG).unwrap();

        assert_eq!(config.registries.npm, "https://npm.mirror.internal");
        assert_eq!(config.registries.pypi, "https://pypi.org");

        let settings = config.dns().unwrap().settings().unwrap();
        assert_eq!(settings.domain, "confirm.example.com");
        assert_eq!(settings.public_ip, Ipv4Addr::new(203, 0, 113, 10));
        assert_eq!(settings.listen, "0.0.0.0:53".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.session_ttl, Duration::from_secs(120));
        assert_eq!(
            settings.records,
            vec![("www.confirm.example.com".to_string(), Ipv4Addr::new(203, 0, 113, 11))]
        );
    }

    #[test]
    fn test_missing_domain_is_error() {
        let config: FileConfig = toml::from_str("[dns]\npublic_ip = \"203.0.113.10\"\n").unwrap();
        assert!(matches!(
            config.dns().unwrap().settings(),
            Err(DepconfError::ConfigError(_))
        ));
    }

    #[test]
    fn test_bad_ip_is_error() {
        let config: FileConfig =
            toml::from_str("[dns]\ndomain = \"a.test\"\npublic_ip = \"not-an-ip\"\n").unwrap();
        assert!(config.dns().unwrap().settings().is_err());
    }

    #[test]
    fn test_missing_dns_section() {
        let config = FileConfig::default();
        assert!(config.dns().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = FileConfig::load_or_default(Some(&path)).unwrap();
        assert!(config.dns.is_some());
    }

    #[test]
    fn test_load_manifests_from_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("manifests.txt");
        std::fs::write(&list, "# repos\nsvc/package.json\n\n  api/pom.xml  \n").unwrap();

        let scan = ScanConfig {
            manifests: vec![PathBuf::from("Dockerfile")],
            file: Some(list),
            ..ScanConfig::default()
        };

        assert_eq!(
            scan.load_manifests().unwrap(),
            vec![
                PathBuf::from("Dockerfile"),
                PathBuf::from("svc/package.json"),
                PathBuf::from("api/pom.xml"),
            ]
        );
    }

    #[test]
    fn test_scan_defaults() {
        let scan = ScanConfig::default();
        assert_eq!(scan.retry_policy(), RetryPolicy::default());
        assert_eq!(scan.http_config().timeout_secs, 30);
    }
}
