//! depconf - Dependency confusion scanner for package manifests.
//!
//! This library provides tools for detecting dependency confusion exposure by:
//! - Parsing manifests of eight ecosystems (npm, Composer, PyPI, RubyGems,
//!   Maven/Gradle, NuGet, Docker Hub, and raw JS/CSS bundles)
//! - Checking every reference against its public registry, with bounded
//!   retries on throttling
//! - Listening for DNS callbacks from decoy packages to confirm installs
//!
//! # Example
//!
//! ```no_run
//! use depconf::registry::{HttpRegistryClient, Prober, RegistryEndpoints, RetryPolicy};
//! use depconf::resolver::Dispatcher;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = HttpRegistryClient::new(&Default::default()).unwrap();
//!     let prober = Prober::new(Arc::new(client), RetryPolicy::default(), RegistryEndpoints::default());
//!     let flagged = Dispatcher::new(prober)
//!         .resolve("package.json", br#"{"dependencies":{"left-pad":"1.0.0"}}"#)
//!         .await;
//!     println!("Found {} confusable packages", flagged.len());
//! }
//! ```

pub mod config;
pub mod exfil;
pub mod notify;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod types;

pub use config::{Commands, Config, ConfirmationsConfig, FileConfig, ListenConfig, ScanConfig};
pub use resolver::{Dispatcher, PackageResolver, Resolution};
pub use scanner::Scanner;
pub use types::{
    DepconfError, Ecosystem, ExfiltratedRecord, FlaggedPackage, PackageReference, Result,
    ScanResult,
};
