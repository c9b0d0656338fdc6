//! Manifest resolvers.
//!
//! A resolver parses one manifest format into [`PackageReference`]s and then
//! decides, through the shared [`Prober`], which of them could be registered
//! by an attacker in the ecosystem's public registry. The [`Dispatcher`] picks
//! the resolver for a file name from a fixed lookup table.

pub mod composer;
pub mod docker;
pub mod maven;
pub mod node;
pub mod nuget;
pub mod python;
pub mod ruby;

use crate::registry::Prober;
use crate::types::{DepconfError, Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Capability shared by every ecosystem resolver.
#[async_trait]
pub trait PackageResolver: Send + Sync {
    /// Parse manifest bytes into references held by the resolver.
    ///
    /// Text formats tolerate partial input and keep whatever they could read;
    /// structured formats that cannot be decoded return
    /// [`DepconfError::StructuralParse`] or the underlying decoder error.
    fn read_references(&mut self, raw: &[u8]) -> Result<()>;

    /// References read so far, in manifest order.
    fn references(&self) -> &[PackageReference];

    /// Probe every registry-resolvable reference and return the confusable ones.
    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage>;
}

/// Ordered reference list with optional first-seen-wins de-duplication.
#[derive(Debug, Clone)]
pub(crate) struct ReferenceList {
    ecosystem: Ecosystem,
    references: Vec<PackageReference>,
    seen: HashSet<String>,
}

impl ReferenceList {
    pub(crate) fn new(ecosystem: Ecosystem) -> Self {
        Self {
            ecosystem,
            references: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append unconditionally.
    pub(crate) fn push(&mut self, name: &str, version: &str) {
        self.seen.insert(name.to_string());
        self.references
            .push(PackageReference::new(self.ecosystem, name, version));
    }

    /// Append unless `name` was already recorded. Returns whether it was added.
    pub(crate) fn push_unique(&mut self, name: &str, version: &str) -> bool {
        if !self.seen.insert(name.to_string()) {
            return false;
        }
        self.references
            .push(PackageReference::new(self.ecosystem, name, version));
        true
    }

    pub(crate) fn as_slice(&self) -> &[PackageReference] {
        &self.references
    }
}

/// Builds a fresh resolver for a manifest file name.
type Constructor = fn(&str) -> Box<dyn PackageResolver>;

/// Exact manifest file names.
const MANIFEST_NAMES: &[(&str, Constructor)] = &[
    ("package.json", node::NodeResolver::boxed),
    ("package-lock.json", node::NodeResolver::boxed),
    ("yarn.lock", node::NodeResolver::boxed),
    ("composer.json", composer::ComposerResolver::boxed),
    ("composer.lock", composer::ComposerResolver::boxed),
    ("installed.json", composer::ComposerResolver::boxed),
    ("requirements.txt", python::PythonResolver::boxed),
    ("requirements.in", python::PythonResolver::boxed),
    ("Pipfile", python::PythonResolver::boxed),
    ("pdm.lock", python::PythonResolver::boxed),
    ("pyproject.toml", python::PythonResolver::boxed),
    ("setup.cfg", python::PythonResolver::boxed),
    ("Gemfile", ruby::RubyResolver::boxed),
    ("Gemfile.lock", ruby::RubyResolver::boxed),
    ("pom.xml", maven::MavenResolver::boxed),
    ("build.gradle", maven::MavenResolver::boxed),
    ("packages.config", nuget::NugetResolver::boxed),
    ("Dockerfile", docker::DockerResolver::boxed),
];

/// Extension fallbacks, checked when no exact name matches.
const EXTENSIONS: &[(&str, Constructor)] = &[
    ("csproj", nuget::NugetResolver::boxed),
    ("fsproj", nuget::NugetResolver::boxed),
    ("vbproj", nuget::NugetResolver::boxed),
    ("js", node::NodeResolver::boxed),
    ("css", node::NodeResolver::boxed),
];

/// Last path segment of a file name or URL, without query string or fragment.
pub fn manifest_name(file_name: &str) -> &str {
    let without_query = file_name
        .split(['?', '#'])
        .next()
        .unwrap_or(file_name);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query)
}

fn extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty()).then_some(ext)
}

/// Look up and construct the resolver for a file name.
pub fn resolver_for(file_name: &str) -> Option<Box<dyn PackageResolver>> {
    let name = manifest_name(file_name);

    if let Some((_, constructor)) = MANIFEST_NAMES.iter().find(|(known, _)| *known == name) {
        return Some(constructor(name));
    }

    let ext = extension(name)?;
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, constructor)| constructor(name))
}

/// Whether a file name maps to any resolver.
pub fn is_supported(file_name: &str) -> bool {
    resolver_for(file_name).is_some()
}

/// Single entry point turning manifest bytes into flagged packages.
#[derive(Clone)]
pub struct Dispatcher {
    prober: Prober,
}

impl Dispatcher {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }

    /// Parse `raw` as `file_name` and return the references without probing.
    pub fn references(&self, file_name: &str, raw: &[u8]) -> Result<Vec<PackageReference>> {
        let mut resolver = resolver_for(file_name)
            .ok_or_else(|| DepconfError::UnsupportedManifest(file_name.to_string()))?;
        resolver.read_references(raw)?;
        Ok(resolver.references().to_vec())
    }

    /// Parse, classify and probe a manifest.
    ///
    /// Never fails: unknown file names and parse errors are logged and yield
    /// whatever could be evaluated (possibly nothing).
    pub async fn resolve(&self, file_name: &str, raw: &[u8]) -> Vec<FlaggedPackage> {
        self.evaluate(file_name, raw).await.flagged
    }

    /// Like [`Dispatcher::resolve`], also reporting why a manifest could not
    /// be read completely.
    pub async fn evaluate(&self, file_name: &str, raw: &[u8]) -> Resolution {
        let mut resolution = Resolution::default();
        let Some(mut resolver) = resolver_for(file_name) else {
            error!("Unknown package manager file: {}", file_name);
            resolution
                .errors
                .push(DepconfError::UnsupportedManifest(file_name.to_string()).to_string());
            return resolution;
        };

        if let Err(e) = resolver.read_references(raw) {
            error!(
                "Encountered an error while trying to read packages from {}: {}",
                file_name, e
            );
            resolution.errors.push(e.to_string());
        }
        debug!(
            "Read {} references from {}",
            resolver.references().len(),
            file_name
        );

        resolution.flagged = resolver.unavailable_references(&self.prober).await;
        if !resolution.flagged.is_empty() {
            info!("{}: {} confusable packages", file_name, resolution.flagged.len());
        }
        resolution
    }
}

/// Outcome of evaluating one manifest.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub flagged: Vec<FlaggedPackage>,
    /// Parse failures; `flagged` then covers only what was read.
    pub errors: Vec<String>,
}
