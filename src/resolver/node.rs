//! npm manifests: `package.json`, `package-lock.json`, `yarn.lock`, and
//! heuristic extraction from raw `.js` / `.css` bodies.

use crate::registry::{BodyCheck, ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Names that show up in `node_modules` paths but are never packages.
const BLACKLISTED_NAMES: &[&str] = &["node_modules", "favicon.ico"];

/// Longest name the npm registry accepts.
const MAX_NAME_LENGTH: usize = 214;

static YARN_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:@[\w.\-]+/)?[\w.\-]+@[\d^~><=.]+[ \t]*[\-\w. \t<=]*")
        .expect("yarn entry pattern is valid")
});

static JS_DEPENDENCY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)dependencies[a-z0-9_\-]*['"]:\{(?P<dep>.*?)\}"#)
        .expect("dependency block pattern is valid")
});

static JS_NAME_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"](.*)['"]:['"](.*)['"]"#).expect("name/version pattern is valid")
});

static NODE_MODULES_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/node_modules/(?P<dep>(?:@[a-z0-9_.\-]+/)?[a-z0-9_.\-]+)/")
        .expect("node_modules pattern is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s").expect("whitespace pattern is valid"));

/// Which npm-flavoured file is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeManifest {
    PackageJson,
    PackageLock,
    YarnLock,
    JavaScript,
    Stylesheet,
}

/// Where a version string actually points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReferenceKind {
    /// Resolved from the npm registry.
    Registry,
    /// `file:` reference to the local filesystem.
    LocalPath,
    /// Direct `http:` / `https:` tarball URL.
    DirectUrl,
    /// `git:`, `git+ssh:`, `git+http(s):` or `github:` remote.
    VcsRemote,
    /// `org/repo` shorthand resolved from GitHub.
    GitHubShorthand,
}

impl NodeReferenceKind {
    /// Classify a dependency's version string.
    pub fn classify(version: &str) -> Self {
        let lowered = version.to_lowercase();

        if lowered.starts_with("file:") {
            return NodeReferenceKind::LocalPath;
        }
        if lowered.starts_with("http:") || lowered.starts_with("https:") {
            return NodeReferenceKind::DirectUrl;
        }
        const VCS_PREFIXES: &[&str] = &["git+ssh:", "git+http:", "git+https:", "git:", "github:"];
        if VCS_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
            return NodeReferenceKind::VcsRemote;
        }
        if !version.starts_with('@') && version.contains('/') {
            return NodeReferenceKind::GitHubShorthand;
        }

        NodeReferenceKind::Registry
    }
}

/// Owner part of a GitHub shorthand version (`org/repo`, `prefix:org/repo`).
fn github_owner(version: &str) -> Option<&str> {
    let mut owner = version.split('/').next().unwrap_or_default();
    let parts: Vec<&str> = owner.split(':').collect();
    if parts.len() > 2 {
        owner = parts[1];
    }
    (!owner.is_empty()).then_some(owner)
}

/// Mirror of the npm registry naming rule.
pub fn is_name_valid(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    if name.starts_with('.') || name.starts_with('_') {
        return false;
    }
    if name.to_lowercase() != name || name.trim() != name {
        return false;
    }
    if name.contains(|c| matches!(c, '~' | '\\' | '\'' | '!' | '(' | ')' | '*' | '"')) {
        return false;
    }
    !BLACKLISTED_NAMES.contains(&name)
}

/// Resolver for the npm ecosystem.
pub struct NodeResolver {
    manifest: NodeManifest,
    references: ReferenceList,
}

impl NodeResolver {
    pub fn new(file_name: &str) -> Self {
        let manifest = match file_name {
            "package.json" => NodeManifest::PackageJson,
            "package-lock.json" => NodeManifest::PackageLock,
            "yarn.lock" => NodeManifest::YarnLock,
            name if name.ends_with(".css") => NodeManifest::Stylesheet,
            _ => NodeManifest::JavaScript,
        };

        Self {
            manifest,
            references: ReferenceList::new(Ecosystem::Npm),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }

    fn read_package_json(&mut self, raw: &[u8]) {
        let data: Value = match serde_json::from_slice(raw) {
            Ok(data) => data,
            Err(e) => {
                warn!("Non-fatal issue encountered while parsing npm file: {}", e);
                return;
            }
        };

        for section in [
            "dependencies",
            "devDependencies",
            "peerDependencies",
            "optionalDependencies",
        ] {
            if let Some(deps) = data.get(section).and_then(Value::as_object) {
                for (name, version) in deps {
                    match version.as_str() {
                        Some(version) => self.references.push(name, version),
                        None => debug!("Skipping {} entry {} with non-string version", section, name),
                    }
                }
            }
        }

        for section in ["bundledDependencies", "bundleDependencies"] {
            if let Some(names) = data.get(section).and_then(Value::as_array) {
                for name in names.iter().filter_map(Value::as_str) {
                    self.references.push(name, "");
                }
            }
        }
    }

    fn read_package_lock(&mut self, raw: &[u8]) {
        let data: Value = match serde_json::from_slice(raw) {
            Ok(data) => data,
            Err(e) => {
                warn!("Non-fatal issue encountered while parsing package-lock.json: {}", e);
                return;
            }
        };

        let root = data.get("packages").and_then(|packages| packages.get(""));
        let section = |name: &str| {
            root.and_then(|root| root.get(name))
                .and_then(Value::as_object)
                .filter(|deps| !deps.is_empty())
        };
        let dependencies = section("dependencies");
        let dev_dependencies = section("devDependencies");

        if dependencies.is_none() && dev_dependencies.is_none() {
            // lockfileVersion 1: top-level map of name -> { version, ... }
            if let Some(deps) = data.get("dependencies").and_then(Value::as_object) {
                for (name, entry) in deps {
                    let version = entry.get("version").and_then(Value::as_str).unwrap_or_default();
                    self.references.push(name, version);
                }
            }
            return;
        }

        for deps in [dependencies, dev_dependencies].into_iter().flatten() {
            for (name, version) in deps {
                self.references.push(name, version.as_str().unwrap_or_default());
            }
        }
    }

    fn read_yarn_lock(&mut self, raw: &[u8]) {
        let content = String::from_utf8_lossy(raw);

        for entry in YARN_ENTRY.find_iter(&content) {
            let entry = entry.as_str();
            let Some(at) = entry.rfind('@') else {
                continue;
            };
            let name = &entry[..at];
            let version = entry[at + 1..].trim();
            if name.is_empty() {
                continue;
            }
            self.references.push_unique(name, version);
        }
    }

    /// `"dependencies": { "name": "version", ... }` blocks embedded in bundles.
    fn read_script_dependency_blocks(&mut self, compact: &str) {
        for block in JS_DEPENDENCY_BLOCK.captures_iter(compact) {
            let Some(list) = block.name("dep") else {
                continue;
            };
            for pair in list.as_str().split(',') {
                let Some(parsed) = JS_NAME_VERSION.captures(pair) else {
                    continue;
                };
                let name = &parsed[1];
                if is_name_valid(name) {
                    self.references.push_unique(name, &parsed[2]);
                }
            }
        }
    }

    /// `/node_modules/<name>/` path fragments in bundles and stylesheets.
    fn read_node_modules_paths(&mut self, compact: &str) {
        for path in NODE_MODULES_PATH.captures_iter(compact) {
            let name = &path["dep"];
            if is_name_valid(name) {
                self.references.push_unique(name, "");
            }
        }
    }

    async fn github_owner_exists(&self, version: &str, prober: &Prober) -> bool {
        match github_owner(version) {
            Some(owner) => {
                let url = prober.endpoints().github_owner(owner);
                prober.is_public(&ProbeRequest::new(url)).await
            }
            None => false,
        }
    }
}

#[async_trait]
impl PackageResolver for NodeResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        match self.manifest {
            NodeManifest::PackageJson => self.read_package_json(raw),
            NodeManifest::PackageLock => self.read_package_lock(raw),
            NodeManifest::YarnLock => self.read_yarn_lock(raw),
            NodeManifest::JavaScript => {
                let compact = WHITESPACE.replace_all(&String::from_utf8_lossy(raw), "").into_owned();
                self.read_script_dependency_blocks(&compact);
                self.read_node_modules_paths(&compact);
            }
            NodeManifest::Stylesheet => {
                let compact = WHITESPACE.replace_all(&String::from_utf8_lossy(raw), "").into_owned();
                self.read_node_modules_paths(&compact);
            }
        }
        Ok(())
    }

    fn references(&self) -> &[PackageReference] {
        self.references.as_slice()
    }

    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage> {
        let mut flagged = Vec::new();

        for reference in self.references() {
            match NodeReferenceKind::classify(&reference.version) {
                NodeReferenceKind::LocalPath
                | NodeReferenceKind::DirectUrl
                | NodeReferenceKind::VcsRemote => {
                    debug!("Skipping non-registry reference {}@{}", reference.name, reference.version);
                }
                NodeReferenceKind::GitHubShorthand => {
                    if !self.github_owner_exists(&reference.version, prober).await {
                        flagged.push(reference.flag());
                    }
                }
                NodeReferenceKind::Registry => {
                    let url = prober.endpoints().npm_package(&reference.name);
                    let request = ProbeRequest::new(url).check(BodyCheck::NpmUnpublished);
                    if !prober.is_public(&request).await {
                        flagged.push(reference.flag());
                    }
                }
            }
        }

        flagged
    }
}
