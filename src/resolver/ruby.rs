//! Ruby manifests: `Gemfile` and `Gemfile.lock`.

use crate::registry::{BodyCheck, ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Remote prefix of the public registry; only gems from here are probed.
const CANONICAL_REMOTE: &str = "https://rubygems.org";

/// Indentation of a transitive entry under `specs:` in a lock file.
const TRANSITIVE_INDENT: usize = 6;

/// Lock file keys that describe a source, not a gem.
const SOURCE_KEYS: &[&str] = &["revision:", "branch:", "tag:", "ref:", "glob:", "submodules:"];

static GEM_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^gem[\s(]+["']([^"']+)["'](.*)$"#).expect("gem call pattern is valid")
});

static GEM_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']([<>~=!]*\s*\d[^"']*)["']"#).expect("gem version pattern is valid")
});

static GEM_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#":?(path|git|github|source):?\s*(?:=>)?\s*["']([^"']+)["']"#)
        .expect("gem option pattern is valid")
});

/// Keywords that open a block closed by a bare `end`.
static KEYWORD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:if|unless|case|begin|def|while|until|class|module)\b")
        .expect("keyword block pattern is valid")
});

static SOURCE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^source[\s(]+["']([^"']+)["']\s*\)?\s*do\b"#)
        .expect("source block pattern is valid")
});

/// Where a gem is installed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemOrigin {
    /// `remote:` of the lock file section, or the Gemfile source/path/git option.
    pub remote: String,
    pub transitive: bool,
}

impl GemOrigin {
    pub fn is_local(&self) -> bool {
        !self.remote.starts_with("http")
    }

    pub fn is_canonical(&self) -> bool {
        self.remote.starts_with(CANONICAL_REMOTE)
    }

    /// Only non-local gems from the public registry can be confused.
    pub fn is_registry_checkable(&self) -> bool {
        !self.is_local() && self.is_canonical()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RubyManifest {
    Gemfile,
    Lockfile,
}

/// Resolver for the RubyGems ecosystem.
pub struct RubyResolver {
    manifest: RubyManifest,
    references: ReferenceList,
    /// Parallel to `references`.
    origins: Vec<GemOrigin>,
}

impl RubyResolver {
    pub fn new(file_name: &str) -> Self {
        let manifest = if file_name == "Gemfile" {
            RubyManifest::Gemfile
        } else {
            RubyManifest::Lockfile
        };

        Self {
            manifest,
            references: ReferenceList::new(Ecosystem::Gem),
            origins: Vec::new(),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }

    pub fn origins(&self) -> &[GemOrigin] {
        &self.origins
    }

    fn push(&mut self, name: &str, version: &str, origin: GemOrigin) {
        if self.references.push_unique(name, version) {
            self.origins.push(origin);
        }
    }

    fn read_gemfile(&mut self, content: &str) {
        // One entry per open block: the block's source, if it is a source block.
        let mut blocks: Vec<Option<String>> = Vec::new();

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = SOURCE_BLOCK.captures(line) {
                blocks.push(Some(caps[1].to_string()));
                continue;
            }
            if line == "end" {
                blocks.pop();
                continue;
            }
            let one_line = line.ends_with(" end") || line.ends_with(";end");
            if KEYWORD_BLOCK.is_match(line) && !one_line {
                blocks.push(None);
                continue;
            }
            if line.ends_with(" do") || line.contains(" do |") {
                blocks.push(None);
                continue;
            }

            let Some(caps) = GEM_CALL.captures(line) else {
                continue;
            };
            let name = caps[1].trim();
            let rest = &caps[2];

            let version = GEM_VERSION
                .captures_iter(rest)
                .take(2)
                .map(|c| c[1].trim().to_string())
                .collect::<Vec<_>>()
                .join(" ");

            let mut remote = blocks
                .iter()
                .rev()
                .find_map(|b| b.clone())
                .unwrap_or_else(|| CANONICAL_REMOTE.to_string());
            for option in GEM_OPTION.captures_iter(rest) {
                let value = &option[2];
                remote = match &option[1] {
                    "github" => format!("https://github.com/{}", value),
                    _ => value.to_string(),
                };
            }

            self.push(
                name,
                &version,
                GemOrigin {
                    remote,
                    transitive: false,
                },
            );
        }
    }

    fn read_lockfile(&mut self, content: &str) {
        let mut remote = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            match trimmed {
                "" | "specs:" => continue,
                "GIT" | "GEM" | "PATH" | "PLUGIN SOURCE" => {
                    remote.clear();
                    continue;
                }
                "PLATFORMS" | "DEPENDENCIES" => break,
                _ => {}
            }

            if let Some(value) = trimmed.strip_prefix("remote:") {
                remote = value.trim().to_string();
                continue;
            }

            let (name, version) = match trimmed.split_once(' ') {
                Some((name, rest)) => (name, rest.trim().trim_start_matches('(').trim_end_matches(')')),
                None => (trimmed, ""),
            };
            if SOURCE_KEYS.contains(&name) {
                continue;
            }

            let indent = line.len() - line.trim_start_matches(' ').len();
            self.push(
                name,
                version,
                GemOrigin {
                    remote: remote.clone(),
                    transitive: indent == TRANSITIVE_INDENT,
                },
            );
        }
    }
}

#[async_trait]
impl PackageResolver for RubyResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        let content = String::from_utf8_lossy(raw);
        match self.manifest {
            RubyManifest::Gemfile => self.read_gemfile(&content),
            RubyManifest::Lockfile => self.read_lockfile(&content),
        }
        Ok(())
    }

    fn references(&self) -> &[PackageReference] {
        self.references.as_slice()
    }

    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage> {
        let mut flagged = Vec::new();

        for (reference, origin) in self.references().iter().zip(&self.origins) {
            if !origin.is_registry_checkable() {
                debug!("Skipping {} from {}", reference.name, origin.remote);
                continue;
            }
            if origin.transitive {
                debug!("{} is a transitive dependency", reference.name);
            }

            // A 200 that is not JSON is a rubygems.org error page.
            let url = prober.endpoints().rubygems_gem(&reference.name);
            if !prober
                .is_public(&ProbeRequest::new(url).check(BodyCheck::Json))
                .await
            {
                flagged.push(reference.flag());
            }
        }

        flagged
    }
}
