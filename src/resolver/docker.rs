//! `Dockerfile` base images hosted under a Docker Hub namespace.

use crate::registry::{ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static FROM_INSTRUCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*FROM\s+(?:--platform=\S*\s+)?(\S+)").expect("FROM pattern is valid")
});

/// Split an image token into `(namespace, name, version)`.
///
/// Only `namespace/name[:tag]` images are returned: official images have no
/// namespace to claim, and three-part names live on other registries.
pub fn parse_image(image: &str) -> Option<(String, String, String)> {
    if image.contains('$') {
        return None;
    }
    let image = image.split('@').next().unwrap_or(image);
    let (namespace, rest) = image.split_once('/')?;
    if rest.contains('/') || namespace.is_empty() {
        return None;
    }

    let (name, version) = match rest.split_once(':') {
        None => (rest, "latest"),
        Some((name, "")) => (name, "[unknown]"),
        Some((name, tag)) => (name, tag),
    };
    if name.is_empty() {
        return None;
    }

    Some((namespace.to_string(), name.to_string(), version.to_string()))
}

/// Resolver for Docker Hub.
pub struct DockerResolver {
    references: ReferenceList,
}

impl DockerResolver {
    pub fn new(_file_name: &str) -> Self {
        Self {
            references: ReferenceList::new(Ecosystem::Docker),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }
}

#[async_trait]
impl PackageResolver for DockerResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        let content = String::from_utf8_lossy(raw);

        for caps in FROM_INSTRUCTION.captures_iter(&content) {
            let image = &caps[1];
            match parse_image(image) {
                Some((namespace, name, version)) => {
                    self.references
                        .push_unique(&format!("{}/{}", namespace, name), &version);
                }
                None => debug!("Skipping base image {}", image),
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
            let Some((namespace, name)) = reference.name.split_once('/') else {
                continue;
            };
            let url = prober.endpoints().docker_repository(namespace, name);
            if !prober.is_public(&ProbeRequest::new(url)).await {
                flagged.push(reference.flag());
            }
        }

        flagged
    }
}
