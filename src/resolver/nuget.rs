//! .NET manifests: `packages.config` and SDK-style project files
//! (`.csproj`, `.fsproj`, `.vbproj`).

use crate::registry::{ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct PackagesConfig {
    #[serde(default)]
    package: Vec<ConfigPackage>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPackage {
    #[serde(default, rename = "@id")]
    id: String,
    #[serde(default, rename = "@version")]
    version: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(default, rename = "ItemGroup")]
    item_groups: Vec<ItemGroup>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemGroup {
    #[serde(default, rename = "PackageReference")]
    package_references: Vec<ProjectPackageReference>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectPackageReference {
    #[serde(default, rename = "@Include")]
    include: String,
    #[serde(default, rename = "@Version")]
    version_attribute: String,
    #[serde(default, rename = "Version")]
    version_element: Option<String>,
}

impl ProjectPackageReference {
    fn version(&self) -> &str {
        match self.version_element.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => version,
            _ => self.version_attribute.trim(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NugetManifest {
    PackagesConfig,
    Project,
}

/// Resolver for nuget.org.
pub struct NugetResolver {
    manifest: NugetManifest,
    references: ReferenceList,
}

impl NugetResolver {
    pub fn new(file_name: &str) -> Self {
        let manifest = if file_name == "packages.config" {
            NugetManifest::PackagesConfig
        } else {
            NugetManifest::Project
        };

        Self {
            manifest,
            references: ReferenceList::new(Ecosystem::Nuget),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }

    fn read_packages_config(&mut self, content: &str) -> Result<()> {
        let config: PackagesConfig = quick_xml::de::from_str(content)?;
        for package in config.package {
            let id = package.id.trim();
            if !id.is_empty() {
                self.references.push_unique(id, package.version.trim());
            }
        }
        Ok(())
    }

    fn read_project(&mut self, content: &str) -> Result<()> {
        let project: ProjectFile = quick_xml::de::from_str(content)?;
        for reference in project
            .item_groups
            .iter()
            .flat_map(|group| group.package_references.iter())
        {
            let id = reference.include.trim();
            if id.is_empty() {
                continue;
            }
            // Relative paths point at local projects, not feed packages.
            if id.contains("..") {
                debug!("Skipping path reference {}", id);
                continue;
            }
            self.references.push_unique(id, reference.version());
        }
        Ok(())
    }
}

#[async_trait]
impl PackageResolver for NugetResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        let content = String::from_utf8_lossy(raw);
        match self.manifest {
            NugetManifest::PackagesConfig => self.read_packages_config(&content),
            NugetManifest::Project => self.read_project(&content),
        }
    }

    fn references(&self) -> &[PackageReference] {
        self.references.as_slice()
    }

    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage> {
        let mut flagged = Vec::new();

        for reference in self.references() {
            let url = prober.endpoints().nuget_registration(&reference.name);
            if !prober.is_public(&ProbeRequest::new(url)).await {
                flagged.push(reference.flag());
            }
        }

        flagged
    }
}
