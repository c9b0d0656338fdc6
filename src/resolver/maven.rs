//! Java manifests: Maven `pom.xml` and Gradle `build.gradle`.

use crate::registry::{BodyCheck, ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

static GRADLE_DEPENDENCY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"dependencies\s*\{\s*([\s\S]*?)\s*\}").expect("gradle block pattern is valid")
});

static GRADLE_COORDINATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]([\w\-.]+):([\w\-.]+):([\w\-.$]+)"#).expect("gradle coordinate pattern is valid")
});

static GRADLE_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]([\w\-.]+):([\w\-.]+)['"]"#).expect("gradle module pattern is valid")
});

#[derive(Debug, Default, Deserialize)]
struct Project {
    #[serde(default)]
    dependencies: Dependencies,
    #[serde(default, rename = "dependencyManagement")]
    dependency_management: DependencyManagement,
    #[serde(default)]
    build: Build,
    #[serde(default)]
    profiles: Profiles,
}

#[derive(Debug, Default, Deserialize)]
struct Dependencies {
    #[serde(default)]
    dependency: Vec<Artifact>,
}

#[derive(Debug, Default, Deserialize)]
struct DependencyManagement {
    #[serde(default)]
    dependencies: Dependencies,
}

#[derive(Debug, Default, Deserialize)]
struct Build {
    #[serde(default)]
    plugins: Plugins,
}

#[derive(Debug, Default, Deserialize)]
struct Plugins {
    #[serde(default)]
    plugin: Vec<Artifact>,
}

#[derive(Debug, Default, Deserialize)]
struct Profiles {
    #[serde(default)]
    profile: Vec<Profile>,
}

#[derive(Debug, Default, Deserialize)]
struct Profile {
    #[serde(default)]
    build: Build,
}

#[derive(Debug, Default, Deserialize)]
struct Artifact {
    #[serde(default, rename = "groupId")]
    group_id: String,
    #[serde(default, rename = "artifactId")]
    artifact_id: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JavaManifest {
    Pom,
    Gradle,
}

/// Package identifier for a coordinate: `group/artifact`.
fn coordinate(group: &str, artifact: &str) -> String {
    format!("{}/{}", group.trim(), artifact.trim())
}

/// Resolver for Maven Central.
pub struct MavenResolver {
    manifest: JavaManifest,
    references: ReferenceList,
}

impl MavenResolver {
    pub fn new(file_name: &str) -> Self {
        let manifest = if file_name == "pom.xml" {
            JavaManifest::Pom
        } else {
            JavaManifest::Gradle
        };

        Self {
            manifest,
            references: ReferenceList::new(Ecosystem::Mvn),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }

    fn read_pom(&mut self, raw: &[u8]) -> Result<()> {
        let project: Project = quick_xml::de::from_str(&String::from_utf8_lossy(raw))?;

        let profile_plugins = project
            .profiles
            .profile
            .iter()
            .flat_map(|profile| profile.build.plugins.plugin.iter());
        let artifacts = project
            .dependencies
            .dependency
            .iter()
            .chain(project.dependency_management.dependencies.dependency.iter())
            .chain(project.build.plugins.plugin.iter())
            .chain(profile_plugins);

        for artifact in artifacts {
            self.references.push_unique(
                &coordinate(&artifact.group_id, &artifact.artifact_id),
                artifact.version.trim(),
            );
        }
        Ok(())
    }

    fn read_gradle(&mut self, raw: &[u8]) {
        let content = String::from_utf8_lossy(raw);

        for block in GRADLE_DEPENDENCY_BLOCK.captures_iter(&content) {
            let body = &block[1];

            for caps in GRADLE_COORDINATE.captures_iter(body) {
                let version = if caps[3].contains('$') { "" } else { &caps[3] };
                self.references
                    .push_unique(&coordinate(&caps[1], &caps[2]), version);
            }
            // Version-less modules, e.g. when a platform/BOM pins them.
            for caps in GRADLE_MODULE.captures_iter(body) {
                self.references.push_unique(&coordinate(&caps[1], &caps[2]), "");
            }
        }
    }
}

#[async_trait]
impl PackageResolver for MavenResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        match self.manifest {
            JavaManifest::Pom => self.read_pom(raw),
            JavaManifest::Gradle => {
                self.read_gradle(raw);
                Ok(())
            }
        }
    }

    fn references(&self) -> &[PackageReference] {
        self.references.as_slice()
    }

    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage> {
        let mut flagged = Vec::new();

        for reference in self.references() {
            let group = reference
                .name
                .split_once('/')
                .map(|(group, _)| group)
                .unwrap_or_default();
            // Inherited from the parent POM; nothing to look up.
            if group.is_empty() {
                debug!("Skipping {} without a group", reference.name);
                continue;
            }

            let url = prober.endpoints().maven_group(group);
            let request = ProbeRequest::new(url).check(BodyCheck::NpmUnpublished);
            if !prober.is_public(&request).await {
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

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <dependencies>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
      <version>2.0.9</version>
    </dependency>
    <!-- internal -->
    <dependency>
      <groupId>com.acme.platform</groupId>
      <artifactId>auth-client</artifactId>
      <version>${acme.version}</version>
      <exclusions>
        <exclusion><groupId>x</groupId><artifactId>y</artifactId></exclusion>
      </exclusions>
    </dependency>
  </dependencies>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>com.acme.platform</groupId>
        <artifactId>acme-bom</artifactId>
        <version>3.1.0</version>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <build>
    <plugins>
      <plugin>
        <artifactId>maven-compiler-plugin</artifactId>
        <version>3.11.0</version>
      </plugin>
    </plugins>
  </build>
  <profiles>
    <profile>
      <id>release</id>
      <build>
        <plugins>
          <plugin>
            <groupId>com.acme.build</groupId>
            <artifactId>signer-plugin</artifactId>
            <version>1.0</version>
          </plugin>
        </plugins>
      </build>
    </profile>
  </profiles>
</project>
"#;

    fn read(file_name: &str, content: &str) -> Vec<(String, String)> {
        let mut resolver = MavenResolver::new(file_name);
        resolver.read_references(content.as_bytes()).unwrap();
        resolver
            .references()
            .iter()
            .map(|r| (r.name.clone(), r.version.clone()))
            .collect()
    }

    fn pair(name: &str, version: &str) -> (String, String) {
        (name.to_string(), version.to_string())
    }

    #[test]
    fn test_pom_all_sections() {
        assert_eq!(
            read("pom.xml", POM),
            vec![
                pair("org.slf4j/slf4j-api", "2.0.9"),
                pair("com.acme.platform/auth-client", "${acme.version}"),
                pair("com.acme.platform/acme-bom", "3.1.0"),
                pair("/maven-compiler-plugin", "3.11.0"),
                pair("com.acme.build/signer-plugin", "1.0"),
            ]
        );
    }

    #[test]
    fn test_pom_malformed_is_error() {
        let mut resolver = MavenResolver::new("pom.xml");
        assert!(resolver
            .read_references(b"<project><dependencies></project>")
            .is_err());
    }

    #[test]
    fn test_gradle_blocks() {
        let refs = read(
            "build.gradle",
            r#"
plugins {
    id 'java'
}

dependencies {
    implementation 'com.google.guava:guava:32.1.2-jre'
    implementation "com.acme:payments-sdk:$paymentsVersion"
    implementation platform('com.acme:acme-bom:2.0.0')
    implementation 'com.acme:ledger'
    testImplementation 'junit:junit:4.13.2'
}

buildscript {
    dependencies {
        classpath 'com.acme.gradle:publish-plugin:0.4'
    }
}
"#,
        );

        assert_eq!(
            refs,
            vec![
                pair("com.google.guava/guava", "32.1.2-jre"),
                pair("com.acme/payments-sdk", ""),
                pair("com.acme/acme-bom", "2.0.0"),
                pair("junit/junit", "4.13.2"),
                pair("com.acme/ledger", ""),
                pair("com.acme.gradle/publish-plugin", "0.4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_groups_are_probed() {
        let mut resolver = MavenResolver::new("pom.xml");
        resolver.read_references(POM.as_bytes()).unwrap();
        let client = Arc::new(
            ScriptedClient::new()
                .route("http://registry.test/org/slf4j/", 200, "<html>index</html>")
                .route("http://registry.test/com/acme/build/", 200, "<html>index</html>"),
        );
        let prober = Prober::new(
            client.clone(),
            RetryPolicy {
                max_retries: 3,
                delay: Duration::ZERO,
            },
            RegistryEndpoints::all_at("http://registry.test"),
        );

        let flagged = resolver.unavailable_references(&prober).await;

        let packages: Vec<_> = flagged.iter().map(|f| f.package.as_str()).collect();
        assert_eq!(
            packages,
            vec!["com.acme.platform/auth-client", "com.acme.platform/acme-bom"]
        );
        // The group-less compiler plugin is never probed.
        assert_eq!(client.total_calls(), 4);
    }
}
