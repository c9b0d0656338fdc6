//! Public registry base URLs and the per-ecosystem probe URL templates.

use serde::Deserialize;

/// Base URLs of the public registries.
///
/// Defaults point at the real public hosts; the `[registries]` config
/// section can redirect any of them to a mirror.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryEndpoints {
    pub npm: String,
    pub pypi: String,
    pub packagist: String,
    pub maven: String,
    pub rubygems: String,
    pub nuget: String,
    pub docker_hub: String,
    pub github: String,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            npm: "https://registry.npmjs.org".to_string(),
            pypi: "https://pypi.org".to_string(),
            packagist: "https://packagist.org".to_string(),
            maven: "https://repo1.maven.org/maven2".to_string(),
            rubygems: "https://rubygems.org".to_string(),
            nuget: "https://api.nuget.org".to_string(),
            docker_hub: "https://hub.docker.com".to_string(),
            github: "https://github.com".to_string(),
        }
    }
}

impl RegistryEndpoints {
    /// Point every registry at one base URL (mirrors and local test servers).
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            npm: base.clone(),
            pypi: base.clone(),
            packagist: base.clone(),
            maven: base.clone(),
            rubygems: base.clone(),
            nuget: base.clone(),
            docker_hub: base.clone(),
            github: base,
        }
    }

    pub fn npm_package(&self, name: &str) -> String {
        format!("{}/{}", self.npm, urlencoding::encode(name))
    }

    pub fn pypi_project(&self, name: &str) -> String {
        format!("{}/project/{}/", self.pypi, name)
    }

    pub fn packagist_package(&self, name: &str) -> String {
        format!("{}/packages/{}", self.packagist, name)
    }

    /// Maven Central group directory, e.g. `com.acme` -> `.../com/acme/`.
    pub fn maven_group(&self, group: &str) -> String {
        format!("{}/{}/", self.maven, group.replace('.', "/"))
    }

    pub fn rubygems_gem(&self, name: &str) -> String {
        format!("{}/api/v1/gems/{}.json", self.rubygems, name)
    }

    pub fn nuget_registration(&self, id: &str) -> String {
        format!(
            "{}/v3/registration5-semver1/{}/index.json",
            self.nuget,
            id.to_lowercase()
        )
    }

    pub fn docker_repository(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/v2/namespaces/{}/repositories/{}",
            self.docker_hub,
            namespace.to_lowercase(),
            name.to_lowercase()
        )
    }

    pub fn github_owner(&self, owner: &str) -> String {
        format!("{}/{}", self.github, owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        let endpoints = RegistryEndpoints::default();
        assert_eq!(endpoints.npm_package("left-pad"), "https://registry.npmjs.org/left-pad");
        assert_eq!(
            endpoints.npm_package("@acme/utils"),
            "https://registry.npmjs.org/%40acme%2Futils"
        );
        assert_eq!(endpoints.pypi_project("requests"), "https://pypi.org/project/requests/");
        assert_eq!(
            endpoints.maven_group("com.acme.internal"),
            "https://repo1.maven.org/maven2/com/acme/internal/"
        );
        assert_eq!(
            endpoints.nuget_registration("Acme.Core"),
            "https://api.nuget.org/v3/registration5-semver1/acme.core/index.json"
        );
        assert_eq!(
            endpoints.docker_repository("MyOrg", "BaseImage"),
            "https://hub.docker.com/v2/namespaces/myorg/repositories/baseimage"
        );
    }

    #[test]
    fn test_all_at_strips_trailing_slash() {
        let endpoints = RegistryEndpoints::all_at("http://127.0.0.1:8080/");
        assert_eq!(endpoints.rubygems_gem("rails"), "http://127.0.0.1:8080/api/v1/gems/rails.json");
        assert_eq!(endpoints.github_owner("acme"), "http://127.0.0.1:8080/acme");
    }

    #[test]
    fn test_partial_toml_override() {
        let endpoints: RegistryEndpoints =
            toml::from_str(r#"npm = "https://npm.mirror.local""#).unwrap();
        assert_eq!(endpoints.npm, "https://npm.mirror.local");
        assert_eq!(endpoints.pypi, "https://pypi.org");
    }
}
