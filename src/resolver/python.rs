//! Python manifests: requirements files, `Pipfile`, `pdm.lock`,
//! `pyproject.toml` and `setup.cfg`.

use crate::registry::{ProbeRequest, Prober};
use crate::resolver::{PackageResolver, ReferenceList};
use crate::types::{DepconfError, Ecosystem, FlaggedPackage, PackageReference, Result};
use async_trait::async_trait;
use configparser::ini::Ini;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use toml::Value;
use tracing::debug;

static VERSION_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[><=~!]+\s*\d+[\w.\-]*").expect("version clause pattern is valid")
});

/// Characters that end the distribution name in a requirement specifier.
const NAME_DELIMITERS: &[char] = &['=', '<', '>', '!', ' ', '~', '#', '[', ';'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PythonManifest {
    Requirements,
    Pipfile,
    PdmLock,
    PyProject,
    SetupCfg,
}

/// Split a PEP 508 style specifier into its name and joined version clauses.
///
/// Returns `None` for blank input.
pub fn split_requirement(spec: &str) -> Option<(String, String)> {
    let spec = spec.split('#').next().unwrap_or_default().trim();
    let name = spec
        .split(NAME_DELIMITERS)
        .find(|field| !field.is_empty())?
        .trim();
    if name.is_empty() {
        return None;
    }

    // Environment markers carry comparisons that are not version constraints.
    let constraint = spec.split(';').next().unwrap_or_default();
    let version = VERSION_CLAUSE
        .find_iter(constraint)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Some((name.to_string(), version))
}

/// Names pip resolves from somewhere other than PyPI.
fn is_skipped(name: &str) -> bool {
    name == "python" || name.trim() == "." || name.contains("//github.com")
}

/// Version of a table entry: a plain string, or a table with a `version` key.
fn entry_version(value: &Value) -> String {
    match value {
        Value::String(version) => version.clone(),
        Value::Table(table) => table
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| node.get(key))
}

/// Resolver for the Python ecosystem.
pub struct PythonResolver {
    manifest: PythonManifest,
    references: ReferenceList,
}

impl PythonResolver {
    pub fn new(file_name: &str) -> Self {
        let manifest = match file_name {
            "Pipfile" => PythonManifest::Pipfile,
            "pdm.lock" => PythonManifest::PdmLock,
            "pyproject.toml" => PythonManifest::PyProject,
            "setup.cfg" => PythonManifest::SetupCfg,
            _ => PythonManifest::Requirements,
        };

        Self {
            manifest,
            references: ReferenceList::new(Ecosystem::Pip),
        }
    }

    pub fn boxed(file_name: &str) -> Box<dyn PackageResolver> {
        Box::new(Self::new(file_name))
    }

    fn push_specifier(&mut self, spec: &str) {
        if let Some((name, version)) = split_requirement(spec) {
            self.references.push_unique(&name, &version);
        }
    }

    fn push_table(&mut self, table: Option<&Value>) {
        let Some(table) = table.and_then(Value::as_table) else {
            return;
        };
        for (name, value) in table {
            match value {
                // Poetry's multiple-constraint form: one reference per table.
                Value::Array(entries) => {
                    for entry in entries.iter().filter(|e| e.is_table()) {
                        self.references.push(name, &entry_version(entry));
                    }
                }
                _ => {
                    self.references.push_unique(name, &entry_version(value));
                }
            }
        }
    }

    fn read_requirements(&mut self, raw: &[u8]) {
        let content = String::from_utf8_lossy(raw);
        let mut logical = String::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(head) = line.strip_suffix('\\') {
                logical.push_str(head);
                continue;
            }
            logical.push_str(line);

            // -r, -e, --index-url and friends are pip options, not packages.
            if logical.starts_with('-') {
                debug!("Skipping pip option line: {}", logical);
            } else {
                let spec = std::mem::take(&mut logical);
                self.push_specifier(&spec);
            }
            logical.clear();
        }
    }

    fn read_pipfile(&mut self, raw: &[u8]) -> Result<()> {
        let root: Value = toml::from_str(&String::from_utf8_lossy(raw))?;
        self.push_table(root.get("packages"));
        self.push_table(root.get("dev-packages"));
        Ok(())
    }

    fn read_pdm_lock(&mut self, raw: &[u8]) -> Result<()> {
        let root: Value = toml::from_str(&String::from_utf8_lossy(raw))?;
        let packages = root
            .get("package")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for package in packages {
            let Some(name) = package.get("name").and_then(Value::as_str) else {
                continue;
            };
            let version = package
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.references.push_unique(name, version);
        }
        Ok(())
    }

    fn read_pyproject(&mut self, raw: &[u8]) -> Result<()> {
        let root: Value = toml::from_str(&String::from_utf8_lossy(raw))?;

        let mut specifiers: Vec<String> = Vec::new();
        if let Some(deps) = lookup(&root, &["project", "dependencies"]).and_then(Value::as_array) {
            specifiers.extend(deps.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if let Some(extras) =
            lookup(&root, &["project", "optional-dependencies"]).and_then(Value::as_table)
        {
            for deps in extras.values().filter_map(Value::as_array) {
                specifiers.extend(deps.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
        for spec in &specifiers {
            self.push_specifier(spec);
        }

        self.push_table(lookup(&root, &["tool", "poetry", "dependencies"]));
        self.push_table(lookup(&root, &["tool", "poetry", "dev-dependencies"]));
        if let Some(groups) = lookup(&root, &["tool", "poetry", "group"]).and_then(Value::as_table) {
            for group in groups.values() {
                self.push_table(group.get("dependencies"));
            }
        }
        Ok(())
    }

    fn read_setup_cfg(&mut self, raw: &[u8]) -> Result<()> {
        let mut config = Ini::new();
        config.set_multiline(true);
        let sections = config
            .read(String::from_utf8_lossy(raw).into_owned())
            .map_err(|reason| DepconfError::StructuralParse {
                file: "setup.cfg".to_string(),
                reason,
            })?;

        let mut values: Vec<&str> = Vec::new();
        if let Some(install) = sections
            .get("options")
            .and_then(|options| options.get("install_requires"))
            .and_then(Option::as_deref)
        {
            values.push(install);
        }
        if let Some(extras) = sections.get("options.extras_require") {
            let extras: BTreeMap<_, _> = extras.iter().collect();
            values.extend(extras.into_values().filter_map(Option::as_deref));
        }

        let specifiers: Vec<String> = values
            .iter()
            .flat_map(|value| value.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        for spec in &specifiers {
            self.push_specifier(spec);
        }
        Ok(())
    }
}

#[async_trait]
impl PackageResolver for PythonResolver {
    fn read_references(&mut self, raw: &[u8]) -> Result<()> {
        match self.manifest {
            PythonManifest::Requirements => {
                self.read_requirements(raw);
                Ok(())
            }
            PythonManifest::Pipfile => self.read_pipfile(raw),
            PythonManifest::PdmLock => self.read_pdm_lock(raw),
            PythonManifest::PyProject => self.read_pyproject(raw),
            PythonManifest::SetupCfg => self.read_setup_cfg(raw),
        }
    }

    fn references(&self) -> &[PackageReference] {
        self.references.as_slice()
    }

    async fn unavailable_references(&self, prober: &Prober) -> Vec<FlaggedPackage> {
        let mut flagged = Vec::new();

        for reference in self.references() {
            if is_skipped(&reference.name) {
                continue;
            }
            let url = prober.endpoints().pypi_project(&reference.name);
            if !prober.is_public(&ProbeRequest::new(url)).await {
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

    fn read(file_name: &str, content: &str) -> Vec<(String, String)> {
        let mut resolver = PythonResolver::new(file_name);
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
    fn test_split_requirement() {
        assert_eq!(
            split_requirement("requests>=2.20,<3"),
            Some(pair("requests", ">=2.20 <3"))
        );
        assert_eq!(
            split_requirement("uvicorn[standard] ~= 0.23.1"),
            Some(pair("uvicorn", "~= 0.23.1"))
        );
        assert_eq!(
            split_requirement("pywin32 ; sys_platform == 'win32'"),
            Some(pair("pywin32", ""))
        );
        assert_eq!(split_requirement("   "), None);
    }

    #[test]
    fn test_requirements_txt() {
        let refs = read(
            "requirements.txt",
            "# pinned\n\
             flask==2.3.2  # web\n\
             -r base.txt\n\
             --index-url https://pypi.internal/simple\n\
             internal-sdk \\\n    >=1.4\n\
             \n\
             numpy\n",
        );

        assert_eq!(
            refs,
            vec![
                pair("flask", "==2.3.2"),
                pair("internal-sdk", ">=1.4"),
                pair("numpy", ""),
            ]
        );
    }

    #[test]
    fn test_pipfile() {
        let refs = read(
            "Pipfile",
            r#"
[[source]]
url = "https://pypi.org/simple"

[packages]
requests = "*"
acme-core = {version = ">=1.0", index = "internal"}
local-tool = {path = "./tools"}

[dev-packages]
pytest = "==7.4"
"#,
        );

        assert_eq!(
            refs,
            vec![
                pair("requests", "*"),
                pair("acme-core", ">=1.0"),
                pair("local-tool", ""),
                pair("pytest", "==7.4"),
            ]
        );
    }

    #[test]
    fn test_pdm_lock() {
        let refs = read(
            "pdm.lock",
            r#"
[metadata]
groups = ["default"]

[[package]]
name = "certifi"
version = "2023.7.22"

[[package]]
name = "acme-internal"
version = "0.3.0"
"#,
        );

        assert_eq!(
            refs,
            vec![pair("certifi", "2023.7.22"), pair("acme-internal", "0.3.0")]
        );
    }

    #[test]
    fn test_pyproject_all_tables() {
        let refs = read(
            "pyproject.toml",
            r#"
[project]
name = "svc"
dependencies = ["httpx>=0.24", "acme-auth"]

[project.optional-dependencies]
docs = ["mkdocs==1.5.2"]

[tool.poetry.dependencies]
python = "^3.11"
pydantic = {version = "^2.0", extras = ["email"]}
numpy = [
    {version = "<1.25", python = "<3.9"},
    {version = "^1.25", python = ">=3.9"},
]

[tool.poetry.group.test.dependencies]
pytest-cov = "^4.1"
"#,
        );

        assert_eq!(
            refs,
            vec![
                pair("httpx", ">=0.24"),
                pair("acme-auth", ""),
                pair("mkdocs", "==1.5.2"),
                pair("python", "^3.11"),
                pair("pydantic", "^2.0"),
                pair("numpy", "<1.25"),
                pair("numpy", "^1.25"),
                pair("pytest-cov", "^4.1"),
            ]
        );
    }

    #[test]
    fn test_setup_cfg() {
        let refs = read(
            "setup.cfg",
            "[metadata]\n\
             name = svc\n\
             \n\
             [options]\n\
             packages = find:\n\
             install_requires =\n    click>=8.0\n    acme-cli\n\
             \n\
             [options.extras_require]\n\
             dev =\n    black==23.7.0\n",
        );

        assert_eq!(
            refs,
            vec![
                pair("click", ">=8.0"),
                pair("acme-cli", ""),
                pair("black", "==23.7.0"),
            ]
        );
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let mut resolver = PythonResolver::new("Pipfile");
        assert!(resolver.read_references(b"[packages\nrequests = ").is_err());
    }

    #[tokio::test]
    async fn test_skipped_names_are_not_probed() {
        let mut resolver = PythonResolver::new("requirements.txt");
        resolver
            .read_references(b"python\n.\ngit+https://github.com/acme/tool\nacme-private\n")
            .unwrap();
        let client = Arc::new(ScriptedClient::new());
        let prober = Prober::new(
            client.clone(),
            RetryPolicy {
                max_retries: 3,
                delay: Duration::ZERO,
            },
            RegistryEndpoints::all_at("http://registry.test"),
        );

        let flagged = resolver.unavailable_references(&prober).await;

        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].name, "pip");
        assert_eq!(flagged[0].package, "acme-private");
        assert_eq!(client.calls("http://registry.test/project/acme-private/"), 1);
        assert_eq!(client.total_calls(), 1);
    }
}
