//! Scenario catalog: what to drive through the search form
//!
//! A [`Scenario`] is a full search (query, databases, optional alternate
//! method, checks on the report). A [`FormProbe`] stops before submission and
//! only asserts on the form's own state. Both come from the built-in catalog
//! or from YAML catalog files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::poll::{Scope, UiState};

/// Marker text proving a report rendered
pub const RESULT_MARKER: &str = "Query";

/// Whether an expectation is polled or read once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    #[default]
    Eventually,
    Immediate,
}

/// A UI state and the value it must reach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub state: UiState,
    pub expected: Value,
    #[serde(default)]
    pub mode: CheckMode,

    /// Require the value to hold for several consecutive samples
    #[serde(default)]
    pub stable: bool,
}

impl Expectation {
    pub fn new(state: UiState, expected: impl Into<Value>) -> Self {
        Self {
            state,
            expected: expected.into(),
            mode: CheckMode::Eventually,
            stable: false,
        }
    }

    pub fn stable(mut self) -> Self {
        self.stable = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.mode = CheckMode::Immediate;
        self
    }
}

/// One complete search configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    name: String,
    tags: Vec<String>,
    query: String,
    databases: Vec<String>,
    method: Option<String>,
    form_checks: Vec<Expectation>,
    result_checks: Vec<Expectation>,
}

impl Scenario {
    /// Build a scenario; `databases` must not be empty
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        databases: Vec<String>,
    ) -> E2eResult<Self> {
        let name = name.into();
        if databases.is_empty() {
            return Err(E2eError::InvalidScenario {
                name,
                reason: "at least one database must be selected".into(),
            });
        }
        Ok(Self {
            name,
            tags: Vec::new(),
            query: query.into(),
            databases,
            method: None,
            form_checks: Vec::new(),
            result_checks: Vec::new(),
        })
    }

    /// Pick an alternate search method from the dropdown
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Assert on the form once all databases are selected
    pub fn with_form_check(mut self, check: Expectation) -> Self {
        self.form_checks.push(check);
        self
    }

    /// Assert on the report page after the marker text appeared
    pub fn with_result_check(mut self, check: Expectation) -> Self {
        self.result_checks.push(check);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn form_checks(&self) -> &[Expectation] {
        &self.form_checks
    }

    pub fn result_checks(&self) -> &[Expectation] {
        &self.result_checks
    }
}

/// Form-only check: fill, (de)select databases, assert, no submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormProbe {
    pub name: String,
    pub tags: Vec<String>,
    pub query: String,
    pub select: Vec<String>,
    pub deselect: Vec<String>,
    pub checks: Vec<Expectation>,

    /// Screenshot file name (under the screenshot dir) taken before the checks
    pub screenshot: Option<String>,
}

impl FormProbe {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            query: query.into(),
            select: Vec::new(),
            deselect: Vec::new(),
            checks: Vec::new(),
            screenshot: None,
        }
    }

    pub fn selecting(mut self, databases: &[String]) -> Self {
        self.select.extend(databases.iter().cloned());
        self
    }

    pub fn deselecting(mut self, databases: &[String]) -> Self {
        self.deselect.extend(databases.iter().cloned());
        self
    }

    pub fn expect(mut self, check: Expectation) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_screenshot(mut self, file_name: impl Into<String>) -> Self {
        self.screenshot = Some(file_name.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Query sequences and database names used by the built-in catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixtures {
    pub nucleotide_query: String,
    pub protein_query: String,
    pub nucleotide_databases: Vec<String>,
    pub protein_databases: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseLists {
    #[serde(default)]
    nucleotide: Vec<String>,
    #[serde(default)]
    protein: Vec<String>,
}

impl Fixtures {
    pub const NUCLEOTIDE_QUERY_FILE: &'static str = "nucleotide_query.fa";
    pub const PROTEIN_QUERY_FILE: &'static str = "protein_query.fa";
    pub const DATABASES_FILE: &'static str = "databases.yaml";

    pub fn default_nucleotide_databases() -> Vec<String> {
        vec![
            "Solenopsis invicta gnG subset".to_string(),
            "Sinvicta 2-2-3 cdna subset".to_string(),
        ]
    }

    pub fn default_protein_databases() -> Vec<String> {
        vec![
            "Sinvicta 2-2-3 prot subset".to_string(),
            "2018-04 Swiss-Prot insecta".to_string(),
        ]
    }

    /// Read the query FASTA files from `dir`; `databases.yaml` in the same
    /// directory, when present, overrides the database names
    pub fn load(dir: &Path) -> E2eResult<Self> {
        let nucleotide_query = read_fixture(dir, Self::NUCLEOTIDE_QUERY_FILE)?;
        let protein_query = read_fixture(dir, Self::PROTEIN_QUERY_FILE)?;

        let lists_path = dir.join(Self::DATABASES_FILE);
        let lists: DatabaseLists = if lists_path.exists() {
            serde_yaml::from_str(&std::fs::read_to_string(&lists_path)?)?
        } else {
            DatabaseLists::default()
        };

        let nucleotide_databases = if lists.nucleotide.is_empty() {
            Self::default_nucleotide_databases()
        } else {
            lists.nucleotide
        };
        let protein_databases = if lists.protein.is_empty() {
            Self::default_protein_databases()
        } else {
            lists.protein
        };

        Ok(Self {
            nucleotide_query,
            protein_query,
            nucleotide_databases,
            protein_databases,
        })
    }
}

fn read_fixture(dir: &Path, file: &str) -> E2eResult<String> {
    let path = dir.join(file);
    std::fs::read_to_string(&path).map_err(|e| {
        E2eError::Config(format!("cannot read fixture {}: {}", path.display(), e))
    })
}

/// Scenario as written in a YAML catalog
#[derive(Debug, Deserialize)]
struct ScenarioDef {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    query_file: Option<PathBuf>,
    databases: Vec<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    form_checks: Vec<Expectation>,
    #[serde(default)]
    result_checks: Vec<Expectation>,
}

#[derive(Debug, Deserialize)]
struct ProbeDef {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    query_file: Option<PathBuf>,
    #[serde(default)]
    select: Vec<String>,
    #[serde(default)]
    deselect: Vec<String>,
    #[serde(default)]
    checks: Vec<Expectation>,
    #[serde(default)]
    screenshot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogDef {
    #[serde(default)]
    scenarios: Vec<ScenarioDef>,
    #[serde(default)]
    probes: Vec<ProbeDef>,
}

fn resolve_query(
    name: &str,
    query: Option<String>,
    query_file: Option<PathBuf>,
    fixtures_dir: &Path,
) -> E2eResult<String> {
    match (query, query_file) {
        (Some(query), None) => Ok(query),
        (None, Some(file)) => read_fixture(fixtures_dir, &file.to_string_lossy()),
        _ => Err(E2eError::InvalidScenario {
            name: name.to_string(),
            reason: "exactly one of `query` or `query_file` is required".into(),
        }),
    }
}

/// The set of scenarios and probes a run draws from
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub scenarios: Vec<Scenario>,
    pub probes: Vec<FormProbe>,
}

impl Catalog {
    /// The searches and form checks every run covers
    pub fn builtin(fixtures: &Fixtures) -> E2eResult<Self> {
        let nuc = &fixtures.nucleotide_query;
        let prot = &fixtures.protein_query;
        let nuc_dbs = &fixtures.nucleotide_databases;
        let prot_dbs = &fixtures.protein_databases;

        let scenarios = vec![
            Scenario::new("blastn", nuc.as_str(), nuc_dbs.clone())?
                .with_form_check(Expectation::new(
                    UiState::has_class(".protein .database", "disabled"),
                    true,
                ))
                .with_tags(["search"]),
            Scenario::new("blastp", prot.as_str(), prot_dbs.clone())?.with_tags(["search"]),
            Scenario::new("blastx", nuc.as_str(), prot_dbs.clone())?.with_tags(["search"]),
            Scenario::new("tblastn", prot.as_str(), nuc_dbs.clone())?.with_tags(["search"]),
            Scenario::new("tblastx", nuc.as_str(), nuc_dbs.clone())?
                .with_method("tblastx")
                .with_tags(["search", "dropdown"]),
            Scenario::new("long-hits-disable-sequence-viewer", nuc.as_str(), nuc_dbs.clone())?
                .with_result_check(Expectation::new(
                    UiState::disabled(".view-sequence").with_scope(Scope::All),
                    true,
                ))
                .with_result_check(Expectation::new(
                    UiState::has_class(".view-sequence", "disabled").with_scope(Scope::All),
                    true,
                ))
                .with_tags(["report"]),
        ];

        let first_nuc = match nuc_dbs.first() {
            Some(db) => std::slice::from_ref(db),
            None => {
                return Err(E2eError::Config("no nucleotide databases configured".into()));
            }
        };

        let probes = vec![
            FormProbe::new("submit-disabled-without-databases", nuc.as_str())
                .expect(Expectation::new(UiState::disabled("#method"), true).stable())
                .with_tags(["form"]),
            FormProbe::new("submit-enabled-after-database", nuc.as_str())
                .selecting(first_nuc)
                .expect(Expectation::new(UiState::disabled("#method"), false).stable())
                .with_tags(["form"]),
            FormProbe::new("incompatible-databases-disabled", nuc.as_str())
                .selecting(first_nuc)
                .expect(Expectation::new(
                    UiState::has_class(".protein .database", "disabled"),
                    true,
                ))
                .with_tags(["form"]),
            FormProbe::new("incompatible-databases-restored", nuc.as_str())
                .selecting(first_nuc)
                .deselecting(first_nuc)
                .expect(Expectation::new(
                    UiState::has_class(".protein .database", "disabled"),
                    false,
                ))
                .with_tags(["form"]),
            FormProbe::new("alternate-methods-dropdown", nuc.as_str())
                .selecting(first_nuc)
                .with_screenshot("dropdown.png")
                .expect(Expectation::new(UiState::exists("button.dropdown-toggle"), true))
                .with_tags(["form", "dropdown"]),
        ];

        Ok(Self { scenarios, probes })
    }

    /// Parse a YAML catalog; `query_file` paths resolve against `fixtures_dir`
    pub fn from_yaml(yaml: &str, fixtures_dir: &Path) -> E2eResult<Self> {
        let def: CatalogDef = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::default();

        for s in def.scenarios {
            let query = resolve_query(&s.name, s.query, s.query_file, fixtures_dir)?;
            let mut scenario = Scenario::new(s.name, query, s.databases)?.with_tags(s.tags);
            if let Some(method) = s.method {
                scenario = scenario.with_method(method);
            }
            for check in s.form_checks {
                scenario = scenario.with_form_check(check);
            }
            for check in s.result_checks {
                scenario = scenario.with_result_check(check);
            }
            catalog.scenarios.push(scenario);
        }

        for p in def.probes {
            let query = resolve_query(&p.name, p.query, p.query_file, fixtures_dir)?;
            catalog.probes.push(FormProbe {
                name: p.name,
                tags: p.tags,
                query,
                select: p.select,
                deselect: p.deselect,
                checks: p.checks,
                screenshot: p.screenshot,
            });
        }

        Ok(catalog)
    }

    pub fn from_file(path: &Path, fixtures_dir: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, fixtures_dir)
    }

    /// Load all catalogs from a directory
    pub fn load_dir(dir: &Path, fixtures_dir: &Path) -> E2eResult<Self> {
        let mut catalog = Self::default();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            debug!("Loading catalog {}", entry.path().display());
            catalog.extend(Self::from_file(entry.path(), fixtures_dir)?);
        }

        Ok(catalog)
    }

    pub fn extend(&mut self, other: Catalog) {
        self.scenarios.extend(other.scenarios);
        self.probes.extend(other.probes);
    }

    pub fn len(&self) -> usize {
        self.scenarios.len() + self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only entries carrying `tag`
    pub fn filter_by_tag(self, tag: &str) -> Self {
        Self {
            scenarios: self
                .scenarios
                .into_iter()
                .filter(|s| s.tags.iter().any(|t| t == tag))
                .collect(),
            probes: self
                .probes
                .into_iter()
                .filter(|p| p.tags.iter().any(|t| t == tag))
                .collect(),
        }
    }

    /// Keep only the entry called `name`
    pub fn filter_by_name(self, name: &str) -> Self {
        Self {
            scenarios: self.scenarios.into_iter().filter(|s| s.name == name).collect(),
            probes: self.probes.into_iter().filter(|p| p.name == name).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::UiQuery;

    fn fixtures() -> Fixtures {
        Fixtures {
            nucleotide_query: ">nuc\nATGCGTACGT\n".into(),
            protein_query: ">prot\nMKVLAAGIVG\n".into(),
            nucleotide_databases: Fixtures::default_nucleotide_databases(),
            protein_databases: Fixtures::default_protein_databases(),
        }
    }

    #[test]
    fn test_scenario_requires_databases() {
        let err = Scenario::new("empty", ">q\nACGT", vec![]).unwrap_err();
        assert!(matches!(err, E2eError::InvalidScenario { .. }));
    }

    #[test]
    fn test_builtin_catalog_covers_method_matrix() {
        let catalog = Catalog::builtin(&fixtures()).unwrap();
        let names: Vec<&str> = catalog.scenarios.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                "blastn",
                "blastp",
                "blastx",
                "tblastn",
                "tblastx",
                "long-hits-disable-sequence-viewer"
            ]
        );

        let tblastx = &catalog.scenarios[4];
        assert_eq!(tblastx.method(), Some("tblastx"));
        assert_eq!(tblastx.databases(), fixtures().nucleotide_databases.as_slice());

        let blastx = &catalog.scenarios[2];
        assert_eq!(blastx.query(), fixtures().nucleotide_query);
        assert_eq!(blastx.databases(), fixtures().protein_databases.as_slice());

        let long_hits = &catalog.scenarios[5];
        assert_eq!(long_hits.result_checks().len(), 2);
        assert!(long_hits
            .result_checks()
            .iter()
            .all(|c| c.state.scope == Scope::All && c.expected == Value::Bool(true)));

        assert_eq!(catalog.probes.len(), 5);
        assert!(catalog.probes[0].select.is_empty());
    }

    #[test]
    fn test_parse_yaml_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q.fa"), ">q\nACGTACGT\n").unwrap();

        let yaml = r##"
scenarios:
  - name: custom-tblastx
    tags: [nightly]
    query_file: q.fa
    databases:
      - Sinvicta 2-2-3 cdna subset
    method: tblastx
    result_checks:
      - state:
          selector: .view-sequence
          query: { kind: disabled }
          scope: all
        expected: true
probes:
  - name: no-selection
    query: ">q\nACGT"
    checks:
      - state:
          selector: "#method"
          query: { kind: disabled }
        expected: true
        stable: true
"##;
        let catalog = Catalog::from_yaml(yaml, dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let scenario = &catalog.scenarios[0];
        assert_eq!(scenario.query(), ">q\nACGTACGT\n");
        assert_eq!(scenario.method(), Some("tblastx"));
        assert_eq!(scenario.result_checks()[0].state.query, UiQuery::Disabled);

        let probe = &catalog.probes[0];
        assert!(probe.checks[0].stable);
        assert_eq!(probe.checks[0].mode, CheckMode::Eventually);
    }

    #[test]
    fn test_yaml_scenario_without_databases_is_rejected() {
        let yaml = r#"
scenarios:
  - name: nothing-selected
    query: ACGT
    databases: []
"#;
        let err = Catalog::from_yaml(yaml, Path::new(".")).unwrap_err();
        assert!(matches!(err, E2eError::InvalidScenario { ref name, .. } if name == "nothing-selected"));
    }

    #[test]
    fn test_yaml_requires_exactly_one_query_source() {
        let yaml = r#"
scenarios:
  - name: ambiguous
    query: ACGT
    query_file: q.fa
    databases: [db]
"#;
        assert!(Catalog::from_yaml(yaml, Path::new(".")).is_err());
    }

    #[test]
    fn test_load_dir_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "scenarios:\n  - name: one\n    query: ACGT\n    databases: [db]\n    tags: [smoke]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.yml"),
            "scenarios:\n  - name: two\n    query: ACGT\n    databases: [db]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = Catalog::load_dir(dir.path(), dir.path()).unwrap();
        assert_eq!(catalog.scenarios.len(), 2);

        let smoke = catalog.clone().filter_by_tag("smoke");
        assert_eq!(smoke.scenarios.len(), 1);
        assert_eq!(smoke.scenarios[0].name(), "one");

        let two = catalog.filter_by_name("two");
        assert_eq!(two.len(), 1);
    }

    #[test]
    fn test_fixtures_load_with_database_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(Fixtures::NUCLEOTIDE_QUERY_FILE), ">n\nACGT\n").unwrap();
        std::fs::write(dir.path().join(Fixtures::PROTEIN_QUERY_FILE), ">p\nMKV\n").unwrap();
        std::fs::write(
            dir.path().join(Fixtures::DATABASES_FILE),
            "protein:\n  - My protein db\n",
        )
        .unwrap();

        let fixtures = Fixtures::load(dir.path()).unwrap();
        assert_eq!(fixtures.protein_databases, vec!["My protein db".to_string()]);
        assert_eq!(
            fixtures.nucleotide_databases,
            Fixtures::default_nucleotide_databases()
        );
    }

    #[test]
    fn test_fixtures_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Fixtures::load(dir.path()), Err(E2eError::Config(_))));
    }

    #[test]
    fn test_shipped_fixtures_and_catalog_load() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let fixtures_dir = root.join("fixtures");

        let fixtures = Fixtures::load(&fixtures_dir).unwrap();
        assert!(fixtures.nucleotide_query.starts_with('>'));
        assert!(fixtures.protein_query.starts_with('>'));
        assert_eq!(fixtures.nucleotide_databases.len(), 2);

        let catalog = Catalog::load_dir(&root.join("catalogs"), &fixtures_dir).unwrap();
        assert_eq!(catalog.scenarios[0].query(), fixtures.nucleotide_query);
        assert_eq!(catalog.probes[0].query, fixtures.protein_query);
        assert_eq!(catalog.filter_by_tag("smoke").len(), 2);
    }
}
