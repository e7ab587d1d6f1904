//! Schema catalog used as grounding context for SQL generation.
//!
//! Table descriptions are declared in version-controlled YAML or TOML files
//! and loaded once at startup. After loading, the catalog is shared as an
//! `Arc<SchemaCatalog>` and only read, so concurrent requests need no
//! synchronization.
//!
//! # Source format
//!
//! ```yaml
//! tables:
//!   - name: users
//!     database: postgres        # or bigquery
//!     dataset: public           # optional schema / dataset
//!     description: User accounts
//!     columns:
//!       - name: id
//!         type: uuid
//!         description: Primary key
//! ```
//!
//! The TOML form uses `[[tables]]` and `[[tables.columns]]` with the same keys.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Rendered in place of an empty catalog so prompts never get blank context.
pub const NO_SCHEMA_CONTEXT: &str = "No schema information available.";

/// Table references following `FROM` / `JOIN`, optionally quoted.
static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+([`"]?[A-Za-z_][\w$.\-]*[`"]?)"#).unwrap()
});

/// Execution capability a table lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Transactional SQL database (Postgres, SQLite).
    #[serde(alias = "postgres", alias = "sqlite")]
    Relational,
    /// Warehouse queried through managed jobs (BigQuery).
    #[serde(alias = "bigquery")]
    Analytical,
}

impl Backend {
    /// Tag used in qualified table names and rendered context.
    pub fn tag(&self) -> &'static str {
        match self {
            Backend::Relational => "postgres",
            Backend::Analytical => "bigquery",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(rename = "database", alias = "backend")]
    pub backend: Backend,
    /// BigQuery dataset or Postgres schema.
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, backend: Backend) -> Self {
        Self {
            name: name.into(),
            backend,
            dataset: None,
            description: String::new(),
            columns: Vec::new(),
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        declared_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            declared_type: declared_type.into(),
            description: description.into(),
        });
        self
    }

    fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref().filter(|d| !d.is_empty())
    }

    /// Unique catalog key: `backend.dataset.name` or `backend.name`.
    pub fn qualified_name(&self) -> String {
        match self.dataset() {
            Some(ds) => format!("{}.{}.{}", self.backend.tag(), ds, self.name),
            None => format!("{}.{}", self.backend.tag(), self.name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    tables: Option<Vec<TableDescriptor>>,
}

/// In-memory registry of table descriptions.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: Vec<TableDescriptor>,
    by_key: HashMap<String, usize>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing any table with the same qualified name.
    pub fn register(&mut self, table: TableDescriptor) {
        let key = table.qualified_name();
        match self.by_key.get(&key) {
            Some(&idx) => self.tables[idx] = table,
            None => {
                self.by_key.insert(key, self.tables.len());
                self.tables.push(table);
            }
        }
    }

    /// Look up by qualified name first, then by bare table name.
    pub fn lookup(&self, name: &str) -> Option<&TableDescriptor> {
        if let Some(&idx) = self.by_key.get(name) {
            return Some(&self.tables[idx]);
        }
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn list_all(&self, backend: Option<Backend>) -> Vec<&TableDescriptor> {
        self.tables
            .iter()
            .filter(|t| backend.map_or(true, |b| t.backend == b))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Render the grounding text block handed to the SQL generator.
    pub fn render_context(&self, backend: Option<Backend>) -> String {
        let tables = self.list_all(backend);
        if tables.is_empty() {
            return NO_SCHEMA_CONTEXT.to_string();
        }

        let mut lines: Vec<String> = Vec::new();
        for table in tables {
            let mut header = format!("Table: {}", table.name);
            if let Some(ds) = table.dataset() {
                header.push_str(&format!(" (dataset: {})", ds));
            }
            header.push_str(&format!(" [{}]", table.backend.tag()));
            lines.push(header);

            if !table.description.is_empty() {
                lines.push(format!("  Description: {}", table.description));
            }
            for col in &table.columns {
                let mut line = format!("  - {} ({})", col.name, col.declared_type);
                if !col.description.is_empty() {
                    line.push_str(&format!(": {}", col.description));
                }
                lines.push(line);
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// Backends of the catalog tables a statement reads from.
    ///
    /// Only references following `FROM` or `JOIN` are considered. Each
    /// reference resolves to at most one table, with [`lookup`]'s
    /// precedence: a table whose dataset equals the qualifier wins,
    /// otherwise the first registered table with that name (case-insensitive)
    /// and no conflicting dataset.
    ///
    /// [`lookup`]: SchemaCatalog::lookup
    pub fn backends_for_sql(&self, sql: &str) -> BTreeSet<Backend> {
        TABLE_REF
            .captures_iter(sql)
            .filter_map(|cap| {
                let reference = cap[1].trim_matches(|c| c == '`' || c == '"').to_lowercase();
                self.resolve_reference(&reference)
            })
            .map(|table| table.backend)
            .collect()
    }

    fn resolve_reference(&self, reference: &str) -> Option<&TableDescriptor> {
        let mut segments: Vec<&str> = reference.split('.').collect();
        let name = segments.pop()?;
        let qualifier = segments.last().copied();

        let mut candidates = self
            .tables
            .iter()
            .filter(|t| t.name.to_lowercase() == name);
        match qualifier {
            Some(q) => {
                let exact = candidates
                    .clone()
                    .find(|t| t.dataset().is_some_and(|ds| ds.to_lowercase() == q));
                exact.or_else(|| candidates.find(|t| t.dataset().is_none()))
            }
            None => candidates.next(),
        }
    }

    /// Pick the backend a statement must run on.
    ///
    /// Falls back to `default` when the statement names no catalog table
    /// and fails when it names tables on more than one backend.
    pub fn resolve_backend(&self, sql: &str, default: Backend) -> Result<Backend> {
        let backends = self.backends_for_sql(sql);
        let mut iter = backends.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Ok(default),
            (Some(b), None) => Ok(*b),
            (Some(_), Some(_)) => bail!(
                "statement spans multiple backends: {}",
                backends
                    .iter()
                    .map(|b| b.tag())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// Load table definitions from a YAML or TOML file.
    ///
    /// Files without a `tables` key register nothing. Returns the number
    /// of tables registered.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(0);
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let file: SchemaFile = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid schema YAML: {}", path.display()))?,
            "toml" => toml::from_str(&content)
                .with_context(|| format!("Invalid schema TOML: {}", path.display()))?,
            other => bail!(
                "Unsupported schema file extension '{}': {}",
                other,
                path.display()
            ),
        };

        let tables = file.tables.unwrap_or_default();
        let count = tables.len();
        for table in tables {
            self.register(table);
        }
        Ok(count)
    }

    /// Load every `*.yaml`, `*.yml` and `*.toml` file under `dir`, in path order.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("Failed to walk schema dir: {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_schema = matches!(
                entry.path().extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("toml")
            );
            if is_schema {
                files.push(entry.into_path());
            }
        }

        let mut total = 0;
        for file in files {
            total += self.load_file(&file)?;
        }
        Ok(total)
    }

    /// Build a catalog from a list of files and directories.
    pub fn load_paths(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut catalog = Self::new();
        for path in paths {
            let path = path.as_ref();
            let loaded = if path.is_dir() {
                catalog.load_dir(path)?
            } else {
                catalog.load_file(path)?
            };
            tracing::info!(path = %path.display(), tables = loaded, "schema loaded");
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn users_table() -> TableDescriptor {
        TableDescriptor::new("users", Backend::Relational)
            .with_dataset("public")
            .with_description("User accounts table")
            .with_column("id", "uuid", "Primary key")
            .with_column("email", "varchar", "User email")
            .with_column("tenant_id", "uuid", "Tenant FK")
    }

    #[test]
    fn test_register_and_lookup_qualified() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        let table = catalog.lookup("postgres.public.users").unwrap();
        assert_eq!(table.name, "users");
    }

    #[test]
    fn test_lookup_by_bare_name() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        assert!(catalog.lookup("users").is_some());
        assert!(catalog.lookup("nonexistent").is_none());
    }

    #[test]
    fn test_qualified_key_wins_over_bare_name() {
        let mut catalog = SchemaCatalog::new();
        // A table literally named like another table's key
        catalog.register(TableDescriptor::new("bigquery.events", Backend::Relational));
        catalog.register(TableDescriptor::new("events", Backend::Analytical));
        let table = catalog.lookup("bigquery.events").unwrap();
        assert_eq!(table.backend, Backend::Analytical);
    }

    #[test]
    fn test_register_replaces_same_key() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        catalog.register(users_table().with_description("Replaced"));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("users").unwrap().description, "Replaced");
    }

    #[test]
    fn test_list_all_filters_backend() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        catalog.register(TableDescriptor::new("events", Backend::Analytical).with_dataset("analytics"));
        assert_eq!(catalog.list_all(None).len(), 2);
        assert_eq!(catalog.list_all(Some(Backend::Relational)).len(), 1);
        assert_eq!(catalog.list_all(Some(Backend::Analytical))[0].name, "events");
    }

    #[test]
    fn test_render_context() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        catalog.register(
            TableDescriptor::new("events", Backend::Analytical).with_column("kind", "STRING", ""),
        );
        let rendered = catalog.render_context(None);
        let expected = "Table: users (dataset: public) [postgres]\n  \
Description: User accounts table\n  \
- id (uuid): Primary key\n  \
- email (varchar): User email\n  \
- tenant_id (uuid): Tenant FK\n\n\
Table: events [bigquery]\n  \
- kind (STRING)\n";
        assert_eq!(rendered, expected);
        assert_eq!(rendered, catalog.render_context(None));
    }

    #[test]
    fn test_render_empty_sentinel() {
        let catalog = SchemaCatalog::new();
        assert_eq!(catalog.render_context(None), NO_SCHEMA_CONTEXT);

        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        assert_eq!(
            catalog.render_context(Some(Backend::Analytical)),
            NO_SCHEMA_CONTEXT
        );
    }

    #[test]
    fn test_load_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("schema.yaml");
        std::fs::write(
            &path,
            r#"
tables:
  - name: orders
    database: postgres
    dataset: public
    description: Customer orders
    columns:
      - name: id
        type: uuid
        description: Order ID
      - name: total
        type: decimal
        description: Order total
"#,
        )
        .unwrap();

        let mut catalog = SchemaCatalog::new();
        assert_eq!(catalog.load_file(&path).unwrap(), 1);
        let table = catalog.lookup("orders").unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[1].declared_type, "decimal");
        assert_eq!(table.qualified_name(), "postgres.public.orders");
    }

    #[test]
    fn test_load_toml_and_missing_tables_key() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("b_events.toml"),
            r#"
[[tables]]
name = "events"
database = "bigquery"
dataset = "analytics"

[[tables.columns]]
name = "event_type"
type = "STRING"
"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("a_notes.yaml"), "owner: data-team\n").unwrap();
        std::fs::write(tmp.path().join("README.md"), "not a schema").unwrap();

        let mut catalog = SchemaCatalog::new();
        assert_eq!(catalog.load_dir(tmp.path()).unwrap(), 1);
        let table = catalog.lookup("bigquery.analytics.events").unwrap();
        assert_eq!(table.backend, Backend::Analytical);
        assert_eq!(table.columns[0].name, "event_type");
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("schema.json");
        std::fs::write(&path, "{}").unwrap();
        let mut catalog = SchemaCatalog::new();
        assert!(catalog.load_file(&path).is_err());
    }

    #[test]
    fn test_resolve_backend() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        catalog.register(TableDescriptor::new("events", Backend::Analytical).with_dataset("analytics"));

        let sql = "SELECT count(*) FROM public.users u WHERE u.tenant_id = 't1'";
        assert_eq!(
            catalog.resolve_backend(sql, Backend::Analytical).unwrap(),
            Backend::Relational
        );

        let sql = "SELECT * FROM `acme.analytics.events` LIMIT 10";
        assert_eq!(
            catalog.resolve_backend(sql, Backend::Relational).unwrap(),
            Backend::Analytical
        );

        let sql = "WITH a AS (SELECT 1 AS x) SELECT * FROM a";
        assert_eq!(
            catalog.resolve_backend(sql, Backend::Analytical).unwrap(),
            Backend::Analytical
        );

        let sql = "SELECT * FROM users JOIN analytics.events e ON e.user_id = users.id";
        let err = catalog.resolve_backend(sql, Backend::Relational).unwrap_err();
        assert!(err.to_string().contains("multiple backends"));
    }

    #[test]
    fn test_bare_name_on_both_backends_resolves_like_lookup() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(users_table());
        catalog.register(TableDescriptor::new("users", Backend::Analytical).with_dataset("analytics"));
        assert_eq!(catalog.lookup("users").unwrap().backend, Backend::Relational);

        let sql = "SELECT count(*) FROM users";
        assert_eq!(
            catalog.resolve_backend(sql, Backend::Analytical).unwrap(),
            Backend::Relational
        );

        let sql = "SELECT count(*) FROM analytics.users";
        assert_eq!(
            catalog.resolve_backend(sql, Backend::Relational).unwrap(),
            Backend::Analytical
        );
    }

    #[test]
    fn test_resolve_backend_respects_dataset() {
        let mut catalog = SchemaCatalog::new();
        catalog.register(TableDescriptor::new("events", Backend::Analytical).with_dataset("analytics"));
        let sql = "SELECT * FROM audit.events";
        assert!(catalog.backends_for_sql(sql).is_empty());
    }
}
