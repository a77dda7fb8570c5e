//! Reference resolver - macro variables, LIBNAME mappings, table names,
//! Snowflake write scoping
//!
//! Resolution is file-local and total: every input, including a missing
//! libref or an unresolvable macro variable, resolves to a defined fallback.
//! Nothing in this module returns an error.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::MatchRecord;

/// Database engine behind a resolved table reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    Oracle,
    Snowflake,
    /// Directory-backed SAS library
    Base,
    /// The ephemeral work library
    Work,
    Unknown,
}

impl DbEngine {
    /// Get the string representation of the engine
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::Oracle => "oracle",
            DbEngine::Snowflake => "snowflake",
            DbEngine::Base => "base",
            DbEngine::Work => "work",
            DbEngine::Unknown => "unknown",
        }
    }

    /// Get all engines
    pub fn all() -> &'static [DbEngine] {
        &[
            DbEngine::Oracle,
            DbEngine::Snowflake,
            DbEngine::Base,
            DbEngine::Work,
            DbEngine::Unknown,
        ]
    }
}

impl FromStr for DbEngine {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "oracle" => Ok(DbEngine::Oracle),
            "snowflake" => Ok(DbEngine::Snowflake),
            "base" => Ok(DbEngine::Base),
            "work" => Ok(DbEngine::Work),
            "unknown" => Ok(DbEngine::Unknown),
            _ => Err(crate::Error::Invalid(format!("Unknown engine: {}", s))),
        }
    }
}

impl std::fmt::Display for DbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default variable bindings injected when the connection-defaults macro is
/// invoked. Passed explicitly from configuration, never global state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionDefaults {
    pub vars: HashMap<String, String>,
}

/// One parsed LIBNAME declaration, classified into an engine family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibnameEntry {
    Oracle { path: String, schema: String },
    Snowflake { database: String, schema: String },
    Base { path: String },
}

impl LibnameEntry {
    pub fn engine(&self) -> DbEngine {
        match self {
            LibnameEntry::Oracle { .. } => DbEngine::Oracle,
            LibnameEntry::Snowflake { .. } => DbEngine::Snowflake,
            LibnameEntry::Base { .. } => DbEngine::Base,
        }
    }
}

fn macro_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(\w+)\.?").unwrap())
}

fn connection_macro_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)%datalab_connections\b").unwrap())
}

/// Fold %LET assignment matches, in document order, into a variable map.
///
/// Keys are lower-cased, values trimmed; a later assignment to the same name
/// overwrites the earlier one. The map is file-local only.
pub fn macro_vars_from_assignments(assignments: &[MatchRecord]) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for record in assignments {
        if let (Some(name), Some(value)) = (record.field("variable"), record.field("value")) {
            vars.insert(name.to_lowercase(), value.trim().to_string());
        }
    }
    vars
}

/// Inject connection-default bindings when the source invokes the
/// connection-defaults macro. Explicit assignments always win.
pub fn apply_connection_defaults(
    source: &str,
    vars: &mut HashMap<String, String>,
    defaults: &ConnectionDefaults,
) {
    if !connection_macro_re().is_match(source) {
        return;
    }
    for (name, value) in &defaults.vars {
        vars.entry(name.to_lowercase()).or_insert_with(|| value.clone());
    }
}

/// Replace `&name` / `&name.` references with values from the variable map.
/// Unresolved references are left verbatim, marker intact.
pub fn substitute_macro_vars(text: &str, vars: &HashMap<String, String>) -> String {
    macro_var_re()
        .replace_all(text, |caps: &regex::Captures| {
            match vars.get(&caps[1].to_lowercase()) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Build the libref -> engine binding map from parsed LIBNAME matches.
///
/// The originating rule name carries the engine family; Snowflake database
/// and schema fields are macro-substituted at build time.
pub fn build_libname_map(
    libnames: &[MatchRecord],
    vars: &HashMap<String, String>,
) -> HashMap<String, LibnameEntry> {
    let mut map = HashMap::new();
    for record in libnames {
        let libref = match record.field("libref") {
            Some(l) => l.to_lowercase(),
            None => continue,
        };
        let entry = if record.rule.contains("oracle") {
            LibnameEntry::Oracle {
                path: record.field("path").unwrap_or_default().to_string(),
                schema: record.field("schema").unwrap_or_default().to_string(),
            }
        } else if record.rule.contains("snowflake") {
            LibnameEntry::Snowflake {
                database: substitute_macro_vars(record.field("database").unwrap_or_default(), vars),
                schema: substitute_macro_vars(record.field("schema").unwrap_or_default(), vars),
            }
        } else if record.rule.contains("base") {
            LibnameEntry::Base {
                path: record.field("path").unwrap_or_default().to_string(),
            }
        } else {
            continue;
        };
        map.insert(libref, entry);
    }
    map
}

/// Resolve a raw libref/table pair to (qualified_name, engine).
///
/// Priority: parsed LIBNAME map, configured libref fallback, the work
/// library, then an unknown-engine passthrough. A libref still carrying an
/// unresolved `&` marker yields `unknown.<table>` - a terminal fallback,
/// not an error.
pub fn resolve_table_name(
    raw_libref: Option<&str>,
    raw_table: Option<&str>,
    vars: &HashMap<String, String>,
    libname_map: &HashMap<String, LibnameEntry>,
    known_librefs: &HashMap<String, DbEngine>,
) -> (String, DbEngine) {
    let raw_libref = raw_libref.unwrap_or("unknown");
    let raw_table = raw_table.unwrap_or("unknown");

    let libref = substitute_macro_vars(raw_libref, vars).to_lowercase();
    let table = substitute_macro_vars(raw_table, vars).to_lowercase();

    if libref.contains('&') {
        return (format!("unknown.{}", table), DbEngine::Unknown);
    }

    if let Some(entry) = libname_map.get(&libref) {
        return match entry {
            LibnameEntry::Oracle { schema, .. } => {
                let schema = if schema.is_empty() { &libref } else { schema };
                (format!("{}.{}", schema, table), DbEngine::Oracle)
            }
            LibnameEntry::Snowflake { database, schema } => {
                let database = substitute_macro_vars(database, vars);
                let schema = substitute_macro_vars(schema, vars);
                (format!("{}.{}.{}", database, schema, table), DbEngine::Snowflake)
            }
            LibnameEntry::Base { .. } => (format!("{}.{}", libref, table), DbEngine::Base),
        };
    }

    if let Some(engine) = known_librefs.get(&libref) {
        return (format!("{}.{}", libref, table), *engine);
    }

    if libref == "work" {
        return (format!("work.{}", table), DbEngine::Work);
    }

    (format!("{}.{}", libref, table), DbEngine::Unknown)
}

/// Check whether a Snowflake create targets an allow-listed database.
///
/// The first dot-separated component of the qualified name is compared
/// case-insensitively. Non-Snowflake engines always return false here;
/// callers treat every non-Snowflake create as in-scope.
pub fn snowflake_write_in_scope(qualified: &str, engine: DbEngine, scope_dbs: &[String]) -> bool {
    if engine != DbEngine::Snowflake {
        return false;
    }
    let database = qualified.split('.').next().unwrap_or("").to_uppercase();
    scope_dbs.iter().any(|db| db.to_uppercase() == database)
}
