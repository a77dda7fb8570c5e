//! Incremental scan coordinator
//!
//! Orchestrates one run as strictly ordered phases: load prior state, walk
//! the macro directory (building the macro catalog before any dependency
//! resolution), walk the scan roots with mtime-based skip decisions, then
//! reconcile deletions. All writes for one file commit as a single
//! transaction; a fault mid-file leaves that file's Program row unchanged.
//!
//! Known limitation: an unchanged modification time is trusted as "no
//! re-scan needed", so content changes that preserve mtime are missed.

use std::collections::{HashMap, HashSet};

use crate::extract::extract;
use crate::remote::{FileMeta, RemoteFs};
use crate::resolve::{
    ConnectionDefaults, DbEngine, apply_connection_defaults, build_libname_map,
    macro_vars_from_assignments, resolve_table_name, snowflake_write_in_scope,
};
use crate::rules::{RuleCategory, RuleSet};
use crate::storage::{
    DependencyKind, FactStore, LibnameMapping, OperationKind, ProgramDependency, ProgramRecord,
    Provenance, TableOperation,
};
use crate::Result;

/// Scan behavior distilled from configuration
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Directory walked first to build the macro catalog
    pub macro_directory: Option<String>,
    /// Roots walked for ordinary programs
    pub scan_roots: Vec<String>,
    /// File suffixes to include, with leading dot
    pub extensions: Vec<String>,
    /// Configured alias -> engine fallback map
    pub known_librefs: HashMap<String, DbEngine>,
    /// Variable bindings injected by the connection-defaults macro
    pub connection_defaults: ConnectionDefaults,
    /// Allow-listed Snowflake databases for in-scope writes
    pub snowflake_write_scope: Vec<String>,
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    pub skipped: usize,
    pub errors: usize,
    pub removed: usize,
}

impl std::fmt::Display for ScanStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} skipped (unchanged), {} errors, {} removed",
            self.scanned, self.skipped, self.errors, self.removed
        )
    }
}

/// The scan pipeline: walks the corpus, extracts and resolves facts, and
/// keeps the fact store consistent with what is on the remote side.
pub struct Scanner<'a> {
    store: &'a mut FactStore,
    rules: &'a RuleSet,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a mut FactStore, rules: &'a RuleSet, options: ScanOptions) -> Self {
        Self {
            store,
            rules,
            options,
        }
    }

    /// Run one scan. `full` ignores prior state and re-processes everything.
    ///
    /// Transport failures on individual files or roots are logged, counted
    /// and skipped; a storage failure aborts the run (facts committed for
    /// prior files remain valid).
    pub fn scan(&mut self, fs: &mut dyn RemoteFs, full: bool) -> Result<ScanStats> {
        let prior_state = if full {
            HashMap::new()
        } else {
            self.store.scan_state()?
        };

        for (libref, engine) in self.options.known_librefs.clone() {
            self.store.upsert_libname_mapping(&LibnameMapping {
                libref: libref.to_lowercase(),
                engine,
                provenance: Provenance::Configured,
            })?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut stats = ScanStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        // macro name (lowercased) -> defining path
        let mut macro_catalog: HashMap<String, String> = HashMap::new();

        // Phase 1: macro directory. Always fully re-parsed so the catalog
        // is complete before any macro-call resolution in phase 2.
        if let Some(macro_dir) = self.options.macro_directory.clone() {
            tracing::info!("Scanning macro directory: {}", macro_dir);
            match fs.walk(&macro_dir, &self.options.extensions, None) {
                Ok(files) => {
                    for meta in files {
                        seen.insert(meta.path.clone());
                        let source = match fs.read(&meta.path) {
                            Ok(source) => source,
                            Err(e) => {
                                tracing::error!("Failed to read {}: {}", meta.path, e);
                                stats.errors += 1;
                                continue;
                            }
                        };

                        for record in extract(&source, self.rules, RuleCategory::MacroDef) {
                            if let Some(name) = record.field("name") {
                                macro_catalog.insert(name.to_lowercase(), meta.path.clone());
                            }
                        }

                        self.process_file(&meta, &source, &macro_catalog, &now)?;
                        stats.scanned += 1;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to walk macro directory {}: {}", macro_dir, e);
                    stats.errors += 1;
                }
            }
        }

        // Phase 2: scan roots, skipping files with an unchanged mtime.
        for root in self.options.scan_roots.clone() {
            tracing::info!("Scanning root: {}", root);
            let files = match fs.walk(&root, &self.options.extensions, None) {
                Ok(files) => files,
                Err(e) => {
                    tracing::error!("Failed to walk {}: {}", root, e);
                    stats.errors += 1;
                    continue;
                }
            };

            for meta in files {
                if !seen.insert(meta.path.clone()) {
                    continue;
                }
                if !full && prior_state.get(&meta.path) == Some(&meta.mtime) {
                    stats.skipped += 1;
                    continue;
                }

                let source = match fs.read(&meta.path) {
                    Ok(source) => source,
                    Err(e) => {
                        tracing::error!("Failed to read {}: {}", meta.path, e);
                        stats.errors += 1;
                        continue;
                    }
                };

                self.process_file(&meta, &source, &macro_catalog, &now)?;
                stats.scanned += 1;
            }
        }

        // Phase 3: purge programs that disappeared from the corpus.
        for old_path in prior_state.keys() {
            if !seen.contains(old_path) {
                self.store.remove_program(old_path)?;
                stats.removed += 1;
                tracing::info!("Removed deleted program: {}", old_path);
            }
        }

        tracing::info!("Scan complete: {}", stats);
        Ok(stats)
    }

    /// Extract, resolve and store all facts for one file as one atomic unit.
    fn process_file(
        &mut self,
        meta: &FileMeta,
        source: &str,
        macro_catalog: &HashMap<String, String>,
        now: &str,
    ) -> Result<()> {
        self.store.begin_transaction()?;
        match self.write_file_facts(meta, source, macro_catalog, now) {
            Ok(()) => self.store.commit(),
            Err(e) => {
                tracing::error!("Error processing {}: {}", meta.path, e);
                self.store.rollback().ok();
                Err(e)
            }
        }
    }

    fn write_file_facts(
        &mut self,
        meta: &FileMeta,
        source: &str,
        macro_catalog: &HashMap<String, String>,
        now: &str,
    ) -> Result<()> {
        let path = &meta.path;

        // File-local macro variables, then connection defaults.
        let assignments = extract(source, self.rules, RuleCategory::LetStatement);
        let mut vars = macro_vars_from_assignments(&assignments);
        apply_connection_defaults(source, &mut vars, &self.options.connection_defaults);

        // LIBNAME declarations.
        let libnames = extract(source, self.rules, RuleCategory::Libname);
        let libname_map = build_libname_map(&libnames, &vars);
        for (libref, entry) in &libname_map {
            self.store.upsert_libname_mapping(&LibnameMapping {
                libref: libref.clone(),
                engine: entry.engine(),
                provenance: Provenance::Parsed,
            })?;
        }

        // Table operations: writes with scope classification, then reads.
        let mut operations = Vec::new();
        for record in extract(source, self.rules, RuleCategory::TableWrite) {
            let libref = record.field("libref").or_else(|| record.field("schema"));
            let (table_name, engine) = resolve_table_name(
                libref,
                record.field("table"),
                &vars,
                &libname_map,
                &self.options.known_librefs,
            );
            let in_scope = if engine == DbEngine::Snowflake {
                snowflake_write_in_scope(&table_name, engine, &self.options.snowflake_write_scope)
            } else {
                true
            };
            operations.push(TableOperation {
                program_path: path.clone(),
                table_name,
                engine,
                operation: OperationKind::Create,
                source_line: record.line,
                in_scope,
            });
        }
        for record in extract(source, self.rules, RuleCategory::TableRead) {
            let libref = record.field("libref").or_else(|| record.field("schema"));
            let (table_name, engine) = resolve_table_name(
                libref,
                record.field("table"),
                &vars,
                &libname_map,
                &self.options.known_librefs,
            );
            operations.push(TableOperation {
                program_path: path.clone(),
                table_name,
                engine,
                operation: OperationKind::Read,
                source_line: record.line,
                in_scope: true,
            });
        }
        self.store.replace_table_operations(path, &operations)?;

        // Dependencies: includes, plus macro calls resolved via the catalog.
        let mut dependencies = Vec::new();
        for record in extract(source, self.rules, RuleCategory::Include) {
            if let Some(target) = record.field("path") {
                dependencies.push(ProgramDependency {
                    source_program: path.clone(),
                    target_program: target.to_string(),
                    kind: DependencyKind::Include,
                });
            }
        }
        for record in extract(source, self.rules, RuleCategory::MacroCall) {
            if let Some(name) = record.field("name") {
                if let Some(defining_path) = macro_catalog.get(&name.to_lowercase()) {
                    dependencies.push(ProgramDependency {
                        source_program: path.clone(),
                        target_program: defining_path.clone(),
                        kind: DependencyKind::MacroCall,
                    });
                }
            }
        }
        self.store.replace_dependencies(path, &dependencies)?;

        // Credential findings, serialized onto the program row.
        let findings: Vec<String> = extract(source, self.rules, RuleCategory::Credential)
            .iter()
            .map(|record| {
                format!(
                    "[{}] {}: {}",
                    record.line,
                    record.rule,
                    record.field("value").unwrap_or("")
                )
            })
            .collect();
        let credential_findings = if findings.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&findings)?)
        };

        // Program row written last: a crash mid-file never leaves a program
        // pointing at children older than itself.
        self.store.upsert_program(&ProgramRecord {
            path: path.clone(),
            size: meta.size as i64,
            mtime: meta.mtime,
            atime: meta.atime,
            uid: meta.uid as i64,
            gid: meta.gid as i64,
            mode: meta.mode as i64,
            owner: meta.uid.to_string(),
            scan_timestamp: now.to_string(),
            credential_findings,
        })?;

        Ok(())
    }
}
