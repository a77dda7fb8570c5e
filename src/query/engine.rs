//! Impact query engine
//!
//! Read-only queries over the fact store:
//! - Downstream impact / upstream dependencies (depth-capped BFS)
//! - Table usage listing
//! - Credential report
//!
//! The transitive queries run an explicit breadth-first expansion with a
//! visited set keyed by program path, tracking the minimum depth per node.
//! The depth cap guarantees termination on cyclic or mis-resolved graphs.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::Result;
use crate::storage::{FactStore, TableOperation};

/// Traversal ceiling. A bound on cyclic or mis-resolved graphs, not a
/// correctness proof of acyclicity.
const MAX_DEPTH: u32 = 20;

/// One program reached by an impact traversal, at its minimum depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactRow {
    pub program_path: String,
    pub depth: u32,
}

/// One table operation row in a table-usage listing
#[derive(Debug, Clone, Serialize)]
pub struct TableUsage {
    pub program_path: String,
    pub operation: String,
    pub engine: String,
    pub source_line: u32,
}

impl From<TableOperation> for TableUsage {
    fn from(op: TableOperation) -> Self {
        TableUsage {
            program_path: op.program_path,
            operation: op.operation.as_str().to_string(),
            engine: op.engine.as_str().to_string(),
            source_line: op.source_line,
        }
    }
}

/// One flagged program in the credential report
#[derive(Debug, Clone, Serialize)]
pub struct CredentialFinding {
    pub program_path: String,
    pub findings: Vec<String>,
}

/// Direction of a transitive traversal relative to the seed
#[derive(Debug, Clone, Copy)]
enum TraversalDirection {
    /// Consumers of the frontier's outputs
    Downstream,
    /// Producers of the frontier's inputs
    Upstream,
}

/// Query engine over the fact store
pub struct QueryEngine<'a> {
    store: &'a FactStore,
}

impl<'a> QueryEngine<'a> {
    /// Create a new query engine
    pub fn new(store: &'a FactStore) -> Self {
        Self { store }
    }

    /// Programs transitively affected by a change to `path`.
    ///
    /// Each expansion step unions programs that read a table the frontier
    /// creates with programs that declare a dependency on the frontier.
    /// Result excludes the seed, ordered by depth then path.
    pub fn downstream_impact(&self, path: &str) -> Result<Vec<ImpactRow>> {
        self.traverse(path, TraversalDirection::Downstream)
    }

    /// Programs `path` transitively depends on: producers of the tables the
    /// frontier reads, and targets of the frontier's declared dependencies.
    pub fn upstream_dependencies(&self, path: &str) -> Result<Vec<ImpactRow>> {
        self.traverse(path, TraversalDirection::Upstream)
    }

    /// All operations against an exact table name, ordered by operation
    /// kind then program path
    pub fn table_impact(&self, table: &str) -> Result<Vec<TableUsage>> {
        let operations = self.store.operations_for_table(table)?;
        Ok(operations.into_iter().map(TableUsage::from).collect())
    }

    /// All programs with a non-empty credential-finding list, ordered by
    /// path
    pub fn credential_report(&self) -> Result<Vec<CredentialFinding>> {
        let mut report = Vec::new();
        for (program_path, findings_json) in self.store.programs_with_credentials()? {
            let findings: Vec<String> = serde_json::from_str(&findings_json)?;
            if !findings.is_empty() {
                report.push(CredentialFinding {
                    program_path,
                    findings,
                });
            }
        }
        Ok(report)
    }

    fn traverse(&self, seed: &str, direction: TraversalDirection) -> Result<Vec<ImpactRow>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        let mut results = Vec::new();

        visited.insert(seed.to_string());
        queue.push_back((seed.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= MAX_DEPTH {
                continue;
            }

            for next in self.neighbors(&current, direction)? {
                if visited.insert(next.clone()) {
                    results.push(ImpactRow {
                        program_path: next.clone(),
                        depth: depth + 1,
                    });
                    queue.push_back((next, depth + 1));
                }
            }
        }

        results.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.program_path.cmp(&b.program_path)));
        Ok(results)
    }

    /// One expansion step: data-flow edges through tables, unioned with
    /// explicit program dependencies.
    fn neighbors(&self, path: &str, direction: TraversalDirection) -> Result<Vec<String>> {
        let mut next = Vec::new();
        match direction {
            TraversalDirection::Downstream => {
                for table in self.store.tables_created_by(path)? {
                    next.extend(self.store.readers_of_table(&table)?);
                }
                next.extend(self.store.dependants_of(path)?);
            }
            TraversalDirection::Upstream => {
                for table in self.store.tables_read_by(path)? {
                    next.extend(self.store.creators_of_table(&table)?);
                }
                next.extend(self.store.dependency_targets_of(path)?);
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::DbEngine;
    use crate::storage::{DependencyKind, OperationKind, ProgramDependency, ProgramRecord};

    fn sample_program(path: &str, credentials: Option<&str>) -> ProgramRecord {
        ProgramRecord {
            path: path.to_string(),
            size: 100,
            mtime: 1_700_000_000,
            atime: 1_700_000_000,
            uid: 1000,
            gid: 1000,
            mode: 0o100644,
            owner: "1000".to_string(),
            scan_timestamp: "2024-01-01T00:00:00Z".to_string(),
            credential_findings: credentials.map(String::from),
        }
    }

    fn operation(path: &str, table: &str, operation: OperationKind, line: u32) -> TableOperation {
        TableOperation {
            program_path: path.to_string(),
            table_name: table.to_string(),
            engine: DbEngine::Oracle,
            operation,
            source_line: line,
            in_scope: true,
        }
    }

    fn dependency(source: &str, target: &str) -> ProgramDependency {
        ProgramDependency {
            source_program: source.to_string(),
            target_program: target.to_string(),
            kind: DependencyKind::Include,
        }
    }

    /// A writes x; B reads x, writes y; C reads y; D includes E.
    fn seed_graph(store: &FactStore) {
        for path in ["/a.sas", "/b.sas", "/c.sas", "/d.sas", "/e.sas"] {
            store.upsert_program(&sample_program(path, None)).unwrap();
        }
        store
            .upsert_program(&sample_program(
                "/f.sas",
                Some(r#"["[10] hardcoded_password: hunter2"]"#),
            ))
            .unwrap();

        store
            .replace_table_operations(
                "/a.sas",
                &[operation("/a.sas", "schema.x", OperationKind::Create, 1)],
            )
            .unwrap();
        store
            .replace_table_operations(
                "/b.sas",
                &[
                    operation("/b.sas", "schema.x", OperationKind::Read, 1),
                    operation("/b.sas", "schema.y", OperationKind::Create, 5),
                ],
            )
            .unwrap();
        store
            .replace_table_operations(
                "/c.sas",
                &[operation("/c.sas", "schema.y", OperationKind::Read, 1)],
            )
            .unwrap();
        store
            .replace_dependencies("/d.sas", &[dependency("/d.sas", "/e.sas")])
            .unwrap();
    }

    fn paths(rows: &[ImpactRow]) -> Vec<&str> {
        rows.iter().map(|r| r.program_path.as_str()).collect()
    }

    #[test]
    fn test_downstream_direct_and_transitive() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let impact = engine.downstream_impact("/a.sas").unwrap();
        assert_eq!(paths(&impact), vec!["/b.sas", "/c.sas"]);
        assert_eq!(impact[0].depth, 1);
        assert_eq!(impact[1].depth, 2);
    }

    #[test]
    fn test_downstream_excludes_seed() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let impact = engine.downstream_impact("/a.sas").unwrap();
        assert!(!paths(&impact).contains(&"/a.sas"));
    }

    #[test]
    fn test_downstream_leaf_is_empty() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        assert!(engine.downstream_impact("/c.sas").unwrap().is_empty());
    }

    #[test]
    fn test_downstream_follows_dependency_edges() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        // D includes E, so changing E impacts D.
        let impact = engine.downstream_impact("/e.sas").unwrap();
        assert_eq!(paths(&impact), vec!["/d.sas"]);
    }

    #[test]
    fn test_upstream_direct_and_transitive() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let upstream = engine.upstream_dependencies("/c.sas").unwrap();
        assert_eq!(paths(&upstream), vec!["/b.sas", "/a.sas"]);
        assert_eq!(upstream[0].depth, 1);
        assert_eq!(upstream[1].depth, 2);
    }

    #[test]
    fn test_upstream_root_is_empty() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        assert!(engine.upstream_dependencies("/a.sas").unwrap().is_empty());
    }

    #[test]
    fn test_upstream_follows_dependency_edges() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let upstream = engine.upstream_dependencies("/d.sas").unwrap();
        assert_eq!(paths(&upstream), vec!["/e.sas"]);
    }

    #[test]
    fn test_downstream_upstream_symmetry() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let downstream = engine.downstream_impact("/a.sas").unwrap();
        for row in &downstream {
            let upstream = engine.upstream_dependencies(&row.program_path).unwrap();
            assert!(
                paths(&upstream).contains(&"/a.sas"),
                "{} is downstream of /a.sas but /a.sas is not upstream of it",
                row.program_path
            );
        }
    }

    #[test]
    fn test_cycle_terminates() {
        let store = FactStore::open_in_memory().unwrap();
        store.upsert_program(&sample_program("/p.sas", None)).unwrap();
        store.upsert_program(&sample_program("/q.sas", None)).unwrap();

        // p writes t and reads u; q reads t and writes u - a cycle.
        store
            .replace_table_operations(
                "/p.sas",
                &[
                    operation("/p.sas", "schema.t", OperationKind::Create, 1),
                    operation("/p.sas", "schema.u", OperationKind::Read, 2),
                ],
            )
            .unwrap();
        store
            .replace_table_operations(
                "/q.sas",
                &[
                    operation("/q.sas", "schema.t", OperationKind::Read, 1),
                    operation("/q.sas", "schema.u", OperationKind::Create, 2),
                ],
            )
            .unwrap();

        let engine = QueryEngine::new(&store);
        let impact = engine.downstream_impact("/p.sas").unwrap();
        assert_eq!(paths(&impact), vec!["/q.sas"]);
        let upstream = engine.upstream_dependencies("/p.sas").unwrap();
        assert_eq!(paths(&upstream), vec!["/q.sas"]);
    }

    #[test]
    fn test_table_impact_lists_and_orders() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let usage = engine.table_impact("schema.x").unwrap();
        assert_eq!(usage.len(), 2);
        // create sorts before read
        assert_eq!(usage[0].program_path, "/a.sas");
        assert_eq!(usage[0].operation, "create");
        assert_eq!(usage[1].program_path, "/b.sas");
        assert_eq!(usage[1].operation, "read");
    }

    #[test]
    fn test_table_impact_unknown_table() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        assert!(engine.table_impact("no.such.table").unwrap().is_empty());
    }

    #[test]
    fn test_credential_report() {
        let store = FactStore::open_in_memory().unwrap();
        seed_graph(&store);
        let engine = QueryEngine::new(&store);

        let report = engine.credential_report().unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].program_path, "/f.sas");
        assert_eq!(report[0].findings, vec!["[10] hardcoded_password: hunter2"]);
    }
}
