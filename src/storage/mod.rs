//! Storage Layer - SQLite-backed fact store
//!
//! System of record is SQLite with tables:
//! - programs(program_path, file metadata, scan_timestamp, credential_findings)
//! - table_operations(program_path, table_name, database_type, operation_type, source_line, in_scope)
//! - program_dependencies(source_program, target_program, dependency_type)
//! - libname_mappings(libref, engine, source)

pub mod schema;
pub mod sqlite;

pub use sqlite::{
    DbStats, DependencyKind, FactStore, LibnameMapping, OperationKind, ProgramDependency,
    ProgramRecord, Provenance, TableOperation,
};
