pub mod engine;

pub use engine::{CredentialFinding, ImpactRow, QueryEngine, TableUsage};
