use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::resolve::{ConnectionDefaults, DbEngine};
use crate::rules::RuleSet;
use crate::scan::ScanOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// SQLite database location
    pub database: String,
    /// Directory scanned first to build the macro catalog
    pub macro_directory: Option<String>,
    /// Roots walked for programs
    pub scan_roots: Vec<String>,
    /// Alias -> engine fallback when no LIBNAME was parsed
    pub known_librefs: HashMap<String, DbEngine>,
    /// Variable bindings set by the %datalab_connections macro
    pub datalab_defaults: HashMap<String, String>,
    /// Snowflake databases where writes are in scope
    pub snowflake_write_scope: Vec<String>,
    /// File suffixes to include
    pub extensions: Vec<String>,
    /// Optional rule-set file overriding the bundled default
    pub rules: Option<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            database: "sasmap.db".to_string(),
            macro_directory: None,
            scan_roots: Vec::new(),
            known_librefs: HashMap::new(),
            datalab_defaults: HashMap::from([
                ("sf_database_old".to_string(), "ILS_DATALAB_SBX_DB".to_string()),
                ("sf_schema_old".to_string(), "DATALAB_ILSNP".to_string()),
                ("sf_database".to_string(), "LIS_DTALAB_WRKGRP_SPC_DB".to_string()),
                ("sf_schema".to_string(), "DL_T1_ILS_ANALYTICS".to_string()),
            ]),
            snowflake_write_scope: vec![
                "LIS_DTALAB_WRKGRP_SPC_DB".to_string(),
                "DATALAB_ILSNP".to_string(),
            ],
            extensions: vec![".sas".to_string()],
            rules: None,
        }
    }
}

impl MapperConfig {
    /// Distill the scan-facing options out of the full configuration
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            macro_directory: self.macro_directory.clone(),
            scan_roots: self.scan_roots.clone(),
            extensions: self.extensions.clone(),
            known_librefs: self.known_librefs.clone(),
            connection_defaults: ConnectionDefaults {
                vars: self.datalab_defaults.clone(),
            },
            snowflake_write_scope: self.snowflake_write_scope.clone(),
        }
    }

    /// Load the configured rule set, or the bundled default
    pub fn rule_set(&self) -> crate::Result<RuleSet> {
        match &self.rules {
            Some(path) => RuleSet::load(Path::new(path)),
            None => RuleSet::bundled(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("sasmap.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<MapperConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(MapperConfig::default());
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: MapperConfig = toml::from_str(&contents)?;
    Ok(config)
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
