//! Extraction rule set - externally supplied, versionable pattern definitions
//!
//! A rule set maps each extraction category to an ordered list of named
//! rules. Rules are loaded from TOML and compiled once; a bundled default
//! set covering the common SAS constructs ships with the crate.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::{Error, Result};

/// Extraction categories consumed by the resolver and scan coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleCategory {
    /// Table create operations (DATA steps, CREATE TABLE, INSERT INTO, ...)
    TableWrite,
    /// Table read operations (SET, MERGE, FROM, JOIN)
    TableRead,
    /// %INCLUDE directives
    Include,
    /// %MACRO definitions
    MacroDef,
    /// Macro invocations
    MacroCall,
    /// LIBNAME declarations
    Libname,
    /// %LET variable assignments
    LetStatement,
    /// Hardcoded credential values
    Credential,
}

impl RuleCategory {
    /// Get the string representation of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::TableWrite => "table_write",
            RuleCategory::TableRead => "table_read",
            RuleCategory::Include => "include",
            RuleCategory::MacroDef => "macro_def",
            RuleCategory::MacroCall => "macro_call",
            RuleCategory::Libname => "libname",
            RuleCategory::LetStatement => "let_statement",
            RuleCategory::Credential => "credential",
        }
    }

    /// Get all categories
    pub fn all() -> &'static [RuleCategory] {
        &[
            RuleCategory::TableWrite,
            RuleCategory::TableRead,
            RuleCategory::Include,
            RuleCategory::MacroDef,
            RuleCategory::MacroCall,
            RuleCategory::Libname,
            RuleCategory::LetStatement,
            RuleCategory::Credential,
        ]
    }
}

impl FromStr for RuleCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table_write" => Ok(RuleCategory::TableWrite),
            "table_read" => Ok(RuleCategory::TableRead),
            "include" => Ok(RuleCategory::Include),
            "macro_def" => Ok(RuleCategory::MacroDef),
            "macro_call" => Ok(RuleCategory::MacroCall),
            "libname" => Ok(RuleCategory::Libname),
            "let_statement" => Ok(RuleCategory::LetStatement),
            "credential" => Ok(RuleCategory::Credential),
            _ => Err(Error::Rule(format!("Unknown rule category: {}", s))),
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw rule as it appears in the TOML file
#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    pattern: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    groups: HashMap<String, String>,
}

/// A compiled extraction rule
#[derive(Debug)]
pub struct Rule {
    /// Rule name, carried onto every match record it produces
    pub name: String,
    /// Compiled pattern
    pub regex: Regex,
    /// Capture-group index to semantic field name
    pub groups: Vec<(usize, String)>,
}

impl Rule {
    fn compile(category: &str, raw: RawRule) -> Result<Self> {
        let mut builder = RegexBuilder::new(&raw.pattern);
        for flag in &raw.flags {
            match flag.as_str() {
                "case_insensitive" => builder.case_insensitive(true),
                "multi_line" => builder.multi_line(true),
                other => {
                    return Err(Error::Rule(format!(
                        "{}/{}: unknown flag '{}'",
                        category, raw.name, other
                    )));
                }
            };
        }
        let regex = builder.build().map_err(|e| {
            Error::Rule(format!("{}/{}: invalid pattern: {}", category, raw.name, e))
        })?;

        let mut groups = Vec::with_capacity(raw.groups.len());
        for (idx, field) in raw.groups {
            let idx: usize = idx.parse().map_err(|_| {
                Error::Rule(format!(
                    "{}/{}: group index '{}' is not a number",
                    category, raw.name, idx
                ))
            })?;
            groups.push((idx, field));
        }
        groups.sort_by_key(|(idx, _)| *idx);

        Ok(Rule {
            name: raw.name,
            regex,
            groups,
        })
    }
}

/// A complete rule set: category -> ordered rules
#[derive(Debug, Default)]
pub struct RuleSet {
    categories: HashMap<RuleCategory, Vec<Rule>>,
}

impl RuleSet {
    /// Compile the default rule set bundled with the crate
    pub fn bundled() -> Result<Self> {
        Self::parse(include_str!("../rules/default.toml"))
    }

    /// Load and compile a rule set from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Compile a rule set from TOML text
    pub fn parse(text: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<RawRule>> =
            toml::from_str(text).map_err(|e| Error::Rule(e.to_string()))?;

        let mut categories = HashMap::new();
        for (category_name, raw_rules) in raw {
            let category: RuleCategory = category_name.parse()?;
            let mut rules = Vec::with_capacity(raw_rules.len());
            for raw_rule in raw_rules {
                rules.push(Rule::compile(&category_name, raw_rule)?);
            }
            categories.insert(category, rules);
        }

        Ok(RuleSet { categories })
    }

    /// Get the rules for a category (empty slice if none are defined)
    pub fn rules(&self, category: RuleCategory) -> &[Rule] {
        self.categories
            .get(&category)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of rules across all categories
    pub fn len(&self) -> usize {
        self.categories.values().map(|v| v.len()).sum()
    }

    /// Check if the rule set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
