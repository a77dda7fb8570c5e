//! Fact extractor - applies extraction rules to one file's source text
//!
//! Pure function of (text, rules): no I/O, no state. Downstream reports and
//! scope decisions are line-addressed, so the 1-based line number of each
//! match must be exact.

use std::collections::HashMap;

use crate::rules::{RuleCategory, RuleSet};

/// One rule match: the rule's name, the 1-based line of the match start,
/// and the captured semantic fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub rule: String,
    pub line: u32,
    pub fields: HashMap<String, String>,
}

impl MatchRecord {
    /// Get a captured field by semantic name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Apply every rule in a category to the source text, in rule order.
///
/// The line number counts newline bytes preceding the match offset.
/// Non-participating capture groups are omitted from the field map.
pub fn extract(source: &str, rules: &RuleSet, category: RuleCategory) -> Vec<MatchRecord> {
    let mut records = Vec::new();

    for rule in rules.rules(category) {
        for caps in rule.regex.captures_iter(source) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let line = line_number_at(source, start);

            let mut fields = HashMap::new();
            for (idx, name) in &rule.groups {
                if let Some(group) = caps.get(*idx) {
                    fields.insert(name.clone(), group.as_str().to_string());
                }
            }

            records.push(MatchRecord {
                rule: rule.name.clone(),
                line,
                fields,
            });
        }
    }

    records
}

/// 1-based line number of a byte offset
fn line_number_at(source: &str, offset: usize) -> u32 {
    let newlines = source.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count();
    newlines as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::bundled().unwrap()
    }

    fn tables(records: &[MatchRecord]) -> Vec<&str> {
        records.iter().filter_map(|r| r.field("table")).collect()
    }

    // --- Table writes ---

    #[test]
    fn test_data_step_write() {
        let src = "DATA mylib.customers;\n  SET work.raw;\nRUN;";
        let results = extract(src, &rules(), RuleCategory::TableWrite);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].field("libref"), Some("mylib"));
        assert_eq!(results[0].field("table"), Some("customers"));
        assert_eq!(results[0].line, 1);
    }

    #[test]
    fn test_data_null_excluded() {
        let src = "DATA _null_;\n  FILE print;\nRUN;";
        let results = extract(src, &rules(), RuleCategory::TableWrite);
        assert!(results.is_empty());
    }

    #[test]
    fn test_create_table() {
        let src = "PROC SQL;\n  CREATE TABLE ora.summary AS SELECT * FROM ora.detail;\nQUIT;";
        let results = extract(src, &rules(), RuleCategory::TableWrite);
        assert!(results
            .iter()
            .any(|r| r.field("table") == Some("summary") && r.field("libref") == Some("ora")));
    }

    #[test]
    fn test_insert_into() {
        let src = "PROC SQL;\n  INSERT INTO sf.target (col1) VALUES ('x');\nQUIT;";
        let results = extract(src, &rules(), RuleCategory::TableWrite);
        assert!(results.iter().any(|r| r.field("table") == Some("target")));
    }

    #[test]
    fn test_proc_append() {
        let src = "PROC APPEND BASE=mylib.master DATA=work.new; RUN;";
        let results = extract(src, &rules(), RuleCategory::TableWrite);
        assert!(results
            .iter()
            .any(|r| r.field("table") == Some("master") && r.field("libref") == Some("mylib")));
    }

    #[test]
    fn test_passthrough_create() {
        let src = "EXECUTE(CREATE TABLE myschema.newtbl (id int))";
        let results = extract(src, &rules(), RuleCategory::TableWrite);
        assert!(results.iter().any(|r| r.field("table") == Some("newtbl")));
    }

    // --- Table reads ---

    #[test]
    fn test_set_read() {
        let src = "DATA work.out;\n  SET mylib.input;\nRUN;";
        let results = extract(src, &rules(), RuleCategory::TableRead);
        assert!(results
            .iter()
            .any(|r| r.field("table") == Some("input") && r.field("libref") == Some("mylib")));
        assert_eq!(results[0].line, 2);
    }

    #[test]
    fn test_merge_reads_both() {
        let src = "DATA work.out;\n  MERGE mylib.a mylib.b;\n  BY id;\nRUN;";
        let results = extract(src, &rules(), RuleCategory::TableRead);
        let found = tables(&results);
        assert!(found.contains(&"a"));
        assert!(found.contains(&"b"));
    }

    #[test]
    fn test_from_clause() {
        let src = "PROC SQL;\n  SELECT * FROM ora.detail WHERE x=1;\nQUIT;";
        let results = extract(src, &rules(), RuleCategory::TableRead);
        assert!(results.iter().any(|r| r.field("table") == Some("detail")));
    }

    #[test]
    fn test_join_clause() {
        let src = "PROC SQL;\n  SELECT * FROM ora.a JOIN ora.b ON a.id=b.id;\nQUIT;";
        let results = extract(src, &rules(), RuleCategory::TableRead);
        let found = tables(&results);
        assert!(found.contains(&"a"));
        assert!(found.contains(&"b"));
    }

    #[test]
    fn test_passthrough_select() {
        let src = "EXECUTE(SELECT col1, col2 FROM myschema.sourcetbl WHERE x=1)";
        let results = extract(src, &rules(), RuleCategory::TableRead);
        assert!(results.iter().any(|r| r.field("table") == Some("sourcetbl")));
    }

    // --- Includes ---

    #[test]
    fn test_quoted_include() {
        let src = "%INCLUDE '/shared/macros/utils.sas';";
        let results = extract(src, &rules(), RuleCategory::Include);
        assert!(results
            .iter()
            .any(|r| r.field("path") == Some("/shared/macros/utils.sas")));
    }

    #[test]
    fn test_bare_include() {
        let src = "%include /prod/common/setup.sas;";
        let results = extract(src, &rules(), RuleCategory::Include);
        assert!(results
            .iter()
            .any(|r| r.field("path") == Some("/prod/common/setup.sas")));
    }

    // --- Macro definitions and calls ---

    #[test]
    fn test_macro_def() {
        let src = "%MACRO load_data(dsn=);\n  /* body */\n%MEND;";
        let results = extract(src, &rules(), RuleCategory::MacroDef);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].field("name"), Some("load_data"));
    }

    #[test]
    fn test_macro_call() {
        let src = "%load_data(dsn=mylib.input);";
        let results = extract(src, &rules(), RuleCategory::MacroCall);
        assert!(results.iter().any(|r| r.field("name") == Some("load_data")));
    }

    #[test]
    fn test_macro_builtins_excluded() {
        let src = "%IF &x = 1 %THEN %DO;\n  %LET y = 2;\n%END;";
        let results = extract(src, &rules(), RuleCategory::MacroCall);
        assert!(results.is_empty());
    }

    #[test]
    fn test_connection_defaults_macro_not_a_call() {
        let src = "%datalab_connections;";
        let results = extract(src, &rules(), RuleCategory::MacroCall);
        assert!(results.is_empty());
    }

    // --- LIBNAME ---

    #[test]
    fn test_oracle_libname() {
        let src = "LIBNAME myora ORACLE PATH='PROD' SCHEMA='DBO' USER=&uid PASSWORD=&pwd;";
        let results = extract(src, &rules(), RuleCategory::Libname);
        assert!(results.iter().any(|r| {
            r.field("libref") == Some("myora")
                && r.field("path") == Some("PROD")
                && r.field("schema") == Some("DBO")
        }));
    }

    #[test]
    fn test_snowflake_libname() {
        let src = "LIBNAME sf SNOW SERVER='myacct.snowflakecomputing.com' DATABASE=&sf_database SCHEMA=&sf_schema;";
        let results = extract(src, &rules(), RuleCategory::Libname);
        assert!(results.iter().any(|r| {
            r.field("libref") == Some("sf") && r.field("database") == Some("&sf_database")
        }));
    }

    #[test]
    fn test_base_libname() {
        let src = "LIBNAME work '/data/saswork';";
        let results = extract(src, &rules(), RuleCategory::Libname);
        assert!(results
            .iter()
            .any(|r| r.field("libref") == Some("work") && r.field("path") == Some("/data/saswork")));
    }

    // --- %LET ---

    #[test]
    fn test_let_basic() {
        let src = "%LET myvar = hello_world;";
        let results = extract(src, &rules(), RuleCategory::LetStatement);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].field("variable"), Some("myvar"));
        assert_eq!(results[0].field("value").map(str::trim), Some("hello_world"));
    }

    #[test]
    fn test_let_multiple_in_order() {
        let src = "%LET db = PROD_DB;\n%LET schema = DBO;\n%LET db = DEV_DB;";
        let results = extract(src, &rules(), RuleCategory::LetStatement);
        assert_eq!(results.len(), 3);
        let db_values: Vec<_> = results
            .iter()
            .filter(|r| r.field("variable") == Some("db"))
            .collect();
        assert_eq!(db_values.last().unwrap().field("value").map(str::trim), Some("DEV_DB"));
    }

    // --- Credentials ---

    #[test]
    fn test_hardcoded_credentials_flagged() {
        let src = "LIBNAME myora ORACLE USER=jsmith PASSWORD=hunter2;";
        let results = extract(src, &rules(), RuleCategory::Credential);
        assert!(results.iter().any(|r| r.field("value") == Some("hunter2")));
        assert!(results.iter().any(|r| r.field("value") == Some("jsmith")));
    }

    #[test]
    fn test_macro_var_credentials_safe() {
        let src = "LIBNAME myora ORACLE USER=&uid PASSWORD=&pwd;";
        let results = extract(src, &rules(), RuleCategory::Credential);
        assert!(results.is_empty());
    }

    #[test]
    fn test_credential_line_number() {
        let src = "line1\nline2\nPASSWORD=secret\nline4";
        let results = extract(src, &rules(), RuleCategory::Credential);
        assert_eq!(results[0].line, 3);
        assert_eq!(results[0].field("value"), Some("secret"));
    }
}
