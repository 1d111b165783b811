//! Judge scenarios over full layer wiring: grouping detection, per-group
//! extrema, and malformed judge completions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use nl2sql::config::JudgeConfig;
use nl2sql::db::{QueryExecutor, Row};
use nl2sql::error::Result;
use nl2sql::judge::SqlJudge;
use nl2sql::llm::{ChatMessage, CompletionGateway, Fragment};
use nl2sql::schema::{ColumnDescription, SchemaDescription};

struct CannedGateway(String);

#[async_trait]
impl CompletionGateway for CannedGateway {
    async fn complete(&self, _messages: &[ChatMessage], _stream: bool) -> Result<Vec<Fragment>> {
        Ok(vec![Fragment::Text(self.0.clone())])
    }
}

struct PassingDb;

#[async_trait]
impl QueryExecutor for PassingDb {
    async fn execute_query(&self, sql: &str) -> Result<Option<Vec<Row>>> {
        if sql.starts_with("EXPLAIN") {
            return Ok(Some(vec![Row::from_pairs(vec![("id".to_string(), json!(1))])]));
        }
        Ok(Some(Vec::new()))
    }
}

fn column(name: &str, declared_type: &str) -> ColumnDescription {
    ColumnDescription {
        name: name.to_string(),
        declared_type: declared_type.to_string(),
        nullable: true,
        key: String::new(),
        default: None,
        comment: String::new(),
    }
}

fn employees_schema() -> SchemaDescription {
    SchemaDescription {
        database: "hr".to_string(),
        table: "employees".to_string(),
        columns: vec![
            column("department", "varchar(64)"),
            column("region", "varchar(64)"),
            column("salary", "decimal(10,2)"),
        ],
    }
}

fn accepting_semantic(explanation: &str) -> String {
    format!(
        r#"{{"semantic_valid": true, "semantic_reason": "", "sql_nl_explanation": "{}", "fix_suggestion": "", "confidence": 0.9}}"#,
        explanation
    )
}

#[tokio::test]
async fn missing_group_by_is_rejected_with_a_grouping_fix() {
    // Even a semantic layer that waves the statement through does not save
    // it: the structure layer proves the aggregate/GROUP BY mismatch.
    let gateway = Arc::new(CannedGateway(accepting_semantic("Averages salary per department.")));
    let judge = SqlJudge::new(gateway, JudgeConfig::default());

    let verdict = judge
        .judge(
            "each department's average salary",
            "SELECT `department`, AVG(`salary`) FROM `hr`.`employees`;",
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;

    assert!(!verdict.valid);
    assert!(verdict.need_regenerate);
    assert!(!verdict.fix_suggestion.is_empty());
    assert!(verdict.fix_suggestion.to_lowercase().contains("group by"));
}

#[tokio::test]
async fn grouped_candidate_for_grouping_question_is_accepted() {
    let gateway = Arc::new(CannedGateway(accepting_semantic("Averages salary per department.")));
    let judge = SqlJudge::new(gateway, JudgeConfig::default());

    let verdict = judge
        .judge(
            "each department's average salary",
            "SELECT `department`, ROUND(AVG(`salary`), 2) FROM `hr`.`employees` GROUP BY `department`;",
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;

    assert!(verdict.valid, "errors: {:?}", verdict.errors);
    assert!(!verdict.need_regenerate);
}

#[tokio::test]
async fn flat_limit_for_per_group_extremum_is_rejected() {
    // A flat ORDER BY ... LIMIT 1 cannot answer "highest within each
    // region"; the semantic layer flags it and its fix wins the
    // aggregation's precedence.
    let rejection = r#"{"semantic_valid": false, "semantic_reason": "the question asks for the top department within each region but the SQL returns a single global row", "sql_nl_explanation": "Returns the one department with the most employees overall.", "fix_suggestion": "rank departments per region with RANK() OVER (PARTITION BY `region` ORDER BY COUNT(*) DESC) and keep rank 1", "confidence": 0.85}"#;
    let gateway = Arc::new(CannedGateway(rejection.to_string()));
    let judge = SqlJudge::new(gateway, JudgeConfig::default());

    let verdict = judge
        .judge(
            "the department with the highest headcount in each region",
            "SELECT `region`, `department`, COUNT(*) AS `headcount` FROM `hr`.`employees` GROUP BY `region`, `department` ORDER BY `headcount` DESC LIMIT 1;",
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;

    assert!(!verdict.valid);
    assert!(verdict.fix_suggestion.contains("PARTITION BY"));
    assert!(verdict.reason.contains("each region"));
}

#[tokio::test]
async fn windowed_per_group_extremum_is_accepted() {
    let gateway = Arc::new(CannedGateway(accepting_semantic(
        "Ranks departments by headcount within each region and keeps the top one.",
    )));
    let judge = SqlJudge::new(gateway, JudgeConfig::default());

    let sql = "SELECT `region`, `department`, `headcount` FROM (SELECT `region`, `department`, COUNT(*) AS `headcount`, RANK() OVER (PARTITION BY `region` ORDER BY COUNT(*) DESC) AS `rnk` FROM `hr`.`employees` GROUP BY `region`, `department`) `ranked` WHERE `rnk` = 1;";
    let verdict = judge
        .judge(
            "the department with the highest headcount in each region",
            sql,
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;

    assert!(verdict.valid, "errors: {:?}", verdict.errors);
}

#[tokio::test]
async fn malformed_judge_completion_degrades_to_rejection() {
    let gateway = Arc::new(CannedGateway("Sure, here's the analysis: ...".to_string()));
    let judge = SqlJudge::new(gateway, JudgeConfig::default());

    let verdict = judge
        .judge(
            "each department's average salary",
            "SELECT `department`, ROUND(AVG(`salary`), 2) FROM `hr`.`employees` GROUP BY `department`;",
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;

    assert!(!verdict.valid);
    assert!(verdict.errors.iter().any(|e| e.contains("JSON")));
    assert!(verdict.need_regenerate);
}

#[tokio::test]
async fn similarity_layer_gates_only_when_enabled() {
    let drifting = accepting_semantic("Counts outpatient visits per month.");

    let off = SqlJudge::new(
        Arc::new(CannedGateway(drifting.clone())),
        JudgeConfig::default(),
    );
    let verdict = off
        .judge(
            "each department's average salary",
            "SELECT `department`, ROUND(AVG(`salary`), 2) FROM `hr`.`employees` GROUP BY `department`;",
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;
    assert!(verdict.valid, "similarity must stay off by default");

    let on = SqlJudge::new(
        Arc::new(CannedGateway(drifting)),
        JudgeConfig { similarity_check: true, similarity_threshold: 0.82 },
    );
    let verdict = on
        .judge(
            "each department's average salary",
            "SELECT `department`, ROUND(AVG(`salary`), 2) FROM `hr`.`employees` GROUP BY `department`;",
            Some(&employees_schema()),
            Some(&PassingDb),
        )
        .await;
    assert!(!verdict.valid);
    assert!(verdict.errors.iter().any(|e| e.contains("similarity")));
}
