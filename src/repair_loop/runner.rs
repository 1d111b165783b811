//! The closed loop between the SQL Generator and the SQL Judge.
//!
//! One run owns all loop state: the sub-question plan, every round's SQL
//! and verdict in arrival order, and the fix suggestion threaded from each
//! rejection into the next generation. Nothing survives the call.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{JudgeConfig, LoopConfig};
use crate::db::{QueryExecutor, Row};
use crate::decomposer::QueryDecomposer;
use crate::generator::SqlGenerator;
use crate::judge::{SqlJudge, Verdict};
use crate::llm::CompletionGateway;
use crate::schema;

/// One generate+judge round.
#[derive(Debug, Clone, Serialize)]
pub struct Iteration {
    /// Index into the sub-question plan this round belongs to.
    pub step: usize,
    pub sql: String,
    pub verdict: Verdict,
}

/// The loop's structured result. `sql` is the last produced statement and
/// is only trustworthy when `accepted` is true.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub accepted: bool,
    pub sql: String,
    pub iterations: Vec<Iteration>,
    pub last_verdict: Option<Verdict>,
    /// The sub-question plan that was executed (a single entry when no
    /// decomposition happened).
    pub plan: Vec<String>,
    /// Execution results for intermediate plan steps, `None` for a step
    /// whose SQL failed to execute and for the final step (the caller
    /// decides whether to run the final SQL).
    pub plan_results: Vec<Option<Vec<Row>>>,
}

impl LoopOutcome {
    fn empty() -> Self {
        Self {
            accepted: false,
            sql: String::new(),
            iterations: Vec::new(),
            last_verdict: None,
            plan: Vec::new(),
            plan_results: Vec::new(),
        }
    }
}

pub struct RepairLoop {
    generator: SqlGenerator,
    judge: SqlJudge,
    decomposer: QueryDecomposer,
    config: LoopConfig,
}

impl RepairLoop {
    pub fn new(
        gateway: Arc<dyn CompletionGateway>,
        judge_config: JudgeConfig,
        config: LoopConfig,
    ) -> Self {
        Self {
            generator: SqlGenerator::new(Arc::clone(&gateway)),
            judge: SqlJudge::new(Arc::clone(&gateway), judge_config),
            decomposer: QueryDecomposer::new(gateway),
            config,
        }
    }

    /// Drive the loop for one request. Never returns an error: every
    /// failure mode lands in the outcome (`accepted == false`, failing
    /// verdicts in the trail).
    pub async fn run(
        &self,
        question: &str,
        database: &str,
        table: &str,
        executor: &dyn QueryExecutor,
        fix_hint: Option<&str>,
    ) -> LoopOutcome {
        if question.trim().is_empty() {
            warn!("empty question, nothing to do");
            return LoopOutcome::empty();
        }

        let schema = match schema::fetch_schema(executor, database, table).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "schema introspection failed, continuing without columns");
                schema::SchemaDescription {
                    database: database.to_string(),
                    table: table.to_string(),
                    columns: Vec::new(),
                }
            }
        };
        let profiles =
            schema::fetch_value_profiles(executor, &schema, self.config.distinct_limit).await;

        let plan = if self.config.decompose {
            self.decomposer.plan(question).await
        } else {
            vec![question.to_string()]
        };

        let mut iterations: Vec<Iteration> = Vec::new();
        let mut plan_results: Vec<Option<Vec<Row>>> = Vec::new();
        let mut final_sql = String::new();
        let mut final_accepted = false;

        for (step, sub_question) in plan.iter().enumerate() {
            let is_final = step + 1 == plan.len();
            let refined = self.generator.refine_question(sub_question).await;

            // Intermediate sub-questions always start hint-free; only the
            // final one inherits the externally supplied hint.
            let mut fix: Option<String> = if is_final {
                fix_hint.filter(|f| !f.is_empty()).map(str::to_string)
            } else {
                None
            };

            let mut step_sql = String::new();
            let mut step_accepted = false;

            for round in 1..=self.config.max_rounds {
                info!(step, round, max_rounds = self.config.max_rounds, "repair round");
                let sql = self
                    .generator
                    .generate(&refined, &schema, &profiles, fix.as_deref())
                    .await;
                let verdict =
                    self.judge.judge(&refined, &sql, Some(&schema), Some(executor)).await;

                step_sql = sql.clone();
                let accepted = verdict.valid;
                fix = Some(verdict.fix_suggestion.clone());
                iterations.push(Iteration { step, sql, verdict });

                if accepted {
                    step_accepted = true;
                    break;
                }
            }

            if is_final {
                final_sql = step_sql;
                final_accepted = step_accepted;
                plan_results.push(None);
            } else {
                // Run the intermediate step so later steps have data
                // context; a failure is recorded and the plan continues.
                let result = match executor.execute_query(&step_sql).await {
                    Ok(Some(rows)) => Some(rows),
                    Ok(None) => {
                        warn!(step, "intermediate step produced no result");
                        None
                    }
                    Err(e) => {
                        warn!(step, error = %e, "intermediate step failed");
                        None
                    }
                };
                plan_results.push(result);
            }
        }

        let last_verdict = iterations.last().map(|it| it.verdict.clone());
        LoopOutcome {
            accepted: final_accepted,
            sql: final_sql,
            iterations,
            last_verdict,
            plan,
            plan_results,
        }
    }
}
