use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use nl2sql::analysis;
use nl2sql::config::{DbConfig, JudgeConfig, LlmConfig, LoopConfig};
use nl2sql::db::{MySqlExecutor, QueryExecutor};
use nl2sql::llm::{CompletionGateway, OpenAiGateway};
use nl2sql::repair_loop::RepairLoop;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Natural-language-to-SQL with a judged repair loop")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the databases visible to the configured connection
    Databases,
    /// List the tables of a database
    Tables {
        /// Database name
        database: String,
    },
    /// Generate, validate, execute, and summarize a query
    Ask {
        /// The question in natural language
        query: String,

        /// Target database
        #[arg(short, long)]
        database: String,

        /// Target table
        #[arg(short, long)]
        table: String,

        /// Skip execution; only print the accepted SQL and the loop trail
        #[arg(long)]
        dry_run: bool,

        /// Directory for table/chart JSON exports
        #[arg(long, default_value = "exports")]
        output_dir: PathBuf,
    },
}

fn first_cells(rows: &[nl2sql::db::Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| r.first())
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let executor = MySqlExecutor::connect(&DbConfig::from_env()?).await?;

    match args.command {
        Command::Databases => {
            let rows = executor.execute_query("SHOW DATABASES;").await?.unwrap_or_default();
            for name in first_cells(&rows) {
                println!("{}", name);
            }
        }
        Command::Tables { database } => {
            let sql = format!("SHOW TABLES FROM `{}`;", database);
            let rows = executor.execute_query(&sql).await?.unwrap_or_default();
            for name in first_cells(&rows) {
                println!("{}", name);
            }
        }
        Command::Ask { query, database, table, dry_run, output_dir } => {
            let gateway: Arc<dyn CompletionGateway> =
                Arc::new(OpenAiGateway::new(LlmConfig::from_env()));
            let repair = RepairLoop::new(
                Arc::clone(&gateway),
                JudgeConfig::from_env(),
                LoopConfig::from_env(),
            );

            info!(%query, %database, %table, "running repair loop");
            let outcome = repair.run(&query, &database, &table, &executor, None).await;

            for (round, iteration) in outcome.iterations.iter().enumerate() {
                let status = if iteration.verdict.valid { "accepted" } else { "rejected" };
                println!("--- round {} / step {} ({}) ---", round + 1, iteration.step + 1, status);
                println!("SQL: {}", iteration.sql);
                if !iteration.verdict.valid {
                    println!("reason: {}", iteration.verdict.reason);
                    println!("fix suggestion: {}", iteration.verdict.fix_suggestion);
                }
            }

            if !outcome.accepted {
                warn!("no accepted SQL within the round budget");
                println!("\nNo valid SQL produced; last candidate:\n{}", outcome.sql);
                return Ok(());
            }

            println!("\nAccepted SQL:\n{}", outcome.sql);
            if dry_run {
                return Ok(());
            }

            let Some(rows) = executor.execute_query(&outcome.sql).await? else {
                println!("Query execution failed.");
                return Ok(());
            };

            let summary = analysis::data_summary(&rows);
            println!("\n{}", summary);

            match analysis::create_table(&rows, &output_dir, "Result preview") {
                Ok(path) => println!("table export: {}", path.display()),
                Err(e) => warn!(error = %e, "table export failed"),
            }

            let columns: Vec<String> = rows
                .first()
                .map(|r| r.columns().map(str::to_string).collect())
                .unwrap_or_default();
            if let Some(plan) =
                analysis::plan_chart(gateway.as_ref(), &query, &summary, &columns).await
            {
                match analysis::create_chart(&rows, &plan, &output_dir) {
                    Ok(path) => println!("chart export: {}", path.display()),
                    Err(e) => warn!(error = %e, "chart export skipped"),
                }
            }
        }
    }

    Ok(())
}
