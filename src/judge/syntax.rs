//! Structure layer: parse the candidate with sqlparser's MySQL dialect and
//! check it against the live schema.
//!
//! This layer is deliberately conservative — it flags what it can prove
//! (unknown columns, aggregate/GROUP BY mismatches, a missing target
//! table) and leaves intent questions to the semantic layer. It is never
//! the sole gate.

use std::collections::BTreeSet;

use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Join, JoinConstraint,
    JoinOperator, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::judge::LayerVerdict;
use crate::schema::SchemaDescription;

const AGGREGATE_FUNCTIONS: &[&str] =
    &["sum", "avg", "count", "min", "max", "group_concat", "std", "stddev", "variance"];

#[derive(Default)]
struct Collected {
    tables: Vec<String>,
    columns: BTreeSet<String>,
    aliases: BTreeSet<String>,
}

pub fn check(sql: &str, schema: Option<&SchemaDescription>) -> LayerVerdict {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return LayerVerdict::fail("empty SQL statement");
    }

    let statements = match Parser::parse_sql(&MySqlDialect {}, trimmed) {
        Ok(s) => s,
        Err(e) => return LayerVerdict::fail(format!("SQL parse error: {}", e)),
    };
    if statements.len() != 1 {
        return LayerVerdict::fail(format!(
            "expected exactly one statement, found {}",
            statements.len()
        ));
    }
    let query = match &statements[0] {
        Statement::Query(q) => q,
        other => {
            return LayerVerdict::fail(format!(
                "only SELECT statements are allowed, found {}",
                statement_kind(other)
            ))
        }
    };

    let mut collected = Collected::default();
    walk_query(query, &mut collected);

    let mut errors = Vec::new();
    let mut fix = String::new();

    if let Some(group_error) = check_group_by(query) {
        fix = format!(
            "add a GROUP BY covering every non-aggregated selected column ({})",
            group_error.1
        );
        errors.push(group_error.0);
    }

    if let Some(schema) = schema {
        for column in &collected.columns {
            if collected.aliases.contains(column) {
                continue;
            }
            let known = schema
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(column));
            if !known {
                errors.push(format!(
                    "column `{}` does not exist in `{}` (available: {})",
                    column,
                    schema.table,
                    schema.column_names().join(", ")
                ));
            }
        }

        let references_target = collected
            .tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&schema.table));
        if !references_target {
            errors.push(format!(
                "statement does not reference the target table `{}` (found: {})",
                schema.table,
                collected.tables.join(", ")
            ));
        }
    }

    if errors.is_empty() {
        LayerVerdict::pass()
    } else {
        LayerVerdict { valid: false, errors, fix_suggestion: fix }
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::CreateTable { .. } => "CREATE TABLE",
        _ => "a non-SELECT statement",
    }
}

/// With any aggregate in the projection, every projection item that
/// references a column without being aggregated must appear in GROUP BY.
/// Returns (error, offending columns) on violation.
fn check_group_by(query: &Query) -> Option<(String, String)> {
    let SetExpr::Select(select) = query.body.as_ref() else { return None };

    let any_aggregate = select
        .projection
        .iter()
        .any(|item| select_item_expr(item).map(contains_aggregate).unwrap_or(false));
    if !any_aggregate {
        return None;
    }

    let group_exprs: BTreeSet<String> = match &select.group_by {
        GroupByExpr::All => return None,
        GroupByExpr::Expressions(exprs) => exprs
            .iter()
            .flat_map(|e| [normalize(&e.to_string()), last_ident(e).unwrap_or_default()])
            .filter(|s| !s.is_empty())
            .collect(),
    };

    let mut offending = Vec::new();
    for item in &select.projection {
        let Some(expr) = select_item_expr(item) else { continue };
        if contains_aggregate(expr) || !contains_column_ref(expr) {
            continue;
        }
        let rendered = normalize(&expr.to_string());
        let bare = last_ident(expr).unwrap_or_default();
        let alias = match item {
            SelectItem::ExprWithAlias { alias, .. } => normalize(&alias.value),
            _ => String::new(),
        };
        let covered = group_exprs.contains(&rendered)
            || (!bare.is_empty() && group_exprs.contains(&bare))
            || (!alias.is_empty() && group_exprs.contains(&alias));
        if !covered {
            offending.push(expr.to_string());
        }
    }

    if offending.is_empty() {
        None
    } else {
        let list = offending.join(", ");
        Some((
            format!(
                "aggregate function present but selected column(s) {} missing from GROUP BY",
                list
            ),
            list,
        ))
    }
}

fn normalize(s: &str) -> String {
    s.replace('`', "").to_lowercase()
}

fn select_item_expr(item: &SelectItem) -> Option<&Expr> {
    match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        _ => None,
    }
}

fn last_ident(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(normalize(&ident.value)),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| normalize(&i.value)),
        _ => None,
    }
}

/// Aggregate detection ignores windowed calls: `RANK() OVER (...)` does not
/// force a GROUP BY.
fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    visit_expr(expr, &mut |e| {
        if let Expr::Function(Function { name, over: None, .. }) = e {
            if let Some(last) = name.0.last() {
                if AGGREGATE_FUNCTIONS.contains(&last.value.to_lowercase().as_str()) {
                    found = true;
                }
            }
        }
    });
    found
}

fn contains_column_ref(expr: &Expr) -> bool {
    let mut found = false;
    visit_expr(expr, &mut |e| {
        if matches!(e, Expr::Identifier(_) | Expr::CompoundIdentifier(_)) {
            found = true;
        }
    });
    found
}

fn walk_query(query: &Query, out: &mut Collected) {
    walk_set_expr(&query.body, out);
    for order in &query.order_by {
        walk_collect(&order.expr, out);
    }
}

fn walk_set_expr(set_expr: &SetExpr, out: &mut Collected) {
    match set_expr {
        SetExpr::Select(select) => walk_select(select, out),
        SetExpr::Query(query) => walk_query(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, out);
            walk_set_expr(right, out);
        }
        _ => {}
    }
}

fn walk_select(select: &Select, out: &mut Collected) {
    for item in &select.projection {
        if let SelectItem::ExprWithAlias { alias, .. } = item {
            out.aliases.insert(normalize(&alias.value));
        }
        if let Some(expr) = select_item_expr(item) {
            walk_collect(expr, out);
        }
    }
    for table in &select.from {
        walk_table_with_joins(table, out);
    }
    if let Some(selection) = &select.selection {
        walk_collect(selection, out);
    }
    if let GroupByExpr::Expressions(exprs) = &select.group_by {
        for expr in exprs {
            walk_collect(expr, out);
        }
    }
    if let Some(having) = &select.having {
        walk_collect(having, out);
    }
}

fn walk_table_with_joins(table: &TableWithJoins, out: &mut Collected) {
    walk_table_factor(&table.relation, out);
    for Join { relation, join_operator } in &table.joins {
        walk_table_factor(relation, out);
        match join_operator {
            JoinOperator::Inner(JoinConstraint::On(expr))
            | JoinOperator::LeftOuter(JoinConstraint::On(expr))
            | JoinOperator::RightOuter(JoinConstraint::On(expr))
            | JoinOperator::FullOuter(JoinConstraint::On(expr)) => walk_collect(expr, out),
            _ => {}
        }
    }
}

fn walk_table_factor(factor: &TableFactor, out: &mut Collected) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            if let Some(last) = name.0.last() {
                out.tables.push(last.value.clone());
            }
            if let Some(alias) = alias {
                out.aliases.insert(normalize(&alias.name.value));
            }
        }
        TableFactor::Derived { subquery, alias, .. } => {
            if let Some(alias) = alias {
                out.aliases.insert(normalize(&alias.name.value));
            }
            walk_query(subquery, out);
        }
        TableFactor::NestedJoin { table_with_joins, .. } => {
            walk_table_with_joins(table_with_joins, out)
        }
        _ => {}
    }
}

/// Collect bare column names (last identifier part) from an expression.
fn walk_collect(expr: &Expr, out: &mut Collected) {
    visit_expr(expr, &mut |e| match e {
        Expr::Identifier(ident) => {
            out.columns.insert(normalize(&ident.value));
        }
        Expr::CompoundIdentifier(parts) => {
            if let Some(last) = parts.last() {
                out.columns.insert(normalize(&last.value));
            }
        }
        Expr::Subquery(query)
        | Expr::Exists { subquery: query, .. }
        | Expr::InSubquery { subquery: query, .. } => {
            // Subqueries own their table scope but their columns still must
            // exist somewhere; collect them too.
            let mut inner = Collected::default();
            walk_query(query, &mut inner);
            out.tables.extend(inner.tables);
            out.columns.extend(inner.columns);
            out.aliases.extend(inner.aliases);
        }
        _ => {}
    });
}

/// Depth-first traversal over the expression forms the generator can emit.
fn visit_expr(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsFalse(expr) => visit_expr(expr, f),
        Expr::Cast { expr, .. } => visit_expr(expr, f),
        Expr::Between { expr, low, high, .. } => {
            visit_expr(expr, f);
            visit_expr(low, f);
            visit_expr(high, f);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            visit_expr(expr, f);
            visit_expr(pattern, f);
        }
        Expr::InList { expr, list, .. } => {
            visit_expr(expr, f);
            for item in list {
                visit_expr(item, f);
            }
        }
        Expr::InSubquery { expr, .. } => visit_expr(expr, f),
        Expr::Case { operand, conditions, results, else_result } => {
            if let Some(operand) = operand {
                visit_expr(operand, f);
            }
            for condition in conditions {
                visit_expr(condition, f);
            }
            for result in results {
                visit_expr(result, f);
            }
            if let Some(else_result) = else_result {
                visit_expr(else_result, f);
            }
        }
        Expr::Function(function) => {
            for arg in &function.args {
                if let FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
                | FunctionArg::Named { arg: FunctionArgExpr::Expr(expr), .. } = arg
                {
                    visit_expr(expr, f);
                }
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                visit_expr(item, f);
            }
        }
        _ => {}
    }
}
