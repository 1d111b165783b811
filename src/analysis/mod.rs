//! Result presentation: data summaries plus table/chart JSON export for
//! the accepted query's rows.

pub mod chart;
pub mod summary;
pub mod table;

pub use chart::{create_chart, plan_chart, ChartPlan, ChartType};
pub use summary::data_summary;
pub use table::create_table;
