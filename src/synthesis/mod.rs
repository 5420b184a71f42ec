mod answer;
mod sql;

pub use answer::synthesize_answer;
pub use sql::synthesize_sql;
