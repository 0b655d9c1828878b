use itertools::Itertools;

/// positional placeholders for a multi-row insert with one parameter per row, e.g. `($1),($2)`
pub fn values_placeholders(rows: usize) -> String {
    (1..=rows).map(|index| format!("(${index})")).join(",")
}

pub fn table_size_query(table: &str) -> String {
    format!("select pg_total_relation_size('{table}')")
}
