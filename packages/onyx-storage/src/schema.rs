const INIT_SQL: &str = include_str!("../sql/init.sql");

/// Schema statements in execution order.
pub fn statements() -> Vec<&'static str> {
	INIT_SQL.split(';').map(str::trim).filter(|statement| !statement.is_empty()).collect()
}
