use sqlx::PgPool;
use uuid::Uuid;

use crate::{
	Error, Result,
	models::{SubQueryRecord, SubQuestionRecord},
};

/// Records decomposition output. Rows already stored for the same message and question identity
/// are left untouched.
pub async fn insert_sub_questions(pool: &PgPool, records: &[SubQuestionRecord]) -> Result<()> {
	if records.is_empty() {
		return Ok(());
	}

	if records.iter().any(|record| record.sub_question.trim().is_empty()) {
		return Err(Error::InvalidArgument("sub_question must be non-empty.".to_string()));
	}

	let mut tx = pool.begin().await?;

	for record in records {
		sqlx::query(
			"\
INSERT INTO agent_sub_questions (
	sub_question_id,
	chat_session_id,
	primary_message_id,
	level,
	level_question_num,
	sub_question,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (primary_message_id, level, level_question_num) DO NOTHING",
		)
		.bind(record.sub_question_id)
		.bind(record.chat_session_id)
		.bind(record.primary_message_id)
		.bind(record.level)
		.bind(record.level_question_num)
		.bind(record.sub_question.as_str())
		.bind(record.created_at)
		.execute(&mut *tx)
		.await?;
	}

	tx.commit().await?;

	Ok(())
}

pub async fn insert_sub_queries(pool: &PgPool, records: &[SubQueryRecord]) -> Result<()> {
	if records.is_empty() {
		return Ok(());
	}

	let mut tx = pool.begin().await?;

	for record in records {
		sqlx::query(
			"\
INSERT INTO agent_sub_queries (
	sub_query_id,
	chat_session_id,
	primary_message_id,
	level,
	level_question_num,
	query_index,
	sub_query,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (primary_message_id, level, level_question_num, query_index) DO NOTHING",
		)
		.bind(record.sub_query_id)
		.bind(record.chat_session_id)
		.bind(record.primary_message_id)
		.bind(record.level)
		.bind(record.level_question_num)
		.bind(record.query_index)
		.bind(record.sub_query.as_str())
		.bind(record.created_at)
		.execute(&mut *tx)
		.await?;
	}

	tx.commit().await?;

	Ok(())
}

pub async fn list_sub_questions(
	pool: &PgPool,
	primary_message_id: Uuid,
) -> Result<Vec<SubQuestionRecord>> {
	let rows = sqlx::query_as::<_, SubQuestionRecord>(
		"\
SELECT
	sub_question_id,
	chat_session_id,
	primary_message_id,
	level,
	level_question_num,
	sub_question,
	created_at
FROM agent_sub_questions
WHERE primary_message_id = $1
ORDER BY level, level_question_num",
	)
	.bind(primary_message_id)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

pub async fn list_sub_queries(
	pool: &PgPool,
	primary_message_id: Uuid,
) -> Result<Vec<SubQueryRecord>> {
	let rows = sqlx::query_as::<_, SubQueryRecord>(
		"\
SELECT
	sub_query_id,
	chat_session_id,
	primary_message_id,
	level,
	level_question_num,
	query_index,
	sub_query,
	created_at
FROM agent_sub_queries
WHERE primary_message_id = $1
ORDER BY level, level_question_num, query_index",
	)
	.bind(primary_message_id)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}
