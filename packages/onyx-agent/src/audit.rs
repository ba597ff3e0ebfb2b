use time::OffsetDateTime;
use uuid::Uuid;

use onyx_storage::{
	db::Db,
	models::{SubQueryRecord, SubQuestionRecord},
	queries,
};

use crate::{BoxFuture, Error, Question, QuestionId, Result};

/// Keys every audit row is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
	pub chat_session_id: Uuid,
	pub primary_message_id: Uuid,
}
impl SessionKeys {
	pub fn new() -> Self {
		Self { chat_session_id: Uuid::new_v4(), primary_message_id: Uuid::new_v4() }
	}
}
impl Default for SessionKeys {
	fn default() -> Self {
		Self::new()
	}
}

/// Audit trail for decomposition and query rewriting. Answers never depend on it.
pub trait AuditSink
where
	Self: Send + Sync,
{
	fn record_sub_questions<'a>(
		&'a self,
		keys: SessionKeys,
		questions: &'a [Question],
	) -> BoxFuture<'a, Result<()>>;

	fn record_sub_queries<'a>(
		&'a self,
		keys: SessionKeys,
		question: QuestionId,
		queries: &'a [String],
	) -> BoxFuture<'a, Result<()>>;
}

pub struct NoopAuditSink;
impl AuditSink for NoopAuditSink {
	fn record_sub_questions<'a>(
		&'a self,
		_keys: SessionKeys,
		_questions: &'a [Question],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn record_sub_queries<'a>(
		&'a self,
		_keys: SessionKeys,
		_question: QuestionId,
		_queries: &'a [String],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async { Ok(()) })
	}
}

/// Writes audit rows to Postgres. Each call takes its own pooled connection and transaction.
#[derive(Clone)]
pub struct PgAuditSink {
	db: Db,
}
impl PgAuditSink {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}
impl AuditSink for PgAuditSink {
	fn record_sub_questions<'a>(
		&'a self,
		keys: SessionKeys,
		questions: &'a [Question],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let mut records = Vec::with_capacity(questions.len());

			for question in questions {
				records.push(SubQuestionRecord {
					sub_question_id: Uuid::new_v4(),
					chat_session_id: keys.chat_session_id,
					primary_message_id: keys.primary_message_id,
					level: to_i32(question.id.level, "level")?,
					level_question_num: to_i32(question.id.ordinal, "level_question_num")?,
					sub_question: question.text.clone(),
					created_at: now,
				});
			}

			queries::insert_sub_questions(&self.db.pool, &records).await?;

			Ok(())
		})
	}

	fn record_sub_queries<'a>(
		&'a self,
		keys: SessionKeys,
		question: QuestionId,
		sub_queries: &'a [String],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let level = to_i32(question.level, "level")?;
			let level_question_num = to_i32(question.ordinal, "level_question_num")?;
			let mut records = Vec::with_capacity(sub_queries.len());

			for (idx, query) in sub_queries.iter().enumerate() {
				records.push(SubQueryRecord {
					sub_query_id: Uuid::new_v4(),
					chat_session_id: keys.chat_session_id,
					primary_message_id: keys.primary_message_id,
					level,
					level_question_num,
					query_index: to_i32(idx, "query_index")?,
					sub_query: query.clone(),
					created_at: now,
				});
			}

			queries::insert_sub_queries(&self.db.pool, &records).await?;

			Ok(())
		})
	}
}

fn to_i32<T>(value: T, field: &str) -> Result<i32>
where
	T: TryInto<i32>,
{
	value
		.try_into()
		.map_err(|_| Error::InvalidRequest { message: format!("{field} does not fit in i32.") })
}
