use time::OffsetDateTime;
use uuid::Uuid;

/// Audit row for a question produced by decomposition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubQuestionRecord {
	pub sub_question_id: Uuid,
	pub chat_session_id: Uuid,
	pub primary_message_id: Uuid,
	pub level: i32,
	pub level_question_num: i32,
	pub sub_question: String,
	pub created_at: OffsetDateTime,
}

/// Audit row for one rewritten retrieval query of a sub-question.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubQueryRecord {
	pub sub_query_id: Uuid,
	pub chat_session_id: Uuid,
	pub primary_message_id: Uuid,
	pub level: i32,
	pub level_question_num: i32,
	pub query_index: i32,
	pub sub_query: String,
	pub created_at: OffsetDateTime,
}
