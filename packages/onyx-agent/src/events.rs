use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Which stream a `StreamFinished` event closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum StreamKind {
	SubQuestions { level: u32 },
	SubAnswer { level: u32, ordinal: u32 },
	Answer { level: u32 },
	Run,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
	SubQuestionToken { level: u32, token: String },
	SubQueryToken { level: u32, ordinal: u32, query_index: usize, token: String },
	SubAnswerToken { level: u32, ordinal: u32, token: String },
	AnswerToken { level: u32, token: String },
	ToolResponse { name: String, response: Value },
	StreamFinished(StreamKind),
	RefinedAnswerImprovement { improved: bool },
}

/// Append-only channel every streaming stage writes to.
///
/// Consumers drain the receiver on their own schedule. A dropped receiver turns emits into no-ops
/// so producers never fail on a departed listener.
#[derive(Debug, Clone)]
pub struct EventSink {
	tx: UnboundedSender<AgentEvent>,
}
impl EventSink {
	pub fn channel() -> (Self, UnboundedReceiver<AgentEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();

		(Self { tx }, rx)
	}

	pub fn emit(&self, event: AgentEvent) {
		if self.tx.send(event).is_err() {
			tracing::trace!("Event receiver dropped; discarding event.");
		}
	}

	pub fn finish(&self, kind: StreamKind) {
		self.emit(AgentEvent::StreamFinished(kind));
	}
}
