pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Upstream call failed during {stage}: {message}")]
	UpstreamCall { stage: &'static str, message: String },
	#[error("Run cancelled.")]
	Cancelled,
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("State field {field} was already written.")]
	StateConflict { field: &'static str },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	pub(crate) fn upstream(stage: &'static str, err: impl std::fmt::Display) -> Self {
		Self::UpstreamCall { stage, message: err.to_string() }
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

impl From<onyx_storage::Error> for Error {
	fn from(err: onyx_storage::Error) -> Self {
		match err {
			onyx_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			onyx_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
		}
	}
}
