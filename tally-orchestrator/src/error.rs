// This file is part of the ElectionGuard tally orchestrator.

use thiserror::Error;

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("validation failed: {0}")]
	Validation(String),
	#[error("engine error: {0}")]
	Engine(String),
	#[error("state error: {0}")]
	State(String),
	#[error("coordination store error: {0}")]
	Coordination(String),
	#[error(transparent)]
	Storage(#[from] sqlx::Error),
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	Queue(#[from] tally_queue::QueueError),
	#[error(transparent)]
	Encode(#[from] serde_json::Error),
}

impl OrchestratorError {
	pub fn validation(msg: impl Into<String>) -> Self {
		Self::Validation(msg.into())
	}

	pub fn engine(msg: impl Into<String>) -> Self {
		Self::Engine(msg.into())
	}

	pub fn state(msg: impl Into<String>) -> Self {
		Self::State(msg.into())
	}

	pub fn coordination(msg: impl Into<String>) -> Self {
		Self::Coordination(msg.into())
	}

	/// Whether a failure of this kind is worth retrying the chunk for,
	/// mirroring the taxonomy used by the scheduler's retry path.
	pub fn retryable(&self) -> bool {
		matches!(self, Self::Engine(_) | Self::Storage(_) | Self::Redis(_) | Self::Http(_) | Self::Queue(_) | Self::Encode(_))
	}
}

impl From<tally_common::Error> for OrchestratorError {
	fn from(e: tally_common::Error) -> Self {
		match e {
			tally_common::Error::Validation(m) => Self::Validation(m),
			tally_common::Error::Engine(m) => Self::Engine(m),
			tally_common::Error::State(m) => Self::State(m),
			tally_common::Error::Coordination(m) => Self::Coordination(m),
			other => Self::State(other.to_string()),
		}
	}
}

impl From<OrchestratorError> for tally_common::Error {
	fn from(e: OrchestratorError) -> Self {
		match e {
			OrchestratorError::Validation(m) => tally_common::Error::validation(m),
			OrchestratorError::Engine(m) => tally_common::Error::Engine(m),
			OrchestratorError::State(m) => tally_common::Error::state(m),
			OrchestratorError::Coordination(m) => tally_common::Error::coordination(m),
			other => tally_common::Error::storage(other.to_string()),
		}
	}
}
