// This file is part of the ElectionGuard tally orchestrator.

use thiserror::Error;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum QueueError {
	#[error(transparent)]
	Amqp(#[from] lapin::Error),
	#[error(transparent)]
	Encode(#[from] serde_json::Error),
	#[error("queue substrate is shutting down")]
	ShuttingDown,
}

impl From<QueueError> for tally_common::Error {
	fn from(e: QueueError) -> Self {
		tally_common::Error::coordination(e.to_string())
	}
}
