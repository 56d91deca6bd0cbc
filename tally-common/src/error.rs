// This file is part of the ElectionGuard tally orchestrator.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tally-orchestrator error taxonomy.
///
/// Each variant corresponds to one of the categories in the error handling
/// design: inputs that fail preconditions are `Validation`, the
/// cryptographic engine's RPC surface raises `Engine`, rows or registry
/// entries found in an unexpected state raise `State`, the coordination
/// store raises `Coordination`, and the persistent store raises `Storage`.
#[derive(Debug, Error)]
pub enum Error {
	/// Caller-supplied input failed a precondition. No side effects occur.
	#[error("validation failed: {0}")]
	Validation(String),

	/// The cryptographic engine's RPC surface returned a transport or
	/// protocol-level error. Retried up to `engine.retry.max` by the caller.
	#[error("engine error: {0}")]
	Engine(String),

	/// A required field on an engine response was null, or a row/registry
	/// entry was not in the state an operation expected. Not retryable.
	#[error("state error: {0}")]
	State(String),

	/// The atomic coordination store (locks, counters, credential cache)
	/// was unavailable. Treated conservatively: fail closed.
	#[error("coordination store error: {0}")]
	Coordination(String),

	#[error("storage error: {0}")]
	Storage(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Env(#[from] std::env::VarError),
}

impl Error {
	pub fn validation(msg: impl Into<String>) -> Self {
		Self::Validation(msg.into())
	}

	pub fn state(msg: impl Into<String>) -> Self {
		Self::State(msg.into())
	}

	pub fn coordination(msg: impl Into<String>) -> Self {
		Self::Coordination(msg.into())
	}

	pub fn storage(msg: impl Into<String>) -> Self {
		Self::Storage(msg.into())
	}

	/// Whether an operation that produced this error is worth retrying
	/// per the propagation policy in the error handling design.
	pub fn retryable(&self) -> bool {
		matches!(self, Error::Engine(_) | Error::Storage(_) | Error::Io(_))
	}
}
