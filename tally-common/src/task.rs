// This file is part of the ElectionGuard tally orchestrator.

//! The scheduler's task/chunk vocabulary and the tagged payload variants
//! that carry worker-scoped data on the wire instead of dynamic JSON blobs.

use serde::{Deserialize, Serialize};

use crate::model::{BallotId, ChunkId, ElectionId, GuardianId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
	TallyCreation,
	PartialDecryption,
	CompensatedDecryption,
	CombineDecryption,
}

impl TaskType {
	/// Stable routing key / queue name for this task type, used by both the
	/// in-memory scheduler registry and the queue substrate.
	pub const fn queue_name(self) -> &'static str {
		match self {
			TaskType::TallyCreation => "tally.creation",
			TaskType::PartialDecryption => "tally.partial_decryption",
			TaskType::CompensatedDecryption => "tally.compensated_decryption",
			TaskType::CombineDecryption => "tally.combine_decryption",
		}
	}

	pub const ALL: [TaskType; 4] =
		[TaskType::TallyCreation, TaskType::PartialDecryption, TaskType::CompensatedDecryption, TaskType::CombineDecryption];
}

impl std::fmt::Display for TaskType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.queue_name())
	}
}

/// Chunk descriptor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
	Pending,
	Queued,
	Processing,
	Completed,
	Failed,
}

impl ChunkState {
	/// Terminal states never transition again.
	pub fn is_terminal(self) -> bool {
		matches!(self, ChunkState::Completed | ChunkState::Failed)
	}
}

/// One tagged payload variant per task type. Each variant carries exactly
/// the fields a worker for that task type needs to load its row-scoped
/// state and build an engine request — nothing more, so a worker can never
/// accidentally reach into another chunk's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TaskPayload {
	Tally(TallyPayload),
	Partial(PartialPayload),
	Compensated(CompensatedPayload),
	Combine(CombinePayload),
}

impl TaskPayload {
	pub fn task_type(&self) -> TaskType {
		match self {
			TaskPayload::Tally(_) => TaskType::TallyCreation,
			TaskPayload::Partial(_) => TaskType::PartialDecryption,
			TaskPayload::Compensated(_) => TaskType::CompensatedDecryption,
			TaskPayload::Combine(_) => TaskType::CombineDecryption,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyPayload {
	pub election_id: ElectionId,
	pub chunk_id: ChunkId,
	/// Exactly this chunk's ballots — a worker never queries the full
	/// election's ballot set.
	pub ballot_ids: Vec<BallotId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialPayload {
	pub election_id: ElectionId,
	pub chunk_id: ChunkId,
	pub guardian_id: GuardianId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensatedPayload {
	pub election_id: ElectionId,
	pub chunk_id: ChunkId,
	pub available_guardian_id: GuardianId,
	pub missing_guardian_id: GuardianId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinePayload {
	pub election_id: ElectionId,
	pub chunk_id: ChunkId,
}

/// Identifies a single task instance across the scheduler, the queue
/// substrate and progress APIs. Opaque to callers beyond equality/display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskInstanceId(pub String);

impl std::fmt::Display for TaskInstanceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl TaskInstanceId {
	/// Builds a stable, human-legible id: `{task_type}:{election}[:{guardians}]:{uuid}`.
	pub fn new(task_type: TaskType, election_id: ElectionId, discriminator: Option<&str>) -> Self {
		let uuid = uuid::Uuid::new_v4();
		match discriminator {
			Some(d) => Self(format!("{}:{}:{}:{}", task_type, election_id, d, uuid)),
			None => Self(format!("{}:{}:{}", task_type, election_id, uuid)),
		}
	}
}

/// Globally unique identifier for one chunk descriptor within a task
/// instance: `{task_instance_id}#{sequence}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkDescriptorId {
	pub task_instance_id: TaskInstanceId,
	pub sequence: usize,
}

impl std::fmt::Display for ChunkDescriptorId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}#{}", self.task_instance_id, self.sequence)
	}
}
