// This file is part of the ElectionGuard tally orchestrator.

use serde::{Deserialize, Serialize};
use tally_common::task::{ChunkDescriptorId, TaskPayload};

/// The envelope carried on the wire. Ordering across chunks of the same
/// task is best-effort; correctness never depends on it, only on the
/// scheduler's publication order, so the envelope carries no sequence
/// number beyond what's already in `chunk_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
	pub chunk_id: ChunkDescriptorId,
	pub payload: TaskPayload,
	/// Attempt number as tracked by the scheduler, echoed back on
	/// redelivery so a worker can log which retry it's handling. The
	/// scheduler, not the queue substrate, is the authority on retry counts.
	pub attempt: u32,
}
