// This file is part of the ElectionGuard tally orchestrator.

#![forbid(unsafe_code)]

//! Durable work queue substrate built on AMQP. One queue per task type,
//! `prefetch=1`, at-least-once delivery. The scheduler is the only
//! publisher; worker loops are the only consumers.

pub mod error;
pub mod message;
pub mod substrate;

pub use error::{QueueError, Result};
pub use message::QueueMessage;
pub use substrate::{Delivery, QueueConsumer, QueueSubstrate};

#[cfg(test)]
mod test {
	use tally_common::{
		model::{ChunkId, ElectionId},
		task::{ChunkDescriptorId, TallyPayload, TaskInstanceId, TaskPayload, TaskType},
	};

	use super::*;

	#[test]
	fn message_round_trips_through_json() {
		let message = QueueMessage {
			chunk_id: ChunkDescriptorId { task_instance_id: TaskInstanceId::new(TaskType::TallyCreation, ElectionId(1), None), sequence: 0 },
			payload: TaskPayload::Tally(TallyPayload { election_id: ElectionId(1), chunk_id: ChunkId(1), ballot_ids: vec![] }),
			attempt: 0,
		};
		let json = serde_json::to_string(&message).unwrap();
		let back: QueueMessage = serde_json::from_str(&json).unwrap();
		assert_eq!(back.chunk_id, message.chunk_id);
		assert_eq!(back.payload.task_type(), TaskType::TallyCreation);
	}
}
