// This file is part of the ElectionGuard tally orchestrator.

//! Tally-creation worker: fills in one chunk's `encrypted_tally` and the
//! ballots the engine accepted.

use std::sync::Arc;

use log::{error, info};
use tally_common::task::{ChunkState, TallyPayload};
use tally_queue::QueueConsumer;

use crate::{
	database::{queries, Database},
	engine_client::{EngineClient, TallyRequest},
	scheduler::SchedulerPort,
	workers::DedupGuard,
};

pub async fn run(
	mut consumer: QueueConsumer,
	scheduler: Arc<dyn SchedulerPort>,
	database: Database,
	engine: Arc<EngineClient>,
	dedup: Arc<DedupGuard>,
	parties: u32,
	candidates: u32,
) {
	loop {
		let Ok(Some((message, delivery))) = consumer.next().await else { break };
		let TallyPayload { election_id, chunk_id, ballot_ids } = match &message.payload {
			tally_common::task::TaskPayload::Tally(p) => p.clone(),
			_ => {
				error!("tally worker received non-tally payload for chunk {}", message.chunk_id);
				let _ = delivery.ack().await;
				continue;
			}
		};

		let dedup_key = DedupGuard::dedup_key("tally", election_id, &[], chunk_id.0 as usize);
		let Some(_lease) = dedup.acquire(dedup_key) else {
			let _ = delivery.nack().await;
			continue;
		};

		scheduler.update_chunk_state(&message.chunk_id, ChunkState::Processing, None).await;

		let result = process(&database, &engine, election_id, chunk_id, &ballot_ids, parties, candidates).await;
		match result {
			Ok(()) => {
				info!("tally chunk {chunk_id} completed for election {election_id}");
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Completed, None).await;
			}
			Err(e) => {
				error!("tally chunk {chunk_id} failed for election {election_id}: {e}");
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Failed, Some(e.to_string())).await;
			}
		}
		let _ = delivery.ack().await;
	}
}

async fn process(
	database: &Database,
	engine: &EngineClient,
	election_id: tally_common::model::ElectionId,
	chunk_id: tally_common::model::ChunkId,
	ballot_ids: &[tally_common::model::BallotId],
	parties: u32,
	candidates: u32,
) -> crate::error::Result<()> {
	let mut conn = database.conn().await?;

	let election = queries::get_election(&mut conn, election_id)
		.await?
		.ok_or_else(|| crate::error::OrchestratorError::state(format!("election {election_id} not found")))?;

	let mut ciphertexts = Vec::with_capacity(ballot_ids.len());
	for ballot_id in ballot_ids {
		let ballot = queries::get_ballot(&mut conn, *ballot_id)
			.await?
			.ok_or_else(|| crate::error::OrchestratorError::state(format!("ballot {ballot_id} not found")))?;
		ciphertexts.push(ballot.ciphertext);
	}

	let response = engine
		.tally(TallyRequest {
			parties,
			candidates,
			joint_public_key: election.joint_public_key,
			base_hash: election.base_hash,
			ciphertexts,
			n: election.guardian_count as u32,
			k: election.quorum as u32,
		})
		.await?;

	queries::set_chunk_encrypted_tally(&mut conn, chunk_id, &response.ciphertext_tally).await?;
	queries::insert_submitted_ballots(&mut conn, chunk_id, &response.submitted_ballots).await?;
	Ok(())
}
