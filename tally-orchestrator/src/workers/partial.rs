// This file is part of the ElectionGuard tally orchestrator.

//! Partial-decryption worker: one guardian's share of one chunk's tally.

use std::sync::Arc;

use log::{error, info};
use tally_common::task::{ChunkState, PartialPayload, TaskPayload};
use tally_queue::QueueConsumer;

use crate::{
	credential_cache::CredentialCache,
	database::{queries, Database},
	engine_client::{EngineClient, GuardianData, PartialDecryptRequest},
	error::{OrchestratorError, Result},
	phase_controller::PhaseController,
	scheduler::{Scheduler, SchedulerPort},
	workers::DedupGuard,
};

pub async fn run(
	mut consumer: QueueConsumer,
	scheduler: Arc<Scheduler>,
	database: Database,
	engine: Arc<EngineClient>,
	credentials: Arc<CredentialCache>,
	phases: Arc<PhaseController>,
	dedup: Arc<DedupGuard>,
	parties: u32,
	candidates: u32,
) {
	loop {
		let Ok(Some((message, delivery))) = consumer.next().await else { break };
		let PartialPayload { election_id, chunk_id, guardian_id } = match &message.payload {
			TaskPayload::Partial(p) => p.clone(),
			_ => {
				error!("partial worker received non-partial payload for chunk {}", message.chunk_id);
				let _ = delivery.ack().await;
				continue;
			}
		};

		let dedup_key = DedupGuard::dedup_key("partial", election_id, &[guardian_id], chunk_id.0 as usize);
		let Some(_lease) = dedup.acquire(dedup_key) else {
			let _ = delivery.nack().await;
			continue;
		};

		scheduler.update_chunk_state(&message.chunk_id, ChunkState::Processing, None).await;

		let result = process(&database, &engine, &credentials, election_id, chunk_id, guardian_id, parties, candidates).await;
		match result {
			Ok(()) => {
				info!("partial chunk {chunk_id} completed for guardian {guardian_id} election {election_id}");
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Completed, None).await;
				if let Err(e) = phases.after_partial_completed(election_id, guardian_id).await {
					error!("phase-2 promotion failed for election {election_id} guardian {guardian_id}: {e}");
				}
			}
			Err(e) => {
				error!("partial chunk {chunk_id} failed for guardian {guardian_id} election {election_id}: {e}");
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Failed, Some(e.to_string())).await;
			}
		}
		let _ = delivery.ack().await;
	}
}

async fn process(
	database: &Database,
	engine: &EngineClient,
	credentials: &CredentialCache,
	election_id: tally_common::model::ElectionId,
	chunk_id: tally_common::model::ChunkId,
	guardian_id: tally_common::model::GuardianId,
	parties: u32,
	candidates: u32,
) -> Result<()> {
	let mut conn = database.conn().await?;

	let election = queries::get_election(&mut conn, election_id).await?.ok_or_else(|| OrchestratorError::state("election not found"))?;
	let guardian =
		queries::get_guardian(&mut conn, election_id, guardian_id).await?.ok_or_else(|| OrchestratorError::state("guardian not found"))?;
	let chunk = queries::get_chunk(&mut conn, chunk_id).await?.ok_or_else(|| OrchestratorError::state("chunk not found"))?;
	let ciphertext_tally = chunk.encrypted_tally.ok_or_else(|| OrchestratorError::state("chunk has no encrypted tally yet"))?;
	let submitted_ballots = queries::list_submitted_ballots(&mut conn, chunk_id).await?;

	let private_key = credentials
		.get_private_key(election_id, guardian_id)
		.await?
		.ok_or_else(|| OrchestratorError::state("guardian credentials absent from cache"))?;
	let polynomial = credentials
		.get_polynomial(election_id, guardian_id)
		.await?
		.ok_or_else(|| OrchestratorError::state("guardian credentials absent from cache"))?;

	let response = engine
		.partial_decrypt(PartialDecryptRequest {
			guardian_data: GuardianData { id: guardian.id, sequence_order: guardian.sequence_order as u32, public_key: Some(guardian.public_key.clone()) },
			private_key,
			public_key: guardian.public_key,
			polynomial,
			parties,
			candidates,
			ciphertext_tally,
			submitted_ballots,
			joint_public_key: election.joint_public_key,
			base_hash: election.base_hash,
			n: election.guardian_count as u32,
			k: election.quorum as u32,
		})
		.await?;

	let ballot_shares_blob = serde_json::to_vec(&response.ballot_shares)?;
	queries::upsert_decryption(&mut conn, chunk_id, guardian_id, &response.tally_share, &ballot_shares_blob, &response.guardian_public_key)
		.await?;
	Ok(())
}
