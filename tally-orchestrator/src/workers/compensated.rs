// This file is part of the ElectionGuard tally orchestrator.

//! Compensated-decryption worker: an available guardian's share computed
//! on behalf of a missing guardian, for one chunk.

use std::sync::Arc;

use log::{error, info};
use tally_common::task::{ChunkState, CompensatedPayload, TaskPayload};
use tally_queue::QueueConsumer;

use crate::{
	credential_cache::CredentialCache,
	database::{queries, Database},
	engine_client::{CompensatedDecryptRequest, EngineClient, GuardianData},
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
		let CompensatedPayload { election_id, chunk_id, available_guardian_id, missing_guardian_id } = match &message.payload {
			TaskPayload::Compensated(p) => p.clone(),
			_ => {
				error!("compensated worker received non-compensated payload for chunk {}", message.chunk_id);
				let _ = delivery.ack().await;
				continue;
			}
		};

		let dedup_key =
			DedupGuard::dedup_key("compensated", election_id, &[available_guardian_id, missing_guardian_id], chunk_id.0 as usize);
		let Some(_lease) = dedup.acquire(dedup_key) else {
			let _ = delivery.nack().await;
			continue;
		};

		scheduler.update_chunk_state(&message.chunk_id, ChunkState::Processing, None).await;

		let result =
			process(&database, &engine, &credentials, election_id, chunk_id, available_guardian_id, missing_guardian_id, parties, candidates)
				.await;
		match result {
			Ok(()) => {
				info!(
					"compensated chunk {chunk_id} completed: available={available_guardian_id} missing={missing_guardian_id} election={election_id}"
				);
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Completed, None).await;
				if let Err(e) = phases.after_compensated_completed(election_id, available_guardian_id).await {
					error!("phase promotion failed for election {election_id} guardian {available_guardian_id}: {e}");
				}
			}
			Err(e) => {
				error!("compensated chunk {chunk_id} failed for election {election_id}: {e}");
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
	available_guardian_id: tally_common::model::GuardianId,
	missing_guardian_id: tally_common::model::GuardianId,
	parties: u32,
	candidates: u32,
) -> Result<()> {
	let mut conn = database.conn().await?;

	let election = queries::get_election(&mut conn, election_id).await?.ok_or_else(|| OrchestratorError::state("election not found"))?;
	let available = queries::get_guardian(&mut conn, election_id, available_guardian_id)
		.await?
		.ok_or_else(|| OrchestratorError::state("available guardian not found"))?;
	let missing = queries::get_guardian(&mut conn, election_id, missing_guardian_id)
		.await?
		.ok_or_else(|| OrchestratorError::state("missing guardian not found"))?;
	let chunk = queries::get_chunk(&mut conn, chunk_id).await?.ok_or_else(|| OrchestratorError::state("chunk not found"))?;
	let ciphertext_tally = chunk.encrypted_tally.ok_or_else(|| OrchestratorError::state("chunk has no encrypted tally yet"))?;
	let submitted_ballots = queries::list_submitted_ballots(&mut conn, chunk_id).await?;

	let available_private_key = credentials
		.get_private_key(election_id, available_guardian_id)
		.await?
		.ok_or_else(|| OrchestratorError::state("guardian credentials absent from cache"))?;
	let available_polynomial = credentials
		.get_polynomial(election_id, available_guardian_id)
		.await?
		.ok_or_else(|| OrchestratorError::state("guardian credentials absent from cache"))?;

	// `key_backup_blob` stands in for the missing guardian's own data when
	// present; otherwise the engine accepts the minimal id/sequence form.
	let missing_guardian_data = GuardianData {
		id: missing.id,
		sequence_order: missing.sequence_order as u32,
		public_key: if missing.key_backup_blob.is_empty() { None } else { Some(missing.key_backup_blob.clone()) },
	};

	let response = engine
		.compensated_decrypt(CompensatedDecryptRequest {
			available_guardian_data: GuardianData {
				id: available.id,
				sequence_order: available.sequence_order as u32,
				public_key: Some(available.public_key.clone()),
			},
			available_private_key,
			available_public_key: available.public_key,
			available_polynomial,
			missing_guardian_data,
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

	let ballot_shares_blob = serde_json::to_vec(&response.compensated_ballot_shares)?;
	queries::upsert_compensated_decryption(
		&mut conn,
		chunk_id,
		missing_guardian_id,
		available_guardian_id,
		&response.compensated_tally_share,
		&ballot_shares_blob,
	)
	.await?;
	Ok(())
}
