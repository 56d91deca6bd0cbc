// This file is part of the ElectionGuard tally orchestrator.

//! Combine worker: aggregates a chunk's partial and compensated decryption
//! shares into the plaintext tally for that chunk.

use std::sync::Arc;

use log::{error, info};
use tally_common::{
	model::GuardianId,
	task::{ChunkState, CombinePayload, TaskPayload},
};
use tally_queue::QueueConsumer;

use crate::{
	database::{queries, Database},
	engine_client::{CombineRequest, CompensatingShare, EngineClient, GuardianData, GuardianShare},
	error::{OrchestratorError, Result},
	scheduler::{Scheduler, SchedulerPort},
	workers::DedupGuard,
};

pub async fn run(
	mut consumer: QueueConsumer,
	scheduler: Arc<Scheduler>,
	database: Database,
	engine: Arc<EngineClient>,
	dedup: Arc<DedupGuard>,
	parties: u32,
	candidates: u32,
) {
	loop {
		let Ok(Some((message, delivery))) = consumer.next().await else { break };
		let CombinePayload { election_id, chunk_id } = match &message.payload {
			TaskPayload::Combine(p) => p.clone(),
			_ => {
				error!("combine worker received non-combine payload for chunk {}", message.chunk_id);
				let _ = delivery.ack().await;
				continue;
			}
		};

		let dedup_key = DedupGuard::dedup_key("combine", election_id, &[], chunk_id.0 as usize);
		let Some(_lease) = dedup.acquire(dedup_key) else {
			let _ = delivery.nack().await;
			continue;
		};

		scheduler.update_chunk_state(&message.chunk_id, ChunkState::Processing, None).await;

		let result = process(&database, &engine, election_id, chunk_id, parties, candidates).await;
		match result {
			Ok(()) => {
				info!("combine chunk {chunk_id} completed for election {election_id}");
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Completed, None).await;
			}
			Err(e) => {
				error!("combine chunk {chunk_id} failed for election {election_id}: {e}");
				scheduler.update_chunk_state(&message.chunk_id, ChunkState::Failed, Some(e.to_string())).await;
			}
		}
		let _ = delivery.ack().await;
	}
}

/// Gathers, per the guardian's current `decrypted_flag`, either its partial
/// decryption (available) or the compensated decryptions computed on its
/// behalf (missing), choosing the compensating guardian in ascending
/// sequence order when more than one is on record for the same missing
/// guardian.
async fn process(
	database: &Database,
	engine: &EngineClient,
	election_id: tally_common::model::ElectionId,
	chunk_id: tally_common::model::ChunkId,
	parties: u32,
	candidates: u32,
) -> Result<()> {
	let mut conn = database.conn().await?;

	let election = queries::get_election(&mut conn, election_id).await?.ok_or_else(|| OrchestratorError::state("election not found"))?;
	let chunk = queries::get_chunk(&mut conn, chunk_id).await?.ok_or_else(|| OrchestratorError::state("chunk not found"))?;
	let ciphertext_tally = chunk.encrypted_tally.ok_or_else(|| OrchestratorError::state("chunk has no encrypted tally yet"))?;
	let submitted_ballots = queries::list_submitted_ballots(&mut conn, chunk_id).await?;
	let guardians = queries::list_guardians(&mut conn, election_id).await?;

	let guardian_data: Vec<GuardianData> = guardians
		.iter()
		.map(|g| GuardianData { id: g.id, sequence_order: g.sequence_order as u32, public_key: Some(g.public_key.clone()) })
		.collect();

	let mut available_shares = Vec::new();
	for guardian in guardians.iter().filter(|g| g.decrypted_flag) {
		let decryption = queries::get_decryption(&mut conn, chunk_id, GuardianId(guardian.id))
			.await?
			.ok_or_else(|| OrchestratorError::state(format!("missing partial decryption for decrypted guardian {}", guardian.id)))?;
		available_shares.push(GuardianShare {
			guardian_id: guardian.id,
			public_key: guardian.public_key.clone(),
			tally_share: decryption.tally_share,
			ballot_shares_blob: decryption.ballot_shares_blob,
		});
	}

	let compensated_rows = queries::list_compensated_for_chunk(&mut conn, chunk_id).await?;
	let sequence_of = |id: i64| guardians.iter().find(|g| g.id == id).map(|g| g.sequence_order).unwrap_or(i32::MAX);

	let mut compensating_shares = Vec::new();
	for guardian in guardians.iter().filter(|g| !g.decrypted_flag) {
		let mut candidates_for_missing: Vec<_> =
			compensated_rows.iter().filter(|row| row.missing_guardian_id == guardian.id).collect();
		candidates_for_missing.sort_by_key(|row| sequence_of(row.compensating_guardian_id));
		let chosen = candidates_for_missing.first().ok_or_else(|| {
			OrchestratorError::state(format!("no compensated decryption on record for missing guardian {}", guardian.id))
		})?;
		compensating_shares.push(CompensatingShare {
			missing_guardian_id: chosen.missing_guardian_id,
			compensating_guardian_id: chosen.compensating_guardian_id,
			tally_share: chosen.tally_share.clone(),
			ballot_shares_blob: chosen.ballot_shares_blob.clone(),
		});
	}

	let response = engine
		.combine(CombineRequest {
			parties,
			candidates,
			ciphertext_tally,
			submitted_ballots,
			joint_public_key: election.joint_public_key,
			base_hash: election.base_hash,
			n: election.guardian_count as u32,
			k: election.quorum as u32,
			guardian_data,
			available_shares,
			compensating_shares,
		})
		.await?;

	queries::set_chunk_plaintext_result(&mut conn, chunk_id, &response.results).await?;
	Ok(())
}
