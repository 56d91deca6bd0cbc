// This file is part of the ElectionGuard tally orchestrator.

//! Orchestrates the four phases of a tally and implements race-free
//! promotion between them. Three entry points correspond to external
//! admin/guardian actions (`start_tally`, `submit_guardian_keys`,
//! `combine_results`); the remaining two (`after_partial_completed`,
//! `after_compensated_completed`) are called by workers as chunks finish
//! and drive the "am I the last one?" promotion race.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tally_common::{
	model::{ElectionId, GuardianId},
	task::{CombinePayload, CompensatedPayload, PartialPayload, TallyPayload, TaskInstanceId, TaskPayload, TaskType},
};

use crate::{
	chunker,
	credential_cache::CredentialCache,
	database::{queries, Database},
	error::{OrchestratorError, Result},
	lock::{DistributedLock, LockMetadata},
	progress::ProgressCounters,
	scheduler::Scheduler,
};

pub struct PhaseController {
	scheduler: Arc<Scheduler>,
	database: Database,
	credentials: Arc<CredentialCache>,
	progress: Arc<ProgressCounters>,
	locks: Arc<DistributedLock>,
	chunk_target_size: usize,
	promotion_flag_ttl: Duration,
}

impl PhaseController {
	pub fn new(
		scheduler: Arc<Scheduler>,
		database: Database,
		credentials: Arc<CredentialCache>,
		progress: Arc<ProgressCounters>,
		locks: Arc<DistributedLock>,
		chunk_target_size: usize,
		promotion_flag_ttl: Duration,
	) -> Self {
		Self { scheduler, database, credentials, progress, locks, chunk_target_size, promotion_flag_ttl }
	}

	/// Precondition: election has ended and no chunks exist yet. Chunks the
	/// cast ballots, creates one empty `Chunk` row per chunk, and registers
	/// the `TALLY_CREATION` task instance.
	pub async fn start_tally(&self, election_id: ElectionId, initiating_user: &str) -> Result<TaskInstanceId> {
		let lock_key = DistributedLock::tally_key(election_id);
		self.acquire_lock_or_busy(&lock_key, initiating_user, "start_tally").await?;
		let result = self.start_tally_locked(election_id).await;
		self.locks.release(&lock_key).await?;
		result
	}

	async fn start_tally_locked(&self, election_id: ElectionId) -> Result<TaskInstanceId> {
		let mut conn = self.database.conn().await?;

		let election =
			queries::get_election(&mut conn, election_id).await?.ok_or_else(|| OrchestratorError::validation("no such election"))?;
		if election.ending_time > Utc::now() {
			return Err(OrchestratorError::validation("election has not ended"));
		}
		if queries::count_chunks(&mut conn, election_id).await? != 0 {
			return Err(OrchestratorError::validation("chunks already exist for this election"));
		}

		let ballot_ids = queries::list_cast_ballot_ids(&mut conn, election_id).await?;
		let chunks = chunker::chunk_ballots(&ballot_ids, self.chunk_target_size)?;

		let mut payloads = Vec::with_capacity(chunks.len());
		for chunk_ballots in chunks {
			let chunk_id = queries::create_chunk(&mut conn, election_id, chunk_ballots.len() as u32).await?;
			payloads.push(TaskPayload::Tally(TallyPayload { election_id, chunk_id, ballot_ids: chunk_ballots }));
		}

		Ok(self.scheduler.register_task(TaskType::TallyCreation, election_id, Vec::new(), payloads))
	}

	/// Decrypts and caches a guardian's key material, then registers one
	/// `PARTIAL_DECRYPTION` chunk per existing `Chunk` row.
	pub async fn submit_guardian_keys(
		&self,
		election_id: ElectionId,
		guardian_id: GuardianId,
		private_key: &[u8],
		polynomial: &[u8],
	) -> Result<TaskInstanceId> {
		let lock_key = DistributedLock::decryption_key(election_id, guardian_id);
		self.acquire_lock_or_busy(&lock_key, "guardian", "submit_guardian_keys").await?;
		let result = self.submit_guardian_keys_locked(election_id, guardian_id, private_key, polynomial).await;
		self.locks.release(&lock_key).await?;
		result
	}

	async fn submit_guardian_keys_locked(
		&self,
		election_id: ElectionId,
		guardian_id: GuardianId,
		private_key: &[u8],
		polynomial: &[u8],
	) -> Result<TaskInstanceId> {
		self.credentials.put(election_id, guardian_id, private_key, polynomial).await?;
		// A guardian may re-submit after a partial failure or an expired
		// cache window; without clearing these, a prior run's counters/
		// trigger flags would still read as "phase-1 already complete" and
		// promotion would never fire again for the fresh chunks below.
		self.progress.reset_guardian(election_id, guardian_id).await?;

		let mut conn = self.database.conn().await?;
		let chunk_ids = queries::list_chunk_ids(&mut conn, election_id).await?;
		if chunk_ids.is_empty() {
			return Err(OrchestratorError::validation("no chunks exist; run start_tally first"));
		}

		let payloads = chunk_ids
			.into_iter()
			.map(|chunk_id| TaskPayload::Partial(PartialPayload { election_id, chunk_id, guardian_id }))
			.collect();
		Ok(self.scheduler.register_task(TaskType::PartialDecryption, election_id, vec![guardian_id], payloads))
	}

	/// Called by a partial-decryption worker right after it persists its
	/// `Decryption` row. The worker that observes the counter reach the
	/// total chunk count, and then wins the single-shot trigger flag, is
	/// the one that performs phase-2 registration.
	pub async fn after_partial_completed(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<()> {
		let mut conn = self.database.conn().await?;
		let total_chunks = queries::count_chunks(&mut conn, election_id).await?;

		let counter_key = ProgressCounters::partial_counter_key(election_id, guardian_id);
		let count = self.progress.incr(&counter_key).await?;
		if count < total_chunks {
			return Ok(());
		}

		let trigger_key = ProgressCounters::compensated_queued_trigger_key(election_id, guardian_id);
		if !self.progress.set_flag_if_absent(&trigger_key, self.promotion_flag_ttl).await? {
			return Ok(());
		}

		let election =
			queries::get_election(&mut conn, election_id).await?.ok_or_else(|| OrchestratorError::state("election vanished"))?;

		if election.guardian_count == 1 {
			self.credentials.clear(election_id, guardian_id).await?;
			queries::mark_guardian_decrypted(&mut conn, election_id, guardian_id).await?;
			return Ok(());
		}

		if !self.credentials.has(election_id, guardian_id).await? {
			return Err(OrchestratorError::state("credentials absent at phase-2 registration; cache expired"));
		}

		let guardians = queries::list_guardians(&mut conn, election_id).await?;
		let chunk_ids = queries::list_chunk_ids(&mut conn, election_id).await?;
		let mut payloads = Vec::with_capacity(chunk_ids.len() * guardians.len().saturating_sub(1));
		for chunk_id in &chunk_ids {
			for other in &guardians {
				if other.id == guardian_id.0 {
					continue;
				}
				payloads.push(TaskPayload::Compensated(CompensatedPayload {
					election_id,
					chunk_id: *chunk_id,
					available_guardian_id: guardian_id,
					missing_guardian_id: tally_common::model::GuardianId(other.id),
				}));
			}
		}

		self.scheduler.register_task(TaskType::CompensatedDecryption, election_id, vec![guardian_id], payloads);
		Ok(())
	}

	/// Mirror of `after_partial_completed` for phase-2: when an available
	/// guardian's compensated-decryption count for all missing guardians
	/// across all chunks completes, the winner clears its credentials and
	/// marks itself decrypted.
	pub async fn after_compensated_completed(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<()> {
		let mut conn = self.database.conn().await?;
		let total_chunks = queries::count_chunks(&mut conn, election_id).await?;
		let guardian_count = queries::get_election(&mut conn, election_id).await?.map(|e| e.guardian_count).unwrap_or(0);
		let total = total_chunks * (guardian_count as i64 - 1).max(0);

		let counter_key = ProgressCounters::compensated_counter_key(election_id, guardian_id);
		let count = self.progress.incr(&counter_key).await?;
		if count < total {
			return Ok(());
		}

		let trigger_key = ProgressCounters::guardian_marked_trigger_key(election_id, guardian_id);
		if !self.progress.set_flag_if_absent(&trigger_key, self.promotion_flag_ttl).await? {
			return Ok(());
		}

		self.credentials.clear(election_id, guardian_id).await?;
		queries::mark_guardian_decrypted(&mut conn, election_id, guardian_id).await?;
		Ok(())
	}

	/// Precondition: every guardian decrypted, or the decrypted set is of
	/// size >= the election quorum. Registers one `COMBINE_DECRYPTION`
	/// chunk per existing `Chunk` row.
	pub async fn combine_results(&self, election_id: ElectionId) -> Result<TaskInstanceId> {
		let lock_key = DistributedLock::combine_key(election_id);
		self.acquire_lock_or_busy(&lock_key, "admin", "combine_results").await?;
		let result = self.combine_results_locked(election_id).await;
		self.locks.release(&lock_key).await?;
		result
	}

	async fn combine_results_locked(&self, election_id: ElectionId) -> Result<TaskInstanceId> {
		let mut conn = self.database.conn().await?;
		let election =
			queries::get_election(&mut conn, election_id).await?.ok_or_else(|| OrchestratorError::validation("no such election"))?;
		let guardians = queries::list_guardians(&mut conn, election_id).await?;
		let decrypted_count = guardians.iter().filter(|g| g.decrypted_flag).count() as i32;
		if decrypted_count < guardians.len() as i32 && decrypted_count < election.quorum {
			return Err(OrchestratorError::validation("not enough guardians decrypted to combine"));
		}

		let chunk_ids = queries::list_chunk_ids(&mut conn, election_id).await?;
		if chunk_ids.is_empty() {
			return Err(OrchestratorError::validation("no chunks exist"));
		}
		let payloads =
			chunk_ids.into_iter().map(|chunk_id| TaskPayload::Combine(CombinePayload { election_id, chunk_id })).collect();
		Ok(self.scheduler.register_task(TaskType::CombineDecryption, election_id, Vec::new(), payloads))
	}

	async fn acquire_lock_or_busy(&self, key: &str, initiating_user: &str, operation: &str) -> Result<()> {
		let metadata = LockMetadata {
			initiating_user: initiating_user.to_string(),
			operation: operation.to_string(),
			started_at: Utc::now(),
			context: String::new(),
		};
		if self.locks.try_acquire(key, &metadata).await? {
			Ok(())
		} else {
			Err(OrchestratorError::coordination(format!("{operation} already in progress for this key")))
		}
	}
}
