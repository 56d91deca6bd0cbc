// This file is part of the ElectionGuard tally orchestrator.

//! Atomic counters and one-shot trigger flags used to detect phase
//! completion without a coordinating process: whichever worker's `incr`
//! call observes the terminal count, and then wins the matching trigger
//! flag, is the one that performs promotion.

use std::{sync::Arc, time::Duration};

use tally_common::model::{ElectionId, GuardianId};

use crate::{error::Result, kv::CoordinationStore};

pub struct ProgressCounters {
	store: Arc<dyn CoordinationStore>,
	counter_ttl: Duration,
}

impl ProgressCounters {
	pub fn new(store: Arc<dyn CoordinationStore>, counter_ttl: Duration) -> Self {
		Self { store, counter_ttl }
	}

	pub fn partial_counter_key(election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("counter:partial:{election_id}:{guardian_id}")
	}

	pub fn compensated_counter_key(election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("counter:compensated:{election_id}:{guardian_id}")
	}

	pub fn compensated_queued_trigger_key(election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("trigger:compensated_queued:{election_id}:{guardian_id}")
	}

	pub fn guardian_marked_trigger_key(election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("trigger:guardian_marked:{election_id}:{guardian_id}")
	}

	/// Atomically increments `key`, attaching `counter_ttl` if this call
	/// creates it.
	pub async fn incr(&self, key: &str) -> Result<i64> {
		self.store.incr(key, self.counter_ttl).await
	}

	/// True iff this caller is the first to set `key` — the single-shot
	/// promotion guard. `ttl` should outlive the promotion body so a
	/// crash mid-promotion doesn't silently re-open the gate before the
	/// retry logic has a chance to notice the promotion never finished.
	pub async fn set_flag_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
		self.store.set_nx(key, "1", ttl).await
	}

	/// Clears every counter/trigger key for (election, guardian) so a fresh
	/// `PARTIAL_DECRYPTION` registration restarts phase-1 cleanly. Without
	/// this, a guardian that already completed phase-1 once would find its
	/// counters past the terminal count and its trigger flags already won,
	/// so `after_partial_completed`/`after_compensated_completed` would
	/// never fire promotion again on re-submission.
	pub async fn reset_guardian(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<()> {
		self.store.del(&Self::partial_counter_key(election_id, guardian_id)).await?;
		self.store.del(&Self::compensated_counter_key(election_id, guardian_id)).await?;
		self.store.del(&Self::compensated_queued_trigger_key(election_id, guardian_id)).await?;
		self.store.del(&Self::guardian_marked_trigger_key(election_id, guardian_id)).await?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::sync::Arc;

	use super::*;
	use crate::kv::MemoryStore;

	#[tokio::test]
	async fn incr_accumulates_per_key() {
		let counters = ProgressCounters::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
		let key = ProgressCounters::partial_counter_key(ElectionId(1), GuardianId(1));
		assert_eq!(counters.incr(&key).await.unwrap(), 1);
		assert_eq!(counters.incr(&key).await.unwrap(), 2);
	}

	#[tokio::test]
	async fn only_one_caller_wins_the_flag() {
		let counters = ProgressCounters::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
		let key = ProgressCounters::compensated_queued_trigger_key(ElectionId(1), GuardianId(1));
		let mut wins = 0;
		for _ in 0..5 {
			if counters.set_flag_if_absent(&key, Duration::from_secs(3600)).await.unwrap() {
				wins += 1;
			}
		}
		assert_eq!(wins, 1);
	}

	#[tokio::test]
	async fn reset_guardian_clears_counters_and_trigger_flags() {
		let counters = ProgressCounters::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
		let election_id = ElectionId(1);
		let guardian_id = GuardianId(1);

		counters.incr(&ProgressCounters::partial_counter_key(election_id, guardian_id)).await.unwrap();
		counters.incr(&ProgressCounters::compensated_counter_key(election_id, guardian_id)).await.unwrap();
		assert!(counters
			.set_flag_if_absent(&ProgressCounters::compensated_queued_trigger_key(election_id, guardian_id), Duration::from_secs(3600))
			.await
			.unwrap());
		assert!(counters
			.set_flag_if_absent(&ProgressCounters::guardian_marked_trigger_key(election_id, guardian_id), Duration::from_secs(3600))
			.await
			.unwrap());

		counters.reset_guardian(election_id, guardian_id).await.unwrap();

		// Counters restart from zero: the next `incr` returns 1, not a
		// continuation of the previous run.
		assert_eq!(counters.incr(&ProgressCounters::partial_counter_key(election_id, guardian_id)).await.unwrap(), 1);
		assert_eq!(counters.incr(&ProgressCounters::compensated_counter_key(election_id, guardian_id)).await.unwrap(), 1);
		// Trigger flags are open again for the next run to win.
		assert!(counters
			.set_flag_if_absent(&ProgressCounters::compensated_queued_trigger_key(election_id, guardian_id), Duration::from_secs(3600))
			.await
			.unwrap());
		assert!(counters
			.set_flag_if_absent(&ProgressCounters::guardian_marked_trigger_key(election_id, guardian_id), Duration::from_secs(3600))
			.await
			.unwrap());
	}
}
