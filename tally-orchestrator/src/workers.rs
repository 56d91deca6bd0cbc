// This file is part of the ElectionGuard tally orchestrator.

//! One worker family per task type. Each pulls from its matching queue,
//! reports state back through `SchedulerPort`, and loads only the
//! row-scoped state its chunk requires.

pub mod combine;
pub mod compensated;
pub mod partial;
pub mod tally;

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tally_common::model::{ElectionId, GuardianId};

/// In-process dedup guard keyed by `(task_type, election_id, guardian_ids,
/// chunk_number)`, held for the duration of one message's processing so a
/// worker never double-processes a chunk it's already holding (e.g. if the
/// broker redelivers while the first delivery is still in flight).
#[derive(Default)]
pub struct DedupGuard {
	held: Mutex<HashSet<String>>,
}

pub struct DedupLease {
	guard: Arc<DedupGuard>,
	key: String,
}

impl Drop for DedupLease {
	fn drop(&mut self) {
		self.guard.held.lock().remove(&self.key);
	}
}

impl DedupGuard {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn dedup_key(task_type: &str, election_id: ElectionId, guardian_ids: &[GuardianId], chunk_number: usize) -> String {
		format!("{task_type}:{election_id}:{guardian_ids:?}:{chunk_number}")
	}

	/// Attempts to acquire the lease; `None` if another in-flight delivery
	/// for the same key already holds it.
	pub fn acquire(self: &Arc<Self>, key: String) -> Option<DedupLease> {
		let mut held = self.held.lock();
		if held.contains(&key) {
			None
		} else {
			held.insert(key.clone());
			Some(DedupLease { guard: Arc::clone(self), key })
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn second_acquire_fails_while_first_lease_held() {
		let guard = DedupGuard::new();
		let lease = guard.acquire("k".to_string());
		assert!(lease.is_some());
		assert!(guard.acquire("k".to_string()).is_none());
		drop(lease);
		assert!(guard.acquire("k".to_string()).is_some());
	}
}
