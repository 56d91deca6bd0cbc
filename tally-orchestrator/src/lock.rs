// This file is part of the ElectionGuard tally orchestrator.

//! Distributed mutex keys with metadata and TTL, used to guard against
//! duplicate external submissions (e.g. `start_tally` called twice
//! concurrently for the same election).

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tally_common::model::{ElectionId, GuardianId};

use crate::{error::Result, kv::CoordinationStore};

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
	pub initiating_user: String,
	pub operation: String,
	pub started_at: chrono::DateTime<Utc>,
	pub context: String,
}

pub struct DistributedLock {
	store: Arc<dyn CoordinationStore>,
	default_ttl: Duration,
}

impl DistributedLock {
	pub fn new(store: Arc<dyn CoordinationStore>, default_ttl_seconds: u64) -> Self {
		Self { store, default_ttl: Duration::from_secs(default_ttl_seconds) }
	}

	pub fn tally_key(election_id: ElectionId) -> String {
		format!("lock:tally:election:{election_id}")
	}

	pub fn decryption_key(election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("lock:decryption:election:{election_id}:guardian:{guardian_id}")
	}

	pub fn combine_key(election_id: ElectionId) -> String {
		format!("lock:combine:election:{election_id}")
	}

	/// Installs `key` only if absent. Returns false if the lock is already
	/// held (fail closed: callers must treat this as "someone else has it",
	/// never crash or retry silently in a loop).
	pub async fn try_acquire(&self, key: &str, metadata: &LockMetadata) -> Result<bool> {
		self.try_acquire_with_ttl(key, metadata, self.default_ttl).await
	}

	pub async fn try_acquire_with_ttl(&self, key: &str, metadata: &LockMetadata, ttl: Duration) -> Result<bool> {
		let value = serde_json::to_string(metadata)?;
		self.store.set_nx(key, &value, ttl).await
	}

	pub async fn release(&self, key: &str) -> Result<()> {
		self.store.del(key).await
	}
}

#[cfg(test)]
mod test {
	use std::sync::Arc;

	use super::*;
	use crate::kv::MemoryStore;

	fn metadata() -> LockMetadata {
		LockMetadata { initiating_user: "admin".into(), operation: "start_tally".into(), started_at: Utc::now(), context: String::new() }
	}

	#[tokio::test]
	async fn second_acquire_fails_while_held() {
		let lock = DistributedLock::new(Arc::new(MemoryStore::new()), 7200);
		let key = DistributedLock::tally_key(ElectionId(1));
		assert!(lock.try_acquire(&key, &metadata()).await.unwrap());
		assert!(!lock.try_acquire(&key, &metadata()).await.unwrap());
	}

	#[tokio::test]
	async fn release_allows_reacquire() {
		let lock = DistributedLock::new(Arc::new(MemoryStore::new()), 7200);
		let key = DistributedLock::tally_key(ElectionId(1));
		assert!(lock.try_acquire(&key, &metadata()).await.unwrap());
		lock.release(&key).await.unwrap();
		assert!(lock.try_acquire(&key, &metadata()).await.unwrap());
	}
}
