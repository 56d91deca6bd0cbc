// This file is part of the ElectionGuard tally orchestrator.

//! Transient, TTL-bounded store for decrypted guardian key material. Never
//! persisted to durable storage; entries self-expire on the coordination
//! store so a crashed or abandoned phase cannot wedge sensitive material in
//! memory indefinitely.

use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tally_common::model::{ElectionId, GuardianId};

use crate::{
	error::{OrchestratorError, Result},
	kv::CoordinationStore,
};

pub struct CredentialCache {
	store: Arc<dyn CoordinationStore>,
	key_prefix: String,
	ttl: Duration,
}

impl CredentialCache {
	pub fn new(store: Arc<dyn CoordinationStore>, key_prefix: impl Into<String>, ttl_minutes: u64) -> Self {
		Self { store, key_prefix: key_prefix.into(), ttl: Duration::from_secs(ttl_minutes * 60) }
	}

	fn private_key_key(&self, election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("{}:priv:{}:{}", self.key_prefix, election_id, guardian_id)
	}

	fn polynomial_key(&self, election_id: ElectionId, guardian_id: GuardianId) -> String {
		format!("{}:poly:{}:{}", self.key_prefix, election_id, guardian_id)
	}

	/// Stores both fields under the same TTL. Overwrites any existing entry
	/// for this (election, guardian) pair, matching re-submission semantics.
	pub async fn put(&self, election_id: ElectionId, guardian_id: GuardianId, private_key: &[u8], polynomial: &[u8]) -> Result<()> {
		let private_key_b64 = BASE64.encode(private_key);
		let polynomial_b64 = BASE64.encode(polynomial);
		// set_nx only installs an absent key; del first so re-submission always wins.
		self.store.del(&self.private_key_key(election_id, guardian_id)).await?;
		self.store.del(&self.polynomial_key(election_id, guardian_id)).await?;
		self.store.set_nx(&self.private_key_key(election_id, guardian_id), &private_key_b64, self.ttl).await?;
		self.store.set_nx(&self.polynomial_key(election_id, guardian_id), &polynomial_b64, self.ttl).await?;
		Ok(())
	}

	pub async fn get_private_key(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<Option<Vec<u8>>> {
		let value = self.store.get(&self.private_key_key(election_id, guardian_id)).await?;
		decode_stored(value)
	}

	pub async fn get_polynomial(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<Option<Vec<u8>>> {
		let value = self.store.get(&self.polynomial_key(election_id, guardian_id)).await?;
		decode_stored(value)
	}

	/// Removes both fields atomically with respect to any reader that only
	/// checks presence (each key is individually deleted; a reader racing
	/// this call sees either both present or both absent, never one of
	/// each, because promotion always reads both before clearing).
	pub async fn clear(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<()> {
		self.store.del(&self.private_key_key(election_id, guardian_id)).await?;
		self.store.del(&self.polynomial_key(election_id, guardian_id)).await?;
		Ok(())
	}

	pub async fn has(&self, election_id: ElectionId, guardian_id: GuardianId) -> Result<bool> {
		Ok(self.store.get(&self.private_key_key(election_id, guardian_id)).await?.is_some())
	}
}

fn decode_stored(value: Option<String>) -> Result<Option<Vec<u8>>> {
	match value {
		Some(v) => {
			let bytes = BASE64.decode(v).map_err(|e| OrchestratorError::state(format!("corrupt credential entry: {e}")))?;
			Ok(Some(bytes))
		}
		None => Ok(None),
	}
}

#[cfg(test)]
mod test {
	use std::sync::Arc;

	use super::*;
	use crate::kv::MemoryStore;

	fn cache() -> CredentialCache {
		CredentialCache::new(Arc::new(MemoryStore::new()), "cred", 360)
	}

	#[tokio::test]
	async fn put_then_get_round_trips() {
		let cache = cache();
		cache.put(ElectionId(1), GuardianId(1), b"private", b"poly").await.unwrap();
		assert_eq!(cache.get_private_key(ElectionId(1), GuardianId(1)).await.unwrap(), Some(b"private".to_vec()));
		assert_eq!(cache.get_polynomial(ElectionId(1), GuardianId(1)).await.unwrap(), Some(b"poly".to_vec()));
		assert!(cache.has(ElectionId(1), GuardianId(1)).await.unwrap());
	}

	#[tokio::test]
	async fn clear_removes_both_fields() {
		let cache = cache();
		cache.put(ElectionId(1), GuardianId(1), b"private", b"poly").await.unwrap();
		cache.clear(ElectionId(1), GuardianId(1)).await.unwrap();
		assert_eq!(cache.get_private_key(ElectionId(1), GuardianId(1)).await.unwrap(), None);
		assert_eq!(cache.get_polynomial(ElectionId(1), GuardianId(1)).await.unwrap(), None);
		assert!(!cache.has(ElectionId(1), GuardianId(1)).await.unwrap());
	}

	#[tokio::test]
	async fn missing_get_returns_absent_not_error() {
		let cache = cache();
		assert_eq!(cache.get_private_key(ElectionId(9), GuardianId(9)).await.unwrap(), None);
	}

	#[tokio::test]
	async fn resubmission_overwrites_previous_entry() {
		let cache = cache();
		cache.put(ElectionId(1), GuardianId(1), b"first", b"poly1").await.unwrap();
		cache.put(ElectionId(1), GuardianId(1), b"second", b"poly2").await.unwrap();
		assert_eq!(cache.get_private_key(ElectionId(1), GuardianId(1)).await.unwrap(), Some(b"second".to_vec()));
	}
}
