// This file is part of the ElectionGuard tally orchestrator.

//! Atomic coordination store: `SET NX EX`, `INCR`, `EXPIRE`, `DEL`, `GET`
//! with single-key linearizability. Backs the distributed lock, progress
//! counters, and credential cache. `RedisStore` talks to a real Redis;
//! `MemoryStore` is an in-process stand-in for tests and the all-in-one
//! deployment mode.

use std::{
	collections::HashMap,
	time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait CoordinationStore: Send + Sync {
	/// `SET key value NX EX ttl`. Returns true iff this call installed the
	/// key (i.e. it was absent).
	async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

	/// Atomic increment, returning the post-increment value. If this call
	/// creates the key, attaches `ttl` so an orphaned counter self-cleans.
	async fn incr(&self, key: &str, ttl: Duration) -> Result<i64>;

	async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

	async fn del(&self, key: &str) -> Result<()>;

	async fn get(&self, key: &str) -> Result<Option<String>>;
}

pub struct RedisStore {
	conn: ConnectionManager,
}

impl RedisStore {
	pub async fn connect(redis_url: &str) -> Result<Self> {
		let client = redis::Client::open(redis_url).map_err(OrchestratorError::from)?;
		let conn = client.get_connection_manager().await.map_err(OrchestratorError::from)?;
		Ok(Self { conn })
	}
}

#[async_trait]
impl CoordinationStore for RedisStore {
	async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
		let mut conn = self.conn.clone();
		let result: Option<String> = redis::cmd("SET")
			.arg(key)
			.arg(value)
			.arg("NX")
			.arg("EX")
			.arg(ttl.as_secs().max(1))
			.query_async(&mut conn)
			.await
			.map_err(OrchestratorError::from)?;
		Ok(result.is_some())
	}

	async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
		let mut conn = self.conn.clone();
		let value: i64 = conn.incr(key, 1).await.map_err(OrchestratorError::from)?;
		if value == 1 {
			let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await.map_err(OrchestratorError::from)?;
		}
		Ok(value)
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
		let mut conn = self.conn.clone();
		let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await.map_err(OrchestratorError::from)?;
		Ok(())
	}

	async fn del(&self, key: &str) -> Result<()> {
		let mut conn = self.conn.clone();
		let _: () = conn.del(key).await.map_err(OrchestratorError::from)?;
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<String>> {
		let mut conn = self.conn.clone();
		let value: Option<String> = conn.get(key).await.map_err(OrchestratorError::from)?;
		Ok(value)
	}
}

struct Entry {
	value: String,
	expires_at: Option<Instant>,
}

/// In-memory `CoordinationStore`, single-process only. Used by the test
/// suite and by `DeploymentMode::AllInOne`; never shares state across
/// processes, so it must not be used for the distributed deployment.
#[derive(Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn is_live(entry: &Entry, now: Instant) -> bool {
		entry.expires_at.map(|exp| exp > now).unwrap_or(true)
	}
}

#[async_trait]
impl CoordinationStore for MemoryStore {
	async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
		let now = Instant::now();
		let mut entries = self.entries.lock();
		if let Some(existing) = entries.get(key) {
			if Self::is_live(existing, now) {
				return Ok(false);
			}
		}
		entries.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Some(now + ttl) });
		Ok(true)
	}

	async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
		let now = Instant::now();
		let mut entries = self.entries.lock();
		let live = entries.get(key).map(|e| Self::is_live(e, now)).unwrap_or(false);
		if !live {
			entries.insert(key.to_string(), Entry { value: "0".to_string(), expires_at: Some(now + ttl) });
		}
		let entry = entries.get_mut(key).expect("just inserted or already live");
		let next: i64 = entry.value.parse().unwrap_or(0) + 1;
		entry.value = next.to_string();
		Ok(next)
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
		let mut entries = self.entries.lock();
		if let Some(entry) = entries.get_mut(key) {
			entry.expires_at = Some(Instant::now() + ttl);
		}
		Ok(())
	}

	async fn del(&self, key: &str) -> Result<()> {
		self.entries.lock().remove(key);
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<String>> {
		let now = Instant::now();
		let entries = self.entries.lock();
		Ok(entries.get(key).filter(|e| Self::is_live(e, now)).map(|e| e.value.clone()))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn set_nx_only_installs_once() {
		let store = MemoryStore::new();
		assert!(store.set_nx("k", "v", Duration::from_secs(60)).await.unwrap());
		assert!(!store.set_nx("k", "v2", Duration::from_secs(60)).await.unwrap());
	}

	#[tokio::test]
	async fn incr_creates_and_accumulates() {
		let store = MemoryStore::new();
		assert_eq!(store.incr("c", Duration::from_secs(60)).await.unwrap(), 1);
		assert_eq!(store.incr("c", Duration::from_secs(60)).await.unwrap(), 2);
	}

	#[tokio::test]
	async fn del_removes_key() {
		let store = MemoryStore::new();
		store.set_nx("k", "v", Duration::from_secs(60)).await.unwrap();
		store.del("k").await.unwrap();
		assert!(store.set_nx("k", "v", Duration::from_secs(60)).await.unwrap());
	}

	#[tokio::test]
	async fn expired_entry_is_absent() {
		let store = MemoryStore::new();
		store.set_nx("k", "v", Duration::from_millis(1)).await.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(store.get("k").await.unwrap(), None);
		// and may be re-claimed
		assert!(store.set_nx("k", "v2", Duration::from_secs(60)).await.unwrap());
	}
}
