// This file is part of the ElectionGuard tally orchestrator.

//! Configuration schema for the orchestrator process.
//!
//! Every field has a `#[serde(default = ...)]` so a config file (or none at
//! all) only needs to mention the options it wants to override. Loaded from
//! an optional TOML file, then overlaid with environment variables by the
//! binary crate.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub chunk: ChunkConfig,
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	#[serde(default)]
	pub worker: WorkerConfig,
	#[serde(default)]
	pub engine: EngineConfig,
	#[serde(default)]
	pub credential: CredentialConfig,
	#[serde(default)]
	pub lock: LockConfig,
	#[serde(default)]
	pub database: DatabaseConfig,
	#[serde(default)]
	pub queue: QueueConfig,
	#[serde(default)]
	pub kv: KvConfig,
	#[serde(default)]
	pub log: LogConfig,
	/// Selects whether the coordination store / queue substrate are backed
	/// by Redis+RabbitMQ or run in-process. Intended for local development
	/// and the test suite; production deployments use `Distributed`.
	#[serde(default)]
	pub deployment_mode: DeploymentMode,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			chunk: ChunkConfig::default(),
			scheduler: SchedulerConfig::default(),
			worker: WorkerConfig::default(),
			engine: EngineConfig::default(),
			credential: CredentialConfig::default(),
			lock: LockConfig::default(),
			database: DatabaseConfig::default(),
			queue: QueueConfig::default(),
			kv: KvConfig::default(),
			log: LogConfig::default(),
			deployment_mode: DeploymentMode::default(),
		}
	}
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
	#[default]
	Distributed,
	AllInOne,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkConfig {
	/// Target ballots per chunk.
	#[serde(default = "default_chunk_size")]
	pub size: usize,
}

impl Default for ChunkConfig {
	fn default() -> Self {
		Self { size: default_chunk_size() }
	}
}

const fn default_chunk_size() -> usize {
	2
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
	#[serde(default = "default_tick_ms")]
	pub tick_ms: u64,
	#[serde(default = "default_max_passes")]
	pub max_passes: usize,
	#[serde(default = "default_max_queued_per_task")]
	pub max_queued_per_task: usize,
	#[serde(default = "default_retry_max_attempts")]
	pub retry_max_attempts: u32,
	#[serde(default = "default_retry_initial_delay_ms")]
	pub retry_initial_delay_ms: u64,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			tick_ms: default_tick_ms(),
			max_passes: default_max_passes(),
			max_queued_per_task: default_max_queued_per_task(),
			retry_max_attempts: default_retry_max_attempts(),
			retry_initial_delay_ms: default_retry_initial_delay_ms(),
		}
	}
}

const fn default_tick_ms() -> u64 {
	100
}
const fn default_max_passes() -> usize {
	8
}
const fn default_max_queued_per_task() -> usize {
	1
}
const fn default_retry_max_attempts() -> u32 {
	3
}
const fn default_retry_initial_delay_ms() -> u64 {
	5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
	/// Consumers per queue for a one-shot admin action, which only ever
	/// drives a single task instance to completion.
	#[serde(default = "default_worker_min")]
	pub concurrency_min: usize,
	/// Consumers per queue for the long-lived `serve` pool.
	#[serde(default = "default_worker_max")]
	pub concurrency_max: usize,
	/// Maximum times a queue message is redelivered before the scheduler
	/// marks the chunk terminally failed.
	#[serde(default = "default_max_retry_msg")]
	pub max_retry_msg: u32,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			concurrency_min: default_worker_min(),
			concurrency_max: default_worker_max(),
			max_retry_msg: default_max_retry_msg(),
		}
	}
}

fn default_worker_min() -> usize {
	1
}
fn default_worker_max() -> usize {
	num_cpus::get()
}
const fn default_max_retry_msg() -> u32 {
	5
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
	#[serde(default = "default_engine_url")]
	pub base_url: String,
	#[serde(default = "default_engine_pool_max")]
	pub pool_max: usize,
	#[serde(default = "default_engine_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_engine_retry_max")]
	pub retry_max: u32,
	/// Party count passed verbatim to every engine call. Elections don't
	/// carry per-election manifest shape, so this (and `candidates`) is
	/// deployment-wide configuration rather than a per-election column.
	#[serde(default = "default_engine_parties")]
	pub parties: u32,
	#[serde(default = "default_engine_candidates")]
	pub candidates: u32,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			base_url: default_engine_url(),
			pool_max: default_engine_pool_max(),
			timeout_ms: default_engine_timeout_ms(),
			retry_max: default_engine_retry_max(),
			parties: default_engine_parties(),
			candidates: default_engine_candidates(),
		}
	}
}

fn default_engine_url() -> String {
	"http://localhost:8080".to_string()
}
const fn default_engine_pool_max() -> usize {
	16
}
const fn default_engine_timeout_ms() -> u64 {
	30_000
}
const fn default_engine_retry_max() -> u32 {
	3
}
const fn default_engine_parties() -> u32 {
	1
}
const fn default_engine_candidates() -> u32 {
	2
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
	#[serde(default = "default_credential_ttl_minutes")]
	pub ttl_minutes: u64,
	#[serde(default = "default_credential_key_prefix")]
	pub key_prefix: String,
}

impl Default for CredentialConfig {
	fn default() -> Self {
		Self { ttl_minutes: default_credential_ttl_minutes(), key_prefix: default_credential_key_prefix() }
	}
}

const fn default_credential_ttl_minutes() -> u64 {
	360
}
fn default_credential_key_prefix() -> String {
	"cred".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
	#[serde(default = "default_lock_ttl_seconds")]
	pub default_ttl_seconds: u64,
}

impl Default for LockConfig {
	fn default() -> Self {
		Self { default_ttl_seconds: default_lock_ttl_seconds() }
	}
}

const fn default_lock_ttl_seconds() -> u64 {
	7200
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
	#[serde(default = "default_database_url")]
	pub url: String,
	#[serde(default = "default_pool_min")]
	pub pool_min: u32,
	#[serde(default = "default_pool_max")]
	pub pool_max: u32,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self { url: default_database_url(), pool_min: default_pool_min(), pool_max: default_pool_max() }
	}
}

fn default_database_url() -> String {
	"postgres://localhost/tally".to_string()
}
const fn default_pool_min() -> u32 {
	4
}
const fn default_pool_max() -> u32 {
	28
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
	#[serde(default = "default_amqp_url")]
	pub amqp_url: String,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self { amqp_url: default_amqp_url() }
	}
}

fn default_amqp_url() -> String {
	"amqp://localhost:5672/%2f".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
	#[serde(default = "default_redis_url")]
	pub redis_url: String,
}

impl Default for KvConfig {
	fn default() -> Self {
		Self { redis_url: default_redis_url() }
	}
}

fn default_redis_url() -> String {
	"redis://localhost:6379".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
	#[serde(default = "default_log_level")]
	pub std_level: String,
	#[serde(default = "default_log_file_level")]
	pub file_level: String,
	#[serde(default = "default_log_path")]
	pub path: PathBuf,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self { std_level: default_log_level(), file_level: default_log_file_level(), path: default_log_path() }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}
fn default_log_file_level() -> String {
	"debug".to_string()
}
fn default_log_path() -> PathBuf {
	PathBuf::from("tally-orchestrator.log")
}

impl Config {
	/// Parse a TOML config file. Missing fields fall back to their
	/// `#[serde(default)]`, so an empty file (or a file containing just one
	/// section) is valid.
	pub fn from_toml_str(toml_str: &str) -> crate::Result<Self> {
		toml_lite::from_str(toml_str).map_err(|e| crate::Error::validation(e.to_string()))
	}
}

/// A tiny wrapper so callers go through `Config::from_toml_str` rather than
/// depending on the `toml` crate directly.
mod toml_lite {
	pub fn from_str<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, toml::de::Error> {
		toml::from_str(s)
	}
}
