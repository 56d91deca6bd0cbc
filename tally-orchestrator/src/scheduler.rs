// This file is part of the ElectionGuard tally orchestrator.

//! In-memory round-robin task registry — the core of the orchestrator.
//! Keeps the worker pool saturated while bounding unfairness across
//! concurrent task instances, regardless of arrival time, size, or task
//! type. One global mutex protects the registry snapshot-and-publish step.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_common::{
	model::{ElectionId, GuardianId},
	task::{ChunkDescriptorId, ChunkState, TaskInstanceId, TaskPayload, TaskType},
};
use tally_queue::{QueueMessage, QueueSubstrate};

const DEFAULT_MAX_PASSES: usize = 8;
const DEFAULT_MAX_QUEUED_PER_TASK: usize = 1;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub tick: Duration,
	pub max_passes: usize,
	pub max_queued_per_task: usize,
	pub retry_max_attempts: u32,
	pub retry_initial_delay: Duration,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			tick: Duration::from_millis(100),
			max_passes: DEFAULT_MAX_PASSES,
			max_queued_per_task: DEFAULT_MAX_QUEUED_PER_TASK,
			retry_max_attempts: 3,
			retry_initial_delay: Duration::from_millis(5000),
		}
	}
}

impl From<&tally_common::config::SchedulerConfig> for SchedulerConfig {
	fn from(c: &tally_common::config::SchedulerConfig) -> Self {
		Self {
			tick: Duration::from_millis(c.tick_ms),
			max_passes: c.max_passes,
			max_queued_per_task: c.max_queued_per_task,
			retry_max_attempts: c.retry_max_attempts,
			retry_initial_delay: Duration::from_millis(c.retry_initial_delay_ms),
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
	pub id: ChunkDescriptorId,
	pub state: ChunkState,
	pub attempt_count: u32,
	pub payload: TaskPayload,
	pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskInstance {
	pub id: TaskInstanceId,
	pub task_type: TaskType,
	pub election_id: ElectionId,
	pub guardian_ids: Vec<GuardianId>,
	pub chunks: Vec<ChunkDescriptor>,
}

impl TaskInstance {
	fn is_active(&self) -> bool {
		self.chunks.iter().any(|c| !c.state.is_terminal())
	}

	fn queued_count(&self) -> usize {
		self.chunks.iter().filter(|c| c.state == ChunkState::Queued).count()
	}

	fn first_pending(&mut self) -> Option<&mut ChunkDescriptor> {
		self.chunks.iter_mut().filter(|c| c.state == ChunkState::Pending).min_by_key(|c| c.id.sequence)
	}
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
	pub pending: usize,
	pub queued: usize,
	pub processing: usize,
	pub completed: usize,
	pub failed: usize,
}

impl ProgressSnapshot {
	pub fn total(&self) -> usize {
		self.pending + self.queued + self.processing + self.completed + self.failed
	}

	pub fn is_complete(&self) -> bool {
		self.total() > 0 && self.pending == 0 && self.queued == 0 && self.processing == 0
	}
}

#[derive(Debug, Default)]
pub struct SystemStats {
	pub active_task_instances: usize,
	pub total_task_instances: usize,
	pub queued_chunks: usize,
	pub processing_chunks: usize,
}

struct Registry {
	instances: HashMap<TaskInstanceId, TaskInstance>,
	/// Insertion order, also the order the round-robin start index rotates
	/// through once filtered down to the active subset.
	order: Vec<TaskInstanceId>,
	round_robin_index: usize,
}

/// The scheduler's narrow, worker-facing interface. Workers only ever see
/// this trait, never the scheduler's registry or publish path directly —
/// this is what keeps workers and the scheduler from holding references to
/// each other.
#[async_trait]
pub trait SchedulerPort: Send + Sync {
	async fn update_chunk_state(&self, chunk_id: &ChunkDescriptorId, new_state: ChunkState, error: Option<String>);
}

pub struct Scheduler {
	registry: Mutex<Registry>,
	queue: Arc<QueueSubstrate>,
	config: SchedulerConfig,
}

impl Scheduler {
	pub fn new(queue: Arc<QueueSubstrate>, config: SchedulerConfig) -> Self {
		Self { registry: Mutex::new(Registry { instances: HashMap::new(), order: Vec::new(), round_robin_index: 0 }), queue, config }
	}

	/// Atomically installs a new task instance with every chunk descriptor
	/// in `PENDING`.
	pub fn register_task(
		&self,
		task_type: TaskType,
		election_id: ElectionId,
		guardian_ids: Vec<GuardianId>,
		payloads: Vec<TaskPayload>,
	) -> TaskInstanceId {
		let discriminator = guardian_ids.first().map(|g| g.0.to_string());
		let id = TaskInstanceId::new(task_type, election_id, discriminator.as_deref());
		let chunks = payloads
			.into_iter()
			.enumerate()
			.map(|(sequence, payload)| ChunkDescriptor {
				id: ChunkDescriptorId { task_instance_id: id.clone(), sequence },
				state: ChunkState::Pending,
				attempt_count: 0,
				payload,
				last_error: None,
			})
			.collect();
		let instance = TaskInstance { id: id.clone(), task_type, election_id, guardian_ids, chunks };

		let mut registry = self.registry.lock();
		registry.order.push(id.clone());
		registry.instances.insert(id.clone(), instance);
		id
	}

	pub fn get_progress(&self, task_instance_id: &TaskInstanceId) -> Option<ProgressSnapshot> {
		let registry = self.registry.lock();
		registry.instances.get(task_instance_id).map(|instance| snapshot(&instance.chunks))
	}

	pub fn get_election_progress(&self, election_id: ElectionId) -> HashMap<TaskInstanceId, ProgressSnapshot> {
		let registry = self.registry.lock();
		registry
			.instances
			.values()
			.filter(|instance| instance.election_id == election_id)
			.map(|instance| (instance.id.clone(), snapshot(&instance.chunks)))
			.collect()
	}

	pub fn get_system_stats(&self) -> SystemStats {
		let registry = self.registry.lock();
		let mut stats = SystemStats { total_task_instances: registry.instances.len(), ..Default::default() };
		for instance in registry.instances.values() {
			if instance.is_active() {
				stats.active_task_instances += 1;
			}
			for chunk in &instance.chunks {
				match chunk.state {
					ChunkState::Queued => stats.queued_chunks += 1,
					ChunkState::Processing => stats.processing_chunks += 1,
					_ => {}
				}
			}
		}
		stats
	}

	/// One scheduling pass: snapshot active instances, round-robin across
	/// them up to `max_passes` times, publish whatever that selects. The
	/// mutex protects steps 1-3 only; chunk descriptors already carry
	/// `Queued` state by the time the lock is released, so a concurrent
	/// `update_chunk_state` can never observe a half-published chunk. If a
	/// publish then fails, the chunk is reverted to `Pending` so the next
	/// tick retries it rather than losing it as a phantom `Queued` entry.
	pub async fn tick(&self) {
		let to_publish = {
			let mut registry = self.registry.lock();
			self.select_chunks_to_publish(&mut registry)
		};
		for (chunk_id, payload, attempt) in to_publish {
			let message = QueueMessage { chunk_id: chunk_id.clone(), payload, attempt };
			match self.queue.publish(&message).await {
				Ok(()) => log::debug!("scheduler published chunk {chunk_id}"),
				Err(e) => {
					log::error!("scheduler failed to publish chunk {chunk_id}, reverting to pending: {e}");
					self.revert_to_pending(&chunk_id);
				}
			}
		}
	}

	fn select_chunks_to_publish(&self, registry: &mut Registry) -> Vec<(ChunkDescriptorId, TaskPayload, u32)> {
		let active_ids: Vec<TaskInstanceId> =
			registry.order.iter().filter(|id| registry.instances.get(*id).map(TaskInstance::is_active).unwrap_or(false)).cloned().collect();

		if active_ids.is_empty() {
			return Vec::new();
		}

		let n = active_ids.len();
		let start = registry.round_robin_index % n;
		let mut to_publish = Vec::new();

		for _pass in 0..self.config.max_passes {
			let mut published_this_pass = false;
			for offset in 0..n {
				let id = &active_ids[(start + offset) % n];
				let Some(instance) = registry.instances.get_mut(id) else { continue };
				if instance.queued_count() >= self.config.max_queued_per_task {
					continue;
				}
				if let Some(chunk) = instance.first_pending() {
					chunk.state = ChunkState::Queued;
					to_publish.push((chunk.id.clone(), chunk.payload.clone(), chunk.attempt_count));
					published_this_pass = true;
				}
			}
			if !published_this_pass {
				break;
			}
		}

		registry.round_robin_index = registry.round_robin_index.wrapping_add(1);
		to_publish
	}

	fn revert_to_pending(&self, chunk_id: &ChunkDescriptorId) {
		let mut registry = self.registry.lock();
		if let Some(instance) = registry.instances.get_mut(&chunk_id.task_instance_id) {
			if let Some(chunk) = instance.chunks.get_mut(chunk_id.sequence) {
				if chunk.state == ChunkState::Queued {
					chunk.state = ChunkState::Pending;
				}
			}
		}
	}

	/// Runs the scheduling loop until the process shuts down. Suspension
	/// points are exactly the tick sleep and the publish calls inside
	/// `tick`; nowhere else does this loop block.
	pub async fn run(self: Arc<Self>) {
		let mut interval = tokio::time::interval(self.config.tick);
		loop {
			interval.tick().await;
			self.tick().await;
		}
	}
}

fn snapshot(chunks: &[ChunkDescriptor]) -> ProgressSnapshot {
	let mut snap = ProgressSnapshot::default();
	for chunk in chunks {
		match chunk.state {
			ChunkState::Pending => snap.pending += 1,
			ChunkState::Queued => snap.queued += 1,
			ChunkState::Processing => snap.processing += 1,
			ChunkState::Completed => snap.completed += 1,
			ChunkState::Failed => snap.failed += 1,
		}
	}
	snap
}

#[async_trait]
impl SchedulerPort for Arc<Scheduler> {
	async fn update_chunk_state(&self, chunk_id: &ChunkDescriptorId, new_state: ChunkState, error: Option<String>) {
		let retry_delay = {
			let mut registry = self.registry.lock();
			let Some(instance) = registry.instances.get_mut(&chunk_id.task_instance_id) else {
				log::warn!("update_chunk_state for unknown task instance {}", chunk_id.task_instance_id);
				return;
			};
			let Some(chunk) = instance.chunks.get_mut(chunk_id.sequence) else {
				log::warn!("update_chunk_state for unknown chunk {chunk_id}");
				return;
			};

			// Terminal states never transition again; a redelivered message
			// after a successful completion is a silent no-op, not an error.
			if chunk.state.is_terminal() {
				return;
			}

			match new_state {
				ChunkState::Failed => {
					chunk.attempt_count += 1;
					chunk.last_error = error;
					chunk.state = ChunkState::Failed;
					if chunk.attempt_count < self.config.retry_max_attempts {
						let delay = self.config.retry_initial_delay * 2u32.pow(chunk.attempt_count - 1);
						Some((chunk_id.clone(), delay))
					} else {
						None
					}
				}
				other => {
					chunk.state = other;
					None
				}
			}
		};

		if let Some((chunk_id, delay)) = retry_delay {
			let scheduler = Arc::clone(self);
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				scheduler.reset_if_still_failed(&chunk_id);
			});
		}
	}
}

impl Scheduler {
	/// Invoked after the exponential backoff delay elapses. Only resets to
	/// `PENDING` if the chunk is still `FAILED` — a concurrent retry or a
	/// task-instance-wide abort must not be clobbered.
	fn reset_if_still_failed(&self, chunk_id: &ChunkDescriptorId) {
		let mut registry = self.registry.lock();
		if let Some(instance) = registry.instances.get_mut(&chunk_id.task_instance_id) {
			if let Some(chunk) = instance.chunks.get_mut(chunk_id.sequence) {
				if chunk.state == ChunkState::Failed {
					chunk.state = ChunkState::Pending;
				}
			}
		}
	}
}

#[cfg(test)]
mod test {
	use tally_common::task::TallyPayload;

	use super::*;

	fn payloads(n: usize, election_id: ElectionId) -> Vec<TaskPayload> {
		(0..n)
			.map(|i| TaskPayload::Tally(TallyPayload { election_id, chunk_id: tally_common::model::ChunkId(i as i64), ballot_ids: vec![] }))
			.collect()
	}

	fn test_config() -> SchedulerConfig {
		SchedulerConfig { tick: Duration::from_millis(10), ..SchedulerConfig::default() }
	}

	#[test]
	fn bounded_advance_across_two_tasks() {
		let registry = Mutex::new(Registry { instances: HashMap::new(), order: Vec::new(), round_robin_index: 0 });
		let mut guard = registry.lock();
		let a = TaskInstanceId::new(TaskType::TallyCreation, ElectionId(1), None);
		let b = TaskInstanceId::new(TaskType::TallyCreation, ElectionId(2), None);
		for (id, n) in [(a.clone(), 100usize), (b.clone(), 20usize)] {
			let chunks = payloads(n, ElectionId(1))
				.into_iter()
				.enumerate()
				.map(|(seq, payload)| ChunkDescriptor {
					id: ChunkDescriptorId { task_instance_id: id.clone(), sequence: seq },
					state: ChunkState::Pending,
					attempt_count: 0,
					payload,
					last_error: None,
				})
				.collect();
			guard.order.push(id.clone());
			guard.instances.insert(
				id.clone(),
				TaskInstance { id: id.clone(), task_type: TaskType::TallyCreation, election_id: ElectionId(1), guardian_ids: vec![], chunks },
			);
		}
		drop(guard);

		let config = test_config();
		let mut published_a = 0usize;
		let mut published_b = 0usize;
		for _ in 0..30 {
			let mut guard = registry.lock();
			let active_ids: Vec<TaskInstanceId> =
				guard.order.iter().filter(|id| guard.instances.get(*id).map(TaskInstance::is_active).unwrap_or(false)).cloned().collect();
			if active_ids.is_empty() {
				break;
			}
			let n = active_ids.len();
			let start = guard.round_robin_index % n;
			for _pass in 0..config.max_passes {
				let mut published_this_pass = false;
				for offset in 0..n {
					let id = &active_ids[(start + offset) % n];
					let instance = guard.instances.get_mut(id).unwrap();
					if instance.queued_count() >= config.max_queued_per_task {
						continue;
					}
					if let Some(chunk) = instance.first_pending() {
						chunk.state = ChunkState::Queued;
						if *id == a {
							published_a += 1;
						} else {
							published_b += 1;
						}
						published_this_pass = true;
					}
				}
				if !published_this_pass {
					break;
				}
			}
			guard.round_robin_index = guard.round_robin_index.wrapping_add(1);
			// Simulate immediate consumption so the next tick has room to
			// queue more (mirrors a worker pool draining QUEUED chunks).
			for instance in guard.instances.values_mut() {
				for chunk in &mut instance.chunks {
					if chunk.state == ChunkState::Queued {
						chunk.state = ChunkState::Completed;
					}
				}
			}
			assert!((published_a as i64 - published_b as i64).abs() <= active_ids.len() as i64);
		}
	}

	#[test]
	fn no_starvation_newly_registered_task_gets_scheduled() {
		let registry = Mutex::new(Registry { instances: HashMap::new(), order: Vec::new(), round_robin_index: 0 });
		let mut guard = registry.lock();
		let a = TaskInstanceId::new(TaskType::TallyCreation, ElectionId(1), None);
		let chunks: Vec<ChunkDescriptor> = payloads(5, ElectionId(1))
			.into_iter()
			.enumerate()
			.map(|(seq, payload)| ChunkDescriptor {
				id: ChunkDescriptorId { task_instance_id: a.clone(), sequence: seq },
				state: ChunkState::Pending,
				attempt_count: 0,
				payload,
				last_error: None,
			})
			.collect();
		guard.order.push(a.clone());
		guard
			.instances
			.insert(a.clone(), TaskInstance { id: a.clone(), task_type: TaskType::TallyCreation, election_id: ElectionId(1), guardian_ids: vec![], chunks });
		drop(guard);

		// Register task B "mid-run" and confirm it's immediately visible in
		// the active set on the very next snapshot.
		let b = TaskInstanceId::new(TaskType::TallyCreation, ElectionId(2), None);
		let chunks: Vec<ChunkDescriptor> = payloads(2, ElectionId(2))
			.into_iter()
			.enumerate()
			.map(|(seq, payload)| ChunkDescriptor {
				id: ChunkDescriptorId { task_instance_id: b.clone(), sequence: seq },
				state: ChunkState::Pending,
				attempt_count: 0,
				payload,
				last_error: None,
			})
			.collect();
		let mut guard = registry.lock();
		guard.order.push(b.clone());
		guard
			.instances
			.insert(b.clone(), TaskInstance { id: b.clone(), task_type: TaskType::TallyCreation, election_id: ElectionId(2), guardian_ids: vec![], chunks });
		let active_ids: Vec<TaskInstanceId> =
			guard.order.iter().filter(|id| guard.instances.get(*id).map(TaskInstance::is_active).unwrap_or(false)).cloned().collect();
		assert!(active_ids.contains(&b));
	}
}
