// This file is part of the ElectionGuard tally orchestrator.

//! Process entrypoint: loads configuration, initializes logging, wires the
//! coordination store / queue substrate / database / engine client into a
//! `Scheduler` and `PhaseController`, and either runs the long-lived
//! service (`serve`) or performs a one-shot admin action for local
//! scripting (`start-tally`, `submit-keys`, `combine`).
//!
//! The admin subcommands build their own ephemeral `Scheduler` and the
//! worker pool needed for the task instance they register, then drive the
//! scheduler tick loop in-process until that instance completes. This
//! mirrors the fact that the scheduler's task registry is in-memory and
//! owned by whichever process registered it; a long-lived admin-facing API
//! would embed `PhaseController` the same way inside the `serve` process
//! rather than spawn a second one.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tally_common::{
	config::Config,
	model::{ElectionId, GuardianId},
	task::TaskType,
};
use tally_orchestrator::{
	credential_cache::CredentialCache,
	database::Database,
	engine_client::EngineClient,
	kv::{CoordinationStore, RedisStore},
	lock::DistributedLock,
	phase_controller::PhaseController,
	progress::ProgressCounters,
	scheduler::{Scheduler, SchedulerConfig, SchedulerPort},
	workers,
};
use tally_queue::QueueSubstrate;

#[derive(Parser)]
#[command(name = "tally-coordinator", version, about = "ElectionGuard tally work-orchestration service")]
struct Cli {
	/// Optional TOML config file; unset fields fall back to built-in defaults.
	#[arg(long, env = "TALLY_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Run the scheduler tick loop and all worker pools until interrupted.
	Serve,
	/// Chunk an ended election's cast ballots and register the tally-creation task.
	StartTally {
		#[arg(long)]
		election: i64,
		#[arg(long, default_value = "admin")]
		user: String,
	},
	/// Cache a guardian's decrypted key material and register its partial-decryption task.
	SubmitKeys {
		#[arg(long)]
		election: i64,
		#[arg(long)]
		guardian: i64,
		#[arg(long)]
		private_key_file: PathBuf,
		#[arg(long)]
		polynomial_file: PathBuf,
	},
	/// Register the combine-decryption task once enough guardians have decrypted.
	Combine {
		#[arg(long)]
		election: i64,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let config = load_config(cli.config.as_deref())?;
	init_logger(&config)?;

	let deps = Dependencies::connect(&config).await?;

	match cli.command {
		Command::Serve => serve(deps, &config).await,
		Command::StartTally { election, user } => {
			let task_id = deps
				.phases
				.start_tally(ElectionId(election), &user)
				.await
				.map_err(|e| anyhow!("start_tally failed: {e}"))?;
			log::info!("registered {task_id}, driving to completion");
			drive_to_completion(&deps, &config, &task_id, &[TaskType::TallyCreation]).await
		}
		Command::SubmitKeys { election, guardian, private_key_file, polynomial_file } => {
			let private_key = std::fs::read(&private_key_file).context("reading private key file")?;
			let polynomial = std::fs::read(&polynomial_file).context("reading polynomial file")?;
			let task_id = deps
				.phases
				.submit_guardian_keys(ElectionId(election), GuardianId(guardian), &private_key, &polynomial)
				.await
				.map_err(|e| anyhow!("submit_guardian_keys failed: {e}"))?;
			log::info!("registered {task_id}, driving to completion");
			drive_to_completion(&deps, &config, &task_id, &[TaskType::PartialDecryption, TaskType::CompensatedDecryption]).await?;
			// Compensated decryption (if any) is a second task instance that the
			// partial-decryption worker registers dynamically once its last chunk
			// completes, so waiting on `task_id` alone can return before that
			// instance even exists. Poll the guardian row itself instead.
			wait_for_guardian_decrypted(&deps, ElectionId(election), GuardianId(guardian), &config).await
		}
		Command::Combine { election } => {
			let task_id =
				deps.phases.combine_results(ElectionId(election)).await.map_err(|e| anyhow!("combine_results failed: {e}"))?;
			log::info!("registered {task_id}, driving to completion");
			drive_to_completion(&deps, &config, &task_id, &[TaskType::CombineDecryption]).await
		}
	}
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
	match path {
		Some(p) => {
			let raw = std::fs::read_to_string(p).with_context(|| format!("reading config file {}", p.display()))?;
			Config::from_toml_str(&raw).map_err(|e| anyhow!("parsing config file {}: {e}", p.display()))
		}
		None => Ok(Config::default()),
	}
}

fn init_logger(config: &Config) -> Result<()> {
	let std_level = config.log.std_level.parse().unwrap_or(log::LevelFilter::Info);
	let file_level = config.log.file_level.parse().unwrap_or(log::LevelFilter::Debug);
	tally_common::logger::init(std_level, file_level, &config.log.path).context("initializing logger")
}

/// Every long-lived handle `serve` and the admin subcommands share: the
/// persistent store, the coordination store (locks/counters/credentials),
/// the queue substrate, the engine client, the scheduler and the phase
/// controller built atop them.
struct Dependencies {
	database: Database,
	queue: Arc<QueueSubstrate>,
	scheduler: Arc<Scheduler>,
	engine: Arc<EngineClient>,
	credentials: Arc<CredentialCache>,
	phases: Arc<PhaseController>,
}

impl Dependencies {
	async fn connect(config: &Config) -> Result<Self> {
		let database = Database::connect(&config.database.url, config.database.pool_min, config.database.pool_max)
			.await
			.context("connecting to database")?;
		database.migrate().await.context("running database migrations")?;

		let store: Arc<dyn CoordinationStore> =
			Arc::new(RedisStore::connect(&config.kv.redis_url).await.context("connecting to coordination store")?);
		let queue = Arc::new(QueueSubstrate::connect(&config.queue.amqp_url).await.context("connecting to queue substrate")?);
		let scheduler = Arc::new(Scheduler::new(Arc::clone(&queue), SchedulerConfig::from(&config.scheduler)));
		let engine = Arc::new(EngineClient::new(config.engine.base_url.clone(), config.engine.pool_max, config.engine.timeout_ms));
		let credentials = Arc::new(CredentialCache::new(Arc::clone(&store), config.credential.key_prefix.clone(), config.credential.ttl_minutes));
		let locks = Arc::new(DistributedLock::new(Arc::clone(&store), config.lock.default_ttl_seconds));
		let progress = Arc::new(ProgressCounters::new(Arc::clone(&store), Duration::from_secs(config.credential.ttl_minutes * 60)));

		let phases = Arc::new(PhaseController::new(
			Arc::clone(&scheduler),
			database.clone(),
			Arc::clone(&credentials),
			progress,
			locks,
			config.chunk.size,
			Duration::from_secs(config.lock.default_ttl_seconds),
		));

		Ok(Self { database, queue, scheduler, engine, credentials, phases })
	}

	/// Spawns `count` consumer loops for `task_type`, wired to this
	/// process's scheduler/database/engine/credentials.
	async fn spawn_workers(&self, task_type: TaskType, count: usize, config: &Config) -> Result<()> {
		let parties = config.engine.parties;
		let candidates = config.engine.candidates;
		for i in 0..count {
			let consumer_tag = format!("{}-{}", task_type.queue_name(), i);
			let consumer = self.queue.consumer(task_type, &consumer_tag).await.context("opening queue consumer")?;
			let scheduler = Arc::clone(&self.scheduler);
			let database = self.database.clone();
			let engine = Arc::clone(&self.engine);
			let credentials = Arc::clone(&self.credentials);
			let phases = Arc::clone(&self.phases);
			let dedup = workers::DedupGuard::new();
			match task_type {
				TaskType::TallyCreation => {
					// `SchedulerPort` is implemented on `Arc<Scheduler>`, not on
					// `Scheduler` itself, so reaching `Arc<dyn SchedulerPort>`
					// needs one more layer of indirection to unsize through.
					let scheduler_port: Arc<dyn SchedulerPort> = Arc::new(scheduler);
					tokio::spawn(workers::tally::run(consumer, scheduler_port, database, engine, dedup, parties, candidates));
				}
				TaskType::PartialDecryption => {
					tokio::spawn(workers::partial::run(consumer, scheduler, database, engine, credentials, phases, dedup, parties, candidates));
				}
				TaskType::CompensatedDecryption => {
					tokio::spawn(workers::compensated::run(
						consumer, scheduler, database, engine, credentials, phases, dedup, parties, candidates,
					));
				}
				TaskType::CombineDecryption => {
					tokio::spawn(workers::combine::run(consumer, scheduler, database, engine, dedup, parties, candidates));
				}
			}
		}
		Ok(())
	}
}

async fn serve(deps: Dependencies, config: &Config) -> Result<()> {
	for task_type in TaskType::ALL {
		deps.spawn_workers(task_type, config.worker.concurrency_max, config).await?;
	}
	let scheduler = Arc::clone(&deps.scheduler);
	tokio::spawn(scheduler.run());

	log::info!("tally-coordinator serving; press ctrl-c to stop");
	tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
	log::info!("shutdown signal received, exiting");
	Ok(())
}

/// Spawns just the worker pools a single admin action needs and polls the
/// scheduler until that task instance's progress reports complete.
async fn drive_to_completion(
	deps: &Dependencies,
	config: &Config,
	task_id: &tally_common::task::TaskInstanceId,
	task_types: &[TaskType],
) -> Result<()> {
	// A one-shot admin action only ever drives a single task instance, so it
	// never needs the full steady-state pool `serve` keeps warm — the
	// configured floor of the per-queue concurrency range is enough.
	for task_type in task_types {
		deps.spawn_workers(*task_type, config.worker.concurrency_min.max(1), config).await?;
	}
	let scheduler = Arc::clone(&deps.scheduler);
	tokio::spawn(scheduler.run());

	loop {
		match deps.scheduler.get_progress(task_id) {
			Some(snapshot) if snapshot.is_complete() => {
				log::info!(
					"{task_id} complete: {} completed, {} failed",
					snapshot.completed,
					snapshot.failed
				);
				return Ok(());
			}
			Some(snapshot) => {
				log::debug!(
					"{task_id} progress: pending={} queued={} processing={} completed={} failed={}",
					snapshot.pending,
					snapshot.queued,
					snapshot.processing,
					snapshot.completed,
					snapshot.failed
				);
			}
			None => return Err(anyhow!("{task_id} vanished from the scheduler registry")),
		}
		tokio::time::sleep(Duration::from_millis(config.scheduler.tick_ms)).await;
	}
}

/// Polls the guardian row directly rather than a task instance, since
/// compensated decryption (if the election has more than one guardian) is a
/// task instance the partial-decryption worker registers dynamically after
/// `task_id`'s own chunks finish — there is no single task identifier that
/// covers both phases.
async fn wait_for_guardian_decrypted(
	deps: &Dependencies,
	election_id: ElectionId,
	guardian_id: GuardianId,
	config: &Config,
) -> Result<()> {
	loop {
		let mut conn = deps.database.conn().await.context("connecting to database")?;
		let guardian = tally_orchestrator::database::queries::get_guardian(&mut conn, election_id, guardian_id)
			.await
			.context("reading guardian row")?
			.ok_or_else(|| anyhow!("guardian {guardian_id} vanished from election {election_id}"))?;
		if guardian.decrypted_flag {
			log::info!("guardian {guardian_id} fully decrypted for election {election_id}");
			return Ok(());
		}
		tokio::time::sleep(Duration::from_millis(config.scheduler.tick_ms)).await;
	}
}
