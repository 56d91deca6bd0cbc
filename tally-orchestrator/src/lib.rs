// This file is part of the ElectionGuard tally orchestrator.

//! The work-orchestration plane for ElectionGuard threshold-homomorphic
//! tallying: chunking, fair round-robin scheduling, queue-backed workers,
//! progress tracking, distributed locks, credential caching, and the
//! phase-promotion logic that advances a guardian through the four phases
//! (tally creation, partial decryption, compensated decryption, combine).
//!
//! The cryptographic engine, any HTTP/API surface, voter eligibility and
//! the blockchain audit sidecar are external collaborators this crate
//! never implements; see [`engine_client`] for the one seam it reaches
//! them through.

pub mod chunker;
pub mod credential_cache;
pub mod database;
pub mod engine_client;
pub mod error;
pub mod kv;
pub mod lock;
pub mod phase_controller;
pub mod progress;
pub mod scheduler;
pub mod workers;

pub use error::{OrchestratorError, Result};
