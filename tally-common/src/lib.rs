// This file is part of the ElectionGuard tally orchestrator.

//! Shared types for the tally-orchestration workspace: the error taxonomy,
//! configuration schema, logging setup and the domain/task model that every
//! other crate builds on.

pub mod config;
pub mod error;
pub mod logger;
pub mod model;
pub mod task;

pub use error::{Error, Result};
