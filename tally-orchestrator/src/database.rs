// This file is part of the ElectionGuard tally orchestrator.

//! Postgres-backed persistence for the tables sketched in the data model.

pub mod models;
pub mod queries;

use sqlx::{
	pool::PoolConnection,
	postgres::{PgConnectOptions, PgPool, PgPoolOptions},
	ConnectOptions, Postgres,
};

use crate::error::Result;

pub type DbConn = PoolConnection<Postgres>;

#[derive(Clone)]
pub struct Database {
	pool: PgPool,
}

impl Database {
	pub async fn connect(url: &str, pool_min: u32, pool_max: u32) -> Result<Self> {
		let options: PgConnectOptions = url.parse::<PgConnectOptions>()?.disable_statement_logging();
		let pool = PgPoolOptions::new().min_connections(pool_min).max_connections(pool_max).connect_with(options).await?;
		Ok(Self { pool })
	}

	pub async fn conn(&self) -> Result<DbConn> {
		Ok(self.pool.acquire().await?)
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub async fn migrate(&self) -> Result<()> {
		sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| crate::error::OrchestratorError::state(e.to_string()))?;
		Ok(())
	}
}
