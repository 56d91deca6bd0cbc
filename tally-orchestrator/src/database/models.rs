// This file is part of the ElectionGuard tally orchestrator.

//! Row types returned by the queries in `queries.rs`, one struct per table.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ElectionRow {
	pub id: i64,
	pub ending_time: DateTime<Utc>,
	pub joint_public_key: Vec<u8>,
	pub base_hash: Vec<u8>,
	pub quorum: i32,
	pub guardian_count: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct GuardianRow {
	pub id: i64,
	pub election_id: i64,
	pub sequence_order: i32,
	pub public_key: Vec<u8>,
	pub encrypted_private_key_blob: Vec<u8>,
	pub encrypted_polynomial_blob: Vec<u8>,
	pub key_backup_blob: Vec<u8>,
	pub decrypted_flag: bool,
	pub verification_key_hex: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct BallotRow {
	pub id: i64,
	pub election_id: i64,
	pub status: String,
	pub ciphertext: Vec<u8>,
	pub tracking_code: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
	pub id: i64,
	pub election_id: i64,
	pub encrypted_tally: Option<Vec<u8>>,
	pub plaintext_result: Option<Vec<u8>>,
	pub ballot_count: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct DecryptionRow {
	pub election_center_id: i64,
	pub guardian_id: i64,
	pub tally_share: Vec<u8>,
	pub ballot_shares_blob: Vec<u8>,
	pub guardian_decryption_key: Vec<u8>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CompensatedDecryptionRow {
	pub election_center_id: i64,
	pub missing_guardian_id: i64,
	pub compensating_guardian_id: i64,
	pub tally_share: Vec<u8>,
	pub ballot_shares_blob: Vec<u8>,
}
