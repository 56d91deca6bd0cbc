// This file is part of the ElectionGuard tally orchestrator.

//! Plain SQL queries against the tables sketched in the data model,
//! abstracted into Rust functions. Every write is uniqueness-keyed so a
//! redelivered worker message is a no-op rather than a duplicate row.

use sqlx::{PgConnection, Row};
use tally_common::model::{BallotId, ChunkId, ElectionId, GuardianId};

use crate::{
	database::models::{BallotRow, ChunkRow, CompensatedDecryptionRow, DecryptionRow, ElectionRow, GuardianRow},
	error::Result,
};

pub async fn get_election(conn: &mut PgConnection, election_id: ElectionId) -> Result<Option<ElectionRow>> {
	Ok(sqlx::query_as::<_, ElectionRow>(
		"SELECT id, ending_time, joint_public_key, base_hash, quorum, guardian_count FROM elections WHERE id = $1",
	)
	.bind(election_id.0)
	.fetch_optional(conn)
	.await?)
}

pub async fn list_guardians(conn: &mut PgConnection, election_id: ElectionId) -> Result<Vec<GuardianRow>> {
	Ok(sqlx::query_as::<_, GuardianRow>(
		"SELECT id, election_id, sequence_order, public_key, encrypted_private_key_blob, encrypted_polynomial_blob, \
		 key_backup_blob, decrypted_flag, verification_key_hex FROM guardians WHERE election_id = $1 ORDER BY sequence_order",
	)
	.bind(election_id.0)
	.fetch_all(conn)
	.await?)
}

pub async fn get_guardian(conn: &mut PgConnection, election_id: ElectionId, guardian_id: GuardianId) -> Result<Option<GuardianRow>> {
	Ok(sqlx::query_as::<_, GuardianRow>(
		"SELECT id, election_id, sequence_order, public_key, encrypted_private_key_blob, encrypted_polynomial_blob, \
		 key_backup_blob, decrypted_flag, verification_key_hex FROM guardians WHERE election_id = $1 AND id = $2",
	)
	.bind(election_id.0)
	.bind(guardian_id.0)
	.fetch_optional(conn)
	.await?)
}

pub async fn mark_guardian_decrypted(conn: &mut PgConnection, election_id: ElectionId, guardian_id: GuardianId) -> Result<()> {
	sqlx::query("UPDATE guardians SET decrypted_flag = true WHERE election_id = $1 AND id = $2")
		.bind(election_id.0)
		.bind(guardian_id.0)
		.execute(conn)
		.await?;
	Ok(())
}

pub async fn list_cast_ballot_ids(conn: &mut PgConnection, election_id: ElectionId) -> Result<Vec<BallotId>> {
	let rows = sqlx::query("SELECT id FROM ballots WHERE election_id = $1 AND status = 'cast'").bind(election_id.0).fetch_all(conn).await?;
	Ok(rows.iter().map(|r| BallotId(r.get::<i64, _>("id"))).collect())
}

pub async fn get_ballot(conn: &mut PgConnection, ballot_id: BallotId) -> Result<Option<BallotRow>> {
	Ok(sqlx::query_as::<_, BallotRow>("SELECT id, election_id, status, ciphertext, tracking_code FROM ballots WHERE id = $1")
		.bind(ballot_id.0)
		.fetch_optional(conn)
		.await?)
}

pub async fn count_chunks(conn: &mut PgConnection, election_id: ElectionId) -> Result<i64> {
	let row = sqlx::query("SELECT COUNT(*) AS count FROM chunks WHERE election_id = $1").bind(election_id.0).fetch_one(conn).await?;
	Ok(row.get("count"))
}

/// Creates one empty chunk row; `id` is monotone (`BIGSERIAL`). Called once
/// per chunk at phase-1 start, before any worker touches it.
pub async fn create_chunk(conn: &mut PgConnection, election_id: ElectionId, ballot_count: u32) -> Result<ChunkId> {
	let row = sqlx::query("INSERT INTO chunks (election_id, ballot_count) VALUES ($1, $2) RETURNING id")
		.bind(election_id.0)
		.bind(ballot_count as i32)
		.fetch_one(conn)
		.await?;
	Ok(ChunkId(row.get("id")))
}

pub async fn list_chunk_ids(conn: &mut PgConnection, election_id: ElectionId) -> Result<Vec<ChunkId>> {
	let rows = sqlx::query("SELECT id FROM chunks WHERE election_id = $1 ORDER BY id").bind(election_id.0).fetch_all(conn).await?;
	Ok(rows.iter().map(|r| ChunkId(r.get::<i64, _>("id"))).collect())
}

pub async fn get_chunk(conn: &mut PgConnection, chunk_id: ChunkId) -> Result<Option<ChunkRow>> {
	Ok(sqlx::query_as::<_, ChunkRow>("SELECT id, election_id, encrypted_tally, plaintext_result, ballot_count FROM chunks WHERE id = $1")
		.bind(chunk_id.0)
		.fetch_optional(conn)
		.await?)
}

/// Written exactly once per chunk by the tally worker. `WHERE encrypted_tally
/// IS NULL` makes a redelivered message a no-op rather than an overwrite.
pub async fn set_chunk_encrypted_tally(conn: &mut PgConnection, chunk_id: ChunkId, encrypted_tally: &[u8]) -> Result<()> {
	sqlx::query("UPDATE chunks SET encrypted_tally = $2 WHERE id = $1 AND encrypted_tally IS NULL")
		.bind(chunk_id.0)
		.bind(encrypted_tally)
		.execute(conn)
		.await?;
	Ok(())
}

pub async fn set_chunk_plaintext_result(conn: &mut PgConnection, chunk_id: ChunkId, plaintext_result: &[u8]) -> Result<()> {
	sqlx::query("UPDATE chunks SET plaintext_result = $2 WHERE id = $1 AND plaintext_result IS NULL")
		.bind(chunk_id.0)
		.bind(plaintext_result)
		.execute(conn)
		.await?;
	Ok(())
}

pub async fn insert_submitted_ballots(conn: &mut PgConnection, chunk_id: ChunkId, ciphertexts: &[Vec<u8>]) -> Result<()> {
	for ciphertext in ciphertexts {
		sqlx::query("INSERT INTO submitted_ballots (election_center_id, ciphertext) VALUES ($1, $2) ON CONFLICT DO NOTHING")
			.bind(chunk_id.0)
			.bind(ciphertext)
			.execute(&mut *conn)
			.await?;
	}
	Ok(())
}

pub async fn list_submitted_ballots(conn: &mut PgConnection, chunk_id: ChunkId) -> Result<Vec<Vec<u8>>> {
	let rows = sqlx::query("SELECT ciphertext FROM submitted_ballots WHERE election_center_id = $1").bind(chunk_id.0).fetch_all(conn).await?;
	Ok(rows.iter().map(|r| r.get::<Vec<u8>, _>("ciphertext")).collect())
}

pub async fn upsert_decryption(
	conn: &mut PgConnection,
	chunk_id: ChunkId,
	guardian_id: GuardianId,
	tally_share: &[u8],
	ballot_shares_blob: &[u8],
	guardian_decryption_key: &[u8],
) -> Result<()> {
	sqlx::query(
		"INSERT INTO decryptions (election_center_id, guardian_id, tally_share, ballot_shares_blob, guardian_decryption_key) \
		 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (election_center_id, guardian_id) DO NOTHING",
	)
	.bind(chunk_id.0)
	.bind(guardian_id.0)
	.bind(tally_share)
	.bind(ballot_shares_blob)
	.bind(guardian_decryption_key)
	.execute(conn)
	.await?;
	Ok(())
}

pub async fn get_decryption(conn: &mut PgConnection, chunk_id: ChunkId, guardian_id: GuardianId) -> Result<Option<DecryptionRow>> {
	Ok(sqlx::query_as::<_, DecryptionRow>(
		"SELECT election_center_id, guardian_id, tally_share, ballot_shares_blob, guardian_decryption_key FROM decryptions \
		 WHERE election_center_id = $1 AND guardian_id = $2",
	)
	.bind(chunk_id.0)
	.bind(guardian_id.0)
	.fetch_optional(conn)
	.await?)
}

pub async fn upsert_compensated_decryption(
	conn: &mut PgConnection,
	chunk_id: ChunkId,
	missing_guardian_id: GuardianId,
	compensating_guardian_id: GuardianId,
	tally_share: &[u8],
	ballot_shares_blob: &[u8],
) -> Result<()> {
	sqlx::query(
		"INSERT INTO compensated_decryptions \
		 (election_center_id, missing_guardian_id, compensating_guardian_id, tally_share, ballot_shares_blob) \
		 VALUES ($1, $2, $3, $4, $5) \
		 ON CONFLICT (election_center_id, missing_guardian_id, compensating_guardian_id) DO NOTHING",
	)
	.bind(chunk_id.0)
	.bind(missing_guardian_id.0)
	.bind(compensating_guardian_id.0)
	.bind(tally_share)
	.bind(ballot_shares_blob)
	.execute(conn)
	.await?;
	Ok(())
}

pub async fn list_compensated_for_chunk(conn: &mut PgConnection, chunk_id: ChunkId) -> Result<Vec<CompensatedDecryptionRow>> {
	Ok(sqlx::query_as::<_, CompensatedDecryptionRow>(
		"SELECT election_center_id, missing_guardian_id, compensating_guardian_id, tally_share, ballot_shares_blob \
		 FROM compensated_decryptions WHERE election_center_id = $1",
	)
	.bind(chunk_id.0)
	.fetch_all(conn)
	.await?)
}
