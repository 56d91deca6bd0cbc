// This file is part of the ElectionGuard tally orchestrator.

//! Bounded-concurrency RPC client to the cryptographic engine. Four logical
//! calls over HTTP-JSON; the engine itself is a black box beyond the
//! fields named here.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{OrchestratorError, Result};

const MAX_RETRY_ENGINE: u32 = 3;

pub struct EngineClient {
	http: reqwest::Client,
	base_url: String,
	pool: Semaphore,
	timeout: Duration,
}

impl EngineClient {
	pub fn new(base_url: impl Into<String>, pool_max: usize, timeout_ms: u64) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: base_url.into(),
			pool: Semaphore::new(pool_max),
			timeout: Duration::from_millis(timeout_ms),
		}
	}

	async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(&self, path: &str, request: &Req) -> Result<Resp> {
		let request_id = uuid::Uuid::new_v4();
		// The permit caps in-flight requests; reqwest's own pool has no
		// upper bound, so this is the actual "bounded connection pool".
		let _permit = self.pool.acquire().await.expect("semaphore is never closed");

		let mut attempt = 0u32;
		loop {
			attempt += 1;
			info!("engine call path={path} request_id={request_id} attempt={attempt}");
			let result = self
				.http
				.post(format!("{}{}", self.base_url, path))
				.timeout(self.timeout)
				.json(request)
				.send()
				.await
				.and_then(reqwest::Response::error_for_status);

			match result {
				Ok(response) => {
					return response.json::<Resp>().await.map_err(|e| {
						OrchestratorError::engine(format!("engine response decode failed: path={path} request_id={request_id}: {e}"))
					});
				}
				Err(e) if attempt < MAX_RETRY_ENGINE => {
					warn!("engine call transport failure, retrying: path={path} request_id={request_id} attempt={attempt}: {e}");
					tokio::time::sleep(Duration::from_secs(2) * attempt).await;
				}
				Err(e) => {
					return Err(OrchestratorError::engine(format!(
						"engine call failed after {attempt} attempts: path={path} request_id={request_id}: {e}"
					)));
				}
			}
		}
	}

	pub async fn tally(&self, request: TallyRequest) -> Result<TallyResponse> {
		let response: RawTallyResponse = self.post("/tally", &request).await?;
		Ok(TallyResponse {
			ciphertext_tally: non_null(response.ciphertext_tally, "ciphertext_tally")?,
			submitted_ballots: response.submitted_ballots,
		})
	}

	pub async fn partial_decrypt(&self, request: PartialDecryptRequest) -> Result<PartialDecryptResponse> {
		let response: RawPartialDecryptResponse = self.post("/partial_decrypt", &request).await?;
		Ok(PartialDecryptResponse {
			tally_share: non_null(response.tally_share, "tally_share")?,
			ballot_shares: response.ballot_shares,
			guardian_public_key: non_null(response.guardian_public_key, "guardian_public_key")?,
		})
	}

	pub async fn compensated_decrypt(&self, request: CompensatedDecryptRequest) -> Result<CompensatedDecryptResponse> {
		let response: RawCompensatedDecryptResponse = self.post("/compensated_decrypt", &request).await?;
		Ok(CompensatedDecryptResponse {
			compensated_tally_share: non_null(response.compensated_tally_share, "compensated_tally_share")?,
			compensated_ballot_shares: response.compensated_ballot_shares,
		})
	}

	pub async fn combine(&self, request: CombineRequest) -> Result<CombineResponse> {
		let response: RawCombineResponse = self.post("/combine", &request).await?;
		Ok(CombineResponse { results: non_null(response.results, "results")? })
	}
}

/// A null/missing required output field is a hard engine-side error, never
/// retried.
fn non_null<T>(value: Option<T>, field: &str) -> Result<T> {
	value.ok_or_else(|| OrchestratorError::state(format!("engine response missing required field `{field}`")))
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardianData {
	pub id: i64,
	pub sequence_order: u32,
	pub public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TallyRequest {
	pub parties: u32,
	pub candidates: u32,
	pub joint_public_key: Vec<u8>,
	pub base_hash: Vec<u8>,
	pub ciphertexts: Vec<Vec<u8>>,
	pub n: u32,
	pub k: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTallyResponse {
	ciphertext_tally: Option<Vec<u8>>,
	submitted_ballots: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct TallyResponse {
	pub ciphertext_tally: Vec<u8>,
	pub submitted_ballots: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartialDecryptRequest {
	pub guardian_data: GuardianData,
	pub private_key: Vec<u8>,
	pub public_key: Vec<u8>,
	pub polynomial: Vec<u8>,
	pub parties: u32,
	pub candidates: u32,
	pub ciphertext_tally: Vec<u8>,
	pub submitted_ballots: Vec<Vec<u8>>,
	pub joint_public_key: Vec<u8>,
	pub base_hash: Vec<u8>,
	pub n: u32,
	pub k: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPartialDecryptResponse {
	tally_share: Option<Vec<u8>>,
	ballot_shares: Vec<Vec<u8>>,
	guardian_public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct PartialDecryptResponse {
	pub tally_share: Vec<u8>,
	pub ballot_shares: Vec<Vec<u8>>,
	pub guardian_public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompensatedDecryptRequest {
	pub available_guardian_data: GuardianData,
	pub available_private_key: Vec<u8>,
	pub available_public_key: Vec<u8>,
	pub available_polynomial: Vec<u8>,
	pub missing_guardian_data: GuardianData,
	pub parties: u32,
	pub candidates: u32,
	pub ciphertext_tally: Vec<u8>,
	pub submitted_ballots: Vec<Vec<u8>>,
	pub joint_public_key: Vec<u8>,
	pub base_hash: Vec<u8>,
	pub n: u32,
	pub k: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCompensatedDecryptResponse {
	compensated_tally_share: Option<Vec<u8>>,
	compensated_ballot_shares: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct CompensatedDecryptResponse {
	pub compensated_tally_share: Vec<u8>,
	pub compensated_ballot_shares: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardianShare {
	pub guardian_id: i64,
	pub public_key: Vec<u8>,
	pub tally_share: Vec<u8>,
	/// Opaque blob as returned by `partial_decrypt`/`compensated_decrypt` and
	/// stored verbatim in `ballot_shares_blob` — never deserialized here.
	pub ballot_shares_blob: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompensatingShare {
	pub missing_guardian_id: i64,
	pub compensating_guardian_id: i64,
	pub tally_share: Vec<u8>,
	pub ballot_shares_blob: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CombineRequest {
	pub parties: u32,
	pub candidates: u32,
	pub ciphertext_tally: Vec<u8>,
	pub submitted_ballots: Vec<Vec<u8>>,
	pub joint_public_key: Vec<u8>,
	pub base_hash: Vec<u8>,
	pub n: u32,
	pub k: u32,
	pub guardian_data: Vec<GuardianData>,
	pub available_shares: Vec<GuardianShare>,
	pub compensating_shares: Vec<CompensatingShare>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCombineResponse {
	results: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct CombineResponse {
	pub results: Vec<u8>,
}
