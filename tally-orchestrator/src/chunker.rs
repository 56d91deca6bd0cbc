// This file is part of the ElectionGuard tally orchestrator.

//! Splits a ballot id list into balanced, randomly-assigned chunks.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tally_common::{error::Result, model::BallotId};

/// Target number of ballots per chunk; callers translate
/// `tally_common::config::ChunkConfig::size` into this before calling in.
pub fn chunk_ballots(ballot_ids: &[BallotId], target_size: usize) -> Result<Vec<Vec<BallotId>>> {
	let b = ballot_ids.len();
	if b == 0 {
		return Ok(Vec::new());
	}
	if b <= target_size {
		return Ok(vec![ballot_ids.to_vec()]);
	}

	let n = b / target_size;
	let base = b / n;
	let remainder = b % n;

	let mut shuffled = ballot_ids.to_vec();
	let mut rng = StdRng::from_entropy();
	shuffled.shuffle(&mut rng);

	let mut chunks = Vec::with_capacity(n);
	let mut offset = 0;
	for i in 0..n {
		let size = if i < remainder { base + 1 } else { base };
		chunks.push(shuffled[offset..offset + size].to_vec());
		offset += size;
	}

	self_check(ballot_ids, &chunks)?;
	Ok(chunks)
}

/// Verifies the chunk set is a bijection on the input before handing it to
/// the phase controller: every ballot id appears exactly once, nothing is
/// invented or dropped.
fn self_check(ballot_ids: &[BallotId], chunks: &[Vec<BallotId>]) -> Result<()> {
	let total: usize = chunks.iter().map(|c| c.len()).sum();
	if total != ballot_ids.len() {
		return Err(tally_common::Error::validation(format!(
			"chunker self-check failed: produced {} ballots, expected {}",
			total,
			ballot_ids.len()
		)));
	}

	let mut expected: Vec<i64> = ballot_ids.iter().map(|b| b.0).collect();
	expected.sort_unstable();
	let mut actual: Vec<i64> = chunks.iter().flatten().map(|b| b.0).collect();
	actual.sort_unstable();
	if expected != actual {
		return Err(tally_common::Error::validation("chunker self-check failed: chunk contents are not a bijection on the input"));
	}

	for chunk in chunks {
		if chunk.is_empty() {
			return Err(tally_common::Error::validation("chunker self-check failed: produced an empty chunk"));
		}
	}

	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn ids(n: i64) -> Vec<BallotId> {
		(1..=n).map(BallotId).collect()
	}

	#[test]
	fn empty_input_yields_no_chunks() {
		assert!(chunk_ballots(&[], 64).unwrap().is_empty());
	}

	#[test]
	fn small_input_yields_one_chunk() {
		let chunks = chunk_ballots(&ids(3), 64).unwrap();
		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].len(), 3);
	}

	#[test]
	fn even_split() {
		let chunks = chunk_ballots(&ids(128), 64).unwrap();
		assert_eq!(chunks.len(), 2);
		assert!(chunks.iter().all(|c| c.len() == 64));
	}

	#[test]
	fn uneven_split_sizes_within_one_of_each_other() {
		let chunks = chunk_ballots(&ids(11), 3).unwrap();
		assert_eq!(chunks.len(), 3);
		let mut sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
		sizes.sort_unstable();
		assert_eq!(sizes, vec![3, 4, 4]);
	}

	#[test]
	fn bijection_holds_across_many_shapes() {
		for b in 0..200i64 {
			for s in 1..20usize {
				let input = ids(b);
				let chunks = chunk_ballots(&input, s).unwrap();
				let total: usize = chunks.iter().map(|c| c.len()).sum();
				assert_eq!(total, b as usize, "b={b} s={s}");
				let mut expected: Vec<i64> = input.iter().map(|x| x.0).collect();
				expected.sort_unstable();
				let mut actual: Vec<i64> = chunks.iter().flatten().map(|x| x.0).collect();
				actual.sort_unstable();
				assert_eq!(expected, actual, "b={b} s={s}");
				if b > 0 {
					let max = chunks.iter().map(|c| c.len()).max().unwrap();
					let min = chunks.iter().map(|c| c.len()).min().unwrap();
					assert!(max - min <= 1, "b={b} s={s} max={max} min={min}");
				}
			}
		}
	}

	#[test]
	fn target_size_boundary_yields_single_chunk() {
		let chunks = chunk_ballots(&ids(64), 64).unwrap();
		assert_eq!(chunks.len(), 1);
		let chunks = chunk_ballots(&ids(65), 64).unwrap();
		assert_eq!(chunks.len(), 1); // floor(65/64) == 1
	}
}
