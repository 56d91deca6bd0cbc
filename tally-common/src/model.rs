// This file is part of the ElectionGuard tally orchestrator.

//! Opaque id newtypes shared by every crate in the workspace. Row shapes
//! live solely in `tally-orchestrator::database::models`; there is no
//! separate storage-agnostic domain layer to keep in sync with them.

use serde::{Deserialize, Serialize};

/// Opaque identifier newtypes so a `GuardianId` can never be passed where an
/// `ElectionId` is expected, even though both are `i64` underneath.
macro_rules! id_newtype {
	($name:ident) => {
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		pub struct $name(pub i64);

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0)
			}
		}
	};
}

id_newtype!(ElectionId);
id_newtype!(GuardianId);
id_newtype!(BallotId);
id_newtype!(ChunkId);
