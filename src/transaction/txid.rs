//! Transaction identifiers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length in bytes of the random nonce mixed into every transaction id.
pub const NONCE_LENGTH: usize = 24;

/// Identifier of a transaction invocation: hex encoded SHA-256 of `nonce || creator`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
	/// Generate a fresh id for `creator`, returning the id and the nonce it was derived from.
	pub fn generate(creator: &[u8]) -> (Self, Vec<u8>) {
		let mut nonce = [0u8; NONCE_LENGTH];
		rand::rng().fill(&mut nonce);
		let id = Self::from_nonce(&nonce, creator);
		(id, nonce.to_vec())
	}

	/// Derive the id for a known nonce and creator.
	pub fn from_nonce(nonce: &[u8], creator: &[u8]) -> Self {
		let mut hasher = Sha256::new();
		hasher.update(nonce);
		hasher.update(creator);
		Self(hex::encode(hasher.finalize()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for TransactionId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for TransactionId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl PartialEq<str> for TransactionId {
	fn eq(&self, other: &str) -> bool {
		self.0 == other
	}
}
