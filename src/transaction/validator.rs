//! Endorsement response validation.
//!
//! Classifies the raw responses collected from endorsers into valid and invalid sets. A call
//! only proceeds to ordering when at least one endorser answered with a status below 400; the
//! payload of the first valid response becomes the result of the call. Comparing payloads
//! across endorsers is left to the endorsement policy.

use crate::gateway::EndorsementResponse;

use itertools::Itertools;
use std::fmt;
use tracing::{debug, warn};

/// Aggregate of the endorsement responses for one invocation.
#[derive(Debug, Clone)]
pub struct EndorsementResult {
	/// Responses with `status < 400` and no transport error, in arrival order.
	pub valid: Vec<EndorsementResponse>,
	/// Every other response.
	pub invalid: Vec<EndorsementResponse>,
	/// Payload of the first valid response.
	pub payload: Vec<u8>,
}

/// Diagnostics for one endorser that did not produce a valid response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorsementFailure {
	pub peer: String,
	pub status: Option<i32>,
	pub message: String,
}

impl EndorsementFailure {
	pub(crate) fn from_response(response: &EndorsementResponse) -> Self {
		let message = match &response.error {
			Some(error) => error.clone(),
			None => response.message.clone(),
		};
		Self {
			peer: response.peer.clone(),
			status: response.status,
			message,
		}
	}
}

impl fmt::Display for EndorsementFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.status {
			Some(status) => write!(
				f,
				"peer={}, status={}, message={}",
				self.peer, status, self.message
			),
			None => write!(
				f,
				"peer={}, status=none, message={}",
				self.peer, self.message
			),
		}
	}
}

/// Every endorser failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
	"No valid responses from any peers. {} peer error responses:\n    {}",
	.failures.len(),
	.failures.iter().join("\n    ")
)]
pub struct EndorsementError {
	pub failures: Vec<EndorsementFailure>,
}

/// Partition `responses` and produce the aggregate result.
///
/// # Errors
/// Returns an `EndorsementError` with one entry per response when none of them is valid.
pub fn validate(
	responses: Vec<EndorsementResponse>,
) -> Result<EndorsementResult, EndorsementError> {
	let (valid, invalid): (Vec<_>, Vec<_>) = responses
		.into_iter()
		.partition(EndorsementResponse::is_valid);

	let Some(first) = valid.first() else {
		return Err(EndorsementError {
			failures: invalid.iter().map(EndorsementFailure::from_response).collect(),
		});
	};

	for response in &invalid {
		warn!(
			"Ignoring invalid endorsement response: {}",
			EndorsementFailure::from_response(response)
		);
	}
	debug!(
		"Endorsement validated: {} valid, {} invalid responses",
		valid.len(),
		invalid.len()
	);

	let payload = first.payload.clone();
	Ok(EndorsementResult {
		valid,
		invalid,
		payload,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn response(peer: &str, status: Option<i32>, payload: &[u8]) -> EndorsementResponse {
		EndorsementResponse {
			peer: peer.to_string(),
			status,
			message: format!("message from {}", peer),
			payload: payload.to_vec(),
			..Default::default()
		}
	}

	#[test]
	fn first_valid_payload_is_the_result() {
		let result = validate(vec![
			response("peer0.org1", Some(500), b"bad"),
			response("peer0.org2", Some(200), b"first"),
			response("peer1.org2", Some(200), b"second"),
		])
		.unwrap();

		assert_eq!(result.payload, b"first");
		assert_eq!(result.valid.len(), 2);
		assert_eq!(result.invalid.len(), 1);
	}

	#[test]
	fn status_399_is_valid_and_400_is_not() {
		let result = validate(vec![
			response("a", Some(400), b"no"),
			response("b", Some(399), b"yes"),
		])
		.unwrap();
		assert_eq!(result.payload, b"yes");
		assert_eq!(result.invalid[0].peer, "a");
	}

	#[test]
	fn missing_status_and_transport_errors_are_invalid() {
		let mut unreachable = response("peer1.org1", Some(200), b"");
		unreachable.error = Some("connection refused".to_string());

		let error = validate(vec![response("peer0.org1", None, b"x"), unreachable]).unwrap_err();

		assert_eq!(error.failures.len(), 2);
		assert_eq!(error.failures[0].status, None);
		assert_eq!(error.failures[1].message, "connection refused");
	}

	#[test]
	fn error_message_lists_every_failed_peer() {
		let error = validate(vec![
			response("peer0.org1", Some(500), b""),
			response("peer0.org2", Some(403), b""),
		])
		.unwrap_err();

		let message = error.to_string();
		let lines: Vec<&str> = message.lines().collect();
		assert_eq!(lines.len(), 3);
		assert!(lines[0].contains("2 peer error responses"));
		assert_eq!(
			lines[1].trim(),
			"peer=peer0.org1, status=500, message=message from peer0.org1"
		);
		assert_eq!(
			lines[2].trim(),
			"peer=peer0.org2, status=403, message=message from peer0.org2"
		);
	}

	#[test]
	fn no_responses_is_an_error() {
		let error = validate(Vec::new()).unwrap_err();
		assert!(error.failures.is_empty());
	}
}
