//! Types exchanged with the gateway collaborator and the ledger record decoder.
//!
//! Everything in here is plain data: proposals going out, responses coming back, and the
//! already-decoded block contents delivered by a peer's event service.

use crate::transaction::TransactionId;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Granularity of the events delivered by a peer's event service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
	/// Complete blocks including transaction payloads and chaincode event payloads.
	#[default]
	Full,
	/// Block metadata only; chaincode events carry no payload.
	Filtered,
	/// Complete blocks plus private data hints.
	Private,
}

impl fmt::Display for BlockType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BlockType::Full => write!(f, "full"),
			BlockType::Filtered => write!(f, "filtered"),
			BlockType::Private => write!(f, "private"),
		}
	}
}

/// Validation code assigned to a transaction by the committing peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
	Valid,
	MvccReadConflict,
	PhantomReadConflict,
	EndorsementPolicyFailure,
	DuplicateTxid,
	BadPayload,
	/// Any other code reported by the peer, kept verbatim.
	#[serde(untagged)]
	Other(String),
}

impl ValidationCode {
	/// Check if the transaction was committed as valid and should be surfaced to contract listeners
	pub fn is_valid(&self) -> bool {
		matches!(self, ValidationCode::Valid)
	}

	pub fn as_str(&self) -> &str {
		match self {
			ValidationCode::Valid => "VALID",
			ValidationCode::MvccReadConflict => "MVCC_READ_CONFLICT",
			ValidationCode::PhantomReadConflict => "PHANTOM_READ_CONFLICT",
			ValidationCode::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
			ValidationCode::DuplicateTxid => "DUPLICATE_TXID",
			ValidationCode::BadPayload => "BAD_PAYLOAD",
			ValidationCode::Other(code) => code,
		}
	}
}

impl fmt::Display for ValidationCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Roles a peer plays on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRoles {
	pub endorsing_peer: bool,
	pub chaincode_query: bool,
	pub ledger_query: bool,
	pub event_source: bool,
}

impl Default for PeerRoles {
	fn default() -> Self {
		Self {
			endorsing_peer: true,
			chaincode_query: true,
			ledger_query: true,
			event_source: true,
		}
	}
}

/// A peer known to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
	/// Unique peer name, used as the peer identity in diagnostics.
	pub name: String,
	/// Membership id of the organization owning the peer.
	pub msp_id: String,
	/// Endpoint URL, only interpreted by the gateway collaborator.
	pub url: String,
	#[serde(default)]
	pub roles: PeerRoles,
}

impl Peer {
	pub fn new(name: impl Into<String>, msp_id: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			msp_id: msp_id.into(),
			url: url.into(),
			roles: PeerRoles::default(),
		}
	}

	pub fn with_roles(mut self, roles: PeerRoles) -> Self {
		self.roles = roles;
		self
	}
}

/// An ordering service node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderer {
	pub name: String,
	pub url: String,
}

impl Orderer {
	pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			url: url.into(),
		}
	}
}

/// The already-loaded signing identity used to create transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	/// Membership id of the identity's organization ("local organization").
	pub msp_id: String,
	/// Serialized credentials, used as the transaction creator.
	pub credentials: Vec<u8>,
}

impl Identity {
	pub fn new(msp_id: impl Into<String>, credentials: impl Into<Vec<u8>>) -> Self {
		Self {
			msp_id: msp_id.into(),
			credentials: credentials.into(),
		}
	}
}

/// An unsigned transaction proposal. Signing happens in the gateway collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
	pub transaction_id: TransactionId,
	pub channel: String,
	pub chaincode_id: String,
	pub function: String,
	pub args: Vec<Vec<u8>>,
	pub transient: HashMap<String, Vec<u8>>,
	pub nonce: Vec<u8>,
	pub creator: Vec<u8>,
}

/// Raw answer from a single peer to a proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalResponse {
	/// Chaincode response status. Absent when the peer sent no response body.
	pub status: Option<i32>,
	pub message: String,
	pub payload: Vec<u8>,
	/// Endorser signature over the response, opaque to this crate.
	pub endorsement: Vec<u8>,
}

/// One endorser's answer, as consumed by the endorsement validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndorsementResponse {
	pub peer: String,
	pub status: Option<i32>,
	pub message: String,
	pub payload: Vec<u8>,
	pub endorsement: Vec<u8>,
	/// Transport-level failure, if the peer could not be reached.
	pub error: Option<String>,
}

impl EndorsementResponse {
	pub fn from_response(peer: impl Into<String>, response: ProposalResponse) -> Self {
		Self {
			peer: peer.into(),
			status: response.status,
			message: response.message,
			payload: response.payload,
			endorsement: response.endorsement,
			error: None,
		}
	}

	pub fn from_error(peer: impl Into<String>, error: &GatewayError) -> Self {
		Self {
			peer: peer.into(),
			error: Some(error.to_string()),
			..Default::default()
		}
	}

	/// A response is valid when it was received and its status is below 400.
	pub fn is_valid(&self) -> bool {
		self.error.is_none() && matches!(self.status, Some(status) if status < 400)
	}
}

/// Endorsed transaction forwarded to the ordering service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
	pub transaction_id: TransactionId,
	pub proposal: Proposal,
	pub endorsements: Vec<EndorsementResponse>,
}

/// Ordering service acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponse {
	pub status: String,
	pub message: String,
}

impl CommitResponse {
	pub const SUCCESS: &'static str = "SUCCESS";

	pub fn success() -> Self {
		Self {
			status: Self::SUCCESS.to_string(),
			message: String::new(),
		}
	}

	pub fn is_success(&self) -> bool {
		self.status == Self::SUCCESS
	}
}

/// Start request for a peer's event service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventServiceRequest {
	pub block_type: BlockType,
	/// First block to deliver. `None` means "from now".
	pub start_block: Option<u64>,
}

/// A chaincode event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeEvent {
	pub chaincode_id: String,
	pub event_name: String,
	/// Event payload. `None` in filtered blocks.
	#[serde(default)]
	pub payload: Option<Vec<u8>>,
}

/// A decoded transaction inside a delivered block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
	pub transaction_id: String,
	pub validation_code: ValidationCode,
	#[serde(default)]
	pub chaincode_events: Vec<ChaincodeEvent>,
	/// Private data written by the transaction. Only present in private blocks.
	#[serde(default)]
	pub private_data: Option<Vec<u8>>,
}

/// One decoded event-service delivery: a block and its transactions in block order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
	pub block_number: u64,
	pub block_type: BlockType,
	#[serde(default)]
	pub transactions: Vec<TransactionInfo>,
	/// Raw block bytes for full and private blocks, opaque to this crate.
	#[serde(default)]
	pub raw_block: Option<Vec<u8>>,
}

/// Error types for gateway operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
	#[error("Connection error for {target}: {message}")]
	Connection { target: String, message: String },

	#[error("Request to {target} timed out after {timeout:?}")]
	Timeout { target: String, timeout: Duration },

	#[error("Event stream error from {peer}: {message}")]
	Stream { peer: String, message: String },

	#[error("Discovery error: {0}")]
	Discovery(String),
}

impl GatewayError {
	pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
		GatewayError::Connection {
			target: target.into(),
			message: message.into(),
		}
	}
}
