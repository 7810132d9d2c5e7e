use crate::events::checkpoint::{CheckpointError, CheckpointState, Checkpointer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// On-disk checkpoint document.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointDocument {
	block_number: Option<u64>,
	#[serde(default)]
	transaction_ids: Vec<String>,
	#[serde(default)]
	updated_at: String,
}

/// Checkpointer persisted as a JSON file.
///
/// Every update rewrites the whole document through a temporary file followed by a rename, so a
/// crash leaves either the previous or the new checkpoint on disk.
pub struct FileCheckpointer {
	path: PathBuf,
	state: Mutex<CheckpointState>,
}

impl FileCheckpointer {
	/// Open the checkpoint at `path`, loading any state it already holds.
	///
	/// A missing file starts an empty checkpoint; the file is created on the first update.
	pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
		let path = path.into();
		let state = match tokio::fs::read_to_string(&path).await {
			Ok(content) => {
				let document: CheckpointDocument = serde_json::from_str(&content)?;
				info!(
					"Loaded checkpoint from {:?} at block {:?} ({} transactions)",
					path,
					document.block_number,
					document.transaction_ids.len()
				);
				CheckpointState {
					block_number: document.block_number,
					transaction_ids: document.transaction_ids.into_iter().collect(),
				}
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No checkpoint at {:?}, starting empty", path);
				CheckpointState::default()
			}
			Err(e) => return Err(e.into()),
		};

		Ok(Self {
			path,
			state: Mutex::new(state),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn persist(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
		let mut transaction_ids: Vec<String> = state.transaction_ids.iter().cloned().collect();
		transaction_ids.sort();
		let document = CheckpointDocument {
			block_number: state.block_number,
			transaction_ids,
			updated_at: chrono::Utc::now().to_rfc3339(),
		};
		let content = serde_json::to_string_pretty(&document)?;

		let mut tmp_path = self.path.clone().into_os_string();
		tmp_path.push(".tmp");
		let tmp_path = PathBuf::from(tmp_path);

		tokio::fs::write(&tmp_path, content).await?;
		tokio::fs::rename(&tmp_path, &self.path).await?;

		debug!(
			"Checkpoint saved to {:?} at block {:?}",
			self.path, state.block_number
		);
		Ok(())
	}
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
	async fn block_number(&self) -> Result<Option<u64>, CheckpointError> {
		Ok(self.state.lock().await.block_number)
	}

	async fn set_block_number(&self, block_number: u64) -> Result<(), CheckpointError> {
		let mut state = self.state.lock().await;
		let mut updated = state.clone();
		updated.set_block_number(block_number);
		self.persist(&updated).await?;
		*state = updated;
		Ok(())
	}

	async fn add_transaction_id(&self, transaction_id: &str) -> Result<(), CheckpointError> {
		let mut state = self.state.lock().await;
		if state.transaction_ids.contains(transaction_id) {
			return Ok(());
		}
		let mut updated = state.clone();
		updated.transaction_ids.insert(transaction_id.to_string());
		self.persist(&updated).await?;
		*state = updated;
		Ok(())
	}

	async fn transaction_ids(&self) -> Result<HashSet<String>, CheckpointError> {
		Ok(self.state.lock().await.transaction_ids.clone())
	}
}
