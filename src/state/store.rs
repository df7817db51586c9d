//! JSON snapshot store

use crate::bridge::BridgeOperation;
use crate::error::{BridgeError, BridgeResult};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// File-backed snapshots of non-terminal operations.
///
/// The whole file is rewritten on every save through a temporary file and a
/// rename, so a crash leaves either the old or the new snapshot.
pub struct OperationStore {
    path: PathBuf,
    operations: Mutex<BTreeMap<Uuid, BridgeOperation>>,
}

impl OperationStore {
    /// Open the store at `path`, reading any existing snapshot
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| BridgeError::Storage(format!("create {:?}: {}", parent, e)))?;
        }

        let operations = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str::<Vec<BridgeOperation>>(&text)
                .map_err(|e| BridgeError::Storage(format!("parse {:?}: {}", path, e)))?
                .into_iter()
                .filter(|op| !op.state().is_terminal())
                .map(|op| (op.id, op))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(BridgeError::Storage(format!("read {:?}: {}", path, e))),
        };

        info!(path = ?path, resumable = operations.len(), "Operation store opened");
        Ok(Self {
            path,
            operations: Mutex::new(operations),
        })
    }

    /// Operations to resume, oldest first
    pub fn load(&self) -> BridgeResult<Vec<BridgeOperation>> {
        let operations = self.lock()?;
        let mut pending: Vec<_> = operations.values().cloned().collect();
        pending.sort_by_key(|op| op.created_at);
        Ok(pending)
    }

    /// Record the latest state of `op`; terminal operations are dropped
    pub fn save(&self, op: &BridgeOperation) -> BridgeResult<()> {
        let mut operations = self.lock()?;
        if op.state().is_terminal() {
            operations.remove(&op.id);
        } else {
            operations.insert(op.id, op.clone());
        }
        self.persist(&operations)
    }

    fn lock(&self) -> BridgeResult<std::sync::MutexGuard<'_, BTreeMap<Uuid, BridgeOperation>>> {
        self.operations
            .lock()
            .map_err(|_| BridgeError::Storage("store lock poisoned".to_string()))
    }

    fn persist(&self, operations: &BTreeMap<Uuid, BridgeOperation>) -> BridgeResult<()> {
        let snapshot: Vec<&BridgeOperation> = operations.values().collect();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| BridgeError::Storage(format!("serialize: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| BridgeError::Storage(format!("write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| BridgeError::Storage(format!("rename {:?}: {}", tmp, e)))?;

        debug!(path = ?self.path, operations = operations.len(), "Snapshot written");
        Ok(())
    }
}
