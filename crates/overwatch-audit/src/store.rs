use crate::types::AuditRecord;
use async_trait::async_trait;
use overwatch_core::{OverwatchError, OverwatchResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Durable home of audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, record: &AuditRecord) -> OverwatchResult<()>;

    async fn load(&self, id: Uuid) -> OverwatchResult<Option<AuditRecord>>;

    /// All records, oldest first.
    async fn list(&self) -> OverwatchResult<Vec<AuditRecord>>;
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    records: RwLock<HashMap<Uuid, AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn save(&self, record: &AuditRecord) -> OverwatchResult<()> {
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> OverwatchResult<Option<AuditRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn list(&self) -> OverwatchResult<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.start_time);
        Ok(records)
    }
}

/// One pretty-printed JSON file per record, named by audit id.
pub struct JsonAuditStore {
    base_dir: PathBuf,
}

impl JsonAuditStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl AuditStore for JsonAuditStore {
    async fn save(&self, record: &AuditRecord) -> OverwatchResult<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(OverwatchError::Io)?;
        let json = serde_json::to_string_pretty(record)?;
        // Write-then-rename so readers never see a partial file.
        let tmp = self.base_dir.join(format!(".{}.tmp", record.id));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(OverwatchError::Io)?;
        tokio::fs::rename(&tmp, self.path_for(record.id))
            .await
            .map_err(OverwatchError::Io)?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> OverwatchResult<Option<AuditRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(OverwatchError::Io)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn list(&self) -> OverwatchResult<Vec<AuditRecord>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(OverwatchError::Io)?;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(OverwatchError::Io)?;
            records.push(serde_json::from_str::<AuditRecord>(&content)?);
        }
        records.sort_by_key(|r| r.start_time);
        Ok(records)
    }
}
