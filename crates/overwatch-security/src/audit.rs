use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Hash that precedes the first entry of every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Denied,
    Error,
}

/// One link of the trail. `hash` covers every other field plus `prev_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    /// Agent id, audit id or other object the action applied to.
    pub subject: Option<String>,
    pub details: serde_json::Value,
    pub outcome: AuditOutcome,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_be_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.actor.as_bytes());
        hasher.update([0]);
        hasher.update(self.action.as_bytes());
        hasher.update([0]);
        hasher.update(self.subject.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0]);
        hasher.update(self.details.to_string().as_bytes());
        hasher.update(format!("{:?}", self.outcome).as_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Position and reason of the first broken link found by [`AuditTrail::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub seq: u64,
    pub reason: &'static str,
}

struct Chain {
    entries: Vec<AuditEntry>,
    head: String,
}

/// Append-only audit trail that records every transition and privileged action.
///
/// Entries are kept in memory for queries and, when built with
/// [`AuditTrail::persistent`], mirrored as JSON lines by a background writer.
pub struct AuditTrail {
    chain: Mutex<Chain>,
    tx: Option<mpsc::UnboundedSender<AuditEntry>>,
}

impl AuditTrail {
    /// In-memory trail.
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(Chain {
                entries: Vec::new(),
                head: GENESIS_HASH.to_string(),
            }),
            tx: None,
        }
    }

    /// Trail mirrored to `<log_dir>/audit.jsonl`. Spawns the writer task, so it
    /// must be called from inside a tokio runtime.
    pub fn persistent(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;

            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "Cannot create audit directory");
            }
            let log_file = log_dir.join("audit.jsonl");
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    warn!(file = %log_file.display(), error = %e, "Cannot open audit file");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&entry) else {
                    continue;
                };
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(seq = entry.seq, error = %e, "Failed to persist audit entry");
                }
                let _ = file.flush().await;
            }
        });

        Self {
            tx: Some(tx),
            ..Self::new()
        }
    }

    /// Append an entry, linking it to the current head.
    pub fn record(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        subject: Option<String>,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) -> AuditEntry {
        let entry = {
            let mut chain = self.chain.lock();
            let mut entry = AuditEntry {
                seq: chain.entries.len() as u64,
                timestamp: Utc::now(),
                actor: actor.into(),
                action: action.into(),
                subject,
                details,
                outcome,
                prev_hash: chain.head.clone(),
                hash: String::new(),
            };
            entry.hash = entry.digest();
            chain.head = entry.hash.clone();
            chain.entries.push(entry.clone());
            entry
        };

        info!(
            seq = entry.seq,
            actor = %entry.actor,
            action = %entry.action,
            subject = entry.subject.as_deref().unwrap_or("-"),
            outcome = ?entry.outcome,
            "audit"
        );
        if let Some(tx) = &self.tx {
            let _ = tx.send(entry.clone());
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.chain.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.lock().entries.is_empty()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.chain.lock().entries.clone()
    }

    /// Entries whose subject is `subject`.
    pub fn entries_for(&self, subject: &str) -> Vec<AuditEntry> {
        self.chain
            .lock()
            .entries
            .iter()
            .filter(|e| e.subject.as_deref() == Some(subject))
            .cloned()
            .collect()
    }

    /// Entries with the given action name, e.g. `"transition"`.
    pub fn entries_with_action(&self, action: &str) -> Vec<AuditEntry> {
        self.chain
            .lock()
            .entries
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// Recompute every hash and link. Returns the first break, if any.
    pub fn verify_chain(&self) -> Result<(), ChainBreak> {
        verify_entries(&self.chain.lock().entries)
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify an exported slice of entries (for example a reloaded jsonl file).
pub fn verify_entries(entries: &[AuditEntry]) -> Result<(), ChainBreak> {
    let mut prev = GENESIS_HASH;
    for (i, entry) in entries.iter().enumerate() {
        if entry.seq != i as u64 {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "sequence gap",
            });
        }
        if entry.prev_hash != prev {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "broken link",
            });
        }
        if entry.digest() != entry.hash {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "hash mismatch",
            });
        }
        prev = &entry.hash;
    }
    Ok(())
}
