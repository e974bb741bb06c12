use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    Agent,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub agent_id: String,
    pub message: String,
}

/// Delivers escalation notices. Delivery failures are the notifier's concern;
/// escalation never waits on a retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_agent(&self, agent_id: &str, message: &str);

    async fn notify_admin(&self, agent_id: &str, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_agent(&self, agent_id: &str, message: &str) {
        info!(agent_id, message, "Agent notification");
    }

    async fn notify_admin(&self, agent_id: &str, message: &str) {
        warn!(agent_id, message, "Admin notification");
    }
}

/// Keeps notifications in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self, recipient: Recipient) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.recipient == recipient)
            .count()
    }

    fn push(&self, recipient: Recipient, agent_id: &str, message: &str) {
        self.sent.lock().push(Notification {
            recipient,
            agent_id: agent_id.to_string(),
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_agent(&self, agent_id: &str, message: &str) {
        self.push(Recipient::Agent, agent_id, message);
    }

    async fn notify_admin(&self, agent_id: &str, message: &str) {
        self.push(Recipient::Admin, agent_id, message);
    }
}
