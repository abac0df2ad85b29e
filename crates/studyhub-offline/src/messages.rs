//! Typed page ↔ worker messages, JSON-encoded as `{"type": "...", ...}`.

use serde::{Deserialize, Serialize};

/// Sent by the page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    /// Activate the waiting worker now.
    SkipWaiting,
    /// Re-download every manifest entry into the active cache.
    ForceUpdate,
    /// Look for a newer version on the server.
    CheckUpdate,
    GetVersion,
}

/// Install/refresh counters carried by `CACHE_UPDATED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cached: usize,
    pub failed: usize,
    pub total: usize,
}

/// Sent by the worker to every page it controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    SwActivated {
        version: String,
    },
    UpdateAvailable {
        #[serde(rename = "newVersion")]
        new_version: String,
    },
    CacheUpdated {
        stats: CacheStats,
    },
    Version {
        version: String,
    },
}

/// Everything a page can observe from its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(WorkerMessage),
    /// A new worker took control of the page.
    ControllerChange,
}

impl From<WorkerMessage> for ClientEvent {
    fn from(m: WorkerMessage) -> Self {
        ClientEvent::Message(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_messages_use_wire_names() {
        assert_eq!(
            serde_json::to_value(PageMessage::SkipWaiting).unwrap(),
            json!({"type": "SKIP_WAITING"})
        );
        let parsed: PageMessage = serde_json::from_str(r#"{"type":"CHECK_UPDATE"}"#).unwrap();
        assert_eq!(parsed, PageMessage::CheckUpdate);
        assert!(serde_json::from_str::<PageMessage>(r#"{"type":"REBOOT"}"#).is_err());
    }

    #[test]
    fn worker_messages_use_wire_names() {
        let update = WorkerMessage::UpdateAvailable {
            new_version: "v2".into(),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"type": "UPDATE_AVAILABLE", "newVersion": "v2"})
        );

        let activated: WorkerMessage =
            serde_json::from_str(r#"{"type":"SW_ACTIVATED","version":"v2"}"#).unwrap();
        assert_eq!(
            activated,
            WorkerMessage::SwActivated {
                version: "v2".into()
            }
        );

        let stats = WorkerMessage::CacheUpdated {
            stats: CacheStats {
                cached: 3,
                failed: 1,
                total: 4,
            },
        };
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            json!({"type": "CACHE_UPDATED", "stats": {"cached": 3, "failed": 1, "total": 4}})
        );
    }
}
