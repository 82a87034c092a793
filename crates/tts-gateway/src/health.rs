//! Health reporting for the gateway.

use serde::{Deserialize, Serialize};

use crate::queue::QueueState;
use crate::version::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Accepting requests with at least one free slot.
    Ready,
    /// Accepting requests, but every slot is held.
    Busy,
    /// Shutdown started; new requests are refused.
    Draining,
    Stopped,
}

impl Health {
    pub fn accepts_requests(self) -> bool {
        matches!(self, Health::Ready | Health::Busy)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub state: QueueState,
    pub pending: usize,
    pub workers: usize,
    pub capacity: usize,
}

/// Point-in-time view of the service, served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: Health,
    pub available_slots: usize,
    pub total_slots: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueHealth>,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == Health::Ready
    }

    pub fn is_busy(&self) -> bool {
        self.status == Health::Busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_screaming_snake_case() {
        insta::assert_json_snapshot!(
            [Health::Ready, Health::Busy, Health::Draining, Health::Stopped],
            @r#"
        [
          "READY",
          "BUSY",
          "DRAINING",
          "STOPPED"
        ]
        "#
        );
    }

    #[test]
    fn health_deserializes_screaming_snake_case() {
        assert_eq!(
            serde_json::from_str::<Health>("\"DRAINING\"").unwrap(),
            Health::Draining
        );
    }

    #[test]
    fn only_ready_and_busy_accept_requests() {
        assert!(Health::Ready.accepts_requests());
        assert!(Health::Busy.accepts_requests());
        assert!(!Health::Draining.accepts_requests());
        assert!(!Health::Stopped.accepts_requests());
    }

    #[test]
    fn snapshot_omits_missing_queue() {
        let snapshot = HealthSnapshot {
            status: Health::Busy,
            available_slots: 0,
            total_slots: 2,
            queue: None,
            version: VersionInfo {
                gateway: "0.1.0",
                backend: None,
            },
        };
        assert!(snapshot.is_busy());
        insta::assert_json_snapshot!(snapshot, @r#"
        {
          "status": "BUSY",
          "available_slots": 0,
          "total_slots": 2,
          "version": {
            "gateway": "0.1.0"
          }
        }
        "#);
    }
}
