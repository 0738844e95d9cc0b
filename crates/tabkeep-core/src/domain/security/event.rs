//! Security domain events
//!
//! Records of session and key-regime transitions. Event data never holds key
//! material, passwords or secret values.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of events kept by an [`EventLog`]
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Type of security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Session unlocked with a correct password
    Unlocked,
    /// Unlock attempt rejected
    UnlockFailed,
    /// Session locked explicitly
    Locked,
    /// Session locked by inactivity timeout
    SessionExpired,
    /// Password protection turned on
    ProtectionEnabled,
    /// Password protection turned off
    ProtectionDisabled,
    /// Password replaced
    PasswordChanged,
    /// Legacy cleartext secrets sealed into the vault
    SecretsMigrated,
    /// Vault re-encrypted under a new key
    SecretsRotated,
}

impl SecurityEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::UnlockFailed => "unlock_failed",
            Self::Locked => "locked",
            Self::SessionExpired => "session_expired",
            Self::ProtectionEnabled => "protection_enabled",
            Self::ProtectionDisabled => "protection_disabled",
            Self::PasswordChanged => "password_changed",
            Self::SecretsMigrated => "secrets_migrated",
            Self::SecretsRotated => "secrets_rotated",
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A security domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// Type of event
    pub event_type: SecurityEventType,
    /// Event data (no sensitive data!)
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    /// Create a new security event
    pub fn new(event_type: SecurityEventType, data: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn unlocked() -> Self {
        Self::new(SecurityEventType::Unlocked, None)
    }

    pub fn unlock_failed() -> Self {
        Self::new(SecurityEventType::UnlockFailed, None)
    }

    pub fn locked() -> Self {
        Self::new(SecurityEventType::Locked, None)
    }

    pub fn session_expired(timeout_minutes: u64) -> Self {
        let data = serde_json::json!({ "timeout_minutes": timeout_minutes });
        Self::new(SecurityEventType::SessionExpired, Some(data))
    }

    pub fn protection_enabled(iterations: u32) -> Self {
        let data = serde_json::json!({ "iterations": iterations });
        Self::new(SecurityEventType::ProtectionEnabled, Some(data))
    }

    pub fn protection_disabled() -> Self {
        Self::new(SecurityEventType::ProtectionDisabled, None)
    }

    pub fn password_changed() -> Self {
        Self::new(SecurityEventType::PasswordChanged, None)
    }

    /// Legacy secrets were sealed; only the count is recorded
    pub fn secrets_migrated(count: usize) -> Self {
        let data = serde_json::json!({ "key_count": count });
        Self::new(SecurityEventType::SecretsMigrated, Some(data))
    }

    /// Vault re-encrypted; `from` and `to` name the key regimes
    pub fn secrets_rotated(from: &str, to: &str) -> Self {
        let data = serde_json::json!({ "from": from, "to": to });
        Self::new(SecurityEventType::SecretsRotated, Some(data))
    }
}

/// Bounded in-memory trail of recent security events, oldest first
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an event, evicting the oldest one when full
    pub fn record(&self, event: SecurityEvent) {
        tracing::debug!(event_type = %event.event_type, "Security event");
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the recorded events
    pub fn recent(&self) -> Vec<SecurityEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
