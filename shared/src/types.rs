use std::collections::HashMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One announced service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub pool: String,
    pub location: String,
    pub properties: HashMap<String, String>,
}

/// Unit of storage and replication: a node's full set of services, or a
/// tombstone when `services` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub node_id: String,
    pub services: Option<Vec<Service>>,
    /// Milliseconds since the epoch; the last-write-wins version
    pub timestamp: i64,
    pub max_age_in_ms: Option<i64>,
    /// IP address that authored this entry
    pub announcer: Option<String>,
}

impl Entry {
    pub fn live(
        node_id: impl Into<String>,
        services: Vec<Service>,
        timestamp: i64,
        max_age_in_ms: i64,
        announcer: Option<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            services: Some(services),
            timestamp,
            max_age_in_ms: Some(max_age_in_ms),
            announcer,
        }
    }

    pub fn tombstone(node_id: impl Into<String>, timestamp: i64, announcer: Option<String>) -> Self {
        Self {
            node_id: node_id.into(),
            services: None,
            timestamp,
            max_age_in_ms: None,
            announcer,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.services.is_none()
    }

    /// A live entry without a max age would never expire.
    pub fn is_well_formed(&self) -> bool {
        self.services.is_none() || self.max_age_in_ms.is_some()
    }

    /// A live entry is visible up to and including `timestamp + max_age`.
    /// Tombstones never expire through this check.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match (&self.services, self.max_age_in_ms) {
            (Some(_), Some(max_age)) => now_ms > self.timestamp.saturating_add(max_age),
            _ => false,
        }
    }
}

/// Service as submitted by an announcing node; pool and location come from
/// the enclosing announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicServiceAnnouncement {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub properties: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicAnnouncement {
    pub environment: String,
    pub pool: String,
    pub location: String,
    #[serde(rename = "services")]
    pub service_announcements: Vec<DynamicServiceAnnouncement>,
    #[serde(default)]
    pub max_age_in_ms: Option<i64>,
}

impl DynamicAnnouncement {
    /// Check structural requirements. Returns a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.environment.is_empty() {
            return Err("environment must not be empty".to_string());
        }
        if self.pool.is_empty() {
            return Err("pool must not be empty".to_string());
        }
        if self.location.is_empty() {
            return Err("location must not be empty".to_string());
        }
        if let Some(max_age) = self.max_age_in_ms {
            if max_age <= 0 {
                return Err("maxAgeInMs must be positive".to_string());
            }
        }
        for (i, service) in self.service_announcements.iter().enumerate() {
            if service.id.as_deref().map_or(true, str::is_empty) {
                return Err(format!("services[{}].id must not be null", i));
            }
            if service.service_type.as_deref().map_or(true, str::is_empty) {
                return Err(format!("services[{}].type must not be null", i));
            }
            if service.properties.is_none() {
                return Err(format!("services[{}].properties must not be null", i));
            }
        }
        Ok(())
    }

    /// Expand into concrete services owned by `node_id`. Call after `validate`.
    pub fn to_services(&self, node_id: &str) -> Vec<Service> {
        self.service_announcements
            .iter()
            .map(|s| Service {
                id: s.id.clone().unwrap_or_default(),
                node_id: node_id.to_string(),
                service_type: s.service_type.clone().unwrap_or_default(),
                pool: self.pool.clone(),
                location: self.location.clone(),
                properties: s.properties.clone().unwrap_or_default(),
            })
            .collect()
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
