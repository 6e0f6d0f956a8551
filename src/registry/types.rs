//! Registry data types and error definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version rule matching every version of a service.
pub const VERSION_RULE_ALL: &str = "0.0.0.0+";

/// Separator of the `app:service` cross-application service name form.
const APP_SERVICE_SEPARATOR: char = ':';

/// Errors surfaced by the registry cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The lookup key is malformed.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// Transient registry I/O or decode failure.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The registry call did not finish in time.
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),

    /// The registry authoritatively reports the service does not exist.
    #[error("service {app_id}/{service_name} not found")]
    ServiceNotFound { app_id: String, service_name: String },
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Identity of the cached view: who asks for which service under which version rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MicroserviceCacheKey {
    consumer_service_id: String,
    app_id: String,
    service_name: String,
    version_rule: String,
}

impl MicroserviceCacheKey {
    /// Build a key. A `service_name` of the form `app:service` overrides `app_id`.
    pub fn new(
        consumer_service_id: impl Into<String>,
        app_id: impl Into<String>,
        service_name: impl Into<String>,
        version_rule: impl Into<String>,
    ) -> Self {
        let mut app_id = app_id.into();
        let mut service_name = service_name.into();
        if let Some((app, name)) = service_name.split_once(APP_SERVICE_SEPARATOR) {
            let (app, name) = (app.to_string(), name.to_string());
            app_id = app;
            service_name = name;
        }

        Self {
            consumer_service_id: consumer_service_id.into(),
            app_id,
            service_name,
            version_rule: version_rule.into(),
        }
    }

    /// Key matching every version of the target service.
    pub fn all_versions(
        consumer_service_id: impl Into<String>,
        app_id: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self::new(consumer_service_id, app_id, service_name, VERSION_RULE_ALL)
    }

    /// Reject keys with empty fields.
    pub fn validate(&self) -> RegistryResult<()> {
        let fields = [
            ("consumer_service_id", &self.consumer_service_id),
            ("app_id", &self.app_id),
            ("service_name", &self.service_name),
            ("version_rule", &self.version_rule),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(RegistryError::InvalidKey(format!("{name} is empty in {self}")));
            }
        }
        Ok(())
    }

    pub fn consumer_service_id(&self) -> &str {
        &self.consumer_service_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version_rule(&self) -> &str {
        &self.version_rule
    }
}

impl fmt::Display for MicroserviceCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}/{}@{}",
            self.consumer_service_id, self.app_id, self.service_name, self.version_rule
        )
    }
}

/// Lifecycle status a registry reports for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
    Testing,
}

/// One running, addressable replica of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroserviceInstance {
    pub instance_id: String,
    pub service_id: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl MicroserviceInstance {
    pub fn new(
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            service_id: service_id.into(),
            endpoints,
            status: InstanceStatus::Up,
        }
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == InstanceStatus::Up
    }
}

/// Outcome of the most recent refresh of a cache entry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    Initial = 0,
    Refreshed = 1,
    NoChange = 2,
    ServiceNotFound = 3,
    RefreshFailed = 4,
}

impl CacheStatus {
    /// Statuses that watchers must be told about.
    pub fn is_changed(self) -> bool {
        matches!(self, CacheStatus::Refreshed | CacheStatus::ServiceNotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Initial => "initial",
            CacheStatus::Refreshed => "refreshed",
            CacheStatus::NoChange => "no_change",
            CacheStatus::ServiceNotFound => "service_not_found",
            CacheStatus::RefreshFailed => "refresh_failed",
        }
    }
}

impl From<u8> for CacheStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => CacheStatus::Refreshed,
            2 => CacheStatus::NoChange,
            3 => CacheStatus::ServiceNotFound,
            4 => CacheStatus::RefreshFailed,
            _ => CacheStatus::Initial,
        }
    }
}

/// Kind of change carried by an instance change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Expire,
}

/// Incremental instance change pushed by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroserviceInstanceChangedEvent {
    /// Application of the changed service.
    pub app_id: String,
    /// Name of the changed service.
    pub service_name: String,
    pub service_id: String,
    pub instance_id: String,
    pub change_type: ChangeType,
    pub updated_instance: MicroserviceInstance,
}

impl MicroserviceInstanceChangedEvent {
    pub fn new(
        app_id: impl Into<String>,
        service_name: impl Into<String>,
        change_type: ChangeType,
        instance: MicroserviceInstance,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            service_name: service_name.into(),
            service_id: instance.service_id.clone(),
            instance_id: instance.instance_id.clone(),
            change_type,
            updated_instance: instance,
        }
    }
}

/// Registry safe mode toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeModeChangeEvent {
    pub enabled: bool,
}
