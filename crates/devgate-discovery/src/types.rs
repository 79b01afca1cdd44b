//! Core types for service discovery events.

use std::fmt;

use crate::error::{DiscoveryError, Result};

/// Scheme applied to instances that do not carry one.
pub const DEFAULT_SCHEME: &str = "https";

/// Snapshot produced by an [`Instancer`](crate::Instancer).
///
/// Either a list of instances or an error from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstancerState {
    /// The instances currently known to the backend.
    pub instances: Vec<String>,
    /// The backend error, if the last update failed.
    pub error: Option<String>,
}

impl InstancerState {
    /// Creates a state carrying an instance list.
    #[must_use]
    pub fn instances<I, S>(instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instances: instances.into_iter().map(Into::into).collect(),
            error: None,
        }
    }

    /// Creates a state carrying a backend error.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            instances: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// A membership event dispatched to listeners.
///
/// Exactly one of three shapes is meaningful: a backend error (`error` set),
/// a stopped feed (`stopped` true), or a membership snapshot (`instances`,
/// possibly empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// The key the instancer was registered under.
    pub key: String,
    /// The service name the instancer watches.
    pub service: String,
    /// The normalized instance list.
    pub instances: Vec<String>,
    /// The backend error, if any.
    pub error: Option<String>,
    /// Whether the monitor has stopped watching this instancer.
    pub stopped: bool,
    /// How many events this instancer has produced, starting at 1.
    pub event_count: u64,
}

impl Event {
    /// Creates a membership snapshot event.
    #[must_use]
    pub fn instances(service: impl Into<String>, instances: Vec<String>) -> Self {
        let service = service.into();
        Self {
            key: service.clone(),
            service,
            instances,
            error: None,
            stopped: false,
            event_count: 1,
        }
    }

    /// Creates a backend error event.
    #[must_use]
    pub fn error(service: impl Into<String>, error: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            key: service.clone(),
            service,
            instances: Vec::new(),
            error: Some(error.into()),
            stopped: false,
            event_count: 1,
        }
    }

    /// Creates a stopped event.
    #[must_use]
    pub fn stopped(service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            key: service.clone(),
            service,
            instances: Vec::new(),
            error: None,
            stopped: true,
            event_count: 1,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            write!(f, "{}: error: {error}", self.service)
        } else if self.stopped {
            write!(f, "{}: stopped", self.service)
        } else {
            write!(f, "{}: {} instance(s)", self.service, self.instances.len())
        }
    }
}

/// Normalizes a single instance, prepending `default_scheme` when missing.
///
/// # Errors
///
/// Returns an error if the instance is blank or has an empty host part.
pub fn normalize_instance(default_scheme: &str, instance: &str) -> Result<String> {
    let trimmed = instance.trim();
    if trimmed.is_empty() {
        return Err(DiscoveryError::InvalidInstance(instance.to_string()));
    }

    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            if scheme.is_empty() || rest.is_empty() {
                return Err(DiscoveryError::InvalidInstance(instance.to_string()));
            }
            Ok(format!("{}://{rest}", scheme.to_ascii_lowercase()))
        }
        None => Ok(format!("{default_scheme}://{trimmed}")),
    }
}

/// Normalizes, sorts and de-duplicates an instance list.
///
/// Invalid entries are dropped.
#[must_use]
pub fn normalize_instances(default_scheme: &str, instances: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = instances
        .iter()
        .filter_map(|instance| normalize_instance(default_scheme, instance).ok())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    // ==================== normalize_instance Tests ====================

    #[test_case("host:8080", "https://host:8080" ; "adds default scheme")]
    #[test_case("http://host:8080", "http://host:8080" ; "keeps scheme")]
    #[test_case("HTTP://host", "http://host" ; "lowercases scheme")]
    #[test_case("  host  ", "https://host" ; "trims whitespace")]
    fn test_normalize_instance(input: &str, expected: &str) {
        assert_eq!(normalize_instance(DEFAULT_SCHEME, input).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "blank")]
    #[test_case("http://" ; "missing host")]
    #[test_case("://host" ; "missing scheme")]
    fn test_normalize_instance_rejects(input: &str) {
        assert!(matches!(
            normalize_instance(DEFAULT_SCHEME, input),
            Err(DiscoveryError::InvalidInstance(_))
        ));
    }

    #[test]
    fn test_normalize_instances_sorts_and_dedupes() {
        let instances = vec![
            "b:80".to_string(),
            "https://a:80".to_string(),
            "a:80".to_string(),
            String::new(),
        ];

        let normalized = normalize_instances(DEFAULT_SCHEME, &instances);

        assert_eq!(normalized, vec!["https://a:80", "https://b:80"]);
    }

    // ==================== Event Tests ====================

    #[test]
    fn test_event_constructors() {
        let snapshot = Event::instances("talaria", vec!["https://a".to_string()]);
        assert_eq!(snapshot.key, "talaria");
        assert!(snapshot.error.is_none());
        assert!(!snapshot.stopped);

        let error = Event::error("talaria", "boom");
        assert_eq!(error.error.as_deref(), Some("boom"));

        let stopped = Event::stopped("talaria");
        assert!(stopped.stopped);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(
            Event::instances("talaria", vec!["https://a".to_string()]).to_string(),
            "talaria: 1 instance(s)"
        );
        assert_eq!(Event::stopped("talaria").to_string(), "talaria: stopped");
        assert!(Event::error("talaria", "boom").to_string().contains("boom"));
    }

    #[test]
    fn test_instancer_state_constructors() {
        let state = InstancerState::instances(["a", "b"]);
        assert_eq!(state.instances.len(), 2);
        assert!(state.error.is_none());

        let state = InstancerState::error("down");
        assert!(state.instances.is_empty());
        assert_eq!(state.error.as_deref(), Some("down"));
    }
}
