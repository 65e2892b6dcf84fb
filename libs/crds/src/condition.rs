//! Status conditions shared by Shulker resources.

use serde::{Deserialize, Serialize};

/// Condition type marking a resource as usable.
pub const READY_CONDITION: &str = "Ready";

/// A single status condition, following the Kubernetes condition convention.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    /// One of "True", "False" or "Unknown".
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Parsed condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Condition {
    /// Create a condition with the given type and status string.
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    /// Interpret the status string. Only the exact literals count.
    pub fn parsed_status(&self) -> ConditionStatus {
        match self.status.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }

    pub fn is_true(&self) -> bool {
        self.parsed_status() == ConditionStatus::True
    }
}

/// Find a condition by type in a condition list.
pub(crate) fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_status_is_case_sensitive() {
        assert_eq!(Condition::new("Ready", "True").parsed_status(), ConditionStatus::True);
        assert_eq!(Condition::new("Ready", "False").parsed_status(), ConditionStatus::False);
        assert_eq!(Condition::new("Ready", "true").parsed_status(), ConditionStatus::Unknown);
        assert_eq!(Condition::new("Ready", "").parsed_status(), ConditionStatus::Unknown);
    }

    #[test]
    fn test_condition_deserializes_type_field() {
        let json = serde_json::json!({
            "type": "Ready",
            "status": "True",
            "lastTransitionTime": "2024-01-01T00:00:00Z"
        });
        let condition: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(condition.type_, "Ready");
        assert!(condition.is_true());
        assert_eq!(
            condition.last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_find_condition() {
        let conditions = vec![
            Condition::new("Initialized", "True"),
            Condition::new("Ready", "False"),
        ];
        assert_eq!(
            find_condition(&conditions, "Ready").map(|c| c.status.as_str()),
            Some("False")
        );
        assert!(find_condition(&conditions, "Missing").is_none());
    }
}
