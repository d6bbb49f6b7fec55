//! Status management utilities.
//!
//! Every reconcile attempt persists status before returning, success or
//! failure, so observers always see the latest attempt's outcome.

use crate::crd::Condition;

/// Fluent builder for a resource's conditions list.
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Add or update a condition, replacing any existing one of the same
    /// type.
    pub fn set(mut self, condition: Condition) -> Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Set the Progressing condition
    pub fn progressing(
        self,
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        self.set(Condition::progressing(
            progressing,
            reason,
            message,
            generation,
        ))
    }

    /// Set the Degraded condition
    pub fn degraded(
        self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_same_type() {
        let conditions = ConditionBuilder::new()
            .ready(false, "RolloutInProgress", "waiting", Some(1))
            .ready(true, "InfrastructureReady", "serving", Some(1))
            .progressing(false, "Reconciled", "converged", Some(1))
            .build();
        assert_eq!(conditions.len(), 2);
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Progressing"));
    }

    #[test]
    fn test_missing_condition_is_not_true() {
        assert!(!is_condition_true(&[], "Ready"));
    }
}
