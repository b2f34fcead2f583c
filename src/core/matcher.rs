//! Group matchers for bulk operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// String predicate applied to group names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOperator {
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    Anything,
}

/// Selects job or trigger groups by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupMatcher {
    operator: StringOperator,
    value: String,
}

impl GroupMatcher {
    pub fn group_equals(value: impl Into<String>) -> Self {
        Self::new(StringOperator::Equals, value)
    }

    pub fn group_starts_with(value: impl Into<String>) -> Self {
        Self::new(StringOperator::StartsWith, value)
    }

    pub fn group_ends_with(value: impl Into<String>) -> Self {
        Self::new(StringOperator::EndsWith, value)
    }

    pub fn group_contains(value: impl Into<String>) -> Self {
        Self::new(StringOperator::Contains, value)
    }

    pub fn any_group() -> Self {
        Self::new(StringOperator::Anything, "")
    }

    pub fn new(operator: StringOperator, value: impl Into<String>) -> Self {
        Self {
            operator,
            value: value.into(),
        }
    }

    pub fn operator(&self) -> StringOperator {
        self.operator
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether `group` is selected.
    pub fn matches(&self, group: &str) -> bool {
        match self.operator {
            StringOperator::Equals => group == self.value,
            StringOperator::StartsWith => group.starts_with(&self.value),
            StringOperator::EndsWith => group.ends_with(&self.value),
            StringOperator::Contains => group.contains(&self.value),
            StringOperator::Anything => true,
        }
    }

    /// The exact group name, when this is an equality matcher.
    pub fn equality_value(&self) -> Option<&str> {
        (self.operator == StringOperator::Equals).then_some(self.value.as_str())
    }
}

impl fmt::Display for GroupMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.operator, self.value)
    }
}
