//! Declarative object filters.
//!
//! A filter is a tree of `and`/`or` combinations over conditions of the
//! form (property path, operator expression). Filters are evaluated
//! in memory by the matcher and carried opaquely inside Query events for
//! storage collaborators, which also consume the ordering and paging
//! fields.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
// (none)

/// A property path into an object.
///
/// Paths are dotted strings or explicit segment arrays; empty segments
/// select the empty-string key literally.
///
/// # Example
/// ```rust
/// use coaty::model::FilterProperty;
///
/// let path = FilterProperty::from("characteristics.role");
/// assert_eq!(path.segments(), &["characteristics", "role"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterProperty(Vec<String>);

impl FilterProperty {
    /// Create a property path from explicit segments.
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// The path's segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Look up the addressed value inside a JSON object value.
    ///
    /// Returns `None` when any intermediate segment is missing or not an
    /// object.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.0 {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl From<&str> for FilterProperty {
    fn from(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }
}

impl From<String> for FilterProperty {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl Display for FilterProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Operator expression of a filter condition.
///
/// Comparison operators apply JSON-value ordering: numbers numerically,
/// strings lexicographically, arrays element-wise; comparisons across
/// types are false. `Like` uses SQL LIKE semantics with `%`, `_`, and
/// backslash escapes. `Contains` applies deep structural containment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterExpression {
    /// Property value deep-equals the operand.
    Equals(Value),
    /// Negation of [`Equals`](Self::Equals); true for missing properties.
    NotEquals(Value),
    /// Property value is strictly less than the operand.
    LessThan(Value),
    /// Property value is less than or equal to the operand.
    LessThanOrEqual(Value),
    /// Property value is strictly greater than the operand.
    GreaterThan(Value),
    /// Property value is greater than or equal to the operand.
    GreaterThanOrEqual(Value),
    /// Property value lies in the inclusive range of the two operands
    /// (operands in either order).
    Between(Value, Value),
    /// Property value lies outside the inclusive range of the two
    /// operands (operands in either order).
    NotBetween(Value, Value),
    /// Property value is a string matching the SQL LIKE pattern.
    Like(String),
    /// Property value deep-contains the operand.
    Contains(Value),
    /// Negation of [`Contains`](Self::Contains); true for missing
    /// properties.
    NotContains(Value),
    /// Property value deep-equals one of the operand values.
    In(Vec<Value>),
    /// Negation of [`In`](Self::In); true for missing properties.
    NotIn(Vec<Value>),
    /// The property exists on the object.
    Exists,
    /// The property does not exist on the object.
    NotExists,
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    /// The property path the condition applies to.
    pub property: FilterProperty,
    /// The operator expression evaluated against the property value.
    pub expression: FilterExpression,
}

impl FilterCondition {
    /// Create a condition for the given property path.
    pub fn new(property: impl Into<FilterProperty>, expression: FilterExpression) -> Self {
        Self {
            property: property.into(),
            expression,
        }
    }
}

/// Combination of filter conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterConditions {
    /// A single condition.
    Single(FilterCondition),
    /// All conditions must hold.
    And(Vec<FilterCondition>),
    /// At least one condition must hold.
    Or(Vec<FilterCondition>),
}

/// Sort direction for result ordering by storage collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortingOrder {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// A declarative object filter.
///
/// The matcher evaluates `conditions` only; `order_by_properties`,
/// `skip`, and `take` are consumed by storage collaborators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFilter {
    /// Condition tree, or `None` to match every object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<FilterConditions>,

    /// Result ordering for storage collaborators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by_properties: Option<Vec<(FilterProperty, SortingOrder)>>,

    /// Number of results to skip, for storage collaborators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,

    /// Maximum number of results, for storage collaborators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
}

impl ObjectFilter {
    /// A filter matching on a single condition.
    pub fn with_condition(condition: FilterCondition) -> Self {
        Self {
            conditions: Some(FilterConditions::Single(condition)),
            ..Self::default()
        }
    }

    /// A filter requiring all given conditions.
    pub fn with_all(conditions: Vec<FilterCondition>) -> Self {
        Self {
            conditions: Some(FilterConditions::And(conditions)),
            ..Self::default()
        }
    }

    /// A filter requiring at least one of the given conditions.
    pub fn with_any(conditions: Vec<FilterCondition>) -> Self {
        Self {
            conditions: Some(FilterConditions::Or(conditions)),
            ..Self::default()
        }
    }
}

/// A filter over context objects attached to Call events.
///
/// Context filters share the object filter's condition grammar; ordering
/// and paging fields are meaningless for them and left unset.
pub type ContextFilter = ObjectFilter;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_path_parsing() {
        assert_eq!(FilterProperty::from("a.b.c").segments(), &["a", "b", "c"]);
        assert_eq!(FilterProperty::from("name").segments(), &["name"]);
        // Empty segments select the empty-string key literally.
        assert_eq!(FilterProperty::from("a..b").segments(), &["a", "", "b"]);
        assert_eq!(FilterProperty::from("").segments(), &[""]);
    }

    #[test]
    fn test_property_lookup() {
        let value = json!({"a": {"b": {"c": 42}}, "": {"x": 1}});
        assert_eq!(
            FilterProperty::from("a.b.c").lookup(&value),
            Some(&json!(42))
        );
        assert_eq!(FilterProperty::from(".x").lookup(&value), Some(&json!(1)));
        assert_eq!(FilterProperty::from("a.b.d").lookup(&value), None);
        assert_eq!(FilterProperty::from("a.b.c.d").lookup(&value), None);
    }

    #[test]
    fn test_filter_serialization_round_trip() {
        let filter = ObjectFilter {
            conditions: Some(FilterConditions::And(vec![
                FilterCondition::new("floor", FilterExpression::Between(json!(6), json!(8))),
                FilterCondition::new("name", FilterExpression::Like("Floor %".to_string())),
            ])),
            order_by_properties: Some(vec![(FilterProperty::from("name"), SortingOrder::Asc)]),
            skip: Some(5),
            take: Some(10),
        };
        let encoded = serde_json::to_string(&filter).unwrap();
        let decoded: ObjectFilter = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, filter);
    }
}
