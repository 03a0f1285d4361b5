//! In-memory evaluation of declarative object filters.

// Layer 1: Standard library imports
use std::cmp::Ordering;

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use super::filter::{FilterCondition, FilterConditions, FilterExpression, ObjectFilter};
use super::object::CoatyObject;

/// Evaluates declarative object filters against objects in memory.
///
/// Only the filter's condition tree is evaluated; ordering and paging
/// fields are the concern of storage collaborators.
///
/// # Example
/// ```rust
/// use coaty::model::{
///     CoatyObject, CoreType, FilterCondition, FilterExpression, ObjectFilter, ObjectMatcher,
/// };
/// use serde_json::json;
///
/// let obj = CoatyObject::with_core_type(CoreType::CoatyObject, "pump")
///     .with_extra("floor", json!(7));
/// let filter = ObjectFilter::with_condition(FilterCondition::new(
///     "floor",
///     FilterExpression::Between(json!(6), json!(8)),
/// ));
/// assert!(ObjectMatcher::matches_object(&filter, &obj));
/// ```
pub struct ObjectMatcher;

impl ObjectMatcher {
    /// Evaluate a filter against an object.
    pub fn matches_object(filter: &ObjectFilter, object: &CoatyObject) -> bool {
        match serde_json::to_value(object) {
            Ok(value) => Self::matches_value(filter, &value),
            Err(_) => false,
        }
    }

    /// Evaluate a filter against a JSON object value.
    pub fn matches_value(filter: &ObjectFilter, value: &Value) -> bool {
        match &filter.conditions {
            None => true,
            Some(FilterConditions::Single(condition)) => Self::condition_holds(condition, value),
            Some(FilterConditions::And(conditions)) => conditions
                .iter()
                .all(|condition| Self::condition_holds(condition, value)),
            Some(FilterConditions::Or(conditions)) => conditions
                .iter()
                .any(|condition| Self::condition_holds(condition, value)),
        }
    }

    fn condition_holds(condition: &FilterCondition, value: &Value) -> bool {
        let found = condition.property.lookup(value);
        match (&condition.expression, found) {
            (FilterExpression::Exists, found) => found.is_some(),
            (FilterExpression::NotExists, found) => found.is_none(),

            // Negated membership/equality operators hold for missing
            // properties; everything else fails on them.
            (FilterExpression::NotEquals(_), None)
            | (FilterExpression::NotContains(_), None)
            | (FilterExpression::NotIn(_), None) => true,
            (_, None) => false,

            (FilterExpression::Equals(operand), Some(found)) => found == operand,
            (FilterExpression::NotEquals(operand), Some(found)) => found != operand,
            (FilterExpression::LessThan(operand), Some(found)) => {
                matches!(compare_values(found, operand), Some(Ordering::Less))
            }
            (FilterExpression::LessThanOrEqual(operand), Some(found)) => matches!(
                compare_values(found, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            (FilterExpression::GreaterThan(operand), Some(found)) => {
                matches!(compare_values(found, operand), Some(Ordering::Greater))
            }
            (FilterExpression::GreaterThanOrEqual(operand), Some(found)) => matches!(
                compare_values(found, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (FilterExpression::Between(first, second), Some(found)) => {
                in_range(found, first, second) == Some(true)
            }
            (FilterExpression::NotBetween(first, second), Some(found)) => {
                in_range(found, first, second) == Some(false)
            }
            (FilterExpression::Like(pattern), Some(found)) => found
                .as_str()
                .is_some_and(|text| like_matches(pattern, text)),
            (FilterExpression::Contains(operand), Some(found)) => deep_contains(found, operand),
            (FilterExpression::NotContains(operand), Some(found)) => !deep_contains(found, operand),
            (FilterExpression::In(operands), Some(found)) => operands.contains(found),
            (FilterExpression::NotIn(operands), Some(found)) => !operands.contains(found),
        }
    }
}

/// JSON-value ordering: numbers numerically, strings lexicographically,
/// booleans false < true, arrays element-wise with shorter-is-less
/// tie-breaking. Comparisons across types are undefined.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare_values(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

/// Inclusive range check with operands accepted in either order.
/// `None` when the value is not comparable with the bounds.
fn in_range(value: &Value, first: &Value, second: &Value) -> Option<bool> {
    let (low, high) = match compare_values(first, second)? {
        Ordering::Greater => (second, first),
        _ => (first, second),
    };
    let not_below = !matches!(compare_values(value, low)?, Ordering::Less);
    let not_above = !matches!(compare_values(value, high)?, Ordering::Greater);
    Some(not_below && not_above)
}

/// Deep structural containment.
///
/// An array contains another iff every element of the smaller appears in
/// the larger, multiset-wise. An object contains another iff every
/// key-value pair of the smaller is contained in the larger, recursively.
/// Primitives contain each other iff equal. A primitive operand is also
/// contained in an array that contains it.
fn deep_contains(target: &Value, operand: &Value) -> bool {
    match (target, operand) {
        (Value::Array(target), Value::Array(operand)) => {
            let mut used = vec![false; target.len()];
            operand.iter().all(|item| {
                target.iter().enumerate().any(|(i, candidate)| {
                    if !used[i] && deep_contains(candidate, item) {
                        used[i] = true;
                        true
                    } else {
                        false
                    }
                })
            })
        }
        (Value::Array(target), operand) => {
            target.iter().any(|candidate| deep_contains(candidate, operand))
        }
        (Value::Object(target), Value::Object(operand)) => operand.iter().all(|(key, item)| {
            target
                .get(key)
                .is_some_and(|candidate| deep_contains(candidate, item))
        }),
        (target, operand) => target == operand,
    }
}

/// SQL LIKE matching: `%` matches any sequence, `_` matches a single
/// character, backslash escapes the next pattern character.
fn like_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    like_matches_at(&pattern, &text)
}

fn like_matches_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            // Try consuming zero or more text characters.
            (0..=text.len()).any(|skip| like_matches_at(&pattern[1..], &text[skip..]))
        }
        Some('_') => !text.is_empty() && like_matches_at(&pattern[1..], &text[1..]),
        Some('\\') => match pattern.get(1) {
            Some(escaped) => {
                text.first() == Some(escaped) && like_matches_at(&pattern[2..], &text[1..])
            }
            None => false,
        },
        Some(literal) => {
            text.first() == Some(literal) && like_matches_at(&pattern[1..], &text[1..])
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::object::CoreType;
    use serde_json::json;

    fn object_with(extra: &[(&str, Value)]) -> CoatyObject {
        let mut obj = CoatyObject::with_core_type(CoreType::CoatyObject, "test");
        for (key, value) in extra {
            obj = obj.with_extra(*key, value.clone());
        }
        obj
    }

    fn holds(property: &str, expression: FilterExpression, obj: &CoatyObject) -> bool {
        let filter = ObjectFilter::with_condition(FilterCondition::new(property, expression));
        ObjectMatcher::matches_object(&filter, obj)
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let obj = object_with(&[]);
        assert!(ObjectMatcher::matches_object(&ObjectFilter::default(), &obj));
    }

    #[test]
    fn test_equality_operators() {
        let obj = object_with(&[("floor", json!(7))]);
        assert!(holds("floor", FilterExpression::Equals(json!(7)), &obj));
        assert!(!holds("floor", FilterExpression::Equals(json!(8)), &obj));
        assert!(holds("floor", FilterExpression::NotEquals(json!(8)), &obj));
        // Missing property: only negated operators hold.
        assert!(!holds("level", FilterExpression::Equals(json!(7)), &obj));
        assert!(holds("level", FilterExpression::NotEquals(json!(7)), &obj));
    }

    #[test]
    fn test_comparison_operators() {
        let obj = object_with(&[("floor", json!(7)), ("label", json!("b"))]);
        assert!(holds("floor", FilterExpression::LessThan(json!(8)), &obj));
        assert!(!holds("floor", FilterExpression::LessThan(json!(7)), &obj));
        assert!(holds("floor", FilterExpression::LessThanOrEqual(json!(7)), &obj));
        assert!(holds("floor", FilterExpression::GreaterThan(json!(6)), &obj));
        assert!(holds(
            "floor",
            FilterExpression::GreaterThanOrEqual(json!(7)),
            &obj
        ));
        assert!(holds("label", FilterExpression::GreaterThan(json!("a")), &obj));
        // Cross-type comparisons are false.
        assert!(!holds("floor", FilterExpression::LessThan(json!("8")), &obj));
    }

    #[test]
    fn test_between_operators() {
        let obj = object_with(&[("floor", json!(7))]);
        assert!(holds("floor", FilterExpression::Between(json!(6), json!(8)), &obj));
        assert!(holds("floor", FilterExpression::Between(json!(8), json!(6)), &obj));
        assert!(holds("floor", FilterExpression::Between(json!(7), json!(7)), &obj));
        assert!(!holds("floor", FilterExpression::Between(json!(8), json!(10)), &obj));
        assert!(holds(
            "floor",
            FilterExpression::NotBetween(json!(8), json!(10)),
            &obj
        ));
        assert!(!holds(
            "floor",
            FilterExpression::NotBetween(json!(6), json!(8)),
            &obj
        ));
        // Incomparable values satisfy neither variant.
        assert!(!holds(
            "floor",
            FilterExpression::Between(json!("a"), json!("b")),
            &obj
        ));
        assert!(!holds(
            "floor",
            FilterExpression::NotBetween(json!("a"), json!("b")),
            &obj
        ));
    }

    #[test]
    fn test_like_operator() {
        let obj = object_with(&[("name2", json!("MockObject_42"))]);
        assert!(holds("name2", FilterExpression::Like("MockObject_%".into()), &obj));
        assert!(holds("name2", FilterExpression::Like("Mock%".into()), &obj));
        assert!(holds("name2", FilterExpression::Like("MockObject___".into()), &obj));
        assert!(!holds("name2", FilterExpression::Like("MockObject_".into()), &obj));
        assert!(!holds("name2", FilterExpression::Like("mock%".into()), &obj));
        assert!(holds("name2", FilterExpression::Like("%_42".into()), &obj));

        let literal = object_with(&[("path", json!("50%_done"))]);
        assert!(holds("path", FilterExpression::Like("50\\%\\_done".into()), &literal));
        assert!(!holds("path", FilterExpression::Like("51\\%\\_done".into(), ), &literal));
    }

    #[test]
    fn test_contains_on_arrays_is_multiset_wise() {
        let obj = object_with(&[("tags", json!([1, 2, 2, 3]))]);
        assert!(holds("tags", FilterExpression::Contains(json!([2, 2])), &obj));
        assert!(!holds("tags", FilterExpression::Contains(json!([2, 2, 2])), &obj));
        assert!(holds("tags", FilterExpression::Contains(json!([3, 1])), &obj));
        assert!(holds("tags", FilterExpression::Contains(json!(2)), &obj));
        assert!(!holds("tags", FilterExpression::Contains(json!(4)), &obj));
        assert!(holds("tags", FilterExpression::NotContains(json!(4)), &obj));
    }

    #[test]
    fn test_contains_on_objects_is_structural() {
        let obj = object_with(&[(
            "config",
            json!({"a": {"b": 1, "c": [1, 2]}, "d": 4}),
        )]);
        assert!(holds(
            "config",
            FilterExpression::Contains(json!({"a": {"b": 1}})),
            &obj
        ));
        assert!(holds(
            "config",
            FilterExpression::Contains(json!({"a": {"c": [2]}})),
            &obj
        ));
        assert!(!holds(
            "config",
            FilterExpression::Contains(json!({"a": {"b": 2}})),
            &obj
        ));
        assert!(!holds(
            "config",
            FilterExpression::Contains(json!({"e": 1})),
            &obj
        ));
    }

    #[test]
    fn test_in_operators() {
        let obj = object_with(&[("state", json!("on"))]);
        assert!(holds(
            "state",
            FilterExpression::In(vec![json!("on"), json!("off")]),
            &obj
        ));
        assert!(!holds("state", FilterExpression::In(vec![json!("off")]), &obj));
        assert!(holds("state", FilterExpression::NotIn(vec![json!("off")]), &obj));
        assert!(holds("missing", FilterExpression::NotIn(vec![json!("x")]), &obj));
    }

    #[test]
    fn test_exists_operators() {
        let obj = object_with(&[("floor", json!(7))]);
        assert!(holds("floor", FilterExpression::Exists, &obj));
        assert!(!holds("level", FilterExpression::Exists, &obj));
        assert!(holds("level", FilterExpression::NotExists, &obj));
        assert!(!holds("floor", FilterExpression::NotExists, &obj));
        // Built-in fields are visible to the matcher, too.
        assert!(holds("objectId", FilterExpression::Exists, &obj));
    }

    #[test]
    fn test_nested_property_paths() {
        let obj = object_with(&[("characteristics", json!({"role": "normal"}))]);
        assert!(holds(
            "characteristics.role",
            FilterExpression::Equals(json!("normal")),
            &obj
        ));
        assert!(!holds(
            "characteristics.kind",
            FilterExpression::Equals(json!("normal")),
            &obj
        ));
    }

    #[test]
    fn test_and_or_combinations() {
        let obj = object_with(&[("floor", json!(7)), ("state", json!("on"))]);
        let both = ObjectFilter::with_all(vec![
            FilterCondition::new("floor", FilterExpression::Between(json!(6), json!(8))),
            FilterCondition::new("state", FilterExpression::Equals(json!("on"))),
        ]);
        assert!(ObjectMatcher::matches_object(&both, &obj));

        let one_fails = ObjectFilter::with_all(vec![
            FilterCondition::new("floor", FilterExpression::Equals(json!(10))),
            FilterCondition::new("state", FilterExpression::Equals(json!("on"))),
        ]);
        assert!(!ObjectMatcher::matches_object(&one_fails, &obj));

        let any = ObjectFilter::with_any(vec![
            FilterCondition::new("floor", FilterExpression::Equals(json!(10))),
            FilterCondition::new("state", FilterExpression::Equals(json!("on"))),
        ]);
        assert!(ObjectMatcher::matches_object(&any, &obj));
    }
}
