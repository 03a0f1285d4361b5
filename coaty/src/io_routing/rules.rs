//! Association rules evaluated by the rule-based IO router.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::model::{IoActor, IoContext, IoNode, IoSource};

/// Condition of an association rule.
///
/// Evaluated for a compatible (source, actor) pair together with the
/// nodes the source and actor belong to and the router's IO context.
pub type RuleCondition =
    Arc<dyn Fn(&IoSource, &IoNode, &IoActor, &IoNode, &IoContext) -> bool + Send + Sync>;

/// One association rule of a rule-based IO router.
///
/// A rule applies to a (source, actor) pair when its value type matches
/// the pair's value type (the empty string matches any) and its
/// condition returns true.
#[derive(Clone)]
pub struct IoAssociationRule {
    name: String,
    value_type: String,
    condition: RuleCondition,
}

impl IoAssociationRule {
    /// Create a rule for the given value type.
    pub fn new<F>(name: impl Into<String>, value_type: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&IoSource, &IoNode, &IoActor, &IoNode, &IoContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            value_type: value_type.into(),
            condition: Arc::new(condition),
        }
    }

    /// Create a rule applying to every value type.
    pub fn for_any_value_type<F>(name: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&IoSource, &IoNode, &IoActor, &IoNode, &IoContext) -> bool + Send + Sync + 'static,
    {
        Self::new(name, "", condition)
    }

    /// The rule's name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value type this rule applies to; empty matches any.
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    pub(crate) fn applies(
        &self,
        source: &IoSource,
        source_node: &IoNode,
        actor: &IoActor,
        actor_node: &IoNode,
        context: &IoContext,
    ) -> bool {
        (self.value_type.is_empty() || self.value_type == source.value_type())
            && (self.condition)(source, source_node, actor, actor_node, context)
    }
}

impl fmt::Debug for IoAssociationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoAssociationRule")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn fixture() -> (IoSource, IoNode, IoActor, IoNode, IoContext) {
        let source = IoSource::new("S1", "temp[C]");
        let actor = IoActor::new("A1", "temp[C]");
        let mut characteristics = Map::new();
        characteristics.insert("role".to_string(), json!("normal"));
        let source_node = IoNode::new("ctx", vec![source.clone()], vec![], Map::new());
        let actor_node = IoNode::new("ctx", vec![], vec![actor.clone()], characteristics);
        let context = IoContext::new("ctx").with_property("operatingState", json!("normal"));
        (source, source_node, actor, actor_node, context)
    }

    #[test]
    fn test_value_type_gating() {
        let (source, source_node, actor, actor_node, context) = fixture();
        let matching = IoAssociationRule::new("r", "temp[C]", |_, _, _, _, _| true);
        let mismatching = IoAssociationRule::new("r", "velocity[m/s]", |_, _, _, _, _| true);
        let any = IoAssociationRule::for_any_value_type("r", |_, _, _, _, _| true);

        assert!(matching.applies(&source, &source_node, &actor, &actor_node, &context));
        assert!(!mismatching.applies(&source, &source_node, &actor, &actor_node, &context));
        assert!(any.applies(&source, &source_node, &actor, &actor_node, &context));
    }

    #[test]
    fn test_condition_reads_context_and_characteristics() {
        let (source, source_node, actor, actor_node, context) = fixture();
        let rule = IoAssociationRule::new("normal-role", "temp[C]", |_, _, _, actor_node, context| {
            actor_node.characteristic("role") == Some(json!("normal"))
                && context.property("operatingState") == Some(&json!("normal"))
        });
        assert!(rule.applies(&source, &source_node, &actor, &actor_node, &context));

        let emergency = IoContext::new("ctx").with_property("operatingState", json!("emergency"));
        assert!(!rule.applies(&source, &source_node, &actor, &actor_node, &emergency));
    }
}
