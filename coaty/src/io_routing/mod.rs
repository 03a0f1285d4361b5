//! IO routing: context-driven association of IO sources with IO actors.

pub mod router;
pub mod rules;

pub use router::RuleBasedIoRouter;
pub use rules::{IoAssociationRule, RuleCondition};
