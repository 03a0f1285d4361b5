//! Object model: the universal payload unit, typed IO views, and
//! declarative object filters with their in-memory matcher.

pub mod filter;
pub mod io;
pub mod matcher;
pub mod object;

pub use filter::{
    ContextFilter, FilterCondition, FilterConditions, FilterExpression, FilterProperty,
    ObjectFilter, SortingOrder,
};
pub use io::{IoActor, IoContext, IoNode, IoSource};
pub use matcher::ObjectMatcher;
pub use object::{CoatyObject, CoreType, Identity, CORE_OBJECT_TYPE_PREFIX};
