pub mod compiler;
pub mod condition;
pub mod standards;
pub mod validate;

pub use compiler::{MatchKey, MatchType, ModifierToken, ModifiersSpec};
pub use condition::{Action, Condition, ConditionType, MatchCheck, ThreadOption};
