pub mod engine;
pub mod history;
pub mod model;

pub use engine::RuleEngine;
pub use history::MetricHistory;
pub use model::{
    CompareOp, CompositeLogic, Condition, EscalationPolicy, Rule, RuleKind, RuleUpdate,
};
