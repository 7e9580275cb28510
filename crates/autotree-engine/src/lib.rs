//! Attack-tree expansion engine.
//!
//! This crate holds the rule set, the validator that scores and terminates
//! candidates, the per node-type generation policy, the numbered-list parser
//! and prompt builder, and the recursive tree expander with its progress
//! events.

pub mod events;
pub mod expander;
pub mod parse;
pub mod policy;
pub mod prompt;
pub mod rules;
pub mod validator;

pub use events::{EventEmitter, ExpansionEvent};
pub use expander::{ExpansionStats, TreeExpander};
pub use parse::parse_numbered_list;
pub use policy::{ChildGenerationPolicy, ChildSpec};
pub use prompt::{generation_prompt, SYSTEM_INSTRUCTION};
pub use rules::{NodeRule, RuleOutcome, RuleReport, RuleSet};
pub use validator::{Validator, ATOMIC_REASON};
