//! Admission and atomic-boundary rules for candidate nodes.
//!
//! Each rule is a pure predicate over the lowercased goal text (and, for
//! `more_specific_than_parent`, the parent's goal). The predicates are plain
//! functions; [`NodeRule`] wraps them so a [`RuleSet`] can hold two
//! independent groups: four approval rules and four atomic-boundary rules.

use std::collections::HashSet;
use std::fmt;

use autotree_types::AttackNode;

// ---------------------------------------------------------------------------
// Vocabularies
// ---------------------------------------------------------------------------

const CONJUNCTIONS: &[&str] = &[" and ", " or "];

const IMPLEMENTATION_TERMS: &[&str] = &[
    "tool", "exploit", "patch", "firewall", "ids", "ips", "payload", "shellcode", "buffer",
    "offset", "memory",
];

const AUTOMOTIVE_TERMS: &[&str] = &[
    "can",
    "ecu",
    "vehicle",
    "telematics",
    "infotainment",
    "gateway",
    "obd",
    "adas",
    "firmware",
    "bus",
];

const ACTION_VERBS: &[&str] = &[
    "send", "inject", "replay", "modify", "upload", "bypass", "spoof", "forge",
];

const LOW_LEVEL_TERMS: &[&str] = &["byte", "bit", "stack", "heap", "opcode", "assembly"];

const ABSTRACT_VERBS: &[&str] = &["compromise", "attack", "manipulate"];

fn contains_any(goal: &str, terms: &[&str]) -> bool {
    let goal = goal.to_lowercase();
    terms.iter().any(|t| goal.contains(t))
}

fn count_present(goal: &str, terms: &[&str]) -> usize {
    let goal = goal.to_lowercase();
    terms.iter().filter(|t| goal.contains(*t)).count()
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// One attacker objective: no " and " / " or ".
pub fn single_goal(goal: &str) -> bool {
    !contains_any(goal, CONJUNCTIONS)
}

/// Goal level, not tooling or defences.
pub fn goal_oriented(goal: &str) -> bool {
    !contains_any(goal, IMPLEMENTATION_TERMS)
}

/// At least one whitespace token of `goal` does not occur in `parent_goal`.
pub fn more_specific_than_parent(goal: &str, parent_goal: &str) -> bool {
    let parent = parent_goal.to_lowercase();
    let parent_tokens: HashSet<&str> = parent.split_whitespace().collect();
    goal.to_lowercase()
        .split_whitespace()
        .any(|t| !parent_tokens.contains(t))
}

pub fn automotive_relevant(goal: &str) -> bool {
    contains_any(goal, AUTOMOTIVE_TERMS)
}

/// Zero or one concrete action verb.
pub fn single_action(goal: &str) -> bool {
    count_present(goal, ACTION_VERBS) <= 1
}

pub fn no_implementation_detail(goal: &str) -> bool {
    !contains_any(goal, LOW_LEVEL_TERMS)
}

/// No abstract verbs that are too coarse to score.
pub fn risk_scorable(goal: &str) -> bool {
    !contains_any(goal, ABSTRACT_VERBS)
}

pub fn atomic_stop(goal: &str) -> bool {
    single_goal(goal) && single_action(goal) && no_implementation_detail(goal) && risk_scorable(goal)
}

/// Structural guard: a risk record only ever sits on an atomic node.
pub fn cvss_only_for_atomic(node: &AttackNode) -> bool {
    node.cvss().is_none() || node.is_atomic()
}

// ---------------------------------------------------------------------------
// NodeRule trait
// ---------------------------------------------------------------------------

pub trait NodeRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, candidate: &AttackNode, parent: &AttackNode) -> bool;
}

pub struct SingleGoalRule;
impl NodeRule for SingleGoalRule {
    fn name(&self) -> &'static str { "single_goal" }
    fn check(&self, candidate: &AttackNode, _parent: &AttackNode) -> bool {
        single_goal(candidate.goal())
    }
}

pub struct GoalOrientedRule;
impl NodeRule for GoalOrientedRule {
    fn name(&self) -> &'static str { "goal_oriented" }
    fn check(&self, candidate: &AttackNode, _parent: &AttackNode) -> bool {
        goal_oriented(candidate.goal())
    }
}

pub struct MoreSpecificThanParentRule;
impl NodeRule for MoreSpecificThanParentRule {
    fn name(&self) -> &'static str { "more_specific_than_parent" }
    fn check(&self, candidate: &AttackNode, parent: &AttackNode) -> bool {
        more_specific_than_parent(candidate.goal(), parent.goal())
    }
}

pub struct AutomotiveRelevantRule;
impl NodeRule for AutomotiveRelevantRule {
    fn name(&self) -> &'static str { "automotive_relevant" }
    fn check(&self, candidate: &AttackNode, _parent: &AttackNode) -> bool {
        automotive_relevant(candidate.goal())
    }
}

pub struct SingleActionRule;
impl NodeRule for SingleActionRule {
    fn name(&self) -> &'static str { "single_action" }
    fn check(&self, candidate: &AttackNode, _parent: &AttackNode) -> bool {
        single_action(candidate.goal())
    }
}

pub struct NoImplementationDetailRule;
impl NodeRule for NoImplementationDetailRule {
    fn name(&self) -> &'static str { "no_implementation_detail" }
    fn check(&self, candidate: &AttackNode, _parent: &AttackNode) -> bool {
        no_implementation_detail(candidate.goal())
    }
}

pub struct RiskScorableRule;
impl NodeRule for RiskScorableRule {
    fn name(&self) -> &'static str { "risk_scorable" }
    fn check(&self, candidate: &AttackNode, _parent: &AttackNode) -> bool {
        risk_scorable(candidate.goal())
    }
}

// ---------------------------------------------------------------------------
// RuleReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule: &'static str,
    pub passed: bool,
}

/// Per-rule results for one candidate, grouped like the [`RuleSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub approval: Vec<RuleOutcome>,
    pub atomic: Vec<RuleOutcome>,
}

impl RuleReport {
    /// Number of approval rules satisfied.
    pub fn approval_score(&self) -> u8 {
        self.approval.iter().filter(|o| o.passed).count() as u8
    }

    pub fn atomic_stop(&self) -> bool {
        self.atomic.iter().all(|o| o.passed)
    }

    pub fn failed_rules(&self) -> Vec<&'static str> {
        self.approval
            .iter()
            .chain(self.atomic.iter())
            .filter(|o| !o.passed)
            .map(|o| o.rule)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

pub struct RuleSet {
    approval: Vec<Box<dyn NodeRule>>,
    atomic: Vec<Box<dyn NodeRule>>,
}

impl RuleSet {
    pub fn new(approval: Vec<Box<dyn NodeRule>>, atomic: Vec<Box<dyn NodeRule>>) -> Self {
        Self { approval, atomic }
    }

    /// The four approval rules and the four atomic-boundary rules.
    pub fn standard() -> Self {
        Self::new(
            vec![
                Box::new(SingleGoalRule),
                Box::new(GoalOrientedRule),
                Box::new(MoreSpecificThanParentRule),
                Box::new(AutomotiveRelevantRule),
            ],
            vec![
                Box::new(SingleGoalRule),
                Box::new(SingleActionRule),
                Box::new(NoImplementationDetailRule),
                Box::new(RiskScorableRule),
            ],
        )
    }

    pub fn with_approval_rule(mut self, rule: impl NodeRule + 'static) -> Self {
        self.approval.push(Box::new(rule));
        self
    }

    pub fn with_atomic_rule(mut self, rule: impl NodeRule + 'static) -> Self {
        self.atomic.push(Box::new(rule));
        self
    }

    pub fn approval_rule_count(&self) -> usize {
        self.approval.len()
    }

    pub fn approval_score(&self, candidate: &AttackNode, parent: &AttackNode) -> u8 {
        self.approval
            .iter()
            .filter(|r| r.check(candidate, parent))
            .count() as u8
    }

    pub fn atomic_stop(&self, candidate: &AttackNode, parent: &AttackNode) -> bool {
        self.atomic.iter().all(|r| r.check(candidate, parent))
    }

    pub fn evaluate(&self, candidate: &AttackNode, parent: &AttackNode) -> RuleReport {
        let run = |rules: &[Box<dyn NodeRule>]| {
            rules
                .iter()
                .map(|r| RuleOutcome {
                    rule: r.name(),
                    passed: r.check(candidate, parent),
                })
                .collect()
        };
        RuleReport {
            approval: run(&self.approval),
            atomic: run(&self.atomic),
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("approval", &self.approval.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("atomic", &self.atomic.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
