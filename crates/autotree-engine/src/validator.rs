//! Candidate validation: approval, atomic boundary and risk assignment.

use autotree_types::{AttackNode, AttackTreeError, CvssMetrics, CvssV3, Result};

use crate::rules::{cvss_only_for_atomic, RuleReport, RuleSet};

pub const ATOMIC_REASON: &str = "Atomic decision boundary satisfied";

/// Scores a candidate against a [`RuleSet`] and decides whether it becomes
/// an atomic, risk-scored leaf.
#[derive(Debug)]
pub struct Validator {
    rules: RuleSet,
    approval_threshold: u8,
    min_atomic_level: u32,
    risk_profile: CvssMetrics,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: RuleSet::standard(),
            approval_threshold: 3,
            min_atomic_level: 2,
            risk_profile: CvssMetrics::worst_case(),
        }
    }
}

impl Validator {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn with_approval_threshold(mut self, threshold: u8) -> Self {
        self.approval_threshold = threshold;
        self
    }

    pub fn with_min_atomic_level(mut self, level: u32) -> Self {
        self.min_atomic_level = level;
        self
    }

    /// Metrics assigned to every node that becomes atomic.
    pub fn with_risk_profile(mut self, metrics: CvssMetrics) -> Self {
        self.risk_profile = metrics;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn approval_threshold(&self) -> u8 {
        self.approval_threshold
    }

    pub fn min_atomic_level(&self) -> u32 {
        self.min_atomic_level
    }

    pub fn report(&self, candidate: &AttackNode, parent: &AttackNode) -> RuleReport {
        self.rules.evaluate(candidate, parent)
    }

    /// Validate `candidate` as a child of `parent`.
    ///
    /// Returns the node with score and approval recorded. Unapproved nodes are
    /// returned too; dropping them is the caller's job. Nodes above
    /// `min_atomic_level` never become atomic.
    pub fn validate(&self, mut candidate: AttackNode, parent: &AttackNode) -> Result<AttackNode> {
        let report = self.rules.evaluate(&candidate, parent);
        let score = report.approval_score();
        let approved = score >= self.approval_threshold;
        candidate.record_validation(score, approved)?;

        tracing::debug!(
            goal = %candidate.goal(),
            level = candidate.level(),
            score,
            approved,
            atomic_stop = report.atomic_stop(),
            failed = ?report.failed_rules(),
            "Validated candidate"
        );

        if candidate.level() < self.min_atomic_level {
            return Ok(candidate);
        }

        if approved && report.atomic_stop() {
            candidate.mark_atomic(ATOMIC_REASON, CvssV3::assess(self.risk_profile))?;
        }

        if !cvss_only_for_atomic(&candidate) || (candidate.is_atomic() && candidate.cvss().is_none())
        {
            return Err(AttackTreeError::InvariantViolation {
                node: candidate.id().to_string(),
                message: "cvss and is_atomic disagree after validation".into(),
            });
        }
        Ok(candidate)
    }

    /// Whole-tree consistency check: `cvss` present iff atomic, and no atomic
    /// node above `min_atomic_level`.
    pub fn check_tree(&self, root: &AttackNode) -> Result<()> {
        root.check_invariants()?;
        if let Some(node) = root
            .descendants()
            .into_iter()
            .find(|n| n.is_atomic() && n.level() < self.min_atomic_level)
        {
            return Err(AttackTreeError::InvariantViolation {
                node: node.id().to_string(),
                message: format!(
                    "atomic node at level {} (minimum {})",
                    node.level(),
                    self.min_atomic_level
                ),
            });
        }
        Ok(())
    }
}
