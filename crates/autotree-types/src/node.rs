use serde::{Deserialize, Serialize};

use crate::{calculate_base_score, AttackTreeError, CvssV3, Result};

/// Node type of the tree root.
pub const SURFACE_GOAL: &str = "surface_goal";

// ---------------------------------------------------------------------------
// AttackNode
// ---------------------------------------------------------------------------

/// One attacker objective in the tree.
///
/// Identity, goal, level, type and parent are fixed at creation. Validation
/// results are written once through [`record_validation`](Self::record_validation)
/// and [`mark_atomic`](Self::mark_atomic); afterwards only the children grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackNode {
    id: String,
    goal: String,
    level: u32,
    node_type: String,
    parent_id: Option<String>,

    is_atomic: bool,
    atomic_reason: Option<String>,

    validation_score: u8,
    approved: bool,
    #[serde(default)]
    validated: bool,

    cvss: Option<CvssV3>,

    #[serde(default)]
    children: Vec<AttackNode>,
}

impl AttackNode {
    pub fn new(
        goal: impl Into<String>,
        level: u32,
        node_type: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            level,
            node_type: node_type.into(),
            parent_id,
            is_atomic: false,
            atomic_reason: None,
            validation_score: 0,
            approved: false,
            validated: false,
            cvss: None,
            children: Vec::new(),
        }
    }

    /// Level-0 root of a new tree.
    pub fn surface_goal(goal: impl Into<String>) -> Self {
        Self::new(goal, 0, SURFACE_GOAL, None)
    }

    /// Unvalidated candidate one level below `parent`.
    pub fn child_of(
        parent: &AttackNode,
        goal: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self::new(goal, parent.level + 1, node_type, Some(parent.id.clone()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_atomic(&self) -> bool {
        self.is_atomic
    }

    pub fn atomic_reason(&self) -> Option<&str> {
        self.atomic_reason.as_deref()
    }

    pub fn validation_score(&self) -> u8 {
        self.validation_score
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    /// Whether score and approval have been recorded.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn cvss(&self) -> Option<&CvssV3> {
        self.cvss.as_ref()
    }

    pub fn children(&self) -> &[AttackNode] {
        &self.children
    }

    /// Children can be mutated in place but not removed or reordered.
    pub fn children_mut(&mut self) -> &mut [AttackNode] {
        &mut self.children
    }

    pub fn push_child(&mut self, child: AttackNode) {
        self.children.push(child);
    }

    /// Record the validator's verdict. A node is validated at most once.
    pub fn record_validation(&mut self, score: u8, approved: bool) -> Result<()> {
        if self.validated {
            return Err(AttackTreeError::InvariantViolation {
                node: self.id.clone(),
                message: "node is already validated".into(),
            });
        }
        self.validation_score = score;
        self.approved = approved;
        self.validated = true;
        Ok(())
    }

    /// Turn this node into an atomic leaf carrying `cvss`.
    ///
    /// Atomicity is monotonic: marking an already-atomic node is an error.
    pub fn mark_atomic(&mut self, reason: impl Into<String>, cvss: CvssV3) -> Result<()> {
        if self.is_atomic {
            return Err(AttackTreeError::InvariantViolation {
                node: self.id.clone(),
                message: "node is already atomic".into(),
            });
        }
        self.is_atomic = true;
        self.atomic_reason = Some(reason.into());
        self.cvss = Some(cvss);
        Ok(())
    }

    /// This node and all its descendants, depth-first pre-order.
    pub fn descendants(&self) -> Vec<&AttackNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(AttackNode::node_count).sum::<usize>()
    }

    pub fn max_level(&self) -> u32 {
        self.children
            .iter()
            .map(AttackNode::max_level)
            .max()
            .unwrap_or(self.level)
    }

    /// Fail on the first node whose atomic state is inconsistent: `cvss` and
    /// `atomic_reason` must be present exactly when `is_atomic` is set, and a
    /// stored base score must match its metrics.
    ///
    /// Trees read back from storage bypass the constructors, so callers must
    /// run this after deserializing.
    pub fn check_invariants(&self) -> Result<()> {
        for node in self.descendants() {
            let violation = |message: &str| {
                Err(AttackTreeError::InvariantViolation {
                    node: node.id.clone(),
                    message: message.into(),
                })
            };
            match (node.is_atomic, &node.cvss) {
                (false, Some(_)) => return violation("cvss present on non-atomic node"),
                (true, None) => return violation("atomic node has no cvss"),
                (_, Some(cvss))
                    if (cvss.base_score() - calculate_base_score(cvss.metrics())).abs() > 1e-9 =>
                {
                    return violation("cvss base score does not match its metrics")
                }
                _ => {}
            }
            if node.atomic_reason.is_some() != node.is_atomic {
                return violation("atomic_reason and is_atomic disagree");
            }
        }
        Ok(())
    }
}
