//! Recursive, depth-first tree construction.
//!
//! For each expandable node the expander asks the completion service for
//! candidate children, runs every candidate through the [`Validator`],
//! attaches the approved ones in generation order and recurses into them.
//! Expansion stops at atomic nodes, at the optional depth limit, and at node
//! types with no policy entry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use autotree_llm::CompletionService;
use autotree_types::{AttackNode, Result};

use crate::events::{EventEmitter, ExpansionEvent};
use crate::parse::parse_numbered_list;
use crate::policy::ChildGenerationPolicy;
use crate::prompt::{generation_prompt, SYSTEM_INSTRUCTION};
use crate::validator::Validator;

/// Counters for one `grow` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    pub completion_calls: usize,
    pub candidates: usize,
    pub rejected: usize,
    pub attached: usize,
    pub atomic: usize,
    pub deepest_level: u32,
}

pub struct TreeExpander {
    completion: Arc<dyn CompletionService>,
    policy: ChildGenerationPolicy,
    validator: Validator,
    depth_limit: Option<u32>,
    events: Option<EventEmitter>,
}

impl TreeExpander {
    pub fn new(completion: Arc<dyn CompletionService>, policy: ChildGenerationPolicy) -> Self {
        Self {
            completion,
            policy,
            validator: Validator::default(),
            depth_limit: None,
            events: None,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Nodes with `level >= limit` are not expanded. `None` means no limit.
    pub fn with_depth_limit(mut self, limit: Option<u32>) -> Self {
        self.depth_limit = limit;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &ChildGenerationPolicy {
        &self.policy
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn depth_limit(&self) -> Option<u32> {
        self.depth_limit
    }

    /// Build a complete tree for `surface_goal`.
    ///
    /// On error the partial tree is dropped; use [`grow`](Self::grow) to keep it.
    pub async fn build_tree(&self, surface_goal: &str) -> Result<AttackNode> {
        let mut root = AttackNode::surface_goal(surface_goal);
        self.grow(&mut root).await?;
        Ok(root)
    }

    /// Expand `root` in place until every branch terminates.
    ///
    /// If a completion call fails the error is returned and whatever was
    /// attached so far stays in `root`.
    pub async fn grow(&self, root: &mut AttackNode) -> Result<ExpansionStats> {
        let started = Instant::now();
        self.emit(ExpansionEvent::TreeStarted {
            surface_goal: root.goal().to_string(),
        });
        tracing::info!(goal = %root.goal(), depth_limit = ?self.depth_limit, "Building attack tree");

        let mut stats = ExpansionStats {
            deepest_level: root.level(),
            ..ExpansionStats::default()
        };
        self.expand(root, &mut stats).await?;

        let node_count = root.node_count();
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            goal = %root.goal(),
            nodes = node_count,
            completion_calls = stats.completion_calls,
            candidates = stats.candidates,
            rejected = stats.rejected,
            atomic = stats.atomic,
            deepest_level = stats.deepest_level,
            duration_ms,
            "Attack tree complete"
        );
        self.emit(ExpansionEvent::TreeCompleted {
            surface_goal: root.goal().to_string(),
            node_count,
            atomic_count: stats.atomic,
            duration_ms,
        });
        Ok(stats)
    }

    fn expand<'a>(
        &'a self,
        node: &'a mut AttackNode,
        stats: &'a mut ExpansionStats,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if node.is_atomic() {
                return Ok(());
            }
            if let Some(limit) = self.depth_limit {
                if node.level() >= limit {
                    tracing::debug!(node = %node.id(), level = node.level(), "Depth limit reached");
                    self.emit(ExpansionEvent::DepthLimitReached {
                        node_id: node.id().to_string(),
                        level: node.level(),
                    });
                    return Ok(());
                }
            }
            let Some(spec) = self.policy.lookup(node.node_type()) else {
                tracing::debug!(node_type = %node.node_type(), "No child policy, not expanding");
                return Ok(());
            };

            let prompt = generation_prompt(spec, node.goal());
            stats.completion_calls += 1;
            let response = self.completion.complete(&prompt, SYSTEM_INSTRUCTION).await?;
            let goals = parse_numbered_list(&response);
            let candidates = goals.len();
            stats.candidates += candidates;

            let first_new = node.children().len();
            for goal in goals {
                let candidate = AttackNode::child_of(node, goal, spec.child_type.as_str());
                let child = self.validator.validate(candidate, node)?;
                if !child.approved() {
                    stats.rejected += 1;
                    self.emit(ExpansionEvent::CandidateRejected {
                        parent_id: node.id().to_string(),
                        goal: child.goal().to_string(),
                        validation_score: child.validation_score(),
                    });
                    continue;
                }
                if let Some(cvss) = child.cvss() {
                    stats.atomic += 1;
                    self.emit(ExpansionEvent::NodeAtomic {
                        node_id: child.id().to_string(),
                        goal: child.goal().to_string(),
                        base_score: cvss.base_score(),
                    });
                }
                stats.deepest_level = stats.deepest_level.max(child.level());
                node.push_child(child);
            }

            let attached = node.children().len() - first_new;
            stats.attached += attached;
            tracing::info!(
                goal = %node.goal(),
                level = node.level(),
                child_type = %spec.child_type,
                candidates,
                attached,
                "Expanded node"
            );
            self.emit(ExpansionEvent::NodeExpanded {
                node_id: node.id().to_string(),
                level: node.level(),
                child_type: spec.child_type.clone(),
                candidates,
                attached,
            });

            for child in &mut node.children_mut()[first_new..] {
                self.expand(child, stats).await?;
            }
            Ok(())
        })
    }

    fn emit(&self, event: ExpansionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use autotree_types::AttackTreeError;
    use std::sync::Mutex;

    /// Answers every prompt with the same text and records the prompts.
    struct FixedCompletion {
        text: String,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedCompletion {
        fn new(text: &str) -> Arc<Self> {
            Arc::new(Self {
                text: text.into(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionService for FixedCompletion {
        async fn complete(&self, prompt: &str, system_instruction: &str) -> Result<String> {
            assert_eq!(system_instruction, SYSTEM_INSTRUCTION);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.text.clone())
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionService for FailingCompletion {
        async fn complete(&self, _prompt: &str, _system_instruction: &str) -> Result<String> {
            Err(AttackTreeError::RetriesExhausted {
                attempts: 5,
                last_error: "Rate limited by groq".into(),
            })
        }
    }

    #[tokio::test]
    async fn malformed_response_yields_no_children() {
        let completion = FixedCompletion::new("Here are some goals:\n- foo\n- bar");
        let expander = TreeExpander::new(completion.clone(), ChildGenerationPolicy::default());

        let tree = expander.build_tree("Throttle Control System Compromise").await.unwrap();
        assert!(tree.children().is_empty());
        assert_eq!(completion.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn atomic_root_is_never_expanded() {
        let completion = FixedCompletion::new("1. Spoof CAN frames");
        let expander = TreeExpander::new(completion.clone(), ChildGenerationPolicy::default());

        let mut root = AttackNode::new("Spoof wheel speed sensor signal via CAN bus", 3, "technique", None);
        root.mark_atomic(
            "preset",
            autotree_types::CvssV3::assess(autotree_types::CvssMetrics::worst_case()),
        )
        .unwrap();
        let stats = expander.grow(&mut root).await.unwrap();
        assert_eq!(stats.completion_calls, 0);
        assert!(root.children().is_empty());
    }

    #[tokio::test]
    async fn unknown_node_type_is_silent_terminal() {
        let completion = FixedCompletion::new("1. Access the vehicle CAN network");
        let expander = TreeExpander::new(completion.clone(), ChildGenerationPolicy::empty());

        let tree = expander.build_tree("Throttle Control System Compromise").await.unwrap();
        assert!(tree.children().is_empty());
        assert!(completion.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn depth_limit_zero_stops_at_root() {
        let completion = FixedCompletion::new("1. Access the vehicle CAN network");
        let events = EventEmitter::new(16);
        let mut rx = events.subscribe();
        let expander = TreeExpander::new(completion.clone(), ChildGenerationPolicy::default())
            .with_depth_limit(Some(0))
            .with_events(events);

        let tree = expander.build_tree("Throttle Control System Compromise").await.unwrap();
        assert!(tree.children().is_empty());
        assert!(completion.prompts.lock().unwrap().is_empty());

        assert!(matches!(rx.try_recv().unwrap(), ExpansionEvent::TreeStarted { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ExpansionEvent::DepthLimitReached { level: 0, .. }
        ));
        assert!(matches!(rx.try_recv().unwrap(), ExpansionEvent::TreeCompleted { .. }));
    }

    #[tokio::test]
    async fn repeated_parent_text_is_rejected_as_unspecific() {
        // The only candidate repeats the parent, so it fails
        // more_specific_than_parent and, lacking a domain keyword,
        // automotive_relevant as well.
        let completion = FixedCompletion::new("1. Throttle Control System Compromise");
        let expander = TreeExpander::new(completion, ChildGenerationPolicy::default());

        let mut root = AttackNode::surface_goal("Throttle Control System Compromise");
        let stats = expander.grow(&mut root).await.unwrap();
        assert!(root.children().is_empty());
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.attached, 0);
    }

    #[tokio::test]
    async fn completion_failure_propagates() {
        let expander = TreeExpander::new(Arc::new(FailingCompletion), ChildGenerationPolicy::default());
        let err = expander
            .build_tree("Throttle Control System Compromise")
            .await
            .unwrap_err();
        assert!(matches!(err, AttackTreeError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn prompt_uses_root_policy_entry() {
        let completion = FixedCompletion::new("");
        let expander = TreeExpander::new(completion.clone(), ChildGenerationPolicy::default());
        expander.build_tree("Throttle Control System Compromise").await.unwrap();

        let prompts = completion.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Generate 4 to 7 DISTINCT attack_vector goals"));
        assert!(prompts[0].contains("\"Throttle Control System Compromise\""));
    }
}
