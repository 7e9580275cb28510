//! End-to-end tests for tree expansion.
//!
//! Each test drives the expander against a scripted completion service:
//! prompt -> parse -> validate -> attach -> recurse -> verify tree.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use autotree_engine::{
    ChildGenerationPolicy, ChildSpec, EventEmitter, ExpansionEvent, TreeExpander, Validator,
};
use autotree_llm::CompletionService;
use autotree_types::{AttackNode, AttackTreeError, Result};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ROOT: &str = "Throttle Control System Compromise";

/// Answers by looking up the quoted parent goal in the prompt. Unknown
/// parents get an empty response; goals in `failing` get an error.
#[derive(Default)]
struct ScriptedCompletion {
    responses: HashMap<String, String>,
    failing: HashSet<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    fn respond(mut self, parent_goal: &str, lines: &[&str]) -> Self {
        let text = lines
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{}. {l}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        self.responses.insert(parent_goal.to_string(), text);
        self
    }

    fn respond_raw(mut self, parent_goal: &str, text: &str) -> Self {
        self.responses.insert(parent_goal.to_string(), text.to_string());
        self
    }

    fn fail_on(mut self, parent_goal: &str) -> Self {
        self.failing.insert(parent_goal.to_string());
        self
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn prompt_for(&self, parent_goal: &str) -> Option<String> {
        let quoted = format!("\"{parent_goal}\"");
        self.prompts().into_iter().find(|p| p.contains(&quoted))
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str, _system_instruction: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self
            .failing
            .iter()
            .any(|g| prompt.contains(&format!("\"{g}\"")))
        {
            return Err(AttackTreeError::RetriesExhausted {
                attempts: 5,
                last_error: "Rate limited by groq".into(),
            });
        }
        let text = self
            .responses
            .iter()
            .find(|(goal, _)| prompt.contains(&format!("\"{goal}\"")))
            .map(|(_, text)| text.clone())
            .unwrap_or_default();
        Ok(text)
    }
}

/// A throttle-control decomposition with rejections, atomic leaves at
/// levels 2 to 4, a malformed response, and a non-atomic level-3 node.
fn throttle_script() -> ScriptedCompletion {
    ScriptedCompletion::default()
        .respond(
            ROOT,
            &[
                "Attack the vehicle CAN network",
                "Deploy exploit on ECU and gateway",
                "Attack the telematics unit remotely",
            ],
        )
        .respond(
            "Attack the vehicle CAN network",
            &[
                "Attack the gateway ECU from the CAN bus",
                "Spoof brake messages and replay them",
                "Inject forged throttle frames on CAN",
            ],
        )
        .respond(
            "Attack the gateway ECU from the CAN bus",
            &[
                "Spoof wheel speed sensor signal via CAN bus",
                "Replay captured CAN frames to modify the throttle",
            ],
        )
        .respond_raw(
            "Inject forged throttle frames on CAN",
            "Here are some goals:\n- foo\n- bar",
        )
        .respond(
            "Replay captured CAN frames to modify the throttle",
            &["Replay a captured throttle CAN frame"],
        )
        .respond(
            "Attack the telematics unit remotely",
            &["Send crafted firmware update to the telematics unit"],
        )
}

fn find<'a>(tree: &'a AttackNode, goal: &str) -> Option<&'a AttackNode> {
    tree.descendants().into_iter().find(|n| n.goal() == goal)
}

fn tokens(goal: &str) -> HashSet<String> {
    goal.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn assert_tree_invariants(tree: &AttackNode) {
    for node in tree.descendants() {
        assert_eq!(
            node.cvss().is_some(),
            node.is_atomic(),
            "cvss/is_atomic mismatch on {:?}",
            node.goal()
        );
        assert_eq!(node.atomic_reason().is_some(), node.is_atomic());
        if node.level() < 2 {
            assert!(!node.is_atomic(), "level {} node is atomic", node.level());
        }
        for child in node.children() {
            assert_eq!(child.level(), node.level() + 1);
            assert_eq!(child.parent_id(), Some(node.id()));
            assert!(child.approved());
            let parent_tokens = tokens(node.goal());
            assert!(
                tokens(child.goal()).iter().any(|t| !parent_tokens.contains(t)),
                "{:?} does not specialise {:?}",
                child.goal(),
                node.goal()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Full expansion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_tree_satisfies_structural_invariants() {
    let script = Arc::new(throttle_script());
    let expander = TreeExpander::new(script.clone(), ChildGenerationPolicy::default());

    let tree = expander.build_tree(ROOT).await.expect("tree should build");

    assert_tree_invariants(&tree);
    assert!(Validator::default().check_tree(&tree).is_ok());
    assert!(tree.check_invariants().is_ok());

    assert_eq!(tree.level(), 0);
    assert_eq!(tree.node_type(), "surface_goal");
    let vectors: Vec<_> = tree.children().iter().map(|c| c.goal()).collect();
    assert_eq!(
        vectors,
        vec!["Attack the vehicle CAN network", "Attack the telematics unit remotely"]
    );
    assert!(tree
        .children()
        .iter()
        .all(|c| c.node_type() == "attack_vector"));

    // Every leaf is atomic except the node whose response was malformed.
    let open_leaves: Vec<_> = tree
        .descendants()
        .into_iter()
        .filter(|n| n.children().is_empty() && !n.is_atomic())
        .map(|n| n.goal())
        .collect();
    assert_eq!(open_leaves, vec!["Inject forged throttle frames on CAN"]);
    assert_eq!(tree.max_level(), 4);
}

#[tokio::test]
async fn atomic_leaf_carries_worst_case_score() {
    let expander = TreeExpander::new(Arc::new(throttle_script()), ChildGenerationPolicy::default());
    let tree = expander.build_tree(ROOT).await.unwrap();

    let leaf = find(&tree, "Spoof wheel speed sensor signal via CAN bus").unwrap();
    assert_eq!(leaf.level(), 3);
    assert_eq!(leaf.node_type(), "technique");
    assert!(leaf.is_atomic());
    assert_eq!(leaf.validation_score(), 4);
    let cvss = leaf.cvss().unwrap();
    assert_eq!(cvss.base_score(), 10.0);
    assert_eq!(
        cvss.vector_string(),
        "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H"
    );
    assert!(leaf.children().is_empty());
}

#[tokio::test]
async fn rejected_candidates_never_attach() {
    let events = EventEmitter::new(256);
    let mut rx = events.subscribe();
    let expander = TreeExpander::new(Arc::new(throttle_script()), ChildGenerationPolicy::default())
        .with_events(events);

    let mut root = AttackNode::surface_goal(ROOT);
    let stats = expander.grow(&mut root).await.unwrap();

    assert!(find(&root, "Deploy exploit on ECU and gateway").is_none());
    assert!(find(&root, "Spoof brake messages and replay them").is_none());
    assert_eq!(stats.rejected, 2);

    let mut rejected = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExpansionEvent::CandidateRejected {
            goal,
            validation_score,
            ..
        } = event
        {
            assert!(validation_score < 3);
            rejected.push(goal);
        }
    }
    assert_eq!(
        rejected,
        vec![
            "Deploy exploit on ECU and gateway",
            "Spoof brake messages and replay them"
        ]
    );
}

#[tokio::test]
async fn conjunction_goal_scores_three_and_attaches() {
    // Fails single_goal only; three of four is enough for approval.
    let script = ScriptedCompletion::default().respond(ROOT, &["Compromise the ECU and the gateway"]);
    let expander = TreeExpander::new(Arc::new(script), ChildGenerationPolicy::default());
    let tree = expander.build_tree(ROOT).await.unwrap();

    let node = find(&tree, "Compromise the ECU and the gateway").unwrap();
    assert_eq!(node.validation_score(), 3);
    assert!(node.approved());
    assert!(!node.is_atomic());

    // With a strict threshold the same candidate is discarded without error.
    let script = ScriptedCompletion::default().respond(ROOT, &["Compromise the ECU and the gateway"]);
    let expander = TreeExpander::new(Arc::new(script), ChildGenerationPolicy::default())
        .with_validator(Validator::default().with_approval_threshold(4));
    let tree = expander.build_tree(ROOT).await.unwrap();
    assert!(tree.children().is_empty());
}

#[tokio::test]
async fn malformed_response_leaves_node_childless() {
    let script = Arc::new(throttle_script());
    let expander = TreeExpander::new(script.clone(), ChildGenerationPolicy::default());
    let tree = expander.build_tree(ROOT).await.unwrap();

    let node = find(&tree, "Inject forged throttle frames on CAN").unwrap();
    assert!(!node.is_atomic());
    assert!(node.children().is_empty());
    assert!(script.prompt_for("Inject forged throttle frames on CAN").is_some());
}

#[tokio::test]
async fn stats_count_calls_candidates_and_leaves() {
    let expander = TreeExpander::new(Arc::new(throttle_script()), ChildGenerationPolicy::default());
    let mut root = AttackNode::surface_goal(ROOT);
    let stats = expander.grow(&mut root).await.unwrap();

    // Root, both vectors, both methods and the non-atomic technique.
    assert_eq!(stats.completion_calls, 6);
    assert_eq!(stats.candidates, 10);
    assert_eq!(stats.attached, 8);
    assert_eq!(stats.atomic, 3);
    assert_eq!(stats.deepest_level, 4);
    assert_eq!(root.node_count(), 9);
}

#[tokio::test]
async fn prompts_follow_policy_per_node_type() {
    let script = Arc::new(throttle_script());
    let expander = TreeExpander::new(script.clone(), ChildGenerationPolicy::default());
    expander.build_tree(ROOT).await.unwrap();

    let prompt = script.prompt_for(ROOT).unwrap();
    assert!(prompt.starts_with("Generate 4 to 7 DISTINCT attack_vector goals"));
    let prompt = script.prompt_for("Attack the vehicle CAN network").unwrap();
    assert!(prompt.starts_with("Generate 2 to 4 DISTINCT method goals"));
    let prompt = script
        .prompt_for("Attack the gateway ECU from the CAN bus")
        .unwrap();
    assert!(prompt.starts_with("Generate 2 to 4 DISTINCT technique goals"));
    let prompt = script
        .prompt_for("Replay captured CAN frames to modify the throttle")
        .unwrap();
    assert!(prompt.starts_with("Generate 1 to 3 DISTINCT technique goals"));

    // Atomic nodes are never sent back to the model.
    assert!(script
        .prompt_for("Spoof wheel speed sensor signal via CAN bus")
        .is_none());
}

// ---------------------------------------------------------------------------
// Depth guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn depth_limit_stops_non_atomic_level_three_node() {
    let script = Arc::new(throttle_script());
    let events = EventEmitter::default();
    let mut rx = events.subscribe();
    let expander = TreeExpander::new(script.clone(), ChildGenerationPolicy::default())
        .with_depth_limit(Some(3))
        .with_events(events);

    let tree = expander.build_tree(ROOT).await.unwrap();
    assert_tree_invariants(&tree);

    let node = find(&tree, "Replay captured CAN frames to modify the throttle").unwrap();
    assert_eq!(node.level(), 3);
    assert!(!node.is_atomic());
    assert!(node.children().is_empty());
    assert!(script
        .prompt_for("Replay captured CAN frames to modify the throttle")
        .is_none());
    assert_eq!(script.prompts().len(), 5);
    assert_eq!(tree.max_level(), 3);

    let mut limited = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExpansionEvent::DepthLimitReached { node_id, level } = event {
            limited.push((node_id, level));
        }
    }
    // The atomic level-3 leaf terminates on atomicity, not on the limit.
    assert_eq!(limited, vec![(node.id().to_string(), 3)]);
}

// ---------------------------------------------------------------------------
// Failures and alternate configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_failure_propagates_and_grow_keeps_partial_tree() {
    let script = throttle_script().fail_on("Attack the telematics unit remotely");
    let expander = TreeExpander::new(Arc::new(script), ChildGenerationPolicy::default());

    let mut root = AttackNode::surface_goal(ROOT);
    let err = expander.grow(&mut root).await.unwrap_err();
    assert!(matches!(err, AttackTreeError::RetriesExhausted { .. }));
    assert!(err.is_fatal());

    // The first vector's subtree was completed before the failure.
    assert!(find(&root, "Spoof wheel speed sensor signal via CAN bus").is_some());
    let failed = find(&root, "Attack the telematics unit remotely").unwrap();
    assert!(failed.children().is_empty());
    assert!(root.check_invariants().is_ok());
}

#[tokio::test]
async fn zero_candidates_is_not_an_error() {
    let expander = TreeExpander::new(
        Arc::new(ScriptedCompletion::default()),
        ChildGenerationPolicy::default(),
    );
    let tree = expander.build_tree(ROOT).await.unwrap();
    assert!(tree.children().is_empty());
    assert_eq!(tree.node_count(), 1);
}

#[tokio::test]
async fn alternate_taxonomy_drives_types_and_termination() {
    let policy = ChildGenerationPolicy::empty()
        .with_entry("surface_goal", ChildSpec::new("asset", 1, 2))
        .with_entry("asset", ChildSpec::new("threat", 1, 1));
    let script = Arc::new(
        ScriptedCompletion::default()
            .respond(ROOT, &["Attack the infotainment head unit"])
            .respond(
                "Attack the infotainment head unit",
                &["Attack the infotainment Bluetooth stack"],
            ),
    );
    let expander = TreeExpander::new(script.clone(), policy);
    let tree = expander.build_tree(ROOT).await.unwrap();

    let asset = &tree.children()[0];
    assert_eq!(asset.node_type(), "asset");
    let threat = &asset.children()[0];
    assert_eq!(threat.node_type(), "threat");
    assert_eq!(threat.level(), 2);
    // No policy entry for "threat": expansion ends without asking the model.
    assert!(threat.children().is_empty());
    assert_eq!(script.prompts().len(), 2);
    assert!(script.prompts()[1].starts_with("Generate 1 to 1 DISTINCT threat goals"));
}

#[tokio::test]
async fn tree_survives_json_round_trip() {
    let expander = TreeExpander::new(Arc::new(throttle_script()), ChildGenerationPolicy::default());
    let tree = expander.build_tree(ROOT).await.unwrap();

    let json = serde_json::to_string(&tree).unwrap();
    let back: AttackNode = serde_json::from_str(&json).unwrap();
    assert_eq!(back, tree);
    assert!(Validator::default().check_tree(&back).is_ok());
}
