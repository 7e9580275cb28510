use crate::ChildSpec;

pub const SYSTEM_INSTRUCTION: &str = "Output ONLY a numbered list.";

/// Generation request for the children of `parent_goal`.
pub fn generation_prompt(spec: &ChildSpec, parent_goal: &str) -> String {
    format!(
        "Generate {min} to {max} DISTINCT {child_type} goals\n\
         for automotive cybersecurity.\n\
         \n\
         Parent goal:\n\
         \"{parent_goal}\"\n\
         \n\
         Rules:\n\
         - Single attacker goal\n\
         - No tools, exploits, or defenses\n\
         - No implementation details\n\
         - Output ONLY a numbered list",
        min = spec.min_count,
        max = spec.max_count,
        child_type = spec.child_type,
    )
}
