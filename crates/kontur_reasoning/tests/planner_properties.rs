use kontur_reasoning::planner::{extract_recalled_script, solution_document, split_goal};
use proptest::prelude::*;

proptest! {
    /// Splitting never yields blank or untrimmed steps, and never loses the goal entirely.
    #[test]
    fn split_steps_are_trimmed_and_non_empty(goal in "[a-zA-Z ]{0,40}( then [a-zA-Z ]{0,20}){0,3}") {
        let steps = split_goal(&goal);
        prop_assert!(!steps.is_empty());
        if !goal.trim().is_empty() {
            for step in &steps {
                prop_assert!(!step.is_empty());
                prop_assert_eq!(step.trim(), step.as_str());
            }
        }
    }

    /// A stored solution is always recoverable from its document.
    #[test]
    fn stored_solution_round_trips(step in "[a-z ]{1,30}", script in "[a-zA-Z0-9\"]([a-zA-Z0-9 \"]{0,40}[a-zA-Z0-9\"])?") {
        let doc = solution_document(&step, &script);
        prop_assert_eq!(extract_recalled_script(&doc), Some(script));
    }
}
