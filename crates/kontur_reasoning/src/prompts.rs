use kontur_memory::SimilarityHit;

pub const SOLVER_SYSTEM: &str = "You write short automation scripts for the host's scripting \
backend. Answer with exactly one fenced code block containing the script and nothing else.";

pub const PLANNER_SYSTEM: &str = "You break a user goal into the smallest sequence of concrete \
steps. Answer with a numbered list, one step per line, and nothing else.";

pub struct PromptBuilder;

impl PromptBuilder {
    /// Prompt asking for a script that performs `step`.
    pub fn solution(goal: &str, step: &str, recalled: &[SimilarityHit], last_error: Option<&str>) -> String {
        let mut prompt = format!("GOAL: {}\nCURRENT STEP: {}\n", goal, step);

        if !recalled.is_empty() {
            prompt.push_str("\n== PRIOR SOLUTIONS ==\n");
            for hit in recalled {
                prompt.push_str(&format!("--- (similarity {:.2})\n{}\n", hit.score, hit.content));
            }
        }

        if let Some(error) = last_error {
            prompt.push_str(&format!(
                "\n== PREVIOUS ATTEMPT FAILED ==\n{}\nUse a different approach.\n",
                error
            ));
        }

        prompt.push_str("\nWrite the script for the current step.");
        prompt
    }

    pub fn decomposition(goal: &str) -> String {
        format!("GOAL: {}\n\nList the steps.", goal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_prompt_sections() {
        let hits = vec![SimilarityHit {
            id: "sim-1".to_string(),
            content: "TASK: open safari".to_string(),
            metadata: serde_json::json!({"goal": "browse"}),
            score: 0.9,
        }];
        let prompt = PromptBuilder::solution("browse", "open safari", &hits, Some("syntax error"));
        assert!(prompt.contains("CURRENT STEP: open safari"));
        assert!(prompt.contains("== PRIOR SOLUTIONS =="));
        assert!(prompt.contains("(similarity 0.90)"));
        assert!(prompt.contains("syntax error"));

        let bare = PromptBuilder::solution("browse", "open safari", &[], None);
        assert!(!bare.contains("PRIOR SOLUTIONS"));
        assert!(!bare.contains("FAILED"));
    }
}
