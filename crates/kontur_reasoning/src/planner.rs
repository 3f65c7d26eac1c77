//! Goal decomposition and script extraction.

use std::sync::LazyLock;

use regex::Regex;

static RE_STEP_CONNECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:і|then)\s+").unwrap());
static RE_LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").unwrap());
static RE_FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap());
static RE_SOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)SOLUTION:\n(.*?)\n\nSTATUS:").unwrap());

/// Split a goal on ` then ` / ` і `. A goal that does not split is one step.
pub fn split_goal(goal: &str) -> Vec<String> {
    let steps: Vec<String> = RE_STEP_CONNECTIVE
        .split(goal)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if steps.is_empty() {
        vec![goal.trim().to_string()]
    } else {
        steps
    }
}

/// Steps from a numbered (`1.`, `2)`) or bulleted (`-`, `*`) list.
pub fn parse_list_steps(text: &str) -> Vec<String> {
    RE_LIST_ITEM
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Script from a generator answer: the first fenced block, else the whole
/// trimmed text. `None` when nothing usable is left.
pub fn extract_script(text: &str) -> Option<String> {
    let script = match RE_FENCED.captures(text).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().trim(),
        None => text.trim(),
    };
    if script.is_empty() {
        None
    } else {
        Some(script.to_string())
    }
}

/// Script from a recalled document: the `SOLUTION:` section of a stored
/// episode, a fenced block, or the `tell application ... end tell` lines.
pub fn extract_recalled_script(content: &str) -> Option<String> {
    if let Some(section) = RE_SOLUTION.captures(content).and_then(|c| c.get(1)) {
        let script = section.as_str().trim();
        if !script.is_empty() {
            return Some(script.to_string());
        }
    }
    if let Some(block) = RE_FENCED.captures(content).and_then(|c| c.get(1)) {
        let script = block.as_str().trim();
        if !script.is_empty() {
            return Some(script.to_string());
        }
    }

    let mut lines = Vec::new();
    let mut inside = false;
    for line in content.lines() {
        let lowered = line.to_lowercase();
        if inside || lowered.contains("tell application") {
            lines.push(line);
            inside = !lowered.contains("end tell");
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Document stored after a step succeeds.
pub fn solution_document(step: &str, script: &str) -> String {
    format!("TASK: {}\n\nSOLUTION:\n{}\n\nSTATUS: success", step, script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_goal() {
        assert_eq!(
            split_goal("Open Safari THEN search cats then close it"),
            vec!["Open Safari", "search cats", "close it"]
        );
        assert_eq!(split_goal("відкрий Safari і знайди котів"), vec!["відкрий Safari", "знайди котів"]);
        assert_eq!(split_goal("  just one thing "), vec!["just one thing"]);
        assert_eq!(split_goal("marathon"), vec!["marathon"]);
    }

    #[test]
    fn test_parse_list_steps() {
        let text = "Sure:\n1. Open Finder\n2) Create folder\n- Rename it\n\nDone.";
        assert_eq!(
            parse_list_steps(text),
            vec!["Open Finder", "Create folder", "Rename it"]
        );
        assert!(parse_list_steps("no list here").is_empty());
    }

    #[test]
    fn test_extract_script_prefers_fenced_block() {
        let answer = "Here you go:\n```applescript\ntell application \"Safari\" to activate\n```\nEnjoy";
        assert_eq!(
            extract_script(answer).unwrap(),
            "tell application \"Safari\" to activate"
        );
        assert_eq!(extract_script("  delay 1 \n").unwrap(), "delay 1");
        assert_eq!(extract_script("   "), None);
        assert_eq!(extract_script("```\n\n```"), None);
    }

    #[test]
    fn test_recalled_script_from_stored_episode() {
        let doc = solution_document("open safari", "tell application \"Safari\"\n  activate\nend tell");
        assert_eq!(
            extract_recalled_script(&doc).unwrap(),
            "tell application \"Safari\"\n  activate\nend tell"
        );
    }

    #[test]
    fn test_recalled_script_from_tell_block() {
        let doc = "notes\ntell application \"Finder\"\n  open home\nend tell\ntrailing";
        assert_eq!(
            extract_recalled_script(doc).unwrap(),
            "tell application \"Finder\"\n  open home\nend tell"
        );
        assert_eq!(extract_recalled_script("nothing useful"), None);
    }
}
