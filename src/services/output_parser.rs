//! Parsing of the tagged text emitted by agents.
//!
//! Agents are asked for lightweight XML-ish markers (`<status>`, `<tasks>`,
//! `<validation>`, ...). None of this is real XML: tags are matched leniently,
//! anything outside them is ignored, and missing tags are reported as `None`
//! so callers can decide between a reformat retry and a raw-text fallback.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::errors::{CritiqueError, PlanError};
use crate::domain::models::{
    DesignChange, ExecutionMode, Plan, TaskDraft, ValidationOutcome, Verdict, WorkerAssignment,
};

static TASK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<task\b([^>]*)>(.*?)</task>").expect("task tag pattern is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("attribute pattern is valid")
});

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s*%").expect("percent pattern is valid"));

/// Inner text of every `<tag>..</tag>` occurrence, trimmed.
pub fn tag_contents(text: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        found.push(after[..end].trim().to_string());
        rest = &after[end + close.len()..];
    }
    found
}

/// Inner text of the first `<tag>..</tag>`, trimmed.
pub fn first_tag(text: &str, tag: &str) -> Option<String> {
    tag_contents(text, tag).into_iter().next()
}

/// Every `<progress>` marker in a chunk of agent text.
pub fn progress_markers(text: &str) -> Vec<String> {
    tag_contents(text, "progress")
        .into_iter()
        .filter(|m| !m.is_empty())
        .collect()
}

/// Self-reported worker outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Done,
    Partial,
}

/// Structured fields found in a worker's terminal output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOutput {
    pub status: Option<WorkerStatus>,
    pub summary: Option<String>,
    pub followups: Vec<String>,
}

impl WorkerOutput {
    /// Whether the agent emitted the status marker at all.
    pub fn is_structured(&self) -> bool {
        self.status.is_some()
    }
}

pub fn parse_worker_output(text: &str) -> WorkerOutput {
    let status = first_tag(text, "status").and_then(|s| match s.to_lowercase().as_str() {
        "done" => Some(WorkerStatus::Done),
        "partial" => Some(WorkerStatus::Partial),
        _ => None,
    });
    let summary = first_tag(text, "summary").filter(|s| !s.is_empty());
    let followups = first_tag(text, "followups")
        .map(|block| {
            tag_contents(&block, "task")
                .into_iter()
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    WorkerOutput {
        status,
        summary,
        followups,
    }
}

/// Whether a result text says the agent ran out of turns.
pub fn reached_max_turns(text: &str) -> bool {
    text.to_lowercase().contains("reached max turns")
}

fn attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|c| (c[1].to_lowercase(), c[2].to_string()))
        .collect()
}

fn parse_positions(raw: &str) -> Vec<usize> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|p| p.trim().parse::<usize>().ok())
        .filter(|p| *p >= 1)
        .collect()
}

/// Task drafts inside the first `<tasks>` block.
///
/// Returns `None` when there is no `<tasks>` block at all, which is different
/// from an empty block (the agent explicitly found nothing to add).
pub fn parse_task_block(text: &str) -> Option<Vec<TaskDraft>> {
    let start = text.find("<tasks>")?;
    let end = text[start..].find("</tasks>")? + start;
    let block = &text[start + "<tasks>".len()..end];

    let drafts = TASK_TAG
        .captures_iter(block)
        .filter_map(|caps| {
            let description = caps[2].trim();
            if description.is_empty() {
                return None;
            }
            let attrs = attributes(&caps[1]);
            let mut draft = TaskDraft::new(description);
            if let Some(deps) = attrs.get("depends") {
                draft = draft.depends_on(parse_positions(deps));
            }
            if let Some(worker) = attrs.get("worker") {
                draft.worker = WorkerAssignment::from(worker.clone());
            }
            Some(draft)
        })
        .collect();
    Some(drafts)
}

/// Parse `<project><context/><mode/><tasks/></project>` planner output.
pub fn parse_plan(text: &str) -> Result<Plan, PlanError> {
    let tasks = parse_task_block(text)
        .ok_or_else(|| PlanError::Malformed("no <tasks> block in planner output".into()))?;
    if tasks.is_empty() {
        return Err(PlanError::Empty);
    }
    Ok(Plan {
        context: first_tag(text, "context").unwrap_or_default(),
        tasks,
        mode: first_tag(text, "mode").and_then(|m| ExecutionMode::from_str(&m)),
    })
}

/// Parse `<validation>` output of the design validator.
pub fn parse_validation(text: &str) -> Result<ValidationOutcome, PlanError> {
    let decision = first_tag(text, "decision")
        .ok_or_else(|| PlanError::Malformed("no <decision> in validator output".into()))?;
    let gaps: Vec<String> = first_tag(text, "gaps")
        .map(|block| {
            tag_contents(&block, "gap")
                .into_iter()
                .filter(|g| !g.is_empty())
                .collect()
        })
        .unwrap_or_default();

    match decision.to_lowercase().as_str() {
        "accept" => Ok(ValidationOutcome::accept(
            first_tag(text, "project").unwrap_or_default(),
        )),
        "reject" => Ok(ValidationOutcome::reject(gaps)),
        other => Err(PlanError::Malformed(format!("unknown decision {other:?}"))),
    }
}

/// Goal-satisfaction estimate: `<percent>NN</percent>`, else the first `NN%`.
pub fn parse_percent(text: &str) -> Option<u8> {
    let raw = first_tag(text, "percent").or_else(|| {
        PERCENT
            .captures(text)
            .map(|c| c[1].to_string())
    })?;
    let value: u16 = raw.trim().trim_end_matches('%').trim().parse().ok()?;
    u8::try_from(value.min(100)).ok()
}

/// Challenge strings inside `<challenges>`.
pub fn parse_challenges(text: &str) -> Result<Vec<String>, CritiqueError> {
    let block = first_tag(text, "challenges")
        .ok_or_else(|| CritiqueError::Malformed("no <challenges> block".into()))?;
    Ok(tag_contents(&block, "challenge")
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect())
}

/// `<verdict>pass|fail</verdict>` with an optional `<reason>`.
pub fn parse_verdict(text: &str) -> Result<Verdict, CritiqueError> {
    let verdict = first_tag(text, "verdict")
        .ok_or_else(|| CritiqueError::Malformed("no <verdict> tag".into()))?;
    let reason = first_tag(text, "reason").unwrap_or_default();
    match verdict.to_lowercase().as_str() {
        "pass" | "yes" | "satisfied" => Ok(Verdict::Satisfied),
        "fail" | "no" | "unsatisfied" => Ok(Verdict::Unsatisfied(reason)),
        other => Err(CritiqueError::Malformed(format!("unknown verdict {other:?}"))),
    }
}

/// `<keep/>` keeps the saved work; anything else replans.
pub fn parse_design_change(text: &str) -> DesignChange {
    if text.contains("<keep") {
        DesignChange::Keep
    } else {
        DesignChange::Replan
    }
}

/// Normalize challenge text for duplicate detection.
pub fn normalize_challenge(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_design_change_defaults_to_replan() {
        assert_eq!(parse_design_change("<keep/>"), DesignChange::Keep);
        assert_eq!(parse_design_change("<replan/>"), DesignChange::Replan);
        assert_eq!(parse_design_change("unsure"), DesignChange::Replan);
    }

    #[test]
    fn test_worker_output_done() {
        let out = parse_worker_output(
            "Implemented it.\n<summary>added health endpoint</summary>\n<status>done</status>",
        );
        assert_eq!(out.status, Some(WorkerStatus::Done));
        assert_eq!(out.summary.as_deref(), Some("added health endpoint"));
        assert!(out.followups.is_empty());
        assert!(out.is_structured());
    }

    #[test]
    fn test_worker_output_partial_with_followups() {
        let text = "<status>partial</status>\n<followups>\n<task>wire the router</task>\n<task> </task>\n<task>add tests</task>\n</followups>";
        let out = parse_worker_output(text);
        assert_eq!(out.status, Some(WorkerStatus::Partial));
        assert_eq!(out.followups, vec!["wire the router", "add tests"]);
    }

    #[test]
    fn test_worker_output_unstructured() {
        let out = parse_worker_output("I did some things");
        assert!(!out.is_structured());
        assert!(out.summary.is_none());
    }

    #[test]
    fn test_progress_markers() {
        let text = "<progress>reading files</progress> blah <progress>writing server</progress>";
        assert_eq!(progress_markers(text), vec!["reading files", "writing server"]);
    }

    #[test]
    fn test_parse_plan() {
        let text = r#"Wrote PLAN.md.
<project>
<context>A Go HTTP service</context>
<mode>sequential</mode>
<tasks>
<task>Create go.mod</task>
<task depends="1">Implement server</task>
<task depends="1, 2" worker="w1">Write tests</task>
</tasks>
</project>"#;
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.context, "A Go HTTP service");
        assert_eq!(plan.mode, Some(ExecutionMode::Sequential));
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.tasks[1].depends_on, vec![1]);
        assert_eq!(plan.tasks[2].depends_on, vec![1, 2]);
        assert_eq!(plan.tasks[2].worker, WorkerAssignment::Pinned("w1".into()));
    }

    #[test]
    fn test_parse_plan_errors() {
        assert!(matches!(parse_plan("nothing"), Err(PlanError::Malformed(_))));
        assert!(matches!(
            parse_plan("<tasks>\n</tasks>"),
            Err(PlanError::Empty)
        ));
    }

    #[test]
    fn test_task_block_empty_vs_missing() {
        assert_eq!(parse_task_block("<tasks>\n</tasks>"), Some(vec![]));
        assert_eq!(parse_task_block("looks complete to me"), None);
    }

    #[test]
    fn test_parse_validation() {
        let accepted = parse_validation(
            "<validation><decision>accept</decision><gaps></gaps><project># Svc</project></validation>",
        )
        .unwrap();
        assert!(accepted.accepted);
        assert_eq!(accepted.project, "# Svc");

        let rejected = parse_validation(
            "<validation><decision>reject</decision><gaps><gap>No language</gap></gaps><project></project></validation>",
        )
        .unwrap();
        assert!(!rejected.accepted);
        assert_eq!(rejected.gaps, vec!["No language"]);
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("<percent>85</percent>"), Some(85));
        assert_eq!(parse_percent("about 100% of the goal is met"), Some(100));
        assert_eq!(parse_percent("<percent>250</percent>"), Some(100));
        assert_eq!(parse_percent("no estimate"), None);
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(parse_verdict("<verdict>pass</verdict>").unwrap(), Verdict::Satisfied);
        assert_eq!(
            parse_verdict("<verdict>fail</verdict><reason>no tests</reason>").unwrap(),
            Verdict::Unsatisfied("no tests".into())
        );
        assert!(parse_verdict("hmm").is_err());
    }

    #[test]
    fn test_parse_challenges_and_normalize() {
        let text = "<challenges><challenge>Send an empty body</challenge><challenge>Kill the DB mid-write</challenge></challenges>";
        let found = parse_challenges(text).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(
            normalize_challenge("  Send an   EMPTY body "),
            normalize_challenge(&found[0])
        );
        assert!(parse_challenges("none").is_err());
    }
}
