//! Prompt templates for the planning and critique collaborators.

use crate::domain::models::{
    truncate_chars, CritiqueContext, Task, TaskStatus, TaskVerdict, Verdict,
};

const RESULT_CHARS: usize = 500;
const ERROR_CHARS: usize = 200;

pub fn validator(design: &str) -> String {
    format!(
        "You are a strict design reviewer for an autonomous planner/worker/judge \
pipeline. Decide whether this design is specific enough that a planner can \
derive concrete tasks and workers can produce a verifiable outcome.

<design>
{design}
</design>

Return ONLY this XML:
<validation>
<decision>accept|reject</decision>
<gaps>
<gap>Missing explicit target language/framework</gap>
</gaps>
<project>
...PROJECT.md content if accepted...
</project>
</validation>

Rules:
- Reject when key details are missing: language, runtime, interfaces and IO, \
scope, constraints.
- Reject when the end state cannot be observed or tested.
- If accepted, leave <gaps></gaps> empty and write a concise PROJECT.md \
(goal, stack, IO surfaces, constraints, success criteria) inside <project>.
- If rejected, leave <project></project> empty. Keep each gap short and specific."
    )
}

pub fn planner(goal: &str) -> String {
    format!(
        "Analyze this design document and extract a short project context and a \
list of executable tasks.

<design>
{goal}
</design>

First write PLAN.md at the project root: a one-sentence goal, two or three \
sentences of approach, and the task list as `- [ ]` items.

Then return ONLY this XML:

<project>
<context>One or two sentences: what is being built and with which technologies</context>
<mode>parallel</mode>
<tasks>
<task>Create go.mod with module name and dependencies</task>
<task depends=\"1\">Implement HTTP server with health endpoint</task>
<task depends=\"1,2\">Write integration tests for health endpoint</task>
</tasks>
</project>

Rules:
- Every task is one concrete coding action, small enough to finish in under two days.
- Start each description with a verb (Create, Add, Implement, Write).
- depends=\"N\" or depends=\"N,M\" names earlier tasks by 1-based position; tasks \
without depends may run in parallel.
- Use <mode>sequential</mode> only when the tasks cannot safely run side by side."
    )
}

pub fn design_change(tasks: &[Task], new_goal: &str) -> String {
    let done = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let summary: String = tasks
        .iter()
        .map(|t| format!("- [{}] {}\n", t.status, truncate_chars(&t.description, 80)))
        .collect();
    format!(
        "The design has changed. Decide whether the existing completed work is \
still valid under the new design. PLAN.md at the project root holds the old plan.

Task summary ({done} done, {remaining} remaining):
{summary}
<design>
{new_goal}
</design>

If most completed work is still valid and only new tasks need to be added, \
output <keep/>.
If the change fundamentally alters what was built, output <replan/>.
Output only the tag.",
        remaining = tasks.len() - done,
    )
}

pub fn judge_task(task: &Task) -> String {
    format!(
        "A worker just completed this task:
  {}

Its output (truncated):
  {}

Read the files it claims to have created or modified and decide whether the \
task was actually completed.

Return ONLY:
<verdict>pass|fail</verdict>
<reason>one sentence; what is wrong if it failed</reason>",
        task.description,
        truncate_chars(&task.result, RESULT_CHARS),
    )
}

fn task_line(task: &Task) -> String {
    let mut line = format!("- [{}] {}", task.short_id(), task.description);
    if !task.summary.is_empty() {
        line.push_str(&format!(" => {}", task.summary));
    }
    line
}

fn failed_line(task: &Task) -> String {
    let mut line = format!(
        "- [{}] {} ({}",
        task.short_id(),
        task.description,
        task.status.as_str()
    );
    if !task.error.is_empty() {
        line.push_str(&format!(": {}", truncate_chars(&task.error, ERROR_CHARS)));
    }
    if !task.session_id.is_empty() {
        line.push_str(&format!(", session {}", task.session_id));
    }
    line.push(')');
    line
}

/// The most recent `limit` tasks, rendered one per line.
fn recent(tasks: &[Task], limit: usize, render: fn(&Task) -> String) -> String {
    if tasks.is_empty() {
        return "(none)".to_string();
    }
    let skip = tasks.len().saturating_sub(limit);
    tasks[skip..].iter().map(render).collect::<Vec<_>>().join("\n")
}

fn flagged(verdicts: &[TaskVerdict]) -> String {
    let notes: Vec<String> = verdicts
        .iter()
        .filter_map(|v| match &v.verdict {
            Verdict::Unsatisfied(note) => Some(format!("- {}: {note}", v.description)),
            Verdict::Satisfied | Verdict::Inconclusive(_) => None,
        })
        .collect();
    if notes.is_empty() {
        "(none)".to_string()
    } else {
        notes.join("\n")
    }
}

fn project_line(context: &CritiqueContext) -> &str {
    if context.project_context.is_empty() {
        "(not recorded)"
    } else {
        &context.project_context
    }
}

pub fn refiner(context: &CritiqueContext) -> String {
    format!(
        "Critique this project's progress. Be strict.

Project: {}

Completed tasks:
{}

Failed tasks:
{}

Flagged by the per-task judge:
{}

1. Are there obvious gaps (missing tests, broken integration)?
2. Do failed tasks need an alternative approach?
3. Is anything the judge flagged still incomplete?

If follow-up work is needed, output it:
<tasks>
<task>description of new follow-up work</task>
<task depends=\"1\">work that needs the previous task</task>
</tasks>

If nothing is missing, output an empty block:
<tasks>
</tasks>",
        project_line(context),
        recent(&context.completed, 10, task_line),
        recent(&context.failed, 5, failed_line),
        flagged(&context.verdicts),
    )
}

pub fn replanner(context: &CritiqueContext) -> String {
    format!(
        "Full project assessment. Compare the original goal against what was \
actually built.

Project: {}

Original goal:
{}

Completed:
{}

Failed:
{}

Read the actual codebase and compare it against the goal.

1. Add a ## assessment section to PROGRESS.md: how much of the goal is met, \
what is missing, quality notes. Also state the estimate as <percent>NN</percent>.
2. If work is missing, output new tasks; if the goal is met, output an empty block.

<tasks>
<task>specific missing work</task>
</tasks>",
        project_line(context),
        context.goal_text,
        recent(&context.completed, 40, task_line),
        recent(&context.failed, 20, failed_line),
    )
}

pub fn verifier(context: &CritiqueContext, count: usize) -> String {
    let issued = if context.issued_challenges.is_empty() {
        "(none)".to_string()
    } else {
        context
            .issued_challenges
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let open_failures = context.failed.len();
    format!(
        "You are an adversarial reviewer. The team claims this project is complete.

Project: {}

Goal:
{}

Completed work:
{}

Tasks that never succeeded: {open_failures}

Read the codebase and propose {count} concrete challenges that could expose a \
defect: edge cases, error paths, concurrency, missing validation, claims in the \
goal that nothing tests. Each challenge must be checkable by a single coding agent.

Do not repeat any of these earlier challenges:
{issued}

Return ONLY:
<challenges>
<challenge>one specific test case</challenge>
</challenges>",
        project_line(context),
        context.goal_text,
        recent(&context.completed, 40, task_line),
    )
}
