use crate::error::ErrorKind;
use crate::kernel::event::{ActionOutput, ActionStatus, ExecutionResult, ProgressEvent, TurnOutcome};
use crate::safety::gate::GateDecision;
use crate::services::package_manager::ChangeKind;

/// Listings longer than this are cut short.
const MAX_LISTED: usize = 10;

/// PURE FUNCTION: one line for one action result.
pub fn realize_result(result: &ExecutionResult) -> String {
    let what = describe(result);
    match result.status {
        ActionStatus::Success => match &result.preview {
            Some(preview) => format!("Dry run: {}.", preview),
            None => match (result.generation_before, result.generation_after) {
                (Some(before), Some(after)) if before != after => {
                    format!("Done: {} (generation {} -> {}).", what, before, after)
                }
                _ => format!("Done: {}.", what),
            },
        },
        ActionStatus::Failed => format!("Failed: {}: {}.", what, explain(result.error_kind.as_ref())),
        ActionStatus::RolledBack => format!(
            "Failed and rolled back: {}: {}. The system is back on generation {}.",
            what,
            explain(result.error_kind.as_ref()),
            result
                .generation_after
                .map(|g| g.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
        ActionStatus::SkippedDueToPriorFailure => match result.error_kind {
            Some(ErrorKind::CancellationRequested) => format!("Skipped (cancelled): {}.", what),
            _ => format!("Skipped after an earlier failure: {}.", what),
        },
    }
}

/// PURE FUNCTION: the lines a presentation layer shows for a finished turn.
pub fn realize_outcome(outcome: &TurnOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    match outcome.decision {
        GateDecision::Execute | GateDecision::DryRun => {}
        _ => lines.extend(outcome.preview_text.iter().cloned()),
    }
    for reason in &outcome.blocked_reasons {
        lines.push(format!("Not allowed: {}.", reason));
    }
    for result in &outcome.results {
        lines.push(realize_result(result));
        if let Some(output) = &result.output {
            lines.extend(realize_output(output));
        }
    }
    lines
}

pub fn realize_progress(event: &ProgressEvent) -> String {
    match event.percent {
        Some(p) => format!("[{}] {:>3.0}% {}", event.action_index + 1, p, event.message),
        None => format!("[{}] {}", event.action_index + 1, event.message),
    }
}

fn realize_output(output: &ActionOutput) -> Vec<String> {
    let mut lines: Vec<String> = match output {
        ActionOutput::Packages(packages) if packages.is_empty() => vec!["  No packages found.".to_string()],
        ActionOutput::Packages(packages) => packages
            .iter()
            .take(MAX_LISTED)
            .enumerate()
            .map(|(i, p)| format!("  {}. {} {} - {}", i + 1, p.name, p.version, p.description))
            .collect(),
        ActionOutput::Generations(generations) => generations
            .iter()
            .map(|g| {
                let marker = if g.current { " (current)" } else { "" };
                format!(
                    "  generation {}{}: {} [{}]",
                    g.id,
                    marker,
                    g.description,
                    g.created_at.format("%Y-%m-%d %H:%M")
                )
            })
            .collect(),
        ActionOutput::Installed(names) if names.is_empty() => vec!["  Nothing is installed.".to_string()],
        ActionOutput::Installed(names) => names
            .iter()
            .take(MAX_LISTED)
            .enumerate()
            .map(|(i, name)| format!("  {}. {}", i + 1, name))
            .collect(),
        ActionOutput::Changes(changes) if changes.is_empty() => vec!["  No package changes.".to_string()],
        ActionOutput::Changes(changes) => changes
            .iter()
            .map(|c| match c.change {
                ChangeKind::Added => format!("  + {} {}", c.package, c.to_version.as_deref().unwrap_or("")),
                ChangeKind::Removed => format!("  - {} {}", c.package, c.from_version.as_deref().unwrap_or("")),
                ChangeKind::Upgraded => format!(
                    "  ~ {} {} -> {}",
                    c.package,
                    c.from_version.as_deref().unwrap_or("?"),
                    c.to_version.as_deref().unwrap_or("?")
                ),
            })
            .collect(),
    };
    let listed = match output {
        ActionOutput::Packages(packages) => packages.len(),
        ActionOutput::Installed(names) => names.len(),
        _ => 0,
    };
    if listed > MAX_LISTED {
        lines.push(format!("  ... and {} more", listed - MAX_LISTED));
    }
    lines
}

fn describe(result: &ExecutionResult) -> String {
    let mut args: Vec<String> = result.args.values().cloned().collect();
    args.retain(|a| !a.is_empty());
    if args.is_empty() {
        result.op.to_string().replace('_', " ")
    } else {
        format!("{} {}", result.op.to_string().replace('_', " "), args.join(" "))
    }
}

fn explain(kind: Option<&ErrorKind>) -> String {
    match kind {
        Some(ErrorKind::CapabilityError(cause)) => cause.clone(),
        Some(ErrorKind::Timeout) => "timed out".to_string(),
        Some(ErrorKind::CancellationRequested) => "cancelled".to_string(),
        Some(ErrorKind::PolicyBlocked) => "blocked by policy".to_string(),
        Some(ErrorKind::AmbiguousReference) => "ambiguous reference".to_string(),
        Some(ErrorKind::ParseFailure) => "not understood".to_string(),
        None => "unknown error".to_string(),
    }
}
