//! Turns decoded backend responses into chat bubbles.
//!
//! Backend strings are never trusted: every cell and text block passes
//! through [`sanitize_line`] so control sequences cannot reach the terminal.

use serde_json::{Map, Value};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::plan::{Candidate, ParamSpec, Parameters, PlanResponse, Score, StepPlan};

pub const PLACEHOLDER: &str = "—";

const CANDIDATE_HEADER: [&str; 5] = ["Name", "API Name", "Description", "Score", "Parameters"];
const STEP_HEADER: [&str; 5] = ["#", "Name", "API Name", "Tool ID", "Arguments"];
const COLUMN_SEPARATOR: &str = " │ ";
const MIN_COLUMN_WIDTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum BubbleBody {
    Text(String),
    Table(TableView),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub caption: Option<String>,
}

/// One laid-out line of a table, tagged so callers can style it.
#[derive(Debug, Clone, PartialEq)]
pub enum TableLine {
    Title(String),
    Header(String),
    Rule(String),
    Row(String),
    Caption(String),
}

pub fn render_response(response: &PlanResponse) -> Vec<BubbleBody> {
    match response {
        PlanResponse::CandidateList(candidates) => {
            vec![BubbleBody::Table(candidates_table(candidates))]
        }
        PlanResponse::StepPlan(plan) => vec![BubbleBody::Table(steps_table(plan))],
        PlanResponse::CandidatesWithPlan { candidates, plan } => vec![
            BubbleBody::Table(candidates_table(candidates)),
            BubbleBody::Table(steps_table(plan)),
        ],
        PlanResponse::RawText(text) => vec![BubbleBody::Text(sanitize_block(text))],
        PlanResponse::RawJson(value) => vec![BubbleBody::Text(sanitize_block(&pretty_json(value)))],
    }
}

fn candidates_table(candidates: &[Candidate]) -> TableView {
    let rows = candidates
        .iter()
        .map(|candidate| {
            vec![
                sanitize_cell(&candidate.name),
                sanitize_cell(&candidate.api_name),
                sanitize_cell(&candidate.description),
                sanitize_cell(&format_score(&candidate.score)),
                sanitize_cell(&parameter_text(&candidate.parameters)),
            ]
        })
        .collect();

    TableView {
        title: "Candidates".to_string(),
        header: CANDIDATE_HEADER.iter().map(|h| h.to_string()).collect(),
        rows,
        caption: None,
    }
}

fn steps_table(plan: &StepPlan) -> TableView {
    let rows = plan
        .steps
        .iter()
        .enumerate()
        .map(|(idx, step)| {
            vec![
                (idx + 1).to_string(),
                sanitize_cell(&step.name),
                sanitize_cell(&step.api_name),
                sanitize_cell(&step.tool_id),
                sanitize_cell(&argument_text(&step.arguments)),
            ]
        })
        .collect();

    let caption = [plan.strategy.as_deref(), plan.notes.as_deref()]
        .into_iter()
        .flatten()
        .map(sanitize_cell)
        .collect::<Vec<_>>()
        .join(" · ");

    TableView {
        title: "Plan".to_string(),
        header: STEP_HEADER.iter().map(|h| h.to_string()).collect(),
        rows,
        caption: (!caption.is_empty()).then_some(caption),
    }
}

pub fn format_score(score: &Score) -> String {
    match score {
        Score::Number(value) => format!("{:.4}", value),
        Score::Text(text) => text.clone(),
        Score::Missing => PLACEHOLDER.to_string(),
    }
}

fn parameter_text(parameters: &Parameters) -> String {
    let mut parts = Vec::new();
    if !parameters.required.is_empty() {
        parts.push(format!("required: {}", param_names(&parameters.required)));
    }
    if !parameters.optional.is_empty() {
        parts.push(format!("optional: {}", param_names(&parameters.optional)));
    }

    if parts.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        parts.join(" | ")
    }
}

fn param_names(specs: &[ParamSpec]) -> String {
    specs
        .iter()
        .map(|spec| spec.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn argument_text(arguments: &Map<String, Value>) -> String {
    if arguments.is_empty() {
        return PLACEHOLDER.to_string();
    }

    arguments
        .iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{}: {}", key, text),
            other => format!("{}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Two-space indented JSON, or the compact form if pretty printing fails.
pub fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Replace control characters so backend text cannot drive the terminal.
pub fn sanitize_line(text: &str) -> String {
    let mut clean = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\t' => clean.push_str("    "),
            c if c.is_control() => clean.push(char::REPLACEMENT_CHARACTER),
            c => clean.push(c),
        }
    }
    clean
}

/// Like [`sanitize_line`] but keeps line breaks.
pub fn sanitize_block(text: &str) -> String {
    text.lines().map(sanitize_line).collect::<Vec<_>>().join("\n")
}

fn sanitize_cell(text: &str) -> String {
    sanitize_line(&text.lines().collect::<Vec<_>>().join(" "))
}

/// Lay a table out as aligned text no wider than `max_width` columns.
/// Cells that do not fit are cut with an ellipsis.
pub fn table_lines(table: &TableView, max_width: usize) -> Vec<TableLine> {
    let column_count = table.header.len();
    let mut widths: Vec<usize> = table.header.iter().map(|h| char_width(h)).collect();
    for row in &table.rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(char_width(cell));
        }
    }

    let separators = COLUMN_SEPARATOR.chars().count() * column_count.saturating_sub(1);
    let available = max_width.saturating_sub(separators);
    while widths.iter().sum::<usize>() > available {
        let Some(widest) = widths.iter_mut().filter(|w| **w > MIN_COLUMN_WIDTH).max() else {
            break;
        };
        *widest -= 1;
    }

    let mut lines = vec![TableLine::Title(fit(&table.title, max_width))];
    lines.push(TableLine::Header(join_cells(&table.header, &widths)));
    lines.push(TableLine::Rule(
        widths
            .iter()
            .map(|w| "─".repeat(*w))
            .collect::<Vec<_>>()
            .join("─┼─"),
    ));
    for row in &table.rows {
        lines.push(TableLine::Row(join_cells(row, &widths)));
    }
    if let Some(caption) = &table.caption {
        lines.push(TableLine::Caption(fit(caption, max_width)));
    }
    lines
}

fn join_cells(cells: &[String], widths: &[usize]) -> String {
    widths
        .iter()
        .enumerate()
        .map(|(idx, width)| {
            let cell = cells.get(idx).map(String::as_str).unwrap_or_default();
            let fitted = fit(cell, *width);
            let padding = width.saturating_sub(char_width(&fitted));
            format!("{}{}", fitted, " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join(COLUMN_SEPARATOR)
        .trim_end()
        .to_string()
}

fn fit(text: &str, width: usize) -> String {
    if char_width(text) <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut cut = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width - 1 {
            break;
        }
        used += w;
        cut.push(c);
    }
    cut.push('…');
    cut
}

/// Terminal columns, so wide CJK and emoji cells keep the table aligned.
pub fn char_width(text: &str) -> usize {
    text.width()
}
