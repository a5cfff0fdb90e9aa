//! Query string ⇄ structure conversion

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{ComparisonOp, LogicalOp, QueryCondition, QueryGroup};

fn compile_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid regex literal {pattern}: {err}"))
}

static GROUP_REGEX: Lazy<Regex> = Lazy::new(|| compile_regex(r"\(([^()]*)\)"));
static TRAILING_OP_REGEX: Lazy<Regex> = Lazy::new(|| compile_regex(r"\b(AND|OR)\s*$"));
pub(super) static JOIN_OP_REGEX: Lazy<Regex> = Lazy::new(|| compile_regex(r"\b(AND|OR)\b"));
// Two-character operators must be tried before their one-character prefixes
static CONDITION_REGEX: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"^([A-Za-z0-9_]+)\s*(>=|<=|!=|=|>|<)\s*(.+)$"));

/// Render groups as query text
///
/// Groups are joined by a single space, each prefixed by its operator unless
/// it is the first; conditions inside a group follow the same rule.
pub fn serialize(groups: &[QueryGroup]) -> String {
    groups
        .iter()
        .enumerate()
        .map(|(gi, group)| {
            let body = group
                .conditions
                .iter()
                .enumerate()
                .map(|(ci, cond)| match (ci, cond.logical_op) {
                    (ci, Some(op)) if ci > 0 => {
                        format!("{} {} {} {}", op, cond.field, cond.operator, cond.value)
                    }
                    _ => format!("{} {} {}", cond.field, cond.operator, cond.value),
                })
                .collect::<Vec<_>>()
                .join(" ");
            match group.group_logical_op {
                Some(op) if gi > 0 => format!("{} ({})", op, body),
                _ => format!("({})", body),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// What was wrong with a dropped fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Text inside a group that is not `<field> <op> <value>`
    UnparsedCondition,
    /// `AND`/`OR` with nothing to join (leading, trailing or doubled)
    DanglingOperator,
    /// Group after the first with no operator before it
    MissingGroupOperator,
    /// Text outside any group
    StrayText,
}

/// A fragment of query text that did not make it into the structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDiagnostic {
    pub kind: DiagnosticKind,
    /// Index of the group the fragment belongs to, if inside one
    pub group: Option<usize>,
    pub fragment: String,
}

impl std::fmt::Display for QueryDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            DiagnosticKind::UnparsedCondition => "unparsed condition",
            DiagnosticKind::DanglingOperator => "dangling operator",
            DiagnosticKind::MissingGroupOperator => "missing group operator",
            DiagnosticKind::StrayText => "stray text",
        };
        match self.group {
            Some(group) => write!(f, "{} in group {}: {:?}", what, group, self.fragment),
            None => write!(f, "{}: {:?}", what, self.fragment),
        }
    }
}

/// Parse result: everything recognized plus what was dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub groups: Vec<QueryGroup>,
    pub diagnostics: Vec<QueryDiagnostic>,
}

impl ParsedQuery {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Parse query text, recording every fragment that had to be dropped
pub fn parse(text: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut last_end = 0;

    for (gi, caps) in GROUP_REGEX.captures_iter(text).enumerate() {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let group_logical_op = group_op_before(&text[last_end..whole.start()], gi, &mut parsed.diagnostics);
        let conditions = parse_conditions(inner.as_str(), gi, &mut parsed.diagnostics);
        parsed.groups.push(QueryGroup {
            conditions,
            group_logical_op,
        });
        last_end = whole.end();
    }

    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        parsed.diagnostics.push(QueryDiagnostic {
            kind: DiagnosticKind::StrayText,
            group: None,
            fragment: tail.to_string(),
        });
    }

    if !parsed.diagnostics.is_empty() {
        warn!(
            query = %text,
            dropped = parsed.diagnostics.len(),
            "Query text contained fragments that were dropped"
        );
        for diagnostic in &parsed.diagnostics {
            debug!(%diagnostic, "Query diagnostic");
        }
    }

    parsed
}

/// Parse query text, discarding diagnostics
pub fn parse_groups(text: &str) -> Vec<QueryGroup> {
    parse(text).groups
}

fn group_op_before(between: &str, gi: usize, diagnostics: &mut Vec<QueryDiagnostic>) -> Option<LogicalOp> {
    let between = between.trim();
    let (op, rest) = match TRAILING_OP_REGEX.captures(between) {
        Some(caps) => {
            let op = caps.get(1).and_then(|m| LogicalOp::from_keyword(m.as_str()));
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            (op, between[..start].trim())
        }
        None => (None, between),
    };

    if !rest.is_empty() {
        diagnostics.push(QueryDiagnostic {
            kind: DiagnosticKind::StrayText,
            group: None,
            fragment: rest.to_string(),
        });
    }

    match (gi, op) {
        (0, Some(op)) => {
            diagnostics.push(QueryDiagnostic {
                kind: DiagnosticKind::DanglingOperator,
                group: Some(0),
                fragment: op.to_string(),
            });
            None
        }
        (0, None) => None,
        (_, None) => {
            diagnostics.push(QueryDiagnostic {
                kind: DiagnosticKind::MissingGroupOperator,
                group: Some(gi),
                fragment: between.to_string(),
            });
            None
        }
        (_, op) => op,
    }
}

enum Token<'a> {
    Op(LogicalOp),
    Text(&'a str),
}

fn tokenize(content: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    for m in JOIN_OP_REGEX.find_iter(content) {
        tokens.push(Token::Text(&content[pos..m.start()]));
        if let Some(op) = LogicalOp::from_keyword(m.as_str()) {
            tokens.push(Token::Op(op));
        }
        pos = m.end();
    }
    tokens.push(Token::Text(&content[pos..]));

    tokens
        .into_iter()
        .filter_map(|token| match token {
            Token::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then_some(Token::Text(s))
            }
            op => Some(op),
        })
        .collect()
}

fn parse_conditions(content: &str, gi: usize, diagnostics: &mut Vec<QueryDiagnostic>) -> Vec<QueryCondition> {
    let mut conditions: Vec<QueryCondition> = Vec::new();
    let mut pending: Option<LogicalOp> = None;
    let mut dropped_before = false;

    let dangling = |op: LogicalOp, diagnostics: &mut Vec<QueryDiagnostic>| {
        diagnostics.push(QueryDiagnostic {
            kind: DiagnosticKind::DanglingOperator,
            group: Some(gi),
            fragment: op.to_string(),
        });
    };

    for token in tokenize(content) {
        match token {
            Token::Op(op) => {
                if let Some(previous) = pending.replace(op) {
                    dangling(previous, diagnostics);
                }
            }
            Token::Text(part) => match parse_condition(part) {
                Some(mut cond) => {
                    let op = pending.take();
                    if conditions.is_empty() {
                        if let (Some(op), false) = (op, dropped_before) {
                            dangling(op, diagnostics);
                        }
                    } else {
                        cond.logical_op = op;
                    }
                    conditions.push(cond);
                }
                None => {
                    diagnostics.push(QueryDiagnostic {
                        kind: DiagnosticKind::UnparsedCondition,
                        group: Some(gi),
                        fragment: part.to_string(),
                    });
                    // The operator joined the dropped fragment
                    pending = None;
                    dropped_before = true;
                }
            },
        }
    }

    if let Some(op) = pending {
        dangling(op, diagnostics);
    }
    conditions
}

fn parse_condition(part: &str) -> Option<QueryCondition> {
    let caps = CONDITION_REGEX.captures(part)?;
    let field = caps.get(1)?.as_str();
    let operator = ComparisonOp::from_symbol(caps.get(2)?.as_str())?;
    let value = caps.get(3)?.as_str().trim();
    Some(QueryCondition::new(field, operator, value))
}
