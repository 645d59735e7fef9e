//! Run tracing.
//!
//! [`Template::explain`](crate::Template::explain) records what the state machine did with
//! every input line: which rules were tried, which matched, which global rules were filtered
//! out of the active state, state changes, and the row each `Record` action emitted. The
//! trace is the debugging surface for templates that extract the wrong thing.

use std::fmt;
use std::time::Duration;

use crate::error::RunError;
use crate::rows::Row;

/// How a rule attempt against an input line turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The rule pattern matched the line.
    Matched,
    /// The rule pattern did not match the line.
    NotMatched,
    /// A global rule whose state filter excludes the active state; never tried.
    Filtered,
    /// The rule matched and carried an `Error` action, aborting the run.
    Error,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Disposition::Matched => "matched",
            Disposition::NotMatched => "not matched",
            Disposition::Filtered => "filtered",
            Disposition::Error => "error",
        })
    }
}

/// One rule attempt.
#[derive(Debug, Clone)]
pub struct RuleTrace {
    /// Name of the state the rule ran under.
    pub state: String,
    /// The rule, rendered in template syntax.
    pub rule: String,
    /// 1-based input line number.
    pub line: u64,
    /// The input line, absent once input is exhausted.
    pub text: Option<String>,
    pub disposition: Disposition,
    /// The row emitted by this match, when its record action produced one.
    pub row: Option<Row>,
    /// Time spent evaluating the rule pattern.
    pub elapsed: Duration,
}

/// One step of a traced run.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// The machine moved between states, including into the synthetic end state.
    StateChange { from: String, to: String, line: u64 },
    /// A new input line was read.
    LineRead { line: u64, text: Option<String> },
    /// A rule was attempted.
    Rule(RuleTrace),
}

/// A complete traced run.
#[derive(Debug, Clone, Default)]
pub struct Explanation {
    pub events: Vec<TraceEvent>,
    /// The rows the run produced, in emission order.
    pub rows: Vec<Row>,
    /// Set when the run aborted on an `Error` action.
    pub error: Option<RunError>,
}

impl Explanation {
    /// The rule attempts in order, skipping the other event kinds.
    pub fn rule_traces(&self) -> impl Iterator<Item = &RuleTrace> {
        self.events.iter().filter_map(|event| match event {
            TraceEvent::Rule(trace) => Some(trace),
            _ => None,
        })
    }

    /// The rule attempts that matched, in order.
    pub fn matches(&self) -> impl Iterator<Item = &RuleTrace> {
        self.rule_traces()
            .filter(|trace| matches!(trace.disposition, Disposition::Matched | Disposition::Error))
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.events {
            match event {
                TraceEvent::StateChange { from, to, line } => {
                    writeln!(f, "line {line}: state {from} -> {to}")?;
                }
                TraceEvent::LineRead { line, text } => match text {
                    Some(text) => writeln!(f, "line {line}: read '{text}'")?,
                    None => writeln!(f, "line {line}: end of input")?,
                },
                TraceEvent::Rule(trace) => {
                    writeln!(f, "line {}: [{}] {} '{}'", trace.line, trace.state, trace.disposition, trace.rule)?;
                    if let Some(row) = &trace.row {
                        write!(f, "line {}: recorded {{", trace.line)?;
                        for (index, (name, value)) in row.iter().enumerate() {
                            if index > 0 {
                                write!(f, ", ")?;
                            }
                            match value {
                                Some(crate::rows::Value::Text(text)) => write!(f, "{name}: '{text}'")?,
                                Some(crate::rows::Value::List(items)) => write!(f, "{name}: {items:?}")?,
                                None => write!(f, "{name}: null")?,
                            }
                        }
                        writeln!(f, "}}")?;
                    }
                }
            }
        }
        if let Some(error) = &self.error {
            writeln!(f, "aborted: {error}")?;
        }
        Ok(())
    }
}
