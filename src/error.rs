//! Error types for template compilation and execution.
//!
//! Compilation problems surface as a [`TemplateError`] wrapping a [`ParseErrorKind`], so
//! callers can match on the category while still getting a readable message. Runtime
//! `Error` actions surface as a [`RunError`] carrying the full match context.

use thiserror::Error;

/// A template failed to parse or compile.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct TemplateError {
    /// The kind of failure, with its context baked in.
    pub kind: ParseErrorKind,
}

impl TemplateError {
    pub(crate) fn new(kind: ParseErrorKind) -> Self {
        Self { kind }
    }
}

impl From<ParseErrorKind> for TemplateError {
    fn from(kind: ParseErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Categorized compilation failures.
#[derive(Debug, Error)]
pub enum ParseErrorKind {
    /// The template declares no values.
    #[error("template does not define any values")]
    NoValues,

    /// A value name failed validation.
    #[error("invalid value name '{0}'")]
    InvalidValueName(String),

    /// A value name collides with a flag keyword.
    #[error("'{0}' is a reserved word and cannot be used as a value name")]
    ReservedValueName(String),

    /// The same value name was declared twice.
    #[error("value '{0}' is defined more than once")]
    DuplicateValueName(String),

    /// A value pattern did not compile as a regular expression.
    #[error("value '{name}' has an invalid pattern: {reason}")]
    InvalidValuePattern {
        /// The value whose pattern failed.
        name: String,
        /// The regex engine's diagnostic.
        reason: String,
    },

    /// A `Metadata` value named an unknown metadata kind.
    #[error("value '{name}' references unknown metadata type '{kind}'")]
    InvalidMetadataType {
        /// The metadata value.
        name: String,
        /// The unrecognized kind text.
        kind: String,
    },

    /// The template declares no states.
    #[error("template does not define any states")]
    NoStates,

    /// The template has no `Start` state.
    #[error("template does not define a Start state")]
    NoStartState,

    /// A state name failed validation.
    #[error("invalid state name '{0}'")]
    InvalidStateName(String),

    /// The same state name was declared twice.
    #[error("state '{0}' is defined more than once")]
    DuplicateState(String),

    /// A state that must stay empty (`End`, `EOF`) declared rules.
    #[error("state '{0}' must not define any rules")]
    StateMustBeEmpty(String),

    /// A state filter appeared on a rule outside `~Global`.
    #[error("state '{state}' uses a state filter, but filters are only valid in ~Global")]
    StateFilterOutsideGlobal {
        /// The offending state.
        state: String,
    },

    /// A rule action could not be interpreted.
    #[error("unsupported action at line {line}: '{text}'")]
    UnsupportedAction {
        /// 1-based template line number.
        line: u64,
        /// The offending template line.
        text: String,
    },

    /// A transition names a state the template never declares.
    #[error("state '{state}' transitions to undefined state '{target}'")]
    UndefinedState {
        /// The state owning the rule.
        state: String,
        /// The missing transition target.
        target: String,
    },

    /// A transition targets the `~Global` pseudo-state.
    #[error("state '{state}' transitions to ~Global, which cannot be a target")]
    GlobalTransitionTarget {
        /// The state owning the rule.
        state: String,
    },

    /// A state filter entry names a state the template never declares.
    #[error("state filter references undefined state '{filter}'")]
    UndefinedFilterState {
        /// The missing filter entry.
        filter: String,
    },

    /// A state filter lists the same state twice.
    #[error("state filter references state '{filter}' more than once")]
    DuplicateFilterState {
        /// The repeated filter entry.
        filter: String,
    },

    /// A pattern placeholder references a value the template never declares.
    #[error("reference to undeclared value '{0}'")]
    UndeclaredValue(String),

    /// An expanded rule pattern did not compile as a regular expression.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The raw (unexpanded) pattern text.
        pattern: String,
        /// The regex engine's diagnostic.
        reason: String,
    },

    /// A template line matched no part of the grammar.
    #[error("template syntax error at line {line}: '{text}'")]
    SyntaxError {
        /// 1-based template line number.
        line: u64,
        /// The offending template line.
        text: String,
    },

    /// The state graph can loop without consuming input.
    #[error("state loop detected between states '{path}' from state '{state}' on rule '{rule}'")]
    StateLoop {
        /// The looping state sequence, rendered as `A > B > A`.
        path: String,
        /// The state owning the looping rule.
        state: String,
        /// The rule that closes the loop.
        rule: String,
    },
}

/// An `Error` rule action fired while running a template over input text.
#[derive(Debug, Clone, Error)]
#[error("error action{} in state '{state}' at line {line}: '{text}'", .message.as_ref().map(|m| format!(" '{m}'")).unwrap_or_default())]
pub struct RunError {
    /// The optional message attached to the `Error` action.
    pub message: Option<String>,
    /// The state that was active when the action fired.
    pub state: String,
    /// The rule pattern that matched.
    pub rule: String,
    /// 1-based input line number.
    pub line: u64,
    /// The input line that triggered the action.
    pub text: String,
}
