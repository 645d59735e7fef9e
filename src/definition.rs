//! Structural template model.
//!
//! A [`TemplateDefinition`] is the parsed-but-uncompiled form of a template: values, states,
//! and rules as plain data. Templates can be built from one directly, which is how generated
//! or programmatic templates skip the text grammar. `Display` renders the definition back to
//! template text, which also serves as the cache key for definition-built templates.

use std::fmt;

use crate::template::{LineAction, RecordAction, ValueFlags};

/// A single `Value` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDefinition {
    /// The value name.
    pub name: String,
    /// The declared flags.
    pub flags: ValueFlags,
    /// The raw pattern text, before expansion.
    pub pattern: String,
}

impl ValueDefinition {
    pub fn new(name: impl Into<String>, flags: ValueFlags, pattern: impl Into<String>) -> Self {
        Self { name: name.into(), flags, pattern: pattern.into() }
    }
}

impl fmt::Display for ValueDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.is_empty() {
            write!(f, "Value {} ({})", self.name, self.pattern)
        } else {
            write!(f, "Value {} {} ({})", self.flags, self.name, self.pattern)
        }
    }
}

/// The action a rule takes when its pattern matches, beyond line/record handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDefinition {
    /// Abort the run, optionally with a message.
    Error(Option<String>),
    /// Switch to the named state. `End` and `EOF` are valid targets.
    ChangeState(String),
}

/// A state filter restricting which states a `~Global` rule overlays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDefinition {
    /// The listed state names.
    pub states: Vec<String>,
    /// When set, the rule applies to every state except the listed ones.
    pub invert: bool,
}

/// A single rule within a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefinition {
    /// The match pattern, including its leading `^` anchor.
    pub pattern: String,
    /// Whether a match consumes the line or keeps scanning it.
    pub line_action: LineAction,
    /// What a match does to the current row.
    pub record_action: RecordAction,
    /// Optional error or state-change action.
    pub action: Option<ActionDefinition>,
    /// Optional state filter, only valid on `~Global` rules.
    pub filter: Option<FilterDefinition>,
}

impl RuleDefinition {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            line_action: LineAction::Next,
            record_action: RecordAction::NoRecord,
            action: None,
            filter: None,
        }
    }

    pub fn line_action(mut self, line_action: LineAction) -> Self {
        self.line_action = line_action;
        self
    }

    pub fn record_action(mut self, record_action: RecordAction) -> Self {
        self.record_action = record_action;
        self
    }

    pub fn action(mut self, action: ActionDefinition) -> Self {
        self.action = Some(action);
        self
    }

    pub fn filter(mut self, states: Vec<String>, invert: bool) -> Self {
        self.filter = Some(FilterDefinition { states, invert });
        self
    }
}

impl fmt::Display for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(filter) = &self.filter {
            f.write_str(" [")?;
            if filter.invert {
                f.write_str("^")?;
            }
            f.write_str(&filter.states.join(","))?;
            f.write_str("]\n")?;
        }

        write!(f, " {}", self.pattern)?;

        if let Some(ActionDefinition::Error(message)) = &self.action {
            return match message {
                None => f.write_str(" -> Error"),
                Some(message) if message.chars().all(|c| c.is_ascii_alphanumeric()) && !message.is_empty() => {
                    write!(f, " -> Error {message}")
                }
                Some(message) => write!(f, " -> Error \"{message}\""),
            };
        }

        match (self.line_action, self.record_action) {
            (LineAction::Next, RecordAction::NoRecord) => {}
            (LineAction::Next, record) => write!(f, " -> {record}")?,
            (line, RecordAction::NoRecord) => write!(f, " -> {line}")?,
            (line, record) => write!(f, " -> {line}.{record}")?,
        }

        if let Some(ActionDefinition::ChangeState(target)) = &self.action {
            if self.line_action == LineAction::Next && self.record_action == RecordAction::NoRecord {
                write!(f, " -> {target}")?;
            } else {
                write!(f, " {target}")?;
            }
        }

        Ok(())
    }
}

/// A named state and its ordered rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDefinition {
    /// The state name, e.g. `Start` or `~Global`.
    pub name: String,
    /// The rules, in declaration order.
    pub rules: Vec<RuleDefinition>,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>, rules: Vec<RuleDefinition>) -> Self {
        Self { name: name.into(), rules }
    }
}

/// A complete template in structural form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDefinition {
    /// The value declarations, in order.
    pub values: Vec<ValueDefinition>,
    /// The states, in order.
    pub states: Vec<StateDefinition>,
}

impl TemplateDefinition {
    pub fn new(values: Vec<ValueDefinition>, states: Vec<StateDefinition>) -> Self {
        Self { values, states }
    }
}

impl fmt::Display for TemplateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in &self.values {
            writeln!(f, "{value}")?;
        }

        for (index, state) in self.states.iter().enumerate() {
            if index > 0 || !self.values.is_empty() {
                writeln!(f)?;
            }
            writeln!(f, "{}", state.name)?;
            for rule in &state.rules {
                writeln!(f, "{rule}")?;
            }
        }

        Ok(())
    }
}
