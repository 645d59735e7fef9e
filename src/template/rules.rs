//! Compiled rules and state filters.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;

use super::states::TemplateState;
use super::values::{ValueId, ValueSet};
use super::StateId;
use crate::definition::{ActionDefinition, FilterDefinition, RuleDefinition};
use crate::error::ParseErrorKind;

/// Whether a matching rule consumes the input line or keeps scanning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineAction {
    /// Move on to the next input line.
    #[default]
    Next,
    /// Re-evaluate the same line against the remaining rules.
    Continue,
}

impl fmt::Display for LineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineAction::Next => f.write_str("Next"),
            LineAction::Continue => f.write_str("Continue"),
        }
    }
}

/// What a matching rule does to the row being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordAction {
    /// Leave the current row as is.
    #[default]
    NoRecord,
    /// Emit the current row and reset it.
    Record,
    /// Reset the current row, keeping filldown carryover.
    Clear,
    /// Reset the current row and the filldown carryover.
    ClearAll,
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordAction::NoRecord => f.write_str("NoRecord"),
            RecordAction::Record => f.write_str("Record"),
            RecordAction::Clear => f.write_str("Clear"),
            RecordAction::ClearAll => f.write_str("Clearall"),
        }
    }
}

/// A compiled error or state-change action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RuleAction {
    Error(Option<String>),
    ChangeState(StateId),
}

/// A compiled state filter.
///
/// `states` keeps the literal filter for rendering; `effective` is the resolved set of states
/// the rule overlays, with inversion already applied. An unfiltered rule overlays every user
/// state.
#[derive(Debug, Clone)]
pub(crate) struct StateFilter {
    pub(crate) states: Option<Vec<StateId>>,
    pub(crate) invert: bool,
    pub(crate) effective: HashSet<StateId>,
}

impl StateFilter {
    pub(crate) fn new(states: Option<Vec<StateId>>, invert: bool, user_states: &HashSet<StateId>) -> Self {
        let effective = match (&states, invert) {
            (None, _) => user_states.clone(),
            (Some(listed), false) => listed.iter().copied().collect(),
            (Some(listed), true) => {
                let listed: HashSet<StateId> = listed.iter().copied().collect();
                user_states.difference(&listed).copied().collect()
            }
        };

        Self { states, invert, effective }
    }

    pub(crate) fn applies_to(&self, state: StateId) -> bool {
        self.effective.contains(&state)
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    /// The state the rule was declared in.
    pub(crate) state: StateId,
    /// The raw pattern text, placeholders intact.
    pub(crate) pattern: String,
    pub(crate) regex: Regex,
    /// Capture group index paired with the value it feeds, per placeholder occurrence.
    pub(crate) captures: Vec<(usize, ValueId)>,
    pub(crate) line_action: LineAction,
    pub(crate) record_action: RecordAction,
    pub(crate) action: Option<RuleAction>,
    pub(crate) filter: StateFilter,
}

impl Rule {
    pub(crate) fn compile(
        state: StateId,
        def: &RuleDefinition,
        filter: StateFilter,
        action: Option<RuleAction>,
        values: &ValueSet,
    ) -> Result<Rule, ParseErrorKind> {
        // programmatic definitions may omit the anchor; the grammar always requires it
        let pattern = if def.pattern.starts_with('^') {
            def.pattern.clone()
        } else {
            format!("^{}", def.pattern)
        };

        let (expanded, groups) = values.expand_rule_pattern(&pattern)?;

        let regex = Regex::new(&expanded).map_err(|err| ParseErrorKind::InvalidPattern {
            pattern: pattern.clone(),
            reason: err.to_string(),
        })?;

        let mut captures = Vec::with_capacity(groups.len());
        for (group, value) in groups {
            // expand_rule_pattern synthesized the group, so it is present by construction
            if let Some(index) = regex.capture_names().position(|name| name.as_deref() == Some(group.as_str())) {
                captures.push((index, value));
            }
        }

        Ok(Rule {
            state,
            pattern,
            regex,
            captures,
            line_action: def.line_action,
            record_action: def.record_action,
            action,
            filter,
        })
    }

    /// Renders the rule back to template text, matching the grammar it was parsed from.
    /// The filter line is omitted when the filter covers every user state anyway.
    pub(crate) fn render(&self, states: &[TemplateState], user_states: &HashSet<StateId>) -> String {
        let mut out = String::new();

        if self.filter.effective != *user_states {
            out.push_str(" [");
            if self.filter.invert {
                out.push('^');
            }
            if let Some(listed) = &self.filter.states {
                let mut names: Vec<&str> = listed.iter().map(|&id| states[id].name.as_str()).collect();
                names.sort_unstable();
                out.push_str(&names.join(","));
            }
            out.push_str("]\n");
        }

        out.push(' ');
        out.push_str(&self.pattern);

        if let Some(RuleAction::Error(message)) = &self.action {
            match message {
                None => out.push_str(" -> Error"),
                Some(message) if !message.is_empty() && message.chars().all(|c| c.is_ascii_alphanumeric()) => {
                    out.push_str(&format!(" -> Error {message}"));
                }
                Some(message) => out.push_str(&format!(" -> Error \"{message}\"")),
            }
            return out;
        }

        match (self.line_action, self.record_action) {
            (LineAction::Next, RecordAction::NoRecord) => {}
            (LineAction::Next, record) => out.push_str(&format!(" -> {record}")),
            (line, RecordAction::NoRecord) => out.push_str(&format!(" -> {line}")),
            (line, record) => out.push_str(&format!(" -> {line}.{record}")),
        }

        if let Some(RuleAction::ChangeState(target)) = &self.action {
            let name = &states[*target].name;
            if self.line_action == LineAction::Next && self.record_action == RecordAction::NoRecord {
                out.push_str(&format!(" -> {name}"));
            } else {
                out.push_str(&format!(" {name}"));
            }
        }

        out
    }
}

pub(crate) fn compile_action(
    state_name: &str,
    def: &ActionDefinition,
    by_name: &std::collections::HashMap<String, StateId>,
) -> Result<RuleAction, ParseErrorKind> {
    match def {
        ActionDefinition::Error(message) => Ok(RuleAction::Error(message.clone())),
        ActionDefinition::ChangeState(target) if target == "~Global" => {
            Err(ParseErrorKind::GlobalTransitionTarget { state: state_name.to_string() })
        }
        ActionDefinition::ChangeState(target) => match by_name.get(target) {
            Some(&id) => Ok(RuleAction::ChangeState(id)),
            None => Err(ParseErrorKind::UndefinedState { state: state_name.to_string(), target: target.clone() }),
        },
    }
}

pub(crate) fn compile_filter(
    filter: Option<&FilterDefinition>,
    by_name: &std::collections::HashMap<String, StateId>,
    user_states: &HashSet<StateId>,
) -> Result<StateFilter, ParseErrorKind> {
    let Some(filter) = filter else {
        return Ok(StateFilter::new(None, false, user_states));
    };

    let mut listed = Vec::with_capacity(filter.states.len());
    for name in &filter.states {
        let &id = by_name.get(name).ok_or_else(|| ParseErrorKind::UndefinedFilterState { filter: name.clone() })?;
        if listed.contains(&id) {
            return Err(ParseErrorKind::DuplicateFilterState { filter: name.clone() });
        }
        listed.push(id);
    }

    Ok(StateFilter::new(Some(listed), filter.invert, user_states))
}
