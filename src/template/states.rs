//! Template states and their effective rule lists.

use super::{RuleId, StateId};
use crate::template::rules::Rule;

/// A compiled state.
///
/// `own` holds the rules declared in the state itself. `effective` is the list the engine
/// scans: applicable `~Global` rules first, then the state's own rules. `filtered` keeps the
/// `~Global` rules whose state filter excludes this state, for the explain trace.
#[derive(Debug, Clone)]
pub(crate) struct TemplateState {
    pub(crate) name: String,
    pub(crate) own: Vec<RuleId>,
    pub(crate) effective: Vec<RuleId>,
    pub(crate) filtered: Vec<RuleId>,
}

impl TemplateState {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), own: Vec::new(), effective: Vec::new(), filtered: Vec::new() }
    }

    /// The position of the state's first own rule within `effective`. After a state change the
    /// rule cursor starts here, so `~Global` rules are not re-run mid-line.
    pub(crate) fn own_offset(&self) -> usize {
        self.effective.len() - self.own.len()
    }
}

/// Fills in `effective` and `filtered` for every state once all rules exist.
///
/// `End` never evaluates rules. `EOF` and `~Global` use only their own rules. Every other
/// state is overlaid with the `~Global` rules whose filter covers it.
pub(crate) fn link_effective_rules(states: &mut [TemplateState], rules: &[Rule], global: Option<StateId>) {
    let global_rules: Vec<RuleId> = match global {
        Some(global) => states[global].own.clone(),
        None => Vec::new(),
    };

    for (id, state) in states.iter_mut().enumerate() {
        match state.name.as_str() {
            "End" => {
                state.effective = Vec::new();
            }
            "EOF" | "~Global" => {
                state.effective = state.own.clone();
            }
            _ => {
                let (overlay, filtered): (Vec<RuleId>, Vec<RuleId>) =
                    global_rules.iter().partition(|&&rule| rules[rule].filter.applies_to(id));

                state.filtered = filtered;
                state.effective = overlay;
                state.effective.extend(state.own.iter().copied());
            }
        }
    }
}
