//! Compiled templates.
//!
//! [`Template`] is the compiled, immutable form of a template: the value set, the state
//! arena with effective rule lists, and the compiled rules. Compilation validates names,
//! state references, filters, and the transition graph up front, so a `Template` that exists
//! can always run. Templates are shared through [`Arc`] and cached by source text, so
//! repeated construction from the same text is cheap.

#[path = "template/cycle.rs"]
mod cycle;
#[path = "template/rules.rs"]
mod rules;
#[path = "template/states.rs"]
mod states;
#[path = "template/values.rs"]
mod values;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use rules::{LineAction, RecordAction};
pub use values::{MetadataKind, ValueDescriptor, ValueFlags};

pub(crate) use rules::{Rule, RuleAction, StateFilter};
pub(crate) use states::TemplateState;
pub(crate) use values::{ValueId, ValueSet};

use crate::cache;
use crate::definition::{RuleDefinition, StateDefinition, TemplateDefinition};
use crate::error::{ParseErrorKind, RunError, TemplateError};
use crate::explain::Explanation;
use crate::fsm;
use crate::grammar;
use crate::rows::Row;

pub(crate) type StateId = usize;
pub(crate) type RuleId = usize;

/// How a column is filled when its value never matched before a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnmatchedHandling {
    /// An empty string, or an empty list for `List` values.
    #[default]
    Empty,
    /// No value at all; the column reads back as null.
    Null,
}

/// Per-run behavior knobs. Options are part of the cache key, so differently configured
/// templates compiled from the same text coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TemplateOptions {
    /// Handling for unmatched non-`List` values.
    pub unmatched_value: UnmatchedHandling,
    /// Handling for unmatched `List` values.
    pub unmatched_list: UnmatchedHandling,
}

/// A compiled text-extraction template.
pub struct Template {
    pub(crate) options: TemplateOptions,
    pub(crate) values: ValueSet,
    pub(crate) states: Vec<TemplateState>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) start: StateId,
    pub(crate) eof: StateId,
    pub(crate) global: Option<StateId>,
    /// The states a `~Global` filter may name; also the default filter coverage.
    pub(crate) filter_domain: HashSet<StateId>,
    /// Declared states in declaration order, for rendering. Synthetic `End`/`EOF` excluded.
    declared: Vec<StateId>,
    /// Where user-declared values start within the value set; library values come first.
    user_values: usize,
}

impl Template {
    /// Compiles template text, going through the shared template cache.
    pub fn new(text: &str) -> Result<Arc<Template>, TemplateError> {
        Self::with_options(text, TemplateOptions::default())
    }

    /// Compiles template text with explicit options, going through the shared template cache.
    pub fn with_options(text: &str, options: TemplateOptions) -> Result<Arc<Template>, TemplateError> {
        cache::shared().get(text, options)
    }

    /// Compiles a structural definition, going through the shared template cache.
    ///
    /// The definition's rendered text is the cache key, so an equivalent text-built template
    /// is reused.
    pub fn from_definition(definition: &TemplateDefinition) -> Result<Arc<Template>, TemplateError> {
        Self::from_definition_with_options(definition, TemplateOptions::default())
    }

    /// Compiles a structural definition with explicit options, through the shared cache.
    pub fn from_definition_with_options(
        definition: &TemplateDefinition,
        options: TemplateOptions,
    ) -> Result<Arc<Template>, TemplateError> {
        cache::shared().get_definition(definition, options)
    }

    /// Runs the template over input text and returns the extracted rows.
    pub fn run(&self, input: &str) -> Result<Vec<Row>, RunError> {
        let outcome = fsm::run(self, input, false);
        match outcome.error {
            Some(error) => Err(error),
            None => Ok(outcome.rows),
        }
    }

    /// Runs the template over input text with full tracing.
    ///
    /// An `Error` action does not return early here; it lands in
    /// [`Explanation::error`](crate::Explanation) alongside everything traced up to it.
    pub fn explain(&self, input: &str) -> Explanation {
        let outcome = fsm::run(self, input, true);
        Explanation { events: outcome.events, rows: outcome.rows, error: outcome.error }
    }

    /// The configured options.
    pub fn options(&self) -> TemplateOptions {
        self.options
    }

    /// The user-declared value descriptors, in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &ValueDescriptor> {
        self.values.iter().skip(self.user_values).map(|(_, descriptor)| descriptor)
    }

    /// The declared state names, in declaration order.
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(|&id| self.states[id].name.as_str())
    }

    /// Compiles a structural definition directly, without touching any cache.
    pub fn compile(
        definition: &TemplateDefinition,
        options: TemplateOptions,
    ) -> Result<Template, TemplateError> {
        validate_values(&definition.values)?;
        validate_states(&definition.states)?;

        let values = ValueSet::build(&definition.values)?;
        let user_values = values.iter().count() - definition.values.len();

        // state arena: declared states first, then synthetic End/EOF where not declared
        let mut state_arena: Vec<TemplateState> =
            definition.states.iter().map(|state| TemplateState::new(&state.name)).collect();
        let declared: Vec<StateId> = (0..state_arena.len()).collect();

        let mut by_name: HashMap<String, StateId> =
            state_arena.iter().enumerate().map(|(id, state)| (state.name.clone(), id)).collect();
        for synthetic in ["End", "EOF"] {
            if !by_name.contains_key(synthetic) {
                by_name.insert(synthetic.to_string(), state_arena.len());
                state_arena.push(TemplateState::new(synthetic));
            }
        }

        let global = by_name.get("~Global").copied();
        let start = by_name["Start"];
        let eof = by_name["EOF"];
        let eof_declared = declared.contains(&eof);

        let filter_domain: HashSet<StateId> =
            declared.iter().copied().filter(|&id| Some(id) != global).collect();

        // actions and filters resolve across the whole template before any pattern compiles
        let mut resolved: Vec<Vec<(Option<RuleAction>, StateFilter)>> = Vec::with_capacity(definition.states.len());
        for (state_id, state) in definition.states.iter().enumerate() {
            let mut per_rule = Vec::with_capacity(state.rules.len());
            for rule in &state.rules {
                if rule.filter.is_some() && Some(state_id) != global {
                    return Err(ParseErrorKind::StateFilterOutsideGlobal { state: state.name.clone() }.into());
                }

                let action = match &rule.action {
                    Some(action) => Some(rules::compile_action(&state.name, action, &by_name)?),
                    None => None,
                };
                let filter = rules::compile_filter(rule.filter.as_ref(), &by_name, &filter_domain)?;
                per_rule.push((action, filter));
            }
            resolved.push(per_rule);
        }

        let mut rule_arena: Vec<Rule> = Vec::new();
        for (state_id, state) in definition.states.iter().enumerate() {
            for (rule, (action, filter)) in state.rules.iter().zip(resolved[state_id].drain(..)) {
                let compiled = Rule::compile(state_id, rule, filter, action, &values)?;
                state_arena[state_id].own.push(rule_arena.len());
                rule_arena.push(compiled);
            }
        }

        // the EOF state always ends the run on its first line; undeclared it also records
        // whatever is pending first
        let synthetic = if eof_declared {
            RuleDefinition::new("^.*")
        } else {
            RuleDefinition::new("^.*").record_action(RecordAction::Record)
        };
        let filter = StateFilter::new(None, false, &filter_domain);
        let action = Some(RuleAction::ChangeState(by_name["End"]));
        let compiled = Rule::compile(eof, &synthetic, filter, action, &values)
            .map_err(TemplateError::new)?;
        state_arena[eof].own.push(rule_arena.len());
        rule_arena.push(compiled);

        states::link_effective_rules(&mut state_arena, &rule_arena, global);
        cycle::detect(&state_arena, &rule_arena, &filter_domain)?;

        Ok(Template {
            options,
            values,
            states: state_arena,
            rules: rule_arena,
            start,
            eof,
            global,
            filter_domain,
            declared,
            user_values,
        })
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    /// Parses and compiles template text directly, bypassing the cache.
    fn from_str(text: &str) -> Result<Template, TemplateError> {
        Template::compile(&grammar::parse(text)?, TemplateOptions::default())
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("options", &self.options)
            .field("values", &self.values().count())
            .field("states", &self.declared.len())
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for descriptor in self.values() {
            writeln!(f, "{descriptor}")?;
        }

        for &id in &self.declared {
            let state = &self.states[id];
            writeln!(f)?;
            writeln!(f, "{}", state.name)?;
            // a declared EOF state only holds the synthetic end-of-run rule
            if id == self.eof {
                continue;
            }
            for &rule in &state.own {
                writeln!(f, "{}", self.rules[rule].render(&self.states, &self.filter_domain))?;
            }
        }

        Ok(())
    }
}

fn validate_values(values: &[crate::definition::ValueDefinition]) -> Result<(), TemplateError> {
    if values.is_empty() {
        return Err(ParseErrorKind::NoValues.into());
    }

    for value in values {
        let valid = if value.flags.contains(ValueFlags::REGEX) {
            regex!(r"^[a-zA-Z0-9\-_:@#%&]{1,48}$").is_match(&value.name)
        } else {
            regex!(r"^\S{1,48}$").is_match(&value.name)
        };
        if !valid {
            return Err(ParseErrorKind::InvalidValueName(value.name.clone()).into());
        }
    }

    for value in values {
        if matches!(value.name.as_str(), "Filldown" | "Key" | "Required" | "List" | "Fillup") {
            return Err(ParseErrorKind::ReservedValueName(value.name.clone()).into());
        }
    }

    Ok(())
}

fn validate_states(states: &[StateDefinition]) -> Result<(), TemplateError> {
    if states.is_empty() {
        return Err(ParseErrorKind::NoStates.into());
    }
    if !states.iter().any(|state| state.name == "Start") {
        return Err(ParseErrorKind::NoStartState.into());
    }

    for state in states {
        if !regex!(r"^(?:\w{1,32}|~Global)$").is_match(&state.name) {
            return Err(ParseErrorKind::InvalidStateName(state.name.clone()).into());
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for state in states {
        if !seen.insert(&state.name) {
            return Err(ParseErrorKind::DuplicateState(state.name.clone()).into());
        }
    }

    for state in states {
        if matches!(state.name.as_str(), "End" | "EOF") && !state.rules.is_empty() {
            return Err(ParseErrorKind::StateMustBeEmpty(state.name.clone()).into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ActionDefinition, ValueDefinition};

    fn compile(text: &str) -> Result<Template, TemplateError> {
        text.parse()
    }

    fn kind(text: &str) -> ParseErrorKind {
        compile(text).unwrap_err().kind
    }

    #[test]
    fn minimal_template_compiles() {
        let template = compile("Value A (\\w+)\n\nStart\n ^${A} -> Record\n").unwrap();
        assert_eq!(template.states().collect::<Vec<_>>(), vec!["Start"]);
        assert_eq!(template.values().count(), 1);
    }

    #[test]
    fn validation_failures_by_kind() {
        assert!(matches!(kind("Start\n ^.*\n"), ParseErrorKind::SyntaxError { .. }));
        assert!(matches!(
            kind("Value A (\\w+)\n\nOther\n ^.*\n"),
            ParseErrorKind::NoStartState
        ));
        assert!(matches!(
            kind("Value A (\\w+)\n\nStart\n ^.*\n\nStart\n ^.*\n"),
            ParseErrorKind::DuplicateState(name) if name == "Start"
        ));
        assert!(matches!(
            kind("Value A (\\w+)\n\nStart\n ^.*\n\nEOF\n ^.*\n"),
            ParseErrorKind::StateMustBeEmpty(name) if name == "EOF"
        ));
        assert!(matches!(
            kind("Value A (\\w+)\n\nStart\n ^.* -> Missing\n"),
            ParseErrorKind::UndefinedState { target, .. } if target == "Missing"
        ));
        assert!(matches!(
            kind("Value A (\\w+)\n\nStart\n ^${Nope}\n"),
            ParseErrorKind::UndeclaredValue(name) if name == "Nope"
        ));
        assert!(matches!(
            kind("Value Required (\\w+)\n\nStart\n ^.*\n"),
            ParseErrorKind::ReservedValueName(name) if name == "Required"
        ));
    }

    #[test]
    fn regex_value_names_are_stricter() {
        assert!(compile("Value Regex A$B (x)\n\nStart\n ^.*\n").is_err());
        assert!(compile("Value A$B (\\w+)\n\nStart\n ^.*\n").is_ok());
    }

    #[test]
    fn filters_only_in_global() {
        let err = kind("Value A (\\w+)\n\nStart\n [Start]\n ^.*\n");
        assert!(matches!(err, ParseErrorKind::StateFilterOutsideGlobal { state } if state == "Start"));

        assert!(compile("Value A (\\w+)\n\n~Global\n [Start]\n ^.*\n\nStart\n ^.*\n").is_ok());
    }

    #[test]
    fn filter_state_validation() {
        let err = kind("Value A (\\w+)\n\n~Global\n [Nope]\n ^.*\n\nStart\n ^.*\n");
        assert!(matches!(err, ParseErrorKind::UndefinedFilterState { filter } if filter == "Nope"));

        let err = kind("Value A (\\w+)\n\n~Global\n [Start,Start]\n ^.*\n\nStart\n ^.*\n");
        assert!(matches!(err, ParseErrorKind::DuplicateFilterState { filter } if filter == "Start"));
    }

    #[test]
    fn end_and_eof_are_implicit_targets() {
        assert!(compile("Value A (\\w+)\n\nStart\n ^done -> End\n ^.*\n").is_ok());
        assert!(compile("Value A (\\w+)\n\nStart\n ^done -> EOF\n ^.*\n").is_ok());
    }

    #[test]
    fn global_cannot_be_a_transition_target() {
        let definition = TemplateDefinition::new(
            vec![ValueDefinition::new("A", ValueFlags::empty(), r"\w+")],
            vec![
                StateDefinition::new("~Global", vec![RuleDefinition::new("^x")]),
                StateDefinition::new(
                    "Start",
                    vec![RuleDefinition::new("^.*").action(ActionDefinition::ChangeState("~Global".into()))],
                ),
            ],
        );
        let err = Template::compile(&definition, TemplateOptions::default()).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::GlobalTransitionTarget { state } if state == "Start"));
    }

    #[test]
    fn continue_loop_is_detected() {
        let err = kind(
            "Value A (\\w+)\n\nStart\n ^.* -> Continue Two\n\nTwo\n ^.* -> Continue Start\n",
        );
        let ParseErrorKind::StateLoop { path, state, rule } = err else {
            panic!("expected a state loop, got {err:?}");
        };
        assert_eq!(path, "Start > Two > Start");
        assert_eq!(state, "Two");
        assert_eq!(rule, "^.* -> Continue Start");
    }

    #[test]
    fn continue_without_a_loop_compiles() {
        assert!(compile("Value A (\\w+)\n\nStart\n ^x -> Continue Two\n ^.*\n\nTwo\n ^.* -> Start\n").is_ok());
    }

    #[test]
    fn next_edges_alone_may_cycle() {
        assert!(compile("Value A (\\w+)\n\nStart\n ^.* -> Two\n\nTwo\n ^.* -> Start\n").is_ok());
    }

    #[test]
    fn rendering_round_trips_through_the_grammar() {
        let text = "Value Filldown SLOT (\\d+)\nValue NAME (\\w+)\n\nStart\n ^${SLOT} ${NAME} -> Record\n ^reset -> Next.Clearall\n ^done -> End\n";
        let template: Template = text.parse().unwrap();
        let rendered = template.to_string();
        let again: Template = rendered.parse().unwrap();
        assert_eq!(rendered, again.to_string());
    }
}
