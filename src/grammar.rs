//! The template text grammar.
//!
//! Templates are line oriented: a `Value` section first, then states introduced by an
//! unindented header, each holding rules indented by one or two spaces or a tab. Comment
//! lines (`#` after optional whitespace) are allowed anywhere. A blank line closes the
//! current section, after which only a state header (or more blank lines and comments) may
//! follow. Rules carry their actions after ` -> `; a state filter line (`[a,b]` or `[^a,b]`)
//! immediately precedes the rule it applies to.
//!
//! The parser produces a [`TemplateDefinition`]; all semantic validation (state references,
//! value names, loops) happens at compile time, not here.

use crate::definition::{
    ActionDefinition, FilterDefinition, RuleDefinition, StateDefinition, TemplateDefinition, ValueDefinition,
};
use crate::error::{ParseErrorKind, TemplateError};
use crate::template::{LineAction, RecordAction, ValueFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Nothing seen yet; only comments or the first `Value` line are valid.
    Prelude,
    /// Inside the `Value` declarations.
    Values,
    /// After a blank line; only a state header may open the next section.
    Break,
    /// Inside a state's rules.
    Rules,
}

pub(crate) fn parse(text: &str) -> Result<TemplateDefinition, TemplateError> {
    let mut values: Vec<ValueDefinition> = Vec::new();
    let mut states: Vec<StateDefinition> = Vec::new();
    let mut section = Section::Prelude;
    // a filter line binds to the next rule line
    let mut pending_filter: Option<FilterDefinition> = None;

    let syntax_error = |line_no: u64, line: &str| -> TemplateError {
        TemplateError::new(ParseErrorKind::SyntaxError { line: line_no, text: line.to_string() })
    };

    for (index, line) in text.lines().enumerate() {
        let line_no = index as u64 + 1;

        if regex!(r"^\s*#").is_match(line) {
            continue;
        }

        if pending_filter.is_some() {
            let Some(rule) = parse_rule_line(line, line_no)? else {
                return Err(syntax_error(line_no, line));
            };
            let mut rule = rule;
            rule.filter = pending_filter.take();
            match states.last_mut() {
                Some(state) => state.rules.push(rule),
                None => return Err(syntax_error(line_no, line)),
            }
            continue;
        }

        let blank = line.trim().is_empty();

        match section {
            Section::Prelude | Section::Values => {
                if let Some(rest) = line.strip_prefix("Value ") {
                    values.push(parse_value_line(rest).ok_or_else(|| syntax_error(line_no, line))?);
                    section = Section::Values;
                } else if blank && section == Section::Values {
                    section = Section::Break;
                } else if section == Section::Values && state_header(line).is_some() {
                    states.push(StateDefinition::new(line, Vec::new()));
                    section = Section::Rules;
                } else {
                    return Err(syntax_error(line_no, line));
                }
            }

            Section::Break => {
                if blank {
                    continue;
                }
                match state_header(line) {
                    Some(name) => {
                        states.push(StateDefinition::new(name, Vec::new()));
                        section = Section::Rules;
                    }
                    None => return Err(syntax_error(line_no, line)),
                }
            }

            Section::Rules => {
                if blank {
                    section = Section::Break;
                } else if let Some(name) = state_header(line) {
                    states.push(StateDefinition::new(name, Vec::new()));
                } else if let Some(filter) = parse_filter_line(line) {
                    pending_filter = Some(filter);
                } else if let Some(rule) = parse_rule_line(line, line_no)? {
                    match states.last_mut() {
                        Some(state) => state.rules.push(rule),
                        None => return Err(syntax_error(line_no, line)),
                    }
                } else {
                    return Err(syntax_error(line_no, line));
                }
            }
        }
    }

    if pending_filter.is_some() {
        let line_no = text.lines().count() as u64;
        return Err(syntax_error(line_no, ""));
    }

    Ok(TemplateDefinition::new(values, states))
}

fn state_header(line: &str) -> Option<&str> {
    regex!(r"^(?:[A-Za-z0-9]+|~Global)$").is_match(line).then_some(line)
}

/// Parses the remainder of a `Value ` line: optional comma-joined flags, a name, and a
/// parenthesized pattern. A first token that looks like flags but leaves no valid
/// `name (pattern)` behind is reinterpreted as the name.
fn parse_value_line(rest: &str) -> Option<ValueDefinition> {
    fn name_and_pattern(rest: &str) -> Option<(&str, &str)> {
        let (name, after) = rest.split_once(' ')?;
        if name.is_empty() {
            return None;
        }
        let after = after.trim_end();
        let inner = after.strip_prefix('(')?.strip_suffix(')')?;
        Some((name, inner))
    }

    if let Some((first, after)) = rest.split_once(' ') {
        let flags = first
            .split(',')
            .map(ValueFlags::from_keyword)
            .try_fold(ValueFlags::empty(), |acc, flag| flag.map(|flag| acc | flag));

        if let Some(flags) = flags {
            if let Some((name, pattern)) = name_and_pattern(after) {
                return Some(ValueDefinition::new(name, flags, pattern));
            }
        }
    }

    let (name, pattern) = name_and_pattern(rest)?;
    Some(ValueDefinition::new(name, ValueFlags::empty(), pattern))
}

/// Strips the rule indent: one or two spaces, or a single tab.
fn rule_body(line: &str) -> Option<&str> {
    if let Some(body) = line.strip_prefix('\t') {
        return Some(body);
    }
    let body = line.strip_prefix(' ')?;
    let body = body.strip_prefix(' ').unwrap_or(body);
    if body.starts_with(' ') { None } else { Some(body) }
}

fn parse_filter_line(line: &str) -> Option<FilterDefinition> {
    let body = rule_body(line)?;
    let caps = regex!(r"^\[(\^)?(\w+(?:,\w+)*)?\]$").captures(body)?;

    let invert = caps.get(1).is_some();
    let states = caps
        .get(2)
        .map(|listed| listed.as_str().split(',').map(str::to_string).collect())
        .unwrap_or_default();

    Some(FilterDefinition { states, invert })
}

/// Parses an indented rule line, or returns `Ok(None)` if the line is not rule shaped.
///
/// The pattern and the action are split at the first ` -> ` whose remainder parses as an
/// action, so a literal ` -> ` inside the pattern does not break a rule that carries a real
/// action further right. An arrow followed by junk is an unsupported action; a bare trailing
/// arrow is a syntax error.
fn parse_rule_line(line: &str, line_no: u64) -> Result<Option<RuleDefinition>, TemplateError> {
    let Some(body) = rule_body(line) else {
        return Ok(None);
    };
    if !body.starts_with('^') {
        return Ok(None);
    }
    let body = body.trim_end();

    let mut saw_arrow = false;
    let mut bare_arrow = false;
    for (index, _) in body.match_indices(" ->") {
        let rest = &body[index + 3..];
        if rest.is_empty() {
            bare_arrow = true;
            continue;
        }
        if !rest.starts_with(|c: char| c.is_whitespace()) {
            continue;
        }

        saw_arrow = true;
        if let Some((line_action, record_action, action)) = parse_action(rest.trim()) {
            let mut rule = RuleDefinition::new(&body[..index]);
            rule.line_action = line_action;
            rule.record_action = record_action;
            rule.action = action;
            return Ok(Some(rule));
        }
    }

    if bare_arrow && !saw_arrow {
        return Err(TemplateError::new(ParseErrorKind::SyntaxError { line: line_no, text: line.to_string() }));
    }
    if saw_arrow {
        return Err(TemplateError::new(ParseErrorKind::UnsupportedAction { line: line_no, text: line.to_string() }));
    }

    Ok(Some(RuleDefinition::new(body)))
}

fn parse_action(text: &str) -> Option<(LineAction, RecordAction, Option<ActionDefinition>)> {
    if text == "Error" {
        return Some((LineAction::Next, RecordAction::NoRecord, Some(ActionDefinition::Error(None))));
    }
    if let Some(caps) = regex!(r#"^Error\s+(\w+)$"#).captures(text) {
        let message = caps[1].to_string();
        return Some((LineAction::Next, RecordAction::NoRecord, Some(ActionDefinition::Error(Some(message)))));
    }
    if let Some(caps) = regex!(r#"^Error\s+"(.*)"$"#).captures(text) {
        let message = caps[1].to_string();
        return Some((LineAction::Next, RecordAction::NoRecord, Some(ActionDefinition::Error(Some(message)))));
    }

    if let Some(caps) =
        regex!(r"^(Next|Continue)\.(NoRecord|Record|Clearall|ClearAll|Clear)(?:\s+(\w+))?$").captures(text)
    {
        return Some((
            line_action(&caps[1]),
            record_action(&caps[2]),
            caps.get(3).map(|state| ActionDefinition::ChangeState(state.as_str().to_string())),
        ));
    }

    if let Some(caps) = regex!(r"^(NoRecord|Record|Clearall|ClearAll|Clear)(?:\s+(\w+))?$").captures(text) {
        return Some((
            LineAction::Next,
            record_action(&caps[1]),
            caps.get(2).map(|state| ActionDefinition::ChangeState(state.as_str().to_string())),
        ));
    }

    if let Some(caps) = regex!(r"^(Next|Continue)(?:\s+(\w+))?$").captures(text) {
        return Some((
            line_action(&caps[1]),
            RecordAction::NoRecord,
            caps.get(2).map(|state| ActionDefinition::ChangeState(state.as_str().to_string())),
        ));
    }

    if let Some(caps) = regex!(r"^(\w+)$").captures(text) {
        return Some((
            LineAction::Next,
            RecordAction::NoRecord,
            Some(ActionDefinition::ChangeState(caps[1].to_string())),
        ));
    }

    None
}

fn line_action(word: &str) -> LineAction {
    match word {
        "Continue" => LineAction::Continue,
        _ => LineAction::Next,
    }
}

fn record_action(word: &str) -> RecordAction {
    match word {
        "Record" => RecordAction::Record,
        "Clear" => RecordAction::Clear,
        "Clearall" | "ClearAll" => RecordAction::ClearAll,
        _ => RecordAction::NoRecord,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> TemplateDefinition {
        parse(text).unwrap()
    }

    #[test]
    fn values_and_states_parse() {
        let definition = parse_ok(
            "Value NAME (\\w+)\nValue Filldown,Required SLOT (\\d+)\n\nStart\n ^${NAME} -> Record\n ^. -> Other\n\nOther\n ^.*\n",
        );

        assert_eq!(definition.values.len(), 2);
        assert_eq!(definition.values[1].flags, ValueFlags::FILLDOWN | ValueFlags::REQUIRED);
        assert_eq!(definition.states.len(), 2);
        assert_eq!(definition.states[0].rules.len(), 2);
        assert_eq!(definition.states[0].rules[0].record_action, RecordAction::Record);
        assert_eq!(definition.states[0].rules[1].action, Some(ActionDefinition::ChangeState("Other".into())));
    }

    #[test]
    fn value_name_may_collide_with_flag_keyword() {
        let definition = parse_ok("Value Metadata (Line)\n\nStart\n ^.*\n");
        assert_eq!(definition.values[0].name, "Metadata");
        assert!(definition.values[0].flags.is_empty());

        let definition = parse_ok("Value Metadata LINE (Line)\n\nStart\n ^.*\n");
        assert_eq!(definition.values[0].name, "LINE");
        assert_eq!(definition.values[0].flags, ValueFlags::METADATA);
    }

    #[test]
    fn action_shapes() {
        let definition = parse_ok(
            "Value V (\\w+)\n\nStart\n ^a -> Next.Record\n ^b -> Continue.Clearall Two\n ^c -> Clear\n ^d -> Continue\n ^e -> Error\n ^f -> Error word\n ^g -> Error \"spaced message\"\n\nTwo\n ^.*\n",
        );

        let rules = &definition.states[0].rules;
        assert_eq!((rules[0].line_action, rules[0].record_action), (LineAction::Next, RecordAction::Record));
        assert_eq!((rules[1].line_action, rules[1].record_action), (LineAction::Continue, RecordAction::ClearAll));
        assert_eq!(rules[1].action, Some(ActionDefinition::ChangeState("Two".into())));
        assert_eq!(rules[2].record_action, RecordAction::Clear);
        assert_eq!(rules[3].line_action, LineAction::Continue);
        assert_eq!(rules[4].action, Some(ActionDefinition::Error(None)));
        assert_eq!(rules[5].action, Some(ActionDefinition::Error(Some("word".into()))));
        assert_eq!(rules[6].action, Some(ActionDefinition::Error(Some("spaced message".into()))));
    }

    #[test]
    fn arrow_inside_pattern_binds_to_rightmost_action() {
        let definition = parse_ok("Value V (\\w+)\n\nStart\n ^a -> b -> Record\n");
        let rule = &definition.states[0].rules[0];
        assert_eq!(rule.pattern, "^a -> b");
        assert_eq!(rule.record_action, RecordAction::Record);
    }

    #[test]
    fn state_filters_attach_to_next_rule() {
        let definition = parse_ok("Value V (\\w+)\n\n~Global\n [Start,Two]\n ^x -> Record\n [^Two]\n ^y\n\nStart\n ^.*\n\nTwo\n ^.*\n");

        let global = &definition.states[0];
        assert_eq!(global.name, "~Global");
        let filter = global.rules[0].filter.as_ref().unwrap();
        assert_eq!(filter.states, vec!["Start".to_string(), "Two".to_string()]);
        assert!(!filter.invert);
        let filter = global.rules[1].filter.as_ref().unwrap();
        assert_eq!(filter.states, vec!["Two".to_string()]);
        assert!(filter.invert);
    }

    #[test]
    fn comments_are_ignored_everywhere() {
        let definition = parse_ok("# header\nValue V (\\w+)\n# between\n\nStart\n # indented comment\n ^${V} -> Record\n");
        assert_eq!(definition.states[0].rules.len(), 1);
    }

    #[test]
    fn bare_arrow_is_a_syntax_error() {
        let err = parse("Value V (\\w+)\n\nStart\n ^a ->\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::SyntaxError { line: 4, .. }));
    }

    #[test]
    fn arrow_with_junk_is_an_unsupported_action() {
        let err = parse("Value V (\\w+)\n\nStart\n ^a -> Bogus Action Here\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnsupportedAction { line: 4, .. }));
    }

    #[test]
    fn rules_after_a_blank_line_need_a_new_state_header() {
        let err = parse("Value V (\\w+)\n\nStart\n ^a\n\n ^b\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::SyntaxError { line: 6, .. }));
    }

    #[test]
    fn values_after_a_blank_line_are_rejected() {
        let err = parse("Value A (\\w+)\n\nValue B (\\w+)\n\nStart\n ^.*\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::SyntaxError { line: 3, .. }));
    }

    #[test]
    fn leading_junk_is_rejected() {
        assert!(parse("Start\n ^.*\n").is_err());
        assert!(parse("\nValue V (\\w+)\n\nStart\n ^.*\n").is_err());
    }

    #[test]
    fn three_space_indent_is_rejected() {
        let err = parse("Value V (\\w+)\n\nStart\n   ^a\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::SyntaxError { line: 4, .. }));
    }

    #[test]
    fn filter_must_be_followed_by_a_rule() {
        let err = parse("Value V (\\w+)\n\n~Global\n [Start]\n\nStart\n ^.*\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::SyntaxError { .. }));
    }

    #[test]
    fn definitions_round_trip_through_rendering() {
        let text = "Value Filldown SLOT (\\d+)\nValue NAME (\\w+)\n\n~Global\n [Start]\n ^reset -> Clearall\n\nStart\n ^${SLOT} ${NAME} -> Record\n ^x -> Continue.Record Two\n ^fail -> Error \"bad input\"\n\nTwo\n ^done -> End\n";
        let definition = parse_ok(text);
        let rendered = definition.to_string();
        assert_eq!(parse(&rendered).unwrap(), definition);
    }

    #[test]
    fn underscored_state_header_is_rejected() {
        assert!(parse("Value V (\\w+)\n\nMy_State\n ^.*\n").is_err());
    }
}
