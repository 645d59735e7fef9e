//! The template state machine.
//!
//! Drives a compiled [`Template`] over input text line by line. Each line is matched against
//! the active state's effective rules (global overlay first, then the state's own rules); a
//! match applies captures and the record action, then the line action decides whether to
//! re-scan the same line or read the next one. Exhausted input flips the machine into the
//! `EOF` state, whose synthetic rule records any pending row before processing ends.

use std::time::Instant;

use crate::error::RunError;
use crate::explain::{Disposition, RuleTrace, TraceEvent};
use crate::rows::{MetadataSnapshot, Row, RowAccumulator};
use crate::template::{LineAction, RecordAction, Rule, RuleAction, Template, ValueFlags, ValueId, ValueSet};

pub(crate) struct RunOutcome {
    pub(crate) rows: Vec<Row>,
    pub(crate) events: Vec<TraceEvent>,
    pub(crate) error: Option<RunError>,
}

pub(crate) fn run(template: &Template, input: &str, trace: bool) -> RunOutcome {
    let mut acc = RowAccumulator::new(&template.values, template.options);
    let mut events: Vec<TraceEvent> = Vec::new();
    let mut lines = input.lines();

    let mut line_no: u64 = 0;
    let mut state = template.start;
    let mut cursor: usize = 0;
    let mut at_eof = false;

    'run: loop {
        // read phase
        line_no += 1;
        let current: Option<&str> = lines.next();
        cursor = 0;
        if trace {
            events.push(TraceEvent::LineRead { line: line_no, text: current.map(str::to_string) });
        }
        if current.is_none() {
            if at_eof {
                // the EOF state consumed its turn without ending; nothing left to do
                break 'run;
            }
            at_eof = true;
            if trace {
                events.push(TraceEvent::StateChange {
                    from: template.states[state].name.clone(),
                    to: template.states[template.eof].name.clone(),
                    line: line_no,
                });
            }
            state = template.eof;
        }
        let text = current.unwrap_or("");

        if trace {
            for &filtered in &template.states[state].filtered {
                events.push(TraceEvent::Rule(RuleTrace {
                    state: template.states[state].name.clone(),
                    rule: template.rules[filtered].render(&template.states, &template.filter_domain),
                    line: line_no,
                    text: current.map(str::to_string),
                    disposition: Disposition::Filtered,
                    row: None,
                    elapsed: std::time::Duration::ZERO,
                }));
            }
        }

        // match phase; `cursor` advances through the active state's effective rules
        'line: loop {
            let effective = &template.states[state].effective;

            while cursor < effective.len() {
                let rule_id = effective[cursor];
                let rule = &template.rules[rule_id];

                let started = Instant::now();
                let captures = rule.regex.captures(text);
                let elapsed = started.elapsed();

                let Some(captures) = captures else {
                    if trace {
                        events.push(TraceEvent::Rule(RuleTrace {
                            state: template.states[state].name.clone(),
                            rule: rule.render(&template.states, &template.filter_domain),
                            line: line_no,
                            text: current.map(str::to_string),
                            disposition: Disposition::NotMatched,
                            row: None,
                            elapsed,
                        }));
                    }
                    cursor += 1;
                    continue;
                };

                if let Some(RuleAction::Error(message)) = &rule.action {
                    let error = RunError {
                        message: message.clone(),
                        state: template.states[state].name.clone(),
                        rule: rule
                            .render(&template.states, &template.filter_domain)
                            .replace('\n', " ")
                            .trim_start()
                            .to_string(),
                        line: line_no,
                        text: text.to_string(),
                    };
                    if trace {
                        events.push(TraceEvent::Rule(RuleTrace {
                            state: template.states[state].name.clone(),
                            rule: rule.render(&template.states, &template.filter_domain),
                            line: line_no,
                            text: current.map(str::to_string),
                            disposition: Disposition::Error,
                            row: None,
                            elapsed,
                        }));
                    }
                    return RunOutcome { rows: acc.into_rows(), events, error: Some(error) };
                }

                acc.set_metadata(&MetadataSnapshot {
                    line: line_no,
                    text: current.map(str::to_string),
                    state: template.states[state].name.clone(),
                    rule_index: rule_index(template, rule, cursor),
                });
                apply_captures(&mut acc, &template.values, rule, &captures);

                let emitted = match rule.record_action {
                    RecordAction::NoRecord => None,
                    RecordAction::Record => acc.record(),
                    RecordAction::Clear => {
                        acc.clear();
                        None
                    }
                    RecordAction::ClearAll => {
                        acc.clear_all();
                        None
                    }
                };

                if trace {
                    events.push(TraceEvent::Rule(RuleTrace {
                        state: template.states[state].name.clone(),
                        rule: rule.render(&template.states, &template.filter_domain),
                        line: line_no,
                        text: current.map(str::to_string),
                        disposition: Disposition::Matched,
                        row: emitted,
                        elapsed,
                    }));
                }

                cursor += 1;

                if let Some(RuleAction::ChangeState(target)) = rule.action {
                    if template.states[target].name == "End" {
                        if trace {
                            events.push(TraceEvent::StateChange {
                                from: template.states[state].name.clone(),
                                to: "End".to_string(),
                                line: line_no,
                            });
                        }
                        break 'run;
                    }
                    if target != state {
                        if trace {
                            events.push(TraceEvent::StateChange {
                                from: template.states[state].name.clone(),
                                to: template.states[target].name.clone(),
                                line: line_no,
                            });
                        }
                        state = target;
                    }
                    // re-scans of the same line start past the global overlay
                    cursor = template.states[state].own_offset();
                }

                match rule.line_action {
                    LineAction::Next => continue 'run,
                    LineAction::Continue => {
                        if cursor >= template.states[state].effective.len() {
                            continue 'run;
                        }
                        continue 'line;
                    }
                }
            }

            // no rule matched this line
            continue 'run;
        }
    }

    RunOutcome { rows: acc.into_rows(), events, error: None }
}

/// The `RuleIndex` metadata value: the rule's position within its own state, which for
/// non-global states means subtracting the global overlay the effective list was built with.
fn rule_index(template: &Template, rule: &Rule, cursor: usize) -> i64 {
    let overlay = match template.global {
        Some(global) if rule.state != global => template.states[global].own.len() as i64,
        _ => 0,
    };
    cursor as i64 - overlay
}

/// Feeds the match's captures into the pending record, one placeholder occurrence at a time.
/// A `List` value re-scans the span its own occurrences covered, so a single match can
/// contribute several items, as long as the re-scan agrees with the reported capture.
fn apply_captures(acc: &mut RowAccumulator<'_>, values: &ValueSet, rule: &Rule, captures: &regex::Captures<'_>) {
    let Some(whole) = captures.get(0) else {
        return;
    };

    let mut seen: Vec<ValueId> = Vec::new();
    for &(_, id) in &rule.captures {
        if seen.contains(&id) {
            continue;
        }
        seen.push(id);

        // several placeholder occurrences of one value act like a repeated capture group:
        // the last participating occurrence reports the value
        let participating: Vec<regex::Match<'_>> = rule
            .captures
            .iter()
            .filter(|&&(_, occurrence)| occurrence == id)
            .filter_map(|&(group, _)| captures.get(group))
            .collect();
        let (Some(&first), Some(&capture)) = (participating.first(), participating.last()) else {
            continue;
        };

        let descriptor = values.descriptor(id);
        if descriptor.flags.contains(ValueFlags::LIST) {
            // re-scan only the span between the first and last occurrence, never the
            // surrounding literal text; fall back to the single capture on disagreement
            let region = &whole.as_str()[first.start() - whole.start()..capture.end() - whole.start()];
            let finds: Vec<regex::Match<'_>> = descriptor.regex.find_iter(region).collect();
            if let Some(last) = finds.last() {
                if last.end() == region.len() && last.as_str() == capture.as_str() {
                    for find in &finds {
                        acc.set_value(id, find.as_str());
                    }
                    continue;
                }
            }
        }

        acc.set_value(id, capture.as_str());
    }
}
