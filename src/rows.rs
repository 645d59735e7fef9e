//! Extracted rows and the accumulator that builds them.
//!
//! During a run, captures land in a pending record inside [`RowAccumulator`]. A `Record`
//! action finalizes the pending record into a [`Row`]: metadata values are injected, cached
//! `Filldown` values merged, `Required` values enforced, and unset columns defaulted per the
//! template options. Emitted rows stay mutable internally so `Fillup` values can propagate
//! backwards into earlier rows.

use std::collections::HashMap;

use crate::template::{MetadataKind, TemplateOptions, UnmatchedHandling, ValueFlags, ValueId, ValueSet};

/// A single extracted cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A plain captured string.
    Text(String),
    /// Accumulated captures of a `List` value.
    List(Vec<String>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::Text(_) => None,
            Value::List(items) => Some(items),
        }
    }
}

/// One extracted record; columns follow value declaration order.
///
/// A column holds `None` when the value never matched and the template options keep
/// unmatched values as nulls rather than empty defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    columns: Vec<(String, Option<Value>)>,
}

impl Row {
    /// The cell for `name`, if the column exists and holds a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(column, _)| column == name).and_then(|(_, value)| value.as_ref())
    }

    /// The text of a non-`List` cell.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_text)
    }

    /// The items of a `List` cell.
    pub fn list(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(Value::as_list)
    }

    /// Whether the row has a column named `name`, whatever it holds.
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.columns.iter().map(|(column, value)| (column.as_str(), value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn cell_mut(&mut self, name: &str) -> Option<&mut Option<Value>> {
        self.columns.iter_mut().find(|(column, _)| column == name).map(|(_, value)| value)
    }
}

/// Run-state quantities captured at the moment a rule matched, feeding `Metadata` values.
#[derive(Debug, Clone)]
pub(crate) struct MetadataSnapshot {
    /// 1-based input line number.
    pub(crate) line: u64,
    /// The matched line, absent once input is exhausted.
    pub(crate) text: Option<String>,
    /// Name of the state the matched rule ran under.
    pub(crate) state: String,
    /// Rule index within the state, adjusted for any global overlay.
    pub(crate) rule_index: i64,
}

impl MetadataSnapshot {
    fn value(&self, kind: MetadataKind) -> Option<String> {
        match kind {
            MetadataKind::Line => Some(self.line.to_string()),
            MetadataKind::Text => self.text.clone(),
            MetadataKind::State => Some(self.state.clone()),
            MetadataKind::RuleIndex => Some(self.rule_index.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
enum MetadataEntry {
    #[default]
    Unset,
    Last(Option<String>),
    All(Vec<String>),
}

/// Builds rows as the state machine applies captures and record actions.
pub(crate) struct RowAccumulator<'t> {
    values: &'t ValueSet,
    options: TemplateOptions,
    current: HashMap<ValueId, Option<Value>>,
    filldown: HashMap<ValueId, Value>,
    metadata: HashMap<ValueId, MetadataEntry>,
    rows: Vec<Row>,
}

impl<'t> RowAccumulator<'t> {
    pub(crate) fn new(values: &'t ValueSet, options: TemplateOptions) -> RowAccumulator<'t> {
        RowAccumulator {
            values,
            options,
            current: HashMap::new(),
            filldown: HashMap::new(),
            metadata: HashMap::new(),
            rows: Vec::new(),
        }
    }

    /// Applies one capture to the pending record.
    pub(crate) fn set_value(&mut self, id: ValueId, text: &str) {
        let flags = self.values.descriptor(id).flags;

        if flags.contains(ValueFlags::LIST) {
            // a pending list picks up where the filldown cache left off
            let seed = match self.filldown.get(&id) {
                Some(Value::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            let entry = self.current.entry(id).or_insert_with(|| Some(Value::List(seed)));
            if let Some(Value::List(items)) = entry {
                items.push(text.to_string());
            } else {
                *entry = Some(Value::List(vec![text.to_string()]));
            }
            let value = entry.clone();
            if flags.contains(ValueFlags::FILLDOWN) {
                if let Some(value) = value.clone() {
                    self.filldown.insert(id, value);
                }
            }
            if flags.contains(ValueFlags::FILLUP) {
                if let Some(value) = value {
                    self.fill_up(id, &value);
                }
            }
            return;
        }

        self.current.insert(id, Some(Value::Text(text.to_string())));
        if flags.contains(ValueFlags::FILLDOWN) {
            self.filldown.insert(id, Value::Text(text.to_string()));
        }
        if flags.contains(ValueFlags::FILLUP) {
            self.fill_up(id, &Value::Text(text.to_string()));
        }
    }

    /// Records run-state metadata for every `Metadata` value on a rule match.
    pub(crate) fn set_metadata(&mut self, snapshot: &MetadataSnapshot) {
        for (id, descriptor) in self.values.iter() {
            let Some(kind) = descriptor.metadata else {
                continue;
            };
            let value = snapshot.value(kind);

            let entry = self.metadata.entry(id).or_default();
            if descriptor.flags.contains(ValueFlags::LIST) {
                if let Some(value) = value {
                    match entry {
                        MetadataEntry::All(items) => items.push(value),
                        _ => *entry = MetadataEntry::All(vec![value]),
                    }
                }
            } else {
                *entry = MetadataEntry::Last(value);
            }
        }
    }

    /// Finalizes the pending record into a row.
    ///
    /// Returns the emitted row, or `None` when the pending record was empty or a `Required`
    /// value was missing. An empty pending record is left untouched; a discarded record is
    /// cleared like an emitted one.
    pub(crate) fn record(&mut self) -> Option<Row> {
        if self.current.is_empty() {
            return None;
        }

        // metadata is injected after the empty check so it never produces rows by itself
        for (&id, entry) in &self.metadata {
            match entry {
                MetadataEntry::Unset => {}
                MetadataEntry::Last(value) => {
                    self.current.insert(id, value.clone().map(Value::Text));
                }
                MetadataEntry::All(items) => {
                    self.current.insert(id, Some(Value::List(items.clone())));
                }
            }
        }

        for (&id, cached) in &self.filldown {
            if self.values.descriptor(id).flags.contains(ValueFlags::LIST) {
                // the cache accumulates every capture, so it supersedes the pending entry
                self.current.insert(id, Some(cached.clone()));
            } else {
                self.current.entry(id).or_insert_with(|| Some(cached.clone()));
            }
        }

        for (id, descriptor) in self.values.iter() {
            if descriptor.flags.contains(ValueFlags::REQUIRED) && !self.current.contains_key(&id) {
                self.clear();
                return None;
            }
        }

        let mut row = Row::default();
        for (id, descriptor) in self.values.iter() {
            if descriptor.flags == ValueFlags::REGEX {
                continue;
            }

            let value = match self.current.remove(&id) {
                Some(value) => value,
                None if descriptor.flags.contains(ValueFlags::LIST) => match self.options.unmatched_list {
                    UnmatchedHandling::Empty => Some(Value::List(Vec::new())),
                    UnmatchedHandling::Null => None,
                },
                None => match self.options.unmatched_value {
                    UnmatchedHandling::Empty => Some(Value::Text(String::new())),
                    UnmatchedHandling::Null => None,
                },
            };
            row.columns.push((descriptor.name.clone(), value));
        }

        self.clear();
        self.rows.push(row.clone());
        Some(row)
    }

    /// Drops the pending record; cached `Filldown` values survive.
    pub(crate) fn clear(&mut self) {
        self.current.clear();
        self.metadata.clear();
    }

    /// Drops the pending record and the `Filldown` caches.
    pub(crate) fn clear_all(&mut self) {
        self.clear();
        self.filldown.clear();
    }

    pub(crate) fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    // walk emitted rows backwards, overwriting the column while it is unset or empty
    fn fill_up(&mut self, id: ValueId, value: &Value) {
        let name = self.values.descriptor(id).name.clone();
        for row in self.rows.iter_mut().rev() {
            let Some(cell) = row.cell_mut(&name) else {
                break;
            };
            let populated = match cell {
                Some(Value::Text(existing)) => !existing.is_empty(),
                Some(Value::List(items)) => !items.is_empty(),
                None => false,
            };
            if populated {
                break;
            }
            *cell = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ValueDefinition;

    fn values(defs: &[(&str, ValueFlags)]) -> ValueSet {
        let defs: Vec<ValueDefinition> =
            defs.iter().map(|&(name, flags)| ValueDefinition::new(name, flags, r"\S+")).collect();
        ValueSet::build(&defs).unwrap()
    }

    fn id(values: &ValueSet, name: &str) -> ValueId {
        values.get(name).unwrap().0
    }

    #[test]
    fn empty_pending_record_emits_nothing() {
        let values = values(&[("A", ValueFlags::empty())]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());
        assert!(acc.record().is_none());
        assert!(acc.into_rows().is_empty());
    }

    #[test]
    fn unset_columns_default_per_options() {
        let values = values(&[("A", ValueFlags::empty()), ("B", ValueFlags::empty()), ("L", ValueFlags::LIST)]);

        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());
        acc.set_value(id(&values, "A"), "x");
        let row = acc.record().unwrap();
        assert_eq!(row.text("A"), Some("x"));
        assert_eq!(row.text("B"), Some(""));
        assert_eq!(row.list("L"), Some(&[][..]));

        let options = TemplateOptions { unmatched_value: UnmatchedHandling::Null, unmatched_list: UnmatchedHandling::Null };
        let mut acc = RowAccumulator::new(&values, options);
        acc.set_value(id(&values, "A"), "x");
        let row = acc.record().unwrap();
        assert!(row.contains("B") && row.get("B").is_none());
        assert!(row.contains("L") && row.get("L").is_none());
    }

    #[test]
    fn filldown_carries_into_later_rows_until_cleared() {
        let values = values(&[("F", ValueFlags::FILLDOWN), ("A", ValueFlags::empty())]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "F"), "carry");
        acc.set_value(id(&values, "A"), "one");
        acc.record().unwrap();

        acc.set_value(id(&values, "A"), "two");
        let row = acc.record().unwrap();
        assert_eq!(row.text("F"), Some("carry"));

        acc.clear_all();
        acc.set_value(id(&values, "A"), "three");
        let row = acc.record().unwrap();
        assert_eq!(row.text("F"), Some(""));
    }

    #[test]
    fn required_value_missing_discards_the_record() {
        let values = values(&[("R", ValueFlags::REQUIRED), ("A", ValueFlags::empty())]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "A"), "dropped");
        assert!(acc.record().is_none());

        acc.set_value(id(&values, "R"), "present");
        let row = acc.record().unwrap();
        assert_eq!(row.text("R"), Some("present"));
        // the discarded record did not leak into this one
        assert_eq!(row.text("A"), Some(""));
    }

    #[test]
    fn list_values_accumulate_between_records() {
        let values = values(&[("L", ValueFlags::LIST)]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "L"), "a");
        acc.set_value(id(&values, "L"), "b");
        let row = acc.record().unwrap();
        assert_eq!(row.list("L"), Some(&["a".to_string(), "b".to_string()][..]));

        acc.set_value(id(&values, "L"), "c");
        let row = acc.record().unwrap();
        assert_eq!(row.list("L"), Some(&["c".to_string()][..]));
    }

    #[test]
    fn filldown_list_keeps_growing_across_records() {
        let values = values(&[("L", ValueFlags::FILLDOWN | ValueFlags::LIST)]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "L"), "a");
        acc.record().unwrap();

        acc.set_value(id(&values, "L"), "b");
        let row = acc.record().unwrap();
        assert_eq!(row.list("L"), Some(&["a".to_string(), "b".to_string()][..]));
    }

    #[test]
    fn fillup_propagates_into_earlier_rows() {
        let values = values(&[("U", ValueFlags::FILLUP), ("A", ValueFlags::empty())]);
        let options = TemplateOptions { unmatched_value: UnmatchedHandling::Null, unmatched_list: UnmatchedHandling::Null };
        let mut acc = RowAccumulator::new(&values, options);

        acc.set_value(id(&values, "A"), "one");
        acc.record().unwrap();
        acc.set_value(id(&values, "A"), "two");
        acc.record().unwrap();

        acc.set_value(id(&values, "U"), "up");
        acc.set_value(id(&values, "A"), "three");
        acc.record().unwrap();

        let rows = acc.into_rows();
        assert_eq!(rows[0].text("U"), Some("up"));
        assert_eq!(rows[1].text("U"), Some("up"));
        assert_eq!(rows[2].text("U"), Some("up"));
    }

    #[test]
    fn fillup_list_backfills_earlier_rows() {
        let values = values(&[("BOOT", ValueFlags::FILLUP | ValueFlags::LIST), ("A", ValueFlags::empty())]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "A"), "one");
        acc.record().unwrap();

        acc.set_value(id(&values, "BOOT"), "7");
        acc.set_value(id(&values, "A"), "two");
        acc.record().unwrap();

        let rows = acc.into_rows();
        assert_eq!(rows[0].list("BOOT"), Some(&["7".to_string()][..]));
        assert_eq!(rows[1].list("BOOT"), Some(&["7".to_string()][..]));
    }

    #[test]
    fn fillup_stops_at_a_populated_row() {
        let values = values(&[("U", ValueFlags::FILLUP), ("A", ValueFlags::empty())]);
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "U"), "first");
        acc.set_value(id(&values, "A"), "one");
        acc.record().unwrap();
        acc.set_value(id(&values, "A"), "two");
        acc.record().unwrap();

        acc.set_value(id(&values, "U"), "second");
        acc.set_value(id(&values, "A"), "three");
        acc.record().unwrap();

        let rows = acc.into_rows();
        assert_eq!(rows[0].text("U"), Some("first"));
        assert_eq!(rows[1].text("U"), Some("second"));
        assert_eq!(rows[2].text("U"), Some("second"));
    }

    #[test]
    fn metadata_only_matches_do_not_emit_rows() {
        let defs = vec![
            ValueDefinition::new("LINE", ValueFlags::METADATA, "Line"),
            ValueDefinition::new("A", ValueFlags::empty(), r"\S+"),
        ];
        let values = ValueSet::build(&defs).unwrap();
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_metadata(&MetadataSnapshot { line: 3, text: Some("x".into()), state: "Start".into(), rule_index: 0 });
        assert!(acc.record().is_none());

        acc.set_value(id(&values, "A"), "x");
        acc.set_metadata(&MetadataSnapshot { line: 4, text: Some("y".into()), state: "Start".into(), rule_index: 1 });
        let row = acc.record().unwrap();
        assert_eq!(row.text("LINE"), Some("4"));
    }

    #[test]
    fn list_metadata_collects_every_match() {
        let defs = vec![
            ValueDefinition::new("LINES", ValueFlags::METADATA | ValueFlags::LIST, "Line"),
            ValueDefinition::new("A", ValueFlags::empty(), r"\S+"),
        ];
        let values = ValueSet::build(&defs).unwrap();
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        for line in 1..=3 {
            acc.set_value(id(&values, "A"), "x");
            acc.set_metadata(&MetadataSnapshot { line, text: Some("x".into()), state: "Start".into(), rule_index: 0 });
        }
        let row = acc.record().unwrap();
        assert_eq!(row.list("LINES"), Some(&["1".to_string(), "2".to_string(), "3".to_string()][..]));
    }

    #[test]
    fn regex_values_never_become_columns() {
        let defs = vec![
            ValueDefinition::new("_NUM", ValueFlags::REGEX, r"\d+"),
            ValueDefinition::new("A", ValueFlags::empty(), "${_NUM}"),
        ];
        let values = ValueSet::build(&defs).unwrap();
        let mut acc = RowAccumulator::new(&values, TemplateOptions::default());

        acc.set_value(id(&values, "A"), "7");
        let row = acc.record().unwrap();
        assert!(!row.contains("_NUM"));
        assert!(!row.contains("_BASE_10_NUMBER"));
        assert_eq!(row.text("A"), Some("7"));
    }
}
