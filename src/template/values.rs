//! Value descriptors and placeholder expansion.
//!
//! A template's `Value` declarations compile into a [`ValueSet`]: the ordered collection of
//! descriptors that rule patterns reference through `$NAME` / `${NAME}` placeholders and that
//! rows are keyed by. Expansion happens in two modes:
//!
//! - value patterns may splice in previously defined `Regex` values, resolved at build time
//! - rule patterns turn each non-`Regex` placeholder into a named capture group, `Regex`
//!   placeholders into inline pattern text, and `$$` into a literal `$`
//!
//! Capture group names are synthesized (`v0`, `v1`, ...) because value names allow characters
//! that regex group names do not, and because the same value may appear more than once in a
//! single pattern.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use regex::Regex;

use crate::definition::ValueDefinition;
use crate::error::ParseErrorKind;
use crate::library;

pub(crate) type ValueId = usize;

bitflags! {
    /// Behavior flags attached to a value declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValueFlags: u8 {
        /// Carry the last seen value forward into subsequent records.
        const FILLDOWN = 1 << 0;
        /// Informational tag marking the value as a row key.
        const KEY = 1 << 1;
        /// Discard records where this value was never set.
        const REQUIRED = 1 << 2;
        /// Accumulate every capture into a list instead of overwriting.
        const LIST = 1 << 3;
        /// Propagate a captured value backwards into earlier empty rows.
        const FILLUP = 1 << 4;
        /// The value is synthesized from run state rather than captured.
        const METADATA = 1 << 5;
        /// The value is a named sub-pattern for reuse, not a column.
        const REGEX = 1 << 6;
    }
}

impl ValueFlags {
    /// Parses a single flag keyword, e.g. `Filldown`.
    pub(crate) fn from_keyword(word: &str) -> Option<ValueFlags> {
        match word {
            "Filldown" => Some(ValueFlags::FILLDOWN),
            "Key" => Some(ValueFlags::KEY),
            "Required" => Some(ValueFlags::REQUIRED),
            "List" => Some(ValueFlags::LIST),
            "Fillup" => Some(ValueFlags::FILLUP),
            "Metadata" => Some(ValueFlags::METADATA),
            "Regex" => Some(ValueFlags::REGEX),
            _ => None,
        }
    }
}

impl fmt::Display for ValueFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ValueFlags, &str); 7] = [
            (ValueFlags::FILLDOWN, "Filldown"),
            (ValueFlags::KEY, "Key"),
            (ValueFlags::REQUIRED, "Required"),
            (ValueFlags::LIST, "List"),
            (ValueFlags::FILLUP, "Fillup"),
            (ValueFlags::METADATA, "Metadata"),
            (ValueFlags::REGEX, "Regex"),
        ];

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// The run-state quantity a `Metadata` value reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    /// The 1-based input line number of the match.
    Line,
    /// The text of the matched input line.
    Text,
    /// The name of the state that was active at the match.
    State,
    /// The index of the matched rule within its state.
    RuleIndex,
}

impl MetadataKind {
    fn parse(text: &str) -> Option<MetadataKind> {
        match text {
            "Line" => Some(MetadataKind::Line),
            "Text" => Some(MetadataKind::Text),
            "State" => Some(MetadataKind::State),
            "RuleIndex" => Some(MetadataKind::RuleIndex),
            _ => None,
        }
    }
}

/// A compiled value declaration.
///
/// Value patterns may contain their own grouping, but named capture groups inside them are
/// not supported: captures are attributed through synthesized group names, and a pattern
/// that declares its own named groups is the author's responsibility.
#[derive(Debug, Clone)]
pub struct ValueDescriptor {
    /// The declared name.
    pub name: String,
    /// The declared flags.
    pub flags: ValueFlags,
    /// The pattern text after splicing in referenced `Regex` values.
    pub pattern: String,
    pub(crate) metadata: Option<MetadataKind>,
    pub(crate) regex: Regex,
}

impl ValueDescriptor {
    pub(crate) fn build(def: &ValueDefinition, resolved: &HashMap<String, ValueDescriptor>) -> Result<ValueDescriptor, ParseErrorKind> {
        let pattern = expand_value_pattern(&def.name, &def.pattern, resolved)?;

        let regex = Regex::new(&pattern).map_err(|err| ParseErrorKind::InvalidValuePattern {
            name: def.name.clone(),
            reason: err.to_string(),
        })?;

        let metadata = if def.flags.contains(ValueFlags::METADATA) {
            match MetadataKind::parse(&pattern) {
                Some(kind) => Some(kind),
                None => {
                    return Err(ParseErrorKind::InvalidMetadataType { name: def.name.clone(), kind: pattern });
                }
            }
        } else {
            None
        };

        Ok(ValueDescriptor { name: def.name.clone(), flags: def.flags, pattern, metadata, regex })
    }
}

impl fmt::Display for ValueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.is_empty() {
            write!(f, "Value {} ({})", self.name, self.pattern)
        } else {
            write!(f, "Value {} {} ({})", self.flags, self.name, self.pattern)
        }
    }
}

/// The ordered set of value descriptors a template was compiled with.
#[derive(Debug, Clone)]
pub(crate) struct ValueSet {
    descriptors: Vec<ValueDescriptor>,
    by_name: HashMap<String, ValueId>,
    // declared names sorted longest first, for greedy `$NAME` placeholder resolution
    names_by_len: Vec<(String, ValueId)>,
}

impl ValueSet {
    /// Builds the set from user declarations, seeded with the built-in `Regex` library.
    ///
    /// A user value may reuse a library name, in which case it replaces the built-in. Library
    /// values that were not overridden come first, in library order, followed by user values in
    /// declaration order.
    pub(crate) fn build(definitions: &[ValueDefinition]) -> Result<ValueSet, ParseErrorKind> {
        let mut resolved: HashMap<String, ValueDescriptor> =
            library::descriptors().iter().map(|desc| (desc.name.clone(), desc.clone())).collect();

        let mut user: Vec<ValueDescriptor> = Vec::with_capacity(definitions.len());
        for def in definitions {
            if user.iter().any(|existing| existing.name == def.name) {
                return Err(ParseErrorKind::DuplicateValueName(def.name.clone()));
            }

            let descriptor = ValueDescriptor::build(def, &resolved)?;
            resolved.insert(descriptor.name.clone(), descriptor.clone());
            user.push(descriptor);
        }

        let mut descriptors: Vec<ValueDescriptor> = library::descriptors()
            .iter()
            .filter(|desc| !user.iter().any(|overriding| overriding.name == desc.name))
            .cloned()
            .collect();
        descriptors.extend(user);

        let by_name = descriptors.iter().enumerate().map(|(id, desc)| (desc.name.clone(), id)).collect();

        let mut names_by_len: Vec<(String, ValueId)> =
            descriptors.iter().enumerate().map(|(id, desc)| (desc.name.clone(), id)).collect();
        names_by_len.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Ok(ValueSet { descriptors, by_name, names_by_len })
    }

    pub(crate) fn get(&self, name: &str) -> Option<(ValueId, &ValueDescriptor)> {
        self.by_name.get(name).map(|&id| (id, &self.descriptors[id]))
    }

    pub(crate) fn descriptor(&self, id: ValueId) -> &ValueDescriptor {
        &self.descriptors[id]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ValueId, &ValueDescriptor)> {
        self.descriptors.iter().enumerate()
    }

    /// Expands placeholders in a rule pattern.
    ///
    /// Returns the expanded regex text along with the synthesized capture group names and the
    /// values they feed, one entry per placeholder occurrence.
    pub(crate) fn expand_rule_pattern(&self, pattern: &str) -> Result<(String, Vec<(String, ValueId)>), ParseErrorKind> {
        let mut out = String::with_capacity(pattern.len());
        let mut groups: Vec<(String, ValueId)> = Vec::new();

        let bytes = pattern.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'$' {
                let start = i;
                while i < bytes.len() && bytes[i] != b'$' {
                    i += 1;
                }
                out.push_str(&pattern[start..i]);
                continue;
            }

            // literal dollar escape
            if bytes.get(i + 1) == Some(&b'$') {
                out.push('$');
                i += 2;
                continue;
            }

            // ${NAME} placeholder
            if bytes.get(i + 1) == Some(&b'{') {
                if let Some(close) = pattern[i + 2..].find('}') {
                    let name = &pattern[i + 2..i + 2 + close];
                    if let Some((id, _)) = self.get(name) {
                        self.substitute(id, &mut out, &mut groups);
                        i += close + 3;
                        continue;
                    }
                    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        return Err(ParseErrorKind::UndeclaredValue(name.to_string()));
                    }
                }
                out.push('$');
                i += 1;
                continue;
            }

            // $NAME placeholder; the longest declared name wins
            let rest = &pattern[i + 1..];
            if let Some(&(ref name, id)) = self.names_by_len.iter().find(|(name, _)| rest.starts_with(name.as_str())) {
                self.substitute(id, &mut out, &mut groups);
                i += 1 + name.len();
                continue;
            }

            let word_len = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').map(char::len_utf8).sum::<usize>();
            if word_len > 0 {
                return Err(ParseErrorKind::UndeclaredValue(rest[..word_len].to_string()));
            }

            out.push('$');
            i += 1;
        }

        Ok((out, groups))
    }

    fn substitute(&self, id: ValueId, out: &mut String, groups: &mut Vec<(String, ValueId)>) {
        let descriptor = &self.descriptors[id];
        if descriptor.flags.contains(ValueFlags::REGEX) {
            out.push_str(&descriptor.pattern);
        } else {
            let group = format!("v{}", groups.len());
            out.push_str(&format!("(?P<{}>{})", group, descriptor.pattern));
            groups.push((group, id));
        }
    }
}

/// Expands `${NAME}` / `$NAME ` references to `Regex` values inside a value pattern.
///
/// Unlike rule patterns there is no `$$` escape here and a bare `$NAME` reference only counts
/// when followed by whitespace or the end of the pattern, so regex anchors pass through.
fn expand_value_pattern(
    value_name: &str,
    pattern: &str,
    resolved: &HashMap<String, ValueDescriptor>,
) -> Result<String, ParseErrorKind> {
    fn is_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    }

    let resolve = |name: &str| -> Result<String, ParseErrorKind> {
        let descriptor = resolved.get(name).ok_or_else(|| ParseErrorKind::UndeclaredValue(name.to_string()))?;
        if !descriptor.flags.contains(ValueFlags::REGEX) {
            return Err(ParseErrorKind::InvalidValuePattern {
                name: value_name.to_string(),
                reason: format!("referenced value '{name}' is not a Regex value"),
            });
        }
        Ok(descriptor.pattern.clone())
    };

    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let rest = &pattern[i + 1..];
        if let Some(body) = rest.strip_prefix('{') {
            let name_len = body.chars().take_while(|&c| is_name_char(c)).map(char::len_utf8).sum::<usize>();
            if name_len > 0 && body[name_len..].starts_with('}') {
                out.push_str(&resolve(&body[..name_len])?);
                for _ in 0..name_len + 2 {
                    chars.next();
                }
                continue;
            }
        } else {
            let name_len = rest.chars().take_while(|&c| is_name_char(c)).map(char::len_utf8).sum::<usize>();
            let followed_ok = rest[name_len..].chars().next().is_none_or(char::is_whitespace);
            if name_len > 0 && followed_ok {
                out.push_str(&resolve(&rest[..name_len])?);
                for _ in 0..name_len {
                    chars.next();
                }
                continue;
            }
        }

        out.push('$');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ValueDefinition;

    fn set(defs: &[(&str, ValueFlags, &str)]) -> ValueSet {
        let defs: Vec<ValueDefinition> =
            defs.iter().map(|&(name, flags, pattern)| ValueDefinition::new(name, flags, pattern)).collect();
        ValueSet::build(&defs).unwrap()
    }

    #[test]
    fn flags_round_trip_keywords() {
        assert_eq!(ValueFlags::from_keyword("Filldown"), Some(ValueFlags::FILLDOWN));
        assert_eq!(ValueFlags::from_keyword("filldown"), None);
        let flags = ValueFlags::FILLDOWN | ValueFlags::LIST;
        assert_eq!(flags.to_string(), "Filldown,List");
    }

    #[test]
    fn rule_pattern_placeholders_become_groups() {
        let values = set(&[("NAME", ValueFlags::empty(), r"\w+"), ("PORT", ValueFlags::empty(), r"\d+")]);
        let (expanded, groups) = values.expand_rule_pattern(r"^${NAME}:$PORT$$x").unwrap();
        assert_eq!(expanded, r"^(?P<v0>\w+):(?P<v1>\d+)$x");
        assert_eq!(groups.len(), 2);
        assert_eq!(values.descriptor(groups[0].1).name, "NAME");
        assert_eq!(values.descriptor(groups[1].1).name, "PORT");
    }

    #[test]
    fn rule_pattern_longest_name_wins() {
        let values = set(&[("AB", ValueFlags::empty(), r"\w+"), ("ABC", ValueFlags::empty(), r"\d+")]);
        let (expanded, groups) = values.expand_rule_pattern("^$ABCD").unwrap();
        assert_eq!(expanded, r"^(?P<v0>\d+)D");
        assert_eq!(values.descriptor(groups[0].1).name, "ABC");
    }

    #[test]
    fn rule_pattern_regex_values_are_inlined() {
        let values = set(&[("NUM", ValueFlags::empty(), "${_NON_NEGATIVE_INTEGER}")]);
        let (expanded, groups) = values.expand_rule_pattern("^count ${NUM}").unwrap();
        assert_eq!(expanded, r"^count (?P<v0>\b(?:[0-9]+)\b)");
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn rule_pattern_undeclared_placeholder_fails() {
        let values = set(&[("NAME", ValueFlags::empty(), r"\w+")]);
        let err = values.expand_rule_pattern("^${MISSING}").unwrap_err();
        assert!(matches!(err, ParseErrorKind::UndeclaredValue(name) if name == "MISSING"));
        let err = values.expand_rule_pattern("^$missing").unwrap_err();
        assert!(matches!(err, ParseErrorKind::UndeclaredValue(name) if name == "missing"));
    }

    #[test]
    fn rule_pattern_bare_dollar_stays_literal() {
        let values = set(&[("NAME", ValueFlags::empty(), r"\w+")]);
        let (expanded, groups) = values.expand_rule_pattern(r"^foo\s*$").unwrap();
        assert_eq!(expanded, r"^foo\s*$");
        assert!(groups.is_empty());
    }

    #[test]
    fn value_pattern_reference_requires_regex_flag() {
        let defs = vec![
            ValueDefinition::new("PLAIN", ValueFlags::empty(), r"\w+"),
            ValueDefinition::new("BROKEN", ValueFlags::empty(), "${PLAIN}"),
        ];
        let err = ValueSet::build(&defs).unwrap_err();
        assert!(matches!(err, ParseErrorKind::InvalidValuePattern { name, .. } if name == "BROKEN"));
    }

    #[test]
    fn user_value_overrides_library_entry() {
        let values = set(&[("_WORD", ValueFlags::REGEX, "[a-z]+"), ("W", ValueFlags::empty(), "${_WORD}")]);
        let (id, descriptor) = values.get("_WORD").unwrap();
        assert_eq!(descriptor.pattern, "[a-z]+");
        // the override sits in user declaration order, after the remaining library values
        assert!(id + 2 == values.iter().count());
        assert_eq!(values.get("W").unwrap().1.pattern, "[a-z]+");
    }

    #[test]
    fn duplicate_user_value_fails() {
        let defs = vec![
            ValueDefinition::new("NAME", ValueFlags::empty(), r"\w+"),
            ValueDefinition::new("NAME", ValueFlags::empty(), r"\d+"),
        ];
        assert!(matches!(ValueSet::build(&defs).unwrap_err(), ParseErrorKind::DuplicateValueName(_)));
    }

    #[test]
    fn metadata_kind_is_parsed_from_pattern() {
        let values = set(&[("LINE", ValueFlags::METADATA, "Line"), ("N", ValueFlags::empty(), r"\d+")]);
        assert_eq!(values.get("LINE").unwrap().1.metadata, Some(MetadataKind::Line));

        let defs = vec![ValueDefinition::new("BAD", ValueFlags::METADATA, "Bogus")];
        let err = ValueSet::build(&defs).unwrap_err();
        assert!(matches!(err, ParseErrorKind::InvalidMetadataType { kind, .. } if kind == "Bogus"));
    }
}
