//! Built-in `Regex` value library.
//!
//! Every template is seeded with these named sub-patterns, so value and rule patterns can
//! reference e.g. `${_IPV4}` or `${_WORD}` without declaring them. All entries carry the
//! `Regex` flag: they are splice-in patterns, never row columns. A template may declare a
//! value with the same name to override the built-in.

use once_cell::sync::Lazy;

use crate::definition::ValueDefinition;
use crate::template::{ValueDescriptor, ValueFlags};

static DEFINITIONS: Lazy<Vec<ValueDefinition>> = Lazy::new(|| {
    let regex = |name: &str, pattern: &str| ValueDefinition::new(name, ValueFlags::REGEX, pattern);

    vec![
        // numbers
        regex("_BASE_10_NUMBER", r"[+-]?(?:(?:[0-9]+(?:\.[0-9]+)?)|(?:\.[0-9]+))"),
        regex("_BASE_16_FLOAT", r"\b(?:[+-]?(?:0x)?(?:(?:[0-9A-Fa-f]+(?:\.[0-9A-Fa-f]*)?)|(?:\.[0-9A-Fa-f]+)))\b"),
        regex("_BASE_16_NUMBER", r"(?:[+-]?(?:0x)?(?:[0-9A-Fa-f]+))"),
        regex("_INTEGER", r"(?:[+-]?(?:[0-9]+))"),
        regex("_NON_NEGATIVE_INTEGER", r"\b(?:[0-9]+)\b"),
        regex("_NUMBER", r"(?:${_BASE_10_NUMBER})"),
        regex("_POSITIVE_INTEGER", r"\b(?:[1-9][0-9]*)\b"),
        // words
        regex("_WORD", r"\b\w+\b"),
        regex("_NOT_SPACE", r"\S+"),
        regex("_SPACE", r"\s*"),
        regex("_DATA", r".*?"),
        regex("_GREEDY_DATA", r".*"),
        regex("_QUOTED_STRING", r#"(?:"(?:\\.|[^\\"])*"|'(?:\\.|[^\\'])*'|`(?:\\.|[^\\`])*`)"#),
        regex("_UUID", r"[A-Fa-f0-9]{8}-(?:[A-Fa-f0-9]{4}-){3}[A-Fa-f0-9]{12}"),
        regex("_URN", r"urn:[0-9A-Za-z][0-9A-Za-z-]{0,31}:(?:%[0-9a-fA-F]{2}|[0-9A-Za-z()+,.:=@;$_!*'/?#-])+"),
        regex("_EMAIL_LOCAL_PART", r"[a-zA-Z0-9!#$%&'*+\-/=?^_`{|}~]{1,64}(?:\.[a-zA-Z0-9!#$%&'*+\-/=?^_`{|}~]{1,62}){0,63}"),
        regex("_HOSTNAME", r"\b(?:[0-9A-Za-z][0-9A-Za-z-]{0,62})(?:\.(?:[0-9A-Za-z][0-9A-Za-z-]{0,62}))*(?:\.?|\b)"),
        regex("_EMAIL_ADDRESS", r"${_EMAIL_LOCAL_PART}@${_HOSTNAME}"),
        // network
        regex("_MAC_ADDRESS_DOUBLE_COLON", r"(?:[A-Fa-f0-9]{2}:[A-Fa-f0-9]{2}:[A-Fa-f0-9]{2}:[A-Fa-f0-9]{2}:[A-Fa-f0-9]{2}:[A-Fa-f0-9]{2})"),
        regex("_MAC_ADDRESS_DOUBLE_DASH", r"(?:[A-Fa-f0-9]{2}-[A-Fa-f0-9]{2}-[A-Fa-f0-9]{2}-[A-Fa-f0-9]{2}-[A-Fa-f0-9]{2}-[A-Fa-f0-9]{2})"),
        regex("_MAC_ADDRESS_DOUBLE_DOT", r"(?:[A-Fa-f0-9]{2}\.[A-Fa-f0-9]{2}\.[A-Fa-f0-9]{2}\.[A-Fa-f0-9]{2}\.[A-Fa-f0-9]{2}\.[A-Fa-f0-9]{2})"),
        regex("_MAC_ADDRESS_QUAD_COLON", r"(?:[A-Fa-f0-9]{4}:[A-Fa-f0-9]{4}:[A-Fa-f0-9]{4})"),
        regex("_MAC_ADDRESS_QUAD_DOT", r"(?:[A-Fa-f0-9]{4}\.[A-Fa-f0-9]{4}\.[A-Fa-f0-9]{4})"),
        regex("_MAC_ADDRESS", r"(?:${_MAC_ADDRESS_DOUBLE_COLON}|${_MAC_ADDRESS_DOUBLE_DASH}|${_MAC_ADDRESS_DOUBLE_DOT}|${_MAC_ADDRESS_QUAD_COLON}|${_MAC_ADDRESS_QUAD_DOT})"),
        regex("_IPV6", r"(?:(?:[0-9A-Fa-f]{1,4}:){7}(?:[0-9A-Fa-f]{1,4}|:))|(?:(?:[0-9A-Fa-f]{1,4}:){6}(?::[0-9A-Fa-f]{1,4}|(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3})|:))|(?:(?:[0-9A-Fa-f]{1,4}:){5}(?:(?:(?::[0-9A-Fa-f]{1,4}){1,2})|:(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3})|:))|(?:(?:[0-9A-Fa-f]{1,4}:){4}(?:(?:(?::[0-9A-Fa-f]{1,4}){1,3})|(?:(?::[0-9A-Fa-f]{1,4})?:(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}))|:))|(?:(?:[0-9A-Fa-f]{1,4}:){3}(?:(?:(?::[0-9A-Fa-f]{1,4}){1,4})|(?:(?::[0-9A-Fa-f]{1,4}){0,2}:(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}))|:))|(?:(?:[0-9A-Fa-f]{1,4}:){2}(?:(?:(?::[0-9A-Fa-f]{1,4}){1,5})|(?:(?::[0-9A-Fa-f]{1,4}){0,3}:(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}))|:))|(?:(?:[0-9A-Fa-f]{1,4}:){1}(?:(?:(?::[0-9A-Fa-f]{1,4}){1,6})|(?:(?::[0-9A-Fa-f]{1,4}){0,4}:(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}))|:))|(?::(?:(?:(?::[0-9A-Fa-f]{1,4}){1,7})|(?:(?::[0-9A-Fa-f]{1,4}){0,5}:(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}))|:))(?:%.+)?"),
        regex("_IPV4", r"(?:(?:[0-1]?[0-9]{1,2}|2[0-4][0-9]|25[0-5])[.](?:[0-1]?[0-9]{1,2}|2[0-4][0-9]|25[0-5])[.](?:[0-1]?[0-9]{1,2}|2[0-4][0-9]|25[0-5])[.](?:[0-1]?[0-9]{1,2}|2[0-4][0-9]|25[0-5]))"),
        regex("_IP", r"(?:${_IPV6}|${_IPV4})"),
        regex("_IP_OR_HOST", r"(?:${_IP}|${_HOSTNAME})"),
        regex("_HOST_AND_PORT", r"${_IP_OR_HOST}:${_POSITIVE_INTEGER}"),
        // dates and times
        regex("_MONTH", r"\b(?:[Jj]an(?:uary|uar)?|[Ff]eb(?:ruary|ruar)?|[Mm](?:a|ä)?r(?:ch|z)?|[Aa]pr(?:il)?|[Mm]a(?:y|i)?|[Jj]un(?:e|i)?|[Jj]ul(?:y|i)?|[Aa]ug(?:ust)?|[Ss]ep(?:tember)?|[Oo](?:c|k)?t(?:ober)?|[Nn]ov(?:ember)?|[Dd]e(?:c|z)(?:ember)?)\b"),
        regex("_MONTH_NUMBER", r"(?:0?[1-9]|1[0-2])"),
        regex("_MONTH_DAY", r"(?:(?:0[1-9])|(?:[12][0-9])|(?:3[01])|[1-9])"),
        regex("_DAY", r"(?:Mon(?:day)?|Tue(?:sday)?|Wed(?:nesday)?|Thu(?:rsday)?|Fri(?:day)?|Sat(?:urday)?|Sun(?:day)?)"),
        regex("_YEAR", r"(?:\d\d){1,2}"),
        regex("_HOUR", r"(?:2[0123]|[01]?[0-9])"),
        regex("_MINUTE", r"(?:[0-5][0-9])"),
        regex("_SECOND", r"(?:(?:[0-5]?[0-9]|60)(?:[:.,][0-9]+)?)"),
        regex("_TIME", r"${_HOUR}:${_MINUTE}(?::${_SECOND})"),
        regex("_DATE_US", r"${_MONTH_NUMBER}[/-]${_MONTH_DAY}[/-]${_YEAR}"),
        regex("_DATE_EU", r"${_MONTH_DAY}[./-]${_MONTH_NUMBER}[./-]${_YEAR}"),
        regex("_DATE", r"${_DATE_US}|${_DATE_EU}"),
    ]
});

static DESCRIPTORS: Lazy<Vec<ValueDescriptor>> = Lazy::new(|| {
    let mut resolved = std::collections::HashMap::new();
    let mut descriptors = Vec::with_capacity(DEFINITIONS.len());

    for definition in DEFINITIONS.iter() {
        let descriptor = ValueDescriptor::build(definition, &resolved).unwrap();
        resolved.insert(descriptor.name.clone(), descriptor.clone());
        descriptors.push(descriptor);
    }

    descriptors
});

/// The expanded and compiled library descriptors, in library order.
pub(crate) fn descriptors() -> &'static [ValueDescriptor] {
    &DESCRIPTORS
}
