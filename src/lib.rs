extern crate self as textfsm;

#[macro_use]
mod macros;

mod cache;
mod definition;
mod error;
mod explain;
mod fsm;
mod grammar;
mod library;
mod rows;
mod template;

pub use cache::{CacheStats, TemplateCache};
pub use definition::{
    ActionDefinition, FilterDefinition, RuleDefinition, StateDefinition, TemplateDefinition, ValueDefinition,
};
pub use error::{ParseErrorKind, RunError, TemplateError};
pub use explain::{Disposition, Explanation, RuleTrace, TraceEvent};
pub use rows::{Row, Value};
pub use template::{
    LineAction, MetadataKind, RecordAction, Template, TemplateOptions, UnmatchedHandling, ValueDescriptor,
    ValueFlags,
};
