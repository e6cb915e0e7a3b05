//! Selection trees handed to the cache by a query parser.
//!
//! The cache never parses query text. Callers build a [`Document`] directly
//! or deserialize one from a JSON AST, bind variables with [`Query`], and the
//! writer and reader walk it. [`is_static`] tells whether a selection can be
//! stored purely by entity identity.

mod analyzer;
mod ast;
mod collect;
mod query;

pub use analyzer::{is_static, FragmentLookup};
pub use ast::{
    ArgValue, Directive, Document, Field, Fragment, FragmentMap, FragmentSpread, InlineFragment,
    Selection, SelectionSet, Variables, STATIC_DIRECTIVE,
};
pub(crate) use collect::{collect_fields, FieldGroup};
pub use query::Query;
