use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CacheError, Result};

use super::ast::{ArgValue, Directive, Fragment, FragmentMap, Selection, SelectionSet};

/// Resolves fragment spreads by name.
pub trait FragmentLookup {
    fn fragment(&self, name: &str) -> Option<&Fragment>;
}

impl FragmentLookup for BTreeMap<String, Fragment> {
    fn fragment(&self, name: &str) -> Option<&Fragment> {
        self.get(name)
    }
}

impl FragmentLookup for HashMap<String, Fragment> {
    fn fragment(&self, name: &str) -> Option<&Fragment> {
        self.get(name)
    }
}

/// Resolve a spread, failing when there is nothing to resolve it against.
pub(crate) fn lookup<'a>(
    fragments: Option<&'a dyn FragmentLookup>,
    name: &str,
) -> Result<&'a Fragment> {
    let fragments = fragments.ok_or(CacheError::MissingFragmentLookup)?;
    fragments
        .fragment(name)
        .ok_or_else(|| CacheError::MissingFragment {
            name: name.to_string(),
        })
}

/// Whether every field under `selection` is identity addressable: it has no
/// alias and no arguments, or carries the `@static` directive.
///
/// The whole tree is visited, including the bodies of inline fragments and
/// every spread fragment, so an unresolvable spread is reported even when a
/// parameterized field was already found. Each fragment is visited once.
pub fn is_static(
    selection: &SelectionSet,
    fragments: Option<&dyn FragmentLookup>,
) -> Result<bool> {
    let mut result = true;
    let mut visited = BTreeSet::new();
    let mut stack = vec![selection];

    while let Some(set) = stack.pop() {
        for item in &set.items {
            match item {
                Selection::Field(field) => {
                    if field.is_parameterized() {
                        result = false;
                    }
                    if let Some(children) = &field.selection {
                        stack.push(children);
                    }
                }
                Selection::InlineFragment(inline) => stack.push(&inline.selection),
                Selection::FragmentSpread(spread) => {
                    let fragment = lookup(fragments, &spread.name)?;
                    if visited.insert(spread.name.as_str()) {
                        stack.push(&fragment.selection);
                    }
                }
            }
        }
    }

    Ok(result)
}

/// Names of every variable the document can read: field arguments and
/// directive arguments under `selection` and under every fragment body.
///
/// Fragments are scanned whether or not anything spreads them, so the scan
/// never fails on an unresolvable spread.
pub(crate) fn referenced_variables(
    selection: &SelectionSet,
    fragments: Option<&FragmentMap>,
) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut sets = vec![selection];
    sets.extend(fragments.into_iter().flat_map(|map| map.values().map(|fragment| &fragment.selection)));
    let mut arguments: Vec<&ArgValue> = Vec::new();

    while let Some(set) = sets.pop() {
        for item in &set.items {
            match item {
                Selection::Field(field) => {
                    arguments.extend(field.arguments.values());
                    arguments.extend(directive_arguments(&field.directives));
                    if let Some(children) = &field.selection {
                        sets.push(children);
                    }
                }
                Selection::InlineFragment(inline) => {
                    arguments.extend(directive_arguments(&inline.directives));
                    sets.push(&inline.selection);
                }
                Selection::FragmentSpread(spread) => {
                    arguments.extend(directive_arguments(&spread.directives));
                }
            }
        }
    }

    while let Some(argument) = arguments.pop() {
        match argument {
            ArgValue::Literal(_) => {}
            ArgValue::Variable(name) => {
                names.insert(name.clone());
            }
            ArgValue::List(items) => arguments.extend(items),
            ArgValue::Object(entries) => arguments.extend(entries.values()),
        }
    }

    names
}

fn directive_arguments(directives: &[Directive]) -> impl Iterator<Item = &ArgValue> {
    directives.iter().flat_map(|directive| directive.arguments.values())
}
