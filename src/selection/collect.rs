use std::collections::HashMap;
use std::slice;

use crate::error::{CacheError, Result};

use super::analyzer::{lookup, FragmentLookup};
use super::ast::{is_included, Field, Selection, SelectionSet, Variables};

/// All selections of one response key on one object, merged.
#[derive(Debug, Clone)]
pub(crate) struct FieldGroup<'a> {
    pub(crate) field: &'a Field,
    children: Vec<&'a SelectionSet>,
}

impl<'a> FieldGroup<'a> {
    pub(crate) fn response_key(&self) -> &'a str {
        self.field.response_key()
    }

    /// Child selections of every merged occurrence of the field.
    pub(crate) fn children(&self) -> &[&'a SelectionSet] {
        &self.children
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

fn type_applies(condition: Option<&str>, typename: Option<&str>) -> bool {
    match (condition, typename) {
        (Some(condition), Some(typename)) => condition == typename,
        _ => true,
    }
}

/// Flatten `sets` into the fields that apply to an object of `typename`.
///
/// Inline fragments and spreads are expanded in place, `@skip`/`@include`
/// are honoured, and fields sharing a response key are merged. The walk
/// keeps its own stack of open selection sets; a spread whose fragment is
/// already open on that stack is a cycle.
pub(crate) fn collect_fields<'a>(
    sets: &[&'a SelectionSet],
    typename: Option<&str>,
    fragments: Option<&'a dyn FragmentLookup>,
    variables: &Variables,
) -> Result<Vec<FieldGroup<'a>>> {
    let mut groups: Vec<FieldGroup<'a>> = Vec::new();
    let mut positions: HashMap<&'a str, usize> = HashMap::new();

    for set in sets {
        let mut stack: Vec<(slice::Iter<'a, Selection>, Option<&'a str>)> =
            vec![(set.items.iter(), None)];

        while let Some((items, _)) = stack.last_mut() {
            let Some(item) = items.next() else {
                stack.pop();
                continue;
            };

            match item {
                Selection::Field(field) => {
                    if !is_included(&field.directives, variables) {
                        continue;
                    }
                    match positions.get(field.response_key()) {
                        Some(&position) => {
                            if let Some(children) = &field.selection {
                                groups[position].children.push(children);
                            }
                        }
                        None => {
                            positions.insert(field.response_key(), groups.len());
                            groups.push(FieldGroup {
                                field,
                                children: field.selection.iter().collect(),
                            });
                        }
                    }
                }
                Selection::InlineFragment(inline) => {
                    if is_included(&inline.directives, variables)
                        && type_applies(inline.type_condition.as_deref(), typename)
                    {
                        stack.push((inline.selection.items.iter(), None));
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !is_included(&spread.directives, variables) {
                        continue;
                    }
                    let fragment = lookup(fragments, &spread.name)?;
                    let name = spread.name.as_str();
                    if stack.iter().any(|(_, open)| *open == Some(name)) {
                        return Err(CacheError::FragmentCycle {
                            name: name.to_string(),
                        });
                    }
                    if type_applies(Some(&fragment.type_condition), typename) {
                        stack.push((fragment.selection.items.iter(), Some(name)));
                    }
                }
            }
        }
    }

    Ok(groups)
}
