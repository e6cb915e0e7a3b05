use std::collections::BTreeSet;
use std::mem;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{CacheConfig, ListPolicy};
use crate::error::Result;
use crate::graph::{as_reference, EntityId, FieldPath, NodeSource};
use crate::selection::{collect_fields, FieldGroup, FragmentLookup, Query, SelectionSet, Variables};
use crate::write::{typename_of, TYPENAME_FIELD};

/// A field the reader could not resolve. This is a value, not an error:
/// it travels with partial results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingField {
    /// Position in the result.
    pub path: FieldPath,
    pub message: String,
}

/// Everything one traversal produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    /// Whatever could be resolved; missing fields are absent.
    pub result: Value,
    pub complete: bool,
    pub missing: Vec<MissingField>,
    /// Every id the traversal visited, found or not.
    pub dependencies: BTreeSet<EntityId>,
}

/// Walk the query's selection over `source`.
///
/// Only fragment resolution errors fail a read. Absent fields, absent
/// nodes and dangling references are reported as [`MissingField`]s, except
/// for dangling list elements which follow the field's [`ListPolicy`].
pub(crate) fn read_query<'a, S>(source: &'a S, config: &'a CacheConfig, query: &'a Query) -> Result<ReadOutcome>
where
    S: NodeSource + ?Sized,
{
    let root_id = query.root_id.clone().unwrap_or_else(|| source.root_id().clone());
    let document = &*query.document;
    let mut reader = Reader {
        source,
        config,
        fragments: document.fragment_lookup(),
        variables: &query.variables,
        missing: Vec::new(),
        dependencies: BTreeSet::new(),
        built: Vec::new(),
        pending: Vec::new(),
    };

    reader.dependencies.insert(root_id.clone());
    let trail = FieldPath::root();
    let result = match source.node(&root_id) {
        Some(node) => match node.data() {
            Value::Object(object) => {
                let slot = reader.slot();
                reader.run(Step::Object {
                    slot,
                    container: root_id,
                    base: FieldPath::root(),
                    object,
                    sets: vec![document.selection()],
                    typename: node.typename().or_else(|| typename_of(object)),
                    trail,
                })?;
                reader.assemble().unwrap_or_else(|| Value::Object(Map::new()))
            }
            _ => {
                reader.missing(&trail, format!("`{}` does not hold an object", root_id));
                Value::Object(Map::new())
            }
        },
        None => {
            reader.missing(&trail, format!("`{}` is not in the cache", root_id));
            Value::Object(Map::new())
        }
    };

    Ok(ReadOutcome {
        complete: reader.missing.is_empty(),
        result,
        missing: reader.missing,
        dependencies: reader.dependencies,
    })
}

/// One unit of pending work. Every step fills the result slot it names;
/// `trail` is the position in the result.
enum Step<'a> {
    /// Read the selected fields of an object stored in `container` at `base`.
    Object {
        slot: usize,
        container: EntityId,
        base: FieldPath,
        object: &'a Map<String, Value>,
        sets: Vec<&'a SelectionSet>,
        typename: Option<&'a str>,
        trail: FieldPath,
    },
    /// Resolve one selected field of such an object. `trail` is the
    /// object's own position.
    Field {
        slot: usize,
        container: EntityId,
        base: FieldPath,
        object: &'a Map<String, Value>,
        group: Rc<FieldGroup<'a>>,
        typename: Option<&'a str>,
        trail: FieldPath,
    },
    /// Resolve a stored value against a field's sub-selection.
    Value {
        slot: usize,
        container: EntityId,
        path: FieldPath,
        group: Rc<FieldGroup<'a>>,
        value: &'a Value,
        policy: ListPolicy,
        trail: FieldPath,
    },
    /// Follow a reference into its node.
    Reference {
        slot: usize,
        target: EntityId,
        group: Rc<FieldGroup<'a>>,
        trail: FieldPath,
    },
}

/// A result slot. Children always sit after their parent.
enum Built<'a> {
    Missing,
    Value(Value),
    Object(Vec<(&'a str, usize)>),
    List(Vec<usize>),
}

struct Reader<'a, S: ?Sized> {
    source: &'a S,
    config: &'a CacheConfig,
    fragments: Option<&'a dyn FragmentLookup>,
    variables: &'a Variables,
    missing: Vec<MissingField>,
    dependencies: BTreeSet<EntityId>,
    built: Vec<Built<'a>>,
    /// Follow-up steps of the step being run, in selection order.
    pending: Vec<Step<'a>>,
}

impl<'a, S> Reader<'a, S>
where
    S: NodeSource + ?Sized,
{
    fn missing(&mut self, trail: &FieldPath, message: impl Into<String>) {
        self.missing.push(MissingField {
            path: trail.clone(),
            message: message.into(),
        });
    }

    fn slot(&mut self) -> usize {
        self.built.push(Built::Missing);
        self.built.len() - 1
    }

    /// Drain the work stack depth first, so missing fields are reported in
    /// selection order.
    fn run(&mut self, first: Step<'a>) -> Result<()> {
        let mut stack = vec![first];
        while let Some(step) = stack.pop() {
            match step {
                Step::Object {
                    slot,
                    container,
                    base,
                    object,
                    sets,
                    typename,
                    trail,
                } => {
                    let groups = collect_fields(&sets, typename, self.fragments, self.variables)?;
                    let mut fields = Vec::with_capacity(groups.len());
                    for group in groups {
                        let child = self.slot();
                        fields.push((group.response_key(), child));
                        self.pending.push(Step::Field {
                            slot: child,
                            container: container.clone(),
                            base: base.clone(),
                            object,
                            group: Rc::new(group),
                            typename,
                            trail: trail.clone(),
                        });
                    }
                    self.built[slot] = Built::Object(fields);
                }
                Step::Field {
                    slot,
                    container,
                    base,
                    object,
                    group,
                    typename,
                    trail,
                } => self.read_field(slot, container, &base, object, group, typename, &trail),
                Step::Value {
                    slot,
                    container,
                    path,
                    group,
                    value,
                    policy,
                    trail,
                } => self.resolve_value(slot, container, path, group, value, policy, trail),
                Step::Reference {
                    slot,
                    target,
                    group,
                    trail,
                } => self.resolve_reference(slot, target, group, trail),
            }
            stack.extend(self.pending.drain(..).rev());
        }
        Ok(())
    }

    fn read_field(
        &mut self,
        slot: usize,
        container: EntityId,
        base: &FieldPath,
        object: &'a Map<String, Value>,
        group: Rc<FieldGroup<'a>>,
        typename: Option<&'a str>,
        trail: &FieldPath,
    ) {
        let field = group.field;
        let trail = trail.child_key(group.response_key());

        if field.name == TYPENAME_FIELD && group.is_leaf() {
            match object.get(TYPENAME_FIELD).and_then(Value::as_str).or(typename) {
                Some(typename) => self.built[slot] = Built::Value(Value::String(typename.to_string())),
                None => self.missing(&trail, "typename is unknown"),
            }
            return;
        }

        let path = base.child_key(field.name.as_str());
        let policy = self.config.list_policy(typename, &field.name);
        if !field.is_parameterized() {
            match object.get(field.name.as_str()) {
                Some(value) => self.pending.push(Step::Value {
                    slot,
                    container,
                    path,
                    group,
                    value,
                    policy,
                    trail,
                }),
                None => self.missing(&trail, format!("no value for `{}`", field.name)),
            }
            return;
        }

        let arguments = field.resolve_arguments(self.variables);
        let parameterized = EntityId::parameterized(&container, &path, &arguments);
        self.dependencies.insert(parameterized.clone());
        let source = self.source;
        if let Some(node) = source.node(&parameterized) {
            self.pending.push(Step::Value {
                slot,
                container: parameterized,
                path: FieldPath::root(),
                group,
                value: node.data(),
                policy,
                trail,
            });
            return;
        }
        let redirected = self
            .config
            .redirect(typename, &field.name)
            .and_then(|redirect| redirect(&arguments));
        match redirected {
            Some(target) => self.pending.push(Step::Reference {
                slot,
                target,
                group,
                trail,
            }),
            None => self.missing(&trail, format!("no value for `{}` with these arguments", field.name)),
        }
    }

    fn resolve_value(
        &mut self,
        slot: usize,
        container: EntityId,
        path: FieldPath,
        group: Rc<FieldGroup<'a>>,
        value: &'a Value,
        policy: ListPolicy,
        trail: FieldPath,
    ) {
        if group.is_leaf() {
            self.built[slot] = Built::Value(value.clone());
            return;
        }

        match value {
            Value::Null => self.built[slot] = Built::Value(Value::Null),
            Value::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if let Some(target) = as_reference(item) {
                        if self.source.node(target).is_none() {
                            self.dependencies.insert(EntityId::new(target));
                            if policy == ListPolicy::PreserveNull {
                                let hole = self.slot();
                                self.built[hole] = Built::Value(Value::Null);
                                elements.push(hole);
                            }
                            continue;
                        }
                    }
                    let position = elements.len();
                    let element = self.slot();
                    elements.push(element);
                    self.pending.push(Step::Value {
                        slot: element,
                        container: container.clone(),
                        path: path.child_index(index),
                        group: group.clone(),
                        value: item,
                        policy,
                        trail: trail.child_index(position),
                    });
                }
                self.built[slot] = Built::List(elements);
            }
            Value::Object(object) => match as_reference(value) {
                Some(target) => self.pending.push(Step::Reference {
                    slot,
                    target: EntityId::new(target),
                    group,
                    trail,
                }),
                None => self.pending.push(Step::Object {
                    slot,
                    container,
                    base: path,
                    object,
                    sets: group.children().to_vec(),
                    typename: typename_of(object),
                    trail,
                }),
            },
            _ => self.missing(&trail, "stored value is not an object"),
        }
    }

    fn resolve_reference(
        &mut self,
        slot: usize,
        target: EntityId,
        group: Rc<FieldGroup<'a>>,
        trail: FieldPath,
    ) {
        self.dependencies.insert(target.clone());
        let source = self.source;
        let Some(node) = source.node(&target) else {
            self.missing(&trail, format!("dangling reference to `{}`", target));
            return;
        };
        let Value::Object(object) = node.data() else {
            self.missing(&trail, format!("`{}` does not hold an object", target));
            return;
        };
        self.pending.push(Step::Object {
            slot,
            container: target,
            base: FieldPath::root(),
            object,
            sets: group.children().to_vec(),
            typename: node.typename().or_else(|| typename_of(object)),
            trail,
        });
    }

    /// Build the result from the filled slots, children first. Missing
    /// object fields are left out and missing list elements become null.
    fn assemble(&mut self) -> Option<Value> {
        let mut values: Vec<Option<Value>> = (0..self.built.len()).map(|_| None).collect();
        for index in (0..self.built.len()).rev() {
            let value = match mem::replace(&mut self.built[index], Built::Missing) {
                Built::Missing => None,
                Built::Value(value) => Some(value),
                Built::Object(fields) => Some(Value::Object(
                    fields
                        .into_iter()
                        .filter_map(|(key, child)| values[child].take().map(|value| (key.to_string(), value)))
                        .collect(),
                )),
                Built::List(elements) => Some(Value::Array(
                    elements
                        .into_iter()
                        .map(|child| values[child].take().unwrap_or(Value::Null))
                        .collect(),
                )),
            };
            values[index] = value;
        }
        values.into_iter().next().flatten()
    }
}
