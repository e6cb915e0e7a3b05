use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::graph::{reference, EntityId, FieldPath, GraphEditor, NodeKind, NodeSource};
use crate::selection::{collect_fields, FieldGroup, FragmentLookup, Query, SelectionSet, Variables};

pub(crate) const TYPENAME_FIELD: &str = "__typename";

pub(crate) fn typename_of(object: &Map<String, Value>) -> Option<&str> {
    object.get(TYPENAME_FIELD).and_then(Value::as_str)
}

/// Normalize `data` into the editor, starting at the query's root.
///
/// Objects the identity function recognises become their own nodes and
/// are replaced by references. Fields with arguments or an alias are stored
/// in parameterized slot nodes linked from their container. Everything else
/// is stored inline, replacing whatever was at that path before.
///
/// The payload is walked with an explicit stack, so nesting depth is bounded
/// by memory rather than by the call stack.
pub(crate) fn write_query<'a>(
    editor: &mut GraphEditor,
    config: &'a CacheConfig,
    query: &'a Query,
    data: &'a Value,
) -> Result<()> {
    let Value::Object(object) = data else {
        return Err(CacheError::write(&FieldPath::root(), "query result must be an object"));
    };

    let root_id = query.root_id.clone().unwrap_or_else(|| config.root_id.clone());
    let typename = if root_id == config.root_id {
        Some(config.root_typename.clone())
    } else {
        typename_of(object)
            .map(str::to_string)
            .or_else(|| editor.node(&root_id).and_then(|node| node.typename().map(str::to_string)))
    };
    editor.ensure_node(&root_id, NodeKind::Entity, typename.as_deref());

    let document = &*query.document;
    let mut writer = Writer {
        editor,
        config,
        fragments: document.fragment_lookup(),
        variables: &query.variables,
    };
    writer.run(Task::Fields {
        container: root_id,
        base: FieldPath::root(),
        sets: vec![document.selection()],
        typename,
        object,
        trail: FieldPath::root(),
    })
}

/// One unit of pending work. `trail` is the position in the payload, used
/// in error messages.
enum Task<'a> {
    /// Expand the selected fields of `object`, stored in `container` under
    /// `base`.
    Fields {
        container: EntityId,
        base: FieldPath,
        sets: Vec<&'a SelectionSet>,
        typename: Option<String>,
        object: &'a Map<String, Value>,
        trail: FieldPath,
    },
    /// Write one selected field of `object`.
    Field {
        container: EntityId,
        base: FieldPath,
        group: Rc<FieldGroup<'a>>,
        object: &'a Map<String, Value>,
        trail: FieldPath,
    },
    /// Store `value` at `path` according to the field's sub-selection.
    Value {
        container: EntityId,
        path: FieldPath,
        group: Rc<FieldGroup<'a>>,
        value: &'a Value,
        trail: FieldPath,
    },
    /// Point `path` at an entity whose fields have been written.
    Link {
        container: EntityId,
        path: FieldPath,
        target: EntityId,
    },
}

struct Writer<'a, 'e> {
    editor: &'e mut GraphEditor,
    config: &'a CacheConfig,
    fragments: Option<&'a dyn FragmentLookup>,
    variables: &'a Variables,
}

impl<'a, 'e> Writer<'a, 'e> {
    /// Drain the work stack. Tasks run in payload order: a task's follow-ups
    /// all finish before its next sibling starts.
    fn run(&mut self, first: Task<'a>) -> Result<()> {
        let mut stack = vec![first];
        let mut next = Vec::new();
        while let Some(task) = stack.pop() {
            match task {
                Task::Fields {
                    container,
                    base,
                    sets,
                    typename,
                    object,
                    trail,
                } => {
                    let groups = collect_fields(&sets, typename.as_deref(), self.fragments, self.variables)?;
                    next.extend(groups.into_iter().map(|group| Task::Field {
                        container: container.clone(),
                        base: base.clone(),
                        group: Rc::new(group),
                        object,
                        trail: trail.clone(),
                    }));
                }
                Task::Field {
                    container,
                    base,
                    group,
                    object,
                    trail,
                } => self.write_field(container, &base, group, object, &trail, &mut next)?,
                Task::Value {
                    container,
                    path,
                    group,
                    value,
                    trail,
                } => self.write_value(container, path, group, value, trail, &mut next)?,
                Task::Link { container, path, target } => {
                    self.editor.set_value(&container, &path, reference(&target));
                }
            }
            stack.extend(next.drain(..).rev());
        }
        Ok(())
    }

    fn write_field(
        &mut self,
        container: EntityId,
        base: &FieldPath,
        group: Rc<FieldGroup<'a>>,
        object: &'a Map<String, Value>,
        trail: &FieldPath,
        next: &mut Vec<Task<'a>>,
    ) -> Result<()> {
        let key = group.response_key();
        let trail = trail.child_key(key);
        let Some(value) = object.get(key) else {
            if self.config.strict {
                return Err(CacheError::write(&trail, "field is missing from the payload"));
            }
            warn!(container = %container, field = %trail, "write.field_missing");
            return Ok(());
        };

        let field = group.field;
        let path = base.child_key(field.name.as_str());
        let (container, path) = if field.is_parameterized() {
            let arguments = field.resolve_arguments(self.variables);
            let slot = EntityId::parameterized(&container, &path, &arguments);
            self.editor.ensure_node(&slot, NodeKind::Parameterized, None);
            self.editor.link_parameterized(&container, &path, &slot);
            (slot, FieldPath::root())
        } else {
            (container, path)
        };
        next.push(Task::Value {
            container,
            path,
            group,
            value,
            trail,
        });
        Ok(())
    }

    fn write_value(
        &mut self,
        container: EntityId,
        path: FieldPath,
        group: Rc<FieldGroup<'a>>,
        value: &'a Value,
        trail: FieldPath,
        next: &mut Vec<Task<'a>>,
    ) -> Result<()> {
        if group.is_leaf() {
            self.editor.set_value(&container, &path, value.clone());
            return Ok(());
        }

        match value {
            Value::Null => self.editor.set_value(&container, &path, Value::Null),
            Value::Array(items) => {
                self.editor
                    .set_value(&container, &path, Value::Array(vec![Value::Null; items.len()]));
                next.extend(items.iter().enumerate().map(|(index, item)| Task::Value {
                    container: container.clone(),
                    path: path.child_index(index),
                    group: group.clone(),
                    value: item,
                    trail: trail.child_index(index),
                }));
            }
            Value::Object(object) => {
                let typename = typename_of(object);
                let sets = group.children().to_vec();
                match self.config.identify(typename, object) {
                    Some(id) => {
                        self.editor.ensure_node(&id, NodeKind::Entity, typename);
                        next.push(Task::Fields {
                            container: id.clone(),
                            base: FieldPath::root(),
                            sets,
                            typename: typename.map(str::to_string),
                            object,
                            trail,
                        });
                        next.push(Task::Link {
                            container,
                            path,
                            target: id,
                        });
                    }
                    None => {
                        self.editor.set_value(&container, &path, Value::Object(Map::new()));
                        next.push(Task::Fields {
                            container,
                            base: path,
                            sets,
                            typename: typename.map(str::to_string),
                            object,
                            trail,
                        });
                    }
                }
            }
            _ => {
                return Err(CacheError::write(
                    &trail,
                    "expected an object or a list for a field with a sub-selection",
                ))
            }
        }
        Ok(())
    }
}
