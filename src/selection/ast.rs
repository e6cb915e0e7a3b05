use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

use super::analyzer::{is_static, referenced_variables, FragmentLookup};

/// Variable bindings for a query.
pub type Variables = Map<String, Value>;

/// Name of the directive that forces identity addressing on a field that
/// has arguments or an alias.
pub const STATIC_DIRECTIVE: &str = "static";

/// An argument value as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Literal(Value),
    Variable(String),
    List(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ArgValue::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        ArgValue::Variable(name.into())
    }

    /// Substitute variables. An unbound variable resolves to nothing and the
    /// enclosing argument or object entry is left out.
    pub fn resolve(&self, variables: &Variables) -> Option<Value> {
        match self {
            ArgValue::Literal(value) => Some(value.clone()),
            ArgValue::Variable(name) => variables.get(name).cloned(),
            ArgValue::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            ArgValue::Object(entries) => Some(Value::Object(resolve_entries(entries, variables))),
        }
    }
}

fn resolve_entries(entries: &BTreeMap<String, ArgValue>, variables: &Variables) -> Map<String, Value> {
    entries
        .iter()
        .filter_map(|(key, value)| value.resolve(variables).map(|value| (key.clone(), value)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, ArgValue>,
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Directive {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }
}

/// Conditional inclusion through `@skip(if:)` / `@include(if:)`.
pub(crate) fn is_included(directives: &[Directive], variables: &Variables) -> bool {
    directives.iter().all(|directive| {
        let condition = || {
            directive
                .arguments
                .get("if")
                .and_then(|value| value.resolve(variables))
                .and_then(|value| value.as_bool())
        };
        match directive.name.as_str() {
            "skip" => condition() != Some(true),
            "include" => condition() != Some(false),
            _ => true,
        }
    })
}

/// A field selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, ArgValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionSet>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            ..Field::default()
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn select(mut self, selection: SelectionSet) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Key of this field in a result object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_marked_static(&self) -> bool {
        self.directives
            .iter()
            .any(|directive| directive.name == STATIC_DIRECTIVE)
    }

    /// True when the field's storage slot depends on how it was called.
    pub fn is_parameterized(&self) -> bool {
        (!self.arguments.is_empty() || self.alias.is_some()) && !self.is_marked_static()
    }

    /// Arguments with variables substituted, as a sorted JSON object.
    pub fn resolve_arguments(&self, variables: &Variables) -> Value {
        Value::Object(resolve_entries(&self.arguments, variables))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InlineFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
    pub selection: SelectionSet,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FragmentSpread {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
    FragmentSpread(FragmentSpread),
}

/// An ordered list of selections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

impl SelectionSet {
    pub fn new() -> Self {
        SelectionSet::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.items.push(Selection::Field(field));
        self
    }

    /// A field without arguments or children.
    pub fn leaf(self, name: impl Into<String>) -> Self {
        self.field(Field::new(name))
    }

    /// Several leaf fields at once.
    pub fn fields<'a>(self, names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().fold(self, |set, name| set.leaf(name))
    }

    pub fn inline(mut self, type_condition: Option<&str>, selection: SelectionSet) -> Self {
        self.items.push(Selection::InlineFragment(InlineFragment {
            type_condition: type_condition.map(str::to_string),
            directives: Vec::new(),
            selection,
        }));
        self
    }

    pub fn spread(mut self, name: impl Into<String>) -> Self {
        self.items.push(Selection::FragmentSpread(FragmentSpread {
            name: name.into(),
            directives: Vec::new(),
        }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub type_condition: String,
    pub selection: SelectionSet,
}

impl Fragment {
    pub fn new(type_condition: impl Into<String>, selection: SelectionSet) -> Self {
        Fragment {
            type_condition: type_condition.into(),
            selection,
        }
    }
}

pub type FragmentMap = BTreeMap<String, Fragment>;

/// A parsed query: the root selection plus its fragment definitions.
///
/// Documents are shared behind `Arc` by every query built from them. The
/// signature, the static flag and the variable names are computed once; the
/// tree itself only changes through [`Document::with_fragment`], which
/// forgets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    selection: SelectionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fragments: Option<FragmentMap>,
    #[serde(skip)]
    signature: OnceLock<Arc<str>>,
    #[serde(skip)]
    is_static: OnceLock<bool>,
    #[serde(skip)]
    variable_names: OnceLock<BTreeSet<String>>,
}

impl Document {
    pub fn new(selection: SelectionSet) -> Self {
        Document {
            selection,
            ..Document::default()
        }
    }

    pub fn with_fragment(mut self, name: impl Into<String>, fragment: Fragment) -> Self {
        self.fragments
            .get_or_insert_with(FragmentMap::new)
            .insert(name.into(), fragment);
        self.signature = OnceLock::new();
        self.is_static = OnceLock::new();
        self.variable_names = OnceLock::new();
        self
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn fragments(&self) -> Option<&FragmentMap> {
        self.fragments.as_ref()
    }

    pub fn fragment_lookup(&self) -> Option<&dyn FragmentLookup> {
        self.fragments
            .as_ref()
            .map(|fragments| fragments as &dyn FragmentLookup)
    }

    /// Canonical JSON text of the document, used as its identity in read
    /// fingerprints.
    pub fn signature(&self) -> Arc<str> {
        self.signature
            .get_or_init(|| {
                let canonical = serde_json::json!({
                    "selection": &self.selection,
                    "fragments": &self.fragments,
                });
                Arc::from(canonical.to_string())
            })
            .clone()
    }

    /// Whether the whole document is free of parameterized fields.
    pub fn is_static(&self) -> Result<bool> {
        if let Some(cached) = self.is_static.get() {
            return Ok(*cached);
        }
        let value = is_static(&self.selection, self.fragment_lookup())?;
        Ok(*self.is_static.get_or_init(|| value))
    }

    /// Every variable named by an argument or a directive anywhere in the
    /// document, fragments included.
    pub fn variable_names(&self) -> &BTreeSet<String> {
        self.variable_names
            .get_or_init(|| referenced_variables(&self.selection, self.fragments.as_ref()))
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.selection == other.selection && self.fragments == other.fragments
    }
}
