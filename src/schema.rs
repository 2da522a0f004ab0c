//! Declarative definitions and their compiled, shareable form.
//!
//! A [`Definition`] is the raw, builder-style description of a state type:
//! declared props, session props, derived props, local data types, and policy
//! flags. [`Definition::compile`] normalizes every shorthand, resolves data
//! types, walks the derived dependency graph, and produces an immutable
//! [`Schema`] meant to be wrapped in an `Arc` and shared by every instance.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::datatype::{self, DataType};
use crate::error::SchemaError;
use crate::instance::Instance;
use crate::value::Value;

/// Computes a derived property from the instance it belongs to.
pub type ComputeFn = Arc<dyn Fn(&Instance) -> Value + Send + Sync>;

/// Validates a candidate value against the instance it would be written to.
/// A non-empty returned string rejects the write with that message.
pub type TestFn = Arc<dyn Fn(&Value, &Instance) -> Option<String> + Send + Sync>;

/// Policy for writes to attribute names the schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraProperties {
    /// Silently drop the write.
    #[default]
    Ignore,
    /// Store the value as an ad-hoc untyped attribute.
    Allow,
    /// Fail the write with [`StateError::UnknownAttribute`](crate::StateError::UnknownAttribute).
    Reject,
}

/// Builder for one declared property.
///
/// Shorthand conversions cover the common cases: a bare type name, a
/// `(type, required)` pair, or a `(type, required, default)` triple all
/// convert into a `Prop`.
#[derive(Clone, Default)]
pub struct Prop {
    type_name: Option<String>,
    required: bool,
    default: Option<Value>,
    allow_null: bool,
    values: Option<Vec<Value>>,
    test: Option<TestFn>,
}

impl Prop {
    /// An untyped property; compiles with the `any` data type.
    pub fn new() -> Self {
        Prop {
            type_name: None,
            required: false,
            default: None,
            allow_null: false,
            values: None,
            test: None,
        }
    }

    /// A property of the named data type.
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Prop {
            type_name: Some(type_name.into()),
            ..Prop::new()
        }
    }

    /// A `string` property.
    pub fn string() -> Self {
        Self::of_type("string")
    }

    /// A `number` property.
    pub fn number() -> Self {
        Self::of_type("number")
    }

    /// A `boolean` property.
    pub fn boolean() -> Self {
        Self::of_type("boolean")
    }

    /// A `date` property.
    pub fn date() -> Self {
        Self::of_type("date")
    }

    /// An `object` property.
    pub fn object() -> Self {
        Self::of_type("object")
    }

    /// An `array` property.
    pub fn array() -> Self {
        Self::of_type("array")
    }

    /// An `any` property.
    pub fn any() -> Self {
        Self::of_type("any")
    }

    /// Mark the property required; enforced only by
    /// [`Instance::verify_required`], never eagerly.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Give the property a default, applied at construction when no initial
    /// value is supplied. Defaults pass through the same validation pipeline
    /// as writes.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Permit explicit null writes.
    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Constrain the property to an ordered list of allowed values.
    /// [`Instance::toggle`] advances through the list in this order.
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Attach a custom test run after coercion. Returning a non-empty string
    /// rejects the write with that message; the instance is passed alongside
    /// the candidate so the test can consult other attributes.
    pub fn test(
        mut self,
        test: impl Fn(&Value, &Instance) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.test = Some(Arc::new(test));
        self
    }
}

impl From<&str> for Prop {
    fn from(type_name: &str) -> Self {
        Prop::of_type(type_name)
    }
}

impl From<(&str, bool)> for Prop {
    fn from((type_name, required): (&str, bool)) -> Self {
        let prop = Prop::of_type(type_name);
        if required {
            prop.required()
        } else {
            prop
        }
    }
}

impl<V: Into<Value>> From<(&str, bool, V)> for Prop {
    fn from((type_name, required, default): (&str, bool, V)) -> Self {
        Prop::from((type_name, required)).default(default)
    }
}

/// Builder for one derived property.
#[derive(Clone)]
pub struct Derived {
    deps: Vec<String>,
    compute: ComputeFn,
    cache: bool,
}

impl Derived {
    /// A cached derived property computed from the named dependencies.
    ///
    /// Dependencies may be declared, session, derived, or ad-hoc attribute
    /// names; derived-on-derived chains are allowed to any acyclic depth.
    pub fn new<I, S>(deps: I, compute: impl Fn(&Instance) -> Value + Send + Sync + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deps: deps.into_iter().map(Into::into).collect(),
            compute: Arc::new(compute),
            cache: true,
        }
    }

    /// Disable memoization: the property recomputes on every read and never
    /// has a previous value.
    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Raw, declarative description of a state type.
#[derive(Clone, Default)]
pub struct Definition {
    props: IndexMap<String, Prop>,
    session: IndexMap<String, Prop>,
    derived: IndexMap<String, Derived>,
    data_types: AHashMap<String, DataType>,
    extra_properties: Option<ExtraProperties>,
    seal: Option<bool>,
}

impl Definition {
    /// An empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a persisted property.
    pub fn prop(mut self, name: impl Into<String>, prop: impl Into<Prop>) -> Self {
        self.props.insert(name.into(), prop.into());
        self
    }

    /// Declare a session property: identical to a prop in every way except
    /// that `serialize` never includes it.
    pub fn session(mut self, name: impl Into<String>, prop: impl Into<Prop>) -> Self {
        self.session.insert(name.into(), prop.into());
        self
    }

    /// Declare a derived property.
    pub fn derived(mut self, name: impl Into<String>, derived: Derived) -> Self {
        self.derived.insert(name.into(), derived);
        self
    }

    /// Register a data type visible only to this definition, shadowing the
    /// global registry and the built-ins.
    pub fn data_type(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.data_types.insert(name.into(), data_type);
        self
    }

    /// Set the default policy for writes to undeclared attribute names.
    pub fn extra_properties(mut self, policy: ExtraProperties) -> Self {
        self.extra_properties = Some(policy);
        self
    }

    /// Mark the schema sealed. The flag is carried on the compiled schema for
    /// an external sealing collaborator; the core does not enforce it.
    pub fn seal(mut self, seal: bool) -> Self {
        self.seal = Some(seal);
        self
    }

    /// Merge `child` over this definition: child props, session props,
    /// derived props, and data types override or append to the parent's, and
    /// child policy flags win where the child set them.
    ///
    /// This is the whole of schema inheritance: a pure merge at definition
    /// time, compiled once afterwards.
    pub fn extend(mut self, child: Definition) -> Self {
        self.props.extend(child.props);
        self.session.extend(child.session);
        self.derived.extend(child.derived);
        self.data_types.extend(child.data_types);
        if child.extra_properties.is_some() {
            self.extra_properties = child.extra_properties;
        }
        if child.seal.is_some() {
            self.seal = child.seal;
        }
        self
    }

    /// Compile into an immutable [`Schema`].
    pub fn compile(self) -> Result<Schema, SchemaError> {
        let mut attributes = IndexMap::with_capacity(self.props.len() + self.session.len());
        let declared = self
            .props
            .into_iter()
            .map(|(name, prop)| (name, prop, false))
            .chain(
                self.session
                    .into_iter()
                    .map(|(name, prop)| (name, prop, true)),
            );
        for (name, prop, session) in declared {
            let type_name = prop.type_name.as_deref().unwrap_or("any");
            let data_type = datatype::lookup(type_name, &self.data_types).ok_or_else(|| {
                SchemaError::UnknownType {
                    attribute: name.clone(),
                    type_name: type_name.to_string(),
                }
            })?;
            attributes.insert(
                name.clone(),
                AttributeSpec {
                    name,
                    data_type,
                    required: prop.required,
                    default: prop.default,
                    allow_null: prop.allow_null,
                    values: prop.values,
                    test: prop.test,
                    session,
                },
            );
        }

        for name in self.derived.keys() {
            if attributes.contains_key(name) {
                return Err(SchemaError::DerivedCollision {
                    attribute: name.clone(),
                });
            }
        }

        let mut expanded = AHashMap::with_capacity(self.derived.len());
        for name in self.derived.keys() {
            expand_deps(name, &self.derived, &mut expanded, &mut Vec::new())?;
        }
        let derived_order = topo_order(&self.derived);

        let mut dependents: AHashMap<String, Vec<String>> = AHashMap::new();
        for name in &derived_order {
            for base in &expanded[name] {
                dependents.entry(base.clone()).or_default().push(name.clone());
            }
        }

        let mut derived = IndexMap::with_capacity(self.derived.len());
        for (name, def) in self.derived {
            let expanded = expanded.remove(&name).unwrap_or_default();
            derived.insert(
                name.clone(),
                DerivedSpec {
                    name,
                    deps: def.deps,
                    expanded,
                    compute: def.compute,
                    cache: def.cache,
                },
            );
        }

        Ok(Schema {
            attributes,
            derived,
            dependents,
            derived_order,
            extra_properties: self.extra_properties.unwrap_or_default(),
            sealed: self.seal.unwrap_or(false),
        })
    }
}

/// Expanded dependency set for one derived property: its direct deps plus,
/// transitively, the expanded sets of deps that are themselves derived.
/// Fails on a cycle, reporting the path.
fn expand_deps(
    name: &str,
    derived: &IndexMap<String, Derived>,
    expanded: &mut AHashMap<String, AHashSet<String>>,
    visiting: &mut Vec<String>,
) -> Result<(), SchemaError> {
    if expanded.contains_key(name) {
        return Ok(());
    }
    if let Some(start) = visiting.iter().position(|n| n == name) {
        let mut path: Vec<String> = visiting[start..].to_vec();
        path.push(name.to_string());
        return Err(SchemaError::DependencyCycle { path });
    }
    visiting.push(name.to_string());
    let mut set = AHashSet::new();
    for dep in &derived[name].deps {
        set.insert(dep.clone());
        if derived.contains_key(dep) {
            expand_deps(dep, derived, expanded, visiting)?;
            set.extend(expanded[dep].iter().cloned());
        }
    }
    visiting.pop();
    expanded.insert(name.to_string(), set);
    Ok(())
}

/// Topological order over derived properties, dependencies first. Assumes
/// the graph was already checked for cycles.
fn topo_order(derived: &IndexMap<String, Derived>) -> Vec<String> {
    let mut order = Vec::with_capacity(derived.len());
    let mut visited = AHashSet::with_capacity(derived.len());
    for name in derived.keys() {
        topo_visit(name, derived, &mut visited, &mut order);
    }
    order
}

fn topo_visit(
    name: &str,
    derived: &IndexMap<String, Derived>,
    visited: &mut AHashSet<String>,
    order: &mut Vec<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }
    for dep in &derived[name].deps {
        if derived.contains_key(dep) {
            topo_visit(dep, derived, visited, order);
        }
    }
    order.push(name.to_string());
}

/// Compiled descriptor for one declared or session property. Immutable and
/// shared by every instance of the schema.
pub struct AttributeSpec {
    /// The attribute name.
    pub name: String,
    pub(crate) data_type: DataType,
    /// Whether [`Instance::verify_required`] demands a non-null value.
    pub required: bool,
    /// Default applied at construction when no initial value is supplied.
    pub default: Option<Value>,
    /// Whether explicit null writes are permitted.
    pub allow_null: bool,
    /// Ordered list of allowed values, if constrained.
    pub values: Option<Vec<Value>>,
    pub(crate) test: Option<TestFn>,
    /// Whether the attribute is session-only (excluded from `serialize`).
    pub session: bool,
}

impl AttributeSpec {
    /// The name of the attribute's data type.
    pub fn type_name(&self) -> &str {
        self.data_type.name()
    }
}

/// Compiled descriptor for one derived property.
pub struct DerivedSpec {
    /// The derived property name.
    pub name: String,
    /// Direct dependencies, in declaration order.
    pub deps: Vec<String>,
    pub(crate) expanded: AHashSet<String>,
    pub(crate) compute: ComputeFn,
    /// Whether the computed value is memoized between dependency changes.
    pub cache: bool,
}

impl DerivedSpec {
    /// Whether `name` is in the expanded dependency set: a direct dependency
    /// or one reached through a chain of other derived properties.
    pub fn depends_on(&self, name: &str) -> bool {
        self.expanded.contains(name)
    }
}

/// The compiled union of attribute and derived specs for a state type, plus
/// the dependency indexes the notification engine runs on.
///
/// Build once per type and share via `Arc`; compilation is deterministic and
/// the schema is read-only afterwards.
pub struct Schema {
    attributes: IndexMap<String, AttributeSpec>,
    derived: IndexMap<String, DerivedSpec>,
    /// Dependency name (declared, ad-hoc, or derived) -> derived properties
    /// affected directly or through derived-on-derived chains.
    dependents: AHashMap<String, Vec<String>>,
    /// All derived names, dependencies before dependents.
    derived_order: Vec<String>,
    extra_properties: ExtraProperties,
    sealed: bool,
}

#[test]
fn test_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<Schema>();
    assert_sync::<Schema>();
}

impl Schema {
    /// Look up a declared or session attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    /// Iterate declared and session attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.values()
    }

    /// Look up a derived property.
    pub fn derived(&self, name: &str) -> Option<&DerivedSpec> {
        self.derived.get(name)
    }

    /// Iterate derived properties in declaration order.
    pub fn derived_attributes(&self) -> impl Iterator<Item = &DerivedSpec> {
        self.derived.values()
    }

    /// The derived properties that depend on `name`, directly or through a
    /// chain, in dependency order.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The schema-level default policy for undeclared attribute writes.
    pub fn extra_properties(&self) -> ExtraProperties {
        self.extra_properties
    }

    /// Whether the definition asked for sealing. Carried for an external
    /// sealing collaborator; the core does not enforce it.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// The derived properties whose expanded dependency set intersects
    /// `changed`, in dependency order.
    pub(crate) fn affected_by(&self, changed: &AHashSet<String>) -> Vec<&DerivedSpec> {
        let mut hit: AHashSet<&str> = AHashSet::new();
        for name in changed {
            if let Some(dependents) = self.dependents.get(name.as_str()) {
                hit.extend(dependents.iter().map(String::as_str));
            }
        }
        self.derived_order
            .iter()
            .filter(|name| hit.contains(name.as_str()))
            .filter_map(|name| self.derived.get(name))
            .collect()
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("derived", &self.derived.keys().collect::<Vec<_>>())
            .field("extra_properties", &self.extra_properties)
            .field("sealed", &self.sealed)
            .finish()
    }
}
