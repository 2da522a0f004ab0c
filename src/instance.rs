//! Live instances: value store, validation pipeline, derived cache, and the
//! change-notification engine.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::emitter::{Emitter, SubscriptionId};
use crate::error::StateError;
use crate::schema::{ExtraProperties, Schema};
use crate::tracer::{DerivedRead, NoopTracer, Tracer};
use crate::value::Value;

/// One committed write inside a pass.
struct ChangeRecord {
    name: String,
    old: Option<Value>,
    new: Value,
}

/// One live object conforming to a [`Schema`].
///
/// An instance owns its value store, previous-value records, and derived
/// cache exclusively; nothing is shared between instances beyond the
/// `Arc<Schema>`. All methods take `&self`: state lives behind interior
/// mutability, and no borrow is held across listener, compute, or test
/// callbacks, so callbacks may freely read the instance and trigger nested
/// writes. Writes form *passes*: one `set` or `set_many` call applies its
/// attributes, recomputes affected derived properties in dependency order,
/// then fires one `change:<attribute>` notification per changed attribute and
/// a single aggregate `change` notification. Nested passes run to completion
/// on the call stack without interleaving changed-sets.
///
/// `Instance` is intentionally `!Send`: a concurrent adaptation must
/// serialize all access to one instance.
pub struct Instance {
    schema: Arc<Schema>,
    values: RefCell<IndexMap<String, Value>>,
    derived_cache: RefCell<AHashMap<String, Value>>,
    /// Stack of per-pass previous-value records. The last entry belongs to
    /// the innermost active pass, or to the most recently completed pass when
    /// idle.
    previous: RefCell<Vec<IndexMap<String, Value>>>,
    pass_depth: Cell<usize>,
    extra_properties: Cell<ExtraProperties>,
    emitter: Emitter,
    tracer: RefCell<Rc<dyn Tracer>>,
    /// Back-reference to the ordered collection currently holding this
    /// instance, maintained entirely by the collection collaborator. The core
    /// never reads or writes it.
    pub collection: RefCell<Option<Rc<dyn Any>>>,
}

impl Instance {
    /// Create an instance, resolving each declared attribute from `initial`
    /// if present, else from its default if declared, else leaving it absent.
    ///
    /// Every resolved value flows through the full validation pipeline, so a
    /// bad initial value fails construction. Required-but-absent attributes
    /// do not: required-ness is only checked by [`Instance::verify_required`].
    /// No change notifications fire during construction.
    pub fn new<I, K, V>(schema: Arc<Schema>, initial: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let initial: IndexMap<String, Value> = initial
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let instance = Self {
            extra_properties: Cell::new(schema.extra_properties()),
            schema,
            values: RefCell::new(IndexMap::new()),
            derived_cache: RefCell::new(AHashMap::new()),
            previous: RefCell::new(Vec::new()),
            pass_depth: Cell::new(0),
            emitter: Emitter::default(),
            tracer: RefCell::new(Rc::new(NoopTracer)),
            collection: RefCell::new(None),
        };

        let mut writes = Vec::with_capacity(initial.len());
        for spec in instance.schema.attributes() {
            if let Some(value) = initial.get(&spec.name) {
                writes.push((spec.name.clone(), value.clone()));
            } else if let Some(default) = &spec.default {
                writes.push((spec.name.clone(), default.clone()));
            }
        }
        for (name, value) in &initial {
            if instance.schema.attribute(name).is_none() {
                writes.push((name.clone(), value.clone()));
            }
        }
        instance.run_pass(writes, false)?;
        Ok(instance)
    }

    /// Create an instance with no initial attributes beyond declared
    /// defaults.
    pub fn with_defaults(schema: Arc<Schema>) -> Result<Self, StateError> {
        Self::new(schema, std::iter::empty::<(String, Value)>())
    }

    /// The schema this instance conforms to.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Read an attribute.
    ///
    /// Declared and ad-hoc attributes come from the value store, with the
    /// data type's read transform applied. A cached derived attribute returns
    /// its memo, computing and memoizing on a miss; an uncached derived
    /// attribute recomputes on every read. Returns `None` for absent and
    /// unknown attributes.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(spec) = self.schema.derived(name) {
            let tracer = self.tracer();
            if !spec.cache {
                let value = (spec.compute)(self);
                tracer.on_derived_read(name, DerivedRead::Uncached);
                return Some(value);
            }
            let memo = self.derived_cache.borrow().get(name).cloned();
            if let Some(value) = memo {
                tracer.on_derived_read(name, DerivedRead::CacheHit);
                return Some(value);
            }
            let value = (spec.compute)(self);
            tracer.on_derived_read(name, DerivedRead::Computed);
            self.derived_cache
                .borrow_mut()
                .insert(name.to_string(), value.clone());
            return Some(value);
        }
        let stored = self.values.borrow().get(name).cloned()?;
        match self.schema.attribute(name) {
            Some(spec) => Some(spec.data_type.read(&stored)),
            None => Some(stored),
        }
    }

    /// Read an attribute as a string.
    pub fn string(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    /// Read an attribute as a number.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|value| value.as_number())
    }

    /// Read an attribute as a boolean.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|value| value.as_bool())
    }

    /// Read an attribute as epoch milliseconds.
    pub fn date(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|value| value.as_date())
    }

    /// Write one attribute, running a full pass.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), StateError> {
        self.run_pass(vec![(name.to_string(), value.into())], true)
    }

    /// Write several attributes as one pass: all writes apply before derived
    /// recomputation, each changed attribute fires one notification, and a
    /// single aggregate notification closes the pass.
    ///
    /// A failing attribute aborts the remaining writes, but attributes
    /// already applied earlier in the iteration order stay committed and no
    /// notifications fire for the aborted pass.
    pub fn set_many<I, K, V>(&self, attributes: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.run_pass(
            attributes
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            true,
        )
    }

    /// Cycle an attribute: a boolean flips (an unset boolean becomes true),
    /// and an enumerated attribute advances to the next entry of its `values`
    /// list, wrapping to the first after the last (an unset one takes the
    /// first). Anything else fails with
    /// [`StateError::Untoggleable`].
    pub fn toggle(&self, name: &str) -> Result<(), StateError> {
        let untoggleable = || StateError::Untoggleable {
            attribute: name.to_string(),
        };
        let spec = self.schema.attribute(name).ok_or_else(untoggleable)?;
        if let Some(values) = &spec.values {
            if values.is_empty() {
                return Err(untoggleable());
            }
            let current = self.values.borrow().get(name).cloned();
            let next = current
                .and_then(|current| values.iter().position(|value| *value == current))
                .map(|index| (index + 1) % values.len())
                .unwrap_or(0);
            self.set(name, values[next].clone())
        } else if spec.type_name() == "boolean" {
            let current = self
                .values
                .borrow()
                .get(name)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            self.set(name, !current)
        } else {
            Err(untoggleable())
        }
    }

    /// The pre-pass value of an attribute changed in the current pass (from
    /// inside a listener) or in the most recently completed pass (outside).
    ///
    /// Returns `None` for attributes the pass did not touch, for attributes
    /// with no prior value, and always for uncached derived attributes, which
    /// have no meaningful previous value.
    pub fn previous(&self, name: &str) -> Option<Value> {
        self.previous
            .borrow()
            .last()
            .and_then(|pass| pass.get(name).cloned())
    }

    /// Whether every required attribute currently holds a non-null value.
    pub fn verify_required(&self) -> bool {
        let values = self.values.borrow();
        self.schema.attributes().all(|spec| {
            !spec.required || values.get(&spec.name).is_some_and(|value| !value.is_null())
        })
    }

    /// Snapshot of all current attribute values: declared, session, and
    /// ad-hoc alike, with read transforms applied.
    pub fn attributes(&self) -> IndexMap<String, Value> {
        self.values
            .borrow()
            .iter()
            .map(|(name, stored)| {
                let value = match self.schema.attribute(name) {
                    Some(spec) => spec.data_type.read(stored),
                    None => stored.clone(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// The persisted-attributes mapping: every current value except session
    /// attributes, as raw stored values without read transforms.
    pub fn serialize(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values
            .borrow()
            .iter()
            .filter(|(name, _)| {
                self.schema
                    .attribute(name)
                    .map_or(true, |spec| !spec.session)
            })
            .map(|(name, stored)| (name.clone(), stored.into()))
            .collect()
    }

    /// Subscribe to changes of one attribute (declared, ad-hoc, or derived).
    /// The listener receives the instance and the attribute's new value.
    pub fn on_change(
        &self,
        attribute: &str,
        listener: impl Fn(&Instance, &Value) + 'static,
    ) -> SubscriptionId {
        self.emitter.on_change(attribute, listener)
    }

    /// Subscribe to the aggregate notification fired once per pass, after
    /// every per-attribute notification.
    pub fn on_any_change(&self, listener: impl Fn(&Instance) + 'static) -> SubscriptionId {
        self.emitter.on_any_change(listener)
    }

    /// Remove a listener. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.emitter.unsubscribe(id)
    }

    /// This instance's policy for writes to undeclared attribute names.
    pub fn extra_properties(&self) -> ExtraProperties {
        self.extra_properties.get()
    }

    /// Override the schema's extra-properties policy for this instance only.
    pub fn set_extra_properties(&self, policy: ExtraProperties) {
        self.extra_properties.set(policy);
    }

    /// Install a tracer observing this instance's passes and derived reads.
    pub fn set_tracer(&self, tracer: Rc<dyn Tracer>) {
        *self.tracer.borrow_mut() = tracer;
    }

    fn tracer(&self) -> Rc<dyn Tracer> {
        self.tracer.borrow().clone()
    }

    /// Apply the writes of one pass, then notify. On failure, attributes
    /// already applied stay committed and their dependent memos are dropped,
    /// but no notifications fire.
    fn run_pass(&self, writes: Vec<(String, Value)>, notify: bool) -> Result<(), StateError> {
        let mut changes = Vec::with_capacity(writes.len());
        for (name, raw) in writes {
            match self.apply(&name, raw) {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(error) => {
                    self.drop_dependent_memos(&changes);
                    return Err(error);
                }
            }
        }
        if changes.is_empty() {
            return Ok(());
        }
        if notify {
            self.notify_pass(changes);
        } else {
            self.drop_dependent_memos(&changes);
        }
        Ok(())
    }

    /// The per-attribute validation pipeline. Returns the change record, or
    /// `None` when the write was dropped (ignored extra property) or compared
    /// unchanged.
    fn apply(&self, name: &str, raw: Value) -> Result<Option<ChangeRecord>, StateError> {
        if self.schema.derived(name).is_some() {
            return Err(StateError::DerivedReadonly {
                attribute: name.to_string(),
            });
        }
        let Some(spec) = self.schema.attribute(name) else {
            return match self.extra_properties.get() {
                ExtraProperties::Ignore => Ok(None),
                ExtraProperties::Reject => Err(StateError::UnknownAttribute {
                    attribute: name.to_string(),
                }),
                ExtraProperties::Allow => {
                    let old = self.values.borrow().get(name).cloned();
                    if old.as_ref() == Some(&raw) {
                        return Ok(None);
                    }
                    self.values
                        .borrow_mut()
                        .insert(name.to_string(), raw.clone());
                    Ok(Some(ChangeRecord {
                        name: name.to_string(),
                        old,
                        new: raw,
                    }))
                }
            };
        };

        // null skips coercion and answers to allow_null instead
        let coerced = if raw.is_null() {
            Value::Null
        } else {
            spec.data_type.coerce(name, &raw)?
        };
        if coerced.is_null() && !spec.allow_null {
            return Err(StateError::NullDisallowed {
                attribute: name.to_string(),
            });
        }
        if let Some(values) = &spec.values {
            if !values.contains(&coerced) {
                return Err(StateError::NotAllowedValue {
                    attribute: name.to_string(),
                });
            }
        }
        if let Some(test) = &spec.test {
            if let Some(message) = test(&coerced, self) {
                if !message.is_empty() {
                    return Err(StateError::FailedTest {
                        attribute: name.to_string(),
                        message,
                    });
                }
            }
        }

        let old = self.values.borrow().get(name).cloned();
        if spec.data_type.unchanged(old.as_ref(), &coerced) {
            return Ok(None);
        }
        self.values
            .borrow_mut()
            .insert(name.to_string(), coerced.clone());
        Ok(Some(ChangeRecord {
            name: name.to_string(),
            old,
            new: coerced,
        }))
    }

    /// Remove the memo of every derived attribute downstream of `changes`.
    fn drop_dependent_memos(&self, changes: &[ChangeRecord]) {
        if changes.is_empty() {
            return;
        }
        let changed: AHashSet<String> = changes.iter().map(|change| change.name.clone()).collect();
        let mut cache = self.derived_cache.borrow_mut();
        for spec in self.schema.affected_by(&changed) {
            cache.remove(&spec.name);
        }
    }

    /// Finish a pass: recompute affected derived attributes in dependency
    /// order, record previous values, and dispatch notifications.
    fn notify_pass(&self, changes: Vec<ChangeRecord>) {
        let tracer = self.tracer();
        tracer.on_pass_start();

        let changed: AHashSet<String> = changes.iter().map(|change| change.name.clone()).collect();
        let affected = self.schema.affected_by(&changed);

        let mut previous = IndexMap::with_capacity(changes.len());
        let mut events: Vec<(String, Value)> = Vec::with_capacity(changes.len() + affected.len());
        for change in changes {
            if let Some(old) = change.old {
                previous.insert(change.name.clone(), old);
            }
            events.push((change.name, change.new));
        }

        for spec in affected {
            if spec.cache {
                // recompute before anything downstream of this one runs, so
                // dependents read the fresh value
                let old = self.derived_cache.borrow_mut().remove(&spec.name);
                let new = (spec.compute)(self);
                tracer.on_derived_read(&spec.name, DerivedRead::Computed);
                self.derived_cache
                    .borrow_mut()
                    .insert(spec.name.clone(), new.clone());
                let changed = match &old {
                    Some(old) => *old != new,
                    None => true,
                };
                if changed {
                    if let Some(old) = old {
                        previous.insert(spec.name.clone(), old);
                    }
                    events.push((spec.name.clone(), new));
                }
            } else {
                let new = (spec.compute)(self);
                tracer.on_derived_read(&spec.name, DerivedRead::Uncached);
                events.push((spec.name.clone(), new));
            }
        }

        let depth = self.pass_depth.get();
        self.pass_depth.set(depth + 1);
        {
            let mut stack = self.previous.borrow_mut();
            if depth == 0 {
                stack.clear();
            }
            stack.push(previous);
        }

        for (name, value) in &events {
            tracer.on_attribute_changed(name, value);
            self.emitter.emit_change(self, name, value);
        }
        self.emitter.emit_any(self);
        tracer.on_pass_complete(events.len());

        // a nested pass restores the outer pass's previous records; the
        // outermost pass's records persist until the next pass
        if depth > 0 {
            self.previous.borrow_mut().pop();
        }
        self.pass_depth.set(depth);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("attributes", &*self.values.borrow())
            .field("schema", &self.schema)
            .finish()
    }
}
