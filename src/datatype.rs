//! Named data types: coercion, change comparison, and read transforms.
//!
//! A [`DataType`] decides what a value of a declared attribute is allowed to
//! be. Resolution order for a type name is: the definition's local
//! `data_types` table, then the process-global registry populated by
//! [`register`], then the built-ins (`string`, `number`, `boolean`, `date`,
//! `object`, `array`, `any`).

use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use anyhow::{anyhow, bail};
use parking_lot::RwLock;

use crate::error::StateError;
use crate::value::Value;

/// Coerces a raw value into the canonical form for a data type, or explains
/// why it cannot be represented.
pub type CoerceFn = Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// Compares an old and a new value; `true` means "unchanged", which excludes
/// the write from the pass's changed-set.
pub type CompareFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Transforms a stored value on its way out of the store.
pub type ReadFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Behavior bundle for one named data type.
#[derive(Clone)]
pub struct DataType {
    name: String,
    coerce: CoerceFn,
    compare: Option<CompareFn>,
    read: Option<ReadFn>,
}

impl DataType {
    /// Create a data type from its name and coercion function.
    ///
    /// Comparison defaults to [`Value`] equality and reads default to
    /// returning the stored value unchanged.
    pub fn new(
        name: impl Into<String>,
        coerce: impl Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            coerce: Arc::new(coerce),
            compare: None,
            read: None,
        }
    }

    /// Override change detection for this type.
    ///
    /// The comparison returns `true` when the two values should be treated as
    /// equal, suppressing the change event a write would otherwise fire. It
    /// also runs for the first write of an attribute, with null standing in
    /// for the missing old value.
    pub fn with_compare(
        mut self,
        compare: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.compare = Some(Arc::new(compare));
        self
    }

    /// Attach a transform applied whenever a stored value of this type is
    /// read back out. The stored form is untouched; `serialize` emits it raw.
    pub fn with_read(mut self, read: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.read = Some(Arc::new(read));
        self
    }

    /// The registered type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn coerce(&self, attribute: &str, raw: &Value) -> Result<Value, StateError> {
        (self.coerce)(raw).map_err(|reason| StateError::InvalidType {
            attribute: attribute.to_string(),
            type_name: self.name.clone(),
            reason: Arc::new(reason),
        })
    }

    /// Whether a write from `old` to `new` counts as unchanged.
    ///
    /// `old` is `None` when the attribute has no prior value; the default
    /// comparison then always reports a change, while a custom comparison is
    /// consulted with null in place of the old value.
    pub(crate) fn unchanged(&self, old: Option<&Value>, new: &Value) -> bool {
        match (&self.compare, old) {
            (Some(compare), _) => compare(old.unwrap_or(&Value::Null), new),
            (None, Some(old)) => old == new,
            (None, None) => false,
        }
    }

    pub(crate) fn read(&self, stored: &Value) -> Value {
        match &self.read {
            Some(read) => read(stored),
            None => stored.clone(),
        }
    }
}

impl std::fmt::Debug for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataType")
            .field("name", &self.name)
            .field("compare", &self.compare.is_some())
            .field("read", &self.read.is_some())
            .finish()
    }
}

fn registry() -> &'static RwLock<AHashMap<String, DataType>> {
    static REGISTRY: OnceLock<RwLock<AHashMap<String, DataType>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Register a data type under a global name, available to every schema
/// compiled afterwards. Re-registering a name replaces the previous entry;
/// built-ins can be shadowed.
pub fn register(name: impl Into<String>, data_type: DataType) {
    registry().write().insert(name.into(), data_type);
}

/// Resolve a type name against local registrations, then the global
/// registry, then the built-ins.
pub(crate) fn lookup(name: &str, local: &AHashMap<String, DataType>) -> Option<DataType> {
    local
        .get(name)
        .cloned()
        .or_else(|| registry().read().get(name).cloned())
        .or_else(|| builtin(name))
}

fn builtin(name: &str) -> Option<DataType> {
    let data_type = match name {
        "string" => DataType::new("string", |raw| match raw {
            Value::String(_) => Ok(raw.clone()),
            other => bail!("got {}", other.type_label()),
        }),
        "number" => DataType::new("number", |raw| match raw {
            Value::Number(_) => Ok(raw.clone()),
            other => bail!("got {}", other.type_label()),
        }),
        "boolean" => DataType::new("boolean", |raw| match raw {
            Value::Bool(_) => Ok(raw.clone()),
            other => bail!("got {}", other.type_label()),
        }),
        // Dates come in as epoch milliseconds, numeric or stringly.
        "date" => DataType::new("date", |raw| match raw {
            Value::Date(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::Date(*n as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Date)
                .map_err(|_| anyhow!("got a non-numeric string")),
            other => bail!("got {}", other.type_label()),
        }),
        "object" => DataType::new("object", |raw| match raw {
            Value::Object(_) => Ok(raw.clone()),
            other => bail!("got {}", other.type_label()),
        }),
        "array" => DataType::new("array", |raw| match raw {
            Value::Array(_) => Ok(raw.clone()),
            other => bail!("got {}", other.type_label()),
        }),
        "any" => DataType::new("any", |raw| Ok(raw.clone())),
        _ => return None,
    };
    Some(data_type)
}
