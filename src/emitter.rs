//! Change subscriptions: per-attribute listeners and the aggregate listener.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use slab::Slab;

use crate::instance::Instance;
use crate::value::Value;

/// Listener for `change:<attribute>` notifications; receives the instance and
/// the attribute's new value.
pub type ChangeListener = Rc<dyn Fn(&Instance, &Value)>;

/// Listener for the aggregate `change` notification fired once per pass.
pub type PassListener = Rc<dyn Fn(&Instance)>;

/// Handle for removing a previously registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId(Target);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Attribute { attribute: String, key: usize },
    Any { key: usize },
}

/// Slab-backed listener storage. Listener lists are snapshotted before
/// dispatch so callbacks may freely subscribe, unsubscribe, or trigger nested
/// passes.
#[derive(Default)]
pub(crate) struct Emitter {
    attribute: RefCell<AHashMap<String, Slab<ChangeListener>>>,
    any: RefCell<Slab<PassListener>>,
}

impl Emitter {
    pub(crate) fn on_change(
        &self,
        attribute: &str,
        listener: impl Fn(&Instance, &Value) + 'static,
    ) -> SubscriptionId {
        let key = self
            .attribute
            .borrow_mut()
            .entry(attribute.to_string())
            .or_default()
            .insert(Rc::new(listener));
        SubscriptionId(Target::Attribute {
            attribute: attribute.to_string(),
            key,
        })
    }

    pub(crate) fn on_any_change(&self, listener: impl Fn(&Instance) + 'static) -> SubscriptionId {
        let key = self.any.borrow_mut().insert(Rc::new(listener));
        SubscriptionId(Target::Any { key })
    }

    /// Remove a listener. Returns false if it was already removed.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match id.0 {
            Target::Attribute { attribute, key } => self
                .attribute
                .borrow_mut()
                .get_mut(&attribute)
                .and_then(|slab| slab.try_remove(key))
                .is_some(),
            Target::Any { key } => self.any.borrow_mut().try_remove(key).is_some(),
        }
    }

    pub(crate) fn emit_change(&self, instance: &Instance, attribute: &str, value: &Value) {
        let listeners: Vec<ChangeListener> = match self.attribute.borrow().get(attribute) {
            Some(slab) => slab.iter().map(|(_, listener)| listener.clone()).collect(),
            None => return,
        };
        for listener in listeners {
            listener(instance, value);
        }
    }

    pub(crate) fn emit_any(&self, instance: &Instance) {
        let listeners: Vec<PassListener> = self
            .any
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(instance);
        }
    }
}
