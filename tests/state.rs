//! End-to-end behavior of schemas, instances, and change notification,
//! exercised the way a consuming application would: a "person" schema with
//! required props, defaults, session props, and derived props, plus targeted
//! schemas for values lists, custom data types, and toggling.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use state_flow::{
    DataType, Definition, Derived, DerivedRead, ExtraProperties, Instance, Prop, StateError,
    Tracer, Value,
};

// ============================================================================
// Fixtures
// ============================================================================

fn full_name(state: &Instance) -> Value {
    Value::from(format!(
        "{} {}",
        state.string("first_name").unwrap_or_default(),
        state.string("last_name").unwrap_or_default(),
    ))
}

fn initials(state: &Instance) -> Value {
    match (state.string("first_name"), state.string("last_name")) {
        (Some(first), Some(last)) => Value::from(
            first
                .chars()
                .take(1)
                .chain(last.chars().take(1))
                .collect::<String>()
                .to_uppercase(),
        ),
        _ => Value::from(""),
    }
}

fn person() -> Arc<state_flow::Schema> {
    Arc::new(
        Definition::new()
            .prop("id", "number")
            .prop("first_name", ("string", true, "defaults"))
            .prop("last_name", ("string", true))
            .prop("thing", Prop::string().required().default("hi"))
            .prop("num", ("number", true))
            .prop("today", "date")
            .prop("hash", "object")
            .prop("list", "array")
            .prop("my_bool", ("boolean", true, false))
            .prop("some_number", Prop::number().allow_null())
            .prop(
                "good",
                Prop::string().test(|value, _state| {
                    (value.as_str() != Some("good")).then(|| "Value not good".to_string())
                }),
            )
            .session("active", ("boolean", true, true))
            .derived("name", Derived::new(["first_name", "last_name"], full_name))
            .derived(
                "initials",
                Derived::new(["first_name", "last_name"], initials).uncached(),
            )
            .compile()
            .unwrap(),
    )
}

// ============================================================================
// Derived values, defaults, required
// ============================================================================

#[test]
fn test_gets_the_derived_value() {
    let foo = Instance::new(person(), [("first_name", "jim"), ("last_name", "tom")]).unwrap();
    assert_eq!(foo.string("name").as_deref(), Some("jim tom"));
    assert_eq!(foo.string("initials").as_deref(), Some("JT"));
}

#[test]
fn test_default_values_for_properties() {
    let foo = Instance::new(person(), [("first_name", "jim"), ("last_name", "tom")]).unwrap();
    assert_eq!(foo.boolean("my_bool"), Some(false));
}

#[test]
fn test_gets_correct_defaults() {
    let foo = Instance::with_defaults(person()).unwrap();
    assert_eq!(foo.string("first_name").as_deref(), Some("defaults"));
    assert_eq!(foo.string("thing").as_deref(), Some("hi"));
}

#[test]
fn test_setting_a_derived_property_fails() {
    let foo = Instance::with_defaults(person()).unwrap();
    let error = foo.set("name", "bob").unwrap_err();
    assert!(matches!(error, StateError::DerivedReadonly { .. }));
}

#[test]
fn test_derived_write_error_is_helpful() {
    let foo = Instance::with_defaults(person()).unwrap();
    let error = foo.set("name", "bob").unwrap_err();
    assert_eq!(
        error.to_string(),
        "\"name\" is a derived property, it can't be set directly."
    );
}

#[test]
fn test_verify_required() {
    let foo = Instance::with_defaults(person()).unwrap();
    assert!(!foo.verify_required());

    foo.set("first_name", "a").unwrap();
    foo.set("last_name", "b").unwrap();
    foo.set("thing", "abc").unwrap();
    foo.set("num", 12).unwrap();
    assert!(foo.verify_required());
}

// ============================================================================
// Extra-properties policies
// ============================================================================

#[test]
fn test_extra_properties_reject_fails() {
    let schema = Arc::new(
        Definition::new()
            .extra_properties(ExtraProperties::Reject)
            .compile()
            .unwrap(),
    );
    let foo = Instance::with_defaults(schema).unwrap();
    let error = foo.set_many([("craziness", "new")]).unwrap_err();
    assert!(matches!(error, StateError::UnknownAttribute { .. }));
}

#[test]
fn test_extra_properties_ignored_by_default() {
    let foo = Instance::with_defaults(person()).unwrap();
    foo.set_many([("craziness", "new")]).unwrap();
    assert_eq!(foo.get("craziness"), None);
}

#[test]
fn test_extra_properties_allow_stores_ad_hoc() {
    let foo = Instance::with_defaults(person()).unwrap();
    foo.set_extra_properties(ExtraProperties::Allow);
    foo.set_many([("craziness", "new")]).unwrap();
    assert_eq!(foo.string("craziness").as_deref(), Some("new"));
    // ad-hoc attributes persist too
    assert_eq!(
        foo.serialize().get("craziness"),
        Some(&serde_json::Value::String("new".to_string()))
    );
}

#[test]
fn test_events_fire_for_ad_hoc_properties() {
    let foo = Instance::with_defaults(person()).unwrap();
    foo.set_extra_properties(ExtraProperties::Allow);
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    foo.on_change("crazy_person", move |_state, _value| {
        count.set(count.get() + 1);
    });
    foo.set_many([("crazy_person", true)]).unwrap();
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_derived_event_from_ad_hoc_dependency() {
    let schema = Arc::new(
        Definition::new()
            .extra_properties(ExtraProperties::Allow)
            .derived(
                "is_crazy",
                Derived::new(["crazy_person"], |state: &Instance| {
                    Value::from(state.boolean("crazy_person").unwrap_or(false))
                }),
            )
            .compile()
            .unwrap(),
    );
    let foo = Instance::with_defaults(schema).unwrap();
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    foo.on_change("is_crazy", move |_state, value| {
        assert_eq!(value, &Value::Bool(true));
        count.set(count.get() + 1);
    });
    foo.set_many([("crazy_person", true)]).unwrap();
    assert_eq!(fired.get(), 1);
}

// ============================================================================
// Type errors and null handling
// ============================================================================

#[test]
fn test_type_errors_for_bad_data_types() {
    assert!(Instance::new(person(), [("first_name", Value::from(3))])
        .unwrap_err()
        .is_type_error());
    assert!(Instance::new(person(), [("num", Value::from("foo"))])
        .unwrap_err()
        .is_type_error());
    assert!(Instance::new(person(), [("hash", Value::from(10))])
        .unwrap_err()
        .is_type_error());
    assert!(Instance::new(person(), [("today", Value::from("asdfadsfa"))])
        .unwrap_err()
        .is_type_error());
    assert!(Instance::new(person(), [("list", Value::from(10))])
        .unwrap_err()
        .is_type_error());

    // dates accept epoch milliseconds, numeric or stringly
    let by_number = Instance::new(person(), [("today", Value::from(1397631169892i64))]).unwrap();
    assert_eq!(by_number.date("today"), Some(1397631169892));
    let by_string = Instance::new(person(), [("today", Value::from("1397631169892"))]).unwrap();
    assert_eq!(by_string.date("today"), Some(1397631169892));
}

#[test]
fn test_nulls_only_allowed_where_specified() {
    let foo = Instance::new(
        person(),
        [
            ("first_name", Value::from("bob")),
            ("last_name", Value::from("vila")),
            ("some_number", Value::Null),
        ],
    )
    .unwrap();
    assert_eq!(foo.get("some_number"), Some(Value::Null));

    let error = foo.set("first_name", Value::Null).unwrap_err();
    assert!(matches!(error, StateError::NullDisallowed { .. }));
    assert!(error.is_type_error());
    // the failed write retained the prior value
    assert_eq!(foo.string("first_name").as_deref(), Some("bob"));
}

#[test]
fn test_attribute_test_function() {
    let foo = Instance::new(person(), [("good", "good")]).unwrap();
    assert_eq!(foo.string("good").as_deref(), Some("good"));

    let error = foo.set("good", "bad").unwrap_err();
    assert_eq!(error.to_string(), "Value not good");
    assert!(matches!(error, StateError::FailedTest { .. }));
    assert_eq!(foo.string("good").as_deref(), Some("good"));
}

#[test]
fn test_test_function_receives_the_instance() {
    let observed = Arc::new(AtomicBool::new(false));
    let flag = observed.clone();
    let schema = Arc::new(
        Definition::new()
            .prop("limit", ("number", false, 10))
            .prop(
                "truth",
                Prop::boolean().test(move |_value, state| {
                    if state.number("limit") == Some(10.0) {
                        flag.store(true, Ordering::SeqCst);
                    }
                    None
                }),
            )
            .compile()
            .unwrap(),
    );
    let m = Instance::with_defaults(schema).unwrap();
    m.toggle("truth").unwrap();
    assert!(observed.load(Ordering::SeqCst));
}

// ============================================================================
// Previous values
// ============================================================================

#[test]
fn test_stores_previous_attributes() {
    let foo = Instance::new(person(), [("first_name", "beau")]).unwrap();
    foo.set("first_name", "john").unwrap();
    assert_eq!(foo.string("first_name").as_deref(), Some("john"));
    assert_eq!(foo.previous("first_name"), Some(Value::from("beau")));
    foo.set("first_name", "blah").unwrap();
    assert_eq!(foo.previous("first_name"), Some(Value::from("john")));
}

#[test]
fn test_previous_during_cached_derived_change() {
    let foo = Instance::new(
        person(),
        [("first_name", "Henrik"), ("last_name", "Joreteg")],
    )
    .unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    foo.on_change("name", move |state, _value| {
        log.borrow_mut().push(state.previous("name"));
    });

    foo.set("first_name", "Crazy").unwrap();
    foo.set("first_name", "Lance!").unwrap();
    // no memo existed before the first change, so no previous either
    assert_eq!(
        *seen.borrow(),
        vec![None, Some(Value::from("Crazy Joreteg"))]
    );
}

#[test]
fn test_previous_of_uncached_derived_is_none() {
    let foo = Instance::new(
        person(),
        [("first_name", "Henrik"), ("last_name", "Joreteg")],
    )
    .unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    foo.on_change("initials", move |state, _value| {
        log.borrow_mut().push(state.previous("initials"));
    });
    foo.set("first_name", "Crazy").unwrap();
    assert_eq!(*seen.borrow(), vec![None]);
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn test_attributes_and_serialize() {
    let foo = Instance::new(
        person(),
        [("first_name", "bob"), ("last_name", "tom"), ("thing", "abc")],
    )
    .unwrap();

    let attributes = foo.attributes();
    assert_eq!(attributes.len(), 5);
    assert_eq!(attributes["first_name"], Value::from("bob"));
    assert_eq!(attributes["last_name"], Value::from("tom"));
    assert_eq!(attributes["thing"], Value::from("abc"));
    assert_eq!(attributes["my_bool"], Value::from(false));
    assert_eq!(attributes["active"], Value::from(true));

    assert_eq!(
        serde_json::Value::Object(foo.serialize()),
        serde_json::json!({
            "first_name": "bob",
            "last_name": "tom",
            "thing": "abc",
            "my_bool": false,
        })
    );
}

#[test]
fn test_serialize_never_includes_session_properties() {
    // simple shorthand
    let foo_schema = Arc::new(
        Definition::new()
            .prop("name", "string")
            .session("active", "boolean")
            .compile()
            .unwrap(),
    );
    // fuller shorthand
    let bar_schema = Arc::new(
        Definition::new()
            .prop("name", "string")
            .session("active", ("boolean", true, false))
            .compile()
            .unwrap(),
    );

    let foo = Instance::new(
        foo_schema,
        [("name", Value::from("hi")), ("active", Value::from(true))],
    )
    .unwrap();
    let bar = Instance::new(
        bar_schema,
        [("name", Value::from("hi")), ("active", Value::from(true))],
    )
    .unwrap();

    assert_eq!(
        serde_json::Value::Object(foo.serialize()),
        serde_json::json!({"name": "hi"})
    );
    assert_eq!(
        serde_json::Value::Object(bar.serialize()),
        serde_json::json!({"name": "hi"})
    );
}

// ============================================================================
// Change events
// ============================================================================

#[test]
fn test_general_change_event_on_single_attribute() {
    let foo = Instance::new(person(), [("first_name", "coffee")]).unwrap();
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    foo.on_any_change(move |_state| {
        count.set(count.get() + 1);
    });
    foo.set("first_name", "bob").unwrap();
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_single_change_event_for_bulk_set() {
    let foo = Instance::new(person(), [("first_name", "coffee")]).unwrap();
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    foo.on_any_change(move |_state| {
        count.set(count.get() + 1);
    });
    foo.set_many([("first_name", "roger"), ("last_name", "smells")])
        .unwrap();
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_no_event_for_unchanged_write() {
    let foo = Instance::new(person(), [("first_name", "coffee")]).unwrap();
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    foo.on_any_change(move |_state| {
        count.set(count.get() + 1);
    });
    foo.set("first_name", "coffee").unwrap();
    assert_eq!(fired.get(), 0);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let foo = Instance::with_defaults(person()).unwrap();
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    let id = foo.on_change("first_name", move |_state, _value| {
        count.set(count.get() + 1);
    });
    foo.set("first_name", "a").unwrap();
    assert!(foo.unsubscribe(id.clone()));
    assert!(!foo.unsubscribe(id));
    foo.set("first_name", "b").unwrap();
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_listeners_can_write_from_inside_a_pass() {
    let schema = Arc::new(
        Definition::new()
            .prop("a", "number")
            .prop("b", "number")
            .compile()
            .unwrap(),
    );
    let state = Instance::with_defaults(schema).unwrap();
    state.set("a", 2).unwrap();

    let previous_seen = Rc::new(RefCell::new(Vec::new()));
    state.on_change("a", |state, value| {
        // nested pass: runs to completion before the next listener fires
        state.set("b", value.clone()).unwrap();
    });
    let log = previous_seen.clone();
    state.on_change("a", move |state, _value| {
        log.borrow_mut().push(state.previous("a"));
    });

    state.set("a", 3).unwrap();
    assert_eq!(state.number("b"), Some(3.0));
    // the nested pass's previous records did not leak into the outer pass
    assert_eq!(*previous_seen.borrow(), vec![Some(Value::from(2))]);
}

// ============================================================================
// Derived caching and recomputation
// ============================================================================

#[test]
fn test_derived_properties_cache_and_recompute() {
    static RAN: AtomicU32 = AtomicU32::new(0);
    static NOT_CACHED_RAN: AtomicU32 = AtomicU32::new(0);

    let schema = Arc::new(
        Definition::new()
            .prop("name", ("string", true))
            .derived(
                "greeting",
                Derived::new(["name"], |state: &Instance| {
                    RAN.fetch_add(1, Ordering::SeqCst);
                    Value::from(format!("hi, {}", state.string("name").unwrap_or_default()))
                }),
            )
            .derived(
                "not_cached",
                Derived::new(["name"], |state: &Instance| {
                    NOT_CACHED_RAN.fetch_add(1, Ordering::SeqCst);
                    Value::from(format!("hi, {}", state.string("name").unwrap_or_default()))
                })
                .uncached(),
            )
            .compile()
            .unwrap(),
    );

    let foo = Instance::new(schema, [("name", "henrik")]).unwrap();
    assert_eq!(RAN.load(Ordering::SeqCst), 0);
    assert_eq!(foo.string("greeting").as_deref(), Some("hi, henrik"));
    assert_eq!(foo.string("greeting").as_deref(), Some("hi, henrik"));
    assert_eq!(RAN.load(Ordering::SeqCst), 1);
    assert_eq!(NOT_CACHED_RAN.load(Ordering::SeqCst), 0);

    foo.set("name", "someone").unwrap();
    assert_eq!(foo.string("greeting").as_deref(), Some("hi, someone"));
    assert_eq!(foo.string("greeting").as_deref(), Some("hi, someone"));
    assert_eq!(RAN.load(Ordering::SeqCst), 2);
    // triggered once for the change event payload
    assert_eq!(NOT_CACHED_RAN.load(Ordering::SeqCst), 1);
    assert_eq!(foo.string("not_cached").as_deref(), Some("hi, someone"));
    assert_eq!(NOT_CACHED_RAN.load(Ordering::SeqCst), 2);
    assert_eq!(foo.string("not_cached").as_deref(), Some("hi, someone"));
    assert_eq!(NOT_CACHED_RAN.load(Ordering::SeqCst), 3);
}

#[test]
fn test_cached_derived_fires_only_when_actually_changed() {
    let schema = Arc::new(
        Definition::new()
            .prop("name", ("string", true))
            .prop("other", "string")
            .derived(
                "greeting",
                Derived::new(["name", "other"], |state: &Instance| {
                    Value::from(format!("hi, {}", state.string("name").unwrap_or_default()))
                }),
            )
            .compile()
            .unwrap(),
    );
    let foo = Instance::new(schema, [("name", "henrik")]).unwrap();
    let changed = Rc::new(Cell::new(0));
    let count = changed.clone();
    foo.on_change("greeting", move |_state, _value| {
        count.set(count.get() + 1);
    });

    foo.set("name", "new").unwrap();
    assert_eq!(changed.get(), 1);
    // recomputes, but the result is identical, so no event
    foo.set("other", "new").unwrap();
    assert_eq!(changed.get(), 1);
}

#[test]
fn test_derived_on_derived_fires_in_dependency_order() {
    let schema = Arc::new(
        Definition::new()
            .prop("name", ("string", true))
            .derived(
                "greeting",
                Derived::new(["name"], |state: &Instance| {
                    Value::from(format!("hi, {}", state.string("name").unwrap_or_default()))
                }),
            )
            .derived(
                "awesome_greeting",
                Derived::new(["greeting"], |state: &Instance| {
                    Value::from(format!("{}!", state.string("greeting").unwrap_or_default()))
                }),
            )
            .compile()
            .unwrap(),
    );
    let foo = Instance::new(schema, [("name", "henrik")]).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    for event in ["name", "greeting", "awesome_greeting"] {
        let log = order.clone();
        foo.on_change(event, move |_state, value| {
            log.borrow_mut().push((event.to_string(), value.clone()));
        });
    }
    let log = order.clone();
    foo.on_any_change(move |_state| {
        log.borrow_mut().push(("change".to_string(), Value::Null));
    });

    foo.set("name", "something").unwrap();
    assert_eq!(
        *order.borrow(),
        vec![
            ("name".to_string(), Value::from("something")),
            ("greeting".to_string(), Value::from("hi, something")),
            (
                "awesome_greeting".to_string(),
                Value::from("hi, something!")
            ),
            ("change".to_string(), Value::Null),
        ]
    );
}

#[test]
fn test_derived_triggered_per_instance() {
    let foo = Instance::new(person(), [("first_name", "Silly"), ("last_name", "Fool")]).unwrap();
    let bar = Instance::new(person(), [("first_name", "Bar"), ("last_name", "Man")]).unwrap();

    let foo_fired = Rc::new(Cell::new(0));
    let count = foo_fired.clone();
    foo.on_change("name", move |_state, _value| {
        count.set(count.get() + 1);
    });
    foo.set("first_name", "bob").unwrap();

    let bar_fired = Rc::new(Cell::new(0));
    let count = bar_fired.clone();
    bar.on_change("name", move |_state, _value| {
        count.set(count.get() + 1);
    });
    bar.set("first_name", "bob too").unwrap();

    assert_eq!(foo_fired.get(), 1);
    assert_eq!(bar_fired.get(), 1);
    assert_eq!(foo.string("name").as_deref(), Some("bob Fool"));
    assert_eq!(bar.string("name").as_deref(), Some("bob too Man"));
}

// ============================================================================
// Custom data types
// ============================================================================

#[test]
fn test_custom_data_types_with_read_transform() {
    let schema = Arc::new(
        Definition::new()
            .prop("silliness", "crazy")
            .data_type(
                "crazy",
                DataType::new("crazy", |raw| Ok(raw.clone())).with_read(|stored| {
                    Value::from(format!("{}crazy!", stored.as_str().unwrap_or_default()))
                }),
            )
            .compile()
            .unwrap(),
    );
    let foo = Instance::new(schema, [("silliness", "you ")]).unwrap();
    assert_eq!(foo.string("silliness").as_deref(), Some("you crazy!"));
    // persisted output keeps the raw stored form
    assert_eq!(
        foo.serialize().get("silliness"),
        Some(&serde_json::Value::String("you ".to_string()))
    );
}

#[test]
fn test_custom_compare_is_used() {
    static COMPARE_RAN: AtomicU32 = AtomicU32::new(0);

    let schema = Arc::new(
        Definition::new()
            .prop("silliness", "crazy")
            .data_type(
                "crazy",
                DataType::new("crazy", |raw| Ok(raw.clone())).with_compare(|_old, _new| {
                    COMPARE_RAN.fetch_add(1, Ordering::SeqCst);
                    false
                }),
            )
            .compile()
            .unwrap(),
    );

    // compare runs even for the first write
    let foo = Instance::new(schema, [("silliness", "you")]).unwrap();
    assert_eq!(COMPARE_RAN.load(Ordering::SeqCst), 1);

    foo.set("silliness", "they").unwrap();
    assert_eq!(COMPARE_RAN.load(Ordering::SeqCst), 2);

    // compare reporting "changed" means identical writes still fire
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();
    foo.on_change("silliness", move |_state, _value| {
        count.set(count.get() + 1);
    });
    foo.set("silliness", "they").unwrap();
    assert_eq!(fired.get(), 1);
}

// ============================================================================
// Values lists and toggle
// ============================================================================

#[test]
fn test_values_list_basic() {
    let schema = Arc::new(
        Definition::new()
            .prop("state", Prop::new().values(["CA", "WA", "NV"]))
            .compile()
            .unwrap(),
    );
    let m = Instance::with_defaults(schema).unwrap();

    let error = m.set("state", "PR").unwrap_err();
    assert!(matches!(error, StateError::NotAllowedValue { .. }));
    assert_eq!(m.get("state"), None);

    m.set("state", "CA").unwrap();
    assert_eq!(m.string("state").as_deref(), Some("CA"));
}

#[test]
fn test_values_list_default() {
    let schema = Arc::new(
        Definition::new()
            .prop("state", Prop::new().values(["CA", "WA", "NV"]).default("CA"))
            .compile()
            .unwrap(),
    );
    let m = Instance::with_defaults(schema).unwrap();
    assert_eq!(m.string("state").as_deref(), Some("CA"));
    assert!(m.set("state", "PR").is_err());
}

#[test]
fn test_toggle_booleans_and_values() {
    let schema = Arc::new(
        Definition::new()
            .prop("is_awesome", "boolean")
            .prop("some_number", "number")
            .prop("state", Prop::new().values(["CA", "WA", "NV"]).default("CA"))
            .compile()
            .unwrap(),
    );
    let m = Instance::with_defaults(schema).unwrap();

    let error = m.toggle("some_number").unwrap_err();
    assert!(matches!(error, StateError::Untoggleable { .. }));

    m.toggle("state").unwrap();
    assert_eq!(m.string("state").as_deref(), Some("WA"));
    m.toggle("state").unwrap();
    assert_eq!(m.string("state").as_deref(), Some("NV"));
    m.toggle("state").unwrap();
    assert_eq!(m.string("state").as_deref(), Some("CA"));

    // unset booleans toggle to true first
    m.toggle("is_awesome").unwrap();
    assert_eq!(m.boolean("is_awesome"), Some(true));
    m.toggle("is_awesome").unwrap();
    assert_eq!(m.boolean("is_awesome"), Some(false));
    m.toggle("is_awesome").unwrap();
    assert_eq!(m.boolean("is_awesome"), Some(true));
}

// ============================================================================
// Tracing
// ============================================================================

#[derive(Default)]
struct CountingTracer {
    passes: Cell<u32>,
    changes: Cell<u32>,
    cache_hits: Cell<u32>,
}

impl Tracer for CountingTracer {
    fn on_attribute_changed(&self, _attribute: &str, _value: &Value) {
        self.changes.set(self.changes.get() + 1);
    }

    fn on_derived_read(&self, _attribute: &str, read: DerivedRead) {
        if read == DerivedRead::CacheHit {
            self.cache_hits.set(self.cache_hits.get() + 1);
        }
    }

    fn on_pass_complete(&self, _changed: usize) {
        self.passes.set(self.passes.get() + 1);
    }
}

#[test]
fn test_tracer_observes_passes_and_cache_hits() {
    let foo = Instance::new(person(), [("first_name", "jim"), ("last_name", "tom")]).unwrap();
    let tracer = Rc::new(CountingTracer::default());
    foo.set_tracer(tracer.clone());

    foo.set("first_name", "john").unwrap();
    assert_eq!(tracer.passes.get(), 1);
    // first_name, name, and initials all changed
    assert_eq!(tracer.changes.get(), 3);

    foo.string("name").unwrap();
    assert_eq!(tracer.cache_hits.get(), 1);
}
