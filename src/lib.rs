#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod datatype;
mod emitter;
mod error;
mod instance;
mod schema;
pub mod tracer;
mod value;

pub use datatype::{register, CoerceFn, CompareFn, DataType, ReadFn};
pub use emitter::{ChangeListener, PassListener, SubscriptionId};
pub use error::{SchemaError, StateError};
pub use instance::Instance;
pub use schema::{
    AttributeSpec, ComputeFn, Definition, Derived, DerivedSpec, ExtraProperties, Prop, Schema,
    TestFn,
};
pub use tracer::{DerivedRead, NoopTracer, Tracer};
pub use value::Value;
