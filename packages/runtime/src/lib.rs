//! The capsula runtime: definition compiler, instance builder, dispatch
//! engine, deferred call queue, and hierarchy tie-tree.
//!
//! A [`Schema`] compiles once per type into an immutable [`Descriptor`];
//! a [`Runtime`] builds instances of it, enforces context-scoped access,
//! and propagates port calls through the wired graph - synchronously
//! depth-first, or breadth-first across cooperative ticks through the
//! deferred queue.
//!
//! ```
//! use capsula_core::Value;
//! use capsula_runtime::{method_fn, Runtime, Schema};
//!
//! # fn main() -> capsula_core::Result<()> {
//! let greeter = Schema::new("Greeter")
//!     .input("hello")
//!     .method(
//!         "hello",
//!         method_fn(|_ctx, args| {
//!             let who = args.first().and_then(|v| v.as_str()).unwrap_or("world");
//!             Ok(Value::from(format!("Hi, {}!", who)))
//!         }),
//!     )
//!     .compile()?;
//!
//! let mut rt = Runtime::new();
//! let unit = rt.build(&greeter, vec![])?;
//! let out = rt.run_in_context(unit, |rt| rt.call("this.hello", vec![Value::from("you")]))?;
//! assert_eq!(out, Value::from("Hi, you!"));
//! # Ok(())
//! # }
//! ```

mod compile;
mod context;
mod descriptor;
mod dispatch;
mod queue;
mod schema;
mod tree;
mod unit;

pub use context::ContextToken;
pub use descriptor::{
    args_fn, filter_fn, method_fn, ArgsFn, Descriptor, ElemKind, FilterFn, MethodFn, UnitType,
    Visibility,
};
pub use dispatch::{context_preserving, CallCtx, Pipeline};
pub use queue::Pending;
pub use schema::{ChildArgs, ContainerKind, DataSpec, Endpoint, Owner, Schema};
pub use tree::{ElementRef, NodeId, SlotKind, TreeEvent};
pub use unit::{Dir, PortId, Runtime, UnitId};
