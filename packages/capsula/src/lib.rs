//! Capsula: declarative component definitions compiled into unit types,
//! instantiated as encapsulated capsules, and driven through wired ports.
//!
//! A capsule only ever reaches itself and its direct children; everything
//! else is out of context. Calls propagate depth-first through declared
//! wires, or breadth-first across cooperative ticks when deferred. Hook
//! and loop slots tie capsule hierarchy onto an external element tree
//! owned by the host.
//!
//! ```
//! use capsula::prelude::*;
//!
//! # fn main() -> capsula::Result<()> {
//! let counter = Schema::new("Counter")
//!     .data("n", Value::from(0))
//!     .input("bump")
//!     .method(
//!         "bump",
//!         method_fn(|ctx, _args| {
//!             let n = ctx.data("n")?.as_integer().unwrap_or(0) + 1;
//!             ctx.set_data("n", Value::from(n))?;
//!             Ok(Value::from(n))
//!         }),
//!     )
//!     .compile()?;
//!
//! let mut rt = Runtime::new();
//! let unit = rt.build(&counter, vec![])?;
//! rt.run_in_context(unit, |rt| rt.call("this.bump", vec![]))?;
//! let out = rt.run_in_context(unit, |rt| rt.call("this.bump", vec![]))?;
//! assert_eq!(out, Value::from(2));
//! # Ok(())
//! # }
//! ```

pub use capsula_core::{Args, Error, Flow, Result, Value};
pub use capsula_runtime::{
    args_fn, context_preserving, filter_fn, method_fn, ArgsFn, CallCtx, ChildArgs, ContainerKind,
    ContextToken, DataSpec, Descriptor, Dir, ElemKind, ElementRef, Endpoint, FilterFn, MethodFn,
    NodeId, Owner, Pending, Pipeline, PortId, Runtime, Schema, SlotKind, TreeEvent, UnitId,
    UnitType, Visibility,
};

/// The short list of names almost every user of the crate wants.
pub mod prelude {
    pub use capsula_core::{Args, Error, Flow, Result, Value};
    pub use capsula_runtime::{
        filter_fn, method_fn, CallCtx, ContainerKind, ElementRef, Runtime, Schema, SlotKind,
        TreeEvent, UnitId, UnitType,
    };
}
