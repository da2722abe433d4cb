//! The dispatch engine: synchronous, depth-first call propagation.
//!
//! A port call runs the entry stage, the exit stage, then every target in
//! wiring order on the caller's own stack. Port targets recurse; the walk
//! is a plain graph walk with no cycle detection, so an accidental wiring
//! cycle is unbounded recursion and a caller responsibility. Faults from
//! anywhere downstream are intercepted once, at the topmost synchronous
//! call, and offered to the nearest ancestor error handler.

use capsula_core::{Args, Error, Flow, Result, Value};

use crate::descriptor::{UnitType, Visibility};
use crate::queue::Pending;
use crate::schema::{Endpoint, Owner};
use crate::unit::{Dir, PortId, Runtime, Target, UnitId};

/// A port stage pipeline. `None` passes arguments through unchanged.
#[derive(Clone)]
pub enum Pipeline {
    None,
    Fixed(Args),
    Transform(crate::descriptor::FilterFn),
    Stop,
}

/// Parse a call target; a bare name is shorthand for `this.name`.
pub(crate) fn call_target(text: &str) -> Result<Endpoint> {
    if text.contains('.') {
        Endpoint::parse(text)
    } else {
        let name = text.trim_matches([' ', '\t']);
        if name.is_empty() {
            return Err(Error::IllegalArgument {
                message: "empty call target".to_string(),
            });
        }
        Ok(Endpoint {
            owner: Owner::This,
            name: name.to_string(),
            dynamic: false,
        })
    }
}

impl Runtime {
    /// Call a port or method by path, relative to the current context -
    /// `"this.run"`, `"worker.in"`, or a bare `"run"`.
    ///
    /// Inputs may be called by the owner's owner or the owner itself;
    /// outputs only from inside the owner. A fault anywhere downstream is
    /// intercepted here when this is the topmost synchronous call and
    /// delegated to the nearest ancestor `handle`.
    pub fn call(&mut self, target: &str, args: Args) -> Result<Value> {
        let ep = call_target(target)?;
        let base = self.current();
        let unit = self.endpoint_unit(base, &ep)?;

        let topmost = self.depth == 0;
        self.depth += 1;
        let out = self.dispatch_element(unit, &ep.name, ep.is_this(), &args);
        self.depth -= 1;

        match out {
            Err(e) if topmost => self.delegate_fault(e),
            other => other,
        }
    }

    /// Route a named element call: ports first, then methods.
    pub(crate) fn dispatch_element(
        &mut self,
        unit: UnitId,
        name: &str,
        from_inside: bool,
        args: &Args,
    ) -> Result<Value> {
        if let Some(port) = self.find_port(unit, name) {
            match self.port_dir(port) {
                Dir::In => self.check_self_or_child(unit, name)?,
                Dir::Out => self.check_owner_exact(unit, name)?,
            }
            return self.dispatch_port(port, args.clone());
        }
        if let Some(m) = self.unit(unit).descriptor.method(name) {
            if !from_inside && m.visibility == Visibility::Protected {
                return Err(Error::OutOfContext {
                    message: format!(
                        "{} is protected inside {}",
                        name,
                        self.unit(unit).name
                    ),
                });
            }
            self.check_self_or_child(unit, name)?;
            return self.invoke_method(unit, name, args);
        }
        Err(Error::ElementNotFound {
            name: name.to_string(),
        })
    }

    /// One port dispatch: entry stage, exit stage, targets, packing.
    /// Access has already been checked; recursion re-enters here directly.
    pub(crate) fn dispatch_port(&mut self, port: PortId, args: Args) -> Result<Value> {
        let (owner, dir, entry_enabled, exit_enabled, entry, exit, unpack, targets) = {
            let p = self.port_ref(port);
            (
                p.owner,
                p.dir,
                p.entry_enabled,
                p.exit_enabled,
                p.entry.clone(),
                p.exit.clone(),
                p.unpack,
                p.targets.clone(),
            )
        };
        let outer = self.unit(owner).owner.unwrap_or(UnitId::ROOT);
        tracing::trace!(
            port = %self.port_name(port),
            unit = %self.unit_name(owner),
            n = args.len(),
            "dispatch"
        );

        // Entry stage: the side the call arrives from. The transform body
        // runs with the outer unit's access rights.
        if !entry_enabled {
            return Ok(Value::Null);
        }
        self.port_mut(port).last_entry = Some(args.clone());
        let args = match self.run_stage(&entry, outer, args)? {
            Some(args) => args,
            None => return Ok(Value::Null),
        };

        // Exit stage: the inner side, with the owner's access rights.
        if !exit_enabled {
            return Ok(Value::Null);
        }
        let args = match self.run_stage(&exit, owner, args)? {
            Some(args) => args,
            None => return Ok(Value::Null),
        };
        self.port_mut(port).last_exit = Some(args.clone());

        // Propagation: inputs deliver inward, outputs deliver outward.
        let prop_ctx = match dir {
            Dir::In => owner,
            Dir::Out => outer,
        };
        let mut results = Vec::with_capacity(targets.len());
        self.run_in_context(prop_ctx, |rt| -> Result<()> {
            for target in &targets {
                let value = match target {
                    Target::Port(q) => rt.dispatch_port(*q, args.clone())?,
                    Target::Method { unit, name } => rt.invoke_method(*unit, name, &args)?,
                    Target::Callable(f) => {
                        let mut cctx = CallCtx::new(rt, prop_ctx);
                        f(&mut cctx, &args)?
                    }
                };
                results.push(value);
            }
            Ok(())
        })?;

        Ok(pack(results, unpack))
    }

    fn run_stage(&mut self, stage: &Pipeline, ctx: UnitId, args: Args) -> Result<Option<Args>> {
        match stage {
            Pipeline::None => Ok(Some(args)),
            Pipeline::Fixed(fixed) => Ok(Some(fixed.clone())),
            Pipeline::Stop => Ok(None),
            Pipeline::Transform(f) => {
                let f = f.clone();
                let flow = self.run_in_context(ctx, |rt| {
                    let mut cctx = CallCtx::new(rt, ctx);
                    f(&mut cctx, &args)
                })?;
                match flow {
                    Flow::Continue(args) => Ok(Some(args)),
                    Flow::Stop => Ok(None),
                }
            }
        }
    }

    /// Run the most-derived body of a method, in the method's own unit
    /// context.
    pub(crate) fn invoke_method(&mut self, unit: UnitId, name: &str, args: &Args) -> Result<Value> {
        let body = match self.unit(unit).descriptor.method(name) {
            Some(m) => m.chain[0].clone(),
            None => {
                return Err(Error::ElementNotFound {
                    name: name.to_string(),
                })
            }
        };
        let name = name.to_string();
        self.run_in_context(unit, |rt| {
            let mut cctx = CallCtx::with_method(rt, unit, &name, 0);
            body(&mut cctx, args)
        })
    }

    /// Offer a fault to the nearest `handle` on the owner chain, starting
    /// from the current context. A handled fault becomes a `Null` result;
    /// an unhandled one returns to the caller.
    fn delegate_fault(&mut self, err: Error) -> Result<Value> {
        let mut at = Some(self.current());
        while let Some(unit) = at {
            if let Some(handler) = self.unit(unit).descriptor.handle.clone() {
                tracing::debug!(
                    unit = %self.unit_name(unit),
                    code = err.code(),
                    "fault delegated"
                );
                let payload = vec![err.to_value()];
                self.run_in_context(unit, |rt| {
                    let mut cctx = CallCtx::new(rt, unit);
                    handler(&mut cctx, &payload)
                })?;
                return Ok(Value::Null);
            }
            at = self.unit(unit).owner;
            if at.is_none() && unit != UnitId::ROOT {
                at = Some(UnitId::ROOT);
            }
        }
        Err(err)
    }
}

fn pack(mut results: Vec<Value>, unpack: bool) -> Value {
    match results.len() {
        0 => Value::Null,
        1 if unpack => results.remove(0),
        _ => Value::Array(results),
    }
}

/// What a method, filter, or handler body receives: scoped access to the
/// runtime on behalf of one unit.
///
/// The borrow keeps bodies honest - everything a body does goes back
/// through the runtime under the context register discipline.
pub struct CallCtx<'a> {
    rt: &'a mut Runtime,
    unit: UnitId,
    method: Option<(String, usize)>,
}

impl<'a> CallCtx<'a> {
    pub(crate) fn new(rt: &'a mut Runtime, unit: UnitId) -> CallCtx<'a> {
        CallCtx {
            rt,
            unit,
            method: None,
        }
    }

    pub(crate) fn with_method(
        rt: &'a mut Runtime,
        unit: UnitId,
        name: &str,
        index: usize,
    ) -> CallCtx<'a> {
        CallCtx {
            rt,
            unit,
            method: Some((name.to_string(), index)),
        }
    }

    /// The unit this body runs on behalf of.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The unit's display name.
    pub fn name(&self) -> &str {
        self.rt.unit_name(self.unit)
    }

    /// Escape hatch to the full runtime surface.
    pub fn runtime(&mut self) -> &mut Runtime {
        self.rt
    }

    /// Call a port or method synchronously, relative to this unit -
    /// `"out"`, `"this.out"`, or `"child.in"`.
    pub fn call(&mut self, target: &str, args: &[Value]) -> Result<Value> {
        self.rt.call(target, args.to_vec())
    }

    /// Call a port on a declared child.
    pub fn call_child(&mut self, child: &str, port: &str, args: &[Value]) -> Result<Value> {
        self.rt.call(&format!("{}.{}", child, port), args.to_vec())
    }

    /// Defer a call to the next cooperative tick.
    pub fn send(&mut self, target: &str, args: &[Value]) -> Result<Pending> {
        self.rt.send(target, args.to_vec())
    }

    /// Read one of this unit's data cells.
    pub fn data(&self, name: &str) -> Result<Value> {
        self.rt.data(self.unit, name)
    }

    /// Write one of this unit's data cells.
    pub fn set_data(&mut self, name: &str, value: Value) -> Result<()> {
        self.rt.set_data(self.unit, name, value)
    }

    /// Invoke the next implementation up the override chain of the method
    /// currently executing. Past the end of the chain the super method
    /// does not exist.
    pub fn call_super(&mut self, args: &[Value]) -> Result<Value> {
        let (name, index) = match &self.method {
            Some(m) => m.clone(),
            None => {
                return Err(Error::IllegalOperationType {
                    message: "call_super outside a method body".to_string(),
                })
            }
        };
        let body = self
            .rt
            .unit(self.unit)
            .descriptor
            .method(&name)
            .and_then(|m| m.chain.get(index + 1))
            .cloned()
            .ok_or_else(|| Error::ElementNotFound {
                name: format!("super of {}", name),
            })?;
        let mut cctx = CallCtx::with_method(self.rt, self.unit, &name, index + 1);
        body(&mut cctx, args)
    }

    /// Build a capsule dynamically; it attaches under this unit.
    pub fn build(&mut self, ty: &UnitType, args: Args) -> Result<UnitId> {
        self.rt.build(ty, args)
    }

    /// Tie two slots, named relative to this unit.
    pub fn tie_slots(&mut self, top: &str, bottom: &str, at: Option<usize>) -> Result<()> {
        self.rt.tie_named(top, bottom, at)
    }

    /// Undo a tie installed between two slots.
    pub fn untie_slots(&mut self, top: &str, bottom: &str) -> Result<()> {
        self.rt.untie_named(top, bottom)
    }
}

/// Wrap a callable so it always runs in the context current at wrap time.
/// For handing to external event sources.
pub fn context_preserving<F>(rt: &Runtime, f: F) -> impl Fn(&mut Runtime, &[Value]) -> Result<Value>
where
    F: Fn(&mut CallCtx<'_>, &[Value]) -> Result<Value>,
{
    let token = rt.capture_context();
    move |rt: &mut Runtime, args: &[Value]| {
        rt.run_captured(token, |rt| {
            let unit = rt.current();
            let mut cctx = CallCtx::new(rt, unit);
            f(&mut cctx, args)
        })
    }
}
