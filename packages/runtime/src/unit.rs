//! Unit instances, the port arena, and the instance builder.
//!
//! The [`Runtime`] owns every live object: units, ports, tie-tree nodes,
//! the context stack, and the deferred-call queues. Links between objects
//! are arena indices ([`UnitId`], [`PortId`], [`NodeId`]), never owning
//! pointers, so attach/detach can never leave a dangling reference.
//! Detached units simply stay in the arena; ids are never reused.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use capsula_core::{Args, Error, Flow, Result, Value};

use crate::compile::{classify, Oriented, Side};
use crate::descriptor::{BindEdge, Descriptor, ElemKind, MethodFn, UnitType, Visibility};
use crate::dispatch::CallCtx;
use crate::queue::Message;
use crate::schema::{validate_element_name, ChildArgs, DataSpec, Endpoint, Owner};
use crate::tree::{NodeId, SlotKind, TreeEvent, TreeNode};
use crate::Pipeline;

/// Identity of a unit instance. Sequence-assigned, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub(crate) u32);

impl UnitId {
    /// The distinguished root unit - the initial context.
    pub const ROOT: UnitId = UnitId(0);
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a port instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub(crate) u32);

/// Port direction. Fixed for the port's whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    In,
    Out,
}

/// A propagation target of a port.
#[derive(Clone)]
pub(crate) enum Target {
    Port(PortId),
    Method { unit: UnitId, name: String },
    Callable(MethodFn),
}

/// A live port.
pub(crate) struct Port {
    pub owner: UnitId,
    pub name: String,
    pub dir: Dir,
    pub targets: Vec<Target>,
    pub entry_enabled: bool,
    pub exit_enabled: bool,
    pub entry: Pipeline,
    pub exit: Pipeline,
    pub last_entry: Option<Args>,
    pub last_exit: Option<Args>,
    pub unpack: bool,
}

/// A live unit instance.
pub(crate) struct Unit {
    pub name: String,
    pub descriptor: UnitType,
    pub owner: Option<UnitId>,
    pub children: Vec<UnitId>,
    pub child_names: BTreeMap<String, UnitId>,
    pub ports: Vec<PortId>,
    pub hooks: Vec<NodeId>,
    pub loops: Vec<NodeId>,
    pub data: BTreeMap<String, Value>,
}

/// The single-threaded cooperative runtime.
///
/// One `Runtime` is one execution world: it holds the arenas, the context
/// register, and the deferred-call queues. All operations go through
/// `&mut Runtime`, which is what makes the strictly single-threaded model
/// explicit.
pub struct Runtime {
    pub(crate) units: Vec<Unit>,
    pub(crate) ports: Vec<Port>,
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) ctx: Vec<UnitId>,
    pub(crate) main: VecDeque<Message>,
    pub(crate) aux: VecDeque<Message>,
    pub(crate) tick_callbacks: Vec<(u64, Box<dyn FnMut(&mut Runtime)>)>,
    pub(crate) observers: Vec<(u64, Box<dyn FnMut(&TreeEvent)>)>,
    pub(crate) next_token: u64,
    pub(crate) depth: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a fresh runtime. The root unit (the initial context) is
    /// pre-created.
    pub fn new() -> Runtime {
        let root_ty = std::rc::Rc::new(Descriptor::empty("root".to_string(), false));
        let root = Unit {
            name: "root".to_string(),
            descriptor: root_ty,
            owner: None,
            children: Vec::new(),
            child_names: BTreeMap::new(),
            ports: Vec::new(),
            hooks: Vec::new(),
            loops: Vec::new(),
            data: BTreeMap::new(),
        };
        Runtime {
            units: vec![root],
            ports: Vec::new(),
            nodes: Vec::new(),
            ctx: Vec::new(),
            main: VecDeque::new(),
            aux: VecDeque::new(),
            tick_callbacks: Vec::new(),
            observers: Vec::new(),
            next_token: 1,
            depth: 0,
        }
    }

    pub(crate) fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.0 as usize]
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> &mut Unit {
        &mut self.units[id.0 as usize]
    }

    pub(crate) fn port_ref(&self, id: PortId) -> &Port {
        &self.ports[id.0 as usize]
    }

    pub(crate) fn port_mut(&mut self, id: PortId) -> &mut Port {
        &mut self.ports[id.0 as usize]
    }

    /// Display name of a unit.
    pub fn unit_name(&self, id: UnitId) -> &str {
        &self.unit(id).name
    }

    /// The descriptor a unit was built from.
    pub fn descriptor_of(&self, id: UnitId) -> &UnitType {
        &self.unit(id).descriptor
    }

    /// The owning unit, if attached.
    pub fn owner_of(&self, id: UnitId) -> Option<UnitId> {
        self.unit(id).owner
    }

    /// Ordered child units.
    pub fn children_of(&self, id: UnitId) -> &[UnitId] {
        &self.unit(id).children
    }

    /// Look up a declared child by name.
    pub fn child_named(&self, id: UnitId, name: &str) -> Option<UnitId> {
        self.unit(id).child_names.get(name).copied()
    }

    /// Look up a port on a unit by name.
    pub fn find_port(&self, unit: UnitId, name: &str) -> Option<PortId> {
        self.unit(unit)
            .ports
            .iter()
            .copied()
            .find(|p| self.port_ref(*p).name == name)
    }

    /// The name of a port.
    pub fn port_name(&self, port: PortId) -> &str {
        &self.port_ref(port).name
    }

    /// The direction of a port.
    pub fn port_dir(&self, port: PortId) -> Dir {
        self.port_ref(port).dir
    }

    /// The unit a port belongs to.
    pub fn port_owner(&self, port: PortId) -> UnitId {
        self.port_ref(port).owner
    }

    fn create_port(&mut self, owner: UnitId, name: &str, dir: Dir) -> PortId {
        let id = PortId(self.ports.len() as u32);
        self.ports.push(Port {
            owner,
            name: name.to_string(),
            dir,
            targets: Vec::new(),
            entry_enabled: true,
            exit_enabled: true,
            entry: Pipeline::None,
            exit: Pipeline::None,
            last_entry: None,
            last_exit: None,
            unpack: true,
        });
        self.unit_mut(owner).ports.push(id);
        id
    }

    // ------------------------------------------------------------------
    // Instance builder
    // ------------------------------------------------------------------

    /// Build a new instance of a compiled type.
    ///
    /// The whole construction sequence runs as one context switch to the
    /// new instance. When the builder is invoked while some other instance
    /// is the current context, the new instance is attached under it.
    pub fn build(&mut self, ty: &UnitType, args: Args) -> Result<UnitId> {
        if ty.is_abstract() {
            return Err(Error::AbstractInstantiation {
                name: ty.name().to_string(),
            });
        }
        let id = UnitId(self.units.len() as u32);
        self.units.push(Unit {
            name: format!("{}{}", ty.name(), id),
            descriptor: ty.clone(),
            owner: None,
            children: Vec::new(),
            child_names: BTreeMap::new(),
            ports: Vec::new(),
            hooks: Vec::new(),
            loops: Vec::new(),
            data: BTreeMap::new(),
        });
        tracing::debug!(unit = %id, ty = %ty.name(), "building capsule");

        let creator = self.current();
        let ty = ty.clone();
        self.run_in_context(id, |rt| rt.populate(id, &ty, &args))?;

        if creator != UnitId::ROOT {
            self.attach(id, None)?;
        }
        Ok(id)
    }

    fn populate(&mut self, id: UnitId, ty: &UnitType, args: &Args) -> Result<()> {
        // Ports first: inputs then outputs, in descriptor order.
        for name in ty.inputs() {
            self.create_port(id, name, Dir::In);
        }
        for name in ty.outputs() {
            self.create_port(id, name, Dir::Out);
        }
        for name in ty.hooks() {
            let node = self.create_node(id, name, SlotKind::Hook);
            self.unit_mut(id).hooks.push(node);
        }
        for name in ty.loops() {
            let node = self.create_node(id, name, SlotKind::Loop);
            self.unit_mut(id).loops.push(node);
        }

        // Wire each input that has a same-named protected-method override.
        for name in ty.inputs() {
            let wired = matches!(
                ty.method(name),
                Some(m) if m.visibility == Visibility::Protected
            );
            if wired {
                let port = self
                    .find_port(id, name)
                    .ok_or_else(|| Error::unexpected("input port vanished during build"))?;
                self.port_mut(port).targets.push(Target::Method {
                    unit: id,
                    name: name.clone(),
                });
            }
        }

        // Children, in declaration order. The recursive build runs nested
        // inside the current context switch, so each child attaches here.
        for decl in &ty.children {
            let child_args = match &decl.args {
                ChildArgs::None => Vec::new(),
                ChildArgs::Fixed(a) => a.clone(),
                ChildArgs::Forward => args.clone(),
                ChildArgs::Deferred(f) => f(args),
            };
            let child = self.build(&decl.ty, child_args)?;
            self.unit_mut(child).name = decl.name.clone();
            self.unit_mut(id).child_names.insert(decl.name.clone(), child);
        }

        // Data cells: per-instance values.
        for decl in &ty.data {
            let value = match &decl.spec {
                DataSpec::Static(v) => v.clone(),
                DataSpec::Container(kind) => kind.empty_value(),
                DataSpec::Factory(f) => {
                    let f = f.clone();
                    let mut cctx = CallCtx::new(self, id);
                    f(&mut cctx, args)?
                }
            };
            self.unit_mut(id).data.insert(decl.name.clone(), value);
        }

        // Filters: declared from the inside install the exit pipeline,
        // declared from the outside (on a child's port) the entry pipeline.
        for decl in &ty.filters {
            let port = self.resolve_port(id, &decl.target)?;
            let pipeline = Pipeline::Transform(decl.body.clone());
            match decl.target.owner {
                Owner::This => self.port_mut(port).exit = pipeline,
                Owner::Child(_) => self.port_mut(port).entry = pipeline,
            }
        }

        // Wires and ties, in declaration order.
        for edge in &ty.binds {
            self.apply_bind(id, edge)?;
        }

        // Constructor chain.
        if let Some(m) = ty.method("init") {
            let body = m.chain[0].clone();
            let mut cctx = CallCtx::with_method(self, id, "init", 0);
            body(&mut cctx, args)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Endpoint resolution against a live instance
    // ------------------------------------------------------------------

    pub(crate) fn endpoint_unit(&self, base: UnitId, ep: &Endpoint) -> Result<UnitId> {
        match &ep.owner {
            Owner::This => Ok(base),
            Owner::Child(name) => self
                .child_named(base, name)
                .or_else(|| {
                    self.unit(base)
                        .children
                        .iter()
                        .copied()
                        .find(|c| self.unit(*c).name == *name)
                })
                .ok_or_else(|| Error::ElementNotFound { name: name.clone() }),
        }
    }

    pub(crate) fn resolve_port(&self, base: UnitId, ep: &Endpoint) -> Result<PortId> {
        let owner = self.endpoint_unit(base, ep)?;
        self.find_port(owner, &ep.name)
            .ok_or_else(|| Error::ElementNotFound {
                name: ep.to_string(),
            })
    }

    pub(crate) fn resolve_node(&self, base: UnitId, ep: &Endpoint) -> Result<NodeId> {
        let owner = self.endpoint_unit(base, ep)?;
        self.find_slot(owner, &ep.name)
            .ok_or_else(|| Error::ElementNotFound {
                name: ep.to_string(),
            })
    }

    /// A resolved live element together with its classification kind.
    fn resolve_live(&self, base: UnitId, ep: &Endpoint) -> Result<(Side, LiveElem)> {
        let owner = self.endpoint_unit(base, ep)?;
        let is_this = ep.is_this();

        if let Some(port) = self.find_port(owner, &ep.name) {
            let kind = match self.port_ref(port).dir {
                Dir::In => ElemKind::Input,
                Dir::Out => ElemKind::Output,
            };
            return Ok((Side { is_this, kind }, LiveElem::Port(port)));
        }
        if let Some(node) = self.find_slot(owner, &ep.name) {
            let kind = match self.nodes[node.0 as usize].kind {
                SlotKind::Hook => ElemKind::Hook,
                SlotKind::Loop => ElemKind::Loop,
            };
            return Ok((Side { is_this, kind }, LiveElem::Node(node)));
        }
        if let Some(m) = self.unit(owner).descriptor.method(&ep.name) {
            // A child's protected methods are invisible from outside.
            if is_this || m.visibility == Visibility::Public {
                return Ok((
                    Side {
                        is_this,
                        kind: ElemKind::Method,
                    },
                    LiveElem::Method(owner, ep.name.clone()),
                ));
            }
        }
        Err(Error::ElementNotFound {
            name: ep.to_string(),
        })
    }

    fn apply_bind(&mut self, base: UnitId, edge: &BindEdge) -> Result<()> {
        match edge {
            BindEdge::Wire { src, dst, dst_kind } => {
                let src_port = self.resolve_port(base, src)?;
                let target = match dst_kind {
                    ElemKind::Method => Target::Method {
                        unit: self.endpoint_unit(base, dst)?,
                        name: dst.name.clone(),
                    },
                    _ => Target::Port(self.resolve_port(base, dst)?),
                };
                self.port_mut(src_port).targets.push(target);
                Ok(())
            }
            BindEdge::Tie { top, bottom } => {
                let top = self.resolve_node(base, top)?;
                let bottom = self.resolve_node(base, bottom)?;
                self.tie(top, bottom, None)
            }
            BindEdge::Dynamic { left, right } => {
                // Dynamically-marked names resolve now, against the live
                // instance - including ports added after construction.
                let (ls, le) = self.resolve_live(base, left)?;
                let (rs, re) = self.resolve_live(base, right)?;
                match classify(ls, rs, &left.to_string(), &right.to_string())? {
                    Oriented::Wire { src_left } => {
                        let (src, dst) = if src_left { (le, re) } else { (re, le) };
                        let src_port = match src {
                            LiveElem::Port(p) => p,
                            _ => return Err(Error::unexpected("wire source must be a port")),
                        };
                        let target = match dst {
                            LiveElem::Port(p) => Target::Port(p),
                            LiveElem::Method(unit, name) => Target::Method { unit, name },
                            LiveElem::Node(_) => {
                                return Err(Error::unexpected("wire sink cannot be a slot"))
                            }
                        };
                        self.port_mut(src_port).targets.push(target);
                        Ok(())
                    }
                    Oriented::Tie { top_left } => {
                        let (top, bottom) = if top_left { (le, re) } else { (re, le) };
                        match (top, bottom) {
                            (LiveElem::Node(t), LiveElem::Node(b)) => self.tie(t, b, None),
                            _ => Err(Error::unexpected("tie sides must be slots")),
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------

    /// Attach a unit as a child of the current context, optionally at a
    /// position in the child list.
    pub fn attach(&mut self, child: UnitId, at: Option<usize>) -> Result<()> {
        let parent = self.current();
        if child == parent {
            return Err(Error::IllegalOperationType {
                message: "a capsule cannot attach to itself".to_string(),
            });
        }
        if self.unit(child).owner.is_some() {
            return Err(Error::CapsuleAlreadyAttached {
                name: self.unit(child).name.clone(),
            });
        }
        // No ownership cycles: the parent must not live inside the child.
        let mut walk = self.unit(parent).owner;
        while let Some(u) = walk {
            if u == child {
                return Err(Error::IllegalOperationType {
                    message: format!(
                        "attaching {} under {} would close an ownership cycle",
                        self.unit(child).name,
                        self.unit(parent).name
                    ),
                });
            }
            walk = self.unit(u).owner;
        }
        let len = self.unit(parent).children.len();
        let index = at.unwrap_or(len);
        if index > len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        self.unit_mut(parent).children.insert(index, child);
        self.unit_mut(child).owner = Some(parent);
        tracing::trace!(child = %child, parent = %parent, "attached capsule");

        // Attach lifecycle, on the new child and its whole subtree.
        for unit in self.subtree_units(child) {
            self.invoke_lifecycle(unit, "on_attach")?;
        }
        Ok(())
    }

    /// Detach a unit from its owner. Allowed from the owner's context or
    /// the unit's own.
    pub fn detach(&mut self, child: UnitId) -> Result<()> {
        let owner = self.unit(child).owner.ok_or_else(|| Error::IllegalOperationType {
            message: format!("{} is not attached", self.unit(child).name),
        })?;
        let cur = self.current();
        if cur != owner && cur != child {
            return Err(Error::OutOfContext {
                message: format!(
                    "only {} or {} may detach {}",
                    self.unit(owner).name,
                    self.unit(child).name,
                    self.unit(child).name
                ),
            });
        }

        for unit in self.subtree_units(child) {
            self.invoke_lifecycle(unit, "on_detach")?;
        }

        self.unit_mut(owner).children.retain(|c| *c != child);
        self.unit_mut(child).owner = None;
        tracing::trace!(child = %child, parent = %owner, "detached capsule");
        Ok(())
    }

    /// The unit plus all of its descendants, depth first.
    pub(crate) fn subtree_units(&self, root: UnitId) -> Vec<UnitId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(u) = stack.pop() {
            out.push(u);
            for child in self.unit(u).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub(crate) fn invoke_lifecycle(&mut self, unit: UnitId, name: &str) -> Result<()> {
        let body = match self.unit(unit).descriptor.method(name) {
            Some(m) => m.chain[0].clone(),
            None => return Ok(()),
        };
        let name = name.to_string();
        self.run_in_context(unit, |rt| {
            let mut cctx = CallCtx::with_method(rt, unit, &name, 0);
            body(&mut cctx, &[]).map(|_| ())
        })
    }

    // ------------------------------------------------------------------
    // Instance-level wiring
    // ------------------------------------------------------------------

    /// Wire two elements at the instance level, relative to the current
    /// context - e.g. `rt.wire("this.in", "worker.run")`. Classification
    /// follows the same table as declared bindings.
    pub fn wire(&mut self, left: &str, right: &str) -> Result<()> {
        let base = self.current();
        let left = Endpoint::parse(left)?;
        let right = Endpoint::parse(right)?;
        let (ls, le) = self.resolve_live(base, &left)?;
        let (rs, re) = self.resolve_live(base, &right)?;
        match classify(ls, rs, &left.to_string(), &right.to_string())? {
            Oriented::Wire { src_left } => {
                let (src, dst) = if src_left { (le, re) } else { (re, le) };
                let src_port = match src {
                    LiveElem::Port(p) => p,
                    _ => return Err(Error::unexpected("wire source must be a port")),
                };
                let target = match dst {
                    LiveElem::Port(p) => Target::Port(p),
                    LiveElem::Method(unit, name) => Target::Method { unit, name },
                    LiveElem::Node(_) => return Err(Error::unexpected("wire sink cannot be a slot")),
                };
                self.port_mut(src_port).targets.push(target);
                Ok(())
            }
            Oriented::Tie { .. } => Err(Error::WireIncompatibility {
                message: format!("{} and {} are slots; use tie instead", left, right),
            }),
        }
    }

    /// Wire a plain callable as a target of a port.
    pub fn wire_fn(&mut self, port: &str, f: MethodFn) -> Result<()> {
        let base = self.current();
        let ep = Endpoint::parse(port)?;
        let (side, elem) = self.resolve_live(base, &ep)?;
        if !matches!(
            (side.is_this, side.kind),
            (true, ElemKind::Input) | (false, ElemKind::Output)
        ) {
            return Err(Error::WireIncompatibility {
                message: format!("{} cannot propagate to a callable from here", ep),
            });
        }
        match elem {
            LiveElem::Port(p) => {
                self.port_mut(p).targets.push(Target::Callable(f));
                Ok(())
            }
            _ => Err(Error::unexpected("callable target requires a port")),
        }
    }

    /// Remove a previously installed wire. The written orientation does not
    /// matter; the edge is looked up the same way [`Runtime::wire`] would
    /// install it.
    pub fn unwire(&mut self, left: &str, right: &str) -> Result<()> {
        let base = self.current();
        let left = Endpoint::parse(left)?;
        let right = Endpoint::parse(right)?;
        let (ls, le) = self.resolve_live(base, &left)?;
        let (rs, re) = self.resolve_live(base, &right)?;
        match classify(ls, rs, &left.to_string(), &right.to_string())? {
            Oriented::Wire { src_left } => {
                let (src, dst) = if src_left { (le, re) } else { (re, le) };
                let src_port = match src {
                    LiveElem::Port(p) => p,
                    _ => return Err(Error::unexpected("wire source must be a port")),
                };
                let targets = &mut self.port_mut(src_port).targets;
                let position = targets.iter().position(|t| match (t, &dst) {
                    (Target::Port(p), LiveElem::Port(q)) => p == q,
                    (Target::Method { unit, name }, LiveElem::Method(u, n)) => {
                        unit == u && name == n
                    }
                    _ => false,
                });
                match position {
                    Some(i) => {
                        targets.remove(i);
                        Ok(())
                    }
                    None => Err(Error::ElementNotFound {
                        name: format!("wire {} -> {}", left, right),
                    }),
                }
            }
            Oriented::Tie { .. } => Err(Error::WireIncompatibility {
                message: format!("{} and {} are slots; use untie instead", left, right),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Dynamic ports
    // ------------------------------------------------------------------

    /// Add an input port to the current context unit at run time.
    pub fn add_input(&mut self, unit: UnitId, name: &str) -> Result<PortId> {
        self.add_port(unit, name, Dir::In)
    }

    /// Add an output port to the current context unit at run time.
    pub fn add_output(&mut self, unit: UnitId, name: &str) -> Result<PortId> {
        self.add_port(unit, name, Dir::Out)
    }

    fn add_port(&mut self, unit: UnitId, name: &str, dir: Dir) -> Result<PortId> {
        self.check_owner_exact(unit, "port table")?;
        validate_element_name(name)?;
        // A protected method may keep sharing the name, as for declared
        // input ports.
        let taken = self.find_port(unit, name).is_some()
            || self.find_slot(unit, name).is_some()
            || matches!(
                self.unit(unit).descriptor.method(name),
                Some(m) if m.visibility == Visibility::Public
            );
        if taken {
            return Err(Error::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(self.create_port(unit, name, dir))
    }

    // ------------------------------------------------------------------
    // Port configuration
    // ------------------------------------------------------------------

    /// Set the result-packing flag (default `true`: a single result is
    /// returned unpacked).
    pub fn set_unpack(&mut self, port: PortId, unpack: bool) -> Result<()> {
        self.check_port_config(port)?;
        self.port_mut(port).unpack = unpack;
        Ok(())
    }

    /// Enable or disable the entry stage.
    pub fn set_entry_enabled(&mut self, port: PortId, enabled: bool) -> Result<()> {
        self.check_port_config(port)?;
        self.port_mut(port).entry_enabled = enabled;
        Ok(())
    }

    /// Enable or disable the exit stage.
    pub fn set_exit_enabled(&mut self, port: PortId, enabled: bool) -> Result<()> {
        self.check_port_config(port)?;
        self.port_mut(port).exit_enabled = enabled;
        Ok(())
    }

    /// Replace the entry pipeline.
    pub fn set_entry_pipeline(&mut self, port: PortId, pipeline: Pipeline) -> Result<()> {
        self.check_port_config(port)?;
        self.port_mut(port).entry = pipeline;
        Ok(())
    }

    /// Replace the exit pipeline.
    pub fn set_exit_pipeline(&mut self, port: PortId, pipeline: Pipeline) -> Result<()> {
        self.check_port_config(port)?;
        self.port_mut(port).exit = pipeline;
        Ok(())
    }

    /// Install a fixed-value entry pipeline from a dynamically supplied
    /// value. Only an argument array is legal.
    pub fn set_entry_filter_value(&mut self, port: PortId, value: Value) -> Result<()> {
        let pipeline = match Flow::try_from_value(value)? {
            Flow::Continue(args) => Pipeline::Fixed(args),
            Flow::Stop => Pipeline::Stop,
        };
        self.set_entry_pipeline(port, pipeline)
    }

    /// Install a fixed-value exit pipeline from a dynamically supplied
    /// value. Only an argument array is legal.
    pub fn set_exit_filter_value(&mut self, port: PortId, value: Value) -> Result<()> {
        let pipeline = match Flow::try_from_value(value)? {
            Flow::Continue(args) => Pipeline::Fixed(args),
            Flow::Stop => Pipeline::Stop,
        };
        self.set_exit_pipeline(port, pipeline)
    }

    /// The argument list last seen entering the port, before the entry
    /// pipeline ran.
    pub fn last_entry_args(&self, port: PortId) -> Result<Option<Args>> {
        self.check_port_config(port)?;
        Ok(self.port_ref(port).last_entry.clone())
    }

    /// The argument list last seen leaving the port, after the exit
    /// pipeline ran.
    pub fn last_exit_args(&self, port: PortId) -> Result<Option<Args>> {
        self.check_port_config(port)?;
        Ok(self.port_ref(port).last_exit.clone())
    }

    fn check_port_config(&self, port: PortId) -> Result<()> {
        let owner = self.port_ref(port).owner;
        self.check_self_or_child(owner, "port")
    }

    // ------------------------------------------------------------------
    // Data cells
    // ------------------------------------------------------------------

    /// Read a data cell. Data is protected: only the unit itself may read
    /// its cells.
    pub fn data(&self, unit: UnitId, name: &str) -> Result<Value> {
        self.check_owner_exact(unit, "data cell")?;
        self.unit(unit)
            .data
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ElementNotFound {
                name: name.to_string(),
            })
    }

    /// Write a data cell. Creates the cell when it was not declared.
    pub fn set_data(&mut self, unit: UnitId, name: &str, value: Value) -> Result<()> {
        self.check_owner_exact(unit, "data cell")?;
        self.unit_mut(unit).data.insert(name.to_string(), value);
        Ok(())
    }
}

/// A live element resolved from an endpoint.
enum LiveElem {
    Port(PortId),
    Method(UnitId, String),
    Node(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{args_fn, method_fn};
    use crate::schema::{ContainerKind, Schema};

    #[test]
    fn build_creates_ports_in_order() {
        let ty = Schema::new("T")
            .input("a")
            .output("b")
            .input("c")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();

        let names: Vec<&str> = rt.unit(u).ports.iter().map(|p| rt.port_name(*p)).collect();
        // Inputs first, then outputs, each in declaration order.
        assert_eq!(names, vec!["a", "c", "b"]);
        assert_eq!(rt.port_dir(rt.find_port(u, "b").unwrap()), Dir::Out);
    }

    #[test]
    fn abstract_type_cannot_instantiate() {
        let ty = Schema::new("A").abstract_type().compile().unwrap();
        let mut rt = Runtime::new();
        let err = rt.build(&ty, vec![]).unwrap_err();
        assert!(matches!(err, Error::AbstractInstantiation { name } if name == "A"));
    }

    #[test]
    fn derived_concrete_type_instantiates() {
        let base = Schema::new("A").abstract_type().input("in").compile().unwrap();
        let derived = Schema::new("B").base(&base).compile().unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&derived, vec![]).unwrap();
        assert!(rt.find_port(u, "in").is_some());
    }

    #[test]
    fn children_attach_under_builder() {
        let child = Schema::new("C").compile().unwrap();
        let parent = Schema::new("P")
            .child("left", &child)
            .child("right", &child)
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&parent, vec![]).unwrap();

        assert_eq!(rt.children_of(p).len(), 2);
        let left = rt.child_named(p, "left").unwrap();
        assert_eq!(rt.owner_of(left), Some(p));
        assert_eq!(rt.unit_name(left), "left");
    }

    #[test]
    fn top_level_build_stays_unowned() {
        let ty = Schema::new("T").compile().unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        assert_eq!(rt.owner_of(u), None);
    }

    #[test]
    fn forwarded_and_deferred_child_args() {
        let child = Schema::new("C")
            .data_factory(
                "got",
                method_fn(|_c, args| Ok(args.first().cloned().unwrap_or(Value::Null))),
            )
            .compile()
            .unwrap();
        let parent = Schema::new("P")
            .child_forward("fwd", &child)
            .child_deferred(
                "def",
                &child,
                args_fn(|args| vec![Value::from(args.len() as i64)]),
            )
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&parent, vec![Value::from("x"), Value::from("y")]).unwrap();

        let fwd = rt.child_named(p, "fwd").unwrap();
        let def = rt.child_named(p, "def").unwrap();
        let got_fwd = rt.run_in_context(fwd, |rt| rt.data(fwd, "got")).unwrap();
        let got_def = rt.run_in_context(def, |rt| rt.data(def, "got")).unwrap();
        assert_eq!(got_fwd, Value::from("x"));
        assert_eq!(got_def, Value::from(2));
    }

    #[test]
    fn static_data_is_per_instance() {
        let ty = Schema::new("T")
            .data("n", Value::from(1))
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let a = rt.build(&ty, vec![]).unwrap();
        let b = rt.build(&ty, vec![]).unwrap();

        rt.run_in_context(a, |rt| rt.set_data(a, "n", Value::from(9))).unwrap();
        let b_val = rt.run_in_context(b, |rt| rt.data(b, "n")).unwrap();
        assert_eq!(b_val, Value::from(1));
    }

    #[test]
    fn container_data_starts_empty() {
        let ty = Schema::new("T")
            .data_container("seen", ContainerKind::Set)
            .data_container("index", ContainerKind::Dict)
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        let seen = rt.run_in_context(u, |rt| rt.data(u, "seen")).unwrap();
        let index = rt.run_in_context(u, |rt| rt.data(u, "index")).unwrap();
        assert_eq!(seen, Value::array());
        assert_eq!(index, Value::map());
    }

    #[test]
    fn data_is_protected() {
        let ty = Schema::new("T").data("secret", Value::from(1)).compile().unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        // Root context is not the owner.
        assert!(matches!(rt.data(u, "secret"), Err(Error::OutOfContext { .. })));
    }

    #[test]
    fn init_runs_with_constructor_args() {
        let ty = Schema::new("T")
            .data("greeting", Value::Null)
            .init(method_fn(|ctx, args| {
                let who = args.first().cloned().unwrap_or(Value::Null);
                ctx.set_data("greeting", who)?;
                Ok(Value::Null)
            }))
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![Value::from("world")]).unwrap();
        let got = rt.run_in_context(u, |rt| rt.data(u, "greeting")).unwrap();
        assert_eq!(got, Value::from("world"));
    }

    #[test]
    fn init_chains_to_base() {
        let base = Schema::new("Base")
            .data("trace", Value::array())
            .init(method_fn(|ctx, _args| {
                ctx.set_data("trace", Value::Array(vec![Value::from("base")]))?;
                Ok(Value::Null)
            }))
            .compile()
            .unwrap();
        let derived = Schema::new("Derived")
            .base(&base)
            .init(method_fn(|ctx, _args| {
                ctx.call_super(&[])?;
                let mut items = match ctx.data("trace")? {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                items.push(Value::from("derived"));
                ctx.set_data("trace", Value::Array(items))?;
                Ok(Value::Null)
            }))
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&derived, vec![]).unwrap();
        let trace = rt.run_in_context(u, |rt| rt.data(u, "trace")).unwrap();
        assert_eq!(
            trace,
            Value::Array(vec![Value::from("base"), Value::from("derived")])
        );
    }

    #[test]
    fn attach_rejects_second_owner() {
        let child_ty = Schema::new("C").compile().unwrap();
        let parent_ty = Schema::new("P").compile().unwrap();
        let mut rt = Runtime::new();
        let p1 = rt.build(&parent_ty, vec![]).unwrap();
        let p2 = rt.build(&parent_ty, vec![]).unwrap();
        let c = rt.build(&child_ty, vec![]).unwrap();

        rt.run_in_context(p1, |rt| rt.attach(c, None)).unwrap();
        let err = rt.run_in_context(p2, |rt| rt.attach(c, None)).unwrap_err();
        assert!(matches!(err, Error::CapsuleAlreadyAttached { .. }));
    }

    #[test]
    fn attach_rejects_ancestor_under_descendant() {
        let child_ty = Schema::new("C").compile().unwrap();
        let parent_ty = Schema::new("P").child("g", &child_ty).compile().unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&parent_ty, vec![]).unwrap();
        let g = rt.child_named(p, "g").unwrap();

        // p is unowned, so the already-attached guard does not apply; the
        // owner-chain walk has to catch the cycle.
        let err = rt.run_in_context(g, |rt| rt.attach(p, None)).unwrap_err();
        assert!(matches!(err, Error::IllegalOperationType { .. }));
        assert_eq!(rt.owner_of(p), None);
    }

    #[test]
    fn attach_position_bounds() {
        let ty = Schema::new("T").compile().unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&ty, vec![]).unwrap();
        let c = rt.build(&ty, vec![]).unwrap();
        let err = rt.run_in_context(p, |rt| rt.attach(c, Some(3))).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { index: 3, len: 0 }));
    }

    #[test]
    fn detach_requires_owner_or_self() {
        let ty = Schema::new("T").compile().unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&ty, vec![]).unwrap();
        let c = rt.build(&ty, vec![]).unwrap();
        let stranger = rt.build(&ty, vec![]).unwrap();
        rt.run_in_context(p, |rt| rt.attach(c, None)).unwrap();

        let err = rt.run_in_context(stranger, |rt| rt.detach(c)).unwrap_err();
        assert!(matches!(err, Error::OutOfContext { .. }));

        rt.run_in_context(c, |rt| rt.detach(c)).unwrap();
        assert_eq!(rt.owner_of(c), None);
        assert!(rt.children_of(p).is_empty());
    }

    #[test]
    fn attach_lifecycle_fires_recursively() {
        let leaf = Schema::new("Leaf")
            .data("attached", Value::from(false))
            .method(
                "on_attach",
                method_fn(|ctx, _| {
                    ctx.set_data("attached", Value::from(true))?;
                    Ok(Value::Null)
                }),
            )
            .compile()
            .unwrap();
        let mid = Schema::new("Mid").child("leaf", &leaf).compile().unwrap();
        let parent_ty = Schema::new("P").compile().unwrap();

        let mut rt = Runtime::new();
        let p = rt.build(&parent_ty, vec![]).unwrap();
        let m = rt.build(&mid, vec![]).unwrap();
        rt.run_in_context(p, |rt| rt.attach(m, None)).unwrap();

        let leaf_id = rt.child_named(m, "leaf").unwrap();
        let attached = rt.run_in_context(leaf_id, |rt| rt.data(leaf_id, "attached")).unwrap();
        assert_eq!(attached, Value::from(true));
    }

    #[test]
    fn dynamic_port_addition_and_duplicate_guard() {
        let ty = Schema::new("T").input("in").compile().unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();

        let added = rt.run_in_context(u, |rt| rt.add_output(u, "later")).unwrap();
        assert_eq!(rt.port_dir(added), Dir::Out);

        let err = rt.run_in_context(u, |rt| rt.add_input(u, "in")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));

        // Only the unit itself may extend its port table.
        let err = rt.add_input(u, "outsider").unwrap_err();
        assert!(matches!(err, Error::OutOfContext { .. }));
    }

    #[test]
    fn dynamic_bind_resolves_at_build() {
        let child = Schema::new("C")
            .init(method_fn(|ctx, _| {
                let me = ctx.unit();
                ctx.runtime().add_input(me, "made")?;
                Ok(Value::Null)
            }))
            .compile()
            .unwrap();
        let parent = Schema::new("P")
            .input("go")
            .child("c", &child)
            .bind("this.go", "c.!made")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&parent, vec![]).unwrap();
        let c = rt.child_named(p, "c").unwrap();
        let go = rt.find_port(p, "go").unwrap();
        let made = rt.find_port(c, "made").unwrap();
        assert!(rt
            .port_ref(go)
            .targets
            .iter()
            .any(|t| matches!(t, Target::Port(q) if *q == made)));
    }

    #[test]
    fn dynamic_bind_still_missing_fails() {
        let child = Schema::new("C").compile().unwrap();
        let parent = Schema::new("P")
            .input("go")
            .child("c", &child)
            .bind("this.go", "c.!never")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let err = rt.build(&parent, vec![]).unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { name } if name == "c.!never"));
    }

    #[test]
    fn instance_wire_and_unwire() {
        let child = Schema::new("C").input("in").compile().unwrap();
        let parent = Schema::new("P")
            .input("go")
            .child("c", &child)
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&parent, vec![]).unwrap();

        rt.run_in_context(p, |rt| rt.wire("this.go", "c.in")).unwrap();
        let go = rt.find_port(p, "go").unwrap();
        assert_eq!(rt.port_ref(go).targets.len(), 1);

        rt.run_in_context(p, |rt| rt.unwire("this.go", "c.in")).unwrap();
        assert!(rt.port_ref(go).targets.is_empty());

        let err = rt
            .run_in_context(p, |rt| rt.unwire("this.go", "c.in"))
            .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { .. }));
    }
}
