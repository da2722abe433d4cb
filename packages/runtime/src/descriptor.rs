//! Compiled unit-type descriptors.
//!
//! A [`Descriptor`] is the immutable output of the compiler: normalized
//! category lists, the merged method table with explicit super chains,
//! classified wire/tie edges, and filter attachments. Instances never read
//! the raw schema; everything they need is here.

use std::collections::BTreeMap;
use std::rc::Rc;

use capsula_core::{Args, Flow, Result, Value};

use crate::dispatch::CallCtx;
use crate::schema::{ChildArgs, DataSpec, Endpoint};

/// A compiled unit type, shared by every instance of the type.
pub type UnitType = Rc<Descriptor>;

/// A method or constructor body.
pub type MethodFn = Rc<dyn Fn(&mut CallCtx<'_>, &[Value]) -> Result<Value>>;

/// A port filter body: rewrite the argument list or short-circuit.
pub type FilterFn = Rc<dyn Fn(&mut CallCtx<'_>, &[Value]) -> Result<Flow>>;

/// Computes a declared child's constructor arguments from the owner's.
pub type ArgsFn = Rc<dyn Fn(&[Value]) -> Args>;

/// Wrap a closure as a [`MethodFn`].
pub fn method_fn<F>(f: F) -> MethodFn
where
    F: Fn(&mut CallCtx<'_>, &[Value]) -> Result<Value> + 'static,
{
    Rc::new(f)
}

/// Wrap a closure as a [`FilterFn`].
pub fn filter_fn<F>(f: F) -> FilterFn
where
    F: Fn(&mut CallCtx<'_>, &[Value]) -> Result<Flow> + 'static,
{
    Rc::new(f)
}

/// Wrap a closure as an [`ArgsFn`].
pub fn args_fn<F>(f: F) -> ArgsFn
where
    F: Fn(&[Value]) -> Args + 'static,
{
    Rc::new(f)
}

/// Method visibility. Public methods belong to the type's interface;
/// protected methods are invisible from outside the capsule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
}

/// What kind of element a name resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElemKind {
    Input,
    Output,
    Method,
    Hook,
    Loop,
}

/// A compiled method with its override chain.
///
/// `chain[0]` is the most-derived implementation; deeper entries are the
/// overridden base implementations reachable through `call_super`.
#[derive(Clone)]
pub(crate) struct Method {
    pub visibility: Visibility,
    pub chain: Vec<MethodFn>,
}

/// A declared child capsule.
#[derive(Clone)]
pub(crate) struct ChildDecl {
    pub name: String,
    pub ty: UnitType,
    pub args: ChildArgs,
}

/// A declared data cell.
#[derive(Clone)]
pub(crate) struct DataDecl {
    pub name: String,
    pub spec: DataSpec,
}

/// A compiled filter attachment.
#[derive(Clone)]
pub(crate) struct FilterDecl {
    pub target: Endpoint,
    pub body: FilterFn,
}

/// A compiled binding statement.
///
/// Statically resolvable statements are classified and oriented at compile
/// time; statements with a dynamically-marked side stay raw and are
/// classified at instance build time.
#[derive(Clone)]
pub(crate) enum BindEdge {
    Wire {
        src: Endpoint,
        dst: Endpoint,
        dst_kind: ElemKind,
    },
    Tie {
        top: Endpoint,
        bottom: Endpoint,
    },
    Dynamic {
        left: Endpoint,
        right: Endpoint,
    },
}

/// Compiled, immutable schema for a unit type.
pub struct Descriptor {
    pub(crate) name: String,
    pub(crate) is_abstract: bool,
    pub(crate) base: Option<UnitType>,
    pub(crate) inputs: Vec<String>,
    pub(crate) outputs: Vec<String>,
    pub(crate) hooks: Vec<String>,
    pub(crate) loops: Vec<String>,
    pub(crate) methods: BTreeMap<String, Method>,
    pub(crate) handle: Option<MethodFn>,
    pub(crate) children: Vec<ChildDecl>,
    pub(crate) data: Vec<DataDecl>,
    pub(crate) binds: Vec<BindEdge>,
    pub(crate) filters: Vec<FilterDecl>,
}

impl Descriptor {
    pub(crate) fn empty(name: String, is_abstract: bool) -> Descriptor {
        Descriptor {
            name,
            is_abstract,
            base: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            hooks: Vec::new(),
            loops: Vec::new(),
            methods: BTreeMap::new(),
            handle: None,
            children: Vec::new(),
            data: Vec::new(),
            binds: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// The type's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the type is abstract.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// The base descriptor this one was merged from, if any.
    pub fn base(&self) -> Option<&UnitType> {
        self.base.as_ref()
    }

    /// Declared input-port names, in declaration order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared output-port names, in declaration order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Declared hook-slot names.
    pub fn hooks(&self) -> &[String] {
        &self.hooks
    }

    /// Declared loop-slot names.
    pub fn loops(&self) -> &[String] {
        &self.loops
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub(crate) fn child(&self, name: &str) -> Option<&ChildDecl> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Resolve a name on the type's own (inner) side: any port, any method,
    /// any slot. Ports take precedence over a same-named protected method -
    /// binding statements always mean the port.
    pub(crate) fn inner_kind(&self, name: &str) -> Option<ElemKind> {
        if self.inputs.iter().any(|n| n == name) {
            return Some(ElemKind::Input);
        }
        if self.outputs.iter().any(|n| n == name) {
            return Some(ElemKind::Output);
        }
        if self.hooks.iter().any(|n| n == name) {
            return Some(ElemKind::Hook);
        }
        if self.loops.iter().any(|n| n == name) {
            return Some(ElemKind::Loop);
        }
        if self.methods.contains_key(name) {
            return Some(ElemKind::Method);
        }
        None
    }

    /// Resolve a name on the type's public interface: ports, slots, and
    /// public methods. Protected methods are invisible from outside.
    pub(crate) fn interface_kind(&self, name: &str) -> Option<ElemKind> {
        if self.inputs.iter().any(|n| n == name) {
            return Some(ElemKind::Input);
        }
        if self.outputs.iter().any(|n| n == name) {
            return Some(ElemKind::Output);
        }
        if self.hooks.iter().any(|n| n == name) {
            return Some(ElemKind::Hook);
        }
        if self.loops.iter().any(|n| n == name) {
            return Some(ElemKind::Loop);
        }
        match self.methods.get(name) {
            Some(m) if m.visibility == Visibility::Public => Some(ElemKind::Method),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("is_abstract", &self.is_abstract)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("hooks", &self.hooks)
            .field("loops", &self.loops)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("children", &self.children.len())
            .field("data", &self.data.len())
            .field("binds", &self.binds.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}
