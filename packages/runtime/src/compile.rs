//! The definition compiler: raw [`Schema`] in, immutable descriptor out.
//!
//! Compilation is a pure function. It merges the base descriptor's
//! categories, walks the schema entries in declaration order, classifies
//! every binding statement as a wire or a tie with a definite orientation,
//! and finishes with a global uniqueness pass over the merged namespace.
//! Binding statements with a `!`-marked side are kept raw; they classify at
//! instance build time and never fail here.

use capsula_core::{Error, Result};

use crate::descriptor::{
    BindEdge, ChildDecl, DataDecl, Descriptor, ElemKind, FilterDecl, Method, MethodFn, UnitType,
    Visibility,
};
use crate::schema::{validate_element_name, validate_name, Endpoint, Entry, Schema};

/// One side of a binding statement, reduced to what classification needs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Side {
    pub is_this: bool,
    pub kind: ElemKind,
}

/// Classified orientation of a binding statement, relative to the written
/// (left, right) order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Oriented {
    /// A wire; `src_left` tells which side the call flows from.
    Wire { src_left: bool },
    /// A tie; `top_left` tells which side is the parent position.
    Tie { top_left: bool },
}

fn is_wire_kind(kind: ElemKind) -> bool {
    matches!(kind, ElemKind::Input | ElemKind::Output | ElemKind::Method)
}

fn is_wire_source(side: Side) -> bool {
    match side.kind {
        // The owner's own input propagates inward; a child's output
        // propagates outward into the owner's space.
        ElemKind::Input => side.is_this,
        ElemKind::Output => !side.is_this,
        _ => false,
    }
}

fn is_wire_sink(side: Side) -> bool {
    match side.kind {
        ElemKind::Output => side.is_this,
        ElemKind::Input => !side.is_this,
        ElemKind::Method => true,
        _ => false,
    }
}

fn can_tie_top(side: Side) -> bool {
    matches!(side.kind, ElemKind::Hook | ElemKind::Loop)
}

fn can_tie_bottom(side: Side) -> bool {
    // The bottom of a declared tie is always a child's slot; the declaring
    // type's own slots only ever host.
    !side.is_this && matches!(side.kind, ElemKind::Hook | ElemKind::Loop)
}

fn tie_pair_legal(top: Side, bottom: Side) -> bool {
    if !can_tie_top(top) || !can_tie_bottom(bottom) {
        return false;
    }
    // A loop holds at most one child loop; a hook below a loop would let a
    // hook sit deeper than a loop on the chain.
    !(top.kind == ElemKind::Loop && bottom.kind == ElemKind::Hook)
}

/// Classify a binding statement from its two resolved sides.
///
/// Both sides port-or-method makes it a wire; both sides hook-or-loop makes
/// it a tie; anything else is incompatible. Either written orientation is
/// accepted, with left-as-source (or left-as-top) tried first.
pub(crate) fn classify(left: Side, right: Side, left_name: &str, right_name: &str) -> Result<Oriented> {
    let left_wireish = is_wire_kind(left.kind);
    let right_wireish = is_wire_kind(right.kind);

    if left_wireish && right_wireish {
        if is_wire_source(left) && is_wire_sink(right) {
            return Ok(Oriented::Wire { src_left: true });
        }
        if is_wire_source(right) && is_wire_sink(left) {
            return Ok(Oriented::Wire { src_left: false });
        }
        return Err(Error::WireIncompatibility {
            message: format!(
                "no legal flow direction between {} ({:?}) and {} ({:?})",
                left_name, left.kind, right_name, right.kind
            ),
        });
    }

    if !left_wireish && !right_wireish {
        if tie_pair_legal(left, right) {
            return Ok(Oriented::Tie { top_left: true });
        }
        if tie_pair_legal(right, left) {
            return Ok(Oriented::Tie { top_left: false });
        }
        return Err(Error::TieIncompatibility {
            message: format!(
                "no legal parent/child orientation between {} ({:?}) and {} ({:?})",
                left_name, left.kind, right_name, right.kind
            ),
        });
    }

    Err(Error::WireIncompatibility {
        message: format!(
            "cannot bind {} ({:?}) to {} ({:?}): port/method and hook/loop do not mix",
            left_name, left.kind, right_name, right.kind
        ),
    })
}

/// Resolve one endpoint against the in-progress descriptor.
///
/// `Ok(None)` means the side is dynamically marked and resolution is
/// deferred to build time. The owner itself must exist even then.
fn resolve_side(d: &Descriptor, ep: &Endpoint) -> Result<Option<Side>> {
    let is_this = ep.is_this();
    if !is_this {
        let child_name = match &ep.owner {
            crate::schema::Owner::Child(c) => c,
            crate::schema::Owner::This => unreachable!(),
        };
        let child = d.child(child_name).ok_or_else(|| Error::ElementNotFound {
            name: child_name.clone(),
        })?;
        if ep.dynamic {
            return Ok(None);
        }
        let kind = child
            .ty
            .interface_kind(&ep.name)
            .ok_or_else(|| Error::ElementNotFound {
                name: ep.to_string(),
            })?;
        return Ok(Some(Side { is_this, kind }));
    }

    if ep.dynamic {
        return Ok(None);
    }
    let kind = d.inner_kind(&ep.name).ok_or_else(|| Error::ElementNotFound {
        name: ep.to_string(),
    })?;
    Ok(Some(Side { is_this, kind }))
}

fn add_method(d: &mut Descriptor, name: String, visibility: Visibility, body: MethodFn) -> Result<()> {
    match d.methods.get_mut(&name) {
        Some(existing) => {
            if existing.visibility != visibility {
                return Err(Error::IllegalMethodsVisibility { name });
            }
            // Override: the new body becomes the head of the chain and the
            // previous implementations stay reachable through call_super.
            let mut chain = Vec::with_capacity(existing.chain.len() + 1);
            chain.push(body);
            chain.extend(existing.chain.iter().cloned());
            existing.chain = chain;
        }
        None => {
            d.methods.insert(name, Method { visibility, chain: vec![body] });
        }
    }
    Ok(())
}

/// Compile a raw schema into a [`UnitType`].
pub fn compile(schema: Schema) -> Result<UnitType> {
    let Schema {
        name,
        is_abstract,
        base,
        entries,
    } = schema;

    // Inheritance merge: start from a shallow copy of every base category.
    let mut d = match &base {
        Some(b) => Descriptor {
            name: name.clone(),
            is_abstract,
            base: base.clone(),
            inputs: b.inputs.clone(),
            outputs: b.outputs.clone(),
            hooks: b.hooks.clone(),
            loops: b.loops.clone(),
            methods: b.methods.clone(),
            handle: b.handle.clone(),
            children: b.children.clone(),
            data: b.data.clone(),
            binds: b.binds.clone(),
            filters: b.filters.clone(),
        },
        None => Descriptor::empty(name.clone(), is_abstract),
    };

    // Binding statements and filters are resolved after all declarations so
    // that they may reference elements declared later in the schema.
    let mut raw_binds: Vec<(String, String)> = Vec::new();
    let mut raw_filters: Vec<(String, crate::descriptor::FilterFn)> = Vec::new();

    for entry in entries {
        match entry {
            Entry::Input { name, body } => {
                validate_element_name(&name)?;
                if let Some(body) = body {
                    add_method(&mut d, name.clone(), Visibility::Protected, body)?;
                }
                d.inputs.push(name);
            }
            Entry::Output { name } => {
                validate_element_name(&name)?;
                d.outputs.push(name);
            }
            Entry::Hook { name } => {
                validate_element_name(&name)?;
                d.hooks.push(name);
            }
            Entry::Loop { name } => {
                validate_element_name(&name)?;
                d.loops.push(name);
            }
            Entry::Method { name, visibility, body } => {
                validate_name(&name)?;
                add_method(&mut d, name, visibility, body)?;
            }
            Entry::Init { body } => {
                add_method(&mut d, "init".to_string(), Visibility::Protected, body)?;
            }
            Entry::Handle { body } => {
                d.handle = Some(body);
            }
            Entry::Filter { target, body } => {
                raw_filters.push((target, body));
            }
            Entry::Bind { left, rights } => {
                for right in rights {
                    raw_binds.push((left.clone(), right));
                }
            }
            Entry::Child { name, ty, args } => {
                validate_element_name(&name)?;
                d.children.push(ChildDecl { name, ty, args });
            }
            Entry::Data { name, spec } => {
                validate_element_name(&name)?;
                d.data.push(DataDecl { name, spec });
            }
        }
    }

    for (target, body) in raw_filters {
        let target = Endpoint::parse(&target)?;
        if let Some(side) = resolve_side(&d, &target)? {
            if !matches!(side.kind, ElemKind::Input | ElemKind::Output) {
                return Err(Error::IllegalArgument {
                    message: format!("filter target must be a port: {}", target),
                });
            }
        }
        d.filters.push(FilterDecl { target, body });
    }

    for (left, right) in raw_binds {
        let left = Endpoint::parse(&left)?;
        let right = Endpoint::parse(&right)?;
        let edge = match (resolve_side(&d, &left)?, resolve_side(&d, &right)?) {
            (Some(ls), Some(rs)) => {
                match classify(ls, rs, &left.to_string(), &right.to_string())? {
                    Oriented::Wire { src_left } => {
                        let (src, dst, dst_kind) = if src_left {
                            (left, right, rs.kind)
                        } else {
                            (right, left, ls.kind)
                        };
                        BindEdge::Wire { src, dst, dst_kind }
                    }
                    Oriented::Tie { top_left } => {
                        let (top, bottom) = if top_left { (left, right) } else { (right, left) };
                        BindEdge::Tie { top, bottom }
                    }
                }
            }
            _ => BindEdge::Dynamic { left, right },
        };
        d.binds.push(edge);
    }

    check_namespace(&d)?;

    tracing::debug!(
        ty = %d.name,
        inputs = d.inputs.len(),
        outputs = d.outputs.len(),
        methods = d.methods.len(),
        children = d.children.len(),
        binds = d.binds.len(),
        "compiled unit type"
    );

    Ok(std::rc::Rc::new(d))
}

/// Global uniqueness pass over the merged namespace.
///
/// Every name among inputs, outputs, hooks, loops, methods, children, and
/// data must be unique - except that a protected method may share a name
/// with an input or output port.
fn check_namespace(d: &Descriptor) -> Result<()> {
    let mut seen: std::collections::BTreeMap<&str, &'static str> = std::collections::BTreeMap::new();

    let categories: [(&[String], &'static str); 4] = [
        (&d.inputs, "input"),
        (&d.outputs, "output"),
        (&d.hooks, "hook"),
        (&d.loops, "loop"),
    ];
    for (list, cat) in categories {
        for name in list {
            if seen.insert(name, cat).is_some() {
                return Err(Error::DuplicateName { name: name.clone() });
            }
        }
    }
    for child in &d.children {
        if seen.insert(&child.name, "child").is_some() {
            return Err(Error::DuplicateName {
                name: child.name.clone(),
            });
        }
    }
    for cell in &d.data {
        if seen.insert(&cell.name, "data").is_some() {
            return Err(Error::DuplicateName {
                name: cell.name.clone(),
            });
        }
    }
    for (name, m) in &d.methods {
        if let Some(cat) = seen.get(name.as_str()) {
            let shares_port = matches!(*cat, "input" | "output")
                && m.visibility == Visibility::Protected;
            if !shares_port {
                return Err(Error::DuplicateName { name: name.clone() });
            }
        }
    }
    Ok(())
}
