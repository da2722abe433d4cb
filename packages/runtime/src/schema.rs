//! Raw type schemas - the declarative surface consumed by the compiler.
//!
//! A [`Schema`] is an ordered list of tagged declarations: ports, hierarchy
//! slots, methods, children, data cells, filter attachments, and binding
//! statements. Declaration order is preserved all the way into the compiled
//! descriptor; it determines port-creation order and wiring fan-out order.
//!
//! Binding statements and filter targets reference elements through
//! [`Endpoint`] paths such as `this.out` or `logger.in`. A leading `!` on
//! the member name marks it dynamic: resolution is deferred to instance
//! build time and never fails at compile time.

use capsula_core::{Args, Error, Result, Value};

use crate::descriptor::{ArgsFn, FilterFn, MethodFn, UnitType, Visibility};

/// Owner half of an endpoint path: the declaring type itself, or one of its
/// declared children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    /// The literal token `this`.
    This,
    /// A declared child name.
    Child(String),
}

/// A parsed `owner.name` element reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub owner: Owner,
    pub name: String,
    /// `true` when the member was written with a leading `!`.
    pub dynamic: bool,
}

impl Endpoint {
    /// Parse an `owner.name` path.
    ///
    /// Incidental spaces and tabs around the `.` marker and the `!` marker
    /// are trimmed. The owner token `this` refers to the declaring type;
    /// any other token names a declared child.
    pub fn parse(text: &str) -> Result<Endpoint> {
        let trimmed = text.trim_matches([' ', '\t']);
        let (owner_tok, member_tok) =
            trimmed
                .split_once('.')
                .ok_or_else(|| Error::IllegalArgument {
                    message: format!("endpoint must be owner.name: '{}'", text),
                })?;
        let owner_tok = owner_tok.trim_matches([' ', '\t']);
        let mut member = member_tok.trim_matches([' ', '\t']);

        let dynamic = member.starts_with('!');
        if dynamic {
            member = member[1..].trim_matches([' ', '\t']);
        }

        if owner_tok.is_empty() || member.is_empty() || member.contains('.') {
            return Err(Error::IllegalArgument {
                message: format!("malformed endpoint: '{}'", text),
            });
        }

        let owner = if owner_tok == "this" {
            Owner::This
        } else {
            Owner::Child(owner_tok.to_string())
        };
        Ok(Endpoint {
            owner,
            name: member.to_string(),
            dynamic,
        })
    }

    pub(crate) fn is_this(&self) -> bool {
        self.owner == Owner::This
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let owner = match &self.owner {
            Owner::This => "this",
            Owner::Child(c) => c,
        };
        let marker = if self.dynamic { "!" } else { "" };
        write!(f, "{}.{}{}", owner, marker, self.name)
    }
}

/// Validate a declared element name.
///
/// Names must be plain tokens: non-empty, not the reserved `this`, and free
/// of the marker characters the endpoint syntax uses.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "this"
        || name.contains(['.', '!', ' ', '\t']);
    if bad {
        return Err(Error::ForbiddenName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Lifecycle names that ports, slots, children, and data cells may not use.
pub(crate) const RESERVED_ELEMENT_NAMES: &[&str] = &["init", "handle"];

pub(crate) fn validate_element_name(name: &str) -> Result<()> {
    validate_name(name)?;
    if RESERVED_ELEMENT_NAMES.contains(&name) {
        return Err(Error::ForbiddenName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Built-in empty-container factories for data cells.
///
/// `Dict` and `Map` both start as an empty map, `List` and `Set` as an
/// empty array; the distinction is declarative only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Dict,
    List,
    Map,
    Set,
}

impl ContainerKind {
    /// The empty value a cell of this kind starts with.
    pub fn empty_value(self) -> Value {
        match self {
            ContainerKind::Dict | ContainerKind::Map => Value::map(),
            ContainerKind::List | ContainerKind::Set => Value::array(),
        }
    }
}

/// How a data cell obtains its per-instance initial value.
#[derive(Clone)]
pub enum DataSpec {
    /// A fixed value, cloned per instance (same initial value, no
    /// cross-instance aliasing).
    Static(Value),
    /// A built-in empty container.
    Container(ContainerKind),
    /// A user factory invoked with the constructor arguments.
    Factory(MethodFn),
}

/// How a declared child's constructor arguments are produced.
#[derive(Clone)]
pub enum ChildArgs {
    /// No arguments.
    None,
    /// A fixed argument list.
    Fixed(Args),
    /// Forward the owner's own constructor arguments.
    Forward,
    /// Compute the arguments from the owner's constructor arguments at
    /// build time.
    Deferred(ArgsFn),
}

/// One tagged declaration inside a schema.
pub(crate) enum Entry {
    Input { name: String, body: Option<MethodFn> },
    Output { name: String },
    Hook { name: String },
    Loop { name: String },
    Method {
        name: String,
        visibility: Visibility,
        body: MethodFn,
    },
    Init { body: MethodFn },
    Handle { body: MethodFn },
    Filter { target: String, body: FilterFn },
    Bind { left: String, rights: Vec<String> },
    Child {
        name: String,
        ty: UnitType,
        args: ChildArgs,
    },
    Data { name: String, spec: DataSpec },
}

/// A raw, declarative unit-type schema.
///
/// Build one with the fluent methods, then call [`Schema::compile`].
///
/// # Example
///
/// ```rust
/// use capsula_core::Value;
/// use capsula_runtime::{method_fn, Schema};
///
/// let greeter = Schema::new("Greeter")
///     .input_fn("greet", method_fn(|_ctx, _args| Ok(Value::from("Hi"))))
///     .compile()
///     .unwrap();
/// assert_eq!(greeter.name(), "Greeter");
/// ```
pub struct Schema {
    pub(crate) name: String,
    pub(crate) is_abstract: bool,
    pub(crate) base: Option<UnitType>,
    pub(crate) entries: Vec<Entry>,
}

impl Schema {
    /// Start a schema for a type with the given display name.
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            is_abstract: false,
            base: None,
            entries: Vec::new(),
        }
    }

    /// Mark the type abstract: instantiation fails, only derivation works.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Derive from a compiled base type. All of the base's categories merge
    /// into this schema's namespace.
    pub fn base(mut self, ty: &UnitType) -> Self {
        self.base = Some(ty.clone());
        self
    }

    /// Declare an input port.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.entries.push(Entry::Input {
            name: name.into(),
            body: None,
        });
        self
    }

    /// Declare an input port together with a same-named protected method
    /// wired as one of the port's targets.
    pub fn input_fn(mut self, name: impl Into<String>, body: MethodFn) -> Self {
        self.entries.push(Entry::Input {
            name: name.into(),
            body: Some(body),
        });
        self
    }

    /// Declare an output port.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.entries.push(Entry::Output { name: name.into() });
        self
    }

    /// Declare a hook slot (parent-capable position in the external tree).
    pub fn hook(mut self, name: impl Into<String>) -> Self {
        self.entries.push(Entry::Hook { name: name.into() });
        self
    }

    /// Declare a loop slot (child-capable position in the external tree).
    pub fn loop_slot(mut self, name: impl Into<String>) -> Self {
        self.entries.push(Entry::Loop { name: name.into() });
        self
    }

    /// Declare a public method - part of the type's interface.
    pub fn public(mut self, name: impl Into<String>, body: MethodFn) -> Self {
        self.entries.push(Entry::Method {
            name: name.into(),
            visibility: Visibility::Public,
            body,
        });
        self
    }

    /// Declare a protected method - invisible from outside the capsule.
    pub fn method(mut self, name: impl Into<String>, body: MethodFn) -> Self {
        self.entries.push(Entry::Method {
            name: name.into(),
            visibility: Visibility::Protected,
            body,
        });
        self
    }

    /// Declare the constructor. It chains: an overriding `init` reaches the
    /// base implementation through `call_super`.
    pub fn init(mut self, body: MethodFn) -> Self {
        self.entries.push(Entry::Init { body });
        self
    }

    /// Declare the error handler invoked when a fault escapes a dispatch
    /// rooted at this capsule or one of its descendants.
    pub fn handle(mut self, body: MethodFn) -> Self {
        self.entries.push(Entry::Handle { body });
        self
    }

    /// Attach a filter to a port. A filter on `this.port` installs the
    /// port's exit pipeline; a filter on `child.port` installs its entry
    /// pipeline.
    pub fn filter(mut self, target: impl Into<String>, body: FilterFn) -> Self {
        self.entries.push(Entry::Filter {
            target: target.into(),
            body,
        });
        self
    }

    /// Declare a wire or tie between two elements, e.g.
    /// `.bind("this.in", "worker.run")`. Which of the two it is - and its
    /// orientation - is classified at compile time.
    pub fn bind(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.entries.push(Entry::Bind {
            left: left.into(),
            rights: vec![right.into()],
        });
        self
    }

    /// Declare one left-hand element bound to several right-hand elements,
    /// in fan-out order.
    pub fn bind_many(mut self, left: impl Into<String>, rights: &[&str]) -> Self {
        self.entries.push(Entry::Bind {
            left: left.into(),
            rights: rights.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    /// Declare a child capsule constructed with no arguments.
    pub fn child(self, name: impl Into<String>, ty: &UnitType) -> Self {
        self.child_with(name, ty, ChildArgs::None)
    }

    /// Declare a child capsule constructed with fixed arguments.
    pub fn child_args(self, name: impl Into<String>, ty: &UnitType, args: Args) -> Self {
        self.child_with(name, ty, ChildArgs::Fixed(args))
    }

    /// Declare a child capsule that receives the owner's own constructor
    /// arguments.
    pub fn child_forward(self, name: impl Into<String>, ty: &UnitType) -> Self {
        self.child_with(name, ty, ChildArgs::Forward)
    }

    /// Declare a child capsule whose arguments are computed at build time
    /// from the owner's constructor arguments.
    pub fn child_deferred(self, name: impl Into<String>, ty: &UnitType, f: ArgsFn) -> Self {
        self.child_with(name, ty, ChildArgs::Deferred(f))
    }

    fn child_with(mut self, name: impl Into<String>, ty: &UnitType, args: ChildArgs) -> Self {
        self.entries.push(Entry::Child {
            name: name.into(),
            ty: ty.clone(),
            args,
        });
        self
    }

    /// Declare a data cell with a fixed initial value (cloned per instance).
    pub fn data(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.push(Entry::Data {
            name: name.into(),
            spec: DataSpec::Static(value),
        });
        self
    }

    /// Declare a data cell starting as a built-in empty container.
    pub fn data_container(mut self, name: impl Into<String>, kind: ContainerKind) -> Self {
        self.entries.push(Entry::Data {
            name: name.into(),
            spec: DataSpec::Container(kind),
        });
        self
    }

    /// Declare a data cell initialized by a factory called with the
    /// constructor arguments.
    pub fn data_factory(mut self, name: impl Into<String>, f: MethodFn) -> Self {
        self.entries.push(Entry::Data {
            name: name.into(),
            spec: DataSpec::Factory(f),
        });
        self
    }

    /// Compile this schema into an immutable type descriptor.
    pub fn compile(self) -> Result<UnitType> {
        crate::compile::compile(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_this_endpoint() {
        let ep = Endpoint::parse("this.out").unwrap();
        assert_eq!(ep.owner, Owner::This);
        assert_eq!(ep.name, "out");
        assert!(!ep.dynamic);
    }

    #[test]
    fn parse_child_endpoint() {
        let ep = Endpoint::parse("worker.run").unwrap();
        assert_eq!(ep.owner, Owner::Child("worker".to_string()));
        assert_eq!(ep.name, "run");
    }

    #[test]
    fn parse_trims_incidental_whitespace() {
        let ep = Endpoint::parse(" \tthis .  out\t").unwrap();
        assert_eq!(ep.owner, Owner::This);
        assert_eq!(ep.name, "out");
    }

    #[test]
    fn parse_dynamic_marker() {
        let ep = Endpoint::parse("worker.!later").unwrap();
        assert!(ep.dynamic);
        assert_eq!(ep.name, "later");

        let ep = Endpoint::parse("this. ! later").unwrap();
        assert!(ep.dynamic);
        assert_eq!(ep.name, "later");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Endpoint::parse("no-dot").is_err());
        assert!(Endpoint::parse(".name").is_err());
        assert!(Endpoint::parse("owner.").is_err());
        assert!(Endpoint::parse("a.b.c").is_err());
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::parse("this.x").unwrap().to_string(), "this.x");
        assert_eq!(Endpoint::parse("c.!y").unwrap().to_string(), "c.!y");
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("ok_name").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("this").is_err());
        assert!(validate_name("a.b").is_err());
        assert!(validate_name("!x").is_err());
        assert!(validate_name("a b").is_err());
    }

    #[test]
    fn reserved_element_names() {
        assert!(validate_element_name("init").is_err());
        assert!(validate_element_name("handle").is_err());
        assert!(validate_element_name("input").is_ok());
    }

    #[test]
    fn container_empty_values() {
        assert!(ContainerKind::Dict.empty_value().is_map());
        assert!(ContainerKind::Map.empty_value().is_map());
        assert!(ContainerKind::List.empty_value().is_array());
        assert!(ContainerKind::Set.empty_value().is_array());
    }
}
