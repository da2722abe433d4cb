//! The hierarchy tie-tree: hook and loop slots mirrored onto an external
//! node structure.
//!
//! Slots are arena nodes linked by tie edges. A node with a bound
//! [`ElementRef`] is a connector: a Hook connector anchors a tree at its
//! root, a Loop connector terminates it at a leaf. When a tie or a bind
//! completes a root-connector-to-leaf-connector path, the runtime tells
//! the host through [`TreeEvent`]s; the host owns the real elements, the
//! runtime only tracks the shape. Reachability and insertion points are
//! recomputed by plain tree walks - tie and untie are not hot paths.

use capsula_core::{Error, Result};

use crate::schema::Endpoint;
use crate::unit::{Runtime, UnitId};

/// Identity of a tie-tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

/// Whether a slot hangs children below it or plugs into a parent above.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Hook,
    Loop,
}

/// An opaque handle to an external element, owned by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u64);

/// A slot node in the tie-tree arena.
pub(crate) struct TreeNode {
    pub owner: UnitId,
    pub name: String,
    pub kind: SlotKind,
    pub up: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub element: Option<ElementRef>,
    pub classes: Vec<String>,
    pub rendered: Option<ElementRef>,
}

/// A notification to the host about the external structure.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeEvent {
    /// A root-connector-to-leaf-connector path became complete. `before`
    /// is the next already-attached leaf in document order, if any.
    Attached {
        root: ElementRef,
        leaf: ElementRef,
        before: Option<ElementRef>,
        classes: Vec<String>,
    },
    /// A formerly complete path broke apart.
    Fragmented {
        root: ElementRef,
        leaf: ElementRef,
        classes: Vec<String>,
    },
    /// A loop on a detached side is giving up its rendered wrapper.
    Released { node: NodeId, element: ElementRef },
}

impl Runtime {
    pub(crate) fn create_node(&mut self, owner: UnitId, name: &str, kind: SlotKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(TreeNode {
            owner,
            name: name.to_string(),
            kind,
            up: None,
            children: Vec::new(),
            element: None,
            classes: Vec::new(),
            rendered: None,
        });
        id
    }

    fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Look up a slot on a unit by name.
    pub fn find_slot(&self, unit: UnitId, name: &str) -> Option<NodeId> {
        let u = self.unit(unit);
        u.hooks
            .iter()
            .chain(u.loops.iter())
            .copied()
            .find(|n| self.node(*n).name == name)
    }

    /// The kind of a slot.
    pub fn slot_kind(&self, node: NodeId) -> SlotKind {
        self.node(node).kind
    }

    /// The unit a slot belongs to.
    pub fn slot_owner(&self, node: NodeId) -> UnitId {
        self.node(node).owner
    }

    /// The wrapper element a loop currently holds, if its path is attached.
    pub fn rendered(&self, node: NodeId) -> Option<ElementRef> {
        self.node(node).rendered
    }

    /// Bind an external element to a slot, making it a connector. A Hook
    /// connector must be a tree root, a Loop connector a leaf. Completing
    /// paths fire [`TreeEvent::Attached`].
    pub fn bind_element(&mut self, node: NodeId, element: ElementRef) -> Result<()> {
        self.check_self_or_child(self.node(node).owner, "slot")?;
        let n = self.node(node);
        if n.element.is_some() {
            return Err(Error::IllegalOperationType {
                message: format!("slot '{}' already has a bound element", n.name),
            });
        }
        match n.kind {
            SlotKind::Hook if n.up.is_some() => {
                return Err(Error::IllegalOperationType {
                    message: format!("hook connector '{}' must be a tree root", n.name),
                })
            }
            SlotKind::Loop if !n.children.is_empty() => {
                return Err(Error::IllegalOperationType {
                    message: format!("loop connector '{}' must be a leaf", n.name),
                })
            }
            _ => {}
        }
        self.node_mut(node).element = Some(element);
        tracing::trace!(slot = %self.node(node).name, el = element.0, "element bound");

        match self.node(node).kind {
            SlotKind::Hook => {
                // A whole tree just gained its root connector.
                let leaves = self.attached_leaves(node);
                for (leaf, leaf_el) in leaves {
                    self.complete_path(node, element, leaf, leaf_el, None);
                }
            }
            SlotKind::Loop => {
                let root = self.tree_root(node);
                if let Some(root_el) = self.node(root).element {
                    if root != node {
                        let before = self.next_attached_leaf_after(node);
                        self.complete_path(root, root_el, node, element, before);
                    }
                }
            }
        }
        Ok(())
    }

    /// Set the class list carried by a hook. Classes of every hook on a
    /// path accumulate into the Attached/Fragmented notifications.
    pub fn set_classes(&mut self, node: NodeId, classes: Vec<String>) -> Result<()> {
        self.check_self_or_child(self.node(node).owner, "slot")?;
        if self.node(node).kind != SlotKind::Hook {
            return Err(Error::IllegalOperationType {
                message: format!("'{}' is a loop; only hooks carry classes", self.node(node).name),
            });
        }
        self.node_mut(node).classes = classes;
        Ok(())
    }

    /// Tie `bottom` under `top`, optionally at a position among `top`'s
    /// children. Paths completed by the new edge fire
    /// [`TreeEvent::Attached`].
    pub fn tie(&mut self, top: NodeId, bottom: NodeId, at: Option<usize>) -> Result<()> {
        self.check_self_or_child(self.node(top).owner, "slot")?;
        self.check_self_or_child(self.node(bottom).owner, "slot")?;

        if self.node(bottom).up.is_some() {
            return Err(Error::IllegalOperationType {
                message: format!("slot '{}' is already tied", self.node(bottom).name),
            });
        }
        // A loop holds at most one child, and never a hook.
        if self.node(top).kind == SlotKind::Loop {
            if self.node(bottom).kind == SlotKind::Hook {
                return Err(Error::TieIncompatibility {
                    message: format!(
                        "loop '{}' cannot hold hook '{}'",
                        self.node(top).name,
                        self.node(bottom).name
                    ),
                });
            }
            if !self.node(top).children.is_empty() {
                return Err(Error::IllegalOperationType {
                    message: format!("loop '{}' already holds a child", self.node(top).name),
                });
            }
            if self.node(top).element.is_some() {
                return Err(Error::IllegalOperationType {
                    message: format!(
                        "loop connector '{}' must stay a leaf",
                        self.node(top).name
                    ),
                });
            }
        }
        if self.node(bottom).kind == SlotKind::Hook && self.node(bottom).element.is_some() {
            return Err(Error::IllegalOperationType {
                message: format!(
                    "hook connector '{}' must stay a tree root",
                    self.node(bottom).name
                ),
            });
        }
        // No cycles: top must not live inside bottom's subtree.
        let mut walk = Some(top);
        while let Some(n) = walk {
            if n == bottom {
                return Err(Error::IllegalOperationType {
                    message: "tie would close a cycle".to_string(),
                });
            }
            walk = self.node(n).up;
        }

        let len = self.node(top).children.len();
        let index = at.unwrap_or(len);
        if index > len {
            return Err(Error::IndexOutOfBounds { index, len });
        }

        // Document-order insertion point, walked before the mutation.
        let root = self.tree_root(top);
        let root_el = self.node(root).element;
        let before = match root_el {
            Some(_) => self.next_attached_leaf_from(top, index),
            None => None,
        };
        let new_leaves = self.attached_leaves(bottom);

        self.node_mut(top).children.insert(index, bottom);
        self.node_mut(bottom).up = Some(top);
        tracing::debug!(
            top = %self.node(top).name,
            bottom = %self.node(bottom).name,
            index,
            "tied"
        );

        if let Some(root_el) = root_el {
            for (leaf, leaf_el) in new_leaves {
                self.complete_path(root, root_el, leaf, leaf_el, before);
            }
        }
        Ok(())
    }

    /// Remove the edge between `top` and `bottom`. Paths broken by the
    /// removal fire [`TreeEvent::Fragmented`], and every loop on the
    /// detached side gives up its rendered wrapper.
    pub fn untie(&mut self, top: NodeId, bottom: NodeId) -> Result<()> {
        self.check_self_or_child(self.node(top).owner, "slot")?;
        self.check_self_or_child(self.node(bottom).owner, "slot")?;
        if self.node(bottom).up != Some(top) {
            return Err(Error::ElementNotFound {
                name: format!(
                    "tie {} -> {}",
                    self.node(top).name,
                    self.node(bottom).name
                ),
            });
        }

        let root = self.tree_root(top);
        let root_el = self.node(root).element;
        let broken: Vec<(NodeId, ElementRef, Vec<String>)> = match root_el {
            Some(_) => self
                .attached_leaves(bottom)
                .into_iter()
                .map(|(leaf, el)| (leaf, el, self.path_classes(root, leaf)))
                .collect(),
            None => Vec::new(),
        };

        self.node_mut(top).children.retain(|c| *c != bottom);
        self.node_mut(bottom).up = None;
        tracing::debug!(
            top = %self.node(top).name,
            bottom = %self.node(bottom).name,
            "untied"
        );

        if let Some(root_el) = root_el {
            for (_, el, classes) in broken {
                self.emit(TreeEvent::Fragmented {
                    root: root_el,
                    leaf: el,
                    classes,
                });
            }
        }
        for node in self.subtree_nodes(bottom) {
            if let Some(element) = self.node_mut(node).rendered.take() {
                self.emit(TreeEvent::Released { node, element });
            }
        }
        Ok(())
    }

    /// Tie two slots named relative to the current context.
    pub fn tie_named(&mut self, top: &str, bottom: &str, at: Option<usize>) -> Result<()> {
        let base = self.current();
        let top = self.resolve_node(base, &Endpoint::parse(top)?)?;
        let bottom = self.resolve_node(base, &Endpoint::parse(bottom)?)?;
        self.tie(top, bottom, at)
    }

    /// Untie two slots named relative to the current context.
    pub fn untie_named(&mut self, top: &str, bottom: &str) -> Result<()> {
        let base = self.current();
        let top = self.resolve_node(base, &Endpoint::parse(top)?)?;
        let bottom = self.resolve_node(base, &Endpoint::parse(bottom)?)?;
        self.untie(top, bottom)
    }

    /// Register a tree-event observer. Returns a token for
    /// [`Runtime::off_tree_event`].
    pub fn on_tree_event(&mut self, callback: impl FnMut(&TreeEvent) + 'static) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.observers.push((token, Box::new(callback)));
        token
    }

    /// Remove a tree-event observer.
    pub fn off_tree_event(&mut self, token: u64) {
        self.observers.retain(|(t, _)| *t != token);
    }

    fn emit(&mut self, event: TreeEvent) {
        let mut observers = std::mem::take(&mut self.observers);
        for (_, callback) in observers.iter_mut() {
            callback(&event);
        }
        observers.append(&mut self.observers);
        self.observers = observers;
    }

    fn complete_path(
        &mut self,
        root: NodeId,
        root_el: ElementRef,
        leaf: NodeId,
        leaf_el: ElementRef,
        before: Option<ElementRef>,
    ) {
        let classes = self.path_classes(root, leaf);
        // Every loop on the path now holds the rendered wrapper it will
        // release on fragmentation.
        let mut walk = Some(leaf);
        while let Some(n) = walk {
            if self.node(n).kind == SlotKind::Loop {
                self.node_mut(n).rendered = Some(leaf_el);
            }
            if n == root {
                break;
            }
            walk = self.node(n).up;
        }
        self.emit(TreeEvent::Attached {
            root: root_el,
            leaf: leaf_el,
            before,
            classes,
        });
    }

    fn tree_root(&self, node: NodeId) -> NodeId {
        let mut at = node;
        while let Some(up) = self.node(at).up {
            at = up;
        }
        at
    }

    /// Leaf loop connectors in the subtree, in document order.
    fn attached_leaves(&self, node: NodeId) -> Vec<(NodeId, ElementRef)> {
        let mut out = Vec::new();
        self.collect_attached_leaves(node, &mut out);
        out
    }

    fn collect_attached_leaves(&self, node: NodeId, out: &mut Vec<(NodeId, ElementRef)>) {
        let n = self.node(node);
        if n.kind == SlotKind::Loop && n.children.is_empty() {
            if let Some(el) = n.element {
                out.push((node, el));
            }
            return;
        }
        for child in &n.children {
            self.collect_attached_leaves(*child, out);
        }
    }

    /// The first attached leaf strictly after position `index` under
    /// `node`, continuing the walk through the ancestors' later siblings.
    fn next_attached_leaf_from(&self, node: NodeId, index: usize) -> Option<ElementRef> {
        for child in &self.node(node).children[index..] {
            if let Some((_, el)) = self.attached_leaves(*child).first() {
                return Some(*el);
            }
        }
        let up = self.node(node).up?;
        let position = self.node(up).children.iter().position(|c| *c == node)?;
        self.next_attached_leaf_from(up, position + 1)
    }

    /// The next attached leaf after `node` itself, in document order.
    fn next_attached_leaf_after(&self, node: NodeId) -> Option<ElementRef> {
        let up = self.node(node).up?;
        let position = self.node(up).children.iter().position(|c| *c == node)?;
        self.next_attached_leaf_from(up, position + 1)
    }

    /// Classes accumulated from every hook on the root-to-leaf path.
    fn path_classes(&self, root: NodeId, leaf: NodeId) -> Vec<String> {
        let mut hops = Vec::new();
        let mut walk = Some(leaf);
        while let Some(n) = walk {
            hops.push(n);
            if n == root {
                break;
            }
            walk = self.node(n).up;
        }
        let mut classes = Vec::new();
        for n in hops.iter().rev() {
            if self.node(*n).kind == SlotKind::Hook {
                classes.extend(self.node(*n).classes.iter().cloned());
            }
        }
        classes
    }

    fn subtree_nodes(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            out.push(n);
            for child in self.node(n).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::schema::Schema;

    fn capture_events(rt: &mut Runtime) -> Rc<RefCell<Vec<TreeEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        rt.on_tree_event(move |e| sink.borrow_mut().push(e.clone()));
        events
    }

    // One unit with a hook and several loops, driven from its own context.
    fn slot_fixture() -> (Runtime, crate::unit::UnitId) {
        let ty = Schema::new("T")
            .hook("frame")
            .loop_slot("first")
            .loop_slot("second")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        (rt, u)
    }

    #[test]
    fn slots_come_from_the_schema() {
        let (rt, u) = slot_fixture();
        let frame = rt.find_slot(u, "frame").unwrap();
        let first = rt.find_slot(u, "first").unwrap();
        assert_eq!(rt.slot_kind(frame), SlotKind::Hook);
        assert_eq!(rt.slot_kind(first), SlotKind::Loop);
        assert_eq!(rt.slot_owner(frame), u);
    }

    #[test]
    fn tie_completes_a_path_and_notifies() {
        let (mut rt, u) = slot_fixture();
        let events = capture_events(&mut rt);
        let frame = rt.find_slot(u, "frame").unwrap();
        let first = rt.find_slot(u, "first").unwrap();

        rt.run_in_context(u, |rt| {
            rt.set_classes(frame, vec!["frame".to_string()])?;
            rt.bind_element(frame, ElementRef(1))?;
            rt.bind_element(first, ElementRef(2))?;
            rt.tie(frame, first, None)
        })
        .unwrap();

        assert_eq!(
            *events.borrow(),
            vec![TreeEvent::Attached {
                root: ElementRef(1),
                leaf: ElementRef(2),
                before: None,
                classes: vec!["frame".to_string()],
            }]
        );
        assert_eq!(rt.rendered(first), Some(ElementRef(2)));
    }

    #[test]
    fn insert_before_walks_later_siblings() {
        let (mut rt, u) = slot_fixture();
        let frame = rt.find_slot(u, "frame").unwrap();
        let first = rt.find_slot(u, "first").unwrap();
        let second = rt.find_slot(u, "second").unwrap();

        rt.run_in_context(u, |rt| {
            rt.bind_element(frame, ElementRef(1))?;
            rt.bind_element(first, ElementRef(2))?;
            rt.bind_element(second, ElementRef(3))?;
            rt.tie(frame, first, None)
        })
        .unwrap();

        let events = capture_events(&mut rt);
        // Inserting ahead of the already-attached leaf names it as `before`.
        rt.run_in_context(u, |rt| rt.tie(frame, second, Some(0))).unwrap();
        assert_eq!(
            *events.borrow(),
            vec![TreeEvent::Attached {
                root: ElementRef(1),
                leaf: ElementRef(3),
                before: Some(ElementRef(2)),
                classes: vec![],
            }]
        );
    }

    #[test]
    fn binding_the_root_attaches_waiting_leaves() {
        let (mut rt, u) = slot_fixture();
        let events = capture_events(&mut rt);
        let frame = rt.find_slot(u, "frame").unwrap();
        let first = rt.find_slot(u, "first").unwrap();
        let second = rt.find_slot(u, "second").unwrap();

        rt.run_in_context(u, |rt| {
            rt.bind_element(first, ElementRef(2))?;
            rt.bind_element(second, ElementRef(3))?;
            rt.tie(frame, first, None)?;
            rt.tie(frame, second, None)?;
            // Nothing is attached until the root connector appears.
            assert!(events.borrow().is_empty());
            rt.bind_element(frame, ElementRef(1))
        })
        .unwrap();

        let got: Vec<ElementRef> = events
            .borrow()
            .iter()
            .map(|e| match e {
                TreeEvent::Attached { leaf, .. } => *leaf,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(got, vec![ElementRef(2), ElementRef(3)]);
    }

    #[test]
    fn untie_fragments_and_releases() {
        let (mut rt, u) = slot_fixture();
        let frame = rt.find_slot(u, "frame").unwrap();
        let first = rt.find_slot(u, "first").unwrap();
        rt.run_in_context(u, |rt| {
            rt.bind_element(frame, ElementRef(1))?;
            rt.bind_element(first, ElementRef(2))?;
            rt.tie(frame, first, None)
        })
        .unwrap();

        let events = capture_events(&mut rt);
        rt.run_in_context(u, |rt| rt.untie(frame, first)).unwrap();

        assert_eq!(
            *events.borrow(),
            vec![
                TreeEvent::Fragmented {
                    root: ElementRef(1),
                    leaf: ElementRef(2),
                    classes: vec![],
                },
                TreeEvent::Released {
                    node: first,
                    element: ElementRef(2),
                },
            ]
        );
        assert_eq!(rt.rendered(first), None);
    }

    #[test]
    fn loop_holds_at_most_one_child_and_never_a_hook() {
        let ty = Schema::new("T")
            .hook("h")
            .loop_slot("l")
            .loop_slot("l2")
            .loop_slot("l3")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        let h = rt.find_slot(u, "h").unwrap();
        let l = rt.find_slot(u, "l").unwrap();
        let l2 = rt.find_slot(u, "l2").unwrap();
        let l3 = rt.find_slot(u, "l3").unwrap();

        rt.run_in_context(u, |rt| {
            let err = rt.tie(l, h, None).unwrap_err();
            assert!(matches!(err, Error::TieIncompatibility { .. }));

            rt.tie(l, l2, None)?;
            let err = rt.tie(l, l3, None).unwrap_err();
            assert!(matches!(err, Error::IllegalOperationType { .. }));
            Ok::<(), Error>(())
        })
        .unwrap();
    }

    #[test]
    fn tie_position_bounds_and_cycles() {
        let (mut rt, u) = slot_fixture();
        let frame = rt.find_slot(u, "frame").unwrap();
        let first = rt.find_slot(u, "first").unwrap();
        let second = rt.find_slot(u, "second").unwrap();

        rt.run_in_context(u, |rt| {
            let err = rt.tie(frame, first, Some(5)).unwrap_err();
            assert!(matches!(err, Error::IndexOutOfBounds { index: 5, len: 0 }));

            rt.tie(first, second, None)?;
            let err = rt.tie(second, first, None).unwrap_err();
            assert!(matches!(err, Error::IllegalOperationType { .. }));
            Ok::<(), Error>(())
        })
        .unwrap();
    }

    #[test]
    fn connector_placement_rules() {
        let ty = Schema::new("T")
            .hook("outer")
            .hook("inner")
            .loop_slot("l")
            .loop_slot("l2")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        let outer = rt.find_slot(u, "outer").unwrap();
        let inner = rt.find_slot(u, "inner").unwrap();
        let l = rt.find_slot(u, "l").unwrap();
        let l2 = rt.find_slot(u, "l2").unwrap();

        rt.run_in_context(u, |rt| {
            // A loop connector cannot grow a child.
            rt.bind_element(l, ElementRef(9))?;
            let err = rt.tie(l, l2, None).unwrap_err();
            assert!(matches!(err, Error::IllegalOperationType { .. }));

            // A non-root hook cannot become a connector.
            rt.tie(outer, inner, None)?;
            let err = rt.bind_element(inner, ElementRef(1)).unwrap_err();
            assert!(matches!(err, Error::IllegalOperationType { .. }));

            // And a bound hook cannot be tied under another slot.
            rt.untie(outer, inner)?;
            rt.bind_element(inner, ElementRef(1))?;
            let err = rt.tie(outer, inner, None).unwrap_err();
            assert!(matches!(err, Error::IllegalOperationType { .. }));
            Ok::<(), Error>(())
        })
        .unwrap();
    }

    #[test]
    fn slot_access_is_context_checked() {
        let (mut rt, u) = slot_fixture();
        let stranger_ty = Schema::new("S").compile().unwrap();
        let s = rt.build(&stranger_ty, vec![]).unwrap();
        let frame = rt.find_slot(u, "frame").unwrap();

        let err = rt
            .run_in_context(s, |rt| rt.bind_element(frame, ElementRef(1)))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfContext { .. }));
    }

    #[test]
    fn classes_accumulate_down_the_path() {
        // parent hook -> child hook -> child loop, tied through two levels.
        let child = Schema::new("C")
            .hook("inner")
            .loop_slot("tail")
            .compile()
            .unwrap();
        let parent = Schema::new("P")
            .hook("outer")
            .child("c", &child)
            .bind("this.outer", "c.inner")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let p = rt.build(&parent, vec![]).unwrap();
        let c = rt.child_named(p, "c").unwrap();

        let outer = rt.find_slot(p, "outer").unwrap();
        let inner = rt.find_slot(c, "inner").unwrap();
        let tail = rt.find_slot(c, "tail").unwrap();
        rt.run_in_context(c, |rt| rt.tie(inner, tail, None)).unwrap();
        rt.run_in_context(p, |rt| rt.set_classes(outer, vec!["box".to_string()]))
            .unwrap();
        rt.run_in_context(c, |rt| rt.set_classes(inner, vec!["item".to_string()]))
            .unwrap();

        let events = capture_events(&mut rt);
        rt.run_in_context(p, |rt| rt.bind_element(outer, ElementRef(1)))
            .unwrap();
        rt.run_in_context(c, |rt| rt.bind_element(tail, ElementRef(2)))
            .unwrap();

        assert_eq!(
            *events.borrow(),
            vec![TreeEvent::Attached {
                root: ElementRef(1),
                leaf: ElementRef(2),
                before: None,
                classes: vec!["box".to_string(), "item".to_string()],
            }]
        );
    }

    #[test]
    fn declared_ties_install_during_build() {
        let child = Schema::new("C").loop_slot("slot").compile().unwrap();
        let ty = Schema::new("T")
            .hook("top")
            .child("c", &child)
            .bind("this.top", "c.slot")
            .compile()
            .unwrap();
        let mut rt = Runtime::new();
        let u = rt.build(&ty, vec![]).unwrap();
        let c = rt.child_named(u, "c").unwrap();
        let top = rt.find_slot(u, "top").unwrap();
        let bottom = rt.find_slot(c, "slot").unwrap();
        assert_eq!(rt.node(bottom).up, Some(top));
    }
}
