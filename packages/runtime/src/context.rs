//! The context register: "the unit currently executing".
//!
//! The register is a stack owned by the [`Runtime`] rather than a process
//! global; every context switch pushes on entry and pops on every exit
//! path. Errors are values here, so the restore runs whether the switched
//! closure returns `Ok` or `Err`. All access-control predicates reduce to
//! comparisons against the top of this stack.

use capsula_core::{Error, Result};

use crate::unit::{Runtime, UnitId};

/// A captured context, replayable later with [`Runtime::run_captured`].
///
/// External integrations capture the current context when installing a
/// callback (an event listener, say) and replay it when the callback fires,
/// so the callback runs with the access rights it was created under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextToken(pub(crate) UnitId);

impl Runtime {
    /// The unit currently executing.
    pub fn current(&self) -> UnitId {
        *self.ctx.last().unwrap_or(&UnitId::ROOT)
    }

    /// Run `f` with the register switched to `unit`, restoring the previous
    /// value afterwards regardless of the outcome.
    pub fn run_in_context<R>(
        &mut self,
        unit: UnitId,
        f: impl FnOnce(&mut Runtime) -> R,
    ) -> R {
        self.ctx.push(unit);
        let out = f(self);
        self.ctx.pop();
        out
    }

    /// Capture the current context for later replay.
    pub fn capture_context(&self) -> ContextToken {
        ContextToken(self.current())
    }

    /// Run `f` inside a previously captured context.
    pub fn run_captured<R>(
        &mut self,
        token: ContextToken,
        f: impl FnOnce(&mut Runtime) -> R,
    ) -> R {
        self.run_in_context(token.0, f)
    }

    /// Self-or-descendant-of-self check: passes when the register equals
    /// the entity's owner, or the owner's owner. Top-level units count as
    /// owned by the root.
    pub(crate) fn check_self_or_child(&self, owner: UnitId, what: &str) -> Result<()> {
        let cur = self.current();
        if cur == owner {
            return Ok(());
        }
        let effective = self.unit(owner).owner.unwrap_or(UnitId::ROOT);
        if effective == cur {
            return Ok(());
        }
        Err(Error::OutOfContext {
            message: format!(
                "{} belongs to {} which is not {} or one of its children",
                what,
                self.unit(owner).name,
                self.unit(cur).name
            ),
        })
    }

    /// Owner-exact check: passes only when the register equals the
    /// entity's owner.
    pub(crate) fn check_owner_exact(&self, owner: UnitId, what: &str) -> Result<()> {
        let cur = self.current();
        if cur == owner {
            return Ok(());
        }
        Err(Error::OutOfContext {
            message: format!(
                "{} belongs to {}, not to the current context {}",
                what,
                self.unit(owner).name,
                self.unit(cur).name
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_starts_at_root() {
        let rt = Runtime::new();
        assert_eq!(rt.current(), UnitId::ROOT);
    }

    #[test]
    fn switch_restores_on_ok_and_err() {
        let mut rt = Runtime::new();
        let inner: Result<()> = rt.run_in_context(UnitId::ROOT, |rt| {
            assert_eq!(rt.current(), UnitId::ROOT);
            Err(Error::other("boom"))
        });
        assert!(inner.is_err());
        assert_eq!(rt.current(), UnitId::ROOT);
    }

    #[test]
    fn nested_switches_restore_in_order() {
        let mut rt = Runtime::new();
        let ty = crate::Schema::new("T").compile().unwrap();
        let a = rt.build(&ty, vec![]).unwrap();
        let b = rt.build(&ty, vec![]).unwrap();

        rt.run_in_context(a, |rt| {
            assert_eq!(rt.current(), a);
            rt.run_in_context(b, |rt| assert_eq!(rt.current(), b));
            assert_eq!(rt.current(), a);
        });
        assert_eq!(rt.current(), UnitId::ROOT);
    }

    #[test]
    fn captured_context_replays() {
        let mut rt = Runtime::new();
        let ty = crate::Schema::new("T").compile().unwrap();
        let a = rt.build(&ty, vec![]).unwrap();

        let token = rt.run_in_context(a, |rt| rt.capture_context());
        assert_eq!(rt.current(), UnitId::ROOT);
        rt.run_captured(token, |rt| assert_eq!(rt.current(), a));
    }
}
