//! Persistent argument environments.
//!
//! An [`Env`] maps argument identifiers to bound values. Extending an
//! environment allocates a new frame pointing at its parent; nothing is ever
//! mutated in place. Every frame carries a process-unique [`EnvId`], which the
//! engines pair with an expression handle to key their memo tables.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::expr::ArgId;

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(u64);

struct Frame<V> {
    arg: ArgId,
    value: V,
    parent: Option<Arc<Frame<V>>>,
}

pub struct Env<V> {
    id: EnvId,
    head: Option<Arc<Frame<V>>>,
}

impl<V> Clone for Env<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            head: self.head.clone(),
        }
    }
}

impl<V> Default for Env<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn fresh_id() -> EnvId {
    EnvId(NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed))
}

impl<V> Env<V> {
    pub fn new() -> Self {
        Self {
            id: fresh_id(),
            head: None,
        }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    /// A new environment with `arg` bound to `value`, shadowing any outer binding.
    pub fn bind(&self, arg: ArgId, value: V) -> Self {
        Self {
            id: fresh_id(),
            head: Some(Arc::new(Frame {
                arg,
                value,
                parent: self.head.clone(),
            })),
        }
    }

    pub fn bind_all(&self, bindings: impl IntoIterator<Item = (ArgId, V)>) -> Self {
        bindings
            .into_iter()
            .fold(self.clone(), |env, (arg, value)| env.bind(arg, value))
    }

    pub fn try_get(&self, arg: ArgId) -> Option<&V> {
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            if f.arg == arg {
                return Some(&f.value);
            }
            frame = f.parent.as_deref();
        }
        None
    }

    /// # Panics
    ///
    /// Panics if `arg` is unbound: every argument node is created together
    /// with the binder that supplies its value.
    pub fn get(&self, arg: ArgId) -> &V {
        match self.try_get(arg) {
            Some(v) => v,
            None => panic!("Unbound argument {:?}", arg),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Bindings from innermost to outermost, shadowed ones included.
    pub fn iter(&self) -> impl Iterator<Item = (ArgId, &V)> {
        let mut frame = self.head.as_deref();
        std::iter::from_fn(move || {
            let f = frame?;
            frame = f.parent.as_deref();
            Some((f.arg, &f.value))
        })
    }
}

impl<V: Debug> Debug for Env<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_bind_does_not_mutate() {
        let a = ArgId::new(0);
        let b = ArgId::new(1);
        let empty: Env<i32> = Env::new();
        let one = empty.bind(a, 1);
        let two = one.bind(b, 2);
        assert!(empty.try_get(a).is_none());
        assert_eq!(*one.get(a), 1);
        assert!(one.try_get(b).is_none());
        assert_eq!(*two.get(a), 1);
        assert_eq!(*two.get(b), 2);
    }

    #[test]
    fn test_shadowing() {
        let a = ArgId::new(3);
        let env = Env::new().bind(a, "outer").bind(a, "inner");
        assert_eq!(*env.get(a), "inner");
        assert_eq!(env.iter().count(), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ArgId::new(0);
        let env: Env<u8> = Env::new();
        let x = env.bind(a, 1);
        let y = env.bind(a, 1);
        assert_ne!(x.id(), y.id());
        assert_eq!(x.clone().id(), x.id());
    }

    #[test]
    #[should_panic(expected = "Unbound argument")]
    fn test_unbound_panics() {
        let env: Env<u8> = Env::new();
        env.get(ArgId::new(9));
    }
}
