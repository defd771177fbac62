// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call-chain-local tracking of the current interaction.
//!
//! Provider wrappers and tool spans ask this module "what is the currently
//! active interaction, if any" so finished units attach to the right parent
//! automatically. Each independent call chain observes only its own value:
//! async chains use a tokio task-local stack (correct across `.await` points
//! and worker-thread migration), synchronous callers fall back to a
//! thread-local stack.
//!
//! Entering a scope pushes onto the chain's stack and restoring pops back to
//! the recorded depth - there is no global unconditional clear, so
//! re-entrancy across async hops (begin/resume) keeps working.

use std::cell::RefCell;
use std::future::Future;

use crate::client::InteractionRef;

tokio::task_local! {
    static TASK_STACK: RefCell<Vec<InteractionRef>>;
}

thread_local! {
    static THREAD_STACK: RefCell<Vec<InteractionRef>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` against whichever stack belongs to this call chain.
fn with_stack<R>(f: impl FnOnce(&mut Vec<InteractionRef>) -> R) -> R {
    let mut f = Some(f);
    match TASK_STACK.try_with(|stack| (f.take().unwrap())(&mut stack.borrow_mut())) {
        Ok(result) => result,
        Err(_) => THREAD_STACK.with(|stack| (f.take().unwrap())(&mut stack.borrow_mut())),
    }
}

/// The currently active interaction on this call chain, if any.
pub(crate) fn current() -> Option<InteractionRef> {
    with_stack(|stack| stack.last().cloned())
}

/// Restore token returned by [`install`]. Records the stack depth to
/// truncate back to; restoring never clears entries pushed before it.
#[derive(Debug)]
pub(crate) struct ContextToken {
    depth: usize,
}

/// Install an interaction as current on this call chain.
pub(crate) fn install(interaction: InteractionRef) -> ContextToken {
    with_stack(|stack| {
        let depth = stack.len();
        stack.push(interaction);
        ContextToken { depth }
    })
}

/// Restore the previous current value using a token from [`install`].
#[allow(dead_code)]
pub(crate) fn restore(token: ContextToken) {
    with_stack(|stack| {
        stack.truncate(token.depth);
    });
}

/// Remove `id` from this chain's stack, wherever it sits. Used at
/// finalization so later calls on the chain stop attributing to a finished
/// interaction.
pub(crate) fn clear_current(id: &str) {
    with_stack(|stack| {
        stack.retain(|entry| entry.id != id);
    });
}

/// Run a future with `interaction` installed as current in a fresh
/// task-local scope. Leaving the scope (normally or via error) restores the
/// previous value automatically, and tasks spawned elsewhere never observe
/// this scope's interaction.
pub(crate) async fn scope<F>(interaction: InteractionRef, future: F) -> F::Output
where
    F: Future,
{
    TASK_STACK
        .scope(RefCell::new(vec![interaction]), future)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InteractionShared;
    use crate::types::InteractionData;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    fn make_ref(id: &str) -> InteractionRef {
        Arc::new(InteractionShared {
            id: id.to_string(),
            data: Mutex::new(InteractionData {
                interaction_id: id.to_string(),
                user_id: None,
                conversation_id: None,
                start_time: Utc::now(),
                input: None,
                output: None,
                model: None,
                event: "interaction".to_string(),
                properties: HashMap::new(),
                attachments: Vec::new(),
                spans: Vec::new(),
            }),
            finished: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_install_and_restore() {
        assert!(current().is_none());

        let first = make_ref("int_1");
        let token = install(first.clone());
        assert_eq!(current().unwrap().id, "int_1");

        let second = make_ref("int_2");
        let inner = install(second);
        assert_eq!(current().unwrap().id, "int_2");

        restore(inner);
        assert_eq!(current().unwrap().id, "int_1");

        restore(token);
        assert!(current().is_none());
    }

    #[test]
    fn test_clear_current_removes_by_id() {
        let token = install(make_ref("int_1"));
        install(make_ref("int_2"));

        clear_current("int_2");
        assert_eq!(current().unwrap().id, "int_1");

        clear_current("int_1");
        assert!(current().is_none());
        drop(token);
    }

    #[tokio::test]
    async fn test_scope_installs_and_restores() {
        let interaction = make_ref("int_scoped");

        let seen = scope(interaction, async { current().map(|i| i.id.clone()) }).await;
        assert_eq!(seen.as_deref(), Some("int_scoped"));

        // Outside the scope the chain has no current interaction.
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_chains_are_isolated() {
        let a = tokio::spawn(scope(make_ref("int_a"), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            current().map(|i| i.id.clone())
        }));
        let b = tokio::spawn(scope(make_ref("int_b"), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            current().map(|i| i.id.clone())
        }));

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.as_deref(), Some("int_a"));
        assert_eq!(b.as_deref(), Some("int_b"));
    }

    #[tokio::test]
    async fn test_nested_scopes_shadow_and_restore() {
        let outcome = scope(make_ref("outer"), async {
            let inner_seen = scope(make_ref("inner"), async {
                current().map(|i| i.id.clone())
            })
            .await;
            (inner_seen, current().map(|i| i.id.clone()))
        })
        .await;

        assert_eq!(outcome.0.as_deref(), Some("inner"));
        assert_eq!(outcome.1.as_deref(), Some("outer"));
    }
}
