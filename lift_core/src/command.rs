//! Optimistic update with rollback.
//!
//! A command captures the caller's state before a change, applies the
//! forward action immediately, then awaits the store call. If the call
//! fails the inverse action runs (by default: restore the snapshot), so the
//! caller's view never claims something the store did not accept.

use std::future::Future;

use crate::Result;

type Inverse<'a, S> = Box<dyn FnOnce(&mut S, &S) + Send + 'a>;

/// Forward action already applied to `state`, pending store acknowledgement
pub struct OptimisticCommand<'a, S: Clone> {
    label: &'static str,
    state: &'a mut S,
    snapshot: S,
    inverse: Option<Inverse<'a, S>>,
}

impl<'a, S: Clone> OptimisticCommand<'a, S> {
    /// Snapshot `state`, then apply `forward` to it
    pub fn apply(label: &'static str, state: &'a mut S, forward: impl FnOnce(&mut S)) -> Self {
        let snapshot = state.clone();
        forward(state);
        Self {
            label,
            state,
            snapshot,
            inverse: None,
        }
    }

    /// Replace the default restore-snapshot rollback.
    ///
    /// The closure receives the current state and the pre-change snapshot.
    pub fn with_inverse(mut self, inverse: impl FnOnce(&mut S, &S) + Send + 'a) -> Self {
        self.inverse = Some(Box::new(inverse));
        self
    }

    /// State after the forward action
    pub fn state(&self) -> &S {
        self.state
    }

    /// State before the forward action
    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    /// Await the store call, rolling back on failure
    pub async fn commit<T, F>(self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match call.await {
            Ok(value) => {
                tracing::debug!(command = self.label, "optimistic change acknowledged");
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(command = self.label, error = %e, "store rejected change, rolling back");
                self.rollback();
                Err(e)
            }
        }
    }

    /// Undo the forward action without calling the store
    pub fn rollback(self) {
        match self.inverse {
            Some(inverse) => inverse(self.state, &self.snapshot),
            None => *self.state = self.snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_success_keeps_forward_change() {
        let mut order = vec![0, 1, 2, 3];
        let cmd = OptimisticCommand::apply("rotate", &mut order, |o| o.rotate_right(1));
        assert_eq!(cmd.state(), &vec![3, 0, 1, 2]);

        let value = cmd.commit(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(order, vec![3, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot() {
        let mut order = vec![0, 1, 2, 3];
        let cmd = OptimisticCommand::apply("rotate", &mut order, |o| o.rotate_right(1));
        assert_eq!(cmd.snapshot(), &vec![0, 1, 2, 3]);

        let err = cmd
            .commit(async { Err::<(), _>(Error::Transport("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_custom_inverse_runs_on_failure() {
        let mut counts = vec![1, 1];
        let cmd = OptimisticCommand::apply("bump", &mut counts, |c| c[0] += 1)
            .with_inverse(|c, _before| c[0] -= 1);
        let _ = cmd
            .commit(async { Err::<(), _>(Error::Transport("down".into())) })
            .await;
        assert_eq!(counts, vec![1, 1]);
    }
}
