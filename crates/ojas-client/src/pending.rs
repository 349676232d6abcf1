//! Optimistic mutations with rollback.
//!
//! A [`Command`] changes local state before the server confirms it. If the
//! server call fails, [`run_optimistic`] calls `undo` so the state is exactly
//! what it was before `apply`.

use std::future::Future;

use tracing::warn;

use crate::error::Result;

pub trait Command<S> {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Change `state` and remember whatever `undo` needs.
    fn apply(&mut self, state: &mut S);

    /// Restore `state` to how it was before `apply`.
    fn undo(&mut self, state: &mut S);
}

/// Apply `command`, await `call`, and roll back if the call fails.
pub async fn run_optimistic<S, C, F, T>(state: &mut S, mut command: C, call: F) -> Result<T>
where
    C: Command<S>,
    F: Future<Output = Result<T>>,
{
    command.apply(state);
    match call.await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(command = command.name(), error = %e, "Server rejected change, rolling back");
            command.undo(state);
            Err(e)
        }
    }
}
