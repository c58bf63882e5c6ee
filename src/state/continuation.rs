//! state::continuation
//!
//! Commands to resume after an interrupted rebase.
//!
//! When a rebase stops on a conflict, the operation that started it is
//! queued here. Once the user resolves the conflict and continues, queued
//! commands are taken off the front of the queue and run in order.

use serde::{Deserialize, Serialize};

use super::{StateError, Store};

const REBASE_CONTINUE_KEY: &str = "rebase-continue";

/// A command queued to run on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// Arguments of the command, without the program name.
    pub command: Vec<String>,
    /// Branch the command runs on.
    pub branch: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContinuationQueue {
    #[serde(default)]
    continuations: Vec<Continuation>,
}

impl Store {
    /// Queue `command` to run on `branch` after the current rebase.
    ///
    /// # Errors
    ///
    /// - [`StateError::InvalidRequest`] if `branch` is blank or `command`
    ///   is empty
    pub fn append_continuation(
        &self,
        branch: &str,
        command: Vec<String>,
        message: &str,
    ) -> Result<(), StateError> {
        if branch.trim().is_empty() {
            return Err(StateError::InvalidRequest(
                "a branch name is required".into(),
            ));
        }
        if command.is_empty() {
            return Err(StateError::InvalidRequest(
                "command arguments are required".into(),
            ));
        }

        let mut queue = self.continuation_queue()?;
        queue.continuations.push(Continuation {
            command,
            branch: branch.to_string(),
        });
        self.save_continuation_queue(&queue, message, "set rebase continuation")
    }

    /// Remove and return the oldest queued command.
    ///
    /// An empty queue is not an error: it returns `None`.
    pub fn take_continuation(&self, message: &str) -> Result<Option<Continuation>, StateError> {
        let mut queue = self.continuation_queue()?;
        if queue.continuations.is_empty() {
            return Ok(None);
        }

        let next = queue.continuations.remove(0);
        self.save_continuation_queue(&queue, message, "take rebase continuation")?;
        Ok(Some(next))
    }

    fn continuation_queue(&self) -> Result<ContinuationQueue, StateError> {
        match self.db().get(REBASE_CONTINUE_KEY) {
            Ok(queue) => Ok(queue),
            Err(crate::storage::StorageError::NotExist) => Ok(ContinuationQueue::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save_continuation_queue(
        &self,
        queue: &ContinuationQueue,
        message: &str,
        default_message: &str,
    ) -> Result<(), StateError> {
        let message = if message.is_empty() { default_message } else { message };
        self.db().set(REBASE_CONTINUE_KEY, queue, message)?;
        Ok(())
    }
}
