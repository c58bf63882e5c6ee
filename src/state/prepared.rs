//! state::prepared
//!
//! Change descriptions saved before submission.
//!
//! Submitting a branch asks for a subject and body, then talks to the
//! forge. If that fails, the text is kept here so the next attempt can
//! offer it again instead of making the user retype it.

use serde::{Deserialize, Serialize};

use super::{check_branch_name, StateError, Store};

const PREPARED_DIR: &str = "prepared";

fn prepared_key(name: &str) -> String {
    format!("{PREPARED_DIR}/{name}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PreparedState {
    subject: String,
    body: String,
}

/// A change description waiting to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBranch {
    pub name: String,
    pub subject: String,
    pub body: String,
}

impl Store {
    /// Save the change description for a branch, replacing any earlier one.
    pub fn save_prepared_branch(&self, branch: &PreparedBranch) -> Result<(), StateError> {
        let name = check_branch_name(&branch.name)?;
        let state = PreparedState {
            subject: branch.subject.clone(),
            body: branch.body.clone(),
        };
        self.db().set(
            &prepared_key(name.as_str()),
            &state,
            &format!("{name}: save prepared branch"),
        )?;
        Ok(())
    }

    /// Load a saved change description. `None` if nothing was saved.
    pub fn load_prepared_branch(&self, name: &str) -> Result<Option<PreparedBranch>, StateError> {
        let name = check_branch_name(name)?;
        match self.db().get::<PreparedState>(&prepared_key(name.as_str())) {
            Ok(state) => Ok(Some(PreparedBranch {
                name: name.into_string(),
                subject: state.subject,
                body: state.body,
            })),
            Err(crate::storage::StorageError::NotExist) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Forget a saved change description. Succeeds if there was none.
    pub fn clear_prepared_branch(&self, name: &str) -> Result<(), StateError> {
        let name = check_branch_name(name)?;
        self.db().delete(
            &prepared_key(name.as_str()),
            &format!("{name}: clear prepared branch"),
        )?;
        Ok(())
    }
}
