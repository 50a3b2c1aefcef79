use std::sync::Mutex;

use super::repository::{LifecycleRepository, LifecycleState, RepositoryError};

/// Process-local store. One mutex serializes every transaction, and each transaction
/// works on a copy that replaces the committed state only on success.
#[derive(Debug, Default)]
pub struct InMemoryLifecycleStore {
    state: Mutex<LifecycleState>,
}

impl InMemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LifecycleState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Copy of the committed state, for reports and tests.
    pub fn snapshot(&self) -> Result<LifecycleState, RepositoryError> {
        self.read(LifecycleState::clone)
    }
}

impl LifecycleRepository for InMemoryLifecycleStore {
    fn transact<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut LifecycleState) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut committed = self.state.lock().map_err(|_| {
            E::from(RepositoryError::Unavailable(
                "lifecycle store mutex poisoned".to_string(),
            ))
        })?;

        let mut working = committed.clone();
        let value = work(&mut working)?;
        *committed = working;
        Ok(value)
    }

    fn read<T, F>(&self, view: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&LifecycleState) -> T,
    {
        let committed = self.state.lock().map_err(|_| {
            RepositoryError::Unavailable("lifecycle store mutex poisoned".to_string())
        })?;
        Ok(view(&committed))
    }
}
