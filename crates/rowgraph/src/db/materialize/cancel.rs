use crate::{
    db::driver::StatementCancel,
    error::{ErrorOrigin, InternalError},
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

///
/// CancelState
/// Fields guarded by the single cancellation lock.
///

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    statement: Option<Arc<dyn StatementCancel>>,
}

///
/// CancelHandle
///
/// Thread-safe cancellation capability for one fetch. Cloned handles share
/// state, so a handle can be moved to another thread while the owning
/// thread is blocked in statement execution or cursor advancement.
///
/// `cancel` and statement registration serialize on the same lock: a cancel
/// that lands before execution suppresses it, and a cancel that lands after
/// registration reaches the live statement.
///

#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

impl CancelHandle {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; only the first call reaches the
    /// driver. The flag stays set even when the driver cancel fails.
    pub fn cancel(&self) -> Result<(), InternalError> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Ok(());
        }
        state.cancelled = true;

        match &state.statement {
            Some(statement) => statement.cancel().map_err(|err| {
                log::error!("driver cancel failed: {err}");
                InternalError::execution(ErrorOrigin::Statement, err)
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Enter the cancellation lock for the start of execution.
    pub(crate) fn lock(&self) -> CancelGuard<'_> {
        CancelGuard(self.state.lock())
    }

    /// Forget the live statement once it has been closed.
    pub(crate) fn unregister(&self) {
        self.state.lock().statement = None;
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CancelHandle")
            .field("cancelled", &state.cancelled)
            .field("statement", &state.statement.is_some())
            .finish()
    }
}

///
/// CancelGuard
///

pub(crate) struct CancelGuard<'a>(MutexGuard<'a, CancelState>);

impl CancelGuard<'_> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.cancelled
    }

    pub(crate) fn register(&mut self, statement: Arc<dyn StatementCancel>) {
        self.0.statement = Some(statement);
    }
}
