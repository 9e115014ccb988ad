//! Session lifecycle tracking shared by every driver.

pub mod queue;

pub use queue::{QueuedStatement, StatementOutcome, StatementQueue, StatementRunner};

use crate::util::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InTransaction,
    Released,
}

/// Transaction state machine of one database session. Drivers consult it
/// before issuing `BEGIN`/`COMMIT`/`ROLLBACK` so that misuse is reported as a
/// typed error instead of whatever the server happens to answer.
#[derive(Debug)]
pub struct SessionGuard {
    state: SessionState,
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGuard {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.state == SessionState::InTransaction
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Released {
            return Err(Error::ConnectionLifecycle(
                "session has already been released".to_string(),
            ));
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.in_transaction() {
            return Err(Error::TransactionState(
                "transaction already started for this session".to_string(),
            ));
        }
        self.state = SessionState::InTransaction;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.finish("commit")
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.finish("rollback")
    }

    fn finish(&mut self, action: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.in_transaction() {
            return Err(Error::TransactionState(format!(
                "cannot {action}: no transaction is active"
            )));
        }
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Undoes a state change whose statement failed to execute.
    pub fn restore(&mut self, state: SessionState) {
        if self.state != SessionState::Released {
            self.state = state;
        }
    }

    /// Marks the session released. Returns whether a transaction was still
    /// open and needs rolling back.
    pub fn release(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let open = self.in_transaction();
        self.state = SessionState::Released;
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_commit_cycle() {
        let mut guard = SessionGuard::new();
        guard.begin().unwrap();
        assert!(guard.in_transaction());
        guard.commit().unwrap();
        assert_eq!(guard.state(), SessionState::Idle);
        guard.begin().unwrap();
        guard.rollback().unwrap();
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut guard = SessionGuard::new();
        guard.begin().unwrap();
        assert!(matches!(guard.begin(), Err(Error::TransactionState(_))));
    }

    #[test]
    fn commit_without_transaction_is_rejected() {
        let mut guard = SessionGuard::new();
        assert!(matches!(guard.commit(), Err(Error::TransactionState(_))));
        assert!(matches!(guard.rollback(), Err(Error::TransactionState(_))));
    }

    #[test]
    fn released_session_rejects_everything() {
        let mut guard = SessionGuard::new();
        guard.begin().unwrap();
        assert!(guard.release().unwrap());
        assert!(matches!(guard.begin(), Err(Error::ConnectionLifecycle(_))));
        assert!(matches!(guard.commit(), Err(Error::ConnectionLifecycle(_))));
        assert!(matches!(guard.release(), Err(Error::ConnectionLifecycle(_))));
    }

    #[test]
    fn restore_does_not_reopen_released_session() {
        let mut guard = SessionGuard::new();
        guard.release().unwrap();
        guard.restore(SessionState::Idle);
        assert_eq!(guard.state(), SessionState::Released);
    }
}
