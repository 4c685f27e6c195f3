//! Current transaction of the calling thread
//!
//! A transaction can be entered on a thread so code deep in a call stack
//! reaches it without threading a handle through. Explicit handles from
//! [`Store::begin`](crate::Store::begin) work without any of this.

use std::cell::RefCell;

use crate::error::{Result, TroveError};

use super::Transaction;

thread_local! {
    static CURRENT: RefCell<Option<Transaction>> = const { RefCell::new(None) };
}

/// Make `txn` the current transaction of this thread
pub fn enter(txn: Transaction) -> Result<()> {
    CURRENT.with(|current| {
        let mut current = current
            .try_borrow_mut()
            .map_err(|_| TroveError::Transaction("current transaction is in use".to_string()))?;
        if current.is_some() {
            return Err(TroveError::Transaction(
                "a transaction is already entered on this thread".to_string(),
            ));
        }
        *current = Some(txn);
        Ok(())
    })
}

/// Take the current transaction off this thread
pub fn exit() -> Result<Option<Transaction>> {
    CURRENT.with(|current| {
        current
            .try_borrow_mut()
            .map(|mut current| current.take())
            .map_err(|_| TroveError::Transaction("current transaction is in use".to_string()))
    })
}

pub fn is_entered() -> bool {
    CURRENT.with(|current| current.try_borrow().map(|c| c.is_some()).unwrap_or(true))
}

/// Run `f` with the current transaction
///
/// Fails with `NoTransaction` when none is entered. Nested calls from
/// inside `f` fail too, since the transaction is already borrowed.
pub fn with_current<R, F>(f: F) -> Result<R>
where
    F: FnOnce(&mut Transaction) -> Result<R>,
{
    CURRENT.with(|current| {
        let mut current = current
            .try_borrow_mut()
            .map_err(|_| TroveError::Transaction("current transaction is in use".to_string()))?;
        match current.as_mut() {
            Some(txn) => f(txn),
            None => Err(TroveError::NoTransaction),
        }
    })
}

/// Commit the current transaction and take it off this thread
///
/// The transaction leaves the thread whatever the outcome.
pub fn commit_current() -> Result<usize> {
    let mut txn = exit()?.ok_or(TroveError::NoTransaction)?;
    txn.commit()
}
