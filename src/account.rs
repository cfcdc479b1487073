//! A single account: an immutable id plus a lock-protected balance and
//! credit limit.
//!
//! The lock never leaves this module. Every accessor takes it, touches one
//! field and releases it before returning, so callers cannot hold it across
//! I/O or while touching a second account.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutable fields of an account
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ledger {
    balance: f64,
    credit: f64,
}

/// A named account holding a balance and a credit limit
#[derive(Debug)]
pub struct Account {
    id: String,
    ledger: Mutex<Ledger>,
}

impl Account {
    /// Create an account with its initial balance and credit limit
    pub fn new(id: impl Into<String>, balance: f64, credit: f64) -> Self {
        Self {
            id: id.into(),
            ledger: Mutex::new(Ledger { balance, credit }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the balance. No range or overdraft check is applied.
    pub fn set_balance(&self, amount: f64) {
        self.lock().balance = amount;
    }

    pub fn balance(&self) -> f64 {
        self.lock().balance
    }

    /// Replace the credit limit. Negative limits are accepted as-is.
    pub fn set_credit(&self, credit: f64) {
        self.lock().credit = credit;
    }

    pub fn credit(&self) -> f64 {
        self.lock().credit
    }

    // Writes under the lock are single field stores, so a poisoned guard
    // still holds a fully written value.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
