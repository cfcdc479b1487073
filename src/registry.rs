//! The registry owns every account and maps ids to them.
//!
//! Its lock guards membership only. `lookup` clones the account handle and
//! drops the registry lock before returning, so field operations on one
//! account never serialize against lookups or operations on another.

use crate::account::Account;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Initial state of one account
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AccountSeed {
    pub id: String,
    pub balance: f64,
    pub credit: f64,
}

/// Thread-safe id -> account map
#[derive(Debug, Default)]
pub struct Registry {
    accounts: RwLock<HashMap<String, Arc<Account>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry populated from seeds.
    /// Later seeds overwrite earlier ones with the same id.
    pub fn with_seeds(seeds: &[AccountSeed]) -> Arc<Self> {
        let registry = Self::new();
        for seed in seeds {
            registry.insert(Account::new(seed.id.clone(), seed.balance, seed.credit));
        }
        info!(accounts = registry.len(), "Initialized registry");
        Arc::new(registry)
    }

    /// Find an account by id
    pub fn lookup(&self, id: &str) -> Option<Arc<Account>> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts.get(id).cloned()
    }

    /// Add an account, replacing any existing entry with the same id
    pub fn insert(&self, account: Account) {
        let id = account.id().to_string();
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        if accounts.insert(id.clone(), Arc::new(account)).is_some() {
            debug!(id, "Replaced account");
        }
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
