//! Storage usage against the configured budget.

use serde::Serialize;

use super::{Store, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageUsage {
    pub used: u64,
    pub budget: u64,
    pub percentage: f64,
}

impl StorageUsage {
    pub fn new(used: u64, budget: u64) -> Self {
        let percentage = if budget == 0 {
            100.0
        } else {
            used as f64 / budget as f64 * 100.0
        };
        Self {
            used,
            budget,
            percentage,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.used)
    }

    pub fn is_exceeded(&self) -> bool {
        self.used > self.budget
    }
}

impl Store {
    /// Sum of the byte lengths of every persisted value.
    pub fn usage(&self) -> StoreResult<StorageUsage> {
        let used = Self::bytes_used_in(&self.conn)?;
        Ok(StorageUsage::new(used, self.budget_bytes))
    }
}
