//! Poison-tolerant access to the std locks guarding cache state.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

const TARGET: &str = "pinfeed::cache::lock";

pub(crate) trait RecoverLock<T> {
    /// Read guard; a poisoned lock is cleared and read anyway.
    fn read_or_recover(&self, source: &'static str, op: &'static str) -> RwLockReadGuard<'_, T>;

    fn write_or_recover(&self, source: &'static str, op: &'static str)
    -> RwLockWriteGuard<'_, T>;
}

impl<T> RecoverLock<T> for RwLock<T> {
    fn read_or_recover(&self, source: &'static str, op: &'static str) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            report_poison(source, op);
            self.clear_poison();
            poisoned.into_inner()
        })
    }

    fn write_or_recover(
        &self,
        source: &'static str,
        op: &'static str,
    ) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            report_poison(source, op);
            self.clear_poison();
            poisoned.into_inner()
        })
    }
}

fn report_poison(source: &'static str, op: &'static str) {
    warn!(
        target = TARGET,
        source,
        op,
        "recovered poisoned cache lock; a writer panicked mid-update"
    );
}
