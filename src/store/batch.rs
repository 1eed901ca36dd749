//! Per-thread write staging backing `with_batch`
//!
//! While a scope is open on a thread, puts and deletes issued from that thread
//! are recorded in an overlay instead of being applied, and reads from the same
//! thread consult the overlay first. Other threads never see staged writes.

use crate::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ThreadId};

/// Staged writes of one scope; `None` marks a delete
pub type StagedWrites<K> = BTreeMap<K, Option<Vec<u8>>>;

/// Staging key of stores holding several named columns
pub(crate) type CfKey = (String, Vec<u8>);

/// Previous staged state of each key a nested scope touched, oldest first
type UndoLog<K> = Vec<(K, Option<Option<Vec<u8>>>)>;

struct Scope<K> {
    writes: StagedWrites<K>,
    /// One log per nested scope still running
    savepoints: Vec<UndoLog<K>>,
}

pub(crate) struct Staging<K: Ord> {
    scopes: Mutex<HashMap<ThreadId, Scope<K>>>,
}

impl<K: Ord + Clone> Staging<K> {
    pub fn new() -> Self {
        Staging {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Record a write if a scope is open on this thread; returns false otherwise
    pub fn stage(&self, key: K, value: Option<Vec<u8>>) -> bool {
        let mut scopes = self.scopes.lock();
        let scope = match scopes.get_mut(&thread::current().id()) {
            Some(scope) => scope,
            None => return false,
        };
        match scope.savepoints.last_mut() {
            Some(log) => {
                let previous = scope.writes.insert(key.clone(), value);
                log.push((key, previous));
            }
            None => {
                scope.writes.insert(key, value);
            }
        }
        true
    }

    /// `Some(staged)` if this thread's scope holds a write for `key`
    pub fn lookup(&self, key: &K) -> Option<Option<Vec<u8>>> {
        let scopes = self.scopes.lock();
        scopes
            .get(&thread::current().id())
            .and_then(|scope| scope.writes.get(key).cloned())
    }

    /// Keys with a put staged in any thread's open scope
    pub fn pending_puts(&self) -> Vec<K> {
        let scopes = self.scopes.lock();
        scopes
            .values()
            .flat_map(|scope| {
                scope
                    .writes
                    .iter()
                    .filter(|(_, value)| value.is_some())
                    .map(|(key, _)| key.clone())
            })
            .collect()
    }

    /// Run `work` inside a scope and hand the staged writes to `apply` when it succeeds
    ///
    /// A scope opened while one is already active on this thread joins the outer
    /// scope, so nested calls commit once, at the outermost level. A nested scope
    /// that fails takes its own writes back out of the outer scope.
    pub fn run(
        &self,
        work: &mut dyn FnMut() -> Result<()>,
        apply: impl FnOnce(StagedWrites<K>) -> Result<()>,
    ) -> Result<()> {
        let id = thread::current().id();
        {
            let mut scopes = self.scopes.lock();
            if let Some(scope) = scopes.get_mut(&id) {
                scope.savepoints.push(UndoLog::new());
                drop(scopes);
                let outcome = work();
                self.release_savepoint(id, outcome.is_err());
                return outcome;
            }
            scopes.insert(
                id,
                Scope {
                    writes: StagedWrites::new(),
                    savepoints: Vec::new(),
                },
            );
        }

        let guard = ScopeGuard { staging: self, id };
        let outcome = work();
        let writes = guard.close();
        outcome?;
        apply(writes)
    }

    fn release_savepoint(&self, id: ThreadId, rollback: bool) {
        let mut scopes = self.scopes.lock();
        let scope = match scopes.get_mut(&id) {
            Some(scope) => scope,
            None => return,
        };
        let log = match scope.savepoints.pop() {
            Some(log) => log,
            None => return,
        };
        if rollback {
            for (key, previous) in log.into_iter().rev() {
                match previous {
                    Some(value) => scope.writes.insert(key, value),
                    None => scope.writes.remove(&key),
                };
            }
        } else if let Some(parent) = scope.savepoints.last_mut() {
            parent.extend(log);
        }
    }
}

/// Closes the scope even if the work panics
struct ScopeGuard<'a, K: Ord> {
    staging: &'a Staging<K>,
    id: ThreadId,
}

impl<'a, K: Ord> ScopeGuard<'a, K> {
    fn close(self) -> StagedWrites<K> {
        let writes = self
            .staging
            .scopes
            .lock()
            .remove(&self.id)
            .map(|scope| scope.writes)
            .unwrap_or_default();
        std::mem::forget(self);
        writes
    }
}

impl<'a, K: Ord> Drop for ScopeGuard<'a, K> {
    fn drop(&mut self) {
        self.staging.scopes.lock().remove(&self.id);
    }
}
