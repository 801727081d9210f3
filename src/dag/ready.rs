use indexmap::{IndexMap, IndexSet};

use crate::error::DagError;
use crate::expr::Thunk;
use crate::key::Key;
use crate::value::{Callable, Value};

use super::{Dag, Slot};

/// A node whose every dependency has a result, ready to be shipped to a
/// runtime. The thunk already carries the dependency values.
#[derive(Debug, Clone)]
pub struct Task {
    pub key: Key,
    pub thunk: Thunk,
}

impl Task {
    /// Name of the outermost callable, `"other"` for lists of calls.
    pub fn category(&self) -> &str {
        self.thunk.callable().map_or("other", Callable::name)
    }

    pub fn run(&self) -> anyhow::Result<Value> {
        self.thunk.eval()
    }
}

type Ready = IndexMap<Key, Task>;

impl Dag {
    /// Every node without a result whose dependencies are all resolved.
    ///
    /// Meant for bootstrapping: tasks returned by earlier calls that have not
    /// reported back yet are listed again. Afterwards new work is discovered
    /// through [`Dag::set_result`].
    pub fn get_ready(&mut self) -> Result<Vec<Task>, DagError> {
        let candidates: Vec<Key> = self
            .graph
            .keys()
            .filter(|key| {
                !self.results.contains_key(*key)
                    && self.missing.get(*key).is_some_and(IndexSet::is_empty)
            })
            .cloned()
            .collect();

        let mut ready = Ready::new();
        for key in &candidates {
            if !self.results.contains_key(key) {
                self.dispatch(key, &mut ready)?;
            }
        }

        Ok(ready.into_values().collect())
    }

    /// Stores the result of `key` and returns the tasks that became ready.
    ///
    /// # Panics
    ///
    /// If `key` already has a result.
    pub fn set_result(&mut self, key: &Key, value: Value) -> Result<Vec<Task>, DagError> {
        if !self.graph.contains_key(key) {
            return Err(DagError::UnknownKey(key.clone()));
        }

        let mut ready = Ready::new();
        self.record(key, value, &mut ready)?;

        Ok(ready.into_values().collect())
    }

    fn record(&mut self, key: &Key, value: Value, ready: &mut Ready) -> Result<(), DagError> {
        let previous = self.results.insert(key.clone(), Slot::Value(value));
        assert!(previous.is_none(), "result for key '{key}' was set twice");

        let parents: Vec<Key> = self.parents(key).cloned().collect();
        for parent in &parents {
            if self.results.contains_key(parent) {
                continue;
            }

            let Some(missing) = self.missing.get_mut(parent) else {
                continue;
            };

            if missing.shift_remove(key) && missing.is_empty() {
                self.dispatch(parent, ready)?;
            }
        }

        let children: Vec<Key> = self.children(key).cloned().collect();
        for child in &children {
            let Some(pending) = self.pending_parents.get_mut(child) else {
                continue;
            };

            pending.shift_remove(key);
            if self.low_memory && pending.is_empty() {
                self.release(child);
            }
        }

        Ok(())
    }

    /// Substitutes the dependency values into the form of a ready node. Nodes
    /// without calls are resolved on the spot, everything else becomes a task.
    fn dispatch(&mut self, key: &Key, ready: &mut Ready) -> Result<(), DagError> {
        self.update_depth(key);

        let Some(form) = self.graph.get(key) else {
            return Err(DagError::UnknownKey(key.clone()));
        };

        let thunk = form.substitute(&mut |child: &Key| self.get_result(child).cloned())?;

        match thunk.into_inert() {
            Ok(value) => {
                tracing::debug!(%key, "resolved in place");
                self.record(key, value, ready)
            }
            Err(thunk) => {
                tracing::debug!(%key, "ready");
                ready.insert(
                    key.clone(),
                    Task {
                        key: key.clone(),
                        thunk,
                    },
                );
                Ok(())
            }
        }
    }

    fn update_depth(&mut self, key: &Key) {
        let depth = self
            .children(key)
            .map(|child| self.depth.get(child).copied().unwrap_or(0))
            .min()
            .map_or(0, |shallowest| shallowest + 1);

        self.depth.insert(key.clone(), depth);
    }

    fn release(&mut self, key: &Key) {
        if !key.is_derived() || self.targets.contains(key) {
            return;
        }

        if let Some(slot) = self.results.get_mut(key)
            && matches!(slot, Slot::Value(_))
        {
            *slot = Slot::Released;
            tracing::debug!(%key, "result released");
        }
    }
}
