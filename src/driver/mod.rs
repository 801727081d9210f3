//! Submitting ready work to a runtime and folding completions back in.
//!
//! The [`Driver`] owns a [`Runtime`] and runs one graph at a time. Ready
//! tasks are wrapped into [`WorkUnit`]s and submitted; the driver then blocks
//! on [`Runtime::wait`] until every requested key has a result. Failed units
//! are resubmitted or abort the run, depending on [`FailurePolicy`].

mod diagnostics;
#[cfg(feature = "local")]
mod local;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::{DriverConfig, Resources};
use crate::dag::{Dag, DagOptions, Task};
use crate::error::{ConfigError, DagError, DriverError};
use crate::expr::Expr;
use crate::key::Key;
use crate::value::Value;

pub use diagnostics::{Diagnostics, TaskExecution};
#[cfg(feature = "local")]
pub use local::LocalRuntime;

/// A task as handed to a runtime.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub task: Task,
    /// Name of the applied callable, used by runtimes to group similar units.
    pub category: String,
    /// 1 for the first submission, incremented on every retry.
    pub attempt: u32,
    pub resources: Option<Resources>,
    pub env_vars: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct Completion<Id> {
    pub id: Id,
    pub outcome: anyhow::Result<Value>,
}

/// An execution service for work units.
pub trait Runtime {
    type Id: Eq + Hash + Clone + Debug;

    /// Queues a unit and returns the identifier its completion will carry.
    fn submit(&mut self, unit: WorkUnit) -> anyhow::Result<Self::Id>;

    /// Blocks until any submitted unit completes, or returns `None` once
    /// `timeout` has passed without a completion.
    fn wait(&mut self, timeout: Duration) -> anyhow::Result<Option<Completion<Self::Id>>>;
}

/// Keys to compute, in the shape the results should be returned in.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Key(Key),
    List(Vec<Request>),
}

impl Request {
    /// Every key in the request, depth first.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<Key>) {
        match self {
            Request::Key(key) => keys.push(key.clone()),
            Request::List(items) => {
                for item in items {
                    item.collect_keys(keys);
                }
            }
        }
    }

    /// The request with every key replaced by its result.
    pub fn fill(&self, dag: &Dag) -> Result<Value, DagError> {
        match self {
            Request::Key(key) => dag.get_result(key).cloned(),
            Request::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| item.fill(dag))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
}

impl From<Key> for Request {
    fn from(value: Key) -> Self {
        Request::Key(value)
    }
}

impl From<&str> for Request {
    fn from(value: &str) -> Self {
        Request::Key(Key::from(value))
    }
}

impl<T: Into<Request>> From<Vec<T>> for Request {
    fn from(value: Vec<T>) -> Self {
        Request::List(value.into_iter().map(Into::into).collect())
    }
}

struct InFlight {
    task: Task,
    attempt: u32,
    start: Instant,
}

pub struct Driver<R: Runtime> {
    runtime: R,
    config: DriverConfig,
}

impl<R: Runtime> Driver<R> {
    pub fn new(runtime: R, config: DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { runtime, config })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn into_runtime(self) -> R {
        self.runtime
    }

    /// Builds a graph from `entries` and computes the keys in `request`.
    pub fn get<I, K>(&mut self, entries: I, request: &Request) -> Result<Value, DriverError>
    where
        I: IntoIterator<Item = (K, Expr)>,
        K: Into<Key>,
    {
        let options = DagOptions {
            low_memory: self.config.low_memory_mode,
        };

        let mut dag = Dag::with_options(entries, options);
        let (value, _) = self.execute(&mut dag, request)?;
        Ok(value)
    }

    /// Computes the keys in `request` on an existing graph.
    ///
    /// Only tasks the requested keys depend on are submitted, other ready
    /// nodes of the graph stay unresolved. The call returns as soon as every
    /// requested key has a result, work still in flight at that point is left
    /// to the runtime.
    pub fn execute(
        &mut self,
        dag: &mut Dag,
        request: &Request,
    ) -> Result<(Value, Diagnostics), DriverError> {
        if self.config.check_cycles {
            dag.check_acyclic()?;
        }

        let ready = dag.set_targets(request.keys())?;
        let required = dag.required();

        let root_span = tracing::span!(Level::INFO, "evaluating");
        root_span.pb_set_style(&crate::utils::progress_style());
        root_span.pb_set_message("Waiting for tasks...");
        let _enter = root_span.enter();

        let mut in_flight: HashMap<R::Id, InFlight> = HashMap::new();
        let mut diagnostics = Diagnostics::default();
        let mut submitted = 0;
        let mut idle_waits = 0;

        for task in ready {
            if required.contains(&task.key) {
                self.submit(task, 1, &mut in_flight)?;
                submitted += 1;
            }
        }
        root_span.pb_set_length(submitted);

        while !dag.targets_resolved() {
            if in_flight.is_empty() {
                return Err(DriverError::Stalled(dag.unresolved_targets()));
            }

            let completion = self
                .runtime
                .wait(self.config.wait_timeout())
                .map_err(DriverError::Runtime)?;

            let Some(Completion { id, outcome }) = completion else {
                idle_waits += 1;
                tracing::debug!(idle_waits, in_flight = in_flight.len(), "no completion yet");

                if let Some(max) = self.config.max_idle_waits
                    && idle_waits >= max
                {
                    return Err(DriverError::Timeout(idle_waits));
                }
                continue;
            };
            idle_waits = 0;

            let Some(InFlight {
                task,
                attempt,
                start,
            }) = in_flight.remove(&id)
            else {
                tracing::warn!(?id, "completion for unknown work unit");
                continue;
            };

            diagnostics.record(&task, attempt, start, start.elapsed());

            match outcome {
                Ok(value) => {
                    tracing::debug!(key = %task.key, attempt, "task completed");
                    root_span.pb_inc(1);

                    for ready in dag.set_result(&task.key, value)? {
                        if required.contains(&ready.key) {
                            self.submit(ready, 1, &mut in_flight)?;
                            submitted += 1;
                        }
                    }
                    root_span.pb_set_length(submitted);
                }
                Err(err) if attempt < self.config.max_attempts() => {
                    tracing::warn!(
                        key = %task.key,
                        attempt,
                        "task failed, resubmitting: {err:#}"
                    );
                    self.submit(task, attempt + 1, &mut in_flight)?;
                }
                Err(err) => {
                    tracing::error!(
                        key = %task.key,
                        attempt,
                        policy = ?self.config.on_failure,
                        "task failed, giving up"
                    );

                    return Err(DriverError::TaskFailed {
                        key: task.key,
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }

        tracing::info!(
            executed = diagnostics.execution_times.len(),
            left_to_compute = dag.left_to_compute(),
            "evaluation complete"
        );

        let value = request.fill(dag)?;
        Ok((value, diagnostics))
    }

    fn submit(
        &mut self,
        task: Task,
        attempt: u32,
        in_flight: &mut HashMap<R::Id, InFlight>,
    ) -> Result<(), DriverError> {
        let unit = WorkUnit {
            category: task.category().to_string(),
            task: task.clone(),
            attempt,
            resources: self.config.resources.clone(),
            env_vars: self.config.env_vars.clone(),
        };

        let id = self.runtime.submit(unit).map_err(DriverError::Runtime)?;
        tracing::debug!(key = %task.key, ?id, attempt, "submitted");

        in_flight.insert(
            id,
            InFlight {
                task,
                attempt,
                start: Instant::now(),
            },
        );

        Ok(())
    }
}
