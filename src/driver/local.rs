use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::Level;

use super::{Completion, Runtime, WorkUnit};

/// Runs work units on a rayon thread pool inside the current process.
///
/// Resource hints and environment variables of a unit are not applied, all
/// units share the environment of the process.
pub struct LocalRuntime {
    pool: ThreadPool,
    sender: Sender<Completion<u64>>,
    receiver: Receiver<Completion<u64>>,
    next_id: u64,
}

impl LocalRuntime {
    /// A runtime with one worker per available core.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_threads(0)
    }

    /// `threads == 0` lets rayon pick the number of workers.
    pub fn with_threads(threads: usize) -> anyhow::Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("vinegraph-worker-{index}"))
            .build()?;

        let (sender, receiver) = channel();

        Ok(Self {
            pool,
            sender,
            receiver,
            next_id: 0,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Runtime for LocalRuntime {
    type Id = u64;

    fn submit(&mut self, unit: WorkUnit) -> anyhow::Result<u64> {
        let id = self.next_id;
        self.next_id += 1;

        let sender = self.sender.clone();

        self.pool.spawn(move || {
            let span = tracing::span!(
                Level::DEBUG,
                "task",
                key = %unit.task.key,
                category = %unit.category,
                attempt = unit.attempt
            );
            let _enter = span.enter();

            let start = Instant::now();

            // The task only reads its own thunk, a panic cannot leave shared
            // state half-updated.
            let outcome = match catch_unwind(AssertUnwindSafe(|| unit.task.run())) {
                Ok(result) => result,
                Err(panic) => {
                    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        format!("Task panicked: {s}")
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        format!("Task panicked: {s}")
                    } else {
                        String::from("Task panicked with unknown payload")
                    };

                    Err(anyhow::anyhow!(msg))
                }
            };

            tracing::trace!(elapsed = ?start.elapsed(), ok = outcome.is_ok(), "finished");

            // The driver may have returned already.
            _ = sender.send(Completion { id, outcome });
        });

        Ok(id)
    }

    fn wait(&mut self, timeout: Duration) -> anyhow::Result<Option<Completion<u64>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => Ok(Some(completion)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("completion channel of the local runtime closed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::driver::{Driver, Request};
    use crate::error::DriverError;
    use crate::expr::Expr;
    use crate::load::{Registry, parse_graph};
    use crate::value::{Callable, Value};

    #[test]
    fn test_evaluates_json_graph() {
        let registry = Registry::with_builtins();
        let entries = parse_graph(
            r#"{
                "a": 1,
                "b": 2,
                "c": { "call": "add", "args": ["a", "b"] },
                "d": { "call": "mul", "args": ["c", { "call": "add", "args": ["c", 1] }] },
                "parts": ["a", "b", "c", "d"],
                "total": { "call": "sum", "args": ["parts"] }
            }"#,
            &registry,
        )
        .unwrap();

        let mut driver = Driver::new(LocalRuntime::with_threads(2).unwrap(), DriverConfig::default()).unwrap();
        let value = driver
            .get(entries, &Request::from(vec!["total", "d"]))
            .unwrap();

        assert_eq!(value, Value::from(vec![18, 12]));
    }

    #[test]
    fn test_panics_become_failures() {
        let explode = Callable::new("explode", |_| panic!("kaboom"));
        let entries = vec![("boom", Expr::call(&explode, []))];

        let config = DriverConfig {
            retries: 2,
            ..Default::default()
        };
        let mut driver = Driver::new(LocalRuntime::with_threads(1).unwrap(), config).unwrap();

        let err = driver.get(entries, &Request::from("boom")).unwrap_err();
        assert!(matches!(err, DriverError::TaskFailed { attempts: 2, .. }));
        assert!(err.to_string().contains("Task panicked: kaboom"));
    }

    #[test]
    fn test_wait_times_out() {
        let mut runtime = LocalRuntime::with_threads(1).unwrap();
        assert!(runtime.wait(Duration::from_millis(1)).unwrap().is_none());
    }
}
