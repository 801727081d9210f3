use crate::key::Key;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DagError {
    #[error("Key '{0}' has no result yet")]
    NoResult(Key),

    #[error("Key '{0}' is not part of the graph")]
    UnknownKey(Key),

    #[error("Result of key '{0}' was released after all of its dependents completed")]
    Released(Key),

    #[error("Cycle detected in task graph at key '{0}'")]
    Cycle(Key),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error("Task for key '{key}' failed permanently after {attempts} attempt(s):\n{source:#}")]
    TaskFailed {
        key: Key,
        attempts: u32,
        source: anyhow::Error,
    },

    #[error("Nothing is running but {} target(s) are unresolved: {}", .0.len(), format_keys(.0))]
    Stalled(Vec<Key>),

    #[error("No task completed after {0} consecutive waits")]
    Timeout(u32),

    #[error("Runtime:\n{0:#}")]
    Runtime(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read configuration file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't parse configuration.\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Couldn't parse graph description.\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Graph description must be a JSON object or an array of key/expression entries")]
    NotAGraph,

    #[error("Unknown callable '{0}'")]
    UnknownCallable(String),

    #[error("Malformed expression at '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

fn format_keys(keys: &[Key]) -> String {
    const MAX: usize = 5;
    let names: Vec<String> = keys.iter().take(MAX).map(Key::to_string).collect();

    if keys.len() <= MAX {
        names.join(", ")
    } else {
        format!("{}… ({} total)", names.join(", "), keys.len())
    }
}
