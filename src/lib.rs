#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
mod dag;
mod driver;
mod error;
mod expr;
mod key;
mod load;
mod utils;
mod value;

pub use crate::config::{DriverConfig, FailurePolicy, Resources};
pub use crate::core::Hash32;
pub use crate::dag::{Dag, DagOptions, Task};
#[cfg(feature = "local")]
pub use crate::driver::LocalRuntime;
pub use crate::driver::{
    Completion, Diagnostics, Driver, Request, Runtime, TaskExecution, WorkUnit,
};
pub use crate::error::*;
pub use crate::expr::{Expr, Form, Thunk};
pub use crate::key::Key;
pub use crate::load::{Registry, parse_graph, parse_request};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::value::{Callable, Value};
