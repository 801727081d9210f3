//! The working graph and its incremental evaluation state.
//!
//! A [`Dag`] is built once from the caller's `(Key, Expr)` entries and then
//! driven by three calls:
//!
//! 1. [`Dag::set_targets`] marks the keys the caller wants and returns the
//!    first batch of ready [`Task`]s.
//! 2. [`Dag::set_result`] folds the output of a finished task back into the
//!    graph and returns the tasks that became ready because of it.
//! 3. [`Dag::get_result`] reads a value once [`Dag::has_result`] says so.
//!
//! Nothing is evaluated eagerly. Nodes that need no callable, literals,
//! references and lists of those, are resolved in place while results
//! propagate and never show up as tasks.

mod flatten;
mod index;
mod ready;
mod targets;

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use petgraph::graph::NodeIndex;

use crate::error::DagError;
use crate::expr::{Expr, Form};
use crate::key::Key;
use crate::value::Value;

pub use ready::Task;

#[derive(Debug, Clone, Copy, Default)]
pub struct DagOptions {
    /// Rewrite nested expressions into shallow synthetic nodes, and drop the
    /// results of those nodes once every dependent has its own result.
    pub low_memory: bool,
}

#[derive(Debug, Clone)]
enum Slot {
    Value(Value),
    Released,
}

#[derive(Debug, Default)]
pub struct Dag {
    graph: IndexMap<Key, Form>,
    /// Referenced keys, with the shallowest nesting depth each was seen at.
    children: HashMap<Key, IndexMap<Key, usize>>,
    parents: HashMap<Key, IndexSet<Key>>,
    /// Children without a result yet. A node is ready when this is empty.
    missing: HashMap<Key, IndexSet<Key>>,
    /// Parents without a result yet.
    pending_parents: HashMap<Key, IndexSet<Key>>,
    results: HashMap<Key, Slot>,
    depth: HashMap<Key, usize>,
    ref_depth: HashMap<Key, usize>,
    targets: IndexSet<Key>,
    low_memory: bool,
}

impl Dag {
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Expr)>,
        K: Into<Key>,
    {
        Self::with_options(entries, DagOptions::default())
    }

    pub fn with_options<I, K>(entries: I, options: DagOptions) -> Self
    where
        I: IntoIterator<Item = (K, Expr)>,
        K: Into<Key>,
    {
        let entries: Vec<(Key, Expr)> = entries
            .into_iter()
            .map(|(key, expr)| (key.into(), expr))
            .collect();

        let keys: HashSet<&Key> = entries.iter().map(|(key, _)| key).collect();
        let contains = |key: &Key| keys.contains(key);

        let mut dag = Dag {
            low_memory: options.low_memory,
            ..Default::default()
        };

        for (key, expr) in &entries {
            dag.insert_node(key.clone(), Form::classify(expr, &contains));
        }

        if options.low_memory {
            dag.flatten_all();
        }

        let keys: Vec<Key> = dag.graph.keys().cloned().collect();
        for key in &keys {
            dag.index(key);
        }

        tracing::debug!(
            nodes = dag.graph.len(),
            low_memory = options.low_memory,
            "graph indexed"
        );

        dag
    }

    fn insert_node(&mut self, key: Key, form: Form) {
        self.parents.entry(key.clone()).or_default();
        self.pending_parents.entry(key.clone()).or_default();
        self.graph.insert(key, form);
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.graph.contains_key(key)
    }

    /// Classified form of a node.
    pub fn form(&self, key: &Key) -> Option<&Form> {
        self.graph.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.graph.keys()
    }

    /// True once a result was recorded, even if it has since been released.
    pub fn has_result(&self, key: &Key) -> bool {
        self.results.contains_key(key)
    }

    pub fn get_result(&self, key: &Key) -> Result<&Value, DagError> {
        match self.results.get(key) {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Released) => Err(DagError::Released(key.clone())),
            None => Err(DagError::NoResult(key.clone())),
        }
    }

    pub fn children(&self, key: &Key) -> impl Iterator<Item = &Key> {
        self.children.get(key).into_iter().flat_map(|children| children.keys())
    }

    pub fn parents(&self, key: &Key) -> impl Iterator<Item = &Key> {
        self.parents.get(key).into_iter().flatten()
    }

    pub fn missing(&self, key: &Key) -> impl Iterator<Item = &Key> {
        self.missing.get(key).into_iter().flatten()
    }

    pub fn pending_parents(&self, key: &Key) -> impl Iterator<Item = &Key> {
        self.pending_parents.get(key).into_iter().flatten()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Key> {
        self.targets.iter()
    }

    pub fn is_target(&self, key: &Key) -> bool {
        self.targets.contains(key)
    }

    /// Distance from the node to the closest leaf below it, known once the
    /// node has become ready.
    pub fn depth_of(&self, key: &Key) -> Option<usize> {
        self.depth.get(key).copied()
    }

    /// Shallowest nesting level at which any node refers to `key`.
    pub fn min_ref_depth(&self, key: &Key) -> Option<usize> {
        self.ref_depth.get(key).copied()
    }

    /// Number of nodes still without a result.
    pub fn left_to_compute(&self) -> usize {
        self.graph.len() - self.results.len()
    }

    pub fn unresolved_targets(&self) -> Vec<Key> {
        self.targets
            .iter()
            .filter(|key| !self.has_result(key))
            .cloned()
            .collect()
    }

    pub fn targets_resolved(&self) -> bool {
        self.targets.iter().all(|key| self.has_result(key))
    }

    /// Topologically sorts the graph, reporting a key on a cycle if there is
    /// one. Evaluation itself never looks for cycles: a cyclic graph simply
    /// never becomes ready.
    pub fn check_acyclic(&self) -> Result<(), DagError> {
        let mut graph = petgraph::Graph::<&Key, ()>::new();
        let nodes: HashMap<&Key, NodeIndex> = self
            .graph
            .keys()
            .map(|key| (key, graph.add_node(key)))
            .collect();

        for (parent, children) in &self.children {
            for child in children.keys() {
                if let (Some(&from), Some(&to)) = (nodes.get(child), nodes.get(parent)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        petgraph::algo::toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| DagError::Cycle(graph[cycle.node_id()].clone()))
    }
}

/// Renders the working graph as a Mermaid flowchart, children pointing at the
/// nodes that use them.
impl fmt::Display for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for (index, (key, form)) in self.graph.iter().enumerate() {
            let name = key.to_string().replace('"', "\\\"");
            writeln!(f, "    {index}[\"{name}\\n{}\"]", describe(form))?;

            if self.targets.contains(key) {
                writeln!(f, "    {index} --> Targets")?;
            }
        }

        writeln!(f, "    Targets[Targets]")?;

        for (index, key) in self.graph.keys().enumerate() {
            for child in self.children(key) {
                if let Some(source) = self.graph.get_index_of(child) {
                    writeln!(f, "    {source} --> {index}")?;
                }
            }
        }

        Ok(())
    }
}

pub(crate) fn describe(form: &Form) -> String {
    match form {
        Form::Literal(value) => value.type_name().to_string(),
        Form::Ref(_) => "ref".to_string(),
        Form::Call(func, _) => format!("{}()", func.name()),
        Form::List(items) => format!("list[{}]", items.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Callable;

    fn add() -> Callable {
        Callable::new("add", |args| {
            Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))
        })
    }

    #[test]
    fn test_maps_are_initialized_for_every_node() {
        let dag = Dag::new([
            ("x", Expr::from(1)),
            ("z", Expr::call(&add(), [Expr::from("x"), Expr::from("nope")])),
        ]);

        let x = Key::from("x");
        let z = Key::from("z");

        assert_eq!(dag.len(), 2);
        assert_eq!(dag.children(&z).collect::<Vec<_>>(), vec![&x]);
        assert_eq!(dag.parents(&x).collect::<Vec<_>>(), vec![&z]);
        assert_eq!(dag.pending_parents(&x).collect::<Vec<_>>(), vec![&z]);
        assert_eq!(dag.missing(&z).collect::<Vec<_>>(), vec![&x]);
        assert_eq!(dag.parents(&z).count(), 0);
        assert_eq!(dag.min_ref_depth(&x), Some(1));
        assert!(!dag.contains(&Key::from("nope")));
    }

    #[test]
    fn test_get_result_before_any_result() {
        let dag = Dag::new([("x", Expr::from(1))]);
        let x = Key::from("x");

        assert!(!dag.has_result(&x));
        assert_eq!(dag.get_result(&x), Err(DagError::NoResult(x)));
        assert_eq!(dag.left_to_compute(), 1);
    }

    #[test]
    fn test_check_acyclic() {
        let add = add();
        let fine = Dag::new([
            ("a", Expr::from(1)),
            ("b", Expr::call(&add, [Expr::from("a")])),
        ]);
        assert_eq!(fine.check_acyclic(), Ok(()));

        let cyclic = Dag::new([
            ("a", Expr::call(&add, [Expr::from("b")])),
            ("b", Expr::call(&add, [Expr::from("a")])),
        ]);
        assert!(matches!(cyclic.check_acyclic(), Err(DagError::Cycle(_))));
    }

    #[test]
    fn test_display_renders_mermaid() {
        let mut dag = Dag::new([
            ("x", Expr::from(1)),
            ("z", Expr::call(&add(), [Expr::from("x")])),
        ]);
        dag.set_targets(["z"]).unwrap();

        let text = dag.to_string();
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("1[\"z\\nadd()\"]"));
        assert!(text.contains("1 --> Targets"));
        assert!(text.contains("0 --> 1"));
    }
}
