use indexmap::IndexSet;

use crate::error::DagError;
use crate::expr::Form;
use crate::key::Key;

use super::{Dag, Task};

impl Dag {
    /// Marks `keys` as wanted and returns everything that is ready to run.
    ///
    /// A target whose form is a reference or a list also makes targets of
    /// the keys it reaches through references and nested lists. Call
    /// arguments are not followed. Unknown keys are rejected before anything
    /// is marked.
    pub fn set_targets<I>(&mut self, keys: I) -> Result<Vec<Task>, DagError>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();

        if let Some(unknown) = keys.iter().find(|key| !self.graph.contains_key(*key)) {
            return Err(DagError::UnknownKey(unknown.clone()));
        }

        for key in keys {
            if self.targets.insert(key.clone()) {
                self.expand_target(&key);
            }
        }

        tracing::debug!(targets = self.targets.len(), "targets set");
        self.get_ready()
    }

    /// Targets together with every key they transitively depend on.
    pub fn required(&self) -> IndexSet<Key> {
        let mut required = IndexSet::new();
        let mut stack: Vec<&Key> = self.targets.iter().collect();

        while let Some(key) = stack.pop() {
            if required.insert(key.clone()) {
                stack.extend(self.children(key));
            }
        }

        required
    }

    fn expand_target(&mut self, key: &Key) {
        let mut reached = Vec::new();
        if let Some(form) = self.graph.get(key) {
            collect_list_refs(form, &mut reached);
        }

        for child in reached {
            if self.targets.insert(child.clone()) {
                self.expand_target(&child);
            }
        }
    }
}

fn collect_list_refs(form: &Form, reached: &mut Vec<Key>) {
    match form {
        Form::Ref(key) => reached.push(key.clone()),
        Form::List(items) => {
            for item in items {
                collect_list_refs(item, reached);
            }
        }
        Form::Literal(_) | Form::Call(..) => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::dag::Dag;
    use crate::error::DagError;
    use crate::expr::Expr;
    use crate::key::Key;
    use crate::value::{Callable, Value};

    #[test]
    fn test_list_targets_expand_recursively() {
        let noop = Callable::new("noop", |_| Ok(Value::Null));
        let mut dag = Dag::new([
            ("a", Expr::from(1)),
            ("b", Expr::call(&noop, [Expr::from("a")])),
            ("c", Expr::from("b")),
            ("d", Expr::list([Expr::from("c"), Expr::list([Expr::from("a")])])),
            ("e", Expr::call(&noop, [Expr::from("d")])),
        ]);

        dag.set_targets(["d"]).unwrap();

        let targets: Vec<&Key> = dag.targets().collect();
        assert_eq!(
            targets,
            vec![&Key::from("d"), &Key::from("c"), &Key::from("b"), &Key::from("a")]
        );
        assert!(!dag.is_target(&Key::from("e")));
    }

    #[test]
    fn test_call_targets_do_not_expand() {
        let noop = Callable::new("noop", |_| Ok(Value::Null));
        let mut dag = Dag::new([
            ("a", Expr::from(1)),
            ("b", Expr::call(&noop, [Expr::list([Expr::from("a")])])),
        ]);

        dag.set_targets(["b"]).unwrap();
        assert_eq!(dag.targets().count(), 1);
    }

    #[test]
    fn test_required_follows_call_arguments() {
        let noop = Callable::new("noop", |_| Ok(Value::Null));
        let mut dag = Dag::new([
            ("a", Expr::from(1)),
            ("b", Expr::call(&noop, [Expr::list([Expr::from("a")])])),
            ("c", Expr::call(&noop, [Expr::from("b")])),
            ("unrelated", Expr::call(&noop, [Expr::from("a")])),
        ]);

        dag.set_targets(["c"]).unwrap();

        let required = dag.required();
        assert_eq!(required.len(), 3);
        assert!(required.contains(&Key::from("a")));
        assert!(required.contains(&Key::from("b")));
        assert!(!required.contains(&Key::from("unrelated")));
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let mut dag = Dag::new([("a", Expr::from(1))]);

        assert_eq!(
            dag.set_targets(["a", "nope"]).unwrap_err(),
            DagError::UnknownKey(Key::from("nope"))
        );
        assert_eq!(dag.targets().count(), 0);
    }
}
