use crate::core::Hash32;
use crate::expr::Form;
use crate::key::Key;

use super::Dag;

impl Dag {
    /// Rewrites every node so that its arguments are literals or references.
    ///
    /// Each nested call or list becomes a node of its own, keyed by the digest
    /// of its form. Identical sub-expressions share one node.
    pub(super) fn flatten_all(&mut self) {
        let keys: Vec<Key> = self.graph.keys().cloned().collect();
        for key in &keys {
            self.flatten_node(key);
        }
    }

    fn flatten_node(&mut self, key: &Key) {
        let Some(form) = self.graph.get(key).filter(|form| form.is_nested()).cloned() else {
            return;
        };

        let flat = match form {
            Form::Call(func, args) => {
                Form::Call(func, args.into_iter().map(|arg| self.hoist(arg)).collect())
            }
            Form::List(items) => Form::List(items.into_iter().map(|item| self.hoist(item)).collect()),
            other => other,
        };

        self.graph.insert(key.clone(), flat);
    }

    fn hoist(&mut self, form: Form) -> Form {
        match form {
            Form::Call(..) | Form::List(_) => {
                let key = Key::Derived(Hash32::of(&form));

                if !self.graph.contains_key(&key) {
                    self.insert_node(key.clone(), form);
                    self.flatten_node(&key);
                }

                Form::Ref(key)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dag::{Dag, DagOptions};
    use crate::expr::{Expr, Form};
    use crate::key::Key;
    use crate::value::{Callable, Value};

    fn add() -> Callable {
        Callable::new("add", |args| {
            Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))
        })
    }

    fn low_memory() -> DagOptions {
        DagOptions { low_memory: true }
    }

    #[test]
    fn test_nested_arguments_become_references() {
        let add = add();
        let dag = Dag::with_options(
            [
                ("x", Expr::from(1)),
                (
                    "z",
                    Expr::call(&add, [Expr::from("x"), Expr::call(&add, [Expr::from(2), Expr::from(3)])]),
                ),
            ],
            low_memory(),
        );

        assert_eq!(dag.len(), 3);

        let Some(Form::Call(_, args)) = dag.form(&Key::from("z")) else {
            panic!("z should stay a call");
        };
        assert_eq!(args[0], Form::Ref(Key::from("x")));
        let Form::Ref(derived) = &args[1] else {
            panic!("nested call should be hoisted");
        };
        assert!(derived.is_derived());
        assert_eq!(dag.children(&Key::from("z")).count(), 2);
        assert_eq!(dag.parents(derived).collect::<Vec<_>>(), vec![&Key::from("z")]);
    }

    #[test]
    fn test_shared_subexpressions_are_one_node() {
        let add = add();
        let inner = Expr::call(&add, [Expr::from("x"), Expr::from(1)]);
        let dag = Dag::with_options(
            [
                ("x", Expr::from(1)),
                ("a", Expr::call(&add, [inner.clone(), Expr::from(0)])),
                ("b", Expr::list([inner, Expr::from(5)])),
            ],
            low_memory(),
        );

        assert_eq!(dag.len(), 4);
        let derived: Vec<&Key> = dag.keys().filter(|key| key.is_derived()).collect();
        assert_eq!(derived.len(), 1);
        assert_eq!(dag.parents(derived[0]).count(), 2);
    }

    #[test]
    fn test_shallow_forms_are_untouched() {
        let add = add();
        let dag = Dag::with_options(
            [
                ("x", Expr::from(1)),
                ("z", Expr::call(&add, [Expr::from("x"), Expr::from(2)])),
            ],
            low_memory(),
        );

        assert_eq!(dag.len(), 2);
    }
}
