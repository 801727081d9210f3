use indexmap::{IndexMap, IndexSet};

use super::Dag;
use crate::key::Key;

impl Dag {
    /// Records the dependency edges of `key`. A node is indexed once, the
    /// first time this is called for it.
    pub(super) fn index(&mut self, key: &Key) {
        if self.children.contains_key(key) {
            return;
        }

        let Some(form) = self.graph.get(key) else {
            return;
        };

        let mut children: IndexMap<Key, usize> = IndexMap::new();
        form.visit_refs(0, &mut |child: &Key, depth: usize| {
            children
                .entry(child.clone())
                .and_modify(|seen| *seen = (*seen).min(depth))
                .or_insert(depth);
        });

        let resolved = self.results.contains_key(key);
        let mut missing = IndexSet::new();

        for (child, &depth) in &children {
            self.ref_depth
                .entry(child.clone())
                .and_modify(|seen| *seen = (*seen).min(depth))
                .or_insert(depth);

            if let Some(parents) = self.parents.get_mut(child) {
                parents.insert(key.clone());
            }

            if !resolved && let Some(pending) = self.pending_parents.get_mut(child) {
                pending.insert(key.clone());
            }

            if !self.results.contains_key(child) {
                missing.insert(child.clone());
            }
        }

        self.children.insert(key.clone(), children);
        self.missing.insert(key.clone(), missing);
    }
}

#[cfg(test)]
mod tests {
    use crate::dag::Dag;
    use crate::expr::Expr;
    use crate::key::Key;
    use crate::value::{Callable, Value};

    fn noop() -> Callable {
        Callable::new("noop", |_| Ok(Value::Null))
    }

    #[test]
    fn test_children_keep_shallowest_depth() {
        let noop = noop();
        let dag = Dag::new([
            ("x", Expr::from(1)),
            (
                "y",
                Expr::call(
                    &noop,
                    [Expr::list([Expr::from("x")]), Expr::from("x")],
                ),
            ),
            ("z", Expr::list([Expr::list([Expr::from("x")])])),
        ]);

        let x = Key::from("x");
        let y = Key::from("y");
        let z = Key::from("z");

        assert_eq!(dag.children(&y).collect::<Vec<_>>(), vec![&x]);
        assert_eq!(dag.children[&y][&x], 1);
        assert_eq!(dag.children[&z][&x], 2);
        assert_eq!(dag.min_ref_depth(&x), Some(1));
        assert_eq!(dag.parents(&x).collect::<Vec<_>>(), vec![&y, &z]);
    }

    #[test]
    fn test_chunk_keys_are_references() {
        let noop = noop();
        let dag = Dag::new([
            (Key::chunk("part", [0]), Expr::from(1)),
            (Key::chunk("part", [1]), Expr::from(2)),
            (
                Key::from("all"),
                Expr::call(&noop, [Expr::chunk("part", [0]), Expr::chunk("part", [1])]),
            ),
        ]);

        let all = Key::from("all");
        assert_eq!(
            dag.missing(&all).cloned().collect::<Vec<_>>(),
            vec![Key::chunk("part", [0]), Key::chunk("part", [1])]
        );
    }
}
