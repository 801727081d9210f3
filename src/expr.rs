//! Expressions as supplied by the caller and their classified forms.
//!
//! A graph arrives as a map from [`Key`] to raw [`Expr`]. Before anything is
//! indexed every expression is classified into a [`Form`], which tells the
//! evaluator how to treat it:
//!
//! * [`Form::Ref`] - a value naming another node of the graph,
//! * [`Form::Call`] - a tuple whose first element is a callable,
//! * [`Form::List`] - any other sequence, resolved element by element,
//! * [`Form::Literal`] - everything else.
//!
//! Once every reference of a ready node has a result, its form is turned into
//! a [`Thunk`]: the same tree with every reference replaced by the stored
//! value, which is what gets shipped to a runtime.

use anyhow::Context;

use crate::key::Key;
use crate::value::{Callable, Value};

/// Raw expression, before classification.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Atom(Value),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
}

impl Expr {
    /// `(func, args...)`
    pub fn call(func: &Callable, args: impl IntoIterator<Item = Expr>) -> Self {
        let mut items = vec![Expr::Atom(Value::Func(func.clone()))];
        items.extend(args);
        Expr::Tuple(items)
    }

    pub fn list(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::List(items.into_iter().collect())
    }

    /// A reference to a chunk key, `(name, indices...)`.
    pub fn chunk(name: &str, indices: impl IntoIterator<Item = i64>) -> Self {
        let mut items = vec![Expr::Atom(Value::from(name))];
        items.extend(indices.into_iter().map(|index| Expr::Atom(Value::Int(index))));
        Expr::Tuple(items)
    }

    /// Whether this is a tuple headed by a callable.
    pub fn is_call(&self) -> bool {
        match self {
            Expr::Tuple(items) => matches!(items.first(), Some(Expr::Atom(Value::Func(_)))),
            _ => false,
        }
    }

    /// Whether this is a sequence that is not a call.
    pub fn is_list_like(&self) -> bool {
        matches!(self, Expr::Tuple(_) | Expr::List(_)) && !self.is_call()
    }

    /// The key this expression would name, if it has the shape of a key.
    ///
    /// Only strings and `(string, int, ...)` tuples can be keys. Anything
    /// else, including every call, yields `None`.
    pub fn as_key(&self) -> Option<Key> {
        match self {
            Expr::Atom(Value::Str(name)) => Some(Key::Name(name.clone())),
            Expr::Tuple(items) if items.len() > 1 => {
                let (head, rest) = items.split_first()?;
                let Expr::Atom(Value::Str(name)) = head else {
                    return None;
                };

                let indices = rest
                    .iter()
                    .map(|item| match item {
                        Expr::Atom(Value::Int(index)) => Some(*index),
                        _ => None,
                    })
                    .collect::<Option<Box<[i64]>>>()?;

                Some(Key::Chunk(name.clone(), indices))
            }
            _ => None,
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Atom(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Atom(Value::Int(value))
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Atom(Value::from(value))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Atom(Value::Float(value))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Atom(Value::Bool(value))
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Atom(Value::from(value))
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(value: Vec<Expr>) -> Self {
        Expr::List(value)
    }
}

/// Classified node value.
#[derive(Clone, Debug, PartialEq, Hash)]
pub enum Form {
    Literal(Value),
    Ref(Key),
    Call(Callable, Vec<Form>),
    List(Vec<Form>),
}

impl Form {
    /// Classifies `expr`, promoting key-shaped values to references when
    /// `contains` reports the key as part of the working graph.
    ///
    /// The check order is: key reference, call, list, literal. A key-shaped
    /// value naming no node falls through to the remaining rules, so a
    /// missing `"x"` is the literal string and a missing `("x", 0)` is a
    /// two element list.
    pub fn classify(expr: &Expr, contains: &impl Fn(&Key) -> bool) -> Self {
        if let Some(key) = expr.as_key()
            && contains(&key)
        {
            return Form::Ref(key);
        }

        match expr {
            Expr::Tuple(items) => match items.split_first() {
                Some((Expr::Atom(Value::Func(func)), args)) => Form::Call(
                    func.clone(),
                    args.iter().map(|arg| Form::classify(arg, contains)).collect(),
                ),
                _ => Form::List(items.iter().map(|item| Form::classify(item, contains)).collect()),
            },
            Expr::List(items) => {
                Form::List(items.iter().map(|item| Form::classify(item, contains)).collect())
            }
            Expr::Atom(value) => Form::Literal(value.clone()),
        }
    }

    /// A form without calls anywhere can be resolved by substitution alone.
    pub fn is_inert(&self) -> bool {
        match self {
            Form::Literal(_) | Form::Ref(_) => true,
            Form::Call(..) => false,
            Form::List(items) => items.iter().all(Form::is_inert),
        }
    }

    /// Whether the form nests anything besides literals and references.
    pub(crate) fn is_nested(&self) -> bool {
        match self {
            Form::Literal(_) | Form::Ref(_) => false,
            Form::Call(_, items) | Form::List(items) => items
                .iter()
                .any(|item| matches!(item, Form::Call(..) | Form::List(_))),
        }
    }

    /// Visits every reference in the form together with the nesting depth it
    /// was found at; a bare reference sits at depth 0.
    pub(crate) fn visit_refs(&self, depth: usize, visit: &mut impl FnMut(&Key, usize)) {
        match self {
            Form::Literal(_) => {}
            Form::Ref(key) => visit(key, depth),
            Form::Call(_, items) | Form::List(items) => {
                for item in items {
                    item.visit_refs(depth + 1, visit);
                }
            }
        }
    }

    /// Replaces every reference with the value `resolve` returns for it.
    pub(crate) fn substitute<E>(
        &self,
        resolve: &mut impl FnMut(&Key) -> Result<Value, E>,
    ) -> Result<Thunk, E> {
        Ok(match self {
            Form::Literal(value) => Thunk::Value(value.clone()),
            Form::Ref(key) => Thunk::Value(resolve(key)?),
            Form::Call(func, args) => Thunk::Call(
                func.clone(),
                args.iter()
                    .map(|arg| arg.substitute(resolve))
                    .collect::<Result<_, _>>()?,
            ),
            Form::List(items) => Thunk::List(
                items
                    .iter()
                    .map(|item| item.substitute(resolve))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// A form whose references have all been replaced by values.
#[derive(Clone, Debug, PartialEq)]
pub enum Thunk {
    Value(Value),
    Call(Callable, Vec<Thunk>),
    List(Vec<Thunk>),
}

impl Thunk {
    /// Evaluates the tree bottom-up, applying every callable to its already
    /// evaluated arguments.
    pub fn eval(&self) -> anyhow::Result<Value> {
        match self {
            Thunk::Value(value) => Ok(value.clone()),
            Thunk::Call(func, args) => {
                let args = args.iter().map(Thunk::eval).collect::<anyhow::Result<Vec<_>>>()?;
                func.call(&args)
                    .with_context(|| format!("calling '{}'", func.name()))
            }
            Thunk::List(items) => Ok(Value::List(
                items.iter().map(Thunk::eval).collect::<anyhow::Result<_>>()?,
            )),
        }
    }

    /// The outermost callable, if the thunk is a call.
    pub fn callable(&self) -> Option<&Callable> {
        match self {
            Thunk::Call(func, _) => Some(func),
            _ => None,
        }
    }

    /// Whether the thunk contains no calls.
    pub fn is_inert(&self) -> bool {
        match self {
            Thunk::Value(_) => true,
            Thunk::Call(..) => false,
            Thunk::List(items) => items.iter().all(Thunk::is_inert),
        }
    }

    /// Value of a thunk without calls; a thunk with calls is handed back.
    pub(crate) fn into_inert(self) -> Result<Value, Thunk> {
        match self {
            Thunk::Value(value) => Ok(value),
            Thunk::List(items) if items.iter().all(Thunk::is_inert) => Ok(Value::List(
                items
                    .into_iter()
                    .filter_map(|item| item.into_inert().ok())
                    .collect(),
            )),
            other => Err(other),
        }
    }
}
