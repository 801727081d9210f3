//! Declarative graphs written as JSON.
//!
//! A graph is an object mapping key names to expressions:
//!
//! ```json
//! {
//!     "x": 1,
//!     "y": 2,
//!     "z": { "call": "add", "args": ["x", "y"] },
//!     "all": ["x", "y", "z"]
//! }
//! ```
//!
//! Scalars are atoms and arrays are lists. `{"call": name, "args": [...]}`
//! applies a callable looked up by name in a [`Registry`], and
//! `{"tuple": [...]}` is a plain tuple, which is how a chunk key such as
//! `("part", 0)` is referenced.
//!
//! Chunk keys cannot be object keys, so a graph that declares them is
//! written as an array of entries instead:
//!
//! ```json
//! [
//!     { "key": { "tuple": ["part", 0] }, "expr": 5 },
//!     { "key": { "tuple": ["part", 1] }, "expr": 7 },
//!     { "key": "total", "expr": { "call": "sum", "args": [[
//!         { "tuple": ["part", 0] }, { "tuple": ["part", 1] }
//!     ]] } }
//! ]
//! ```

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value as Json};

use crate::driver::Request;
use crate::error::LoadError;
use crate::expr::Expr;
use crate::key::Key;
use crate::value::{Callable, Value};

/// Callables available to a graph description, by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    callables: HashMap<String, Callable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `add`, `mul`, `sum`, `len` and `list`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(Callable::new("add", |args| fold_numbers(args, 0, |a, b| a + b, |a, b| a + b)))
            .register(Callable::new("mul", |args| fold_numbers(args, 1, |a, b| a * b, |a, b| a * b)))
            .register(Callable::new("sum", |args| match args {
                [Value::List(items)] => fold_numbers(items, 0, |a, b| a + b, |a, b| a + b),
                _ => fold_numbers(args, 0, |a, b| a + b, |a, b| a + b),
            }))
            .register(Callable::new("len", |args| match args {
                [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
                [Value::Str(text)] => Ok(Value::Int(text.chars().count() as i64)),
                [other] => anyhow::bail!("len of a {} value", other.type_name()),
                _ => anyhow::bail!("len takes exactly one argument, got {}", args.len()),
            }))
            .register(Callable::new("list", |args| Ok(Value::List(args.to_vec()))));
        registry
    }

    pub fn register(&mut self, callable: Callable) -> &mut Self {
        self.callables.insert(callable.name().to_string(), callable);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.callables.get(name)
    }
}

/// Integers stay integers until a float shows up.
fn fold_numbers(
    args: &[Value],
    unit: i64,
    ints: fn(i64, i64) -> i64,
    floats: fn(f64, f64) -> f64,
) -> anyhow::Result<Value> {
    let mut acc = Value::Int(unit);

    for arg in args {
        acc = match (&acc, arg) {
            (Value::Int(a), Value::Int(b)) => Value::Int(ints(*a, *b)),
            _ => match (acc.as_float(), arg.as_float()) {
                (Some(a), Some(b)) => Value::Float(floats(a, b)),
                _ => anyhow::bail!("expected a number, got a {} value", arg.type_name()),
            },
        };
    }

    Ok(acc)
}

/// Parses a graph description, either an object keyed by name or an array
/// of `{"key": ..., "expr": ...}` entries.
pub fn parse_graph(text: &str, registry: &Registry) -> Result<Vec<(Key, Expr)>, LoadError> {
    let document: Json = serde_json::from_str(text)?;

    let graph = match &document {
        Json::Object(entries) => entries
            .iter()
            .map(|(name, json)| -> Result<(Key, Expr), LoadError> {
                Ok((Key::from(name.as_str()), to_expr(json, registry, name)?))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Json::Array(entries) => {
            let mut seen = HashSet::new();
            let mut graph = Vec::with_capacity(entries.len());

            for (i, entry) in entries.iter().enumerate() {
                let path = format!("[{i}]");
                let (key, expr) = to_entry(entry, registry, &path)?;
                if !seen.insert(key.clone()) {
                    return Err(malformed(&path, &format!("key '{key}' is declared twice")));
                }
                graph.push((key, expr));
            }

            graph
        }
        _ => return Err(LoadError::NotAGraph),
    };

    tracing::debug!(nodes = graph.len(), "graph description parsed");
    Ok(graph)
}

/// Parses a nested key request: a key name, a `{"tuple": [...]}` chunk key,
/// or an array of requests.
pub fn parse_request(text: &str) -> Result<Request, LoadError> {
    let document: Json = serde_json::from_str(text)?;
    to_request(&document, "$")
}

fn to_entry(json: &Json, registry: &Registry, path: &str) -> Result<(Key, Expr), LoadError> {
    let Json::Object(entry) = json else {
        return Err(malformed(path, "an entry is an object with \"key\" and \"expr\""));
    };

    if entry.keys().any(|field| field != "key" && field != "expr") {
        return Err(malformed(path, "an entry only takes \"key\" and \"expr\""));
    }

    let (Some(key), Some(expr)) = (entry.get("key"), entry.get("expr")) else {
        return Err(malformed(path, "an entry needs both \"key\" and \"expr\""));
    };

    let key = to_key(key, &format!("{path}.key"))?;
    let expr = to_expr(expr, registry, &format!("{path}.expr"))?;
    Ok((key, expr))
}

fn to_key(json: &Json, path: &str) -> Result<Key, LoadError> {
    match json {
        Json::String(name) => Ok(Key::from(name.as_str())),
        Json::Object(object) => match object.get("tuple") {
            Some(Json::Array(items)) if object.len() == 1 => chunk_key(items, path),
            _ => Err(malformed(path, "only {\"tuple\": [...]} objects name keys")),
        },
        _ => Err(malformed(path, "a key is a name or a {\"tuple\": [...]} chunk key")),
    }
}

fn to_expr(json: &Json, registry: &Registry, path: &str) -> Result<Expr, LoadError> {
    Ok(match json {
        Json::Null => Expr::Atom(Value::Null),
        Json::Bool(flag) => Expr::from(*flag),
        Json::Number(number) => Expr::Atom(number_value(number, path)?),
        Json::String(text) => Expr::from(text.as_str()),
        Json::Array(items) => Expr::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_expr(item, registry, &format!("{path}[{i}]")))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(object) => to_compound(object, registry, path)?,
    })
}

fn to_compound(object: &Map<String, Json>, registry: &Registry, path: &str) -> Result<Expr, LoadError> {
    if let Some(name) = object.get("call") {
        let Json::String(name) = name else {
            return Err(malformed(path, "\"call\" must name a callable"));
        };
        let func = registry
            .get(name)
            .ok_or_else(|| LoadError::UnknownCallable(name.clone()))?;

        let args = match object.get("args") {
            None => Vec::new(),
            Some(Json::Array(args)) => args
                .iter()
                .enumerate()
                .map(|(i, arg)| to_expr(arg, registry, &format!("{path}.args[{i}]")))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(malformed(path, "\"args\" must be an array")),
        };

        if object.keys().any(|field| field != "call" && field != "args") {
            return Err(malformed(path, "a call only takes \"call\" and \"args\""));
        }

        return Ok(Expr::call(func, args));
    }

    match (object.get("tuple"), object.len()) {
        (Some(Json::Array(items)), 1) => Ok(Expr::Tuple(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_expr(item, registry, &format!("{path}.tuple[{i}]")))
                .collect::<Result<_, _>>()?,
        )),
        (Some(_), 1) => Err(malformed(path, "\"tuple\" must be an array")),
        _ => Err(malformed(path, "objects must be either a call or a tuple")),
    }
}

fn number_value(number: &serde_json::Number, path: &str) -> Result<Value, LoadError> {
    if let Some(int) = number.as_i64() {
        Ok(Value::Int(int))
    } else if let Some(float) = number.as_f64() {
        Ok(Value::Float(float))
    } else {
        Err(malformed(path, "number out of range"))
    }
}

fn to_request(json: &Json, path: &str) -> Result<Request, LoadError> {
    match json {
        Json::Array(items) => Ok(Request::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_request(item, &format!("{path}[{i}]")))
                .collect::<Result<_, _>>()?,
        )),
        Json::String(_) | Json::Object(_) => to_key(json, path).map(Request::Key),
        _ => Err(malformed(path, "a request is a key or an array of requests")),
    }
}

fn chunk_key(items: &[Json], path: &str) -> Result<Key, LoadError> {
    let Some((Json::String(name), indices)) = items.split_first() else {
        return Err(malformed(path, "a chunk key starts with its name"));
    };

    let indices = indices
        .iter()
        .map(|index| index.as_i64().ok_or_else(|| malformed(path, "chunk indices must be integers")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Key::chunk(name.as_str(), indices))
}

fn malformed(path: &str, reason: &str) -> LoadError {
    LoadError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Dag;
    use crate::expr::Form;

    #[test]
    fn test_parse_graph() {
        let registry = Registry::with_builtins();
        let entries = parse_graph(
            r#"{
                "x": 1,
                "y": 2.5,
                "z": { "call": "add", "args": ["x", "y"] },
                "all": ["x", "y", "z"],
                "label": "not a key"
            }"#,
            &registry,
        )
        .unwrap();

        assert_eq!(entries.len(), 5);

        let dag = Dag::new(entries);
        assert!(matches!(dag.form(&Key::from("z")), Some(Form::Call(func, _)) if func.name() == "add"));
        assert_eq!(
            dag.form(&Key::from("label")),
            Some(&Form::Literal(Value::from("not a key")))
        );
        assert_eq!(dag.children(&Key::from("all")).count(), 3);
    }

    #[test]
    fn test_tuple_references_chunk_key() {
        let registry = Registry::with_builtins();
        let entries = parse_graph(
            r#"{ "total": { "call": "sum", "args": [[{ "tuple": ["part", 0] }, 4]] } }"#,
            &registry,
        )
        .unwrap();

        let (_, expr) = &entries[0];
        let Expr::Tuple(items) = expr else {
            panic!("expected a call");
        };
        assert_eq!(
            items[1],
            Expr::List(vec![Expr::chunk("part", [0]), Expr::from(4)])
        );
    }

    #[test]
    fn test_entries_declare_chunk_keys() {
        let registry = Registry::with_builtins();
        let entries = parse_graph(
            r#"[
                { "key": { "tuple": ["part", 0] }, "expr": 5 },
                { "key": { "tuple": ["part", 1] }, "expr": 7 },
                { "key": "total", "expr": { "call": "sum", "args": [[
                    { "tuple": ["part", 0] }, { "tuple": ["part", 1] }
                ]] } }
            ]"#,
            &registry,
        )
        .unwrap();

        assert_eq!(entries[0].0, Key::chunk("part", [0]));

        let mut dag = Dag::new(entries);
        let total = Key::from("total");
        assert_eq!(
            dag.children(&total).cloned().collect::<Vec<_>>(),
            vec![Key::chunk("part", [0]), Key::chunk("part", [1])]
        );

        let ready = dag.set_targets([total.clone()]).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].run().unwrap(), Value::Int(12));

        let request = parse_request(r#"[{ "tuple": ["part", 1] }]"#).unwrap();
        assert!(request.keys().iter().all(|key| dag.contains(key)));
    }

    #[test]
    fn test_errors() {
        let registry = Registry::with_builtins();

        assert!(matches!(parse_graph("3", &registry), Err(LoadError::NotAGraph)));
        assert!(matches!(
            parse_graph("[1, 2]", &registry),
            Err(LoadError::Malformed { path, .. }) if path == "[0]"
        ));
        assert!(matches!(
            parse_graph(r#"[{ "key": "a", "expr": 1 }, { "key": "a", "expr": 2 }]"#, &registry),
            Err(LoadError::Malformed { path, .. }) if path == "[1]"
        ));
        assert!(matches!(
            parse_graph(r#"[{ "key": { "tuple": [0, "part"] }, "expr": 1 }]"#, &registry),
            Err(LoadError::Malformed { path, .. }) if path == "[0].key"
        ));
        assert!(matches!(parse_graph("{", &registry), Err(LoadError::Parse(_))));
        assert!(matches!(
            parse_graph(r#"{ "a": { "call": "nope" } }"#, &registry),
            Err(LoadError::UnknownCallable(name)) if name == "nope"
        ));
        assert!(matches!(
            parse_graph(r#"{ "a": { "call": "add", "args": [{ "what": 1 }] } }"#, &registry),
            Err(LoadError::Malformed { path, .. }) if path == "a.args[0]"
        ));
    }

    #[test]
    fn test_parse_request() {
        let request = parse_request(r#"["a", ["b", { "tuple": ["c", 1, 2] }]]"#).unwrap();

        assert_eq!(
            request.keys(),
            vec![Key::from("a"), Key::from("b"), Key::chunk("c", [1, 2])]
        );
        assert!(parse_request("3").is_err());
    }

    #[test]
    fn test_builtins() {
        let registry = Registry::with_builtins();
        let call = |name: &str, args: &[Value]| registry.get(name).unwrap().call(args);

        assert_eq!(call("add", &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert_eq!(call("add", &[Value::Int(1), Value::Float(0.5)]).unwrap(), Value::Float(1.5));
        assert_eq!(call("mul", &[Value::Int(3), Value::Int(4)]).unwrap(), Value::Int(12));
        assert_eq!(call("sum", &[Value::from(vec![1, 2, 3])]).unwrap(), Value::Int(6));
        assert_eq!(call("len", &[Value::from("abc")]).unwrap(), Value::Int(3));
        assert_eq!(
            call("list", &[Value::Int(1), Value::Null]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Null])
        );
        assert!(call("add", &[Value::from("x")]).is_err());
        assert!(call("len", &[]).is_err());
    }
}
