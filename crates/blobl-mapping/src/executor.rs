//! Execution plans
//!
//! An [`Executor`] is the parsed form of a mapping: an ordered list of
//! [`Statement`]s plus the named [`MapBlock`]s defined anywhere in the source.
//! It is never mutated after parsing, so one plan can serve any number of
//! concurrent runs as long as each run gets its own [`Message`].

use crate::assignment::{Assignment, AssignmentContext};
use crate::grammar::{parse_executor, ParseConfig};
use crate::query::{Function, FunctionContext, Vars};
use crate::{Error, Result};
use blobl_ir::{Message, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Named maps of a plan, keyed by map name.
pub type Maps = HashMap<String, MapBlock>;

/// One line of a mapping: an expression and where its result goes.
#[derive(Debug, Clone)]
pub struct Statement {
    line: usize,
    assignment: Assignment,
    query: Arc<dyn Function>,
}

impl Statement {
    /// Create a statement starting at a source line (1-indexed)
    #[must_use]
    pub fn new(line: usize, assignment: Assignment, query: Arc<dyn Function>) -> Self {
        Self {
            line,
            assignment,
            query,
        }
    }

    /// Source line the statement starts on
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    /// Target of the statement
    #[must_use]
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Expression of the statement
    #[must_use]
    pub fn query(&self) -> &Arc<dyn Function> {
        &self.query
    }
}

/// A named sub-mapping declared with `map <name> { ... }`.
#[derive(Debug, Clone)]
pub struct MapBlock {
    name: String,
    statements: Vec<Statement>,
}

impl MapBlock {
    /// Create a map block
    #[must_use]
    pub fn new(name: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            name: name.into(),
            statements,
        }
    }

    /// Name the block was declared with
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statements of the block
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Run the block within a caller's context.
    ///
    /// Returns the document built by the block, or `None` when no path
    /// assignment fired.
    pub fn exec(&self, ctx: &mut FunctionContext<'_>) -> Result<Option<Value>> {
        run_statements(&self.statements, ctx)
    }
}

/// A parsed mapping.
#[derive(Debug, Clone)]
pub struct Executor {
    maps: Arc<Maps>,
    statements: Vec<Statement>,
}

impl Executor {
    /// Assemble a plan from already parsed parts
    #[must_use]
    pub fn new(maps: Maps, statements: Vec<Statement>) -> Self {
        Self {
            maps: Arc::new(maps),
            statements,
        }
    }

    /// Parse a mapping with the default configuration.
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with(source, &ParseConfig::default())
    }

    /// Parse a mapping.
    pub fn parse_with(source: &str, config: &ParseConfig) -> Result<Self> {
        Ok(parse_executor(source, config)?)
    }

    /// Top-level statements in source order
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Named maps declared anywhere in the mapping
    #[must_use]
    pub fn maps(&self) -> &Maps {
        &self.maps
    }

    /// Declared map names, sorted
    #[must_use]
    pub fn map_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.maps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the mapping against one part of a batch.
    ///
    /// The part's document is read up front; if it is not valid JSON the run
    /// still proceeds and only expressions referencing `this` fail. When a
    /// path assignment fired the built document replaces the part content,
    /// otherwise the content is left as it was. Metadata written by earlier
    /// statements is kept even if a later statement fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds, a statement fails, or
    /// the result cannot be written back.
    pub fn map_part(&self, index: usize, msg: &mut Message) -> Result<()> {
        let document = match msg.get(index)?.json() {
            Ok(document) => Some(document),
            Err(err) => {
                debug!(index, error = %err, "message part is not a JSON document");
                None
            }
        };

        let mut vars = Vars::new();
        let output = {
            let mut ctx = FunctionContext {
                maps: &self.maps,
                value: document.as_ref(),
                vars: &mut vars,
                index,
                msg: &mut *msg,
                depth: 0,
            };
            run_statements(&self.statements, &mut ctx)?
        };

        match output {
            Some(value) => {
                debug!(index, "committing mapping result");
                msg.write(index, &value).map_err(Error::Commit)
            }
            None => {
                debug!(index, "mapping assigned no document; content left untouched");
                Ok(())
            }
        }
    }

    /// Run the mapping inside a caller's context.
    ///
    /// The context is used as given: variables, the input document, the
    /// message and the named maps all come from the caller, so `apply` inside
    /// this plan resolves against the caller's maps. The output document is
    /// not committed anywhere.
    pub fn exec(&self, ctx: &mut FunctionContext<'_>) -> Result<Option<Value>> {
        run_statements(&self.statements, ctx)
    }

    /// Run the mapping and serialize its result.
    ///
    /// A recoverable failure yields its best-effort value; any other failure
    /// yields empty output.
    pub fn to_bytes(&self, ctx: &mut FunctionContext<'_>) -> Vec<u8> {
        self.exec_lossy(ctx)
            .map(|value| blobl_ir::to_bytes(&value))
            .unwrap_or_default()
    }

    /// Run the mapping and render its result as text, following the same
    /// rules as [`Executor::to_bytes`].
    pub fn to_text(&self, ctx: &mut FunctionContext<'_>) -> String {
        self.exec_lossy(ctx)
            .map(|value| blobl_ir::to_text(&value))
            .unwrap_or_default()
    }

    fn exec_lossy(&self, ctx: &mut FunctionContext<'_>) -> Option<Value> {
        match self.exec(ctx) {
            Ok(output) => Some(output.unwrap_or(Value::Null)),
            Err(err) => {
                if let Some(recovered) = err.recovered() {
                    return Some(recovered.clone());
                }
                debug!(error = %err, "discarding failed mapping result");
                None
            }
        }
    }
}

/// Run statements in order, stopping at the first failure.
fn run_statements(statements: &[Statement], ctx: &mut FunctionContext<'_>) -> Result<Option<Value>> {
    let mut output = None;
    for statement in statements {
        let line = statement.line;
        trace!(line, assignment = ?statement.assignment, "executing statement");

        let value = statement
            .query
            .exec(ctx)
            .map_err(|source| Error::Query { line, source })?;

        let part = ctx.msg.get_mut(ctx.index)?;
        let mut targets = AssignmentContext {
            vars: &mut *ctx.vars,
            meta: part.metadata_mut(),
            value: &mut output,
        };
        statement
            .assignment
            .apply(value, &mut targets)
            .map_err(|source| Error::Assignment { line, source })?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryError;
    use blobl_ir::Part;
    use serde_json::json;
    use std::thread;

    fn content(msg: &Message, index: usize) -> String {
        String::from_utf8(msg.get(index).unwrap().content().to_vec()).unwrap()
    }

    /// Yields a recoverable failure carrying a fixed value.
    #[derive(Debug)]
    struct Partial(Value);

    impl Function for Partial {
        fn exec(&self, _ctx: &mut FunctionContext<'_>) -> std::result::Result<Value, QueryError> {
            Err(QueryError::Recoverable {
                recovered: self.0.clone(),
                source: Box::new(QueryError::Thrown("partial result".into())),
            })
        }
    }

    fn run_nested(exec: &Executor, msg: &mut Message) -> (Vec<u8>, String) {
        let document = msg.read(0).ok();
        let mut vars = Vars::new();
        let maps = Maps::new();
        let mut ctx = FunctionContext {
            maps: &maps,
            value: document.as_ref(),
            vars: &mut vars,
            index: 0,
            msg,
            depth: 0,
        };
        (exec.to_bytes(&mut ctx), exec.to_text(&mut ctx))
    }

    #[test]
    fn test_plan_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Executor>();
    }

    #[test]
    fn test_path_assignment_reads_original_document() {
        let exec = Executor::parse("root.b = this.a").unwrap();
        let mut msg = Message::from_contents([r#"{"a":1}"#]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(msg.read(0).unwrap(), json!({"b": 1}));
    }

    #[test]
    fn test_reads_ignore_staged_writes() {
        let exec = Executor::parse("a = 10\nb = this.a").unwrap();
        let mut msg = Message::from_contents([r#"{"a":1}"#]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(msg.read(0).unwrap(), json!({"a": 10, "b": 1}));
    }

    #[test]
    fn test_variable_only_mapping_leaves_content_untouched() {
        let exec = Executor::parse("let x = 5\nlet y = var(\"x\")").unwrap();
        let raw = r#"{ "untouched" : [1, 2] }"#;
        let mut msg = Message::from_contents([raw]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(content(&msg, 0), raw);
    }

    #[test]
    fn test_metadata_only_mapping_leaves_content_untouched() {
        let exec = Executor::parse(r#"meta "foo" = "bar""#).unwrap();
        let mut msg = Message::from_contents(["not even json"]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(content(&msg, 0), "not even json");
        assert_eq!(msg.get(0).unwrap().metadata().get("foo"), Some("bar"));
    }

    #[test]
    fn test_variables_flow_between_statements() {
        let exec = Executor::parse("let x = this.a\nout = var(\"x\")").unwrap();
        let mut msg = Message::from_contents([r#"{"a":"hello"}"#]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(msg.read(0).unwrap(), json!({"out": "hello"}));
    }

    #[test]
    fn test_failure_keeps_earlier_side_effects() {
        let exec = Executor::parse("meta a = \"1\"\nroot.x = 1\nroot.y = throw(\"boom\")\nmeta b = \"2\"").unwrap();
        let raw = r#"{"orig":true}"#;
        let mut msg = Message::from_contents([raw]);
        let err = exec.map_part(0, &mut msg).unwrap_err();

        assert!(matches!(err, Error::Query { line: 3, .. }));
        assert_eq!(
            err.to_string(),
            "failed to execute mapping assignment at line 3: boom"
        );
        let part = msg.get(0).unwrap();
        assert_eq!(part.metadata().get("a"), Some("1"));
        assert_eq!(part.metadata().get("b"), None);
        assert_eq!(content(&msg, 0), raw);
    }

    #[test]
    fn test_unreadable_document_fails_lazily() {
        let mut msg = Message::from_contents(["plain text"]);
        let exec = Executor::parse("meta seen = content()\nroot = this").unwrap();
        let err = exec.map_part(0, &mut msg).unwrap_err();

        assert!(matches!(
            err,
            Error::Query {
                line: 2,
                source: QueryError::NoDocument
            }
        ));
        assert_eq!(msg.get(0).unwrap().metadata().get("seen"), Some("plain text"));
    }

    #[test]
    fn test_assignment_failure_is_line_tagged() {
        let exec = Executor::parse("let x = 1\nmeta = 5").unwrap();
        let mut msg = Message::from_contents(["{}"]);
        let err = exec.map_part(0, &mut msg).unwrap_err();

        assert!(matches!(err, Error::Assignment { line: 2, .. }));
        assert!(err.to_string().starts_with("failed to assign mapping result at line 2: "));
    }

    #[test]
    fn test_out_of_bounds_part() {
        let exec = Executor::parse("root = 1").unwrap();
        let mut msg = Message::from_contents(["{}"]);
        let err = exec.map_part(3, &mut msg).unwrap_err();

        assert!(matches!(
            err,
            Error::Message(blobl_ir::Error::PartNotFound { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_named_maps_apply_to_same_context() {
        let exec = Executor::parse(
            "map thing {\n  name = this.user.name\n  tier = \"gold\"\n}\nroot.customer = apply(\"thing\")\nroot.id = this.id",
        )
        .unwrap();
        let mut msg = Message::from_contents([r#"{"id":7,"user":{"name":"ana"}}"#]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(
            msg.read(0).unwrap(),
            json!({"customer": {"name": "ana", "tier": "gold"}, "id": 7})
        );
    }

    #[test]
    fn test_map_without_path_assignment_yields_null() {
        let exec = Executor::parse("map noop {\n  let x = 1\n}\nroot.v = apply(\"noop\")").unwrap();
        let mut msg = Message::from_contents(["{}"]);
        exec.map_part(0, &mut msg).unwrap();

        assert_eq!(msg.read(0).unwrap(), json!({"v": null}));
    }

    #[test]
    fn test_nested_exec_shares_variables() {
        let exec = Executor::parse("let seen = true\nroot.x = this.a").unwrap();
        let document = json!({"a": 3});
        let mut msg = Message::from_contents(["{}"]);
        let mut vars = Vars::new();
        let maps = Maps::new();
        let mut ctx = FunctionContext {
            maps: &maps,
            value: Some(&document),
            vars: &mut vars,
            index: 0,
            msg: &mut msg,
            depth: 0,
        };
        let output = exec.exec(&mut ctx).unwrap();

        assert_eq!(output, Some(json!({"x": 3})));
        assert_eq!(vars.get("seen"), Some(&json!(true)));
        assert_eq!(content(&msg, 0), "{}");
    }

    #[test]
    fn test_nested_exec_applies_caller_maps() {
        let caller = Executor::parse("map greet {\n  hello = this.who\n}\nroot = 1").unwrap();
        let exec = Executor::parse("root.greeting = apply(\"greet\")").unwrap();
        assert!(exec.maps().is_empty());

        let document = json!({"who": "world"});
        let mut msg = Message::from_contents(["{}"]);
        let mut vars = Vars::new();
        let mut ctx = FunctionContext {
            maps: caller.maps(),
            value: Some(&document),
            vars: &mut vars,
            index: 0,
            msg: &mut msg,
            depth: 0,
        };

        let output = exec.exec(&mut ctx).unwrap();
        assert_eq!(output, Some(json!({"greeting": {"hello": "world"}})));
    }

    fn recursion_limit(err: &Error) -> Option<&str> {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(current) = source {
            if let Some(QueryError::RecursionLimit { name }) = current.downcast_ref::<QueryError>() {
                return Some(name);
            }
            source = current.source();
        }
        None
    }

    #[test]
    fn test_self_applying_map_hits_depth_limit() {
        let exec = Executor::parse("map a {\n  x = apply(\"a\")\n}\nroot = apply(\"a\")").unwrap();
        let raw = r#"{"keep":true}"#;
        let mut msg = Message::from_contents([raw]);
        let err = exec.map_part(0, &mut msg).unwrap_err();

        assert!(matches!(err, Error::Query { line: 4, .. }));
        assert_eq!(recursion_limit(&err), Some("a"));
        assert!(err
            .to_string()
            .ends_with("map 'a' exceeded the maximum apply depth of 64"));
        assert_eq!(content(&msg, 0), raw);
    }

    #[test]
    fn test_mutually_applying_maps_hit_depth_limit() {
        let exec = Executor::parse(
            "map a {\n  x = apply(\"b\")\n}\nmap b {\n  y = apply(\"a\")\n}\nroot = apply(\"a\")",
        )
        .unwrap();
        let mut msg = Message::from_contents(["{}"]);
        let err = exec.map_part(0, &mut msg).unwrap_err();

        assert!(matches!(err, Error::Query { line: 7, .. }));
        assert!(matches!(recursion_limit(&err), Some("a" | "b")));
        assert_eq!(content(&msg, 0), "{}");

        let exec = Executor::parse("map a {\n  x = 1\n}\nroot.one = apply(\"a\")\nroot.two = apply(\"a\")").unwrap();
        exec.map_part(0, &mut msg).unwrap();
        assert_eq!(msg.read(0).unwrap(), json!({"one": {"x": 1}, "two": {"x": 1}}));
    }

    #[test]
    fn test_to_bytes_and_text() {
        let exec = Executor::parse("root = this.name").unwrap();
        let mut msg = Message::from_contents([r#"{"name":"blob"}"#]);
        let (bytes, text) = run_nested(&exec, &mut msg);
        assert_eq!(bytes, b"blob");
        assert_eq!(text, "blob");

        let exec = Executor::parse("let x = 1").unwrap();
        let (bytes, text) = run_nested(&exec, &mut msg);
        assert_eq!(bytes, b"null");
        assert_eq!(text, "null");
    }

    #[test]
    fn test_to_bytes_swallows_failures() {
        let exec = Executor::parse("root = throw(\"boom\")").unwrap();
        let mut msg = Message::from_contents(["{}"]);
        let (bytes, text) = run_nested(&exec, &mut msg);

        assert!(bytes.is_empty());
        assert!(text.is_empty());
    }

    #[test]
    fn test_to_bytes_uses_recovered_value() {
        let exec = Executor::new(
            Maps::new(),
            vec![Statement::new(
                1,
                Assignment::Path { path: vec![] },
                Arc::new(Partial(json!({"partial": true}))),
            )],
        );
        let mut msg = Message::from_contents(["{}"]);
        let (bytes, text) = run_nested(&exec, &mut msg);

        assert_eq!(bytes, br#"{"partial":true}"#);
        assert_eq!(text, r#"{"partial":true}"#);
    }

    #[test]
    fn test_recoverable_failure_still_fails_map_part() {
        let exec = Executor::new(
            Maps::new(),
            vec![Statement::new(
                1,
                Assignment::Path { path: vec![] },
                Arc::new(Partial(json!(1))),
            )],
        );
        let mut msg = Message::from_contents(["{}"]);
        let err = exec.map_part(0, &mut msg).unwrap_err();

        assert_eq!(err.recovered(), Some(&json!(1)));
        assert_eq!(content(&msg, 0), "{}");
    }

    #[test]
    fn test_concurrent_runs_are_isolated() {
        let exec = Executor::parse(
            "let mine = this.id\nroot.id = var(\"mine\")\nmeta owner = var(\"mine\")",
        )
        .unwrap();

        let mut first = Message::from_parts(vec![Part::new(r#"{"id":"first"}"#)]);
        let mut second = Message::from_parts(vec![Part::new(r#"{"id":"second"}"#)]);

        thread::scope(|s| {
            let exec = &exec;
            let a = s.spawn(|| {
                for _ in 0..100 {
                    exec.map_part(0, &mut first).unwrap();
                }
            });
            let b = s.spawn(|| {
                for _ in 0..100 {
                    exec.map_part(0, &mut second).unwrap();
                }
            });
            a.join().unwrap();
            b.join().unwrap();
        });

        assert_eq!(first.read(0).unwrap(), json!({"id": "first"}));
        assert_eq!(second.read(0).unwrap(), json!({"id": "second"}));
        assert_eq!(first.get(0).unwrap().metadata().get("owner"), Some("first"));
        assert_eq!(second.get(0).unwrap().metadata().get("owner"), Some("second"));
    }

    #[test]
    fn test_accessors() {
        let exec = Executor::parse("map b {\n  x = 1\n}\nmap a {\n  y = 2\n}\n\nroot = apply(\"a\")").unwrap();

        assert_eq!(exec.map_names(), vec!["a", "b"]);
        assert_eq!(exec.statements().len(), 1);
        assert_eq!(exec.statements()[0].line(), 8);
        assert_eq!(exec.maps()["b"].statements()[0].line(), 2);
        assert_eq!(exec.maps()["b"].name(), "b");
    }
}
