//! Configuration resolution: evaluate `{{ }}` spans inside node configuration.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use super::ExpressionError;
use super::ast::Expr;
use super::context::ExpressionContext;
use super::eval::{EvalError, Interpreter, stringify};
use super::functions::FunctionTable;
use super::parser::parse;
use super::template::{Segment, segments};

/// Outcome of a lenient [`ExpressionEngine::evaluate_object`] pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: Value,
    /// One entry per string that failed to resolve; those strings are kept
    /// verbatim in `value`.
    pub errors: Vec<ExpressionError>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Evaluates expression strings against an [`ExpressionContext`].
///
/// Owns a parse cache keyed by expression body. The dispatcher creates one
/// engine per run, so cached trees never outlive the run.
#[derive(Debug, Default)]
pub struct ExpressionEngine {
    functions: FunctionTable,
    cache: DashMap<String, Arc<Expr>>,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self::with_functions(FunctionTable::standard())
    }

    pub fn with_functions(functions: FunctionTable) -> Self {
        Self {
            functions,
            cache: DashMap::new(),
        }
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Resolve one value.
    ///
    /// Non-strings and strings without spans come back unchanged. A string
    /// that is exactly one span yields the native result (undefined becomes
    /// `null`). Otherwise each span is stringified and spliced into the text.
    pub fn evaluate(
        &self,
        value: &Value,
        ctx: &ExpressionContext,
    ) -> Result<Value, ExpressionError> {
        let Value::String(s) = value else {
            return Ok(value.clone());
        };

        let segs = segments(s);
        match segs.as_slice() {
            [] | [Segment::Text(_)] => Ok(value.clone()),
            [Segment::Expr { raw, body }] => {
                Ok(self.evaluate_span(raw, body, ctx)?.unwrap_or(Value::Null))
            }
            _ => {
                let mut out = String::with_capacity(s.len());
                for seg in segs {
                    match seg {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Expr { raw, body } => {
                            if let Some(v) = self.evaluate_span(raw, body, ctx)? {
                                out.push_str(&stringify(&v));
                            }
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }

    /// Resolve every string in a JSON tree, keeping going past failures.
    pub fn evaluate_object(&self, value: &Value, ctx: &ExpressionContext) -> Resolution {
        let mut errors = Vec::new();
        let value = self
            .walk(value, ctx, &mut |e: ExpressionError| {
                errors.push(e);
                Ok(())
            })
            // The collecting sink never returns an error.
            .unwrap_or(Value::Null);
        Resolution { value, errors }
    }

    /// Like [`evaluate_object`](Self::evaluate_object) but stops at the first
    /// failing string.
    pub fn evaluate_object_strict(
        &self,
        value: &Value,
        ctx: &ExpressionContext,
    ) -> Result<Value, ExpressionError> {
        self.walk(value, ctx, &mut |e: ExpressionError| Err(e))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn walk(
        &self,
        value: &Value,
        ctx: &ExpressionContext,
        on_error: &mut dyn FnMut(ExpressionError) -> Result<(), ExpressionError>,
    ) -> Result<Value, ExpressionError> {
        match value {
            Value::String(_) => match self.evaluate(value, ctx) {
                Ok(resolved) => Ok(resolved),
                Err(e) => {
                    on_error(e)?;
                    Ok(value.clone())
                }
            },
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.walk(item, ctx, on_error)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.walk(v, ctx, on_error)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn evaluate_span(
        &self,
        raw: &str,
        body: &str,
        ctx: &ExpressionContext,
    ) -> Result<Option<Value>, ExpressionError> {
        let expr = self.parsed(raw, body)?;
        Interpreter::new(ctx, &self.functions)
            .run(&expr)
            .and_then(|item| item.into_json())
            .map_err(|e| attach(raw, e))
    }

    fn parsed(&self, raw: &str, body: &str) -> Result<Arc<Expr>, ExpressionError> {
        if let Some(hit) = self.cache.get(body) {
            return Ok(Arc::clone(hit.value()));
        }
        let expr = parse(body).map_err(|e| ExpressionError::Syntax {
            expression: raw.to_string(),
            position: e.position,
            message: e.message,
        })?;
        let expr = Arc::new(expr);
        self.cache.insert(body.to_string(), Arc::clone(&expr));
        tracing::trace!(expression = raw, "cached parsed expression");
        Ok(expr)
    }
}

fn attach(raw: &str, err: EvalError) -> ExpressionError {
    let expression = raw.to_string();
    match err {
        EvalError::Message(message) => ExpressionError::Evaluation {
            expression,
            message,
        },
        EvalError::UnknownFunction(name) => ExpressionError::UnknownFunction { expression, name },
        EvalError::Arity { name, message } => ExpressionError::Arity {
            expression,
            name,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::context::ContextParams;
    use graphflow_types::branch::{BranchDecision, BranchHistory};
    use graphflow_types::results::NodeResults;
    use graphflow_types::workflow::NodeMetadata;
    use serde_json::json;

    fn ctx() -> ExpressionContext {
        let mut results = NodeResults::new();
        results.insert("Trigger", json!({ "name": "John", "count": 42 }));
        results.insert(
            "Fetch Orders",
            json!({ "body": { "items": [{ "price": 100 }, { "price": 29.5 }] } }),
        );
        let mut branches = BranchHistory::new();
        branches.record("if-1", BranchDecision::new("true"));
        ExpressionContext::new(ContextParams {
            results,
            nodes: vec![
                NodeMetadata {
                    id: "t".into(),
                    name: "Trigger".into(),
                    type_tag: "MANUAL_TRIGGER".into(),
                },
                NodeMetadata {
                    id: "s".into(),
                    name: "Greet".into(),
                    type_tag: "SET".into(),
                },
            ],
            current_node_id: Some("s".into()),
            branches,
            ..ContextParams::default()
        })
    }

    #[test]
    fn test_single_span_keeps_native_type() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        assert_eq!(engine.evaluate(&json!("{{ Trigger.count }}"), &ctx).unwrap(), json!(42));
        assert_eq!(
            engine.evaluate(&json!("{{ $sum(`Fetch Orders`.body.items.price) }}"), &ctx).unwrap(),
            json!(129.5)
        );
        assert_eq!(
            engine.evaluate(&json!("{{ Trigger }}"), &ctx).unwrap(),
            json!({ "name": "John", "count": 42 })
        );
        assert_eq!(engine.evaluate(&json!("{{ Trigger.nope }}"), &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_mixed_text_is_stringified() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        assert_eq!(
            engine.evaluate(&json!("Hello {{ input.name }}"), &ctx).unwrap(),
            json!("Hello John")
        );
        assert_eq!(
            engine.evaluate(&json!("n={{ Trigger.count }} m={{ Trigger.nope }};"), &ctx).unwrap(),
            json!("n=42 m=;")
        );
        assert_eq!(
            engine.evaluate(&json!("items: {{ [1, 2] }}"), &ctx).unwrap(),
            json!("items: [1,2]")
        );
        assert_eq!(
            engine.evaluate(&json!(" {{ Trigger.count }}"), &ctx).unwrap(),
            json!(" 42")
        );
    }

    #[test]
    fn test_non_expressions_unchanged() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        for v in [json!(7), json!(null), json!("plain"), json!([1]), json!("{{ open")] {
            assert_eq!(engine.evaluate(&v, &ctx).unwrap(), v);
        }
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_branch_binding() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        assert_eq!(
            engine.evaluate(&json!("{{ branch.last.branch }}"), &ctx).unwrap(),
            json!("true")
        );
        assert_eq!(
            engine
                .evaluate(&json!("{{ $branch.all['if-1'].branch = 'true' ? 'yes' : 'no' }}"), &ctx)
                .unwrap(),
            json!("yes")
        );
    }

    #[test]
    fn test_object_resolution_preserves_shape() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        let config = json!({
            "url": "https://api.example.com/users/{{ Trigger.name }}",
            "retries": 3,
            "flags": [true, "{{ Trigger.count > 40 }}", null],
            "nested": { "total": "{{ Trigger.count * 2 }}", "keep": "as is" }
        });
        let resolved = engine.evaluate_object(&config, &ctx);
        assert!(resolved.is_clean());
        assert_eq!(
            resolved.value,
            json!({
                "url": "https://api.example.com/users/John",
                "retries": 3,
                "flags": [true, true, null],
                "nested": { "total": 84, "keep": "as is" }
            })
        );
    }

    #[test]
    fn test_lenient_keeps_failing_strings() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        let config = json!({
            "bad": "{{ 1 + }}",
            "unknown": "{{ $nope() }}",
            "good": "{{ Trigger.name }}"
        });
        let resolved = engine.evaluate_object(&config, &ctx);
        assert_eq!(resolved.value["bad"], json!("{{ 1 + }}"));
        assert_eq!(resolved.value["unknown"], json!("{{ $nope() }}"));
        assert_eq!(resolved.value["good"], json!("John"));
        assert_eq!(resolved.errors.len(), 2);
        assert!(resolved.errors.iter().any(|e| matches!(
            e,
            ExpressionError::Syntax { expression, .. } if expression == "{{ 1 + }}"
        )));
        assert!(resolved.errors.iter().any(|e| matches!(
            e,
            ExpressionError::UnknownFunction { name, .. } if name == "nope"
        )));
    }

    #[test]
    fn test_hostile_fields_fail_alone() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        let nested = format!("{{{{ {}1{} }}}}", "(".repeat(1500), ")".repeat(1500));
        let config = json!({
            "a": "{{ $pad('x', -1e30) }}",
            "huge": "{{ $pad('x', 1e12) }}",
            "deep": nested,
            "b": "{{ 1 }}"
        });

        let resolved = engine.evaluate_object(&config, &ctx);
        assert_eq!(resolved.value["b"], json!(1));
        assert_eq!(resolved.value["a"], config["a"]);
        assert_eq!(resolved.value["deep"], config["deep"]);
        assert_eq!(resolved.errors.len(), 3);
        assert!(resolved.errors.iter().any(|e| matches!(
            e,
            ExpressionError::Syntax { message, .. } if message.contains("nested")
        )));
        assert!(resolved.errors.iter().any(|e| matches!(
            e,
            ExpressionError::Evaluation { message, .. } if message.contains("$pad width")
        )));
    }

    #[test]
    fn test_strict_returns_first_error() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        let err = engine
            .evaluate_object_strict(&json!({ "list": ["ok", "{{ 1 / 0 }}"] }), &ctx)
            .unwrap_err();
        assert!(matches!(err, ExpressionError::Evaluation { .. }));
        assert_eq!(err.expression(), "{{ 1 / 0 }}");
    }

    #[test]
    fn test_syntax_position_is_relative_to_body() {
        let engine = ExpressionEngine::new();
        let err = engine.evaluate(&json!("abc {{ ) }}"), &ctx()).unwrap_err();
        match err {
            ExpressionError::Syntax { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cache_is_reused_and_clearable() {
        let engine = ExpressionEngine::new();
        let ctx = ctx();
        engine.evaluate(&json!("{{ Trigger.count }}"), &ctx).unwrap();
        engine.evaluate(&json!("x {{ Trigger.count }}"), &ctx).unwrap();
        assert_eq!(engine.cache_len(), 1);
        engine.clear_cache();
        assert_eq!(engine.cache_len(), 0);
    }
}
