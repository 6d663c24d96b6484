//! Built-in transform functions and the function registry.

use crate::{TransformError, TransformedValue};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use sync_model::event::Cell;
use sync_model::EventType;

/// Evaluation context handed to a transform function.
///
/// `source_value` is the already-resolved value of the column named by
/// the configuration's `source_name` (NULL when the source column is
/// absent from the event).
pub struct TransformContext<'a> {
    /// What happened to the source row
    pub event_type: EventType,
    /// Current values by source column name
    pub source_values: &'a HashMap<String, Cell>,
    /// Before values by source column name (empty when not captured)
    pub old_values: &'a HashMap<String, Cell>,
    /// Value of the configured source column
    pub source_value: Cell,
    /// The configured expression argument
    pub expression: Option<&'a str>,
    /// Node the change came from
    pub source_node_id: &'a str,
    /// Node the change is being prepared for
    pub target_node_id: &'a str,
}

/// One pluggable per-column transform.
pub trait TransformFunction: Send + Sync {
    /// Evaluate the function for one target column.
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError>;

    /// Registry key.
    fn name(&self) -> &'static str;
}

/// Injected capability for script-based transforms.
///
/// Scripts may have arbitrary effects, so the engine lives behind a
/// trait object owned by the embedding application rather than inside
/// the pure pipeline. Tests substitute a fake.
pub trait ScriptEngine: Send + Sync {
    /// Evaluate a script body against the event context.
    fn eval(
        &self,
        script: &str,
        ctx: &TransformContext<'_>,
    ) -> Result<TransformedValue, TransformError>;
}

/// Explicit name -> function map, built at startup and passed by
/// reference into the pipeline.
#[derive(Default)]
pub struct TransformRegistry {
    functions: HashMap<String, Arc<dyn TransformFunction>>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in function registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CopyTransform));
        registry.register(Arc::new(ConstTransform));
        registry.register(Arc::new(VariableTransform));
        registry.register(Arc::new(AdditiveTransform));
        registry.register(Arc::new(SubstrTransform));
        registry.register(Arc::new(MultiplyTransform));
        registry.register(Arc::new(LookupTransform));
        registry
    }

    /// Register (or replace) a function under its own name.
    pub fn register(&mut self, function: Arc<dyn TransformFunction>) {
        self.functions.insert(function.name().to_string(), function);
    }

    /// Register the script transform backed by the given engine.
    pub fn register_script_engine(&mut self, engine: Arc<dyn ScriptEngine>) {
        self.register(Arc::new(ScriptTransform { engine }));
    }

    /// Look up a function.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TransformFunction>, TransformError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| TransformError::UnknownFunction(name.to_string()))
    }
}

/// Pass the source value through untouched.
pub struct CopyTransform;

impl TransformFunction for CopyTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        Ok(TransformedValue::Single(ctx.source_value.clone()))
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

/// Emit the configured expression as a constant.
pub struct ConstTransform;

impl TransformFunction for ConstTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        Ok(TransformedValue::Single(
            ctx.expression.map(|e| e.to_string()),
        ))
    }

    fn name(&self) -> &'static str {
        "const"
    }
}

/// Emit a well-known runtime variable named by the expression.
pub struct VariableTransform;

impl TransformFunction for VariableTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        let value = match ctx.expression.unwrap_or("") {
            "source_node_id" => Some(ctx.source_node_id.to_string()),
            "target_node_id" => Some(ctx.target_node_id.to_string()),
            "system_timestamp" => Some(Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
            "null" => None,
            other => {
                return Err(TransformError::Failed {
                    transform: "variable".to_string(),
                    reason: format!("unknown variable '{other}'"),
                })
            }
        };
        Ok(TransformedValue::Single(value))
    }

    fn name(&self) -> &'static str {
        "variable"
    }
}

/// Add the numeric expression to the numeric source value.
pub struct AdditiveTransform;

impl TransformFunction for AdditiveTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        let addend: f64 = ctx
            .expression
            .unwrap_or("0")
            .parse()
            .map_err(|_| TransformError::Failed {
                transform: "additive".to_string(),
                reason: format!("expression '{}' is not numeric", ctx.expression.unwrap_or("")),
            })?;
        match &ctx.source_value {
            None => Ok(TransformedValue::Single(None)),
            Some(text) => {
                let base: f64 = text.parse().map_err(|_| TransformError::Failed {
                    transform: "additive".to_string(),
                    reason: format!("source value '{text}' is not numeric"),
                })?;
                let sum = base + addend;
                // keep integers looking like integers
                let rendered = if sum.fract() == 0.0 && sum.abs() < 9.0e15 {
                    format!("{}", sum as i64)
                } else {
                    format!("{sum}")
                };
                Ok(TransformedValue::Single(Some(rendered)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "additive"
    }
}

/// Slice the source value: expression is `begin` or `begin,end`
/// (character offsets, end exclusive, clamped to the value length).
pub struct SubstrTransform;

impl TransformFunction for SubstrTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        let expression = ctx.expression.unwrap_or("0");
        let mut parts = expression.splitn(2, ',');
        let begin: usize = parts
            .next()
            .unwrap_or("0")
            .trim()
            .parse()
            .map_err(|_| bad_substr(expression))?;
        let end: Option<usize> = match parts.next() {
            Some(text) => Some(text.trim().parse().map_err(|_| bad_substr(expression))?),
            None => None,
        };
        let value = match &ctx.source_value {
            None => None,
            Some(text) => {
                let chars: Vec<char> = text.chars().collect();
                let begin = begin.min(chars.len());
                let end = end.unwrap_or(chars.len()).min(chars.len()).max(begin);
                Some(chars[begin..end].iter().collect::<String>())
            }
        };
        Ok(TransformedValue::Single(value))
    }

    fn name(&self) -> &'static str {
        "substr"
    }
}

fn bad_substr(expression: &str) -> TransformError {
    TransformError::Failed {
        transform: "substr".to_string(),
        reason: format!("expression '{expression}' is not begin[,end]"),
    }
}

/// Produce one candidate value per `|`-separated template in the
/// expression, substituting `:VALUE` with the source value. On a
/// primary-key column each candidate clones the target row, which is
/// how one source row fans out into many target rows.
pub struct MultiplyTransform;

impl TransformFunction for MultiplyTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        let expression = match ctx.expression {
            Some(e) if !e.is_empty() => e,
            _ => return Ok(TransformedValue::Single(ctx.source_value.clone())),
        };
        let source_text = ctx.source_value.clone().unwrap_or_default();
        let candidates: Vec<Cell> = expression
            .split('|')
            .map(|template| Some(template.replace(":VALUE", &source_text)))
            .collect();
        Ok(TransformedValue::Multiple(candidates))
    }

    fn name(&self) -> &'static str {
        "multiply"
    }
}

/// Map the source value through a `key=value;key=value` table in the
/// expression. A `*=value` entry is the default; with no default, an
/// unmatched source value ignores the column.
pub struct LookupTransform;

impl TransformFunction for LookupTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        let expression = ctx.expression.unwrap_or("");
        let source_text = ctx.source_value.clone().unwrap_or_default();
        let mut default: Option<Cell> = None;
        for entry in expression.split(';').filter(|e| !e.is_empty()) {
            let (key, value) = entry.split_once('=').ok_or_else(|| TransformError::Failed {
                transform: "lookup".to_string(),
                reason: format!("entry '{entry}' is not key=value"),
            })?;
            if key == "*" {
                default = Some(Some(value.to_string()));
            } else if key == source_text {
                return Ok(TransformedValue::Single(Some(value.to_string())));
            }
        }
        match default {
            Some(value) => Ok(TransformedValue::Single(value)),
            None => Err(TransformError::IgnoreColumn),
        }
    }

    fn name(&self) -> &'static str {
        "lookup"
    }
}

/// Delegates to the injected [`ScriptEngine`]; the expression is the
/// script body.
pub struct ScriptTransform {
    engine: Arc<dyn ScriptEngine>,
}

impl TransformFunction for ScriptTransform {
    fn apply(&self, ctx: &TransformContext<'_>) -> Result<TransformedValue, TransformError> {
        let script = ctx.expression.unwrap_or("");
        self.engine.eval(script, ctx)
    }

    fn name(&self) -> &'static str {
        "bsh"
    }
}
