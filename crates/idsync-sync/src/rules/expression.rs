//! Sandboxed mapping expressions.
//!
//! Expressions are Rhai expressions evaluated by a raw engine: no standard
//! packages, no statements, no I/O and bounded resources. Source values are
//! reachable through the `cs` and `mv` maps, keyed by attribute name.
//! Only functions in [`ALLOWED_FUNCTIONS`] may be called; anything else is
//! rejected at compile time. Compiled expressions are cached by their text.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use moka::sync::Cache;
use rhai::{Array, ASTNode, Dynamic, Engine, Expr, Map, Scope, AST};
use tracing::debug;
use uuid::Uuid;

use idsync_db::models::{
    AttributeDataType, AttributeValue, ConnectedSystemObject, ConnectedSystemObjectType,
    MetaverseObject, MetaverseObjectType, ReferenceKey,
};

use crate::error::{SyncError, SyncResult};

/// Default maximum number of operations per evaluation.
const DEFAULT_MAX_OPERATIONS: u64 = 50_000;

/// Default maximum call stack depth.
const DEFAULT_MAX_CALL_STACK_DEPTH: usize = 32;

/// Default maximum string size in bytes.
const DEFAULT_MAX_STRING_SIZE: usize = 65536;

/// Default maximum array size.
const DEFAULT_MAX_ARRAY_SIZE: usize = 10_000;

/// Default maximum map size.
const DEFAULT_MAX_MAP_SIZE: usize = 10_000;

/// Default number of compiled expressions kept in the cache.
const DEFAULT_CACHE_CAPACITY: u64 = 1_000;

/// Functions callable from an expression.
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "trim",
    "upper",
    "lower",
    "len",
    "left",
    "right",
    "replace",
    "split",
    "join",
    "contains",
    "starts_with",
    "ends_with",
    "coalesce",
    "is_null",
    "to_string",
];

/// Resource limits of the expression engine.
#[derive(Debug, Clone)]
pub struct ExpressionEngineConfig {
    /// Maximum number of operations before termination.
    pub max_operations: u64,
    /// Maximum call stack depth.
    pub max_call_stack_depth: usize,
    /// Maximum string size in bytes.
    pub max_string_size: usize,
    /// Maximum array size.
    pub max_array_size: usize,
    /// Maximum map size.
    pub max_map_size: usize,
    /// Maximum number of cached compilations.
    pub cache_capacity: u64,
}

impl Default for ExpressionEngineConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_stack_depth: DEFAULT_MAX_CALL_STACK_DEPTH,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Attribute values visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    cs: Map,
    mv: Map,
}

impl ExpressionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a connected system attribute as `cs["name"]`.
    pub fn insert_cs<'a, R: ReferenceKey + 'a>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = &'a AttributeValue<R>>,
        multi_valued: bool,
    ) {
        self.cs
            .insert(name.into(), values_to_dynamic(values, multi_valued));
    }

    /// Expose a metaverse attribute as `mv["name"]`.
    pub fn insert_mv<'a, R: ReferenceKey + 'a>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = &'a AttributeValue<R>>,
        multi_valued: bool,
    ) {
        self.mv
            .insert(name.into(), values_to_dynamic(values, multi_valued));
    }

    /// Expose every attribute of a connected system object. Attributes
    /// without values are `()` (or an empty array when multi-valued).
    pub fn add_cso(&mut self, cso: &ConnectedSystemObject, object_type: &ConnectedSystemObjectType) {
        for attribute in &object_type.attributes {
            self.insert_cs(
                &attribute.name,
                cso.values_of(attribute.id).map(|v| &v.value),
                attribute.plurality.is_multi_valued(),
            );
        }
    }

    /// Expose every attribute of a metaverse object.
    pub fn add_mvo(&mut self, mvo: &MetaverseObject, object_type: &MetaverseObjectType) {
        for attribute in &object_type.attributes {
            self.insert_mv(
                &attribute.name,
                mvo.values_of(attribute.id).map(|v| &v.value),
                attribute.plurality.is_multi_valued(),
            );
        }
    }
}

fn values_to_dynamic<'a, R: ReferenceKey + 'a>(
    values: impl IntoIterator<Item = &'a AttributeValue<R>>,
    multi_valued: bool,
) -> Dynamic {
    let mut converted: Array = values.into_iter().map(value_to_dynamic).collect();
    if multi_valued {
        Dynamic::from_array(converted)
    } else if converted.is_empty() {
        Dynamic::UNIT
    } else {
        converted.swap_remove(0)
    }
}

fn value_to_dynamic<R: ReferenceKey>(value: &AttributeValue<R>) -> Dynamic {
    match value {
        AttributeValue::Text(s) => Dynamic::from(s.clone()),
        AttributeValue::Number(n) => Dynamic::from_int(i64::from(*n)),
        AttributeValue::LongNumber(n) => Dynamic::from_int(*n),
        AttributeValue::DateTime(d) => {
            Dynamic::from(d.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        AttributeValue::Binary(b) => Dynamic::from_blob(b.clone()),
        AttributeValue::Guid(g) => Dynamic::from(g.to_string()),
        AttributeValue::Boolean(b) => Dynamic::from_bool(*b),
        AttributeValue::Reference(r) => Dynamic::from(r.reference_key()),
    }
}

/// Convert an expression result to values of the target type. References
/// come back as the key string of the target.
fn dynamic_to_values(
    result: Dynamic,
    target: AttributeDataType,
) -> Result<Vec<AttributeValue<String>>, String> {
    if result.is_array() {
        let items = result.into_array().map_err(|t| format!("unexpected {t}"))?;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if let Some(value) = dynamic_to_value(item, target)? {
                values.push(value);
            }
        }
        return Ok(values);
    }
    Ok(dynamic_to_value(result, target)?.into_iter().collect())
}

fn dynamic_to_value(
    value: Dynamic,
    target: AttributeDataType,
) -> Result<Option<AttributeValue<String>>, String> {
    if value.is_unit() {
        return Ok(None);
    }
    let type_name = value.type_name();
    let mismatch = || format!("expression returned {type_name}, expected {target}");

    let converted = match target {
        AttributeDataType::Text => AttributeValue::Text(value.to_string()),
        AttributeDataType::Reference => AttributeValue::Reference(value.to_string()),
        AttributeDataType::Number => {
            let n = dynamic_int(&value).ok_or_else(mismatch)?;
            AttributeValue::Number(i32::try_from(n).map_err(|_| mismatch())?)
        }
        AttributeDataType::LongNumber => {
            AttributeValue::LongNumber(dynamic_int(&value).ok_or_else(mismatch)?)
        }
        AttributeDataType::Boolean => {
            let b = value
                .as_bool()
                .ok()
                .or_else(|| value.to_string().parse().ok())
                .ok_or_else(mismatch)?;
            AttributeValue::Boolean(b)
        }
        AttributeDataType::Guid => {
            let g = Uuid::parse_str(&value.to_string()).map_err(|_| mismatch())?;
            AttributeValue::Guid(g)
        }
        AttributeDataType::DateTime => {
            let d = DateTime::parse_from_rfc3339(&value.to_string()).map_err(|_| mismatch())?;
            AttributeValue::DateTime(d.with_timezone(&Utc))
        }
        AttributeDataType::Binary => {
            AttributeValue::Binary(value.into_blob().map_err(|_| mismatch())?)
        }
        AttributeDataType::NotSet => return Err(mismatch()),
    };
    Ok(Some(converted))
}

fn dynamic_int(value: &Dynamic) -> Option<i64> {
    value
        .as_int()
        .ok()
        .or_else(|| value.to_string().trim().parse().ok())
}

fn is_null(value: &Dynamic) -> bool {
    value.is_unit()
        || (value.is_string() && value.to_string().is_empty())
        || (value.is_array() && value.clone().into_array().map_or(false, |a| a.is_empty()))
}

fn left(s: &str, n: i64) -> String {
    s.chars().take(n.max(0) as usize).collect()
}

fn right(s: &str, n: i64) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n.max(0) as usize)).collect()
}

/// Build the sandboxed engine with the allow-listed function set.
fn create_engine(config: &ExpressionEngineConfig) -> Engine {
    let mut engine = Engine::new_raw();

    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_stack_depth);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.set_max_expr_depths(64, 32);

    engine.disable_symbol("eval");
    engine.disable_symbol("print");
    engine.disable_symbol("debug");

    // Null-propagating string functions: a missing value yields ().
    engine.register_fn("trim", |s: &str| s.trim().to_string());
    engine.register_fn("trim", |_: ()| ());
    engine.register_fn("upper", |s: &str| s.to_uppercase());
    engine.register_fn("upper", |_: ()| ());
    engine.register_fn("lower", |s: &str| s.to_lowercase());
    engine.register_fn("lower", |_: ()| ());
    engine.register_fn("left", left);
    engine.register_fn("left", |_: (), _: i64| ());
    engine.register_fn("right", right);
    engine.register_fn("right", |_: (), _: i64| ());
    engine.register_fn("replace", |s: &str, from: &str, to: &str| s.replace(from, to));
    engine.register_fn("replace", |_: (), _: &str, _: &str| ());
    engine.register_fn("split", |s: &str, sep: &str| -> Array {
        s.split(sep).map(|part| Dynamic::from(part.to_string())).collect()
    });
    engine.register_fn("split", |_: (), _: &str| ());

    engine.register_fn("len", |s: &str| s.chars().count() as i64);
    engine.register_fn("len", |a: Array| a.len() as i64);
    engine.register_fn("len", |_: ()| 0_i64);

    engine.register_fn("join", |a: Array, sep: &str| {
        a.iter()
            .filter(|v| !v.is_unit())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(sep)
    });
    engine.register_fn("join", |_: (), _: &str| ());

    engine.register_fn("contains", |s: &str, sub: &str| s.contains(sub));
    engine.register_fn("contains", |a: Array, v: Dynamic| {
        let wanted = v.to_string();
        a.iter().any(|item| item.to_string() == wanted)
    });
    engine.register_fn("contains", |_: (), _: Dynamic| false);
    engine.register_fn("starts_with", |s: &str, p: &str| s.starts_with(p));
    engine.register_fn("starts_with", |_: (), _: &str| false);
    engine.register_fn("ends_with", |s: &str, p: &str| s.ends_with(p));
    engine.register_fn("ends_with", |_: (), _: &str| false);

    engine.register_fn("coalesce", |a: Dynamic, b: Dynamic| if is_null(&a) { b } else { a });
    engine.register_fn("coalesce", |a: Dynamic, b: Dynamic, c: Dynamic| {
        if !is_null(&a) {
            a
        } else if !is_null(&b) {
            b
        } else {
            c
        }
    });
    engine.register_fn("is_null", |v: Dynamic| is_null(&v));
    engine.register_fn("to_string", |v: Dynamic| {
        if v.is_unit() {
            String::new()
        } else {
            v.to_string()
        }
    });

    engine
}

/// First called function outside the allow-list. Operators are calls too,
/// named by their symbol, and stay allowed.
fn disallowed_function(ast: &AST) -> Option<String> {
    let mut found = None;
    ast.walk(&mut |path: &[ASTNode]| {
        if let Some(ASTNode::Expr(Expr::FnCall(call, _) | Expr::MethodCall(call, _))) = path.last()
        {
            let name = call.name.as_str();
            let named = name.starts_with(|c: char| c.is_alphabetic() || c == '_');
            if named && !ALLOWED_FUNCTIONS.contains(&name) {
                found = Some(name.to_string());
                return false;
            }
        }
        true
    });
    found
}

/// Compiles, caches and evaluates mapping expressions.
pub struct ExpressionEngine {
    engine: Engine,
    cache: Cache<String, Arc<AST>>,
}

impl ExpressionEngine {
    /// Create an engine with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ExpressionEngineConfig::default())
    }

    /// Create an engine with custom limits.
    #[must_use]
    pub fn with_config(config: ExpressionEngineConfig) -> Self {
        Self {
            engine: create_engine(&config),
            cache: Cache::builder().max_capacity(config.cache_capacity).build(),
        }
    }

    /// Compile an expression, or return the cached compilation.
    pub fn compile(&self, expression: &str) -> SyncResult<Arc<AST>> {
        if let Some(ast) = self.cache.get(expression) {
            return Ok(ast);
        }

        let ast = self
            .engine
            .compile_expression(expression)
            .map_err(|e| SyncError::expression(format!("'{expression}' does not compile: {e}")))?;
        if let Some(name) = disallowed_function(&ast) {
            return Err(SyncError::expression(format!(
                "'{expression}' calls '{name}', which is not an allowed function"
            )));
        }

        let ast = Arc::new(ast);
        self.cache.insert(expression.to_string(), Arc::clone(&ast));
        debug!(expression, "Compiled mapping expression");
        Ok(ast)
    }

    /// Whether a compilation of `expression` is cached.
    #[must_use]
    pub fn is_cached(&self, expression: &str) -> bool {
        self.cache.contains_key(expression)
    }

    /// Evaluate an expression and convert the result to `target` values.
    ///
    /// A unit result or an empty array yields no values.
    pub fn evaluate(
        &self,
        expression: &str,
        context: &ExpressionContext,
        target: AttributeDataType,
    ) -> SyncResult<Vec<AttributeValue<String>>> {
        let ast = self.compile(expression)?;

        let mut scope = Scope::new();
        scope.push_constant("cs", context.cs.clone());
        scope.push_constant("mv", context.mv.clone());

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| SyncError::expression(format!("'{expression}' failed: {e}")))?;

        dynamic_to_values(result, target)
            .map_err(|e| SyncError::expression(format!("'{expression}': {e}")))
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}
