//! Expression evaluation backed by an embedded rhai engine.
//!
//! Every top-level key of the parameter snapshot is bound as a variable, and
//! the script assigns the reserved name `result`; the evaluator reads it back
//! after the run. An empty source compiles to a sentinel program: the value
//! variant evaluates to null and the boolean variant to true.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, Module, Scope, AST};
use serde_json::Value;

use crate::params::Snapshot;

/// The variable a script must assign for its result to be observed.
pub const RESULT_VAR: &str = "result";

/// Shared evaluator: one engine, no state carried across evaluations.
#[derive(Clone)]
pub struct ExprEvaluator {
    engine: Arc<Engine>,
}

impl ExprEvaluator {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        // The optimizer may fold away an otherwise-unused `result` binding.
        engine.set_optimization_level(rhai::OptimizationLevel::None);
        engine.register_static_module("Util", util_module().into());
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Compile a value expression. An empty source yields the null sentinel.
    pub fn compile(&self, source: &str) -> Result<Program> {
        let ast = if source.is_empty() {
            None
        } else {
            Some(
                self.engine
                    .compile(source)
                    .map_err(|e| anyhow!("invalid expression: {e}"))?,
            )
        };
        Ok(Program {
            engine: self.engine.clone(),
            source: source.to_string(),
            ast,
        })
    }

    /// Compile a boolean expression. An empty source yields the true sentinel.
    pub fn compile_bool(&self, source: &str) -> Result<BoolProgram> {
        Ok(BoolProgram(self.compile(source)?))
    }
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled value expression.
#[derive(Clone)]
pub struct Program {
    engine: Arc<Engine>,
    source: String,
    ast: Option<AST>,
}

impl Program {
    /// Evaluate against a snapshot and return the script's `result`.
    pub fn run(&self, params: &Snapshot) -> Result<Value> {
        let Some(ast) = &self.ast else {
            return Ok(Value::Null);
        };
        let result = self.eval(ast, params)?;
        from_dynamic(&result).map_err(|e| anyhow!("expression result is not representable: {e}"))
    }

    fn eval(&self, ast: &AST, params: &Snapshot) -> Result<Dynamic> {
        let mut scope = Scope::new();
        for (key, value) in params {
            let dynamic = to_dynamic(value).map_err(|e| anyhow!("binding {key}: {e}"))?;
            scope.push_dynamic(key.as_str(), dynamic);
        }
        self.engine
            .run_ast_with_scope(&mut scope, ast)
            .map_err(|e| anyhow!("expression failed: {e}"))?;
        scope
            .get(RESULT_VAR)
            .cloned()
            .ok_or_else(|| anyhow!("the expression did not assign {RESULT_VAR:?}"))
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .finish()
    }
}

/// A compiled boolean expression.
#[derive(Clone)]
pub struct BoolProgram(Program);

impl BoolProgram {
    /// Evaluate against a snapshot; the sentinel (empty source) is true.
    pub fn matches(&self, params: &Snapshot) -> Result<bool> {
        let Some(ast) = &self.0.ast else {
            return Ok(true);
        };
        let result = self.0.eval(ast, params)?;
        result.as_bool().map_err(|actual| {
            anyhow!("the expression assigned {RESULT_VAR:?} of type {actual}, expected bool")
        })
    }
}

impl fmt::Debug for BoolProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoolProgram")
            .field("source", &self.0.source)
            .finish()
    }
}

/// Helpers exposed to scripts as the static `Util` module:
/// `Util::LabelNames`, `Util::Env`, `Util::GetTaskByName`,
/// `Util::String::{Split, TrimSpace}`, `Util::Map::{Keys, Values}`.
fn util_module() -> Module {
    let mut module = Module::new();

    module.set_native_fn("LabelNames", |labels: rhai::Array| {
        let mut names = rhai::Array::new();
        for label in labels {
            let map = label
                .try_cast::<rhai::Map>()
                .ok_or("LabelNames expects a list of maps")?;
            if let Some(name) = map.get("name") {
                names.push(name.clone());
            }
        }
        Ok(names)
    });

    module.set_native_fn("Env", |name: &str| {
        Ok(std::env::var(name).unwrap_or_default())
    });

    module.set_native_fn("GetTaskByName", |tasks: rhai::Array, name: &str| {
        for task in tasks {
            let Some(map) = task.clone().try_cast::<rhai::Map>() else {
                continue;
            };
            let matched = map
                .get("Name")
                .cloned()
                .and_then(|v| v.into_immutable_string().ok())
                .is_some_and(|s| s == name);
            if matched {
                return Ok(task);
            }
        }
        Ok(Dynamic::UNIT)
    });

    let mut string_module = Module::new();
    string_module.set_native_fn("Split", |s: &str, sep: &str| {
        Ok(s.split(sep)
            .map(|part| Dynamic::from(part.to_string()))
            .collect::<rhai::Array>())
    });
    string_module.set_native_fn("TrimSpace", |s: &str| Ok(s.trim().to_string()));
    module.set_sub_module("String", string_module);

    let mut map_module = Module::new();
    map_module.set_native_fn("Keys", |m: rhai::Map| {
        Ok(m.keys()
            .map(|k| Dynamic::from(k.to_string()))
            .collect::<rhai::Array>())
    });
    map_module.set_native_fn("Values", |m: rhai::Map| {
        Ok(m.into_values().collect::<rhai::Array>())
    });
    module.set_sub_module("Map", map_module);

    module
}
