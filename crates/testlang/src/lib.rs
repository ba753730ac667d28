//! A deliberately small JS-flavoured expression language.
//!
//! This crate exists to exercise the embedding boundary: it implements the
//! [`GuestLanguage`] seam with just enough surface to drive evaluation,
//! member access, the callback bridge, capability gating, and cancellation.
//! It is not a general-purpose language.
//!
//! Supported forms: integer/float/string literals, `+ - * /`, parentheses,
//! identifiers resolved from the language bindings (and, when polyglot
//! access is allowed, the polyglot bindings), member access, calls through
//! any executable value, and `;`-separated expression sequences evaluating
//! to the last expression. Builtins: `readFile(path)` (requires the IO
//! capability) and `waitForCancel()`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glot::{GuestEnv, GuestError, GuestLanguage, Value, install_language};
use tracing::trace;

mod syntax;

use syntax::{BinOp, Expr, ParseError};

/// The language implementation; registers as `js` by default.
pub struct MiniJs {
    id: String,
}

impl MiniJs {
    #[must_use]
    pub fn new() -> Self {
        Self { id: "js".to_string() }
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Install the language process-wide under the `js` id. Idempotent.
    pub fn install() {
        static INSTALL: std::sync::Once = std::sync::Once::new();
        INSTALL.call_once(|| {
            install_language(Arc::new(Self::new()));
        });
    }
}

impl Default for MiniJs {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestLanguage for MiniJs {
    fn id(&self) -> &str {
        &self.id
    }

    fn eval(
        &self,
        env: &GuestEnv<'_>,
        name: &str,
        source: &str,
    ) -> core::result::Result<Value, GuestError> {
        trace!(name, "evaluating");
        if env.context.cancellation_requested() {
            return Err(GuestError::cancelled());
        }
        let program = syntax::parse(source).map_err(|err| syntax_error(name, &err))?;
        let interp = Interp {
            env,
            source_name: name,
            lang_id: &self.id,
        };
        let mut last = None;
        for expr in &program {
            last = Some(interp.eval(expr)?);
        }
        // parse() rejects empty programs, so there is always a last value.
        last.ok_or_else(|| GuestError::internal("empty program survived parsing"))
    }
}

fn syntax_error(name: &str, err: &ParseError) -> GuestError {
    GuestError::syntax(err.message.clone()).with_frames(vec![format!("{name}:{}", err.line)])
}

struct Interp<'a, 'e> {
    env: &'a GuestEnv<'e>,
    source_name: &'a str,
    lang_id: &'a str,
}

impl Interp<'_, '_> {
    fn fail(&self, message: impl Into<String>, line: u32) -> GuestError {
        let message = message.into();
        let mut error = GuestError::runtime(message.clone())
            .with_frames(vec![format!("{}:{line}", self.source_name)]);
        if let Ok(object) = self.env.context.string(message) {
            error = error.with_object(object);
        }
        error
    }

    fn eval(&self, expr: &Expr) -> core::result::Result<Value, GuestError> {
        if self.env.context.cancellation_requested() {
            return Err(GuestError::cancelled());
        }
        match expr {
            Expr::Int(value) => self.value(self.env.context.int(*value)),
            Expr::Float(value) => self.value(self.env.context.float64(*value)),
            Expr::Str(value) => self.value(self.env.context.string(value.clone())),
            Expr::Ident { name, line } => self.lookup(name, *line),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.binary(*op, &lhs, &rhs)
            }
            Expr::Member { target, name, line } => {
                let target = self.eval(target)?;
                if !target.has_members().unwrap_or(false) {
                    return Err(self.fail(format!("value has no member '{name}'"), *line));
                }
                target
                    .get_member(self.env.thread, name)
                    .map_err(|err| self.fail(err.to_string(), *line))
            }
            Expr::Call { callee, args, line } => self.call(callee, args, *line),
        }
    }

    fn value(&self, result: glot::Result<Value>) -> core::result::Result<Value, GuestError> {
        result.map_err(|err| GuestError::internal(err.to_string()))
    }

    /// Identifiers resolve against the language bindings, then the polyglot
    /// bindings when the context grants polyglot access.
    fn lookup(&self, name: &str, line: u32) -> core::result::Result<Value, GuestError> {
        let bindings = self
            .env
            .context
            .bindings(self.lang_id)
            .map_err(|err| GuestError::internal(err.to_string()))?;
        if bindings.has_member(self.env.thread, name).unwrap_or(false) {
            return bindings
                .get_member(self.env.thread, name)
                .map_err(|err| self.fail(err.to_string(), line));
        }
        if self.env.context.capabilities().polyglot_access {
            let polyglot = self
                .env
                .context
                .polyglot_bindings()
                .map_err(|err| GuestError::internal(err.to_string()))?;
            if polyglot.has_member(self.env.thread, name).unwrap_or(false) {
                return polyglot
                    .get_member(self.env.thread, name)
                    .map_err(|err| self.fail(err.to_string(), line));
            }
        }
        Err(self.fail(format!("'{name}' is not defined"), line))
    }

    fn call(
        &self,
        callee: &Expr,
        args: &[Expr],
        line: u32,
    ) -> core::result::Result<Value, GuestError> {
        if let Expr::Ident { name, .. } = callee {
            match name.as_str() {
                "readFile" => return self.read_file(args, line),
                "waitForCancel" => return self.wait_for_cancel(args, line),
                _ => {}
            }
        }
        let callee = self.eval(callee)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        match callee.execute_raw(self.env, &values) {
            Ok(value) => Ok(value),
            Err(glot::InteropError::Guest(guest)) => Err(guest),
            Err(other) => Err(self.fail(other.to_string(), line)),
        }
    }

    fn read_file(
        &self,
        args: &[Expr],
        line: u32,
    ) -> core::result::Result<Value, GuestError> {
        if !self.env.context.capabilities().io {
            return Err(self.fail("IO access is not allowed for this context", line));
        }
        let [path] = args else {
            return Err(self.fail("readFile expects exactly one argument", line));
        };
        let path = self
            .eval(path)?
            .as_string()
            .map_err(|_| self.fail("readFile expects a string path", line))?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => self.value(self.env.context.string(contents)),
            Err(err) => Err(self.fail(format!("readFile '{path}' failed: {err}"), line)),
        }
    }

    /// Spin until the context is cancelled from another thread; used to
    /// exercise cancel-on-close.
    fn wait_for_cancel(
        &self,
        args: &[Expr],
        line: u32,
    ) -> core::result::Result<Value, GuestError> {
        if !args.is_empty() {
            return Err(self.fail("waitForCancel expects no arguments", line));
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.env.context.cancellation_requested() {
            if Instant::now() > deadline {
                return Err(self.fail("cancellation never arrived", line));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Err(GuestError::cancelled())
    }

    fn binary(
        &self,
        op: BinOp,
        lhs: &Value,
        rhs: &Value,
    ) -> core::result::Result<Value, GuestError> {
        if op == BinOp::Add && (lhs.is_string().unwrap_or(false) || rhs.is_string().unwrap_or(false))
        {
            let text = format!(
                "{}{}",
                lhs.to_display_string()
                    .map_err(|err| GuestError::internal(err.to_string()))?,
                rhs.to_display_string()
                    .map_err(|err| GuestError::internal(err.to_string()))?
            );
            return self.value(self.env.context.string(text));
        }
        let lhs = self.number_of(lhs)?;
        let rhs = self.number_of(rhs)?;
        match (lhs, rhs, op) {
            (glot::Number::Int(a), glot::Number::Int(b), BinOp::Add) => {
                self.int_or_float(a.checked_add(b), a as f64 + b as f64)
            }
            (glot::Number::Int(a), glot::Number::Int(b), BinOp::Sub) => {
                self.int_or_float(a.checked_sub(b), a as f64 - b as f64)
            }
            (glot::Number::Int(a), glot::Number::Int(b), BinOp::Mul) => {
                self.int_or_float(a.checked_mul(b), a as f64 * b as f64)
            }
            (a, b, BinOp::Div) => self.value(self.env.context.float64(a.as_f64() / b.as_f64())),
            (a, b, BinOp::Add) => self.value(self.env.context.float64(a.as_f64() + b.as_f64())),
            (a, b, BinOp::Sub) => self.value(self.env.context.float64(a.as_f64() - b.as_f64())),
            (a, b, BinOp::Mul) => self.value(self.env.context.float64(a.as_f64() * b.as_f64())),
        }
    }

    fn int_or_float(
        &self,
        exact: Option<i64>,
        approx: f64,
    ) -> core::result::Result<Value, GuestError> {
        match exact {
            Some(value) => self.value(self.env.context.int(value)),
            None => self.value(self.env.context.float64(approx)),
        }
    }

    fn number_of(&self, value: &Value) -> core::result::Result<glot::Number, GuestError> {
        value
            .as_number()
            .map_err(|_| GuestError::runtime("operand is not a number"))
    }
}
