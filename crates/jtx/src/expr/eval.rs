//! Tree-walking evaluation of compiled programs.
//!
//! The evaluator is engine-agnostic: everything that touches definitions,
//! elements, or the network goes through [`EvalHost`]. The engine implements
//! the host per binding/handler run, which is also where dependency
//! recording happens.

use crate::value::Value;

use super::parser::{AssignOp, BinaryOp, Expr, LogicalOp, TemplatePart, UnaryOp};
use super::{Mode, Program};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("unknown identifier `{0}`")]
    UnknownIdent(String),
    #[error("unknown helper `{0}`")]
    UnknownHelper(String),
    #[error("`{0}` is not callable")]
    NotCallable(String),
    #[error("assignment target must be a `@name` path")]
    BadAssignTarget,
    #[error("`@{0}` is read-only")]
    ReadOnly(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("{0}")]
    Message(String),
}

/// The evaluation surface the engine provides.
pub trait EvalHost {
    /// Look up a per-run local (`item`, `$`, `$index`, `$key`, `$root`,
    /// `$event`, `$el`).
    fn local(&self, name: &str) -> Option<Value>;

    /// Resolve `@name` to its full value (recording the dependency).
    /// Unknown names yield an empty object after warning.
    fn ref_value(&mut self, name: &str) -> Value;

    /// Read a path below `@name`; the first segment goes through key
    /// aliasing, sources answer `$status`/`$error` here.
    fn ref_path(&mut self, name: &str, path: &[String]) -> Value;

    /// Primitive coercion of `@name` for scalar contexts.
    fn ref_coerced(&mut self, name: &str) -> Value;

    /// Write through `@name` at `path`. Fails for sources and unknown names.
    fn ref_assign(&mut self, name: &str, path: &[String], value: Value)
        -> Result<(), EvalError>;

    /// Methods on references: currently only `refresh` on sources.
    fn ref_method(
        &mut self,
        name: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError>;

    /// Whitelisted helper calls: `emit`, `refresh`, `get`, `post`, `put`,
    /// `patch`, `del`.
    fn call_helper(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError>;
}

/// Run a program, returning the value of its last statement.
pub fn run_program(host: &mut dyn EvalHost, program: &Program) -> Result<Value, EvalError> {
    let mut last = Value::Null;
    for expr in program.body.iter() {
        last = eval(host, expr)?;
    }
    Ok(last)
}

/// Run a program in a scalar context: a bare `@name` result goes through
/// primitive coercion, which is what text-ish bindings want.
pub fn run_program_scalar(
    host: &mut dyn EvalHost,
    program: &Program,
) -> Result<Value, EvalError> {
    if program.mode == Mode::Expression {
        if let Some(Expr::Ref(name)) = program.body.first() {
            return Ok(host.ref_coerced(name));
        }
    }
    run_program(host, program)
}

pub fn eval(host: &mut dyn EvalHost, expr: &Expr) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ref(name) => Ok(host.ref_value(name)),
        Expr::Ident(name) => host
            .local(name)
            .ok_or_else(|| EvalError::UnknownIdent(name.to_string())),
        Expr::Member(_, _) | Expr::Index(_, _) => {
            if let Some((name, path)) = try_ref_path(host, expr)? {
                Ok(host.ref_path(&name, &path))
            } else {
                eval_plain_access(host, expr)
            }
        }
        Expr::Call(callee, args) => eval_call(host, callee, args),
        Expr::Unary(op, inner) => {
            let value = eval_scalar(host, inner)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.truthy()),
                UnaryOp::Neg => Value::number(-value.to_number()),
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval_scalar(host, lhs)?;
            let right = eval_scalar(host, rhs)?;
            Ok(apply_binary(*op, &left, &right))
        }
        Expr::Logical(op, lhs, rhs) => {
            let left = eval(host, lhs)?;
            match op {
                LogicalOp::And => {
                    if left.truthy() {
                        eval(host, rhs)
                    } else {
                        Ok(left)
                    }
                }
                LogicalOp::Or => {
                    if left.truthy() {
                        Ok(left)
                    } else {
                        eval(host, rhs)
                    }
                }
                LogicalOp::Nullish => {
                    if left.is_null() {
                        eval(host, rhs)
                    } else {
                        Ok(left)
                    }
                }
            }
        }
        Expr::Ternary(cond, then, otherwise) => {
            if eval(host, cond)?.truthy() {
                eval(host, then)
            } else {
                eval(host, otherwise)
            }
        }
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(host, item)?);
            }
            Ok(Value::list(values))
        }
        Expr::ObjectLit(fields) => {
            let mut entries = Vec::with_capacity(fields.len());
            for (key, value_expr) in fields {
                entries.push((key.clone(), eval(host, value_expr)?));
            }
            Ok(Value::object(entries))
        }
        Expr::Template(parts) => {
            let mut text = String::new();
            for part in parts {
                match part {
                    TemplatePart::Lit(literal) => text.push_str(literal),
                    TemplatePart::Expr(inner) => {
                        text.push_str(&eval_scalar(host, inner)?.to_text())
                    }
                }
            }
            Ok(Value::text(text))
        }
        Expr::Assign { op, target, value } => {
            let (name, path) = resolve_place(host, target)?;
            let new_value = eval(host, value)?;
            let stored = match op {
                AssignOp::Set => new_value,
                compound => {
                    let current = host.ref_path(&name, &path);
                    apply_compound(*compound, &current, &new_value)
                }
            };
            host.ref_assign(&name, &path, stored.clone())?;
            Ok(stored)
        }
        Expr::Increment {
            target,
            delta,
            prefix,
        } => {
            let (name, path) = resolve_place(host, target)?;
            let old = host.ref_path(&name, &path).to_number();
            let new = old + delta;
            host.ref_assign(&name, &path, Value::number(new))?;
            Ok(Value::number(if *prefix { new } else { old }))
        }
    }
}

/// Evaluate in scalar position: a bare reference coerces to its canonical
/// single value so `@name` interpolates usefully.
fn eval_scalar(host: &mut dyn EvalHost, expr: &Expr) -> Result<Value, EvalError> {
    match expr {
        Expr::Ref(name) => Ok(host.ref_coerced(name)),
        other => eval(host, other),
    }
}

/// If the access chain is rooted at a reference, flatten it into a path so
/// the host can apply key aliasing and `$status`-style members.
fn try_ref_path(
    host: &mut dyn EvalHost,
    expr: &Expr,
) -> Result<Option<(String, Vec<String>)>, EvalError> {
    match expr {
        Expr::Ref(name) => Ok(Some((name.to_string(), Vec::new()))),
        Expr::Member(inner, key) => Ok(try_ref_path(host, inner)?.map(|(name, mut path)| {
            path.push(key.to_string());
            (name, path)
        })),
        Expr::Index(inner, index_expr) => {
            let Some((name, mut path)) = try_ref_path(host, inner)? else {
                return Ok(None);
            };
            let index = eval(host, index_expr)?;
            path.push(index.to_text());
            Ok(Some((name, path)))
        }
        _ => Ok(None),
    }
}

fn eval_plain_access(host: &mut dyn EvalHost, expr: &Expr) -> Result<Value, EvalError> {
    match expr {
        Expr::Member(inner, key) => {
            let value = eval(host, inner)?;
            Ok(member_of(&value, key))
        }
        Expr::Index(inner, index_expr) => {
            let value = eval(host, inner)?;
            let index = eval(host, index_expr)?;
            Ok(member_of(&value, &index.to_text()))
        }
        _ => unreachable!("eval_plain_access is only called for member/index"),
    }
}

/// Member read on a plain value. Lists and text answer `length`.
pub fn member_of(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(fields) => fields.get(key).cloned().unwrap_or(Value::Null),
        Value::List(items) => {
            if key == "length" {
                Value::int(items.len() as i64)
            } else {
                key.parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index).cloned())
                    .unwrap_or(Value::Null)
            }
        }
        Value::Text(text) => {
            if key == "length" {
                Value::int(text.chars().count() as i64)
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

fn eval_call(
    host: &mut dyn EvalHost,
    callee: &Expr,
    args: &[Expr],
) -> Result<Value, EvalError> {
    // refresh on a reference: @feed.refresh()
    if let Expr::Member(inner, method) = callee {
        if let Expr::Ref(name) = inner.as_ref() {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(host, arg)?);
            }
            return host.ref_method(name, method, values);
        }
        return Err(EvalError::NotCallable(method.to_string()));
    }

    let Expr::Ident(helper) = callee else {
        return Err(EvalError::NotCallable("expression".to_string()));
    };

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        // `refresh(@feed)` names the source rather than reading it.
        if helper.as_ref() == "refresh" {
            if let Expr::Ref(name) = arg {
                values.push(Value::text(name.to_string()));
                continue;
            }
        }
        values.push(eval(host, arg)?);
    }
    host.call_helper(helper, values)
}

fn resolve_place(
    host: &mut dyn EvalHost,
    target: &Expr,
) -> Result<(String, Vec<String>), EvalError> {
    try_ref_path(host, target)?.ok_or(EvalError::BadAssignTarget)
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if matches!(left, Value::Text(_)) || matches!(right, Value::Text(_)) {
                Value::text(format!("{}{}", left.to_text(), right.to_text()))
            } else {
                Value::number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::Lt => compare(left, right, |ordering| ordering.is_lt()),
        BinaryOp::Le => compare(left, right, |ordering| ordering.is_le()),
        BinaryOp::Gt => compare(left, right, |ordering| ordering.is_gt()),
        BinaryOp::Ge => compare(left, right, |ordering| ordering.is_ge()),
    }
}

fn apply_compound(op: AssignOp, current: &Value, operand: &Value) -> Value {
    match op {
        AssignOp::Set => operand.clone(),
        AssignOp::Add => apply_binary(BinaryOp::Add, current, operand),
        AssignOp::Sub => apply_binary(BinaryOp::Sub, current, operand),
        AssignOp::Mul => apply_binary(BinaryOp::Mul, current, operand),
        AssignOp::Div => apply_binary(BinaryOp::Div, current, operand),
    }
}

/// Structural equality, with text/number/bool cross-comparisons going
/// through numeric coercion.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if std::mem::discriminant(left) == std::mem::discriminant(right) {
        return left == right;
    }
    let comparable = |value: &Value| {
        matches!(value, Value::Bool(_) | Value::Number(_) | Value::Text(_))
    };
    if comparable(left) && comparable(right) {
        let l = left.to_number();
        let r = right.to_number();
        return !l.is_nan() && l == r;
    }
    false
}

fn compare(left: &Value, right: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if let (Value::Text(l), Value::Text(r)) = (left, right) {
        return Value::Bool(check(l.cmp(r)));
    }
    let l = left.to_number();
    let r = right.to_number();
    match l.partial_cmp(&r) {
        Some(ordering) => Value::Bool(check(ordering)),
        None => Value::Bool(false),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{compile_expression, compile_statements};
    use super::*;
    use rustc_hash::FxHashMap;

    /// Minimal host with one writable definition per name.
    #[derive(Default)]
    struct TestHost {
        defs: FxHashMap<String, Value>,
        locals: FxHashMap<String, Value>,
        emitted: Vec<(String, Value)>,
    }

    impl EvalHost for TestHost {
        fn local(&self, name: &str) -> Option<Value> {
            self.locals.get(name).cloned()
        }

        fn ref_value(&mut self, name: &str) -> Value {
            self.defs
                .get(name)
                .cloned()
                .unwrap_or_else(|| Value::object([] as [(&str, Value); 0]))
        }

        fn ref_path(&mut self, name: &str, path: &[String]) -> Value {
            let mut value = self.ref_value(name);
            for segment in path {
                value = member_of(&value, segment);
            }
            value
        }

        fn ref_coerced(&mut self, name: &str) -> Value {
            let value = self.ref_value(name);
            let Some(fields) = value.as_object() else {
                return value;
            };
            for key in ["title", "text", "name", "value"] {
                if let Some(found) = fields.get(key) {
                    return found.clone();
                }
            }
            if fields.len() == 1 {
                return fields.values().next().cloned().unwrap_or(Value::Null);
            }
            value
        }

        fn ref_assign(
            &mut self,
            name: &str,
            path: &[String],
            value: Value,
        ) -> Result<(), EvalError> {
            let entry = self
                .defs
                .entry(name.to_string())
                .or_insert_with(|| Value::object([] as [(&str, Value); 0]));
            crate::util::set_path(entry, path, value);
            Ok(())
        }

        fn ref_method(
            &mut self,
            name: &str,
            method: &str,
            _args: Vec<Value>,
        ) -> Result<Value, EvalError> {
            if method == "refresh" {
                self.emitted.push((format!("refresh:{name}"), Value::Null));
                Ok(Value::Null)
            } else {
                Err(EvalError::NotCallable(method.to_string()))
            }
        }

        fn call_helper(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
            match name {
                "emit" => {
                    let event = args.first().cloned().unwrap_or(Value::Null);
                    let detail = args.get(1).cloned().unwrap_or(Value::Null);
                    self.emitted.push((event.to_text(), detail));
                    Ok(Value::Null)
                }
                other => Err(EvalError::UnknownHelper(other.to_string())),
            }
        }
    }

    fn eval_expr(host: &mut TestHost, src: &str) -> Value {
        let program = compile_expression(src).unwrap();
        run_program(host, &program).unwrap()
    }

    #[test]
    fn arithmetic_and_precedence() {
        let mut host = TestHost::default();
        assert_eq!(eval_expr(&mut host, "1 + 2 * 3"), Value::int(7));
        assert_eq!(eval_expr(&mut host, "(1 + 2) * 3"), Value::int(9));
        assert_eq!(eval_expr(&mut host, "7 % 4"), Value::int(3));
        assert_eq!(eval_expr(&mut host, "-2 + 1"), Value::int(-1));
    }

    #[test]
    fn string_concatenation() {
        let mut host = TestHost::default();
        assert_eq!(eval_expr(&mut host, "'a' + 1"), Value::text("a1"));
        assert_eq!(eval_expr(&mut host, "1 + '2'"), Value::text("12"));
    }

    #[test]
    fn reference_reads() {
        let mut host = TestHost::default();
        host.defs.insert(
            "ui".to_string(),
            Value::object([("counter", Value::int(4))]),
        );
        assert_eq!(eval_expr(&mut host, "@ui.counter + 1"), Value::int(5));
        // Unknown reference reads as empty object, members as null
        assert_eq!(eval_expr(&mut host, "@nope.field"), Value::Null);
    }

    #[test]
    fn reference_writes() {
        let mut host = TestHost::default();
        host.defs.insert(
            "ui".to_string(),
            Value::object([("counter", Value::int(0))]),
        );
        let program = compile_statements("@ui.counter++; @ui.counter += 2").unwrap();
        run_program(&mut host, &program).unwrap();
        assert_eq!(
            host.defs["ui"].get("counter"),
            Some(&Value::int(3))
        );
    }

    #[test]
    fn nested_write_creates_intermediates() {
        let mut host = TestHost::default();
        let program = compile_statements("@ui.user.name = 'ada'").unwrap();
        run_program(&mut host, &program).unwrap();
        assert_eq!(
            crate::util::get_path(&host.defs["ui"], &crate::util::parse_path("user.name")),
            Value::text("ada")
        );
    }

    #[test]
    fn locals_shadow_helpers() {
        let mut host = TestHost::default();
        host.locals.insert("item".to_string(), Value::object([("id", Value::int(7))]));
        host.locals.insert("$index".to_string(), Value::int(2));
        assert_eq!(eval_expr(&mut host, "item.id"), Value::int(7));
        assert_eq!(eval_expr(&mut host, "$index * 10"), Value::int(20));
    }

    #[test]
    fn unknown_identifier_errors() {
        let mut host = TestHost::default();
        let program = compile_expression("missing + 1").unwrap();
        assert!(matches!(
            run_program(&mut host, &program),
            Err(EvalError::UnknownIdent(_))
        ));
    }

    #[test]
    fn short_circuit() {
        let mut host = TestHost::default();
        // The right side would error if evaluated
        assert_eq!(eval_expr(&mut host, "false && missing"), Value::Bool(false));
        assert_eq!(eval_expr(&mut host, "'x' || missing"), Value::text("x"));
        assert_eq!(eval_expr(&mut host, "null ?? 'fallback'"), Value::text("fallback"));
    }

    #[test]
    fn ternary_and_comparisons() {
        let mut host = TestHost::default();
        assert_eq!(eval_expr(&mut host, "2 > 1 ? 'a' : 'b'"), Value::text("a"));
        assert_eq!(eval_expr(&mut host, "'2' == 2"), Value::Bool(true));
        assert_eq!(eval_expr(&mut host, "'b' > 'a'"), Value::Bool(true));
        assert_eq!(eval_expr(&mut host, "null == null"), Value::Bool(true));
        assert_eq!(eval_expr(&mut host, "null == 0"), Value::Bool(false));
    }

    #[test]
    fn emit_helper() {
        let mut host = TestHost::default();
        let program = compile_statements("emit('saved', { id: 3 })").unwrap();
        run_program(&mut host, &program).unwrap();
        assert_eq!(host.emitted.len(), 1);
        assert_eq!(host.emitted[0].0, "saved");
    }

    #[test]
    fn refresh_accepts_reference_argument() {
        let mut host = TestHost::default();
        let program = compile_statements("@feed.refresh()").unwrap();
        run_program(&mut host, &program).unwrap();
        assert_eq!(host.emitted[0].0, "refresh:feed");
    }

    #[test]
    fn scalar_coercion_of_bare_reference() {
        let mut host = TestHost::default();
        host.defs.insert(
            "user".to_string(),
            Value::object([("name", Value::text("ada")), ("age", Value::int(36))]),
        );
        let program = compile_expression("@user").unwrap();
        assert_eq!(
            run_program_scalar(&mut host, &program).unwrap(),
            Value::text("ada")
        );
        // Inside concatenation the coercion also applies
        assert_eq!(
            eval_expr(&mut host, "'hi ' + @user"),
            Value::text("hi ada")
        );
    }

    #[test]
    fn list_length_member() {
        let mut host = TestHost::default();
        host.defs.insert(
            "ui".to_string(),
            Value::object([("items", Value::list([Value::int(1), Value::int(2)]))]),
        );
        assert_eq!(eval_expr(&mut host, "@ui.items.length"), Value::int(2));
    }

    #[test]
    fn template_evaluation() {
        let mut host = TestHost::default();
        host.defs.insert(
            "ui".to_string(),
            Value::object([("counter", Value::int(3))]),
        );
        assert_eq!(
            eval_expr(&mut host, "`count: ${@ui.counter + 1}`"),
            Value::text("count: 4")
        );
    }
}
