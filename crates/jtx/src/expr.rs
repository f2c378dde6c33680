//! The binding expression language.
//!
//! Attribute values are compiled once into a small AST and evaluated by a
//! tree walker. The language covers literals, member access and indexing,
//! arithmetic/logical/comparison operators, ternaries, array and object
//! literals, template strings, assignment forms on `@name` references, and
//! calls on a whitelist of helpers. `@name` is a first-class reference node:
//! reads compile to getter call sites, writes to setter call sites, and the
//! evaluator rejects writes through anything but a state reference.

use std::fmt;
use std::sync::Arc;

use chumsky::prelude::*;

mod lexer;
pub use lexer::{lexer, Token};

mod parser;
pub use parser::{parser, AssignOp, BinaryOp, Expr, LogicalOp, TemplatePart, UnaryOp};

pub mod eval;
pub use eval::{EvalError, EvalHost};

pub type Span = SimpleSpan;
pub type ParseError<'src, T> = Rich<'src, T, Span>;

/// Spanned token produced by the lexer.
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

/// End-of-input span for the token-stream adapter.
pub fn span_at(offset: usize) -> Span {
    (offset..offset).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A single expression; assignments are rejected.
    Expression,
    /// Semicolon-separated statements, assignment forms allowed.
    Statements,
}

/// A compiled attribute expression. Cheap to clone: list blueprints re-bind
/// the same program for every rendered item.
#[derive(Debug, Clone)]
pub struct Program {
    pub source: Arc<str>,
    pub body: Arc<Vec<Expr>>,
    pub mode: Mode,
}

/// Compile failure with rendered diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn from_rich<T: fmt::Display>(source: &str, errors: Vec<ParseError<'_, T>>) -> Self {
        let rendered: Vec<String> = errors
            .iter()
            .map(|error| format!("{} at {:?} in `{source}`", error.reason(), error.span()))
            .collect();
        Self::new(rendered.join("; "))
    }
}

/// Compile a read-only expression (bindings, key derivation, headers).
pub fn compile_expression(source: &str) -> Result<Program, CompileError> {
    compile(source, Mode::Expression)
}

/// Compile a handler body: statements separated by `;`.
pub fn compile_statements(source: &str) -> Result<Program, CompileError> {
    compile(source, Mode::Statements)
}

fn compile(source: &str, mode: Mode) -> Result<Program, CompileError> {
    let (tokens, lex_errors) = lexer().parse(source).into_output_errors();
    if !lex_errors.is_empty() {
        return Err(CompileError::from_rich(source, lex_errors));
    }
    let tokens = tokens.unwrap_or_default();

    let input = tokens.map(span_at(source.len()), |Spanned { node, span }| {
        (node, span)
    });
    let (body, parse_errors) = parser().parse(input).into_output_errors();
    if !parse_errors.is_empty() {
        return Err(CompileError::from_rich(source, parse_errors));
    }
    let body = body.unwrap_or_default();
    if body.is_empty() {
        return Err(CompileError::new(format!("empty expression: `{source}`")));
    }
    if mode == Mode::Expression {
        if body.len() > 1 {
            return Err(CompileError::new(format!(
                "expected a single expression: `{source}`"
            )));
        }
        for expr in &body {
            reject_assignments(expr, source)?;
        }
    }
    for expr in &body {
        validate_assign_targets(expr, source)?;
    }
    Ok(Program {
        source: Arc::from(source),
        body: Arc::new(body),
        mode,
    })
}

fn reject_assignments(expr: &Expr, source: &str) -> Result<(), CompileError> {
    let mut found = false;
    walk(expr, &mut |node| {
        if matches!(node, Expr::Assign { .. } | Expr::Increment { .. }) {
            found = true;
        }
    });
    if found {
        Err(CompileError::new(format!(
            "assignment is not allowed in this position: `{source}`"
        )))
    } else {
        Ok(())
    }
}

fn validate_assign_targets(expr: &Expr, source: &str) -> Result<(), CompileError> {
    let mut bad = false;
    walk(expr, &mut |node| {
        let target = match node {
            Expr::Assign { target, .. } => target,
            Expr::Increment { target, .. } => target,
            _ => return,
        };
        if !is_place(target) {
            bad = true;
        }
    });
    if bad {
        Err(CompileError::new(format!(
            "assignment target must be a `@name` path: `{source}`"
        )))
    } else {
        Ok(())
    }
}

/// A writable place is a member/index chain rooted at a reference.
fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Ref(_) => true,
        Expr::Member(inner, _) => is_place(inner),
        Expr::Index(inner, _) => is_place(inner),
        _ => false,
    }
}

/// Does the program mention any of the given local names (or `$`-locals)?
/// The list engine uses this to decide between an eager snapshot and a live
/// binding for each item attribute.
pub fn references_local(program: &Program, locals: &[&str]) -> bool {
    let mut found = false;
    for expr in program.body.iter() {
        walk(expr, &mut |node| {
            if let Expr::Ident(name) = node {
                if locals.contains(&name.as_ref()) {
                    found = true;
                }
            }
        });
    }
    found
}

/// Pre-order walk over every sub-expression.
pub fn walk(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Literal(_) | Expr::Ref(_) | Expr::Ident(_) => {}
        Expr::Member(inner, _) => walk(inner, visit),
        Expr::Index(inner, index) => {
            walk(inner, visit);
            walk(index, visit);
        }
        Expr::Call(callee, args) => {
            walk(callee, visit);
            for arg in args {
                walk(arg, visit);
            }
        }
        Expr::Unary(_, inner) => walk(inner, visit),
        Expr::Binary(_, lhs, rhs) | Expr::Logical(_, lhs, rhs) => {
            walk(lhs, visit);
            walk(rhs, visit);
        }
        Expr::Ternary(cond, then, otherwise) => {
            walk(cond, visit);
            walk(then, visit);
            walk(otherwise, visit);
        }
        Expr::Array(items) => {
            for item in items {
                walk(item, visit);
            }
        }
        Expr::ObjectLit(fields) => {
            for (_, value) in fields {
                walk(value, visit);
            }
        }
        Expr::Template(parts) => {
            for part in parts {
                if let TemplatePart::Expr(inner) = part {
                    walk(inner, visit);
                }
            }
        }
        Expr::Assign { target, value, .. } => {
            walk(target, visit);
            walk(value, visit);
        }
        Expr::Increment { target, .. } => walk(target, visit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_simple_expressions() {
        assert!(compile_expression("@ui.counter + 1").is_ok());
        assert!(compile_expression("items.length").is_ok());
        assert!(compile_expression("a ? b : c").is_ok());
    }

    #[test]
    fn expression_mode_rejects_assignment() {
        assert!(compile_expression("@ui.counter = 1").is_err());
        assert!(compile_expression("@ui.counter++").is_err());
        assert!(compile_statements("@ui.counter = 1").is_ok());
    }

    #[test]
    fn assignment_target_must_be_reference_path() {
        assert!(compile_statements("item = 1").is_err());
        assert!(compile_statements("@ui.user.name = 'ada'").is_ok());
        assert!(compile_statements("@ui.items[0] = 1").is_ok());
        assert!(compile_statements("1 = 2").is_err());
    }

    #[test]
    fn statements_split_on_semicolons() {
        let program = compile_statements("@ui.a = 1; @ui.b = 2;").unwrap();
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn local_reference_detection() {
        let program = compile_expression("item.title + @ui.suffix").unwrap();
        assert!(references_local(&program, &["item", "$index"]));
        assert!(!references_local(&program, &["$key"]));

        let no_locals = compile_expression("@ui.title").unwrap();
        assert!(!references_local(&no_locals, &["item"]));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(compile_expression("").is_err());
        assert!(compile_expression("   ").is_err());
    }
}
