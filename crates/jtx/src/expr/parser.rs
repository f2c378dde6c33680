use std::sync::Arc;

use chumsky::input::ValueInput;
use chumsky::pratt::{infix, left, postfix, prefix};
use chumsky::prelude::*;

use super::lexer::TemplatePiece;
use super::{ParseError, Span, Token};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `@name`
    Ref(Arc<str>),
    /// Local variable or helper name
    Ident(Arc<str>),
    Member(Box<Expr>, Arc<str>),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Short-circuiting operators, separate from `Binary` so the right-hand
    /// side is only evaluated when needed.
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    ObjectLit(Vec<(Arc<str>, Expr)>),
    Template(Vec<TemplatePart>),
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Increment {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Lit(Arc<str>),
    Expr(Box<Expr>),
}

pub fn parser<'src, I>()
-> impl Parser<'src, I, Vec<Expr>, extra::Err<ParseError<'src, Token>>>
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    let expression = recursive(|expression| {
        let ident = select! { Token::Ident(name) => name };

        let literal = select! {
            Token::Number(n) => Expr::Literal(Value::number(n)),
            Token::Str(s) => Expr::Literal(Value::text(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
        };

        let reference =
            select! { Token::Ref(name) => Expr::Ref(Arc::from(name.as_str())) };

        let template = select! { Token::Template(pieces) => pieces }.try_map(
            |pieces: Vec<TemplatePiece>, span| {
                let mut parts = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    match piece {
                        TemplatePiece::Lit(text) => {
                            parts.push(TemplatePart::Lit(Arc::from(text.as_str())))
                        }
                        TemplatePiece::Expr(source) => {
                            let program = super::compile_expression(&source)
                                .map_err(|error| {
                                    ParseError::custom(span, error.message.clone())
                                })?;
                            let expr = program.body.first().cloned().ok_or_else(|| {
                                ParseError::custom(span, "empty interpolation")
                            })?;
                            parts.push(TemplatePart::Expr(Box::new(expr)));
                        }
                    }
                }
                Ok(Expr::Template(parts))
            },
        );

        let array = expression
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Expr::Array);

        let object_key = select! {
            Token::Ident(name) => name,
            Token::Str(text) => text,
        };
        let object = group((object_key, just(Token::Colon), expression.clone()))
            .map(|(key, _, value)| (Arc::from(key.as_str()), value))
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect()
            .delimited_by(just(Token::BraceOpen), just(Token::BraceClose))
            .map(Expr::ObjectLit);

        let nested = expression
            .clone()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let atom = choice((
            literal,
            template,
            reference,
            ident.map(|name: String| Expr::Ident(Arc::from(name.as_str()))),
            array,
            object,
            nested,
        ));

        let member_name = just(Token::Dot).ignore_then(ident);
        let index = expression
            .clone()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose));
        let call_args = expression
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let operated = atom.pratt((
            // Postfix chains: member access, indexing, calls
            postfix(15, member_name, |lhs, name: String, _extra| {
                Expr::Member(Box::new(lhs), Arc::from(name.as_str()))
            }),
            postfix(15, index, |lhs, idx, _extra| {
                Expr::Index(Box::new(lhs), Box::new(idx))
            }),
            postfix(15, call_args, |lhs, args, _extra| {
                Expr::Call(Box::new(lhs), args)
            }),
            // Increment / decrement
            postfix(14, just(Token::PlusPlus), |lhs, _, _extra| Expr::Increment {
                target: Box::new(lhs),
                delta: 1.0,
                prefix: false,
            }),
            postfix(14, just(Token::MinusMinus), |lhs, _, _extra| Expr::Increment {
                target: Box::new(lhs),
                delta: -1.0,
                prefix: false,
            }),
            prefix(13, just(Token::PlusPlus), |_, rhs, _extra| Expr::Increment {
                target: Box::new(rhs),
                delta: 1.0,
                prefix: true,
            }),
            prefix(13, just(Token::MinusMinus), |_, rhs, _extra| Expr::Increment {
                target: Box::new(rhs),
                delta: -1.0,
                prefix: true,
            }),
            prefix(13, just(Token::Bang), |_, rhs, _extra| {
                Expr::Unary(UnaryOp::Not, Box::new(rhs))
            }),
            prefix(13, just(Token::Minus), |_, rhs, _extra| {
                Expr::Unary(UnaryOp::Neg, Box::new(rhs))
            }),
            // Arithmetic
            infix(left(12), just(Token::Star), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Mul, Box::new(l), Box::new(r))
            }),
            infix(left(12), just(Token::Slash), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Div, Box::new(l), Box::new(r))
            }),
            infix(left(12), just(Token::Percent), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Rem, Box::new(l), Box::new(r))
            }),
            infix(left(11), just(Token::Plus), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Add, Box::new(l), Box::new(r))
            }),
            infix(left(11), just(Token::Minus), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Sub, Box::new(l), Box::new(r))
            }),
            // Comparison
            infix(left(10), just(Token::Lt), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Lt, Box::new(l), Box::new(r))
            }),
            infix(left(10), just(Token::Le), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Le, Box::new(l), Box::new(r))
            }),
            infix(left(10), just(Token::Gt), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Gt, Box::new(l), Box::new(r))
            }),
            infix(left(10), just(Token::Ge), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Ge, Box::new(l), Box::new(r))
            }),
            // Equality
            infix(left(9), just(Token::EqEq), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Eq, Box::new(l), Box::new(r))
            }),
            infix(left(9), just(Token::NotEq), |l, _, r, _extra| {
                Expr::Binary(BinaryOp::Ne, Box::new(l), Box::new(r))
            }),
            // Logical
            infix(left(8), just(Token::AndAnd), |l, _, r, _extra| {
                Expr::Logical(LogicalOp::And, Box::new(l), Box::new(r))
            }),
            infix(left(7), just(Token::OrOr), |l, _, r, _extra| {
                Expr::Logical(LogicalOp::Or, Box::new(l), Box::new(r))
            }),
            infix(left(7), just(Token::QuestionQuestion), |l, _, r, _extra| {
                Expr::Logical(LogicalOp::Nullish, Box::new(l), Box::new(r))
            }),
        ));

        let ternary = operated
            .then(
                group((
                    just(Token::Question),
                    expression.clone(),
                    just(Token::Colon),
                    expression.clone(),
                ))
                .or_not(),
            )
            .map(|(cond, tail)| match tail {
                Some((_, then, _, otherwise)) => Expr::Ternary(
                    Box::new(cond),
                    Box::new(then),
                    Box::new(otherwise),
                ),
                None => cond,
            });

        let assign_op = select! {
            Token::Assign => AssignOp::Set,
            Token::PlusEq => AssignOp::Add,
            Token::MinusEq => AssignOp::Sub,
            Token::StarEq => AssignOp::Mul,
            Token::SlashEq => AssignOp::Div,
        };

        ternary
            .then(assign_op.then(expression.clone()).or_not())
            .map(|(lhs, tail)| match tail {
                Some((op, value)) => Expr::Assign {
                    op,
                    target: Box::new(lhs),
                    value: Box::new(value),
                },
                None => lhs,
            })
    });

    expression
        .separated_by(just(Token::Semicolon))
        .allow_trailing()
        .collect()
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::super::{compile_expression, compile_statements};
    use super::*;

    fn parse_one(src: &str) -> Expr {
        compile_expression(src).unwrap().body[0].clone()
    }

    #[test]
    fn member_chain() {
        let expr = parse_one("@state.user.email");
        let Expr::Member(inner, email) = expr else {
            panic!("expected member");
        };
        assert_eq!(email.as_ref(), "email");
        let Expr::Member(root, user) = *inner else {
            panic!("expected member");
        };
        assert_eq!(user.as_ref(), "user");
        assert_eq!(*root, Expr::Ref(Arc::from("state")));
    }

    #[test]
    fn precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let Expr::Binary(BinaryOp::Add, _, rhs) = parse_one("1 + 2 * 3") else {
            panic!("expected add at the top");
        };
        assert!(matches!(*rhs, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn comparison_binds_tighter_than_logic() {
        let Expr::Logical(LogicalOp::And, lhs, _) = parse_one("a < 2 && b") else {
            panic!("expected && at the top");
        };
        assert!(matches!(*lhs, Expr::Binary(BinaryOp::Lt, _, _)));
    }

    #[test]
    fn ternary() {
        assert!(matches!(
            parse_one("@ui.on ? 'yes' : 'no'"),
            Expr::Ternary(_, _, _)
        ));
    }

    #[test]
    fn call_with_arguments() {
        let Expr::Call(callee, args) = parse_one("emit('saved', { ok: true })") else {
            panic!("expected call");
        };
        assert_eq!(*callee, Expr::Ident(Arc::from("emit")));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn postfix_increment() {
        let program = compile_statements("@ui.counter++").unwrap();
        assert!(matches!(
            &program.body[0],
            Expr::Increment { prefix: false, delta, .. } if *delta == 1.0
        ));
    }

    #[test]
    fn compound_assignment() {
        let program = compile_statements("@ui.total += 5").unwrap();
        assert!(matches!(
            &program.body[0],
            Expr::Assign { op: AssignOp::Add, .. }
        ));
    }

    #[test]
    fn array_and_object_literals() {
        assert!(matches!(parse_one("[1, 2, 3]"), Expr::Array(items) if items.len() == 3));
        let Expr::ObjectLit(fields) = parse_one("{ id: 1, 'the title': 'x' }") else {
            panic!("expected object literal");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].0.as_ref(), "the title");
    }

    #[test]
    fn template_with_interpolation() {
        let Expr::Template(parts) = parse_one("`count: ${@ui.counter}`") else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], TemplatePart::Lit(text) if text.as_ref() == "count: "));
        assert!(matches!(&parts[1], TemplatePart::Expr(_)));
    }

    #[test]
    fn index_expression() {
        let Expr::Index(inner, index) = parse_one("@ui.items[@ui.cursor + 1]") else {
            panic!("expected index");
        };
        assert!(matches!(*inner, Expr::Member(_, _)));
        assert!(matches!(*index, Expr::Binary(BinaryOp::Add, _, _)));
    }
}
