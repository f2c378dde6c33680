use std::fmt;

use chumsky::prelude::*;

use super::{ParseError, Spanned};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Backtick template, pre-split into literal and `${...}` pieces.
    Template(Vec<TemplatePiece>),
    Ident(String),
    /// `@name` reference
    Ref(String),
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    QuestionQuestion,
    Bang,
    Question,
    Colon,
    Semicolon,
    Comma,
    Dot,
    Assign,
    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    BraceOpen,
    BraceClose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePiece {
    Lit(String),
    /// Raw source of a `${...}` interpolation, compiled by the parser.
    Expr(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Template(_) => write!(f, "`...`"),
            Self::Ident(name) => write!(f, "{name}"),
            Self::Ref(name) => write!(f, "@{name}"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Percent => write!(f, "%"),
            Self::PlusPlus => write!(f, "++"),
            Self::MinusMinus => write!(f, "--"),
            Self::PlusEq => write!(f, "+="),
            Self::MinusEq => write!(f, "-="),
            Self::StarEq => write!(f, "*="),
            Self::SlashEq => write!(f, "/="),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::AndAnd => write!(f, "&&"),
            Self::OrOr => write!(f, "||"),
            Self::QuestionQuestion => write!(f, "??"),
            Self::Bang => write!(f, "!"),
            Self::Question => write!(f, "?"),
            Self::Colon => write!(f, ":"),
            Self::Semicolon => write!(f, ";"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::Assign => write!(f, "="),
            Self::ParenOpen => write!(f, "("),
            Self::ParenClose => write!(f, ")"),
            Self::BracketOpen => write!(f, "["),
            Self::BracketClose => write!(f, "]"),
            Self::BraceOpen => write!(f, "{{"),
            Self::BraceClose => write!(f, "}}"),
        }
    }
}

pub fn lexer<'src>()
-> impl Parser<'src, &'src str, Vec<Spanned<Token>>, extra::Err<ParseError<'src, char>>> {
    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Number);

    let escape = just('\\').ignore_then(choice((
        just('\\').to('\\'),
        just('/').to('/'),
        just('"').to('"'),
        just('\'').to('\''),
        just('`').to('`'),
        just('$').to('$'),
        just('n').to('\n'),
        just('r').to('\r'),
        just('t').to('\t'),
        just('0').to('\0'),
    )));

    let double_quoted = none_of("\\\"")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'));
    let single_quoted = none_of("\\'")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('\''), just('\''));
    let string = double_quoted.or(single_quoted).map(Token::Str);

    // Raw capture of a backtick template body: escapes pass through, and
    // `${ ... }` interpolations may contain balanced braces. The captured
    // slice is split into pieces afterwards.
    let brace_content = recursive(|brace_content| {
        choice((
            just('{')
                .then(brace_content)
                .then(just('}'))
                .to_slice()
                .ignored(),
            none_of("{}").ignored(),
        ))
        .repeated()
        .ignored()
    });
    let template_piece = choice((
        just('\\').then(any()).ignored(),
        just("${")
            .then(brace_content)
            .then(just('}'))
            .ignored(),
        none_of("`\\").ignored(),
    ));
    let template = template_piece
        .repeated()
        .to_slice()
        .delimited_by(just('`'), just('`'))
        .map(|raw: &str| Token::Template(split_template(raw)));

    let word = any()
        .filter(|character: &char| {
            character.is_ascii_alphabetic() || *character == '_' || *character == '$'
        })
        .then(
            any()
                .filter(|character: &char| {
                    character.is_ascii_alphanumeric() || *character == '_' || *character == '$'
                })
                .repeated(),
        )
        .to_slice()
        .map(|name: &str| match name {
            "true" => Token::True,
            "false" => Token::False,
            "null" | "undefined" => Token::Null,
            _ => Token::Ident(name.to_string()),
        });

    // @name with the reference grammar [A-Za-z_][A-Za-z0-9_$]*
    let reference = just('@')
        .ignore_then(
            any()
                .filter(|character: &char| {
                    character.is_ascii_alphabetic() || *character == '_'
                })
                .then(
                    any()
                        .filter(|character: &char| {
                            character.is_ascii_alphanumeric()
                                || *character == '_'
                                || *character == '$'
                        })
                        .repeated(),
                )
                .to_slice(),
        )
        .map(|name: &str| Token::Ref(name.to_string()));

    let multi_char_operator = choice((
        just("===").to(Token::EqEq),
        just("!==").to(Token::NotEq),
        just("==").to(Token::EqEq),
        just("!=").to(Token::NotEq),
        just("<=").to(Token::Le),
        just(">=").to(Token::Ge),
        just("&&").to(Token::AndAnd),
        just("||").to(Token::OrOr),
        just("??").to(Token::QuestionQuestion),
        just("++").to(Token::PlusPlus),
        just("--").to(Token::MinusMinus),
        just("+=").to(Token::PlusEq),
        just("-=").to(Token::MinusEq),
        just("*=").to(Token::StarEq),
        just("/=").to(Token::SlashEq),
    ));

    let single_char = choice((
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
        just('=').to(Token::Assign),
        just('!').to(Token::Bang),
        just('?').to(Token::Question),
        just(':').to(Token::Colon),
        just(';').to(Token::Semicolon),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
    ));

    let bracket = choice((
        just('(').to(Token::ParenOpen),
        just(')').to(Token::ParenClose),
        just('[').to(Token::BracketOpen),
        just(']').to(Token::BracketClose),
        just('{').to(Token::BraceOpen),
        just('}').to(Token::BraceClose),
    ));

    let token = choice((
        number,
        string,
        template,
        reference,
        word,
        multi_char_operator,
        bracket,
        single_char,
    ));

    token
        .map_with(|token, extra| Spanned {
            node: token,
            span: extra.span(),
        })
        .padded()
        .recover_with(skip_then_retry_until(any().ignored(), end()))
        .repeated()
        .collect()
}

/// Split a raw template body into literal and interpolation pieces.
/// Escapes in literal pieces are resolved here.
fn split_template(raw: &str) -> Vec<TemplatePiece> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.char_indices().peekable();

    while let Some((at, character)) = chars.next() {
        match character {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    literal.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                }
            }
            '$' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                let start = at + 2;
                let mut depth = 1usize;
                let mut end = raw.len();
                for (inner_at, inner) in chars.by_ref() {
                    match inner {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = inner_at;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if !literal.is_empty() {
                    pieces.push(TemplatePiece::Lit(std::mem::take(&mut literal)));
                }
                pieces.push(TemplatePiece::Expr(raw[start..end].to_string()));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        pieces.push(TemplatePiece::Lit(literal));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::prelude::Parser;

    fn lex(src: &str) -> Vec<Token> {
        lexer()
            .parse(src)
            .output()
            .unwrap()
            .iter()
            .map(|spanned| spanned.node.clone())
            .collect()
    }

    #[test]
    fn lexes_reference_and_member() {
        assert_eq!(
            lex("@ui.counter + 1"),
            vec![
                Token::Ref("ui".into()),
                Token::Dot,
                Token::Ident("counter".into()),
                Token::Plus,
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn at_inside_string_is_not_a_reference() {
        assert_eq!(lex("'user@example.com'"), vec![Token::Str("user@example.com".into())]);
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(lex("a==b"), vec![
            Token::Ident("a".into()),
            Token::EqEq,
            Token::Ident("b".into()),
        ]);
        assert_eq!(lex("x++"), vec![Token::Ident("x".into()), Token::PlusPlus]);
        assert_eq!(lex("x += 1"), vec![
            Token::Ident("x".into()),
            Token::PlusEq,
            Token::Number(1.0),
        ]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(lex(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into())]);
        assert_eq!(lex(r"'it\'s'"), vec![Token::Str("it's".into())]);
    }

    #[test]
    fn keywords() {
        assert_eq!(lex("true false null undefined"), vec![
            Token::True,
            Token::False,
            Token::Null,
            Token::Null,
        ]);
    }

    #[test]
    fn template_pieces() {
        let tokens = lex("`Hello ${name}, you have ${count} items`");
        assert_eq!(
            tokens,
            vec![Token::Template(vec![
                TemplatePiece::Lit("Hello ".into()),
                TemplatePiece::Expr("name".into()),
                TemplatePiece::Lit(", you have ".into()),
                TemplatePiece::Expr("count".into()),
                TemplatePiece::Lit(" items".into()),
            ])]
        );
    }

    #[test]
    fn template_nested_braces() {
        let tokens = lex("`${ {a: 1}.a }`");
        assert_eq!(
            tokens,
            vec![Token::Template(vec![TemplatePiece::Expr(" {a: 1}.a ".into())])]
        );
    }

    #[test]
    fn dollar_locals_lex_as_idents() {
        assert_eq!(lex("$index"), vec![Token::Ident("$index".into())]);
        assert_eq!(lex("$"), vec![Token::Ident("$".into())]);
    }
}
