//! Pratt parser producing [`Expr`] trees.
//!
//! Binding powers, loosest first: ternary, `or`, `and`, prefix `not`,
//! comparison and `in`, `&`, additive, multiplicative, unary minus, then
//! postfix path steps (`.name`, `[index]`).

use std::sync::Arc;

use serde_json::{Number, Value};

use super::SyntaxError;
use super::ast::{BinaryOp, Expr, Lambda, UnaryOp};
use super::lexer::{Spanned, Token, tokenize};

const BP_TERNARY: u8 = 1;
const BP_NOT: u8 = 4;
const BP_UNARY: u8 = 9;

/// Deepest tree the parser will build. Brackets, operands and path steps
/// each count one level.
pub const MAX_NESTING: usize = 64;

/// Parse a complete expression body (without `{{ }}` delimiters).
pub fn parse(src: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(SyntaxError::new(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
        depth: 0,
    };
    let expr = parser.expression(0)?;
    if let Some(extra) = parser.peek_spanned() {
        return Err(SyntaxError::new(
            extra.pos,
            format!("unexpected token {}", describe(&extra.token)),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), SyntaxError> {
        if self.eat(expected) {
            return Ok(());
        }
        let found = self.peek().map(describe).unwrap_or_else(|| "end of expression".into());
        Err(SyntaxError::new(
            self.offset(),
            format!("expected {} but found {found}", describe(expected)),
        ))
    }

    /// One level deeper into the tree.
    fn descend(&mut self) -> Result<(), SyntaxError> {
        if self.depth >= MAX_NESTING {
            return Err(SyntaxError::new(
                self.offset(),
                format!("expression nested more than {MAX_NESTING} levels deep"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, SyntaxError> {
        let depth = self.depth;
        self.descend()?;
        let expr = self.expression_tail(min_bp)?;
        self.depth = depth;
        Ok(expr)
    }

    fn expression_tail(&mut self, min_bp: u8) -> Result<Expr, SyntaxError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(token) = self.peek() else { break };

            if *token == Token::Question {
                if BP_TERNARY < min_bp {
                    break;
                }
                self.pos += 1;
                self.descend()?;
                let then = self.expression(BP_TERNARY)?;
                let otherwise = if self.eat(&Token::Colon) {
                    Some(Box::new(self.expression(BP_TERNARY)?))
                } else {
                    None
                };
                lhs = Expr::Conditional {
                    test: Box::new(lhs),
                    then: Box::new(then),
                    otherwise,
                };
                continue;
            }

            let Some((op, bp)) = infix(token) else { break };
            if bp <= min_bp {
                break;
            }
            self.pos += 1;
            self.descend()?;
            let rhs = self.expression(bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, SyntaxError> {
        let at = self.offset();
        let Some(token) = self.next() else {
            return Err(SyntaxError::new(at, "unexpected end of expression"));
        };

        let primary = match token {
            Token::Minus => {
                let operand = self.expression(BP_UNARY)?;
                return Ok(match operand {
                    Expr::Literal(Value::Number(n)) => Expr::Literal(negate(&n)),
                    other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
                });
            }
            Token::Not => {
                let operand = self.expression(BP_NOT)?;
                return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
            }
            Token::Number(n) => Expr::Literal(number_value(n)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
            Token::Ident(name) => Expr::Name(name),
            Token::Variable(name) => {
                if !name.is_empty() && self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.list(&Token::RParen)?;
                    Expr::Call { name, args }
                } else {
                    Expr::Variable(name)
                }
            }
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen)?;
                inner
            }
            Token::LBracket => Expr::Array(self.list(&Token::RBracket)?),
            Token::LBrace => self.object()?,
            Token::Function => self.lambda()?,
            other => {
                return Err(SyntaxError::new(
                    at,
                    format!("unexpected token {}", describe(&other)),
                ));
            }
        };

        self.postfix(primary)
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, SyntaxError> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.descend()?;
                    self.pos += 1;
                    let at = self.offset();
                    match self.next() {
                        Some(Token::Ident(name)) => expr = Expr::Field(Box::new(expr), name),
                        Some(Token::Str(name)) => expr = Expr::Field(Box::new(expr), name),
                        // Keywords are valid field names after a dot.
                        Some(kw @ (Token::And
                        | Token::Or
                        | Token::Not
                        | Token::In
                        | Token::True
                        | Token::False
                        | Token::Null
                        | Token::Function)) => {
                            expr = Expr::Field(Box::new(expr), keyword_text(&kw).to_string())
                        }
                        other => {
                            let found = other
                                .as_ref()
                                .map(describe)
                                .unwrap_or_else(|| "end of expression".into());
                            return Err(SyntaxError::new(
                                at,
                                format!("expected field name after '.' but found {found}"),
                            ));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.descend()?;
                    self.pos += 1;
                    let index = self.expression(0)?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated expressions up to `close` (already past the opener).
    fn list(&mut self, close: &Token) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn object(&mut self) -> Result<Expr, SyntaxError> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let at = self.offset();
            let key = match self.peek() {
                Some(Token::Ident(name)) => {
                    let key = Expr::Literal(Value::String(name.clone()));
                    self.pos += 1;
                    key
                }
                Some(_) => self.expression(0)?,
                None => return Err(SyntaxError::new(at, "unterminated object literal")),
            };
            self.expect(&Token::Colon)?;
            let value = self.expression(0)?;
            entries.push((key, value));
            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(entries));
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                let at = self.offset();
                match self.next() {
                    Some(Token::Variable(name)) if !name.is_empty() => params.push(name),
                    _ => {
                        return Err(SyntaxError::new(
                            at,
                            "function parameters must be $-prefixed names",
                        ));
                    }
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }
        self.expect(&Token::LBrace)?;
        let body = self.expression(0)?;
        self.expect(&Token::RBrace)?;
        Ok(Expr::Lambda(Arc::new(Lambda { params, body })))
    }
}

fn infix(token: &Token) -> Option<(BinaryOp, u8)> {
    let pair = match token {
        Token::Or => (BinaryOp::Or, 2),
        Token::And => (BinaryOp::And, 3),
        Token::Eq => (BinaryOp::Eq, 5),
        Token::NotEq => (BinaryOp::NotEq, 5),
        Token::Lt => (BinaryOp::Lt, 5),
        Token::LtEq => (BinaryOp::LtEq, 5),
        Token::Gt => (BinaryOp::Gt, 5),
        Token::GtEq => (BinaryOp::GtEq, 5),
        Token::In => (BinaryOp::In, 5),
        Token::Amp => (BinaryOp::Concat, 6),
        Token::Plus => (BinaryOp::Add, 7),
        Token::Minus => (BinaryOp::Sub, 7),
        Token::Star => (BinaryOp::Mul, 8),
        Token::Slash => (BinaryOp::Div, 8),
        Token::Percent => (BinaryOp::Rem, 8),
        _ => return None,
    };
    Some(pair)
}

/// Integral literals become JSON integers so `{{ 42 }}` yields `42`, not `42.0`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn negate(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Number(Number::from(-i))
    } else {
        number_value(-n.as_f64().unwrap_or(0.0))
    }
}

fn keyword_text(token: &Token) -> &'static str {
    match token {
        Token::And => "and",
        Token::Or => "or",
        Token::Not => "not",
        Token::In => "in",
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        Token::Function => "function",
        _ => "",
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("string \"{s}\""),
        Token::Ident(name) => format!("name '{name}'"),
        Token::Variable(name) => format!("'${name}'"),
        Token::Dot => "'.'".into(),
        Token::Comma => "','".into(),
        Token::Colon => "':'".into(),
        Token::Question => "'?'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::Amp => "'&'".into(),
        Token::Eq => "'='".into(),
        Token::NotEq => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::LtEq => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::GtEq => "'>='".into(),
        other => format!("'{}'", keyword_text(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    #[test]
    fn test_path_with_index() {
        let expr = parse("input.items[-1].name").unwrap();
        assert_eq!(
            expr,
            Expr::Field(
                Box::new(Expr::Index(
                    Box::new(Expr::Field(name("input"), "items".into())),
                    Box::new(Expr::Literal(json!(-1))),
                )),
                "name".into(),
            )
        );
    }

    #[test]
    fn test_precedence() {
        // a + b * c = d and not e  =>  ((a + (b * c)) = d) and (not e)
        let expr = parse("a + b * c = d and not e").unwrap();
        let Expr::Binary(BinaryOp::And, lhs, rhs) = expr else {
            panic!("expected and at the top");
        };
        assert!(matches!(*rhs, Expr::Unary(UnaryOp::Not, _)));
        let Expr::Binary(BinaryOp::Eq, sum, _) = *lhs else {
            panic!("expected = under and");
        };
        let Expr::Binary(BinaryOp::Add, _, product) = *sum else {
            panic!("expected + under =");
        };
        assert!(matches!(*product, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        let Expr::Conditional { otherwise, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(
            otherwise.as_deref(),
            Some(Expr::Conditional { .. })
        ));
    }

    #[test]
    fn test_calls_and_lambdas() {
        let expr = parse("$map(items, function($v, $i) { $v * 2 })").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "map");
        assert_eq!(args.len(), 2);
        let Expr::Lambda(lambda) = &args[1] else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.params, vec!["v", "i"]);
    }

    #[test]
    fn test_object_and_array_literals() {
        let expr = parse("{ name: 'x', \"n\": [1, 2.5, -3] }").unwrap();
        let Expr::Object(entries) = expr else {
            panic!("expected object");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].1,
            Expr::Array(vec![
                Expr::Literal(json!(1)),
                Expr::Literal(json!(2.5)),
                Expr::Literal(json!(-3)),
            ])
        );
    }

    #[test]
    fn test_keyword_field_names() {
        let expr = parse("item.in").unwrap();
        assert_eq!(expr, Expr::Field(name("item"), "in".into()));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse("a +").unwrap_err();
        assert_eq!(err.position, 3);

        let err = parse("(a").unwrap_err();
        assert!(err.message.contains("expected ')'"));

        let err = parse("a b").unwrap_err();
        assert_eq!(err.position, 2);

        assert!(parse("   ").is_err());
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let src = format!("{}1{}", "(".repeat(1500), ")".repeat(1500));
        let err = parse(&src).unwrap_err();
        assert!(err.message.contains("nested"), "{}", err.message);

        let src = format!("{}1{}", "[".repeat(1500), "]".repeat(1500));
        assert!(parse(&src).is_err());

        let src = format!("{}1", "-".repeat(1500));
        assert!(parse(&src).is_err());

        let chain = vec!["1"; 1500].join(" + ");
        assert!(parse(&chain).is_err());

        let path = format!("a{}", ".b".repeat(1500));
        assert!(parse(&path).is_err());
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let src = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse(&src).unwrap(), Expr::Literal(json!(1)));
        assert!(parse(&vec!["1"; 40].join(" + ")).is_ok());
    }
}
