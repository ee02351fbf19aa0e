//! Recursive-descent parser for inline bindings
//!
//! Expression precedence (lowest first): conditional, `??`, `||`, `&&`,
//! equality, comparison, additive, multiplicative, unary, postfix.

use serde_json::{json, Value};

use super::ast::{BinaryOp, Expr, LogicOp, Program, Stmt, UnaryOp};
use super::lexer::{tokenize, Tok, Token};
use crate::error::{NullsError, Result};

/// Compile attribute text: exactly one expression
pub fn compile_expression(src: &str) -> Result<Program> {
    let mut p = Parser::new(src)?;
    let expr = p.expression()?;
    p.eat(";");
    p.expect_eof()?;
    Ok(Program::Expression(expr))
}

/// Compile script-element text: a statement list
pub fn compile_block(src: &str) -> Result<Program> {
    let mut p = Parser::new(src)?;
    let mut body = Vec::new();
    while p.peek() != &Tok::Eof {
        body.push(p.statement()?);
    }
    Ok(Program::Block(body))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn is(&self, punct: &str) -> bool {
        matches!(self.peek(), Tok::Punct(p) if *p == punct)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(i) if i == kw)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.is(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", punct, describe(self.peek()))))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        match self.peek() {
            Tok::Eof => Ok(()),
            other => Err(self.error(format!("unexpected {}", describe(other)))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {}", describe(&other)))),
        }
    }

    fn error(&self, details: String) -> NullsError {
        NullsError::Compile {
            position: self.position(),
            details,
        }
    }

    // ═══════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════

    fn statement(&mut self) -> Result<Stmt> {
        if self.is_keyword("let") || self.is_keyword("const") || self.is_keyword("var") {
            self.advance();
            let name = self.ident()?;
            self.expect("=")?;
            let value = self.expression()?;
            self.eat(";");
            return Ok(Stmt::Let(name, value));
        }
        if self.is_keyword("return") {
            self.advance();
            if self.eat(";") || self.is("}") || self.peek() == &Tok::Eof {
                return Ok(Stmt::Return(None));
            }
            let value = self.expression()?;
            self.eat(";");
            return Ok(Stmt::Return(Some(value)));
        }
        if self.is_keyword("if") {
            return self.if_statement();
        }
        if self.is_keyword("for") {
            return self.for_statement();
        }
        if matches!(self.peek(), Tok::Ident(_)) && matches!(self.peek_at(1), Tok::Punct("=")) {
            let name = self.ident()?;
            self.expect("=")?;
            let value = self.expression()?;
            self.eat(";");
            return Ok(Stmt::Assign(name, value));
        }
        let expr = self.expression()?;
        self.eat(";");
        Ok(Stmt::Expr(expr))
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.advance();
        self.expect("(")?;
        let cond = self.expression()?;
        self.expect(")")?;
        let then = self.body()?;
        let otherwise = if self.is_keyword("else") {
            self.advance();
            if self.is_keyword("if") {
                vec![self.if_statement()?]
            } else {
                self.body()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If(cond, then, otherwise))
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        self.advance();
        self.expect("(")?;
        if self.is_keyword("let") || self.is_keyword("const") || self.is_keyword("var") {
            self.advance();
        }
        let name = self.ident()?;
        if !self.is_keyword("of") {
            return Err(self.error("expected 'of' in for loop".to_string()));
        }
        self.advance();
        let items = self.expression()?;
        self.expect(")")?;
        let body = self.body()?;
        Ok(Stmt::ForOf(name, items, body))
    }

    /// `{ stmt* }` or a single statement
    fn body(&mut self) -> Result<Vec<Stmt>> {
        if !self.eat("{") {
            return Ok(vec![self.statement()?]);
        }
        let mut stmts = Vec::new();
        while !self.eat("}") {
            if self.peek() == &Tok::Eof {
                return Err(self.error("unclosed block".to_string()));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    // ═══════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════

    fn expression(&mut self) -> Result<Expr> {
        let cond = self.nullish()?;
        if self.eat("?") {
            let then = self.expression()?;
            self.expect(":")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn nullish(&mut self) -> Result<Expr> {
        let mut left = self.or()?;
        while self.eat("??") {
            let right = self.or()?;
            left = Expr::Logical(LogicOp::Nullish, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = Expr::Logical(LogicOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = Expr::Logical(LogicOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = if self.eat("==") || self.eat("===") {
                BinaryOp::Eq
            } else if self.eat("!=") || self.eat("!==") {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = if self.eat("<=") {
                BinaryOp::Le
            } else if self.eat(">=") {
                BinaryOp::Ge
            } else if self.eat("<") {
                BinaryOp::Lt
            } else if self.eat(">") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        // `await` is accepted and ignored: every binding is awaited anyway
        if self.is_keyword("await") {
            self.advance();
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let name = self.ident()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.is("(") {
                let Expr::Var(name) = expr else {
                    return Err(self.error("only named functions can be called".to_string()));
                };
                self.advance();
                let args = self.list(")")?;
                expr = Expr::Call(name, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn list(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expression()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Literal(number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Tok::Punct("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => Ok(Expr::Array(self.list("]")?)),
            Tok::Punct("{") => self.object(),
            other => Err(self.error(format!("unexpected {}", describe(&other)))),
        }
    }

    fn object(&mut self) -> Result<Expr> {
        let mut fields = Vec::new();
        while !self.eat("}") {
            let key = match self.advance() {
                Tok::Ident(k) | Tok::Str(k) => k,
                Tok::Num(n) => number(n).to_string(),
                other => {
                    return Err(self.error(format!("expected object key, found {}", describe(&other))))
                }
            };
            let value = if self.eat(":") {
                self.expression()?
            } else {
                // Shorthand `{ name }`
                Expr::Var(key.clone())
            };
            fields.push((key, value));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(fields))
    }
}

/// Integral numbers become JSON integers so they print without a fraction
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(n) => format!("number {}", n),
        Tok::Str(s) => format!("string '{}'", s),
        Tok::Ident(i) => format!("'{}'", i),
        Tok::Punct(p) => format!("'{}'", p),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let Program::Expression(expr) = compile_expression("1 + 2 * 3").unwrap() else {
            panic!("expected expression");
        };
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Literal(json!(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Literal(json!(2))),
                    Box::new(Expr::Literal(json!(3)))
                ))
            )
        );
    }

    #[test]
    fn member_index_and_call_chain() {
        let program = compile_expression("len(request.fields['tags'])").unwrap();
        let Program::Expression(Expr::Call(name, args)) = program else {
            panic!("expected call");
        };
        assert_eq!(name, "len");
        assert!(matches!(args[0], Expr::Index(_, _)));
    }

    #[test]
    fn block_with_if_for_and_return() {
        let program = compile_block(
            "let out = [];\nfor (let x of args[0]) { if (x > 1) out = concat(out, [x]); }\nreturn out;",
        )
        .unwrap();
        let Program::Block(stmts) = program else {
            panic!("expected block");
        };
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[1], Stmt::ForOf(..)));
        assert!(matches!(stmts[2], Stmt::Return(Some(_))));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(
            compile_expression("1 2"),
            Err(NullsError::Compile { .. })
        ));
    }

    #[test]
    fn calling_a_member_is_rejected() {
        assert!(compile_expression("request.path()").is_err());
    }

    #[test]
    fn object_literal_with_shorthand() {
        let Program::Expression(Expr::Object(fields)) =
            compile_expression("{ title: 'x', args, 'data-id': 3 }").unwrap()
        else {
            panic!("expected object");
        };
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].1, Expr::Var("args".into()));
        assert_eq!(fields[2].0, "data-id");
    }
}
