//! A minimal CEL-subset expression compiler (spec.md §4.7).
//!
//! No crate in this workspace's corpus provides a CEL evaluator, and pulling
//! in a full implementation for the handful of operators spec.md actually
//! names (`headers`/`body` member access, equality, boolean connectives, and
//! a fixed string-extension set) would be a much larger dependency than the
//! feature warrants. This is a deliberately scoped hand-rolled exception,
//! documented in DESIGN.md — not a general CEL implementation.
//!
//! Grammar (expressions only, no statements):
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := equality ("&&" equality)*
//! equality   := unary (("==" | "!=") unary)*
//! unary      := "!" unary | postfix
//! postfix    := primary ("." IDENT "(" args? ")" | "." IDENT | "[" expr "]")*
//! primary    := STRING | BOOL | NUMBER | IDENT | "(" expr ")"
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(text.parse().map_err(|_| format!("invalid number literal: {text}"))?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(text)),
                }
            }
            other => return Err(format!("unexpected character '{other}' in expression")),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Str(String),
    Num(f64),
    Bool(bool),
    Ident(String),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Call(Box<Expr>, String, Vec<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    NotEqExpr(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        if self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {:?}", self.peek()))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let left = self.parse_unary()?;
        match self.peek() {
            Token::EqEq => {
                self.advance();
                let right = self.parse_unary()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Token::NotEq => {
                self.advance();
                let right = self.parse_unary()?;
                Ok(Expr::NotEqExpr(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if *self.peek() == Token::Bang {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Token::Ident(name) => name,
                        other => return Err(format!("expected identifier after '.', found {other:?}")),
                    };
                    if *self.peek() == Token::LParen {
                        self.advance();
                        let mut args = Vec::new();
                        if *self.peek() != Token::RParen {
                            args.push(self.parse_expr()?);
                            while *self.peek() == Token::Comma {
                                self.advance();
                                args.push(self.parse_expr()?);
                            }
                        }
                        self.expect(&Token::RParen)?;
                        expr = Expr::Call(Box::new(expr), name, args);
                    } else {
                        expr = Expr::Field(Box::new(expr), name);
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Num(n) => Ok(Expr::Num(n)),
            Token::Bool(b) => Ok(Expr::Bool(b)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

/// A `deny.cel`/header-injection expression, compiled once at reconcile time
/// (spec.md §4.7: "compile the deny.cel expression once at reconcile time").
#[derive(Debug, Clone)]
pub struct CompiledExpr(Expr);

/// The environment a compiled expression evaluates against: `headers:
/// map<string,string>` and `body: map<string,dyn>` (spec.md §4.7).
pub struct CelEnv<'a> {
    pub headers: &'a BTreeMap<String, String>,
    pub body: &'a Value,
}

pub fn compile(source: &str) -> Result<CompiledExpr, String> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if *parser.peek() != Token::Eof {
        return Err(format!("unexpected trailing input after expression: {:?}", parser.peek()));
    }
    Ok(CompiledExpr(expr))
}

impl CompiledExpr {
    pub fn eval_bool(&self, env: &CelEnv) -> Result<bool, String> {
        match eval(&self.0, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(format!("expression did not evaluate to a bool: {other}")),
        }
    }

    pub fn eval(&self, env: &CelEnv) -> Result<Value, String> {
        eval(&self.0, env)
    }
}

fn eval(expr: &Expr, env: &CelEnv) -> Result<Value, String> {
    match expr {
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Num(n) => Ok(serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Ident(name) => match name.as_str() {
            "headers" => Ok(Value::Object(env.headers.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())),
            "body" => Ok(env.body.clone()),
            other => Err(format!("unknown identifier: {other}")),
        },
        Expr::Field(base, field) => {
            let base = eval(base, env)?;
            Ok(base.get(field).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => {
            let base = eval(base, env)?;
            let index = eval(index, env)?;
            match index {
                Value::String(key) => Ok(base.get(&key).cloned().unwrap_or(Value::Null)),
                Value::Number(n) => Ok(base.get(n.as_u64().unwrap_or(0) as usize).cloned().unwrap_or(Value::Null)),
                _ => Err("index must be a string or number".to_string()),
            }
        }
        Expr::Not(inner) => {
            let value = eval(inner, env)?;
            Ok(Value::Bool(!truthy(&value)))
        }
        Expr::Eq(a, b) => Ok(Value::Bool(eval(a, env)? == eval(b, env)?)),
        Expr::NotEqExpr(a, b) => Ok(Value::Bool(eval(a, env)? != eval(b, env)?)),
        Expr::And(a, b) => Ok(Value::Bool(truthy(&eval(a, env)?) && truthy(&eval(b, env)?))),
        Expr::Or(a, b) => Ok(Value::Bool(truthy(&eval(a, env)?) || truthy(&eval(b, env)?))),
        Expr::Call(receiver, method, args) => eval_call(receiver, method, args, env),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn eval_call(receiver: &Expr, method: &str, args: &[Expr], env: &CelEnv) -> Result<Value, String> {
    let receiver_value = eval(receiver, env)?;
    let receiver_str = match &receiver_value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let arg_str = |i: usize| -> Result<String, String> {
        let value = args
            .get(i)
            .ok_or_else(|| format!("{method}() expects an argument at position {i}"))?;
        match eval(value, env)? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    };

    match method {
        "contains" => Ok(Value::Bool(receiver_str.contains(&arg_str(0)?))),
        "startsWith" => Ok(Value::Bool(receiver_str.starts_with(&arg_str(0)?))),
        "endsWith" => Ok(Value::Bool(receiver_str.ends_with(&arg_str(0)?))),
        "matches" => {
            let pattern = arg_str(0)?;
            let re = regex::Regex::new(&pattern).map_err(|e| format!("invalid regex {pattern:?}: {e}"))?;
            Ok(Value::Bool(re.is_match(&receiver_str)))
        }
        "lower" => Ok(Value::String(receiver_str.to_lowercase())),
        "upper" => Ok(Value::String(receiver_str.to_uppercase())),
        "trim" => Ok(Value::String(receiver_str.trim().to_string())),
        "split" => {
            let sep = arg_str(0)?;
            Ok(Value::Array(receiver_str.split(&sep as &str).map(|s| Value::String(s.to_string())).collect()))
        }
        other => Err(format!("unknown method: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env<'a>(headers: &'a BTreeMap<String, String>, body: &'a Value) -> CelEnv<'a> {
        CelEnv { headers, body }
    }

    #[test]
    fn header_equality() {
        let headers = BTreeMap::from([("X-Team".to_string(), "payments".to_string())]);
        let body = json!({});
        let expr = compile(r#"headers["X-Team"] == "payments""#).unwrap();
        assert!(expr.eval_bool(&env(&headers, &body)).unwrap());
    }

    #[test]
    fn string_extension_methods() {
        let headers = BTreeMap::new();
        let body = json!({"path": "/admin/delete"});
        let expr = compile(r#"body.path.startsWith("/admin")"#).unwrap();
        assert!(expr.eval_bool(&env(&headers, &body)).unwrap());
    }

    #[test]
    fn boolean_connectives_and_negation() {
        let headers = BTreeMap::from([("X-Env".to_string(), "prod".to_string())]);
        let body = json!({"risky": true});
        let expr = compile(r#"headers["X-Env"] == "prod" && body.risky == true"#).unwrap();
        assert!(expr.eval_bool(&env(&headers, &body)).unwrap());

        let expr = compile(r#"!(headers["X-Env"] == "dev")"#).unwrap();
        assert!(expr.eval_bool(&env(&headers, &body)).unwrap());
    }

    #[test]
    fn missing_header_is_null_and_not_an_error() {
        let headers = BTreeMap::new();
        let body = json!({});
        let expr = compile(r#"headers["X-Missing"] == "anything""#).unwrap();
        assert!(!expr.eval_bool(&env(&headers, &body)).unwrap());
    }

    #[test]
    fn invalid_syntax_fails_to_compile() {
        assert!(compile("headers[").is_err());
        assert!(compile("a ===").is_err());
    }

    #[test]
    fn matches_uses_regex() {
        let headers = BTreeMap::new();
        let body = json!({"id": "order-1234"});
        let expr = compile(r#"body.id.matches("^order-[0-9]+$")"#).unwrap();
        assert!(expr.eval_bool(&env(&headers, &body)).unwrap());
    }
}
