//! The built-in calculator runtime.
//!
//! A deliberately small, synchronous expression language: string and number
//! literals, name references (dotted for record fields), and `+`, which adds
//! numbers and concatenates everything else. It exists so a document is
//! useful without wiring in a full language, and so tests have a runtime
//! with exact, observable read sets.

use quire_core::{BEFORE, BlockError, Environment, Value};

use crate::runtime::{Eval, Runtime, Settle};

/// Synchronous calculator. Stateless; one instance serves a whole document.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalcRuntime;

impl Runtime for CalcRuntime {
    fn eval(&self, code: &str, env: &Environment, _settle: Settle) -> Eval {
        let mut reads = Vec::new();
        let value = if code.trim().is_empty() {
            Value::Null
        } else {
            Parser::new(code).expression(env, &mut reads)
        };
        Eval::Ready { value, reads }
    }
}

fn error(detail: impl Into<String>) -> Value {
    Value::error(BlockError::eval(detail))
}

/// `+` adds two numbers; any other pair concatenates display forms. Errors
/// and pending operands win over either, left side first.
fn add(lhs: Value, rhs: Value) -> Value {
    match (&lhs, &rhs) {
        (Value::Error(_), _) => lhs,
        (_, Value::Error(_)) => rhs,
        (Value::Pending, _) | (_, Value::Pending) => Value::Pending,
        (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
        _ => Value::text(format!("{lhs}{rhs}")),
    }
}

/// Project a record field out of `value`.
fn project(value: Value, field: &str) -> Value {
    match value {
        Value::Pending => Value::Pending,
        Value::Error(_) => value,
        Value::Record(ref fields) => match fields.get(field) {
            Some(found) => found.clone(),
            None => error(format!("no field {field:?}")),
        },
        other => error(format!("cannot read field {field:?} of {}", other.type_name())),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Single-pass recursive descent over the source text. Parse errors become
/// error values rather than failures so they show up like any other result.
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn expression(mut self, env: &Environment, reads: &mut Vec<String>) -> Value {
        let value = self.sum(env, reads);
        self.skip_whitespace();
        if self.pos < self.src.len() {
            return error(format!("unexpected trailing input {:?}", self.rest()));
        }
        value
    }

    fn sum(&mut self, env: &Environment, reads: &mut Vec<String>) -> Value {
        let mut value = self.term(env, reads);
        loop {
            self.skip_whitespace();
            if !self.eat('+') {
                break;
            }
            let rhs = self.term(env, reads);
            value = add(value, rhs);
        }
        value
    }

    fn term(&mut self, env: &Environment, reads: &mut Vec<String>) -> Value {
        self.skip_whitespace();
        match self.peek() {
            Some('"') => self.string_literal(),
            Some(c) if c.is_ascii_digit() => self.number_literal(),
            Some(c) if is_name_start(c) => self.reference(env, reads),
            Some(c) => {
                self.pos = self.src.len();
                error(format!("unexpected character {c:?}"))
            }
            None => error("expected an expression"),
        }
    }

    // No escape sequences; a string runs to the next double quote.
    fn string_literal(&mut self) -> Value {
        self.eat('"');
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '"' {
                let text = &self.src[start..self.pos];
                self.pos += 1;
                return Value::text(text);
            }
            self.pos += c.len_utf8();
        }
        error("unterminated string literal")
    }

    fn number_literal(&mut self) -> Value {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        match self.src[start..self.pos].parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => error(format!("bad number {:?}", &self.src[start..self.pos])),
        }
    }

    fn reference(&mut self, env: &Environment, reads: &mut Vec<String>) -> Value {
        let head = self.name();
        let mut fields = Vec::new();
        while self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if is_name_start(c))
        {
            self.pos += 1;
            fields.push(self.name());
        }

        if head == BEFORE {
            return before_reference(fields, env, reads);
        }

        reads.push(head.clone());
        let mut value = match env.lookup(&head) {
            Some(found) => found.clone(),
            None => error(format!("unknown name {head:?}")),
        };
        for field in &fields {
            value = project(value, field);
        }
        value
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_name_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        self.src[start..self.pos].to_string()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }
}

/// `$before` names whatever the preceding siblings produced. A dotted access
/// reads one name from it; a bare `$before` depends on every name currently
/// in the record, so any upstream change reaches it.
fn before_reference(fields: Vec<String>, env: &Environment, reads: &mut Vec<String>) -> Value {
    let before = match env.lookup(BEFORE) {
        Some(found) => found.clone(),
        None => return error("no preceding results here"),
    };
    let mut fields = fields.into_iter();
    match fields.next() {
        None => {
            if let Value::Record(entries) = &before {
                reads.extend(entries.keys().cloned());
            }
            before
        }
        Some(first) => {
            reads.push(first.clone());
            let mut value = project(before, &first);
            for field in fields {
                value = project(value, &field);
            }
            value
        }
    }
}

// ==== Tests ============================================================

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn eval_in(code: &str, env: &Environment) -> (Value, Vec<String>) {
        match CalcRuntime.eval(code, env, Box::new(|_| {})) {
            Eval::Ready { value, reads } => (value, reads),
            Eval::Pending { .. } => panic!("the calculator never pends"),
        }
    }

    fn record(pairs: &[(&str, Value)]) -> Value {
        let fields: IndexMap<String, Value> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Value::record(fields)
    }

    #[test]
    fn test_literals() {
        let env = Environment::new();
        assert_eq!(eval_in("42", &env).0, Value::Number(42.0));
        assert_eq!(eval_in("1.5", &env).0, Value::Number(1.5));
        assert_eq!(eval_in("\"hi\"", &env).0, Value::text("hi"));
        assert!(eval_in("42", &env).1.is_empty());
    }

    #[test]
    fn test_empty_code_is_null() {
        let env = Environment::new();
        assert_eq!(eval_in("", &env).0, Value::Null);
        assert_eq!(eval_in("   ", &env).0, Value::Null);
    }

    #[test]
    fn test_addition_and_concatenation() {
        let env = Environment::new();
        assert_eq!(eval_in("1 + 2", &env).0, Value::Number(3.0));
        assert_eq!(eval_in("\"a\" + \"b\"", &env).0, Value::text("ab"));
        assert_eq!(eval_in("1 + \" fish\"", &env).0, Value::text("1 fish"));
    }

    #[test]
    fn test_reference_reads_are_tracked() {
        let env = Environment::new().bind("x", Value::Number(2.0));
        let (value, reads) = eval_in("x + 1", &env);
        assert_eq!(value, Value::Number(3.0));
        assert_eq!(reads, vec!["x".to_string()]);
    }

    #[test]
    fn test_unknown_name_is_an_error_but_still_read() {
        let env = Environment::new();
        let (value, reads) = eval_in("nope", &env);
        assert!(value.is_error());
        assert_eq!(reads, vec!["nope".to_string()]);
    }

    #[test]
    fn test_before_field_reads_one_name() {
        let env =
            Environment::new().bind(BEFORE, record(&[("greet", Value::text("Hello"))]));
        let (value, reads) = eval_in("$before.greet + \" World\"", &env);
        assert_eq!(value, Value::text("Hello World"));
        assert_eq!(reads, vec!["greet".to_string()]);
    }

    #[test]
    fn test_bare_before_reads_every_name() {
        let before = record(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        let env = Environment::new().bind(BEFORE, before.clone());
        let (value, reads) = eval_in("$before", &env);
        assert_eq!(value, before);
        assert_eq!(reads, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_record_projection() {
        let env = Environment::new().bind("rec", record(&[("x", Value::Number(7.0))]));
        let (value, reads) = eval_in("rec.x", &env);
        assert_eq!(value, Value::Number(7.0));
        assert_eq!(reads, vec!["rec".to_string()]);
        assert!(eval_in("rec.missing", &env).0.is_error());
    }

    #[test]
    fn test_parse_errors_become_error_values() {
        let env = Environment::new();
        assert!(eval_in("1 2", &env).0.is_error());
        assert!(eval_in("\"abc", &env).0.is_error());
        assert!(eval_in("1 + ?", &env).0.is_error());
    }

    #[test]
    fn test_errors_propagate_through_plus() {
        let env = Environment::new();
        let (value, reads) = eval_in("nope + 1", &env);
        assert!(value.is_error());
        assert_eq!(reads, vec!["nope".to_string()]);
    }

    #[test]
    fn test_pending_operand_makes_the_sum_pending() {
        let env = Environment::new().bind("slow", Value::Pending);
        assert_eq!(eval_in("slow + 1", &env).0, Value::Pending);
    }
}
