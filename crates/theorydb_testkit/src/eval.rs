//! Evaluator for the store's expression language.
//!
//! Covers the grammar the engine emits plus what callers commonly pass as
//! raw expressions: comparisons, `BETWEEN`, `IN`, `AND`/`OR`/`NOT`,
//! parentheses, `attribute_exists`, `attribute_not_exists`, `begins_with`,
//! `contains` and `size`; update clauses `SET`, `REMOVE`, `ADD`, `DELETE`
//! with `if_not_exists`, `list_append`, `+`/`-` and list indexes.
//!
//! Update operands are read from the item as it was before the update.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use theorydb_codec::{AttributeValue, Item};
use theorydb_core::backend::{BackendError, NameMap, ValueMap};

type EvalResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Value(String),
    Word(String),
    Int(usize),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Plus,
    Minus,
}

fn invalid(message: impl std::fmt::Display) -> BackendError {
    BackendError::validation(format!("Invalid expression: {message}"))
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(input: &str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '=' => Some(Token::Op("=")),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            i += 1;
            continue;
        }

        match c {
            c if c.is_whitespace() => i += 1,
            '<' => {
                let (op, width) = match chars.get(i + 1) {
                    Some('=') => ("<=", 2),
                    Some('>') => ("<>", 2),
                    _ => ("<", 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '>' => {
                let (op, width) = match chars.get(i + 1) {
                    Some('=') => (">=", 2),
                    _ => (">", 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '#' | ':' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                if start == i {
                    return Err(invalid(format!("empty placeholder at {start}")));
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(if c == '#' {
                    Token::Name(name)
                } else {
                    Token::Value(name)
                });
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let n = digits
                    .parse()
                    .map_err(|_| invalid(format!("bad index {digits}")))?;
                tokens.push(Token::Int(n));
            }
            c if is_ident(c) => {
                let start = i;
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(invalid(format!("unexpected character {other:?}"))),
        }
    }
    Ok(tokens)
}

/// An attribute path: a top-level attribute, optionally indexed.
#[derive(Debug, Clone)]
struct Path {
    attribute: String,
    index: Option<usize>,
}

fn resolve<'i>(item: &'i Item, path: &Path) -> Option<&'i AttributeValue> {
    let value = item.get(&path.attribute)?;
    match path.index {
        None => Some(value),
        Some(i) => value.as_l().and_then(|list| list.get(i)),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a NameMap,
    values: &'a ValueMap,
}

impl<'a> Parser<'a> {
    fn new(input: &str, names: &'a NameMap, values: &'a ValueMap) -> EvalResult<Self> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            names,
            values,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> EvalResult<()> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(invalid(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_function(&self, name: &str) -> bool {
        self.at_keyword(name) && self.peek_at(1) == Some(&Token::LParen)
    }

    fn finish(&self) -> EvalResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(invalid(format!("unexpected trailing {token:?}"))),
        }
    }

    fn value(&self, name: &str) -> EvalResult<AttributeValue> {
        self.values
            .get(&format!(":{name}"))
            .cloned()
            .ok_or_else(|| invalid(format!("undefined value :{name}")))
    }

    fn path(&mut self) -> EvalResult<Path> {
        let attribute = match self.advance() {
            Some(Token::Name(name)) => self
                .names
                .get(&format!("#{name}"))
                .cloned()
                .ok_or_else(|| invalid(format!("undefined name #{name}")))?,
            Some(Token::Word(word)) => word,
            other => return Err(invalid(format!("expected attribute, found {other:?}"))),
        };
        let index = if self.peek() == Some(&Token::LBracket) {
            self.advance();
            let Some(Token::Int(i)) = self.advance() else {
                return Err(invalid("expected list index"));
            };
            self.expect(&Token::RBracket)?;
            Some(i)
        } else {
            None
        };
        Ok(Path { attribute, index })
    }

    fn operand(&mut self, item: &Item) -> EvalResult<Option<AttributeValue>> {
        if let Some(Token::Value(name)) = self.peek().cloned() {
            self.advance();
            return self.value(&name).map(Some);
        }
        if self.at_function("size") {
            self.advance();
            self.expect(&Token::LParen)?;
            let path = self.path()?;
            self.expect(&Token::RParen)?;
            return Ok(resolve(item, &path).and_then(size_of).map(AttributeValue::number));
        }
        let path = self.path()?;
        Ok(resolve(item, &path).cloned())
    }

    fn condition(&mut self, item: &Item) -> EvalResult<bool> {
        let mut result = self.and_term(item)?;
        while self.eat_keyword("OR") {
            let rhs = self.and_term(item)?;
            result = result || rhs;
        }
        Ok(result)
    }

    fn and_term(&mut self, item: &Item) -> EvalResult<bool> {
        let mut result = self.not_term(item)?;
        while self.eat_keyword("AND") {
            let rhs = self.not_term(item)?;
            result = result && rhs;
        }
        Ok(result)
    }

    fn not_term(&mut self, item: &Item) -> EvalResult<bool> {
        if self.eat_keyword("NOT") {
            return Ok(!self.not_term(item)?);
        }
        self.primary(item)
    }

    fn primary(&mut self, item: &Item) -> EvalResult<bool> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let result = self.condition(item)?;
            self.expect(&Token::RParen)?;
            return Ok(result);
        }

        for function in ["attribute_exists", "attribute_not_exists"] {
            if self.at_function(function) {
                self.advance();
                self.expect(&Token::LParen)?;
                let path = self.path()?;
                self.expect(&Token::RParen)?;
                let exists = resolve(item, &path).is_some();
                return Ok(if function == "attribute_exists" { exists } else { !exists });
            }
        }
        for function in ["begins_with", "contains"] {
            if self.at_function(function) {
                self.advance();
                self.expect(&Token::LParen)?;
                let subject = self.operand(item)?;
                self.expect(&Token::Comma)?;
                let operand = self.operand(item)?;
                self.expect(&Token::RParen)?;
                return Ok(match (subject, operand) {
                    (Some(s), Some(o)) if function == "begins_with" => begins_with(&s, &o),
                    (Some(s), Some(o)) => contains(&s, &o),
                    _ => false,
                });
            }
        }

        let left = self.operand(item)?;
        if self.eat_keyword("BETWEEN") {
            let low = self.operand(item)?;
            if !self.eat_keyword("AND") {
                return Err(invalid("BETWEEN requires AND"));
            }
            let high = self.operand(item)?;
            return Ok(matches!(
                (compare(left.as_ref(), low.as_ref()), compare(left.as_ref(), high.as_ref())),
                (Some(Ordering::Greater | Ordering::Equal), Some(Ordering::Less | Ordering::Equal))
            ));
        }
        if self.eat_keyword("IN") {
            self.expect(&Token::LParen)?;
            let mut found = false;
            loop {
                let candidate = self.operand(item)?;
                found |= equal(left.as_ref(), candidate.as_ref());
                match self.advance() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    other => return Err(invalid(format!("expected , or ) in IN, found {other:?}"))),
                }
            }
            return Ok(found);
        }

        let Some(Token::Op(op)) = self.advance() else {
            return Err(invalid("expected comparison operator"));
        };
        let right = self.operand(item)?;
        let ordering = compare(left.as_ref(), right.as_ref());
        Ok(match op {
            "=" => equal(left.as_ref(), right.as_ref()),
            "<>" => left.is_some() && right.is_some() && !equal(left.as_ref(), right.as_ref()),
            "<" => ordering == Some(Ordering::Less),
            "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            ">" => ordering == Some(Ordering::Greater),
            ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            other => return Err(invalid(format!("unknown operator {other}"))),
        })
    }

    fn update_operand(&mut self, old: &Item) -> EvalResult<Option<AttributeValue>> {
        if self.at_function("if_not_exists") {
            self.advance();
            self.expect(&Token::LParen)?;
            let path = self.path()?;
            self.expect(&Token::Comma)?;
            let default = self.update_value(old)?;
            self.expect(&Token::RParen)?;
            return Ok(resolve(old, &path).cloned().or(default));
        }
        if self.at_function("list_append") {
            self.advance();
            self.expect(&Token::LParen)?;
            let first = self.update_value(old)?;
            self.expect(&Token::Comma)?;
            let second = self.update_value(old)?;
            self.expect(&Token::RParen)?;
            let mut joined = Vec::new();
            for part in [first, second] {
                match part {
                    Some(AttributeValue::L(items)) => joined.extend(items),
                    None => {}
                    Some(other) => {
                        return Err(invalid(format!("list_append operand is {}", other.tag())))
                    }
                }
            }
            return Ok(Some(AttributeValue::L(joined)));
        }
        self.operand(old)
    }

    fn update_value(&mut self, old: &Item) -> EvalResult<Option<AttributeValue>> {
        let left = self.update_operand(old)?;
        let sign = match self.peek() {
            Some(Token::Plus) => 1.0,
            Some(Token::Minus) => -1.0,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.update_operand(old)?;
        match (left.as_ref().and_then(number), right.as_ref().and_then(number)) {
            (Some(a), Some(b)) => Ok(Some(AttributeValue::number(format_number(a + sign * b)))),
            _ => Err(invalid("arithmetic requires numeric operands")),
        }
    }
}

/// Evaluate a condition expression against `item` (empty if absent).
pub(crate) fn evaluate_condition(
    expression: &str,
    names: &NameMap,
    values: &ValueMap,
    item: &Item,
) -> EvalResult<bool> {
    let mut parser = Parser::new(expression, names, values)?;
    let result = parser.condition(item)?;
    parser.finish()?;
    Ok(result)
}

/// Attribute names listed in a projection expression.
pub(crate) fn projected_attributes(expression: &str, names: &NameMap) -> EvalResult<Vec<String>> {
    let values = ValueMap::new();
    let mut parser = Parser::new(expression, names, &values)?;
    let mut attributes = Vec::new();
    loop {
        attributes.push(parser.path()?.attribute);
        match parser.advance() {
            None => return Ok(attributes),
            Some(Token::Comma) => continue,
            Some(other) => return Err(invalid(format!("unexpected {other:?} in projection"))),
        }
    }
}

/// Keep only the named top-level attributes.
pub(crate) fn project(item: &Item, attributes: &[String]) -> Item {
    item.iter()
        .filter(|(name, _)| attributes.iter().any(|a| a == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Result of applying an update expression.
pub(crate) struct Applied {
    pub(crate) item: Item,
    pub(crate) touched: BTreeSet<String>,
}

/// Apply an update expression to `old`, returning the new item.
pub(crate) fn apply_update(
    expression: &str,
    names: &NameMap,
    values: &ValueMap,
    old: &Item,
) -> EvalResult<Applied> {
    let mut parser = Parser::new(expression, names, values)?;
    let mut item = old.clone();
    let mut touched = BTreeSet::new();
    let mut removals: Vec<Path> = Vec::new();
    let mut seen_clause = false;

    while parser.peek().is_some() {
        let clause = match parser.advance() {
            Some(Token::Word(word)) => word.to_ascii_uppercase(),
            other => return Err(invalid(format!("expected update clause, found {other:?}"))),
        };
        seen_clause = true;
        loop {
            let path = parser.path()?;
            touched.insert(path.attribute.clone());
            match clause.as_str() {
                "SET" => {
                    parser.expect(&Token::Op("="))?;
                    let value = parser
                        .update_value(old)?
                        .ok_or_else(|| invalid("SET operand refers to a missing attribute"))?;
                    assign(&mut item, &path, value)?;
                }
                "REMOVE" => removals.push(path),
                "ADD" => {
                    let Some(Token::Value(name)) = parser.advance() else {
                        return Err(invalid("ADD requires a value placeholder"));
                    };
                    let operand = parser.value(&name)?;
                    let merged = add(item.get(&path.attribute), operand)?;
                    item.insert(path.attribute.clone(), merged);
                }
                "DELETE" => {
                    let Some(Token::Value(name)) = parser.advance() else {
                        return Err(invalid("DELETE requires a value placeholder"));
                    };
                    let operand = parser.value(&name)?;
                    match item.get(&path.attribute).map(|current| subtract(current, &operand)) {
                        Some(Ok(Some(remaining))) => {
                            item.insert(path.attribute.clone(), remaining);
                        }
                        Some(Ok(None)) => {
                            item.remove(&path.attribute);
                        }
                        Some(Err(err)) => return Err(err),
                        None => {}
                    }
                }
                other => return Err(invalid(format!("unknown update clause {other}"))),
            }
            if parser.peek() == Some(&Token::Comma) {
                parser.advance();
            } else {
                break;
            }
        }
    }
    if !seen_clause {
        return Err(invalid("empty update expression"));
    }

    // List indexes shift on removal, so remove from the back.
    removals.sort_by(|a, b| b.index.cmp(&a.index));
    for path in removals {
        match path.index {
            None => {
                item.remove(&path.attribute);
            }
            Some(i) => {
                if let Some(AttributeValue::L(list)) = item.get_mut(&path.attribute) {
                    if i < list.len() {
                        list.remove(i);
                    }
                }
            }
        }
    }
    Ok(Applied { item, touched })
}

fn assign(item: &mut Item, path: &Path, value: AttributeValue) -> EvalResult<()> {
    match path.index {
        None => {
            item.insert(path.attribute.clone(), value);
            Ok(())
        }
        Some(i) => match item.get_mut(&path.attribute) {
            Some(AttributeValue::L(list)) if i < list.len() => {
                list[i] = value;
                Ok(())
            }
            Some(AttributeValue::L(list)) => {
                list.push(value);
                Ok(())
            }
            _ => Err(invalid(format!("{} is not a list", path.attribute))),
        },
    }
}

fn add(current: Option<&AttributeValue>, operand: AttributeValue) -> EvalResult<AttributeValue> {
    match (current, operand) {
        (None, operand) => Ok(operand),
        (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
            match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(a), Ok(b)) => Ok(AttributeValue::number(format_number(a + b))),
                _ => Err(invalid("ADD on a malformed number")),
            }
        }
        (Some(AttributeValue::Ss(a)), AttributeValue::Ss(b)) => Ok(AttributeValue::Ss(union(a, b))),
        (Some(AttributeValue::Ns(a)), AttributeValue::Ns(b)) => Ok(AttributeValue::Ns(union(a, b))),
        (Some(AttributeValue::Bs(a)), AttributeValue::Bs(b)) => Ok(AttributeValue::Bs(union(a, b))),
        (Some(current), operand) => Err(invalid(format!(
            "ADD {} to {}",
            operand.tag(),
            current.tag()
        ))),
    }
}

fn subtract(current: &AttributeValue, operand: &AttributeValue) -> EvalResult<Option<AttributeValue>> {
    fn remaining<T: Clone + PartialEq>(a: &[T], b: &[T]) -> Vec<T> {
        a.iter().filter(|x| !b.contains(x)).cloned().collect()
    }
    let result = match (current, operand) {
        (AttributeValue::Ss(a), AttributeValue::Ss(b)) => AttributeValue::Ss(remaining(a, b)),
        (AttributeValue::Ns(a), AttributeValue::Ns(b)) => AttributeValue::Ns(remaining(a, b)),
        (AttributeValue::Bs(a), AttributeValue::Bs(b)) => AttributeValue::Bs(remaining(a, b)),
        (current, operand) => {
            return Err(invalid(format!("DELETE {} from {}", operand.tag(), current.tag())))
        }
    };
    let empty = match &result {
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => v.is_empty(),
        AttributeValue::Bs(v) => v.is_empty(),
        _ => false,
    };
    Ok((!empty).then_some(result))
}

fn union<T: Clone + Ord>(a: &[T], b: Vec<T>) -> Vec<T> {
    a.iter().cloned().chain(b).collect::<BTreeSet<_>>().into_iter().collect()
}

fn number(value: &AttributeValue) -> Option<f64> {
    value.as_n().and_then(|n| n.parse().ok())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn size_of(value: &AttributeValue) -> Option<usize> {
    Some(match value {
        AttributeValue::S(s) => s.len(),
        AttributeValue::B(b) => b.len(),
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => v.len(),
        AttributeValue::Bs(v) => v.len(),
        AttributeValue::L(v) => v.len(),
        AttributeValue::M(m) => m.len(),
        _ => return None,
    })
}

fn begins_with(subject: &AttributeValue, prefix: &AttributeValue) -> bool {
    match (subject, prefix) {
        (AttributeValue::S(s), AttributeValue::S(p)) => s.starts_with(p.as_str()),
        (AttributeValue::B(s), AttributeValue::B(p)) => s.starts_with(p),
        _ => false,
    }
}

fn contains(subject: &AttributeValue, operand: &AttributeValue) -> bool {
    match (subject, operand) {
        (AttributeValue::S(s), AttributeValue::S(o)) => s.contains(o.as_str()),
        (AttributeValue::B(s), AttributeValue::B(o)) => {
            o.is_empty() || s.windows(o.len()).any(|w| w == o.as_slice())
        }
        (AttributeValue::Ss(s), AttributeValue::S(o)) => s.contains(o),
        (AttributeValue::Ns(s), AttributeValue::N(o)) => s.contains(o),
        (AttributeValue::Bs(s), AttributeValue::B(o)) => s.contains(o),
        (AttributeValue::L(s), o) => s.iter().any(|x| equal(Some(x), Some(o))),
        _ => false,
    }
}

/// Order two scalar values of the same type: numbers numerically, strings
/// and binaries bytewise.
pub(crate) fn compare(left: Option<&AttributeValue>, right: Option<&AttributeValue>) -> Option<Ordering> {
    match (left?, right?) {
        (AttributeValue::N(_), AttributeValue::N(_)) => {
            number(left?)?.partial_cmp(&number(right?)?)
        }
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn equal(left: Option<&AttributeValue>, right: Option<&AttributeValue>) -> bool {
    match (left, right) {
        (Some(AttributeValue::N(_)), Some(AttributeValue::N(_))) => {
            compare(left, right) == Some(Ordering::Equal)
        }
        (Some(AttributeValue::Ss(a)), Some(AttributeValue::Ss(b)))
        | (Some(AttributeValue::Ns(a)), Some(AttributeValue::Ns(b))) => {
            a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
        }
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
