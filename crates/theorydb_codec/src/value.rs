//! The wire attribute value union.

use std::collections::BTreeMap;
use std::fmt;

/// A single item on the wire: attribute name to value.
///
/// A `BTreeMap` keeps attribute names sorted, which makes every JSON
/// rendering of an item canonical without an explicit sort step.
pub type Item = BTreeMap<String, AttributeValue>;

/// A value in the store's document protocol.
///
/// Numbers travel as decimal strings so that no precision is lost between
/// the caller and the store. Binary payloads are raw bytes here and base64
/// only inside JSON renderings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number, as a decimal string.
    N(String),
    /// Binary.
    B(Vec<u8>),
    /// Boolean.
    Bool(bool),
    /// Null marker.
    Null,
    /// String set.
    Ss(Vec<String>),
    /// Number set.
    Ns(Vec<String>),
    /// Binary set.
    Bs(Vec<Vec<u8>>),
    /// Ordered list.
    L(Vec<AttributeValue>),
    /// Map with canonically sorted keys.
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Returns the protocol tag of this value (`"S"`, `"BOOL"`, ...).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Bool(_) => "BOOL",
            Self::Null => "NULL",
            Self::Ss(_) => "SS",
            Self::Ns(_) => "NS",
            Self::Bs(_) => "BS",
            Self::L(_) => "L",
            Self::M(_) => "M",
        }
    }

    /// Build a number value from anything that displays as a decimal.
    pub fn number(n: impl fmt::Display) -> Self {
        Self::N(n.to_string())
    }

    /// Returns the string if this is an `S` value.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the decimal string if this is an `N` value.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the bytes if this is a `B` value.
    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            Self::B(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the boolean if this is a `BOOL` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the elements if this is an `L` value.
    pub fn as_l(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::L(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the entries if this is an `M` value.
    pub fn as_m(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            Self::M(m) => Some(m),
            _ => None,
        }
    }

    /// Check if this is the null marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is one of the three set kinds.
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Ss(_) | Self::Ns(_) | Self::Bs(_))
    }

    /// Look up a key if this is an `M` value.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.as_m().and_then(|m| m.get(key))
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::S(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::S(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::N(n.to_string())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        Self::B(b)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(l: Vec<AttributeValue>) -> Self {
        Self::L(l)
    }
}

impl From<BTreeMap<String, AttributeValue>> for AttributeValue {
    fn from(m: BTreeMap<String, AttributeValue>) -> Self {
        Self::M(m)
    }
}
