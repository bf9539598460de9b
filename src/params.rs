//! Declared parameter shapes and the validator that checks incoming JSON
//! against them.
//!
//! A validated tree contains only declared keys, every primitive coerced to
//! its canonical JSON form, and defaults filled in for absent fields. Typed
//! parameter structs are then read out of it with serde.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid parameter value detected: {path}: {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        ValidationError {
            path: if path.is_empty() { "(root)".into() } else { path.into() },
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    Text,
    /// `plugintype_pluginname`, e.g. `mod_forum`
    Component,
    /// letters, digits, `_` and `-`
    AlphaNumExt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Required,
    Optional,
    Default(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamSpec {
    Value {
        ty: ParamType,
        presence: Presence,
    },
    Single {
        fields: Vec<(&'static str, ParamSpec)>,
        presence: Presence,
    },
    Multiple {
        content: Box<ParamSpec>,
        presence: Presence,
    },
}

impl ParamSpec {
    pub fn value(ty: ParamType) -> Self {
        ParamSpec::Value {
            ty,
            presence: Presence::Required,
        }
    }

    pub fn single<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, ParamSpec)>,
    {
        ParamSpec::Single {
            fields: fields.into_iter().collect(),
            presence: Presence::Required,
        }
    }

    pub fn multiple(content: ParamSpec) -> Self {
        ParamSpec::Multiple {
            content: Box::new(content),
            presence: Presence::Required,
        }
    }

    pub fn optional(self) -> Self {
        self.with_presence(Presence::Optional)
    }

    pub fn default(self, value: Value) -> Self {
        self.with_presence(Presence::Default(value))
    }

    fn with_presence(mut self, p: Presence) -> Self {
        match &mut self {
            ParamSpec::Value { presence, .. }
            | ParamSpec::Single { presence, .. }
            | ParamSpec::Multiple { presence, .. } => *presence = p,
        }
        self
    }

    fn presence(&self) -> &Presence {
        match self {
            ParamSpec::Value { presence, .. }
            | ParamSpec::Single { presence, .. }
            | ParamSpec::Multiple { presence, .. } => presence,
        }
    }
}

/// Validate `input` against `spec`, returning the normalized tree.
pub fn validate(spec: &ParamSpec, input: &Value) -> Result<Value, ValidationError> {
    validate_at(spec, input, "")
}

/// Validate and then deserialize into the typed parameter struct.
pub fn parse<T: DeserializeOwned>(spec: &ParamSpec, input: &Value) -> Result<T, ValidationError> {
    let clean = validate(spec, input)?;
    serde_json::from_value(clean).map_err(|e| ValidationError::new("", e.to_string()))
}

fn validate_at(spec: &ParamSpec, input: &Value, path: &str) -> Result<Value, ValidationError> {
    match spec {
        ParamSpec::Value { ty, .. } => clean_value(*ty, input, path),
        ParamSpec::Single { fields, .. } => {
            let obj = input
                .as_object()
                .ok_or_else(|| ValidationError::new(path, "expected an object"))?;
            if let Some(unknown) = obj.keys().find(|k| !fields.iter().any(|(name, _)| name == k)) {
                return Err(ValidationError::new(
                    path,
                    format!("unexpected key '{}'", unknown),
                ));
            }
            let mut out = Map::new();
            for (name, field) in fields {
                let field_path = join(path, name);
                match obj.get(*name).filter(|v| !v.is_null()) {
                    Some(v) => {
                        out.insert((*name).to_string(), validate_at(field, v, &field_path)?);
                    }
                    None => match field.presence() {
                        Presence::Required => {
                            return Err(ValidationError::new(&field_path, "required field missing"))
                        }
                        Presence::Optional => {}
                        Presence::Default(d) => {
                            out.insert((*name).to_string(), d.clone());
                        }
                    },
                }
            }
            Ok(Value::Object(out))
        }
        ParamSpec::Multiple { content, .. } => {
            let items = input
                .as_array()
                .ok_or_else(|| ValidationError::new(path, "expected a list"))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{}[{}]", path, i);
                    if item.is_null() {
                        return Err(ValidationError::new(&item_path, "null is not allowed"));
                    }
                    validate_at(content, item, &item_path)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn clean_value(ty: ParamType, v: &Value, path: &str) -> Result<Value, ValidationError> {
    let bad = |what: &str| ValidationError::new(path, format!("expected {}", what));
    match ty {
        ParamType::Int => {
            let n = match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => parse_int(s.trim()),
                _ => None,
            };
            n.map(Value::from).ok_or_else(|| bad("an integer"))
        }
        ParamType::Float => {
            let f = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            f.and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| bad("a finite number"))
        }
        ParamType::Bool => {
            let b = match v {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                Value::String(s) => match s.as_str() {
                    "0" | "false" => Some(false),
                    "1" | "true" => Some(true),
                    _ => None,
                },
                _ => None,
            };
            b.map(Value::Bool).ok_or_else(|| bad("a boolean"))
        }
        ParamType::Text => match v {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(bad("text")),
        },
        ParamType::Component => match v {
            Value::String(s) if is_component(s) => Ok(Value::String(s.clone())),
            _ => Err(bad("a component name like mod_forum")),
        },
        ParamType::AlphaNumExt => match v {
            Value::String(s)
                if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                Ok(Value::String(s.clone()))
            }
            _ => Err(bad("letters, digits, '_' or '-'")),
        },
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `[a-z]+(_[a-z][a-z0-9_]*)?[a-z0-9]+` with no doubled underscore.
pub fn is_component(s: &str) -> bool {
    if s.contains("__") || !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return false;
    }
    let (kind, name) = match s.split_once('_') {
        Some(parts) => parts,
        None => return s.chars().next().is_some_and(|c| c.is_ascii_lowercase()),
    };
    !kind.is_empty()
        && kind.chars().all(|c| c.is_ascii_lowercase())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}
