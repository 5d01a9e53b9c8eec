// src/core/parameters.rs

//! # Parameter declarations and value conversion
//!
//! Parameters can be declared with a compact string form instead of chained
//! builder calls:
//!
//! ```text
//! --config-dir/-c(type=path, default='./config', help='Config directory.')
//! name(required, help="Who to greet")
//! names(many)
//! --verbose(flag)
//! ```
//!
//! A specifier starting with `-` declares an option (spellings separated by
//! `/`), anything else declares a positional argument. The optional
//! parenthesised list holds `key=value` modifiers and boolean markers.

use crate::models::{ParamKind, ParameterSpec, Value, ValueType};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

lazy_static! {
    static ref PARAMETER_DECL_RE: Regex =
        Regex::new(r"^\s*([^(\s]+)\s*(?:\((.*)\))?\s*$").expect("valid declaration regex");
}

lazy_static! {
    static ref MODIFIERS_RE: Regex =
        Regex::new(r#"\s*([^=,\s]+)(?:\s*=\s*(?:'([^']*)'|"([^"]*)"|([^,]*)))?\s*"#)
            .expect("valid modifiers regex");
}

lazy_static! {
    static ref ARGUMENT_NAME_RE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid argument name regex");
}

#[derive(Error, Debug, PartialEq)]
pub enum DeclarationError {
    #[error("Invalid parameter declaration: '{0}'")]
    InvalidFormat(String),
    #[error("Invalid argument name '{0}'.")]
    InvalidArgumentName(String),
    #[error("Unknown modifier key: '{0}'")]
    UnknownModifier(String),
    #[error("Unknown boolean modifier: '{0}' (or missing value)")]
    UnknownBooleanModifier(String),
    #[error("Unknown parameter type: '{0}'")]
    UnknownType(String),
    #[error("Type 'choice' requires a 'choices' modifier.")]
    MissingChoices,
    #[error("Invalid default for '{name}': {reason}")]
    InvalidDefault { name: String, reason: String },
}

/// The modifiers found inside the parentheses of a declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterModifiers {
    pub required: bool,
    pub flag: bool,
    pub eager: bool,
    pub many: bool,
    pub show_default: bool,
    pub default_value: Option<String>,
    pub help: Option<String>,
    pub type_name: Option<String>,
    pub choices: Option<Vec<String>>,
    pub envvar: Option<String>,
    pub dest: Option<String>,
}

/// Parses a full declaration such as `--size(default='small', choices='small|large')`.
pub fn parse_parameter_decl(decl: &str) -> Result<ParameterSpec, DeclarationError> {
    let caps = PARAMETER_DECL_RE
        .captures(decl)
        .ok_or_else(|| DeclarationError::InvalidFormat(decl.to_string()))?;

    let specifier = caps
        .get(1)
        .map(|m| m.as_str())
        .ok_or_else(|| DeclarationError::InvalidFormat(decl.to_string()))?;
    let modifiers = match caps.get(2) {
        Some(m) => parse_parameter_modifiers_from_str(m.as_str())?,
        None => ParameterModifiers::default(),
    };

    let mut spec = if specifier.starts_with('-') {
        if modifiers.flag {
            ParameterSpec::flag(specifier)
        } else {
            ParameterSpec::option(specifier)
        }
    } else {
        if !ARGUMENT_NAME_RE.is_match(specifier) {
            return Err(DeclarationError::InvalidArgumentName(specifier.to_string()));
        }
        ParameterSpec::argument(specifier)
    };
    if spec.name.is_empty() || (spec.flags.is_empty() && spec.kind == ParamKind::Option) {
        return Err(DeclarationError::InvalidFormat(decl.to_string()));
    }

    if let Some(dest) = &modifiers.dest {
        spec = spec.dest(dest);
    }
    if !modifiers.flag {
        spec = spec.value_type(resolve_type(&modifiers)?);
    }
    if modifiers.many {
        spec = spec.many();
    }
    if modifiers.required {
        spec = spec.required(true);
    }
    if modifiers.eager {
        spec = spec.eager();
    }
    if modifiers.show_default {
        spec = spec.show_default();
    }
    if let Some(help) = &modifiers.help {
        spec = spec.help(help);
    }
    if let Some(var) = &modifiers.envvar {
        spec = spec.envvar(var);
    }
    if let Some(raw) = &modifiers.default_value {
        let value = convert(&spec.value_type, raw).map_err(|reason| {
            DeclarationError::InvalidDefault {
                name: spec.name.clone(),
                reason,
            }
        })?;
        spec = spec.default(value);
    }

    log::debug!("Parsed parameter declaration '{}' -> {:?}", decl, spec.name);
    Ok(spec)
}

/// Parses a modifier string, e.g. `required, default='staging', help="Target env"`.
pub fn parse_parameter_modifiers_from_str(s: &str) -> Result<ParameterModifiers, DeclarationError> {
    log::trace!("Parsing modifiers string: '{}'", s);
    let mut modifiers = ParameterModifiers::default();
    if s.trim().is_empty() {
        return Ok(modifiers);
    }

    for caps in MODIFIERS_RE.captures_iter(s) {
        let key = caps.get(1).map_or("", |m| m.as_str()).trim();
        if key.is_empty() {
            continue;
        }

        let value = caps
            .get(2)
            .or(caps.get(3))
            .or(caps.get(4))
            .map(|m| m.as_str().trim().to_string());

        if let Some(val) = value {
            match key {
                "default" => modifiers.default_value = Some(val),
                "help" => modifiers.help = Some(val),
                "type" => modifiers.type_name = Some(val),
                "choices" => {
                    modifiers.choices = Some(
                        val.split('|')
                            .map(str::trim)
                            .filter(|c| !c.is_empty())
                            .map(str::to_string)
                            .collect(),
                    );
                }
                "envvar" => modifiers.envvar = Some(val),
                "dest" => modifiers.dest = Some(val),
                _ => return Err(DeclarationError::UnknownModifier(key.to_string())),
            }
        } else {
            match key {
                "required" => modifiers.required = true,
                "flag" => modifiers.flag = true,
                "eager" => modifiers.eager = true,
                "many" => modifiers.many = true,
                "show_default" => modifiers.show_default = true,
                _ => return Err(DeclarationError::UnknownBooleanModifier(key.to_string())),
            }
        }
    }

    Ok(modifiers)
}

fn resolve_type(modifiers: &ParameterModifiers) -> Result<ValueType, DeclarationError> {
    if let Some(choices) = &modifiers.choices {
        return Ok(ValueType::Choice(choices.clone()));
    }
    match modifiers.type_name.as_deref() {
        None | Some("str" | "string" | "text") => Ok(ValueType::Str),
        Some("int" | "integer") => Ok(ValueType::Int),
        Some("float") => Ok(ValueType::Float),
        Some("bool" | "boolean") => Ok(ValueType::Bool),
        Some("path") => Ok(ValueType::Path),
        Some("choice") => Err(DeclarationError::MissingChoices),
        Some(other) => Err(DeclarationError::UnknownType(other.to_string())),
    }
}

// --- VALUE CONVERSION ---

/// Converts a raw token into a typed value. The error is a user-facing reason.
pub fn convert(value_type: &ValueType, raw: &str) -> Result<Value, String> {
    match value_type {
        ValueType::Str => Ok(Value::Str(raw.to_string())),
        ValueType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("'{}' is not a valid integer.", raw)),
        ValueType::Float => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("'{}' is not a valid float.", raw)),
        ValueType::Bool => parse_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' is not a valid boolean.", raw)),
        ValueType::Path => Ok(Value::Path(PathBuf::from(
            shellexpand::tilde(raw).into_owned(),
        ))),
        ValueType::Choice(choices) => {
            if choices.iter().any(|c| c == raw) {
                Ok(Value::Str(raw.to_string()))
            } else {
                let listed: Vec<String> = choices.iter().map(|c| format!("'{}'", c)).collect();
                Err(format!("'{}' is not one of {}.", raw, listed.join(", ")))
            }
        }
        ValueType::Custom(custom) => (custom.convert)(raw),
    }
}

/// Brings an already-typed value (a declared default, a settings entry) in line
/// with `value_type`. Strings go through [`convert`].
pub fn coerce(value_type: &ValueType, value: Value) -> Result<Value, String> {
    match (value_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (_, Value::Str(s)) => convert(value_type, &s),
        (_, Value::List(items)) => items
            .into_iter()
            .map(|item| coerce(value_type, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (ValueType::Str, other) => Ok(Value::Str(other.to_string())),
        (ValueType::Int, v @ Value::Int(_))
        | (ValueType::Float, v @ Value::Float(_))
        | (ValueType::Bool, v @ Value::Bool(_))
        | (ValueType::Path, v @ Value::Path(_)) => Ok(v),
        (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (ValueType::Choice(_) | ValueType::Custom(_), other) => {
            convert(value_type, &other.to_string())
        }
        (ty, other) => Err(format!(
            "'{}' is not a valid {}.",
            other,
            ty.metavar().to_lowercase()
        )),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

// MARK: --- UNIT TESTS ---
