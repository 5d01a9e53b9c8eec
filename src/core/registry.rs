// src/core/registry.rs

//! # Declaration Registry
//!
//! Collects the [`ParameterSpec`]s attached to each callable before any tree
//! exists. Specs are keyed by the callable's identity (a stable string such as
//! `"GroupOne::greet"`) and attached most-recent-first, the way stacked
//! attributes are applied; the compiler reads them back in declaration order.
//!
//! A callable may also describe its [`Signature`]: the parameter names it
//! accepts, their defaults and type hints. Declared parameters without an
//! explicit spec get one inferred, and explicit specs without a default
//! inherit the one from the signature.

use crate::core::compiler::CompileError;
use crate::core::parameters::{self, DeclarationError};
use crate::models::{ParamKind, ParameterSpec, Value, ValueType};
use std::collections::{HashMap, HashSet, VecDeque};

/// One parameter as declared by a callable.
#[derive(Debug, Clone)]
pub struct DeclaredParam {
    pub name: String,
    pub default: Option<Value>,
    /// Type hint; when absent it is taken from the default's variant.
    pub annotation: Option<ValueType>,
}

/// The parameters a callable accepts.
///
/// `Signature::default()` accepts any keyword (the equivalent of `**kwargs`)
/// and declares nothing to infer; `Signature::new()` starts closed.
#[derive(Debug, Clone)]
pub struct Signature {
    params: Vec<DeclaredParam>,
    accepts_extra: bool,
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            accepts_extra: true,
        }
    }
}

impl Signature {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            accepts_extra: false,
        }
    }

    /// A parameter without a default: inferred as a required argument.
    pub fn param(self, name: &str) -> Self {
        self.typed(name, None, None::<Value>)
    }

    /// A parameter with a default: inferred as an option.
    pub fn param_default(self, name: &str, default: impl Into<Value>) -> Self {
        self.typed(name, None, Some(default))
    }

    pub fn typed(
        mut self,
        name: &str,
        annotation: Option<ValueType>,
        default: Option<impl Into<Value>>,
    ) -> Self {
        self.params.push(DeclaredParam {
            name: crate::models::normalize_name(name),
            default: default.map(Into::into),
            annotation,
        });
        self
    }

    /// Also accept parameters that are not listed.
    pub fn kwargs(mut self) -> Self {
        self.accepts_extra = true;
        self
    }

    pub fn get(&self, name: &str) -> Option<&DeclaredParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn params(&self) -> &[DeclaredParam] {
        &self.params
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.accepts_extra || self.get(name).is_some()
    }
}

/// Pending parameter specs, keyed by callable identity.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pending: HashMap<String, VecDeque<ParameterSpec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `spec` to `callable`.
    pub fn register(&mut self, callable: &str, spec: ParameterSpec) -> &mut Self {
        log::trace!("Registering parameter '{}' on '{}'", spec.name, callable);
        self.pending
            .entry(callable.to_string())
            .or_default()
            .push_front(spec);
        self
    }

    /// Parses a declaration string (see [`parameters`]) and attaches it.
    pub fn declare(&mut self, callable: &str, decl: &str) -> Result<&mut Self, DeclarationError> {
        let spec = parameters::parse_parameter_decl(decl)?;
        Ok(self.register(callable, spec))
    }

    /// Specs in attachment order: most recently registered first.
    pub fn pending(&self, callable: &str) -> Vec<&ParameterSpec> {
        self.pending
            .get(callable)
            .map(|specs| specs.iter().collect())
            .unwrap_or_default()
    }

    /// Specs in declaration order.
    pub fn declared(&self, callable: &str) -> Vec<ParameterSpec> {
        self.pending
            .get(callable)
            .map(|specs| specs.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The final parameter list of a callable, in signature order: each
    /// declared parameter takes its explicit spec (with the signature default
    /// merged in) or else an inferred one. Explicit specs the signature does
    /// not list follow in declaration order.
    pub(crate) fn resolve_params(
        &self,
        callable: &str,
        signature: &Signature,
        node_path: &str,
    ) -> Result<Vec<ParameterSpec>, CompileError> {
        let mut explicit = self.declared(callable);

        let mut names = HashSet::new();
        let mut flags = HashSet::new();
        for spec in &explicit {
            if !names.insert(spec.name.clone()) {
                return Err(CompileError::DuplicateParameter {
                    node: node_path.to_string(),
                    name: spec.name.clone(),
                });
            }
            for flag in &spec.flags {
                if !flags.insert(flag.clone()) {
                    return Err(CompileError::DuplicateParameter {
                        node: node_path.to_string(),
                        name: flag.clone(),
                    });
                }
            }
            if !signature.accepts(&spec.name) {
                return Err(CompileError::UnknownParameter {
                    node: node_path.to_string(),
                    name: spec.name.clone(),
                });
            }
        }

        for spec in &mut explicit {
            merge_signature_default(spec, signature).map_err(|reason| {
                CompileError::InvalidDefault {
                    node: node_path.to_string(),
                    name: spec.name.clone(),
                    reason,
                }
            })?;
        }

        let inferred = infer_defaults(signature, &explicit);
        if !inferred.is_empty() {
            log::debug!(
                "Inferred {} parameter(s) for '{}' from its signature",
                inferred.len(),
                callable
            );
        }
        Ok(in_signature_order(signature, explicit, inferred))
    }
}

/// Positional binding follows this order, so it must match the callable's.
fn in_signature_order(
    signature: &Signature,
    explicit: Vec<ParameterSpec>,
    inferred: Vec<ParameterSpec>,
) -> Vec<ParameterSpec> {
    let mut explicit: Vec<Option<ParameterSpec>> = explicit.into_iter().map(Some).collect();
    let mut inferred = inferred.into_iter();
    let mut ordered = Vec::with_capacity(explicit.len() + inferred.len());

    for param in signature.params() {
        let declared = explicit
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|spec| spec.name == param.name))
            .and_then(Option::take);
        match declared {
            Some(spec) => ordered.push(spec),
            None => ordered.extend(inferred.next()),
        }
    }
    ordered.extend(explicit.into_iter().flatten());
    ordered
}

/// Gives an explicit spec the signature's default when it declares none.
fn merge_signature_default(spec: &mut ParameterSpec, signature: &Signature) -> Result<(), String> {
    if spec.default.is_some() {
        return Ok(());
    }
    let Some(default) = signature.get(&spec.name).and_then(|p| p.default.clone()) else {
        return Ok(());
    };
    spec.default = Some(parameters::coerce(&spec.value_type, default)?);
    match spec.kind {
        ParamKind::Option => spec.show_default = true,
        ParamKind::Argument if !spec.required_explicit => spec.required = false,
        ParamKind::Argument => {}
    }
    Ok(())
}

/// Synthesises specs for declared parameters that have no explicit spec.
///
/// A parameter with a default becomes an option carrying that default (a
/// boolean default makes it a flag); one without becomes a required argument.
/// The type comes from the annotation, else from the default's variant.
pub fn infer_defaults(signature: &Signature, explicit: &[ParameterSpec]) -> Vec<ParameterSpec> {
    signature
        .params()
        .iter()
        .filter(|p| !explicit.iter().any(|spec| spec.name == p.name))
        .map(infer_one)
        .collect()
}

fn infer_one(param: &DeclaredParam) -> ParameterSpec {
    let value_type = param
        .annotation
        .clone()
        .unwrap_or_else(|| type_of_default(param.default.as_ref()));

    match &param.default {
        Some(default) => {
            let long = format!("--{}", param.name.replace('_', "-"));
            let typed = parameters::coerce(&value_type, default.clone())
                .unwrap_or_else(|_| default.clone());
            let spec = if matches!(value_type, ValueType::Bool) {
                ParameterSpec::flag(&long)
            } else {
                ParameterSpec::option(&long).value_type(value_type)
            };
            spec.dest(&param.name).default(typed).show_default()
        }
        None => ParameterSpec::argument(&param.name).value_type(value_type),
    }
}

fn type_of_default(default: Option<&Value>) -> ValueType {
    match default {
        Some(Value::Bool(_)) => ValueType::Bool,
        Some(Value::Int(_)) => ValueType::Int,
        Some(Value::Float(_)) => ValueType::Float,
        Some(Value::Path(_)) => ValueType::Path,
        _ => ValueType::Str,
    }
}
