// src/models.rs

use crate::state::Context;
use serde::{Deserialize, Serialize};
use std::any::{Any, type_name};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

// --- VALUES ---

/// A dynamically typed value: a parsed parameter, a `meta` entry or a command's return value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(untagged)]
pub enum Value {
    /// No value. Commands returning `Null` print nothing.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Path(p) => p.to_str(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            Self::Str(s) => Some(Path::new(s)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(", "))
            }
            Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

// --- PARAMETER SPECS ---

/// Whether a parameter is a named option or a positional argument.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Option,
    Argument,
}

/// How many tokens a parameter consumes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Arity {
    #[default]
    One,
    /// Only legal on the last positional argument of a node.
    Many,
}

/// Signature of a user-provided conversion for [`ValueType::Custom`].
pub type ConvertFn = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// A named user conversion, shown in help under its upper-cased name.
#[derive(Clone)]
pub struct CustomType {
    pub name: String,
    pub convert: ConvertFn,
}

impl fmt::Debug for CustomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomType")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The type raw tokens are converted into.
#[derive(Debug, Clone, Default)]
pub enum ValueType {
    #[default]
    Str,
    Int,
    Float,
    Bool,
    Path,
    Choice(Vec<String>),
    Custom(CustomType),
}

impl ValueType {
    /// Builds a custom type from a conversion closure.
    pub fn custom<F>(name: &str, convert: F) -> Self
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Custom(CustomType {
            name: name.to_string(),
            convert: Arc::new(convert),
        })
    }

    /// The placeholder used in usage lines and option listings.
    pub fn metavar(&self) -> String {
        match self {
            Self::Str => "TEXT".to_string(),
            Self::Int => "INTEGER".to_string(),
            Self::Float => "FLOAT".to_string(),
            Self::Bool => "BOOLEAN".to_string(),
            Self::Path => "PATH".to_string(),
            Self::Choice(choices) => format!("[{}]", choices.join("|")),
            Self::Custom(custom) => custom.name.to_uppercase(),
        }
    }
}

/// Immutable description of one option or positional argument.
///
/// Specs are built with the constructors below and the chained setters, then
/// handed to the [`Registry`](crate::core::registry::Registry). Once compiled
/// into a node they are never mutated.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    /// Identifier the parsed value is stored under (`config_dir` for `--config-dir`).
    pub name: String,
    pub kind: ParamKind,
    /// Flag spellings for options (`--config-dir`, `-c`). Empty for arguments.
    pub flags: Vec<String>,
    pub value_type: ValueType,
    pub arity: Arity,
    pub required: bool,
    pub default: Option<Value>,
    /// A boolean switch that consumes no value token.
    pub flag_only: bool,
    /// Processed as soon as it is seen; short-circuits the dispatch.
    pub eager: bool,
    pub help: String,
    /// Environment variable consulted when the option is absent from the command line.
    pub envvar: Option<String>,
    pub show_default: bool,
    pub(crate) required_explicit: bool,
}

impl ParameterSpec {
    fn blank(name: String, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            flags: Vec::new(),
            value_type: ValueType::Str,
            arity: Arity::One,
            required: false,
            default: None,
            flag_only: false,
            eager: false,
            help: String::new(),
            envvar: None,
            show_default: false,
            required_explicit: false,
        }
    }

    /// An option with one or more `/`-separated spellings, e.g. `"--config-dir/-c"`.
    pub fn option(flags: &str) -> Self {
        let flags: Vec<String> = flags
            .split('/')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        let name = derive_option_name(&flags);
        let mut spec = Self::blank(name, ParamKind::Option);
        spec.flags = flags;
        spec
    }

    /// A boolean switch: no value token, `false` unless present.
    pub fn flag(flags: &str) -> Self {
        let mut spec = Self::option(flags);
        spec.flag_only = true;
        spec.value_type = ValueType::Bool;
        spec.default = Some(Value::Bool(false));
        spec
    }

    /// A positional argument. Required unless it gets a default or becomes variadic.
    pub fn argument(name: &str) -> Self {
        let mut spec = Self::blank(normalize_name(name), ParamKind::Argument);
        spec.required = true;
        spec
    }

    /// The eager help option compiled into every node.
    pub(crate) fn help_option(flags: &[String]) -> Self {
        let mut spec = Self::flag(&flags.join("/"));
        spec.name = crate::constants::HELP_PARAM_NAME.to_string();
        spec.eager = true;
        spec.help = crate::constants::HELP_PARAM_TEXT.to_string();
        spec
    }

    pub fn help(mut self, text: &str) -> Self {
        self.help = text.to_string();
        self
    }

    /// Sets the default. An argument with a default becomes optional unless
    /// `required` was set explicitly.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        if self.kind == ParamKind::Argument && !self.required_explicit {
            self.required = false;
        }
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self.required_explicit = true;
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn choices(self, choices: &[&str]) -> Self {
        self.value_type(ValueType::Choice(
            choices.iter().map(|c| c.to_string()).collect(),
        ))
    }

    /// Collects every remaining positional token. A variadic argument is optional
    /// unless `required` was set explicitly.
    pub fn many(mut self) -> Self {
        self.arity = Arity::Many;
        if self.kind == ParamKind::Argument && !self.required_explicit {
            self.required = false;
        }
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn envvar(mut self, var: &str) -> Self {
        self.envvar = Some(var.to_string());
        self
    }

    pub fn show_default(mut self) -> Self {
        self.show_default = true;
        self
    }

    /// Overrides the identifier the value is stored under.
    pub fn dest(mut self, name: &str) -> Self {
        self.name = normalize_name(name);
        self
    }

    pub fn is_option(&self) -> bool {
        self.kind == ParamKind::Option
    }

    pub fn is_argument(&self) -> bool {
        self.kind == ParamKind::Argument
    }

    /// Exact spelling match; flags are never abbreviated.
    pub fn matches_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// The upper-cased placeholder for arguments, the type's metavar for options.
    pub fn metavar(&self) -> String {
        match self.kind {
            ParamKind::Argument => self.name.to_uppercase(),
            ParamKind::Option => self.value_type.metavar(),
        }
    }
}

/// `["--config-dir", "-c"]` -> `config_dir`. Prefers the first long spelling.
fn derive_option_name(flags: &[String]) -> String {
    let chosen = flags
        .iter()
        .find(|f| f.starts_with("--"))
        .or_else(|| flags.first())
        .map(String::as_str)
        .unwrap_or_default();
    normalize_name(chosen.trim_start_matches('-'))
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.replace('-', "_")
}

// --- COMPILED TREE ---

/// A constructed group instance, threaded down to the leaf command.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Builds a group instance from its parsed constructor parameters.
pub type ConstructFn =
    Arc<dyn Fn(&ParsedArgs, &Context<'_>) -> anyhow::Result<Instance> + Send + Sync>;

/// Runs a leaf command against the chain of its ancestors' instances.
pub type InvokeFn =
    Arc<dyn Fn(&InstanceChain, &ParsedArgs, &Context<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// Wraps a value as a group instance.
pub fn instance<T: Any + Send + Sync>(value: T) -> Instance {
    Arc::new(value)
}

/// A leaf of the tree.
#[derive(Clone)]
pub struct CommandNode {
    pub name: String,
    pub help: String,
    pub aliases: BTreeSet<String>,
    pub params: Vec<ParameterSpec>,
    pub invoke: InvokeFn,
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// An inner node: constructor parameters plus named children.
#[derive(Clone)]
pub struct GroupNode {
    pub name: String,
    pub help: String,
    pub aliases: BTreeSet<String>,
    pub params: Vec<ParameterSpec>,
    /// Keyed by canonical name only; aliases live on the child itself.
    pub children: BTreeMap<String, Node>,
    pub construct: ConstructFn,
    /// Running the group without a child is a valid invocation, not a request for help.
    pub invoke_without_command: bool,
    /// Every accepted spelling (canonical names and aliases) -> canonical name.
    pub(crate) names: BTreeMap<String, String>,
}

impl fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupNode")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("params", &self.params)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl GroupNode {
    /// Exact lookup by canonical name or alias.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.names
            .get(name)
            .and_then(|canonical| self.children.get(canonical))
    }

    /// All accepted spellings mapped to their canonical child.
    pub fn name_table(&self) -> &BTreeMap<String, String> {
        &self.names
    }
}

/// An owned child entry.
#[derive(Debug, Clone)]
pub enum Node {
    Group(GroupNode),
    Command(CommandNode),
}

impl Node {
    pub fn as_ref(&self) -> NodeRef<'_> {
        match self {
            Self::Group(g) => NodeRef::Group(g),
            Self::Command(c) => NodeRef::Command(c),
        }
    }

    pub fn name(&self) -> &str {
        self.as_ref().name()
    }
}

/// A borrowed view over either node kind.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Group(&'a GroupNode),
    Command(&'a CommandNode),
}

impl<'a> NodeRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Self::Group(g) => &g.name,
            Self::Command(c) => &c.name,
        }
    }

    pub fn help(&self) -> &'a str {
        match self {
            Self::Group(g) => &g.help,
            Self::Command(c) => &c.help,
        }
    }

    pub fn params(&self) -> &'a [ParameterSpec] {
        match self {
            Self::Group(g) => &g.params,
            Self::Command(c) => &c.params,
        }
    }

    pub fn aliases(&self) -> &'a BTreeSet<String> {
        match self {
            Self::Group(g) => &g.aliases,
            Self::Command(c) => &c.aliases,
        }
    }

    pub fn as_group(&self) -> Option<&'a GroupNode> {
        match self {
            Self::Group(g) => Some(g),
            Self::Command(_) => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

/// The compiled, read-only tree. Built once and shared by every dispatch.
#[derive(Debug, Clone)]
pub struct CommandTree {
    pub root: GroupNode,
}

impl CommandTree {
    pub fn root(&self) -> &GroupNode {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.root.name
    }

    /// Walks exact names (canonical or alias) from the root.
    /// Returns the node together with its ancestor groups, root first.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<(NodeRef<'_>, Vec<&GroupNode>)> {
        let mut ancestors = Vec::new();
        let mut current = NodeRef::Group(&self.root);
        for segment in path {
            let group = current.as_group()?;
            let next = group.child(segment.as_ref())?;
            ancestors.push(group);
            current = next.as_ref();
        }
        Some((current, ancestors))
    }
}

// --- PARSED ARGUMENTS ---

/// Where a bound value came from, in precedence order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    CommandLine,
    Environment,
    DefaultMap,
    Default,
    /// Optional parameter with no value from any source.
    Unset,
}

/// Errors raised by typed accessors in user callbacks.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Parameter '{name}' has no value.")]
    MissingValue { name: String },
    #[error("Parameter '{name}' is not a {expected}.")]
    WrongType { name: String, expected: &'static str },
    #[error("Instance of type '{type_name}' not found on the invocation path.")]
    MissingInstance { type_name: &'static str },
}

/// The values bound for one node after the option/argument pass.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ParsedArgs {
    values: BTreeMap<String, Value>,
    #[serde(skip)]
    sources: BTreeMap<String, ValueSource>,
}

impl ParsedArgs {
    pub(crate) fn insert(&mut self, name: &str, value: Value, source: ValueSource) {
        self.values.insert(name.to_string(), value);
        self.sources.insert(name.to_string(), source);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn source(&self, name: &str) -> Option<ValueSource> {
        self.sources.get(name).copied()
    }

    /// Iterates `(name, value)` pairs in name order, including unset parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, name: &str) -> Result<&Value, AccessError> {
        self.get(name).ok_or_else(|| AccessError::MissingValue {
            name: name.to_string(),
        })
    }

    /// The display form of any non-null value.
    pub fn string(&self, name: &str) -> Result<String, AccessError> {
        self.require(name).map(ToString::to_string)
    }

    /// Like [`Self::string`], but `None` for unset parameters.
    pub fn opt_string(&self, name: &str) -> Option<String> {
        self.get(name).map(ToString::to_string)
    }

    pub fn path(&self, name: &str) -> Result<PathBuf, AccessError> {
        let value = self.require(name)?;
        value
            .as_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| AccessError::WrongType {
                name: name.to_string(),
                expected: "path",
            })
    }

    /// `false` when unset.
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn int(&self, name: &str) -> Result<i64, AccessError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| AccessError::WrongType {
                name: name.to_string(),
                expected: "integer",
            })
    }

    pub fn float(&self, name: &str) -> Result<f64, AccessError> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| AccessError::WrongType {
                name: name.to_string(),
                expected: "float",
            })
    }

    /// Items of a variadic argument; empty when unset.
    pub fn list(&self, name: &str) -> Vec<Value> {
        self.get(name)
            .and_then(Value::as_list)
            .map(<[Value]>::to_vec)
            .unwrap_or_default()
    }
}

// --- INSTANCE CHAIN ---

/// The group instances on the resolved path, root first.
#[derive(Clone, Default)]
pub struct InstanceChain {
    entries: Vec<(String, Instance)>,
}

impl fmt::Debug for InstanceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

impl InstanceChain {
    pub(crate) fn new(entries: Vec<(String, Instance)>) -> Self {
        Self { entries }
    }

    /// The nearest (deepest) instance of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<&T, AccessError> {
        self.entries
            .iter()
            .rev()
            .find_map(|(_, inst)| inst.downcast_ref::<T>())
            .ok_or(AccessError::MissingInstance {
                type_name: type_name::<T>(),
            })
    }

    /// The instance created by the group with the given canonical name.
    pub fn get_named<T: Any + Send + Sync>(&self, group: &str) -> Result<&T, AccessError> {
        self.entries
            .iter()
            .rev()
            .filter(|(name, _)| name == group)
            .find_map(|(_, inst)| inst.downcast_ref::<T>())
            .ok_or(AccessError::MissingInstance {
                type_name: type_name::<T>(),
            })
    }

    /// Canonical names of the instantiated groups, root first.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
