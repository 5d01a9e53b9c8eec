// src/core/compiler.rs

//! # Compiler
//!
//! Turns a hierarchy of [`GroupDecl`]s into an immutable [`CommandTree`].
//! Compilation is pure: it reads the [`Registry`] and the declarations, checks
//! every structural invariant, and either returns a complete tree or the first
//! error found. A tree is never partially usable.

use crate::{
    constants::{DEFAULT_HELP_FLAGS, HELP_PARAM_NAME},
    core::{
        declaration::{CommandDecl, GroupDecl, Member},
        registry::Registry,
        settings::Settings,
    },
    models::{Arity, CommandNode, CommandTree, GroupNode, Node, ParameterSpec, ValueType},
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Represents errors found while compiling declarations. All of them are fatal.
#[derive(Error, Debug, PartialEq)]
pub enum CompileError {
    /// Two explicit specs on one callable share a name or a flag spelling.
    #[error("Duplicate parameter '{name}' on '{node}'.")]
    DuplicateParameter { node: String, name: String },
    /// A child name or alias is already taken in its parent's namespace.
    #[error("Name '{name}' is already used by another command or alias in '{parent}'.")]
    NameCollision { parent: String, name: String },
    /// An alias names a member that does not exist.
    #[error("Alias '{alias}' in '{parent}' points to unknown command '{target}'.")]
    DanglingAlias {
        parent: String,
        alias: String,
        target: String,
    },
    /// `many` on an option, or on an argument that is not the last one.
    #[error("Parameter '{name}' on '{node}' cannot take many values: only the last argument may.")]
    InvalidArity { node: String, name: String },
    /// An explicit spec names a parameter its callable does not accept.
    #[error("Parameter '{name}' is not accepted by the callable behind '{node}'.")]
    UnknownParameter { node: String, name: String },
    #[error("Invalid default for '{name}' on '{node}': {reason}")]
    InvalidDefault {
        node: String,
        name: String,
        reason: String,
    },
    #[error("Flag '{name}' on '{node}' must be boolean.")]
    NonBooleanFlag { node: String, name: String },
    #[error("Parameter '{name}' on '{node}' clashes with the built-in help option.")]
    ReservedParameter { node: String, name: String },
    #[error("Invalid command name '{name}' in '{parent}'.")]
    InvalidName { parent: String, name: String },
}

type CompileResult<T> = Result<T, CompileError>;

/// Compiles declarations against a registry.
#[derive(Debug)]
pub struct Compiler<'r> {
    registry: &'r Registry,
    help_flags: Vec<String>,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            help_flags: DEFAULT_HELP_FLAGS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Takes the help flag spellings from `settings`.
    pub fn with_settings(registry: &'r Registry, settings: &Settings) -> Self {
        let mut compiler = Self::new(registry);
        if !settings.help_flags.is_empty() {
            compiler.help_flags = settings.help_flags.clone();
        }
        compiler
    }

    /// Compiles the root declaration into a tree.
    pub fn compile(&self, root: GroupDecl) -> CompileResult<CommandTree> {
        let name = root
            .name
            .clone()
            .unwrap_or_else(|| root.type_name.to_lowercase());
        validate_name(&name, "")?;
        let root = self.compile_group(root, name, "")?;
        log::debug!("Compiled command tree rooted at '{}'", root.name);
        Ok(CommandTree { root })
    }

    fn compile_group(&self, decl: GroupDecl, name: String, parent_path: &str) -> CompileResult<GroupNode> {
        let path = join_path(parent_path, &name);
        log::trace!("Compiling group '{}'", path);

        let mut params = self
            .registry
            .resolve_params(&decl.callable, &decl.signature, &path)?;
        self.finish_params(&mut params, &path)?;

        let mut children: BTreeMap<String, Node> = BTreeMap::new();
        let mut names: BTreeMap<String, String> = BTreeMap::new();
        let mut pending_aliases = Vec::new();

        for member in decl.members {
            let (child_name, node) = match member {
                Member::Group { attr, decl: child } => {
                    let child_name = child.name.clone().unwrap_or_else(|| attr.to_lowercase());
                    validate_name(&child_name, &path)?;
                    ensure_free(&names, &child_name, &path)?;
                    let node = self.compile_group(child, child_name.clone(), &path)?;
                    (child_name, Node::Group(node))
                }
                Member::Command(command) => {
                    let child_name = command
                        .name
                        .clone()
                        .unwrap_or_else(|| derive_command_name(&command.callable));
                    validate_name(&child_name, &path)?;
                    ensure_free(&names, &child_name, &path)?;
                    let node = self.compile_command(command, child_name.clone(), &path)?;
                    (child_name, Node::Command(node))
                }
                Member::Alias { alias, target } => {
                    pending_aliases.push((alias, target));
                    continue;
                }
            };
            names.insert(child_name.clone(), child_name.clone());
            children.insert(child_name, node);
        }

        // Aliases may refer to members declared after them, so they are bound last.
        for (alias, target) in pending_aliases {
            let canonical = names
                .get(&target)
                .cloned()
                .ok_or_else(|| CompileError::DanglingAlias {
                    parent: path.clone(),
                    alias: alias.clone(),
                    target: target.clone(),
                })?;
            validate_name(&alias, &path)?;
            ensure_free(&names, &alias, &path)?;
            if let Some(child) = children.get_mut(&canonical) {
                aliases_mut(child).insert(alias.clone());
            }
            log::trace!("Alias '{}' -> '{}' in '{}'", alias, canonical, path);
            names.insert(alias, canonical);
        }

        Ok(GroupNode {
            name,
            help: decl.help.unwrap_or_default(),
            aliases: BTreeSet::new(),
            params,
            children,
            construct: decl.construct,
            invoke_without_command: decl.invoke_without_command,
            names,
        })
    }

    fn compile_command(&self, decl: CommandDecl, name: String, parent_path: &str) -> CompileResult<CommandNode> {
        let path = join_path(parent_path, &name);
        log::trace!("Compiling command '{}'", path);

        let mut params = self
            .registry
            .resolve_params(&decl.callable, &decl.signature, &path)?;
        self.finish_params(&mut params, &path)?;

        Ok(CommandNode {
            name,
            help: decl.help.unwrap_or_default(),
            aliases: BTreeSet::new(),
            params,
            invoke: decl.invoke,
        })
    }

    /// Checks the per-node parameter invariants and appends the help option.
    fn finish_params(&self, params: &mut Vec<ParameterSpec>, path: &str) -> CompileResult<()> {
        let argument_count = params.iter().filter(|p| p.is_argument()).count();
        let mut argument_index = 0;

        for spec in params.iter() {
            if spec.name == HELP_PARAM_NAME
                || spec.flags.iter().any(|f| self.help_flags.contains(f))
            {
                return Err(CompileError::ReservedParameter {
                    node: path.to_string(),
                    name: spec.name.clone(),
                });
            }
            if spec.flag_only && !matches!(spec.value_type, ValueType::Bool) {
                return Err(CompileError::NonBooleanFlag {
                    node: path.to_string(),
                    name: spec.name.clone(),
                });
            }
            if spec.is_argument() {
                argument_index += 1;
            }
            let misplaced_many = spec.arity == Arity::Many
                && (spec.is_option() || argument_index != argument_count);
            if misplaced_many {
                return Err(CompileError::InvalidArity {
                    node: path.to_string(),
                    name: spec.name.clone(),
                });
            }
        }

        params.push(ParameterSpec::help_option(&self.help_flags));
        Ok(())
    }
}

/// Compiles `root` with the default help flags.
pub fn compile(root: GroupDecl, registry: &Registry) -> CompileResult<CommandTree> {
    Compiler::new(registry).compile(root)
}

/// `"GroupOne::say_hello"` -> `say-hello`.
fn derive_command_name(callable: &str) -> String {
    let last = callable
        .rsplit("::")
        .next()
        .and_then(|s| s.rsplit('.').next())
        .unwrap_or(callable);
    last.to_lowercase().replace('_', "-")
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{} {}", parent, name)
    }
}

fn validate_name(name: &str, parent: &str) -> CompileResult<()> {
    if name.is_empty() || name.starts_with('-') || name.contains(char::is_whitespace) {
        return Err(CompileError::InvalidName {
            parent: parent.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn ensure_free(names: &BTreeMap<String, String>, name: &str, parent: &str) -> CompileResult<()> {
    if names.contains_key(name) {
        return Err(CompileError::NameCollision {
            parent: parent.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn aliases_mut(node: &mut Node) -> &mut BTreeSet<String> {
    match node {
        Node::Group(g) => &mut g.aliases,
        Node::Command(c) => &mut c.aliases,
    }
}
