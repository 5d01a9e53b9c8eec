// src/core/declaration.rs

//! Builders describing groups and commands before compilation.
//!
//! A [`GroupDecl`] stands for a class-like declaration: a constructor with its
//! own parameters, plus members that are nested groups, commands, or aliases
//! of other members. Parameters themselves are attached separately through the
//! [`Registry`](crate::core::registry::Registry), keyed by the callable id of
//! the constructor (`"<TypeName>::new"` unless overridden) or of the command.

use crate::core::registry::Signature;
use crate::models::{ConstructFn, InstanceChain, InvokeFn, ParsedArgs, Value, instance};
use crate::state::Context;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A member of a group declaration.
#[derive(Debug)]
pub enum Member {
    /// A nested group, named after the attribute it is bound to.
    Group { attr: String, decl: GroupDecl },
    Command(CommandDecl),
    /// `alias` resolves to the existing member `target`.
    Alias { alias: String, target: String },
}

/// A group declaration.
pub struct GroupDecl {
    pub(crate) type_name: String,
    pub(crate) name: Option<String>,
    pub(crate) help: Option<String>,
    pub(crate) callable: String,
    pub(crate) signature: Signature,
    pub(crate) construct: ConstructFn,
    pub(crate) members: Vec<Member>,
    pub(crate) invoke_without_command: bool,
}

impl fmt::Debug for GroupDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupDecl")
            .field("type_name", &self.type_name)
            .field("name", &self.name)
            .field("callable", &self.callable)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

impl GroupDecl {
    /// A group whose constructor takes no parameters and keeps no state.
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: None,
            help: None,
            callable: format!("{}::new", type_name),
            signature: Signature::default(),
            construct: Arc::new(|_: &ParsedArgs, _: &Context<'_>| Ok::<_, anyhow::Error>(instance(()))),
            members: Vec::new(),
            invoke_without_command: false,
        }
    }

    /// Overrides the canonical name (defaults to the lower-cased type or attribute name).
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    /// Overrides the registry key of the constructor.
    pub fn callable(mut self, id: &str) -> Self {
        self.callable = id.to_string();
        self
    }

    /// The registry key constructor parameters are attached under.
    pub fn callable_id(&self) -> &str {
        &self.callable
    }

    /// Sets the constructor. The instance it returns is available to every
    /// command below this group through [`InstanceChain`].
    pub fn constructor<T, F>(mut self, signature: Signature, construct: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ParsedArgs, &Context<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.signature = signature;
        self.construct = Arc::new(move |args: &ParsedArgs, ctx: &Context<'_>| {
            construct(args, ctx).map(instance)
        });
        self
    }

    pub fn group(mut self, attr: &str, decl: Self) -> Self {
        self.members.push(Member::Group {
            attr: attr.to_string(),
            decl,
        });
        self
    }

    pub fn command(mut self, decl: CommandDecl) -> Self {
        self.members.push(Member::Command(decl));
        self
    }

    /// Declares `alias` as another name for the member `target`.
    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        self.members.push(Member::Alias {
            alias: alias.to_string(),
            target: target.to_string(),
        });
        self
    }

    /// Running this group without a child is valid and does not show help.
    pub fn invoke_without_command(mut self) -> Self {
        self.invoke_without_command = true;
        self
    }
}

/// A leaf command declaration.
pub struct CommandDecl {
    pub(crate) callable: String,
    pub(crate) name: Option<String>,
    pub(crate) help: Option<String>,
    pub(crate) signature: Signature,
    pub(crate) invoke: InvokeFn,
}

impl fmt::Debug for CommandDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDecl")
            .field("callable", &self.callable)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CommandDecl {
    /// `callable` is the registry key; its last `::`/`.` segment names the command.
    pub fn new<V, F>(callable: &str, invoke: F) -> Self
    where
        V: Into<Value>,
        F: Fn(&InstanceChain, &ParsedArgs, &Context<'_>) -> anyhow::Result<V>
            + Send
            + Sync
            + 'static,
    {
        Self {
            callable: callable.to_string(),
            name: None,
            help: None,
            signature: Signature::default(),
            invoke: Arc::new(
                move |chain: &InstanceChain, args: &ParsedArgs, ctx: &Context<'_>| {
                    invoke(chain, args, ctx).map(Into::<Value>::into)
                },
            ),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    pub fn callable_id(&self) -> &str {
        &self.callable
    }
}
