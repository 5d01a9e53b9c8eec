//! # cmdtree
//!
//! A declarative command-tree compiler and dispatcher for command-line
//! applications.
//!
//! Groups and commands are declared with [`GroupDecl`] and [`CommandDecl`];
//! their options and arguments are attached through a [`Registry`] keyed by
//! callable identity. The [`Compiler`] turns the declarations into an
//! immutable [`CommandTree`], and the [`Dispatcher`] runs token lists against
//! it: options may be interleaved across levels, child names resolve through
//! exact names, aliases and unambiguous prefixes, and each group on the path is
//! instantiated before its child runs.
//!
//! ```no_run
//! use cmdtree::{CommandDecl, Dispatcher, GroupDecl, ParameterSpec, Registry, compile};
//!
//! let mut registry = Registry::new();
//! registry.register("App::greet", ParameterSpec::argument("name"));
//!
//! let root = GroupDecl::new("App").command(CommandDecl::new("App::greet", |_, args, _| {
//!     Ok(format!("Hello, {}!", args.string("name")?))
//! }));
//! let tree = compile(root, &registry)?;
//! let _outcome = Dispatcher::new(&tree).dispatch(&["greet", "world"])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod state;

pub use crate::cli::dispatcher::{DispatchError, Dispatcher, Outcome, ResolutionError};
pub use crate::cli::render::{Renderer, TextRenderer, format_result};
pub use crate::core::arg_parser::ParameterError;
pub use crate::core::compiler::{CompileError, Compiler, compile};
pub use crate::core::declaration::{CommandDecl, GroupDecl};
pub use crate::core::registry::{Registry, Signature};
pub use crate::core::settings::{Environment, Settings, SettingsError};
pub use crate::models::{
    CommandTree, InstanceChain, NodeRef, ParameterSpec, ParsedArgs, Value, ValueSource, ValueType,
};
pub use crate::state::{Context, ContextError, ContextStore};
