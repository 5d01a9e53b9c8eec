// src/cli/dispatcher.rs

//! # Dispatcher
//!
//! Walks a token list against a compiled [`CommandTree`]. At every group the
//! dispatcher scans the group's own options, resolves the name token of the
//! next child, pushes a context frame and runs the group constructor, then
//! descends with the remaining tokens. At the leaf it binds the command's
//! parameters, invokes it with the chain of ancestor instances and hands the
//! return value to the [`Renderer`].
//!
//! Every frame pushed during a dispatch is popped before it returns, whatever
//! the outcome. The stack depth after `dispatch` equals the depth before it.

use crate::{
    cli::render::{Renderer, TextRenderer},
    constants::{
        END_OF_OPTIONS, EXIT_AMBIGUOUS_COMMAND, EXIT_INTERNAL, EXIT_INVOCATION_FAILED,
        EXIT_MISSING_PARAMETER, EXIT_OK, EXIT_UNKNOWN_COMMAND, EXIT_USAGE,
    },
    core::{
        arg_parser::{Binder, EagerHit, ParameterError, Scan, ScanMode, Scanner, display_name},
        parameters,
        resolver::{self, Resolution},
        settings::{Environment, Settings},
    },
    models::{
        CommandNode, CommandTree, GroupNode, Instance, InstanceChain, Node, NodeRef, ParameterSpec,
        ParsedArgs, Value,
    },
    state::{Context, ContextError, ContextFrame, ContextStore},
};
use std::collections::BTreeMap;
use thiserror::Error;

/// A name token that could not be resolved to exactly one child.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("No such command '{token}' in '{path}'. Available commands: {}", .siblings.join(", "))]
    UnknownCommand {
        path: String,
        token: String,
        siblings: Vec<String>,
    },
    #[error("\"{token}\" is not unique: {}", .candidates.join(", "))]
    AmbiguousCommand {
        path: String,
        token: String,
        candidates: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    /// A group constructor or the leaf command failed; the error is passed through as is.
    #[error(transparent)]
    Invocation(anyhow::Error),
    #[error("Internal error: {0}")]
    Internal(#[from] ContextError),
    #[error("Cannot split command line '{0}': unbalanced quotes or escapes.")]
    InvalidLine(String),
}

impl DispatchError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resolution(ResolutionError::UnknownCommand { .. }) => EXIT_UNKNOWN_COMMAND,
            Self::Resolution(ResolutionError::AmbiguousCommand { .. }) => EXIT_AMBIGUOUS_COMMAND,
            Self::Parameter(ParameterError::MissingRequired { .. }) => EXIT_MISSING_PARAMETER,
            Self::Parameter(_) | Self::InvalidLine(_) => EXIT_USAGE,
            Self::Invocation(_) => EXIT_INVOCATION_FAILED,
            Self::Internal(_) => EXIT_INTERNAL,
        }
    }

    /// The command path of the node that rejected the input, for usage errors.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Resolution(
                ResolutionError::UnknownCommand { path, .. }
                | ResolutionError::AmbiguousCommand { path, .. },
            ) => Some(path),
            Self::Parameter(e) => Some(e.path()),
            Self::Invocation(_) | Self::Internal(_) | Self::InvalidLine(_) => None,
        }
    }

    /// Usage errors are caused by the command line rather than the command.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Resolution(_) | Self::Parameter(_))
    }
}

fn invocation_error(err: anyhow::Error) -> DispatchError {
    match err.downcast::<ContextError>() {
        Ok(context) => DispatchError::Internal(context),
        Err(other) => DispatchError::Invocation(other),
    }
}

/// The terminal state of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The leaf command ran and returned this value.
    Completed(Value),
    /// Help was requested or implied; `path` holds the canonical names of the node shown.
    HelpShown { path: Vec<String>, text: String },
    /// An eager option short-circuited the dispatch.
    Eager {
        path: Vec<String>,
        option: String,
        value: Value,
    },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        EXIT_OK
    }

    /// The command's return value, if one ran.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) => Some(value),
            Self::HelpShown { .. } | Self::Eager { .. } => None,
        }
    }
}

type DispatchResult<T> = Result<T, DispatchError>;

/// The dispatcher's working state: what has been resolved and instantiated so far.
struct Trail<'t> {
    /// Stack depth when the dispatch started; its root frame lands at this index.
    base: usize,
    groups: Vec<&'t GroupNode>,
    names: Vec<String>,
    instances: Vec<(String, Instance)>,
}

impl Trail<'_> {
    fn display(&self) -> String {
        self.names.join(" ")
    }

    /// Canonical names below the root.
    fn subpath(&self) -> &[String] {
        self.names.get(1..).unwrap_or_default()
    }
}

/// Runs token lists against a compiled tree.
#[derive(Debug)]
pub struct Dispatcher<'t, R = TextRenderer> {
    tree: &'t CommandTree,
    settings: Settings,
    env: Environment,
    renderer: R,
    initial_meta: BTreeMap<String, Value>,
}

impl<'t> Dispatcher<'t, TextRenderer> {
    pub fn new(tree: &'t CommandTree) -> Self {
        Self {
            tree,
            settings: Settings::default(),
            env: Environment::Process,
            renderer: TextRenderer::new(),
            initial_meta: BTreeMap::new(),
        }
    }
}

impl<'t, R: Renderer> Dispatcher<'t, R> {
    pub fn with_renderer<N: Renderer>(self, renderer: N) -> Dispatcher<'t, N> {
        Dispatcher {
            tree: self.tree,
            settings: self.settings,
            env: self.env,
            renderer,
            initial_meta: self.initial_meta,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the process environment used for environment variable lookups.
    pub fn environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Seeds the root frame's `meta` for every dispatch.
    pub fn initial_meta(mut self, meta: BTreeMap<String, Value>) -> Self {
        self.initial_meta = meta;
        self
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Dispatches `argv` (without the program name).
    pub fn dispatch<S: AsRef<str>>(&self, argv: &[S]) -> DispatchResult<Outcome> {
        let tokens: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        log::debug!("Dispatching {:?} against '{}'", tokens, self.tree.name());

        let store = ContextStore::current();
        let entry_depth = store.depth();
        scopeguard::defer! {
            store.truncate(entry_depth);
        }

        let mut trail = Trail {
            base: entry_depth,
            groups: Vec::new(),
            names: Vec::new(),
            instances: Vec::new(),
        };
        let outcome = self.dispatch_group(&store, self.tree.root(), tokens, &mut trail);
        match &outcome {
            Ok(_) => log::debug!("Dispatch of '{}' finished", trail.display()),
            Err(e) => log::debug!("Dispatch of '{}' failed: {}", trail.display(), e),
        }
        outcome
    }

    /// Splits `line` with shell quoting rules, then dispatches it.
    pub fn dispatch_line(&self, line: &str) -> DispatchResult<Outcome> {
        let argv = shlex::split(line).ok_or_else(|| DispatchError::InvalidLine(line.to_string()))?;
        self.dispatch(&argv)
    }

    fn dispatch_group(
        &self,
        store: &ContextStore,
        group: &'t GroupNode,
        tokens: Vec<String>,
        trail: &mut Trail<'t>,
    ) -> DispatchResult<Outcome> {
        trail.names.push(group.name.clone());
        let path = trail.display();
        log::trace!("Entering group '{}' with {:?}", path, tokens);

        let abbreviations = self.settings.abbreviations;
        let mut scan = Scanner::new(&group.params, &path, ScanMode::Group).scan(&tokens, |token| {
            resolver::resolve_with(group, token, abbreviations).is_match()
        });

        if scan.help {
            return Ok(self.help(NodeRef::Group(group), trail));
        }
        if let Some(hit) = scan.eager.clone() {
            return self.eager(&group.params, &hit, &scan, trail);
        }
        let name_token = scan.name_token.take();
        let forwarded = std::mem::take(&mut scan.forwarded);
        if let Some(error) = scan.error() {
            return Err(error.clone().into());
        }

        let args = Binder::new(&path, trail.subpath(), &self.settings, &self.env).bind(&group.params, &scan)?;

        let child = match name_token {
            Some(token) => Some(self.resolve_child(group, &token, &path)?),
            None => {
                if let Some(held) = forwarded.iter().find(|t| *t != END_OF_OPTIONS) {
                    let option = held.split_once('=').map_or(held.as_str(), |(flag, _)| flag);
                    return Err(ParameterError::NoSuchOption {
                        path,
                        option: option.to_string(),
                    }
                    .into());
                }
                None
            }
        };

        // Name tokens are resolved before construction, so the constructor sees the
        // canonical child and unknown names never trigger its side effects.
        let meta = if trail.groups.is_empty() {
            self.initial_meta.clone()
        } else {
            BTreeMap::new()
        };
        let _frame = store.scoped(ContextFrame::new(&group.name, child.clone()).with_meta(meta));
        let instance = {
            let ctx = Context::new(store, &trail.names).rooted_at(trail.base);
            (group.construct)(&args, &ctx).map_err(invocation_error)?
        };
        let suppressed = store.top().is_some_and(|frame| frame.suppress_default_help);
        trail.instances.push((group.name.clone(), instance));

        let Some(child_name) = child else {
            if group.invoke_without_command || suppressed {
                log::debug!("Group '{}' ran without a command", path);
                return Ok(Outcome::Completed(Value::Null));
            }
            return Ok(self.help(NodeRef::Group(group), trail));
        };

        trail.groups.push(group);
        match group.children.get(&child_name) {
            Some(Node::Group(next)) => self.dispatch_group(store, next, forwarded, trail),
            Some(Node::Command(command)) => self.dispatch_command(store, command, forwarded, trail),
            None => Err(ResolutionError::UnknownCommand {
                path,
                token: child_name,
                siblings: resolver::sibling_names(group),
            }
            .into()),
        }
    }

    fn dispatch_command(
        &self,
        store: &ContextStore,
        command: &'t CommandNode,
        tokens: Vec<String>,
        trail: &mut Trail<'t>,
    ) -> DispatchResult<Outcome> {
        trail.names.push(command.name.clone());
        let path = trail.display();
        log::trace!("Entering command '{}' with {:?}", path, tokens);

        let scan = Scanner::new(&command.params, &path, ScanMode::Leaf).scan(&tokens, |_| false);
        if scan.help {
            return Ok(self.help(NodeRef::Command(command), trail));
        }
        if let Some(hit) = &scan.eager {
            return self.eager(&command.params, hit, &scan, trail);
        }
        if let Some(error) = scan.error() {
            return Err(error.clone().into());
        }

        let args: ParsedArgs =
            Binder::new(&path, trail.subpath(), &self.settings, &self.env).bind(&command.params, &scan)?;
        let chain = InstanceChain::new(trail.instances.clone());
        let ctx = Context::new(store, &trail.names).rooted_at(trail.base);

        let value = (command.invoke)(&chain, &args, &ctx).map_err(invocation_error)?;
        self.renderer.render_result(&value);
        Ok(Outcome::Completed(value))
    }

    fn resolve_child(&self, group: &GroupNode, token: &str, path: &str) -> DispatchResult<String> {
        match resolver::resolve_with(group, token, self.settings.abbreviations) {
            Resolution::Resolved(name) => {
                log::debug!("Resolved '{}' to '{}' in '{}'", token, name, path);
                Ok(name)
            }
            Resolution::Ambiguous(candidates) => Err(ResolutionError::AmbiguousCommand {
                path: path.to_string(),
                token: token.to_string(),
                candidates,
            }
            .into()),
            Resolution::NotFound => Err(ResolutionError::UnknownCommand {
                path: path.to_string(),
                token: token.to_string(),
                siblings: resolver::sibling_names(group),
            }
            .into()),
        }
    }

    /// Renders help for `node`, whose ancestors are the groups already on the trail.
    fn help(&self, node: NodeRef<'_>, trail: &Trail<'_>) -> Outcome {
        let text = self.renderer.render_help(node, &trail.groups);
        self.renderer.show_help(&text);
        Outcome::HelpShown {
            path: trail.names.clone(),
            text,
        }
    }

    fn eager(&self, params: &[ParameterSpec], hit: &EagerHit, scan: &Scan, trail: &Trail<'_>) -> DispatchResult<Outcome> {
        let raw = scan.raw(&hit.param).and_then(<[String]>::last);
        let value = match (params.iter().find(|p| p.name == hit.param), raw) {
            (Some(spec), Some(raw)) => parameters::convert(&spec.value_type, raw).map_err(|reason| {
                ParameterError::InvalidValue {
                    path: trail.display(),
                    param: display_name(spec),
                    value: raw.clone(),
                    reason,
                }
            })?,
            _ => Value::Bool(true),
        };
        log::debug!("Eager option '{}' handled at '{}'", hit.flag, trail.display());
        Ok(Outcome::Eager {
            path: trail.names.clone(),
            option: hit.flag.clone(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        compiler::compile,
        declaration::{CommandDecl, GroupDecl},
        registry::{Registry, Signature},
    };
    use crate::models::{ValueSource, ValueType};
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    struct Config {
        config_dir: String,
    }

    /// root `cli` (--profile) > group `config` (--config-dir) > `show`, `set`/`update`;
    /// plus `status` and `storage` at the root.
    fn tree() -> CommandTree {
        let mut registry = Registry::new();
        registry
            .register("Cli::new", ParameterSpec::option("--profile").default("default"))
            .register("Config::set", ParameterSpec::argument("key"))
            .register("Config::set", ParameterSpec::argument("value"));

        let config = GroupDecl::new("Config")
            .constructor(
                Signature::new().param_default("config_dir", "./config"),
                |args: &ParsedArgs, _: &Context<'_>| {
                    Ok(Config {
                        config_dir: args.string("config_dir")?,
                    })
                },
            )
            .command(CommandDecl::new(
                "Config::show",
                |chain: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                    let config = chain.get::<Config>()?;
                    Ok::<_, anyhow::Error>(format!("{}/{}", ctx.get("profile")?, config.config_dir))
                },
            ))
            .command(CommandDecl::new(
                "Config::set",
                |_: &InstanceChain, args: &ParsedArgs, ctx: &Context<'_>| {
                    Ok::<_, anyhow::Error>(format!(
                        "{}: {}={}",
                        ctx.get("profile")?,
                        args.string("key")?,
                        args.string("value")?
                    ))
                },
            ))
            .alias("update", "set");

        let root = GroupDecl::new("Cli")
            .name("cli")
            .constructor(Signature::default(), |args: &ParsedArgs, ctx: &Context<'_>| {
                ctx.set("profile", args.string("profile")?)?;
                Ok(())
            })
            .group("config", config)
            .command(CommandDecl::new("Cli::status", |_, _, _| Ok("ok")))
            .command(CommandDecl::new("Cli::storage", |_, _, _| Ok("storage")))
            .command(CommandDecl::new("Cli::fail", |_, _, _| {
                Err::<Value, _>(anyhow!("boom"))
            }));
        compile(root, &registry).unwrap()
    }

    fn dispatcher(tree: &CommandTree) -> Dispatcher<'_> {
        Dispatcher::new(tree)
            .with_renderer(TextRenderer::silent())
            .environment(Environment::fixed(Vec::<(String, String)>::new()))
    }

    fn completed(outcome: Outcome) -> Value {
        outcome.value().cloned().unwrap_or_default()
    }

    // --- End-to-end ---

    #[test]
    fn test_defaults_flow_through_groups() {
        let tree = tree();
        let outcome = dispatcher(&tree).dispatch(&["config", "show"]).unwrap();
        assert_eq!(completed(outcome), Value::from("default/./config"));
    }

    #[test]
    fn test_options_at_each_level() {
        let tree = tree();
        let outcome = dispatcher(&tree)
            .dispatch(&["--profile", "prod", "config", "--config-dir", "/etc", "show"])
            .unwrap();
        assert_eq!(completed(outcome), Value::from("prod//etc"));
    }

    #[test]
    fn test_interleaved_options_are_forwarded() {
        let tree = tree();
        let outcome = dispatcher(&tree)
            .dispatch(&["--config-dir", "/srv", "--profile", "prod", "config", "show"])
            .unwrap();
        assert_eq!(completed(outcome), Value::from("prod//srv"));
    }

    #[test]
    fn test_alias_matches_canonical() {
        let tree = tree();
        let d = dispatcher(&tree);
        let via_alias = d.dispatch(&["config", "update", "k", "v"]).unwrap();
        let via_name = d.dispatch(&["config", "set", "k", "v"]).unwrap();
        assert_eq!(via_alias, via_name);
        assert_eq!(completed(via_name), Value::from("default: k=v"));
    }

    #[test]
    fn test_group_without_child_shows_help() {
        let tree = tree();
        let outcome = dispatcher(&tree).dispatch(&["config"]).unwrap();
        match outcome {
            Outcome::HelpShown { path, text } => {
                assert_eq!(path, vec!["cli", "config"]);
                assert!(text.starts_with("Usage: cli config [OPTIONS] COMMAND [ARGS]..."));
            }
            other => assert!(false, "unexpected outcome {:?}", other),
        }
        let outcome = dispatcher(&tree).dispatch::<&str>(&[]).unwrap();
        assert!(matches!(outcome, Outcome::HelpShown { ref path, .. } if path == &["cli"]));
    }

    #[test]
    fn test_help_is_shown_for_deepest_resolved_node() {
        let tree = tree();
        let d = dispatcher(&tree);

        let outcome = d.dispatch(&["config", "show", "--help"]).unwrap();
        assert!(matches!(outcome, Outcome::HelpShown { ref path, .. } if path == &["cli", "config", "show"]));

        let outcome = d.dispatch(&["--profile", "prod", "config", "--help", "show"]).unwrap();
        assert!(matches!(outcome, Outcome::HelpShown { ref path, .. } if path == &["cli", "config"]));

        // Help wins over a missing required argument.
        let outcome = d.dispatch(&["config", "set", "--help"]).unwrap();
        assert!(matches!(outcome, Outcome::HelpShown { .. }));
    }

    // --- Resolution ---

    #[test]
    fn test_abbreviations() {
        let tree = tree();
        let d = dispatcher(&tree);
        assert_eq!(completed(d.dispatch(&["stat"]).unwrap()), Value::from("ok"));
        assert_eq!(completed(d.dispatch(&["c", "sh"]).unwrap()), Value::from("default/./config"));

        let err = d.dispatch(&["st"]).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Resolution(ResolutionError::AmbiguousCommand { ref candidates, .. })
                if candidates == &["status", "storage"]
        ));
        assert_eq!(err.exit_code(), EXIT_AMBIGUOUS_COMMAND);
        assert_eq!(err.to_string(), "\"st\" is not unique: status, storage");
    }

    #[test]
    fn test_abbreviations_can_be_disabled() {
        let tree = tree();
        let settings = Settings {
            abbreviations: false,
            ..Settings::default()
        };
        let err = dispatcher(&tree).settings(settings).dispatch(&["stat"]).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_UNKNOWN_COMMAND);
    }

    #[test]
    fn test_unknown_command_lists_siblings() {
        let tree = tree();
        let err = dispatcher(&tree).dispatch(&["config", "remove"]).unwrap_err();
        match &err {
            DispatchError::Resolution(ResolutionError::UnknownCommand { path, token, siblings }) => {
                assert_eq!(path, "cli config");
                assert_eq!(token, "remove");
                assert_eq!(siblings, &["set", "show", "update"]);
            }
            other => assert!(false, "unexpected error {:?}", other),
        }
        assert_eq!(err.path(), Some("cli config"));
    }

    #[test]
    fn test_unknown_name_skips_constructor_side_effects() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let root = GroupDecl::new("cli")
            .constructor(Signature::default(), move |_: &ParsedArgs, _: &Context<'_>| {
                if let Ok(mut n) = counter.lock() {
                    *n += 1;
                }
                Ok(())
            })
            .command(CommandDecl::new("cli::run", |_, _, _| Ok(Value::Null)));
        let tree = compile(root, &Registry::new()).unwrap();

        assert!(dispatcher(&tree).dispatch(&["nope"]).is_err());
        assert_eq!(*calls.lock().unwrap(), 0);
        dispatcher(&tree).dispatch(&["run"]).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    // --- Parameters ---

    #[test]
    fn test_parameter_errors_and_exit_codes() {
        let tree = tree();
        let d = dispatcher(&tree);

        let err = d.dispatch(&["config", "set", "k"]).unwrap_err();
        assert!(matches!(err, DispatchError::Parameter(ParameterError::MissingRequired { ref param, .. }) if param == "VALUE"));
        assert_eq!(err.exit_code(), EXIT_MISSING_PARAMETER);

        let err = d.dispatch(&["config", "set", "k", "v", "w"]).unwrap_err();
        assert!(matches!(err, DispatchError::Parameter(ParameterError::TooManyArguments { .. })));
        assert_eq!(err.exit_code(), EXIT_USAGE);

        let err = d.dispatch(&["config", "show", "--verbose"]).unwrap_err();
        assert!(matches!(err, DispatchError::Parameter(ParameterError::NoSuchOption { ref option, .. }) if option == "--verbose"));

        // Held options with no child to take them.
        let err = d.dispatch(&["--verbose"]).unwrap_err();
        assert!(matches!(err, DispatchError::Parameter(ParameterError::NoSuchOption { ref path, .. }) if path == "cli"));
    }

    #[test]
    fn test_invocation_errors_pass_through() {
        let tree = tree();
        let err = dispatcher(&tree).dispatch(&["fail"]).unwrap_err();
        assert!(matches!(err, DispatchError::Invocation(_)));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.exit_code(), EXIT_INVOCATION_FAILED);
    }

    #[test]
    fn test_default_map_and_environment() {
        let tree = tree();
        let settings = Settings::from_toml_str(
            r#"
            auto_envvar_prefix = "DEMO"
            [defaults.config]
            config_dir = "/opt"
            "#,
        )
        .unwrap();
        let d = dispatcher(&tree).settings(settings);
        assert_eq!(completed(d.dispatch(&["config", "show"]).unwrap()), Value::from("default//opt"));

        let d = d.environment(Environment::fixed([("DEMO_PROFILE", "ci")]));
        assert_eq!(completed(d.dispatch(&["config", "show"]).unwrap()), Value::from("ci//opt"));
    }

    // --- Context store ---

    #[test]
    fn test_stack_depth_is_restored_on_every_path() {
        let tree = tree();
        let d = dispatcher(&tree);
        let store = ContextStore::current();
        let before = store.depth();

        for argv in [
            vec!["config", "show"],
            vec!["config"],
            vec!["config", "set", "k"],
            vec!["fail"],
            vec!["st"],
            vec!["config", "show", "--help"],
        ] {
            let _ = d.dispatch(&argv);
            assert_eq!(store.depth(), before, "leaked frames after {:?}", argv);
        }
    }

    #[test]
    fn test_leaked_frames_are_discarded() {
        let root = GroupDecl::new("cli").command(CommandDecl::new(
            "cli::leak",
            |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                let _ = ctx.store().push(BTreeMap::new());
                Ok::<_, anyhow::Error>(Value::Null)
            },
        ));
        let tree = compile(root, &Registry::new()).unwrap();
        let store = ContextStore::current();
        let before = store.depth();
        dispatcher(&tree).dispatch(&["leak"]).unwrap();
        assert_eq!(store.depth(), before);
    }

    #[test]
    fn test_constructor_sees_invoked_child_and_shared_meta() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let root = GroupDecl::new("cli")
            .constructor(Signature::default(), move |_: &ParsedArgs, ctx: &Context<'_>| {
                if let Ok(mut entries) = log.lock() {
                    entries.push(ctx.invoked_child().unwrap_or_default());
                }
                ctx.set_global("app", "demo")?;
                Ok(())
            })
            .group(
                "inner",
                GroupDecl::new("Inner")
                    .constructor(Signature::default(), |_: &ParsedArgs, ctx: &Context<'_>| {
                        ctx.set("inner_only", true)?;
                        Ok(())
                    })
                    .command(CommandDecl::new(
                        "Inner::read",
                        |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                            Ok::<_, anyhow::Error>(format!("{} {}", ctx.get("app")?, ctx.get("inner_only")?))
                        },
                    )),
            );
        let tree = compile(root, &Registry::new()).unwrap();

        let outcome = dispatcher(&tree).dispatch(&["in", "read"]).unwrap();
        assert_eq!(completed(outcome), Value::from("demo true"));
        assert_eq!(*seen.lock().unwrap(), vec!["inner".to_string()]);
    }

    #[test]
    fn test_invoke_without_command_and_suppression() {
        let root = GroupDecl::new("cli")
            .invoke_without_command()
            .group(
                "quiet",
                GroupDecl::new("Quiet")
                    .constructor(Signature::default(), |_: &ParsedArgs, ctx: &Context<'_>| {
                        ctx.suppress_default_help()?;
                        Ok(())
                    })
                    .command(CommandDecl::new("Quiet::x", |_, _, _| Ok(Value::Null))),
            );
        let tree = compile(root, &Registry::new()).unwrap();
        let d = dispatcher(&tree);
        assert_eq!(d.dispatch::<&str>(&[]).unwrap(), Outcome::Completed(Value::Null));
        assert_eq!(d.dispatch(&["quiet"]).unwrap(), Outcome::Completed(Value::Null));
    }

    #[test]
    fn test_initial_meta_seeds_root_frame() {
        let root = GroupDecl::new("cli").command(CommandDecl::new(
            "cli::who",
            |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| Ok::<_, anyhow::Error>(ctx.get("user")?),
        ));
        let tree = compile(root, &Registry::new()).unwrap();
        let mut meta = BTreeMap::new();
        meta.insert("user".to_string(), Value::from("ada"));
        let outcome = dispatcher(&tree).initial_meta(meta).dispatch(&["who"]).unwrap();
        assert_eq!(completed(outcome), Value::from("ada"));
    }

    #[test]
    fn test_nested_dispatch_sees_outer_frames() {
        let root = GroupDecl::new("outer")
            .constructor(Signature::default(), |_: &ParsedArgs, ctx: &Context<'_>| {
                ctx.set("origin", "outer")?;
                Ok(())
            })
            .command(CommandDecl::new(
                "outer::call",
                |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                    let depth = ctx.store().depth();
                    let inner = GroupDecl::new("inner").command(CommandDecl::new(
                        "inner::echo",
                        |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                            Ok::<_, anyhow::Error>(format!("{} via inner", ctx.get("origin")?))
                        },
                    ));
                    let tree = compile(inner, &Registry::new())?;
                    let outcome = dispatcher(&tree).dispatch_line("echo")?;
                    anyhow::ensure!(ctx.store().depth() == depth, "inner dispatch leaked frames");
                    Ok::<_, anyhow::Error>(outcome.value().cloned().unwrap_or_default())
                },
            ));
        let tree = compile(root, &Registry::new()).unwrap();
        let outcome = dispatcher(&tree).dispatch(&["call"]).unwrap();
        assert_eq!(completed(outcome), Value::from("outer via inner"));
    }

    #[test]
    fn test_positionals_bind_in_signature_order_with_partial_specs() {
        let mut registry = Registry::new();
        registry.register("cli::set", ParameterSpec::argument("value").help("Setting value."));
        let root = GroupDecl::new("cli").command(
            CommandDecl::new(
                "cli::set",
                |_: &InstanceChain, args: &ParsedArgs, _: &Context<'_>| {
                    Ok::<_, anyhow::Error>(format!(
                        "key={} value={}",
                        args.string("key")?,
                        args.string("value")?
                    ))
                },
            )
            .signature(Signature::new().param("key").param("value")),
        );
        let tree = compile(root, &registry).unwrap();
        let outcome = dispatcher(&tree).dispatch(&["set", "k", "v"]).unwrap();
        assert_eq!(completed(outcome), Value::from("key=k value=v"));
    }

    #[test]
    fn test_nested_set_global_stays_in_nested_dispatch() {
        let root = GroupDecl::new("outer").command(CommandDecl::new(
            "outer::call",
            |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                let inner = GroupDecl::new("inner")
                    .constructor(Signature::default(), |_: &ParsedArgs, ctx: &Context<'_>| {
                        ctx.set_global("mode", "inner-wrote-this")?;
                        Ok(())
                    })
                    .command(CommandDecl::new(
                        "inner::read",
                        |_: &InstanceChain, _: &ParsedArgs, ctx: &Context<'_>| {
                            Ok::<_, anyhow::Error>(ctx.get("mode")?)
                        },
                    ));
                let tree = compile(inner, &Registry::new())?;
                let seen_inside = completed(dispatcher(&tree).dispatch_line("read")?);
                Ok::<_, anyhow::Error>(Value::from(vec![
                    seen_inside,
                    ctx.get_or("mode", "untouched"),
                ]))
            },
        ));
        let tree = compile(root, &Registry::new()).unwrap();
        let outcome = dispatcher(&tree).dispatch(&["call"]).unwrap();
        assert_eq!(
            completed(outcome),
            Value::from(vec!["inner-wrote-this", "untouched"])
        );
    }

    // --- Eager options and lines ---

    #[test]
    fn test_eager_option_short_circuits() {
        let mut registry = Registry::new();
        registry.register("cli::new", ParameterSpec::flag("--version").eager());
        registry.register(
            "cli::new",
            ParameterSpec::option("--level").value_type(ValueType::Int).eager(),
        );
        let root = GroupDecl::new("cli").command(CommandDecl::new("cli::run", |_, _, _| Ok(Value::Null)));
        let tree = compile(root, &registry).unwrap();
        let d = dispatcher(&tree);

        assert_eq!(
            d.dispatch(&["--version", "run", "--bogus"]).unwrap(),
            Outcome::Eager {
                path: vec!["cli".to_string()],
                option: "--version".to_string(),
                value: Value::Bool(true),
            }
        );
        let outcome = d.dispatch(&["--level=3"]).unwrap();
        assert!(matches!(outcome, Outcome::Eager { ref value, .. } if value == &Value::Int(3)));
    }

    #[test]
    fn test_dispatch_line_quoting() {
        let tree = tree();
        let d = dispatcher(&tree);
        let outcome = d.dispatch_line("config set greeting 'hello world'").unwrap();
        assert_eq!(completed(outcome), Value::from("default: greeting=hello world"));

        let err = d.dispatch_line("config set 'unterminated").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidLine(_)));
    }

    #[test]
    fn test_value_sources_reach_callbacks() {
        let root = GroupDecl::new("cli").command(CommandDecl::new(
            "cli::src",
            |_: &InstanceChain, args: &ParsedArgs, _: &Context<'_>| {
                Ok::<_, anyhow::Error>(format!("{:?}", args.source("name")))
            },
        ).signature(Signature::new().param_default("name", "x")));
        let tree = compile(root, &Registry::new()).unwrap();
        let outcome = dispatcher(&tree).dispatch(&["src"]).unwrap();
        assert_eq!(completed(outcome), Value::from(format!("{:?}", Some(ValueSource::Default))));
    }
}
