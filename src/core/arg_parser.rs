// src/core/arg_parser.rs

//! # Option/Argument Pass
//!
//! Parsing one node happens in two steps:
//!
//! 1. [`Scanner::scan`] classifies the node's tokens left to right into option
//!    values, positional values, the help flag, eager options, tokens held for
//!    a child (unknown options at group level) and, for groups, the name token
//!    where descent continues. Scanning never fails early: the first problem is
//!    recorded and reported only if neither help nor an eager option was seen.
//! 2. [`Binder::bind`] converts the raw tokens into typed [`Value`]s and falls
//!    back, per parameter, to the environment, the settings default map and the
//!    declared default, in that order.

use crate::{
    constants::{END_OF_OPTIONS, HELP_PARAM_NAME},
    core::{
        parameters,
        settings::{Environment, Settings},
    },
    models::{Arity, ParameterSpec, ParsedArgs, Value, ValueSource},
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Missing parameter '{param}' for '{path}'.")]
    MissingRequired { path: String, param: String },
    #[error("Invalid value '{value}' for '{param}' in '{path}': {reason}")]
    InvalidValue {
        path: String,
        param: String,
        value: String,
        reason: String,
    },
    #[error("Got unexpected extra argument(s) for '{path}': {}", .extra.join(" "))]
    TooManyArguments { path: String, extra: Vec<String> },
    #[error("No such option '{option}' for '{path}'.")]
    NoSuchOption { path: String, option: String },
    #[error("Option '{option}' of '{path}' requires a value.")]
    MissingOptionValue { path: String, option: String },
}

impl ParameterError {
    /// The command path of the node the error was raised for.
    pub fn path(&self) -> &str {
        match self {
            Self::MissingRequired { path, .. }
            | Self::InvalidValue { path, .. }
            | Self::TooManyArguments { path, .. }
            | Self::NoSuchOption { path, .. }
            | Self::MissingOptionValue { path, .. } => path,
        }
    }
}

/// Whether the scanned node may descend further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Bare tokens may name a child; unknown options are held for it.
    Group,
    /// No descent: unknown options and surplus positionals are errors.
    Leaf,
}

/// An eager option seen during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EagerHit {
    /// Name of the parameter.
    pub param: String,
    /// The spelling used on the command line.
    pub flag: String,
}

/// The classified tokens of one node.
#[derive(Debug, Default)]
pub struct Scan {
    raw: BTreeMap<String, Vec<String>>,
    /// A help flag was seen before anything else halted the scan.
    pub help: bool,
    pub eager: Option<EagerHit>,
    /// The token the group descends through, if any.
    pub name_token: Option<String>,
    /// Tokens handed to the child: held options first, then everything after the name token.
    pub forwarded: Vec<String>,
    error: Option<ParameterError>,
}

impl Scan {
    /// Raw tokens bound to `param` on the command line.
    pub fn raw(&self, param: &str) -> Option<&[String]> {
        self.raw.get(param).map(Vec::as_slice)
    }

    /// The first problem found during the scan.
    pub fn error(&self) -> Option<&ParameterError> {
        self.error.as_ref()
    }

    pub fn into_error(self) -> Option<ParameterError> {
        self.error
    }

    fn defer(&mut self, error: ParameterError) {
        if self.error.is_none() {
            log::trace!("Deferring scan error: {}", error);
            self.error = Some(error);
        }
    }
}

/// Scans the tokens of a single node against its parameters.
#[derive(Debug)]
pub struct Scanner<'a> {
    params: &'a [ParameterSpec],
    path: &'a str,
    mode: ScanMode,
}

impl<'a> Scanner<'a> {
    pub fn new(params: &'a [ParameterSpec], path: &'a str, mode: ScanMode) -> Self {
        Self { params, path, mode }
    }

    fn is_help_flag(&self, token: &str) -> bool {
        self.params
            .iter()
            .any(|p| p.eager && p.name == HELP_PARAM_NAME && p.matches_flag(token))
    }

    /// Classifies `tokens`. `names_child` tells whether a bare token would
    /// resolve to a child of the group; it is never consulted in leaf mode.
    pub fn scan<F>(&self, tokens: &[String], names_child: F) -> Scan
    where
        F: Fn(&str) -> bool,
    {
        let arguments: Vec<&ParameterSpec> = self.params.iter().filter(|p| p.is_argument()).collect();
        let mut slot = 0;
        let mut extra = Vec::new();
        let mut positional_only = false;
        let mut scan = Scan::default();
        let mut index = 0;

        while let Some(token) = tokens.get(index) {
            index += 1;

            if !positional_only && looks_like_option(token) {
                if token == END_OF_OPTIONS {
                    match self.mode {
                        ScanMode::Leaf => positional_only = true,
                        ScanMode::Group => scan.forwarded.push(token.clone()),
                    }
                    continue;
                }

                let (flag, inline) = split_inline(token);
                let Some(spec) = self.params.iter().find(|p| p.matches_flag(flag)) else {
                    match self.mode {
                        ScanMode::Leaf => scan.defer(ParameterError::NoSuchOption {
                            path: self.path.to_string(),
                            option: flag.to_string(),
                        }),
                        ScanMode::Group => {
                            // Held for the child; it may take the next bare token as its value.
                            scan.forwarded.push(token.clone());
                            if inline.is_none()
                                && let Some(next) = tokens.get(index)
                                && !looks_like_option(next)
                                && !names_child(next.as_str())
                            {
                                scan.forwarded.push(next.clone());
                                index += 1;
                            }
                        }
                    }
                    continue;
                };

                if spec.flag_only {
                    if spec.eager && spec.name == HELP_PARAM_NAME {
                        scan.help = true;
                        return scan;
                    }
                    if let Some(value) = inline {
                        scan.defer(ParameterError::InvalidValue {
                            path: self.path.to_string(),
                            param: flag.to_string(),
                            value: value.to_string(),
                            reason: format!("Option '{}' does not take a value.", flag),
                        });
                        continue;
                    }
                    scan.raw.insert(spec.name.clone(), vec!["true".to_string()]);
                } else {
                    let value = match inline {
                        Some(v) => Some(v.to_string()),
                        None => match tokens.get(index) {
                            Some(next) if !self.is_help_flag(next) => {
                                index += 1;
                                Some(next.clone())
                            }
                            _ => None,
                        },
                    };
                    let Some(value) = value else {
                        scan.defer(ParameterError::MissingOptionValue {
                            path: self.path.to_string(),
                            option: flag.to_string(),
                        });
                        continue;
                    };
                    // Repeated options: the last occurrence wins.
                    scan.raw.insert(spec.name.clone(), vec![value]);
                }

                if spec.eager && scan.eager.is_none() {
                    scan.eager = Some(EagerHit {
                        param: spec.name.clone(),
                        flag: flag.to_string(),
                    });
                }
                continue;
            }

            let open = arguments.get(slot).copied();
            if self.mode == ScanMode::Group {
                let unmet = open.is_some_and(|spec| spec.required && !scan.raw.contains_key(&spec.name));
                if !unmet && (open.is_none() || names_child(token.as_str())) {
                    scan.name_token = Some(token.clone());
                    scan.forwarded.extend(tokens.iter().skip(index).cloned());
                    break;
                }
            }

            match open {
                Some(spec) => {
                    scan.raw.entry(spec.name.clone()).or_default().push(token.clone());
                    if spec.arity == Arity::One {
                        slot += 1;
                    }
                }
                None => extra.push(token.clone()),
            }
        }

        if !extra.is_empty() {
            scan.defer(ParameterError::TooManyArguments {
                path: self.path.to_string(),
                extra,
            });
        }
        scan
    }
}

/// Binds scanned tokens to typed values, filling gaps from the environment,
/// the settings default map and declared defaults.
#[derive(Debug)]
pub struct Binder<'a> {
    path: &'a str,
    /// Canonical child names below the root, used for default-map and
    /// automatic environment variable lookups.
    subpath: &'a [String],
    settings: &'a Settings,
    env: &'a Environment,
}

impl<'a> Binder<'a> {
    pub fn new(path: &'a str, subpath: &'a [String], settings: &'a Settings, env: &'a Environment) -> Self {
        Self {
            path,
            subpath,
            settings,
            env,
        }
    }

    /// Binds every parameter except the help option, in declaration order.
    /// The first required parameter without a value is reported.
    pub fn bind(&self, params: &[ParameterSpec], scan: &Scan) -> Result<ParsedArgs, ParameterError> {
        let mut args = ParsedArgs::default();
        for spec in params {
            if spec.eager && spec.name == HELP_PARAM_NAME {
                continue;
            }
            let (value, source) = self.bind_one(spec, scan.raw(&spec.name))?;
            log::trace!("Bound '{}' = {} ({:?}) on '{}'", spec.name, value, source, self.path);
            args.insert(&spec.name, value, source);
        }
        Ok(args)
    }

    fn bind_one(&self, spec: &ParameterSpec, raw: Option<&[String]>) -> Result<(Value, ValueSource), ParameterError> {
        if let Some(tokens) = raw {
            return Ok((self.convert_tokens(spec, tokens)?, ValueSource::CommandLine));
        }

        if let Some(raw) = self.env_value(spec) {
            let tokens: Vec<String> = match spec.arity {
                Arity::Many => raw.split_whitespace().map(str::to_string).collect(),
                Arity::One => vec![raw],
            };
            return Ok((self.convert_tokens(spec, &tokens)?, ValueSource::Environment));
        }

        if let Some(mapped) = self.settings.default_for(self.subpath, &spec.name) {
            let value = parameters::coerce(&spec.value_type, mapped.clone())
                .map_err(|reason| self.invalid(spec, mapped.to_string(), reason))?;
            let value = match value {
                Value::List(_) | Value::Null => value,
                single if spec.arity == Arity::Many => Value::List(vec![single]),
                single => single,
            };
            return Ok((value, ValueSource::DefaultMap));
        }

        if let Some(default) = &spec.default {
            return Ok((default.clone(), ValueSource::Default));
        }

        if spec.required {
            return Err(ParameterError::MissingRequired {
                path: self.path.to_string(),
                param: display_name(spec),
            });
        }
        match spec.arity {
            Arity::Many => Ok((Value::List(Vec::new()), ValueSource::Unset)),
            Arity::One => Ok((Value::Null, ValueSource::Unset)),
        }
    }

    fn convert_tokens(&self, spec: &ParameterSpec, tokens: &[String]) -> Result<Value, ParameterError> {
        let convert = |token: &String| {
            parameters::convert(&spec.value_type, token)
                .map_err(|reason| self.invalid(spec, token.clone(), reason))
        };
        match spec.arity {
            Arity::Many => tokens
                .iter()
                .map(convert)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Arity::One => tokens.last().map(convert).unwrap_or(Ok(Value::Null)),
        }
    }

    /// The explicit variable wins over the automatic one.
    fn env_value(&self, spec: &ParameterSpec) -> Option<String> {
        if let Some(var) = &spec.envvar
            && let Some(value) = self.env.var(var)
        {
            return Some(value);
        }
        let auto = self.settings.auto_envvar(self.subpath, &spec.name)?;
        self.env.var(&auto)
    }

    fn invalid(&self, spec: &ParameterSpec, value: String, reason: String) -> ParameterError {
        ParameterError::InvalidValue {
            path: self.path.to_string(),
            param: display_name(spec),
            value,
            reason,
        }
    }
}

/// `--config-dir` for options, `NAME` for arguments.
pub fn display_name(spec: &ParameterSpec) -> String {
    if spec.is_option() {
        spec.flags.first().cloned().unwrap_or_else(|| spec.name.clone())
    } else {
        spec.metavar()
    }
}

/// Negative numbers (`-5`, `-.5`, `-1e3`) are values, not options. Spellings
/// like `-inf` or `-nan` stay options.
fn looks_like_option(token: &str) -> bool {
    let Some(rest) = token.strip_prefix('-') else {
        return false;
    };
    let numeric = rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') && token.parse::<f64>().is_ok();
    !rest.is_empty() && !numeric
}

/// `--size=large` -> (`--size`, Some(`large`)).
fn split_inline(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((flag, value)) => (flag, Some(value)),
        None => (token, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueType;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn with_help(mut params: Vec<ParameterSpec>) -> Vec<ParameterSpec> {
        params.push(ParameterSpec::help_option(&["--help".to_string()]));
        params
    }

    fn no_children(_: &str) -> bool {
        false
    }

    fn bind(params: &[ParameterSpec], scan: &Scan) -> Result<ParsedArgs, ParameterError> {
        let settings = Settings::default();
        let env = Environment::fixed(Vec::<(String, String)>::new());
        Binder::new("cli", &[], &settings, &env).bind(params, scan)
    }

    // --- Scanning ---

    #[test]
    fn test_option_forms_and_last_wins() {
        let params = with_help(vec![
            ParameterSpec::option("--size/-s"),
            ParameterSpec::option("--region"),
        ]);
        let scan = Scanner::new(&params, "cli create", ScanMode::Leaf)
            .scan(&tokens("--size small -s=large --region=eu-west"), no_children);

        assert!(scan.error().is_none());
        assert_eq!(scan.raw("size"), Some(&["large".to_string()][..]));
        assert_eq!(scan.raw("region"), Some(&["eu-west".to_string()][..]));
    }

    #[test]
    fn test_group_holds_unknown_options_and_stops_at_name() {
        let params = with_help(vec![ParameterSpec::option("--profile")]);
        let scan = Scanner::new(&params, "cli", ScanMode::Group).scan(
            &tokens("--profile prod --config-dir /etc config show"),
            |t| t == "config",
        );

        assert_eq!(scan.raw("profile"), Some(&["prod".to_string()][..]));
        assert_eq!(scan.name_token.as_deref(), Some("config"));
        assert_eq!(scan.forwarded, tokens("--config-dir /etc show"));
        assert!(scan.error().is_none());
    }

    #[test]
    fn test_held_option_does_not_swallow_child_name() {
        let params = with_help(vec![]);
        let scan = Scanner::new(&params, "cli", ScanMode::Group)
            .scan(&tokens("--verbose config show"), |t| t == "config");
        assert_eq!(scan.name_token.as_deref(), Some("config"));
        assert_eq!(scan.forwarded, tokens("--verbose show"));
    }

    #[test]
    fn test_help_wins_over_earlier_errors() {
        let params = with_help(vec![ParameterSpec::option("--size")]);
        let scan = Scanner::new(&params, "cli create", ScanMode::Leaf)
            .scan(&tokens("extra --bogus --size --help"), no_children);
        assert!(scan.help);
    }

    #[test]
    fn test_leaf_errors_are_deferred_in_order() {
        let params = with_help(vec![ParameterSpec::argument("name")]);
        let scan = Scanner::new(&params, "cli greet", ScanMode::Leaf)
            .scan(&tokens("alice bob --loud"), no_children);
        assert_eq!(
            scan.error(),
            Some(&ParameterError::NoSuchOption {
                path: "cli greet".to_string(),
                option: "--loud".to_string(),
            })
        );

        let scan = Scanner::new(&params, "cli greet", ScanMode::Leaf)
            .scan(&tokens("alice bob carol"), no_children);
        assert_eq!(
            scan.into_error(),
            Some(ParameterError::TooManyArguments {
                path: "cli greet".to_string(),
                extra: tokens("bob carol"),
            })
        );
    }

    #[test]
    fn test_missing_option_value_and_flag_with_value() {
        let params = with_help(vec![ParameterSpec::option("--size"), ParameterSpec::flag("--force")]);
        let scan = Scanner::new(&params, "cli create", ScanMode::Leaf).scan(&tokens("--size"), no_children);
        assert!(matches!(scan.error(), Some(ParameterError::MissingOptionValue { .. })));

        let scan = Scanner::new(&params, "cli create", ScanMode::Leaf)
            .scan(&tokens("--force=yes"), no_children);
        assert!(matches!(scan.error(), Some(ParameterError::InvalidValue { .. })));
    }

    #[test]
    fn test_end_of_options_at_leaf() {
        let params = with_help(vec![ParameterSpec::argument("items").many()]);
        let scan = Scanner::new(&params, "cli echo", ScanMode::Leaf)
            .scan(&tokens("a -- --help -b"), no_children);
        assert!(!scan.help);
        assert_eq!(scan.raw("items"), Some(&tokens("a --help -b")[..]));
    }

    #[test]
    fn test_negative_numbers_are_positional() {
        let params = with_help(vec![ParameterSpec::argument("n").value_type(ValueType::Int)]);
        let scan = Scanner::new(&params, "cli add", ScanMode::Leaf).scan(&tokens("-5"), no_children);
        let args = bind(&params, &scan).unwrap();
        assert_eq!(args.int("n").unwrap(), -5);

        let params = with_help(vec![ParameterSpec::argument("x").value_type(ValueType::Float)]);
        let scan = Scanner::new(&params, "cli scale", ScanMode::Leaf).scan(&tokens("-.5"), no_children);
        assert_eq!(bind(&params, &scan).unwrap().float("x").unwrap(), -0.5);
    }

    #[test]
    fn test_float_keywords_are_not_numbers() {
        let params = with_help(vec![ParameterSpec::argument("x").value_type(ValueType::Float)]);
        for word in ["-inf", "-infinity", "-nan"] {
            let scan = Scanner::new(&params, "cli scale", ScanMode::Leaf).scan(&tokens(word), no_children);
            assert!(
                matches!(scan.error(), Some(ParameterError::NoSuchOption { option, .. }) if option == word),
                "'{}' should be read as an option",
                word
            );
        }
    }

    #[test]
    fn test_required_slot_beats_child_name_then_names_win() {
        let params = with_help(vec![
            ParameterSpec::argument("target"),
            ParameterSpec::argument("more").many(),
        ]);
        let scanner = Scanner::new(&params, "cli", ScanMode::Group);
        let scan = scanner.scan(&tokens("deploy x deploy run"), |t| t == "deploy");

        assert_eq!(scan.raw("target"), Some(&["deploy".to_string()][..]));
        assert_eq!(scan.raw("more"), Some(&["x".to_string()][..]));
        assert_eq!(scan.name_token.as_deref(), Some("deploy"));
        assert_eq!(scan.forwarded, tokens("run"));
    }

    #[test]
    fn test_eager_option_is_recorded() {
        let params = with_help(vec![ParameterSpec::flag("--version").eager()]);
        let scan = Scanner::new(&params, "cli", ScanMode::Group).scan(&tokens("--version status"), |t| t == "status");
        assert_eq!(
            scan.eager,
            Some(EagerHit {
                param: "version".to_string(),
                flag: "--version".to_string(),
            })
        );
    }

    // --- Binding ---

    #[test]
    fn test_binding_defaults_and_types() {
        let params = with_help(vec![
            ParameterSpec::option("--count").value_type(ValueType::Int).default(1),
            ParameterSpec::flag("--loud"),
            ParameterSpec::option("--note"),
            ParameterSpec::argument("files").many(),
        ]);
        let scan = Scanner::new(&params, "cli", ScanMode::Leaf).scan(&tokens("--count 3"), no_children);
        let args = bind(&params, &scan).unwrap();

        assert_eq!(args.int("count").unwrap(), 3);
        assert_eq!(args.source("count"), Some(ValueSource::CommandLine));
        assert!(!args.flag("loud"));
        assert_eq!(args.source("loud"), Some(ValueSource::Default));
        assert!(args.get("note").is_none());
        assert_eq!(args.source("note"), Some(ValueSource::Unset));
        assert!(args.list("files").is_empty());
        assert!(!args.contains("help"));
    }

    #[test]
    fn test_missing_required_names_the_parameter() {
        let params = with_help(vec![ParameterSpec::argument("key"), ParameterSpec::argument("value")]);
        let scan = Scanner::new(&params, "cli config set", ScanMode::Leaf).scan(&tokens("k"), no_children);
        let settings = Settings::default();
        let env = Environment::default();
        let err = Binder::new("cli config set", &[], &settings, &env)
            .bind(&params, &scan)
            .unwrap_err();
        assert_eq!(
            err,
            ParameterError::MissingRequired {
                path: "cli config set".to_string(),
                param: "VALUE".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_choice() {
        let params = with_help(vec![ParameterSpec::option("--size").choices(&["small", "large"])]);
        let scan = Scanner::new(&params, "cli", ScanMode::Leaf).scan(&tokens("--size huge"), no_children);
        let err = bind(&params, &scan).unwrap_err();
        assert!(matches!(err, ParameterError::InvalidValue { ref param, .. } if param == "--size"));
        assert!(err.to_string().contains("'huge' is not one of 'small', 'large'."));
    }

    #[test]
    fn test_value_source_precedence() {
        let params = with_help(vec![
            ParameterSpec::option("--profile").default("default").envvar("APP_PROFILE"),
            ParameterSpec::option("--region").default("us"),
            ParameterSpec::option("--tier").default("free"),
        ]);
        let settings = Settings::from_toml_str(
            r#"
            auto_envvar_prefix = "app"
            [defaults.resource]
            region = "eu"
            tier = "pro"
            "#,
        )
        .unwrap();
        let env = Environment::fixed([("APP_PROFILE", "prod"), ("APP_RESOURCE_TIER", "enterprise")]);
        let subpath = vec!["resource".to_string()];
        let binder = Binder::new("cli resource", &subpath, &settings, &env);

        let scan = Scanner::new(&params, "cli resource", ScanMode::Leaf).scan(&tokens("--profile dev"), no_children);
        let args = binder.bind(&params, &scan).unwrap();
        assert_eq!(args.string("profile").unwrap(), "dev");
        assert_eq!(args.source("profile"), Some(ValueSource::CommandLine));
        assert_eq!(args.string("tier").unwrap(), "enterprise");
        assert_eq!(args.source("tier"), Some(ValueSource::Environment));
        assert_eq!(args.string("region").unwrap(), "eu");
        assert_eq!(args.source("region"), Some(ValueSource::DefaultMap));

        let scan = Scanner::new(&params, "cli resource", ScanMode::Leaf).scan(&[], no_children);
        let args = binder.bind(&params, &scan).unwrap();
        assert_eq!(args.string("profile").unwrap(), "prod");
        assert_eq!(args.source("profile"), Some(ValueSource::Environment));
    }
}
