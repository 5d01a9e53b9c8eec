// src/constants.rs

/// Flags compiled into every node as the eager help option, unless settings override them.
pub const DEFAULT_HELP_FLAGS: &[&str] = &["--help"];

/// Name of the parameter that carries the help flag on every compiled node.
pub const HELP_PARAM_NAME: &str = "help";

/// Help text of the built-in help option.
pub const HELP_PARAM_TEXT: &str = "Show this message and exit.";

/// Token that ends option parsing at the leaf command.
pub const END_OF_OPTIONS: &str = "--";

/// The name of the settings file looked up inside the per-application config directory.
pub const SETTINGS_FILENAME: &str = "cmdtree.toml";

/// Environment variable that points to an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "CMDTREE_CONFIG";

// --- Process exit codes ---

/// Successful dispatch, help shown, or an eager option handled.
pub const EXIT_OK: i32 = 0;
/// The leaf command (or a group constructor) signalled a failure.
pub const EXIT_INVOCATION_FAILED: i32 = 1;
/// Any parameter validation error other than a missing parameter.
pub const EXIT_USAGE: i32 = 2;
/// A name token did not match any child.
pub const EXIT_UNKNOWN_COMMAND: i32 = 3;
/// A name token matched more than one child.
pub const EXIT_AMBIGUOUS_COMMAND: i32 = 4;
/// A required parameter received no value.
pub const EXIT_MISSING_PARAMETER: i32 = 5;
/// Internal failure, e.g. an unbalanced context stack (`EX_SOFTWARE`).
pub const EXIT_INTERNAL: i32 = 70;
/// The declarations could not be compiled into a tree (`EX_CONFIG`).
pub const EXIT_COMPILE: i32 = 78;
