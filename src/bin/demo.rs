// src/bin/demo.rs

use anyhow::Result;
use cmdtree::{
    CommandDecl, CommandTree, Compiler, Context, DispatchError, Dispatcher, GroupDecl, InstanceChain, Outcome,
    ParsedArgs, Registry, Renderer, Settings, Signature, TextRenderer, Value, ValueType,
    constants::{EXIT_COMPILE, EXIT_OK},
};
use colored::*;
use std::path::PathBuf;

const APP_NAME: &str = "demo";

fn version_text() -> String {
    format!("{} demo v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

// --- Group instances ---

/// Top-level options, shared with every command below the root.
struct MainGroup {
    env: String,
    profile: String,
    frontend_dir: PathBuf,
    docker_dir: PathBuf,
}

struct GroupOne {
    main: Option<String>,
    other: String,
}

struct ConfigGroup {
    config_dir: PathBuf,
}

struct ResourceGroup {
    resource_type: String,
}

// --- Declarations ---

fn declare_parameters(registry: &mut Registry) -> Result<()> {
    registry
        .declare("MainGroup::new", "--env(default='development', help='Environment to use (e.g., development, production).')")?
        .declare("MainGroup::new", "--profile(default='default', help='Configuration profile to use.')")?
        .declare("MainGroup::new", "--frontend-dir(type=path, default='./frontend', help='Frontend directory.')")?
        .declare("MainGroup::new", "--docker-dir(type=path, default='./docker', help='Docker directory.')")?
        .declare(
            "MainGroup::new",
            "--docker-compose-file(type=path, default='./docker/docker-compose.yml', help='Docker compose file.')",
        )?
        .declare("MainGroup::new", "--version(flag, eager, help='Show the version and exit.')")?;

    registry
        .declare("GroupOne::new", "--main(help='Value passed to every GroupOne command.')")?
        .declare("GroupOne::new", "--other(help='Future option to be used')")?
        .declare("GroupOne::greet", "name")?
        .declare("GroupOne::farewell", "name")?;

    registry
        .declare("ConfigGroup::set", "key(help='Setting name.')")?
        .declare("ConfigGroup::set", "value(help='Setting value.')")?;

    registry
        .declare(
            "ResourceGroup::new",
            "--resource-type(default='server', choices='server|database|bucket', help='Type of resource to manage.')",
        )?
        .declare("ResourceGroup::create", "name")?
        .declare(
            "ResourceGroup::create",
            "--size(default='small', choices='small|medium|large', help='Size of the resource.')",
        )?
        .declare("ResourceGroup::create", "--region(default='us-east', help='Region to deploy in.')")?;

    Ok(())
}

fn group_one() -> GroupDecl {
    GroupDecl::new("GroupOne")
        .help("GroupOne subcommand")
        .constructor(
            Signature::new().param("main").param_default("other", "Not needed yet."),
            |args: &ParsedArgs, _: &Context<'_>| {
                Ok(GroupOne {
                    main: args.opt_string("main"),
                    other: args.string("other")?,
                })
            },
        )
        .command(
            CommandDecl::new(
                "GroupOne::greet",
                |chain: &InstanceChain, args: &ParsedArgs, ctx: &Context<'_>| {
                    let group = chain.get::<GroupOne>()?;
                    Ok::<_, anyhow::Error>(format!(
                        "Greeting {} in environment {} with {} ({}).",
                        args.string("name")?,
                        ctx.get_or("env", "unknown"),
                        group.main.as_deref().unwrap_or("None"),
                        group.other
                    ))
                },
            )
            .help("Greets someone."),
        )
        .alias("hello", "greet")
        .command(
            CommandDecl::new(
                "GroupOne::farewell",
                |_: &InstanceChain, args: &ParsedArgs, ctx: &Context<'_>| {
                    Ok::<_, anyhow::Error>(format!(
                        "Goodbye {} from GroupOne. Environment: {}",
                        args.string("name")?,
                        ctx.get_or("env", "unknown")
                    ))
                },
            )
            .signature(Signature::new().param_default("name", "Unknown"))
            .help("Example subcommand: says goodbye."),
        )
}

fn group_two() -> GroupDecl {
    GroupDecl::new("GroupTwo")
        .help("GroupTwo subcommand")
        .command(CommandDecl::new("GroupTwo::ping", |_, _, _| Ok("Pong from GroupTwo.")))
        .command(CommandDecl::new("GroupTwo::version", |_, _, _| Ok("Version 1.0.0")))
}

fn config_group() -> GroupDecl {
    GroupDecl::new("ConfigGroup")
        .name("config")
        .help("Manage configuration settings.")
        .constructor(
            Signature::new().typed("config_dir", Some(ValueType::Path), Some("./config")),
            |args: &ParsedArgs, _: &Context<'_>| {
                Ok(ConfigGroup {
                    config_dir: args.path("config_dir")?,
                })
            },
        )
        .command(
            CommandDecl::new(
                "ConfigGroup::show",
                |chain: &InstanceChain, _: &ParsedArgs, _: &Context<'_>| {
                    let main = chain.get::<MainGroup>()?;
                    let config = chain.get::<ConfigGroup>()?;
                    Ok::<_, anyhow::Error>(vec![
                        format!("Active Profile: {}", main.profile),
                        format!("Config Directory: {}", config.config_dir.display()),
                    ])
                },
            )
            .help("Show the active configuration."),
        )
        .command(
            CommandDecl::new(
                "ConfigGroup::set",
                |chain: &InstanceChain, args: &ParsedArgs, _: &Context<'_>| {
                    let main = chain.get::<MainGroup>()?;
                    Ok::<_, anyhow::Error>(format!(
                        "Setting {}={} in profile '{}'",
                        args.string("key")?,
                        args.string("value")?,
                        main.profile
                    ))
                },
            )
            .help("Set a configuration value."),
        )
        .alias("update", "set")
}

fn resource_group() -> GroupDecl {
    GroupDecl::new("ResourceGroup")
        .name("resource")
        .help("Manage resources.")
        .constructor(Signature::default(), |args: &ParsedArgs, _: &Context<'_>| {
            Ok(ResourceGroup {
                resource_type: args.string("resource_type")?,
            })
        })
        .command(
            CommandDecl::new(
                "ResourceGroup::list",
                |chain: &InstanceChain, _: &ParsedArgs, _: &Context<'_>| {
                    let main = chain.get::<MainGroup>()?;
                    let resource = chain.get::<ResourceGroup>()?;
                    Ok::<_, anyhow::Error>(format!(
                        "Listing all {}s (Profile: {})",
                        resource.resource_type, main.profile
                    ))
                },
            )
            .help("List resources of the selected type."),
        )
        .command(
            CommandDecl::new(
                "ResourceGroup::create",
                |chain: &InstanceChain, args: &ParsedArgs, _: &Context<'_>| {
                    let resource = chain.get::<ResourceGroup>()?;
                    Ok::<_, anyhow::Error>(vec![
                        format!("Creating {} '{}'", resource.resource_type, args.string("name")?),
                        format!("Size: {}", args.string("size")?),
                        format!("Region: {}", args.string("region")?),
                    ])
                },
            )
            .help("Create a new resource."),
        )
}

fn main_group() -> GroupDecl {
    GroupDecl::new("MainGroup")
        .name("cli")
        .help("Main CLI group with top-level commands and subgroups.")
        .constructor(Signature::default(), |args: &ParsedArgs, ctx: &Context<'_>| {
            // Every top-level option is also published to the shared context.
            for (key, value) in args.iter() {
                ctx.set(key, value.clone())?;
            }
            Ok(MainGroup {
                env: args.string("env")?,
                profile: args.string("profile")?,
                frontend_dir: args.path("frontend_dir")?,
                docker_dir: args.path("docker_dir")?,
            })
        })
        .group("group1", group_one())
        .group("group2", group_two())
        .group("config", config_group())
        .group("resource", resource_group())
        .command(
            CommandDecl::new(
                "MainGroup::status",
                |chain: &InstanceChain, _: &ParsedArgs, _: &Context<'_>| {
                    let main = chain.get::<MainGroup>()?;
                    log::debug!(
                        "Status requested (frontend: {}, docker: {})",
                        main.frontend_dir.display(),
                        main.docker_dir.display()
                    );
                    Ok::<_, anyhow::Error>(vec![
                        "Status: Running".to_string(),
                        format!("Environment: {}", main.env),
                        format!("Profile: {}", main.profile),
                    ])
                },
            )
            .help("Display the current status."),
        )
        .command(
            CommandDecl::new("MainGroup::version", |_, _, _| Ok(Value::from(version_text())))
                .help("Show the demo version."),
        )
}

fn build_tree(settings: &Settings) -> Result<CommandTree> {
    let mut registry = Registry::new();
    declare_parameters(&mut registry)?;
    let tree = Compiler::with_settings(&registry, settings).compile(main_group())?;
    Ok(tree)
}

// --- Entry point ---

fn main() {
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let settings = match Settings::discover(APP_NAME) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("\n{}: {}", "Error".red().bold(), e);
            return EXIT_COMPILE;
        }
    };

    let tree = match build_tree(&settings) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("\n{}: {}", "Error".red().bold(), e);
            return EXIT_COMPILE;
        }
    };

    let renderer = TextRenderer::new()
        .prog_name(APP_NAME)
        .styled(true)
        .show_defaults(settings.show_defaults);
    let dispatcher = Dispatcher::new(&tree).settings(settings).with_renderer(renderer);

    let argv: Vec<String> = std::env::args().skip(1).collect();
    log::debug!("Demo invoked with {:?}", argv);

    match dispatcher.dispatch(&argv) {
        Ok(Outcome::Eager { option, .. }) if option == "--version" => {
            println!("{}", version_text());
            EXIT_OK
        }
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            report(&dispatcher, &tree, &e);
            e.exit_code()
        }
    }
}

/// Usage errors print the help of the node that rejected the input first.
fn report<R: Renderer>(dispatcher: &Dispatcher<'_, R>, tree: &CommandTree, error: &DispatchError) {
    if error.is_usage_error()
        && let Some(path) = error.path()
    {
        let segments: Vec<&str> = path.split_whitespace().skip(1).collect();
        if let Some((node, ancestors)) = tree.find(&segments) {
            eprintln!("{}\n", dispatcher.renderer().render_help(node, &ancestors));
        }
    }
    eprintln!("{}: {}", "Error".red().bold(), error);
}
