//! Marionette CLI — compile Puppet manifests into resource catalogs.

mod settings;

use clap::{Parser as ClapParser, Subcommand};
use marionette_compiler::diagnostics::{Diagnostic, ErrorReporter};
use marionette_rt::logging::{ConsoleLogger, Level};
use marionette_rt::{compile_into, CompilationError};
use settings::{Settings, SettingsInput};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

#[derive(ClapParser)]
#[command(
    name = "marionette",
    version,
    about = "A catalog compiler for the Puppet configuration language",
    help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}

Examples:
  marionette compile site.pp               Compile a manifest into a catalog
  marionette compile --facts facts.json    Compile with facts from a file
  marionette parse site.pp                 Check syntax without compiling
"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Default)]
struct SettingsArgs {
    /// Root of the code directory
    #[arg(long = "code-dir", value_name = "DIR")]
    code_directory: Option<String>,
    /// Environment to compile for
    #[arg(long, value_name = "NAME")]
    environment: Option<String>,
    /// List of environment root directories
    #[arg(long = "environment-path", value_name = "PATHS")]
    environment_path: Option<String>,
    /// List of module root directories
    #[arg(long = "module-path", value_name = "PATHS")]
    module_path: Option<String>,
    /// Fallback module root directories
    #[arg(long = "base-module-path", value_name = "PATHS")]
    base_module_path: Option<String>,
    /// Manifest file or directory, relative to the environment
    #[arg(long, value_name = "PATH")]
    manifest: Option<String>,
    /// File of pre-loaded facts (JSON)
    #[arg(long, value_name = "FILE")]
    facts: Option<String>,
}

impl SettingsArgs {
    fn into_input(self) -> SettingsInput {
        SettingsInput {
            code_directory: self.code_directory,
            environment: self.environment,
            environment_path: self.environment_path,
            module_path: self.module_path,
            base_module_path: self.base_module_path,
            manifest: self.manifest,
            facts: self.facts,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compile manifests into a catalog for a node
    Compile {
        #[command(flatten)]
        settings: SettingsArgs,
        /// Node name to compile for (defaults to the 'hostname' fact)
        #[arg(long, value_name = "NAME")]
        node: Option<String>,
        /// Log level: debug, info, notice, warning, err
        #[arg(long, value_name = "LEVEL", default_value = "notice")]
        log_level: String,
        /// Manifest files to compile, overriding the configured manifest
        files: Vec<PathBuf>,
    },
    /// Check manifest syntax without compiling
    Parse {
        /// Manifest files to parse
        files: Vec<PathBuf>,
    },
    /// Print version information
    Version,
}

fn main() -> ExitCode {
    // A leading `--<name>` is shorthand for the subcommand `<name>`.
    let mut args: Vec<String> = std::env::args().collect();
    let shorthand = args
        .get(1)
        .and_then(|first| first.strip_prefix("--"))
        .filter(|name| ["compile", "parse", "version", "help"].contains(name))
        .map(str::to_string);
    if let Some(name) = shorthand {
        args[1] = name;
    }
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            // Clap renders help and version requests itself with exit 0.
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    print!("{e}");
                    ExitCode::SUCCESS
                }
                _ => {
                    eprint!("{e}");
                    ExitCode::FAILURE
                }
            };
        }
    };

    match cli.command {
        None => {
            use clap::CommandFactory;
            let mut command = Cli::command();
            let _ = command.print_help();
            ExitCode::SUCCESS
        }
        Some(Command::Version) => {
            println!("marionette {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(Command::Parse { files }) => parse_command(files),
        Some(Command::Compile {
            settings,
            node,
            log_level,
            files,
        }) => compile_command(settings, node, log_level, files),
    }
}

fn parse_command(files: Vec<PathBuf>) -> ExitCode {
    if files.is_empty() {
        eprintln!("{}", red("error: no manifest files given."));
        return ExitCode::FAILURE;
    }
    let mut reporter = ErrorReporter::new();
    for file in &files {
        let source = match std::fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                reporter.report(&Diagnostic::error(format!(
                    "cannot read '{}': {e}.",
                    file.display()
                )));
                continue;
            }
        };
        let path = file.display().to_string();
        match marionette_compiler::Parser::parse_tree(path.clone(), &source) {
            Ok(_) => println!("{} parsed {}", bold("ok:"), path),
            Err(e) => reporter.report(&e.to_diagnostic(&path, &source)),
        }
    }
    if reporter.errors() > 0 {
        eprintln!(
            "{}",
            red(&format!("{} error(s) encountered.", reporter.errors()))
        );
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn compile_command(
    settings: SettingsArgs,
    node: Option<String>,
    log_level: String,
    files: Vec<PathBuf>,
) -> ExitCode {
    let settings = settings
        .into_input()
        .with_environment()
        .with_config_file()
        .resolve();
    match run_compile(&settings, node, &log_level, files) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            report_error(&error);
            ExitCode::FAILURE
        }
    }
}

fn run_compile(
    settings: &Settings,
    node: Option<String>,
    log_level: &str,
    files: Vec<PathBuf>,
) -> Result<String, CompilationError> {
    let level = Level::from_name(log_level)
        .ok_or_else(|| CompilationError::Settings(format!("unknown log level '{log_level}'.")))?;

    let facts = match &settings.facts {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                CompilationError::Settings(format!("cannot read facts file '{}': {e}.", path.display()))
            })?;
            let map = marionette_rt::facts::MapFacts::from_json(&text).map_err(|e| {
                CompilationError::Settings(format!("cannot parse facts file '{}': {e}.", path.display()))
            })?;
            Some(map)
        }
        None => None,
    };

    let node_name = node
        .or_else(|| {
            facts.as_ref().and_then(|f| {
                use marionette_rt::facts::FactProvider;
                f.lookup("hostname")
                    .and_then(|v| v.as_string().map(str::to_string))
            })
        })
        .unwrap_or_else(|| "localhost".to_string());

    let manifest_files = if files.is_empty() {
        settings
            .manifests()
            .map_err(|e| CompilationError::Settings(e.to_string()))?
    } else {
        files
    };
    if manifest_files.is_empty() {
        return Err(CompilationError::Settings(
            "no manifests found to compile.".to_string(),
        ));
    }

    let mut sources = Vec::new();
    for file in &manifest_files {
        let source = std::fs::read_to_string(file).map_err(|e| {
            CompilationError::Settings(format!("cannot read manifest '{}': {e}.", file.display()))
        })?;
        sources.push((file.display().to_string(), source));
    }

    let facts_provider = facts.map(|f| Rc::new(f) as Rc<dyn marionette_rt::facts::FactProvider>);
    let mut context = marionette_rt::EvaluationContext::new(
        facts_provider,
        Box::new(ConsoleLogger::new(level)),
        &node_name,
    );
    // The environment's modules directory is searched first, then the
    // configured module paths, then the fallback paths.
    if let Some(environment) = settings.environment_directory() {
        context.module_paths.push(environment.join("modules"));
    }
    context.module_paths.extend(settings.module_path.iter().cloned());
    context.module_paths.extend(settings.base_module_path.iter().cloned());
    compile_into(&mut context, &sources)?;
    let document = context.catalog.to_json(&node_name);
    serde_json::to_string_pretty(&document)
        .map_err(|e| CompilationError::Settings(format!("cannot serialize catalog: {e}.")))
}

fn report_error(error: &CompilationError) {
    let mut reporter = ErrorReporter::new();
    match error {
        CompilationError::Frontend(e) => {
            reporter.report(&Diagnostic::error(e.to_string()));
        }
        CompilationError::Evaluation(e) => {
            let mut diagnostic = Diagnostic::error(e.message.clone());
            diagnostic.file = Some(e.path.clone());
            diagnostic.line = Some(e.line);
            if let Ok(source) = std::fs::read_to_string(&e.path) {
                diagnostic = Diagnostic::error(e.message.clone()).with_location(
                    &e.path,
                    &source,
                    e.offset,
                );
            }
            reporter.report(&diagnostic);
            for frame in &e.backtrace {
                eprintln!("    {frame}");
            }
        }
        CompilationError::Settings(message) => {
            reporter.report(&Diagnostic::error(message.clone()));
        }
    }
}
