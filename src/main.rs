use clap::{Arg, Command};
use sandpad::repl;
use sandpad::report::RunStatus;
use sandpad::sandbox::{RunLimits, Sandbox};
use sandpad::script::parse_source;
use sandpad::templates::TemplateLibrary;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sandpad=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("sandpad")
        .about("Sandboxed script runner with live-editor tooling")
        .arg(
            Arg::new("file")
                .help("The script file to execute")
                .value_name("FILE")
                .index(1),
        )
        .arg(
            Arg::new("interactive")
                .short('i')
                .long("interactive")
                .help("Start in interactive REPL mode")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("template")
                .long("template")
                .help("Run a built-in template by name")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("tokens")
                .long("tokens")
                .help("Dump the classified token stream of a file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("time-limit-ms")
                .long("time-limit-ms")
                .help("Wall-clock budget in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("fuel")
                .long("fuel")
                .help("Evaluation step budget")
                .value_name("STEPS")
                .value_parser(clap::value_parser!(u64)),
        )
        .get_matches();

    let mut limits = RunLimits::default();
    if let Some(ms) = matches.get_one::<u64>("time-limit-ms") {
        limits.time_limit = Duration::from_millis(*ms);
    }
    if let Some(fuel) = matches.get_one::<u64>("fuel") {
        limits.fuel = *fuel;
    }

    if let Some(path) = matches.get_one::<String>("tokens") {
        dump_file_tokens(path);
        return;
    }

    if let Some(name) = matches.get_one::<String>("template") {
        run_template(name, limits);
        return;
    }

    if matches.get_flag("interactive") {
        repl::start(limits);
        return;
    }

    if let Some(file_path) = matches.get_one::<String>("file") {
        run_file(file_path, limits);
    } else {
        repl::start(limits);
    }
}

fn run_file(path: &str, limits: RunLimits) {
    let path = Path::new(path);

    if !path.exists() {
        eprintln!("Error: File '{}' not found", path.display());
        std::process::exit(1);
    }

    match fs::read_to_string(path) {
        Ok(source) => run_source(&source, path.to_str(), limits),
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn run_template(name: &str, limits: RunLimits) {
    let templates = TemplateLibrary::builtin();
    match templates.get(name) {
        Some(template) => {
            let source = template.source.clone();
            run_source(&source, Some(name), limits);
        }
        None => {
            eprintln!("Error: no template named '{}'. Available:", name);
            for template in templates.list() {
                eprintln!("  {} - {}", template.name, template.description);
            }
            std::process::exit(1);
        }
    }
}

fn run_source(source: &str, filename: Option<&str>, limits: RunLimits) {
    // Parse failures get the full annotated terminal report
    if let Err(error) = parse_source(source) {
        error.report(source, filename);
        std::process::exit(1);
    }

    let mut sandbox = Sandbox::new(limits);
    let report = sandbox.run(source);
    repl::render_entries(&report.entries);

    if report.status != RunStatus::Success {
        std::process::exit(1);
    }
}

fn dump_file_tokens(path: &str) {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(source) => repl::dump_tokens(&source),
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    }
}
