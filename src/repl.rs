use crate::report::{ColorRole, EntryKind, OutputEntry};
use crate::sandbox::{CancelHandle, RunLimits};
use crate::scan;
use crate::script::evaluator::Evaluator;
use crate::script::parse_source;
use crate::script::value::Value;
use crate::templates::TemplateLibrary;
use colored::{ColoredString, Colorize};
use std::io::{self, Write};
use tracing::debug;

/// Interactive loop with persistent state between lines. Each line gets a
/// fresh budget, so a runaway loop ends the line rather than the session.
pub fn start(limits: RunLimits) {
    println!("sandpad v{}", env!("CARGO_PKG_VERSION"));
    println!("Type ':help' for commands, ':quit' or Ctrl+D to leave");
    println!();

    debug!("repl started");
    let templates = TemplateLibrary::builtin();
    let mut evaluator = Evaluator::new(&limits, CancelHandle::new());
    let mut show_tokens = false;

    loop {
        print!("> ");
        io::stdout().flush().unwrap();

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => {
                // EOF reached (Ctrl+D or piped input ended)
                println!();
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    println!("Goodbye!");
                    break;
                }
                if let Some(command) = line.strip_prefix(':') {
                    if !run_command(command, &templates, &mut evaluator, &limits, &mut show_tokens)
                    {
                        println!("Goodbye!");
                        break;
                    }
                    continue;
                }

                run_line(line, &mut evaluator, &limits, show_tokens);
            }
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                break;
            }
        }
    }
    debug!("repl finished");
}

/// Returns false when the session should end.
fn run_command(
    command: &str,
    templates: &TemplateLibrary,
    evaluator: &mut Evaluator,
    limits: &RunLimits,
    show_tokens: &mut bool,
) -> bool {
    let mut parts = command.splitn(2, ' ');
    let name = parts.next().unwrap_or("");
    let argument = parts.next().map(str::trim).unwrap_or("");

    match name {
        "help" => {
            println!("  :help           show this help");
            println!("  :templates      list the built-in templates");
            println!("  :load NAME      print and run a template");
            println!("  :tokens         toggle the classified token dump");
            println!("  :quit           leave the session");
        }
        "templates" => {
            for template in templates.list() {
                println!("  {} - {}", template.name.bold(), template.description);
            }
        }
        "load" => match templates.get(argument) {
            Some(template) => {
                println!("{}", template.source.trim_end());
                run_line(&template.source, evaluator, limits, false);
            }
            None => println!("No template named '{}'", argument),
        },
        "tokens" => {
            *show_tokens = !*show_tokens;
            println!(
                "Token dump {}",
                if *show_tokens { "enabled" } else { "disabled" }
            );
        }
        "quit" | "exit" => return false,
        other => println!("Unknown command ':{}'. Try ':help'", other),
    }
    true
}

fn run_line(source: &str, evaluator: &mut Evaluator, limits: &RunLimits, show_tokens: bool) {
    if show_tokens {
        dump_tokens(source);
    }

    // State persists, budgets do not
    evaluator.reset_budget(limits, CancelHandle::new());

    let program = match parse_source(source) {
        Ok(program) => program,
        Err(error) => {
            error.report(source, None);
            return;
        }
    };

    match evaluator.evaluate_program(&program) {
        Ok(last_value) => {
            render_entries(&evaluator.drain_output());
            if let Some(value) = last_value {
                if !matches!(value, Value::Undefined) {
                    print_entry_line(EntryKind::Result, &value.inspect());
                }
            }
        }
        Err(error) => {
            render_entries(&evaluator.drain_output());
            error.report(source, None);
        }
    }
}

pub fn dump_tokens(source: &str) {
    for token in scan::scan(source) {
        println!("{:>10}  {:?}", token.kind.name(), token.text);
    }
}

/// Prints captured entries through their presentation descriptors.
pub fn render_entries(entries: &[OutputEntry]) {
    for entry in entries {
        print_entry_line(entry.kind, &entry.content);
    }
}

fn print_entry_line(kind: EntryKind, content: &str) {
    let descriptor = kind.descriptor();
    let glyph = paint(descriptor.glyph, descriptor.color_role);

    let mut lines = content.lines();
    match lines.next() {
        Some(first) => {
            println!("{} {}", glyph, first);
            for rest in lines {
                println!("  {}", rest);
            }
        }
        None => println!("{}", glyph),
    }
}

fn paint(text: &str, role: ColorRole) -> ColoredString {
    match role {
        ColorRole::Normal => text.normal(),
        ColorRole::Error => text.red(),
        ColorRole::Warning => text.yellow(),
        ColorRole::Info => text.cyan(),
        ColorRole::Accent => text.green(),
        ColorRole::Muted => text.dimmed(),
    }
}
