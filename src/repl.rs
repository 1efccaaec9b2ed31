//! Interactive REPL.

use crate::commands::{format_current, format_listing, format_report, format_steps, format_table};
use crate::session::{machine_id_for, parse_events, parse_seeds, Session, SessionError};
use colored::Colorize;
use fsmlink_core::GuardRegistry;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::Path;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help
  list                          List state machine files in the directory
  show <file>                   Show a document without loading it

  load <file>                   Load one machine
  load-two <file_a> <file_b>    Load two machines for bridged runs
  use <machine>                 Select the machine single-machine commands act on

  event <event>                 Trigger an event
  state                         Show the current state
  events                        Show events available from the current state
  states                        List all states
  event-sequence                Show the document's event sequence
  history                       Show visited states

  run <e1,e2,...>               Run a list of events
  run --all                     Run the document's event sequence
  run-both <machine:event,...>  Run both machines from the given seeds

  goto <state>                  Jump to a state without a transition
  rewind [n]                    Undo the last n state changes (default 1)
  reset                         Return to the initial state

  guard <name> on|off           Set a guard flag
  guards                        List guard flags

  quit, exit                    Exit the REPL
"#;

pub fn run(session: &mut Session, history_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "fsmlink shell".bold().cyan());
    println!("Machine directory: {}", session.directory().display());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;
    let _ = rl.load_history(history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = match session.active() {
            Ok(engine) => format!(
                "{} ",
                format!("fsmlink:{}>", engine.machine_id()).cyan()
            ),
            Err(_) => format!("{} ", "fsmlink>".cyan()),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(session, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(history_path);
    tracing::info!("Exiting the shell");

    Ok(())
}

fn execute_repl_command(
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "list" | "ls" => {
            let files = session.list_files()?;
            Ok(Some(format_listing(&files, session)))
        }

        "show" => {
            let Some(file) = args.first() else {
                return Ok(Some("Usage: show <file>".to_string()));
            };
            let table = session.read_table(file)?;
            Ok(Some(format_table(&machine_id_for(file), &table)))
        }

        "load" => {
            let Some(file) = args.first() else {
                return Ok(Some("Usage: load <file>".to_string()));
            };
            let engine = session.load(file)?;
            Ok(Some(format!(
                "{} {} (state: {})",
                "Loaded".green(),
                engine.machine_id().cyan(),
                engine.current_state().as_str().yellow()
            )))
        }

        "load-two" | "load2" => {
            if args.len() < 2 {
                return Ok(Some("Usage: load-two <file_a> <file_b>".to_string()));
            }
            session.load_two(args[0], args[1])?;
            let ids: Vec<String> = session
                .machines()
                .iter()
                .map(|m| m.machine_id().cyan().to_string())
                .collect();
            Ok(Some(format!("{} {}", "Loaded".green(), ids.join(" and "))))
        }

        "use" => {
            let Some(machine) = args.first() else {
                return Ok(Some("Usage: use <machine>".to_string()));
            };
            session.select(machine)?;
            Ok(Some(format_current(session.active()?)))
        }

        "event" | "e" => {
            let Some(event) = args.first() else {
                return Ok(Some("Usage: event <event>".to_string()));
            };
            let engine = session.active_mut()?;
            let outcome = engine.trigger(event)?;
            let mut output = format!(
                "{} {} → {}",
                event.cyan(),
                outcome.from_state,
                outcome.to_state.as_str().yellow()
            );
            if let Some(directive) = outcome.directive {
                output.push_str(&format!(
                    " ({} {}:{} not sent outside run-both)",
                    "directive".dimmed(),
                    directive.target_machine,
                    directive.event
                ));
            }
            Ok(Some(output))
        }

        "state" => Ok(Some(format_current(session.active()?))),

        "events" => {
            let engine = session.active()?;
            let events = engine.available_events();
            if events.is_empty() {
                return Ok(Some(
                    format!(
                        "No available transitions from state '{}'",
                        engine.current_state()
                    )
                    .yellow()
                    .to_string(),
                ));
            }
            Ok(Some(format!(
                "Available events in state '{}': {}",
                engine.current_state(),
                events.join(", ")
            )))
        }

        "states" => {
            let engine = session.active()?;
            let states: Vec<&str> = engine.table().states().map(|s| s.as_str()).collect();
            Ok(Some(format!("Available states: {}", states.join(", "))))
        }

        "event-sequence" | "event_sequence" => {
            let engine = session.active()?;
            let sequence = engine.table().event_sequence();
            if sequence.is_empty() {
                return Ok(Some(
                    "No predefined event sequence in this document"
                        .yellow()
                        .to_string(),
                ));
            }
            Ok(Some(format!("Predefined event sequence: {}", sequence.join(", "))))
        }

        "history" => {
            let engine = session.active()?;
            let visited: Vec<&str> = engine.history().iter().map(|s| s.as_str()).collect();
            Ok(Some(visited.join(" → ")))
        }

        "run" => {
            if args.is_empty() {
                return Ok(Some("Usage: run <e1,e2,...> | run --all".to_string()));
            }
            let steps = if args[0] == "--all" {
                session.run_all()?
            } else {
                let events = parse_events(&args.join(","));
                session.run_sequence(&events)?
            };
            Ok(Some(format!(
                "{}\n{}",
                format_steps(&steps),
                format_current(session.active()?)
            )))
        }

        "run-both" | "rb" => {
            let default_machine = session
                .machines()
                .first()
                .map(|m| m.machine_id().to_string())
                .ok_or(SessionError::NeedTwoMachines)?;
            let seeds = parse_seeds(&args.join(","), &default_machine)?;
            let report = session.run_both(&seeds)?;
            Ok(Some(format_report(&report)))
        }

        "goto" => {
            let Some(state) = args.first() else {
                return Ok(Some("Usage: goto <state>".to_string()));
            };
            let engine = session.active_mut()?;
            engine.goto(*state)?;
            Ok(Some(format_current(engine)))
        }

        "rewind" => {
            let n: usize = match args.first() {
                Some(n) => n.parse()?,
                None => 1,
            };
            let engine = session.active_mut()?;
            engine.rewind(n)?;
            Ok(Some(format_current(engine)))
        }

        "reset" => {
            let engine = session.active_mut()?;
            engine.reset();
            Ok(Some(format_current(engine)))
        }

        "guard" => {
            if args.len() < 2 {
                return Ok(Some("Usage: guard <name> on|off".to_string()));
            }
            let value = match args[1].to_lowercase().as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                other => {
                    return Ok(Some(format!("Expected on or off, got '{}'", other)));
                }
            };
            session.guards().set(args[0], value);
            Ok(Some(format!(
                "Guard {} is {}",
                args[0].cyan(),
                if value { "on".green() } else { "off".red() }
            )))
        }

        "guards" => {
            let guards = session.guards();
            let names = guards.names();
            if names.is_empty() {
                return Ok(Some("No guards".yellow().to_string()));
            }
            let mut output = String::new();
            for name in names {
                let value = guards.get(&name).unwrap_or(false);
                output.push_str(&format!(
                    "  {} = {}\n",
                    name.cyan(),
                    if value { "on".green() } else { "off".red() }
                ));
            }
            Ok(Some(output))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
