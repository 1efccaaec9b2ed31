//! One-shot command execution and output formatting shared with the REPL.

use crate::session::{machine_id_for, parse_seeds, Session};
use crate::Commands;
use colored::Colorize;
use fsmlink_core::{
    DualRunReport, StateMachineEngine, StepRecord, Termination, TransitionTable,
};

/// Executes a command and returns the formatted output.
pub fn execute(session: &mut Session, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl | Commands::InitConfig { .. } => unreachable!(),

        Commands::List => {
            let files = session.list_files()?;
            Ok(format_listing(&files, session))
        }

        Commands::Show { file, json } => {
            let table = session.read_table(&file)?;
            if json {
                return Ok(serde_json::to_string_pretty(&table.to_json()?)?);
            }
            Ok(format_table(&machine_id_for(&file), &table))
        }

        Commands::Run { file, events, all } => {
            session.load(&file)?;
            let steps = if all || events.is_empty() {
                session.run_all()?
            } else {
                session.run_sequence(&events)?
            };
            let engine = session.active()?;
            Ok(format!(
                "{}\n{}",
                format_steps(&steps),
                format_current(engine)
            ))
        }

        Commands::RunBoth {
            first,
            second,
            seed,
        } => {
            session.load_two(&first, &second)?;
            let seeds = parse_seeds(&seed.join(","), &machine_id_for(&first))?;
            let report = session.run_both(&seeds)?;
            Ok(format_report(&report))
        }
    }
}

/// Formats the document listing of a directory.
pub fn format_listing(files: &[String], session: &Session) -> String {
    if files.is_empty() {
        return format!(
            "No state machine JSON files found in directory: {}",
            session.directory().display()
        )
        .yellow()
        .to_string();
    }
    let mut output = "Available state machine JSON files:".bold().to_string();
    for file in files {
        output.push_str(&format!("\n  - {}", file.cyan()));
    }
    output
}

/// One line per event of a single-machine run.
pub fn format_steps(steps: &[StepRecord]) -> String {
    if steps.is_empty() {
        return "No events were run".yellow().to_string();
    }
    let lines: Vec<String> = steps
        .iter()
        .map(|step| match &step.result {
            Ok(outcome) => format!(
                "{} {} → {}",
                step.event.cyan(),
                outcome.from_state,
                outcome.to_state.as_str().yellow()
            ),
            Err(e) => format!("{} {} [{}] {}", step.event.cyan(), "✗".red(), e.error_code(), e),
        })
        .collect();
    lines.join("\n")
}

pub fn format_current(engine: &StateMachineEngine) -> String {
    format!(
        "{} is in state {}",
        engine.machine_id().cyan(),
        engine.current_state().as_str().yellow()
    )
}

/// Round-by-round trace of a bridged run.
pub fn format_report(report: &DualRunReport) -> String {
    let mut output = String::new();
    for entry in &report.trace {
        let line = match &entry.result {
            Ok(outcome) => {
                let sent = outcome
                    .directive
                    .as_ref()
                    .map(|d| format!(" ⇒ {}:{}", d.target_machine, d.event))
                    .unwrap_or_default();
                format!(
                    "[{}] {} {} {} → {}{}",
                    entry.round.to_string().dimmed(),
                    entry.machine.cyan(),
                    entry.event,
                    outcome.from_state,
                    outcome.to_state.as_str().yellow(),
                    sent
                )
            }
            Err(e) => format!(
                "[{}] {} {} {} [{}] {}",
                entry.round.to_string().dimmed(),
                entry.machine.cyan(),
                entry.event,
                "✗".red(),
                e.error_code(),
                e
            ),
        };
        output.push_str(&line);
        output.push('\n');
    }

    for undelivered in &report.undelivered {
        let reason = undelivered
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "peer not loaded".to_string());
        output.push_str(&format!(
            "[{}] {} {}:{} from {} ({})\n",
            undelivered.round.to_string().dimmed(),
            "Undelivered".yellow(),
            undelivered.directive.target_machine,
            undelivered.directive.event,
            undelivered.from,
            reason
        ));
    }

    match report.termination {
        Termination::Quiescent => output.push_str(&format!(
            "{} after {} rounds ({} failed)",
            "Quiescent".green(),
            report.rounds,
            report.failures()
        )),
        Termination::LoopDetected { rounds } => output.push_str(&format!(
            "{}: queues still busy after {} rounds",
            "Communication loop detected".red(),
            rounds
        )),
    }

    for (machine, state) in &report.final_states {
        output.push_str(&format!(
            "\n  {}: {}",
            machine.cyan(),
            state.as_str().yellow()
        ));
    }
    output
}

/// Summary of a validated document.
pub fn format_table(machine: &str, table: &TransitionTable) -> String {
    let mut output = format!(
        "{} (initial: {}, checksum: {})",
        format!("Machine {}", machine.cyan()).bold(),
        table.initial().as_str().yellow(),
        table.checksum()
    );

    let states: Vec<&str> = table.states().map(|s| s.as_str()).collect();
    output.push_str(&format!("\n  States: {}", states.join(", ")));
    if !table.events().is_empty() {
        output.push_str(&format!("\n  Events: {}", table.events().join(", ")));
    }

    output.push_str("\n  Transitions:");
    for state in table.states() {
        for event in table.events_from(state) {
            let Some(transition) = table.get_transition(state, event) else {
                continue;
            };
            let guard = transition
                .guard
                .as_deref()
                .map(|g| format!(" [{}]", g))
                .unwrap_or_default();
            let send = table
                .get_communication(state, event)
                .map(|d| format!(" ⇒ {}:{}", d.target_machine, d.event))
                .unwrap_or_default();
            output.push_str(&format!(
                "\n    {} --{}{}--> {}{}",
                state, event, guard, transition.target, send
            ));
        }
    }

    if !table.event_sequence().is_empty() {
        output.push_str(&format!(
            "\n  Event sequence: {}",
            table.event_sequence().join(", ")
        ));
    }
    for warning in table.warnings() {
        output.push_str(&format!("\n  {}: {}", "Warning".yellow(), warning));
    }
    output
}
