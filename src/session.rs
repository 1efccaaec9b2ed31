//! Loaded machines and the settings they run under.

use crate::config::Config;
use fsmlink_core::{
    CommunicationBridge, CoreError, DualRunReport, EngineOptions, ExecutionController,
    FlagGuardRegistry, StateMachineEngine, StepRecord, TransitionTable, UnknownPeerPolicy,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Shell-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("file {0} does not exist in {1:?}")]
    FileNotFound(String, PathBuf),

    #[error("no state machine is loaded, use 'load' first")]
    NotLoaded,

    #[error("two machines are required, use 'load-two' first")]
    NeedTwoMachines,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Lists the `.json` documents in a directory, sorted.
pub fn list_json_files(directory: &Path) -> Result<Vec<String>, SessionError> {
    let entries = std::fs::read_dir(directory).map_err(|source| SessionError::Io {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut files: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(".json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Machine identifier for a document file: its stem.
pub fn machine_id_for(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Parses `machine:event` seeds separated by commas. A bare event
/// addresses `default_machine`.
pub fn parse_seeds(input: &str, default_machine: &str) -> Result<Vec<(String, String)>, SessionError> {
    let mut seeds = Vec::new();
    for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (machine, event) = match item.split_once(':') {
            Some((machine, event)) => (machine.trim(), event.trim()),
            None => (default_machine, item),
        };
        if machine.is_empty() || event.is_empty() {
            return Err(SessionError::InvalidInput(format!(
                "expected machine:event, got '{}'",
                item
            )));
        }
        seeds.push((machine.to_string(), event.to_string()));
    }
    Ok(seeds)
}

/// Splits a comma-separated event list.
pub fn parse_events(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Machines loaded from one directory.
pub struct Session {
    directory: PathBuf,
    guards: FlagGuardRegistry,
    options: EngineOptions,
    controller: ExecutionController,
    unknown_peer: UnknownPeerPolicy,
    machines: Vec<StateMachineEngine>,
    /// Index of the machine single-machine commands act on.
    active: usize,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        let guards: FlagGuardRegistry = config
            .guards
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();

        Self {
            directory: config.shell.directory.clone(),
            guards,
            options: EngineOptions {
                strict_goto: config.execution.strict_goto,
            },
            controller: config.execution.controller(),
            unknown_peer: config.execution.unknown_peer,
            machines: Vec::new(),
            active: 0,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn guards(&self) -> &FlagGuardRegistry {
        &self.guards
    }

    pub fn list_files(&self) -> Result<Vec<String>, SessionError> {
        list_json_files(&self.directory)
    }

    /// Reads and validates a document from the session directory.
    pub fn read_table(&self, filename: &str) -> Result<TransitionTable, SessionError> {
        let path = self.directory.join(filename);
        if !path.is_file() {
            return Err(SessionError::FileNotFound(
                filename.to_string(),
                self.directory.clone(),
            ));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(TransitionTable::from_json_str(&text)?)
    }

    fn build_engine(&self, filename: &str) -> Result<StateMachineEngine, SessionError> {
        let table = Arc::new(self.read_table(filename)?);
        let engine = StateMachineEngine::new(
            machine_id_for(filename),
            table,
            Arc::new(self.guards.clone()),
        )
        .with_options(self.options);
        tracing::info!(
            "State machine '{}' loaded successfully (checksum {})",
            engine.machine_id(),
            engine.table().checksum()
        );
        Ok(engine)
    }

    /// Loads one machine, replacing whatever was loaded.
    pub fn load(&mut self, filename: &str) -> Result<&StateMachineEngine, SessionError> {
        let engine = self.build_engine(filename)?;
        self.machines = vec![engine];
        self.active = 0;
        Ok(&self.machines[0])
    }

    /// Loads two machines for bridged runs, replacing whatever was loaded.
    pub fn load_two(&mut self, first: &str, second: &str) -> Result<(), SessionError> {
        if machine_id_for(first) == machine_id_for(second) {
            return Err(SessionError::InvalidInput(format!(
                "'{}' and '{}' would share machine id '{}'",
                first,
                second,
                machine_id_for(first)
            )));
        }
        let a = self.build_engine(first)?;
        let b = self.build_engine(second)?;
        self.machines = vec![a, b];
        self.active = 0;
        Ok(())
    }

    /// Loaded machines in round order.
    pub fn machines(&self) -> &[StateMachineEngine] {
        &self.machines
    }

    /// Selects which loaded machine single-machine commands act on.
    pub fn select(&mut self, machine: &str) -> Result<(), SessionError> {
        let index = self
            .machines
            .iter()
            .position(|m| m.machine_id() == machine)
            .ok_or_else(|| CoreError::MachineNotFound {
                machine: machine.to_string(),
            })?;
        self.active = index;
        Ok(())
    }

    pub fn active(&self) -> Result<&StateMachineEngine, SessionError> {
        self.machines.get(self.active).ok_or(SessionError::NotLoaded)
    }

    pub fn active_mut(&mut self) -> Result<&mut StateMachineEngine, SessionError> {
        self.machines
            .get_mut(self.active)
            .ok_or(SessionError::NotLoaded)
    }

    pub fn run_sequence(&mut self, events: &[String]) -> Result<Vec<StepRecord>, SessionError> {
        let controller = self.controller.clone();
        Ok(controller.run_sequence(self.active_mut()?, events)?)
    }

    pub fn run_all(&mut self) -> Result<Vec<StepRecord>, SessionError> {
        let controller = self.controller.clone();
        Ok(controller.run_all(self.active_mut()?)?)
    }

    /// Runs both loaded machines from the given seeds.
    pub fn run_both(&mut self, seeds: &[(String, String)]) -> Result<DualRunReport, SessionError> {
        let [a, b] = self.machines.as_mut_slice() else {
            return Err(SessionError::NeedTwoMachines);
        };
        let bridge = CommunicationBridge::with_machines(
            self.unknown_peer,
            [a.machine_id().to_string(), b.machine_id().to_string()],
        )?;
        let seeds: Vec<(&str, &str)> = seeds
            .iter()
            .map(|(m, e)| (m.as_str(), e.as_str()))
            .collect();
        Ok(self.controller.run_both(a, b, &bridge, &seeds)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fsmlink_core::Termination;
    use tempfile::TempDir;

    pub(crate) const MACHINE1: &str = r#"{
        "initial_state": "idle",
        "events": ["start", "pause", "resume", "finish", "error", "reset"],
        "transitions": {
            "idle": {"start": {"target": "running", "guard": "is_system_ready"}},
            "running": {
                "pause": {"target": "paused"},
                "finish": {"target": "idle"},
                "error": {"target": "error_state"}
            },
            "paused": {"resume": {"target": "running"}},
            "error_state": {"reset": {"target": "idle"}}
        },
        "communications": {
            "running": {"finish": {"target_machine": "machine2", "event": "start_other"}},
            "paused": {"resume": {"target_machine": "machine2", "event": "resume_other"}}
        },
        "event_sequence": ["start", "pause", "resume", "finish"]
    }"#;

    pub(crate) const MACHINE2: &str = r#"{
        "initial_state": "waiting",
        "events": ["start_other", "resume_other", "stop_other"],
        "transitions": {
            "waiting": {"start_other": "working", "resume_other": "working"},
            "working": {"stop_other": "waiting", "resume_other": "working"}
        }
    }"#;

    pub(crate) fn machine_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("machine1.json"), MACHINE1).unwrap();
        std::fs::write(dir.path().join("machine2.json"), MACHINE2).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a machine").unwrap();
        dir
    }

    pub(crate) fn session_in(dir: &TempDir) -> Session {
        let mut config = Config::default();
        config.shell.directory = dir.path().to_path_buf();
        Session::new(&config)
    }

    #[test]
    fn test_list_json_files() {
        let dir = machine_dir();
        let files = list_json_files(dir.path()).unwrap();
        assert_eq!(files, vec!["machine1.json", "machine2.json"]);
    }

    #[test]
    fn test_list_missing_directory() {
        let result = list_json_files(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(SessionError::Io { .. })));
    }

    #[test]
    fn test_machine_id_for() {
        assert_eq!(machine_id_for("machine1.json"), "machine1");
        assert_eq!(machine_id_for("plain"), "plain");
    }

    #[test]
    fn test_parse_seeds() {
        let seeds = parse_seeds("machine1:start, stop ,machine2:go", "machine1").unwrap();
        assert_eq!(
            seeds,
            vec![
                ("machine1".to_string(), "start".to_string()),
                ("machine1".to_string(), "stop".to_string()),
                ("machine2".to_string(), "go".to_string()),
            ]
        );
        assert!(parse_seeds("machine1:", "machine1").is_err());
        assert!(parse_seeds("", "machine1").unwrap().is_empty());
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(parse_events("start, pause,,resume"), vec!["start", "pause", "resume"]);
    }

    #[test]
    fn test_load_and_trigger() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        assert!(matches!(session.active(), Err(SessionError::NotLoaded)));

        let engine = session.load("machine1.json").unwrap();
        assert_eq!(engine.machine_id(), "machine1");

        session.active_mut().unwrap().trigger("start").unwrap();
        assert_eq!(session.active().unwrap().current_state().as_str(), "running");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        let result = session.load("machine3.json");
        assert!(matches!(result, Err(SessionError::FileNotFound(..))));
    }

    #[test]
    fn test_load_invalid_document() {
        let dir = machine_dir();
        std::fs::write(dir.path().join("broken.json"), r#"{"transitions": {}}"#).unwrap();
        let mut session = session_in(&dir);
        let result = session.load("broken.json");
        assert!(matches!(
            result,
            Err(SessionError::Core(CoreError::Schema { .. }))
        ));
    }

    #[test]
    fn test_guard_flag_toggle() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        session.load("machine1.json").unwrap();

        session.guards().set("is_system_ready", false);
        let steps = session.run_sequence(&["start".to_string()]).unwrap();
        assert!(matches!(
            steps[0].result,
            Err(CoreError::GuardFailed { .. })
        ));

        session.guards().set("is_system_ready", true);
        let steps = session.run_sequence(&["start".to_string()]).unwrap();
        assert!(steps[0].result.is_ok());
    }

    #[test]
    fn test_run_all() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        session.load("machine1.json").unwrap();
        let steps = session.run_all().unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(session.active().unwrap().current_state().as_str(), "idle");
    }

    #[test]
    fn test_run_both_requires_two() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        session.load("machine1.json").unwrap();
        let result = session.run_both(&[]);
        assert!(matches!(result, Err(SessionError::NeedTwoMachines)));
    }

    #[test]
    fn test_load_two_and_run_both() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        session.load_two("machine1.json", "machine2.json").unwrap();

        let seeds = parse_seeds("start,finish", "machine1").unwrap();
        let report = session.run_both(&seeds).unwrap();
        assert_eq!(report.termination, Termination::Quiescent);
        assert_eq!(session.machines()[1].current_state().as_str(), "working");

        session.select("machine2").unwrap();
        assert_eq!(session.active().unwrap().machine_id(), "machine2");
        assert!(session.select("machine9").is_err());
    }

    #[test]
    fn test_load_two_same_id() {
        let dir = machine_dir();
        let mut session = session_in(&dir);
        let result = session.load_two("machine1.json", "machine1.json");
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
    }
}
