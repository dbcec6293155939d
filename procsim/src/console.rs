//! Command console
//!
//! Parses REPL lines into [`Command`]s and runs them against one
//! [`Emulator`]. Output is returned as text; the binary decides where it
//! goes.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::SimConfig;
use crate::report::{MemorySnapshot, ProcessDetail, StatusSnapshot, UtilizationReport, VmStat};
use crate::sys::emulator::Emulator;
use crate::{SimError, SimResult};

const HELP: &str = "\
Commands:
  initialize          load the configuration and build the simulator
  scheduler-test      start generating and scheduling processes
  scheduler-stop      stop both worker threads
  screen -s <name>    create a named process
  screen -r <name>    show one process
  screen -ls          list waiting, running and finished processes
  process-smi         memory usage per resident process
  vmstat              aggregate memory and CPU statistics
  report-util [file]  append a utilization report to a file
  config              show the active configuration
  clear               clear the screen
  help                show this list
  exit                stop and quit";

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Initialize,
    SchedulerStart,
    SchedulerStop,
    ScreenList,
    ScreenCreate(String),
    ScreenResume(String),
    ProcessSmi,
    VmStat,
    ReportUtil(Option<PathBuf>),
    Config,
    Help,
    Clear,
    Exit,
    /// Blank line
    Nothing,
}

impl Command {
    /// Parse one input line
    ///
    /// Command words and flags are case-insensitive; process names and
    /// file names are taken as typed.
    pub fn parse(line: &str) -> SimResult<Self> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(Command::Nothing);
        };

        let cmd = match head.to_ascii_lowercase().as_str() {
            "initialize" => Command::Initialize,
            "scheduler-test" | "scheduler-start" => Command::SchedulerStart,
            "scheduler-stop" => Command::SchedulerStop,
            "process-smi" => Command::ProcessSmi,
            "vmstat" => Command::VmStat,
            "report-util" => Command::ReportUtil(words.next().map(PathBuf::from)),
            "config" => Command::Config,
            "help" => Command::Help,
            "clear" => Command::Clear,
            "exit" => Command::Exit,
            "screen" => {
                let flag = words
                    .next()
                    .ok_or_else(|| SimError::MissingArgument("screen -s|-r <name> or screen -ls".to_string()))?;

                match flag.to_ascii_lowercase().as_str() {
                    "-ls" => Command::ScreenList,
                    "-s" | "-r" => {
                        let name = words
                            .next()
                            .ok_or_else(|| SimError::MissingArgument(format!("screen {} <name>", flag)))?
                            .to_string();
                        if flag.eq_ignore_ascii_case("-s") {
                            Command::ScreenCreate(name)
                        } else {
                            Command::ScreenResume(name)
                        }
                    }
                    other => return Err(SimError::UnknownCommand(format!("screen {}", other))),
                }
            }
            _ => return Err(SimError::UnknownCommand(line.trim().to_string())),
        };

        Ok(cmd)
    }

    /// Allowed before `initialize`
    fn needs_emulator(&self) -> bool {
        !matches!(self, Command::Initialize | Command::Help | Command::Clear | Command::Exit | Command::Nothing)
    }
}

/// Result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Text to show the user
    pub output: String,
    /// Whether the console should quit
    pub exit: bool,
}

impl Outcome {
    fn text(output: impl Into<String>) -> Self {
        Self { output: output.into(), exit: false }
    }
}

/// Command dispatcher holding at most one simulation
pub struct Console {
    config_path: PathBuf,
    report_path: PathBuf,
    config: Option<SimConfig>,
    emulator: Option<Emulator>,
}

impl Console {
    /// Create a console; nothing is loaded until `initialize`
    pub fn new(config_path: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            report_path: report_path.into(),
            config: None,
            emulator: None,
        }
    }

    /// Whether `initialize` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.emulator.is_some()
    }

    /// The running simulation, if any
    pub fn emulator(&self) -> Option<&Emulator> {
        self.emulator.as_ref()
    }

    /// Run a command
    pub fn execute(&mut self, command: Command) -> SimResult<Outcome> {
        if command.needs_emulator() && self.emulator.is_none() {
            return Err(SimError::NotInitialized);
        }

        match command {
            Command::Nothing | Command::Clear => Ok(Outcome::default()),
            Command::Help => Ok(Outcome::text(HELP)),
            Command::Initialize => self.initialize(),
            Command::Exit => {
                let stopped = self.emulator.as_mut().map_or(Ok(false), Emulator::stop);
                Ok(exit_outcome(stopped))
            }
            Command::SchedulerStart => {
                let emulator = self.require_emulator_mut()?;
                if emulator.start()? {
                    Ok(Outcome::text("Scheduler started."))
                } else {
                    Ok(Outcome::text("Scheduler is already running."))
                }
            }
            Command::SchedulerStop => {
                let emulator = self.require_emulator_mut()?;
                if emulator.stop()? {
                    Ok(Outcome::text("Scheduler stopped."))
                } else {
                    Ok(Outcome::text("Scheduler is not running."))
                }
            }
            Command::ScreenCreate(name) => {
                let pid = self.require_emulator()?.create_named(&name)?;
                Ok(Outcome::text(format!("Created process {} (id {}).", name, pid)))
            }
            Command::ScreenResume(name) => {
                let emulator = self.require_emulator()?;
                let detail = emulator
                    .with_state(|s| ProcessDetail::capture(s, &name))
                    .ok_or(SimError::ProcessNotFound(name))?;
                Ok(Outcome::text(detail.to_string()))
            }
            Command::ScreenList => {
                let emulator = self.require_emulator()?;
                let status = emulator.with_state(|s| StatusSnapshot::capture(s, emulator.params()));
                Ok(Outcome::text(status.to_string()))
            }
            Command::ProcessSmi => {
                let memory = self.require_emulator()?.with_state(MemorySnapshot::capture);
                Ok(Outcome::text(memory.to_string()))
            }
            Command::VmStat => {
                let emulator = self.require_emulator()?;
                let stats = emulator.with_state(|s| VmStat::capture(s, emulator.params()));
                Ok(Outcome::text(stats.to_string()))
            }
            Command::ReportUtil(path) => {
                let path = path.unwrap_or_else(|| self.report_path.clone());
                self.report_util(&path)
            }
            Command::Config => {
                let config = self.config.as_ref().ok_or(SimError::NotInitialized)?;
                Ok(Outcome::text(config.to_string()))
            }
        }
    }

    /// Parse and run one input line
    pub fn execute_line(&mut self, line: &str) -> SimResult<Outcome> {
        self.execute(Command::parse(line)?)
    }

    fn initialize(&mut self) -> SimResult<Outcome> {
        if self.emulator.is_some() {
            return Ok(Outcome::text("Already initialized."));
        }

        let config = if self.config_path.exists() {
            SimConfig::load(&self.config_path)?
        } else {
            warn!("{} not found, using default configuration", self.config_path.display());
            SimConfig::default()
        };

        let emulator = Emulator::new(&config)?;
        info!("Initialized from {}", self.config_path.display());

        self.config = Some(config);
        self.emulator = Some(emulator);
        Ok(Outcome::text("Initialized."))
    }

    fn report_util(&self, path: &Path) -> SimResult<Outcome> {
        let emulator = self.require_emulator()?;
        let report = emulator.with_state(|s| UtilizationReport::capture(s, emulator.params()));
        report.append_to(path)?;

        Ok(Outcome::text(format!("{}\nReport appended to {}", report, path.display())))
    }

    fn require_emulator(&self) -> SimResult<&Emulator> {
        self.emulator.as_ref().ok_or(SimError::NotInitialized)
    }

    fn require_emulator_mut(&mut self) -> SimResult<&mut Emulator> {
        self.emulator.as_mut().ok_or(SimError::NotInitialized)
    }
}

/// Exit always leaves the console, even when the workers did not stop cleanly
fn exit_outcome(stopped: SimResult<bool>) -> Outcome {
    match stopped {
        Ok(_) => Outcome { output: String::new(), exit: true },
        Err(e) => {
            error!("Emulator did not stop cleanly: {}", e);
            Outcome { output: format!("Exiting after stop failure: {}", e), exit: true }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("initialize").unwrap(), Command::Initialize);
        assert_eq!(Command::parse("  SCHEDULER-TEST ").unwrap(), Command::SchedulerStart);
        assert_eq!(Command::parse("screen -ls").unwrap(), Command::ScreenList);
        assert_eq!(Command::parse("Screen -S Job1").unwrap(), Command::ScreenCreate("Job1".into()));
        assert_eq!(Command::parse("screen -r job1").unwrap(), Command::ScreenResume("job1".into()));
        assert_eq!(Command::parse("report-util").unwrap(), Command::ReportUtil(None));
        assert_eq!(
            Command::parse("report-util out.txt").unwrap(),
            Command::ReportUtil(Some(PathBuf::from("out.txt")))
        );
        assert_eq!(Command::parse("").unwrap(), Command::Nothing);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Command::parse("reboot"), Err(SimError::UnknownCommand(_))));
        assert!(matches!(Command::parse("screen"), Err(SimError::MissingArgument(_))));
        assert!(matches!(Command::parse("screen -s"), Err(SimError::MissingArgument(_))));
        assert!(matches!(Command::parse("screen -x a"), Err(SimError::UnknownCommand(_))));
    }

    #[test]
    fn test_requires_initialize() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("config.txt"), tmp.path().join("log.txt"));

        assert!(matches!(console.execute(Command::ScreenList), Err(SimError::NotInitialized)));
        assert!(matches!(console.execute(Command::SchedulerStart), Err(SimError::NotInitialized)));
        assert!(console.execute(Command::Help).unwrap().output.contains("initialize"));
        assert!(console.execute(Command::Exit).unwrap().exit);
    }

    #[test]
    fn test_initialize_twice_is_noop() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("missing.txt"), tmp.path().join("log.txt"));

        assert_eq!(console.execute(Command::Initialize).unwrap().output, "Initialized.");
        assert_eq!(console.execute(Command::Initialize).unwrap().output, "Already initialized.");
        assert!(console.is_initialized());
    }

    #[test]
    fn test_initialize_rejects_bad_quantum() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.txt");
        std::fs::write(&path, "quantum-cycles 0\n").unwrap();

        let mut console = Console::new(&path, tmp.path().join("log.txt"));
        let err = console.execute(Command::Initialize).unwrap_err();
        assert!(err.is_fatal_config());
        assert!(!console.is_initialized());
    }

    #[test]
    fn test_start_stop_messages() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("missing.txt"), tmp.path().join("log.txt"));
        console.execute(Command::Initialize).unwrap();

        assert_eq!(console.execute(Command::SchedulerStop).unwrap().output, "Scheduler is not running.");
        assert_eq!(console.execute(Command::SchedulerStart).unwrap().output, "Scheduler started.");
        assert_eq!(console.execute(Command::SchedulerStart).unwrap().output, "Scheduler is already running.");
        assert_eq!(console.execute(Command::SchedulerStop).unwrap().output, "Scheduler stopped.");
        assert!(console.execute(Command::Exit).unwrap().exit);
    }

    #[test]
    fn test_emulator_accessor_after_initialize() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("missing.txt"), tmp.path().join("log.txt"));
        assert!(console.emulator().is_none());

        console.execute(Command::Initialize).unwrap();
        assert!(console.emulator().is_some());
        assert!(console.execute(Command::ScreenCreate("job".into())).is_ok());
        assert_eq!(console.emulator().unwrap().with_state(|s| s.processes().len()), 1);
    }

    #[test]
    fn test_exit_after_stop_failure() {
        let outcome = exit_outcome(Err(SimError::Internal("worker thread panicked".into())));
        assert!(outcome.exit);
        assert!(outcome.output.contains("worker thread panicked"));

        let outcome = exit_outcome(Ok(true));
        assert!(outcome.exit);
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn test_exit_running_scheduler() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("missing.txt"), tmp.path().join("log.txt"));
        console.execute(Command::Initialize).unwrap();
        console.execute(Command::SchedulerStart).unwrap();

        let outcome = console.execute(Command::Exit).unwrap();
        assert!(outcome.exit);
        assert!(outcome.output.is_empty());
        assert!(!console.emulator().unwrap().is_running());
    }

    #[test]
    fn test_screens() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("missing.txt"), tmp.path().join("log.txt"));
        console.execute(Command::Initialize).unwrap();

        console.execute_line("screen -s alpha").unwrap();
        assert!(matches!(console.execute_line("screen -s alpha"), Err(SimError::ProcessExists(_))));

        let detail = console.execute_line("screen -r alpha").unwrap().output;
        assert!(detail.contains("Process: alpha"));
        assert!(matches!(console.execute_line("screen -r beta"), Err(SimError::ProcessNotFound(_))));

        let listing = console.execute_line("screen -ls").unwrap().output;
        assert!(listing.contains("alpha  ("));
    }

    #[test]
    fn test_report_util_default_path() {
        let tmp = tempdir().unwrap();
        let report = tmp.path().join("csopesy-log.txt");
        let mut console = Console::new(tmp.path().join("missing.txt"), &report);
        console.execute(Command::Initialize).unwrap();

        console.execute_line("report-util").unwrap();
        assert!(std::fs::read_to_string(&report).unwrap().contains("CPU utilization:"));

        let custom = tmp.path().join("custom.txt");
        console.execute_line(&format!("report-util {}", custom.display())).unwrap();
        assert!(custom.exists());
    }

    #[test]
    fn test_config_command() {
        let tmp = tempdir().unwrap();
        let mut console = Console::new(tmp.path().join("missing.txt"), tmp.path().join("log.txt"));
        console.execute(Command::Initialize).unwrap();
        assert!(console.execute(Command::Config).unwrap().output.contains("quantum-cycles     5"));
    }
}
