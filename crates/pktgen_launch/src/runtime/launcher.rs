//! Run phase: load a unit, build its command line and start the application

use crate::config::ConfigUnit;
use crate::runtime::arguments::{ArgumentAssembler, ArgumentVector};
use crate::runtime::command::{CommandOutcome, CommandRunner, SystemCommand};
use crate::runtime::context::LaunchContext;
use crate::runtime::resolver::PathResolver;
use std::fmt;
use std::path::Path;

/// Progress of a single launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    ConfigLoaded,
    ArgumentsBuilt,
    BinaryResolved,
    Running,
    Terminated,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchState::Idle => "idle",
            LaunchState::ConfigLoaded => "config loaded",
            LaunchState::ArgumentsBuilt => "arguments built",
            LaunchState::BinaryResolved => "binary resolved",
            LaunchState::Running => "running",
            LaunchState::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// How a launch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// `norun` was set; the vector was printed only
    Printed(ArgumentVector),
    /// The application ran and exited
    Completed {
        argv: ArgumentVector,
        outcome: CommandOutcome,
    },
}

/// Restores the terminal when dropped
pub struct TerminalGuard<'a, R: CommandRunner> {
    runner: &'a R,
}

impl<'a, R: CommandRunner> TerminalGuard<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> Drop for TerminalGuard<'_, R> {
    fn drop(&mut self) {
        log::debug!("Restoring terminal settings");
        self.runner.restore_terminal();
    }
}

/// Drives one unit from loading to application exit
pub struct Launcher<'a, R: CommandRunner> {
    ctx: &'a LaunchContext,
    runner: &'a R,
    state: LaunchState,
}

impl<'a, R: CommandRunner> Launcher<'a, R> {
    pub fn new(ctx: &'a LaunchContext, runner: &'a R) -> Self {
        Self {
            ctx,
            runner,
            state: LaunchState::Idle,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Launch the unit at `unit_path`.
    ///
    /// The terminal is restored on every exit path, including errors raised
    /// before the application starts.
    pub async fn run(&mut self, unit_path: &Path) -> crate::Result<LaunchOutcome> {
        let _guard = TerminalGuard::new(self.runner);
        let result = self.drive(unit_path).await;
        self.transition(LaunchState::Terminated);
        result
    }

    async fn drive(&mut self, unit_path: &Path) -> crate::Result<LaunchOutcome> {
        let unit = ConfigUnit::load(unit_path)?;
        self.transition(LaunchState::ConfigLoaded);

        let namespace = self.ctx.namespace_for(unit.run.first("app_name"));
        let plan = ArgumentAssembler::new(&unit.run, &namespace).plan()?;
        self.transition(LaunchState::ArgumentsBuilt);

        log::info!("Launching '{}' from {}", plan.app_name, unit_path.display());
        let resolver = PathResolver::new(&namespace, &self.ctx.work_dir);
        let argv = plan.resolve(&resolver)?;
        self.transition(LaunchState::BinaryResolved);

        println!("{}", argv);
        if self.ctx.verbose {
            log::info!("Command line as a set: {:?}", argv.as_slice());
        }
        if self.ctx.norun {
            return Ok(LaunchOutcome::Printed(argv));
        }

        let command = SystemCommand::try_from(argv.as_slice())?.working_dir(&self.ctx.work_dir);

        self.transition(LaunchState::Running);
        let outcome = self.runner.run(&command).await?;
        match outcome {
            CommandOutcome::Success => log::info!("{} exited", command.program),
            CommandOutcome::Failed(Some(code)) => {
                log::warn!("{} exited with status {}", command.program, code)
            }
            CommandOutcome::Failed(None) => {
                log::warn!("{} was terminated by a signal", command.program)
            }
        }

        Ok(LaunchOutcome::Completed { argv, outcome })
    }

    fn transition(&mut self, next: LaunchState) {
        log::debug!("Launch state: {} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariableNamespace;
    use crate::runtime::command::Privilege;
    use crate::testing::{capture_logs, logged, RecordingRunner};
    use crate::Error;

    const UNIT: &str = r#"
description: Pktgen on two ports
run:
  exec: [sudo, -E]
  app_name: pktgen
  app_path: ["./build/%(app_name)s"]
  cores: "1-3"
  opts: [-P, -T]
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        ctx: LaunchContext,
    }

    fn fixture(unit: &str, with_binary: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.cfg"), unit).unwrap();
        if with_binary {
            std::fs::create_dir_all(dir.path().join("build")).unwrap();
            std::fs::write(dir.path().join("build/pktgen"), "").unwrap();
        }

        let namespace = VariableNamespace::new()
            .with_var("sdk", "/opt/dpdk")
            .with_var("target", "x86_64-native-linux-gcc");
        let mut ctx = LaunchContext::new(namespace);
        ctx.work_dir = dir.path().to_path_buf();
        ctx.privilege = Privilege::Sudo;
        Fixture { dir, ctx }
    }

    #[tokio::test]
    async fn test_norun_prints_without_executing() {
        let mut fx = fixture(UNIT, true);
        fx.ctx.norun = true;
        let runner = RecordingRunner::new();
        let mut launcher = Launcher::new(&fx.ctx, &runner);

        let outcome = launcher.run(&fx.dir.path().join("default.cfg")).await.unwrap();

        match outcome {
            LaunchOutcome::Printed(argv) => {
                assert_eq!(
                    argv.to_string(),
                    "sudo -E ./build/pktgen -l 1-3 -- -P -T"
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(runner.recorded(), vec!["stty sane"]);
        assert_eq!(launcher.state(), LaunchState::Terminated);
    }

    #[tokio::test]
    async fn test_run_executes_then_restores_terminal() {
        let fx = fixture(UNIT, true);
        let runner = RecordingRunner::new();
        let mut launcher = Launcher::new(&fx.ctx, &runner);

        let outcome = launcher.run(&fx.dir.path().join("default.cfg")).await.unwrap();

        assert!(matches!(
            outcome,
            LaunchOutcome::Completed {
                outcome: CommandOutcome::Success,
                ..
            }
        ));
        assert_eq!(
            runner.recorded(),
            vec!["sudo -E ./build/pktgen -l 1-3 -- -P -T", "stty sane"]
        );
    }

    #[tokio::test]
    async fn test_child_failure_is_not_an_error() {
        let fx = fixture(UNIT, true);
        let runner = RecordingRunner::new().failing("pktgen");
        let mut launcher = Launcher::new(&fx.ctx, &runner);

        let outcome = launcher.run(&fx.dir.path().join("default.cfg")).await.unwrap();

        assert!(matches!(
            outcome,
            LaunchOutcome::Completed {
                outcome: CommandOutcome::Failed(Some(1)),
                ..
            }
        ));
        assert_eq!(runner.recorded().last().unwrap(), "stty sane");
    }

    #[tokio::test]
    async fn test_missing_binary_still_restores_terminal() {
        let mut fx = fixture(UNIT, false);
        fx.ctx.norun = true;
        let runner = RecordingRunner::new();
        let mut launcher = Launcher::new(&fx.ctx, &runner);

        let result = launcher.run(&fx.dir.path().join("default.cfg")).await;

        assert!(matches!(result, Err(Error::Assemble(_))));
        assert_eq!(runner.recorded(), vec!["stty sane"]);
        assert_eq!(launcher.state(), LaunchState::Terminated);
    }

    #[tokio::test]
    async fn test_missing_unit() {
        let fx = fixture(UNIT, true);
        let runner = RecordingRunner::new();
        let mut launcher = Launcher::new(&fx.ctx, &runner);

        let result = launcher.run(&fx.dir.path().join("other.cfg")).await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(runner.recorded(), vec!["stty sane"]);
    }

    #[tokio::test]
    async fn test_ld_path_becomes_environment() {
        let unit = r#"
run:
  ld_path: ["/usr/local/lib"]
  app_name: pktgen
  app_path: ["./build/%(app_name)s"]
"#;
        let fx = fixture(unit, true);
        let runner = RecordingRunner::new();
        let mut launcher = Launcher::new(&fx.ctx, &runner);

        launcher.run(&fx.dir.path().join("default.cfg")).await.unwrap();

        assert_eq!(
            runner.recorded()[0],
            "LD_LIBRARY_PATH=/opt/dpdk/x86_64-native-linux-gcc/lib:/usr/local/lib ./build/pktgen --"
        );
    }

    #[tokio::test]
    async fn test_verbose_logs_command_as_a_set() {
        capture_logs();
        let unit = r#"
run:
  app_name: pktgen
  app_path: ["./build/%(app_name)s"]
  theme: themes/verbose-set.theme
"#;
        let mut fx = fixture(unit, true);
        fx.ctx.norun = true;
        fx.ctx.verbose = true;
        let runner = RecordingRunner::new();

        Launcher::new(&fx.ctx, &runner)
            .run(&fx.dir.path().join("default.cfg"))
            .await
            .unwrap();

        let lines = logged(log::Level::Info, "themes/verbose-set.theme");
        assert_eq!(
            lines,
            vec![r#"Command line as a set: ["./build/pktgen", "--", "-f", "themes/verbose-set.theme"]"#]
        );
    }

    #[tokio::test]
    async fn test_quiet_run_does_not_log_the_set() {
        capture_logs();
        let unit = r#"
run:
  app_name: pktgen
  app_path: ["./build/%(app_name)s"]
  theme: themes/quiet-set.theme
"#;
        let mut fx = fixture(unit, true);
        fx.ctx.norun = true;
        let runner = RecordingRunner::new();

        Launcher::new(&fx.ctx, &runner)
            .run(&fx.dir.path().join("default.cfg"))
            .await
            .unwrap();

        assert!(logged(log::Level::Info, "themes/quiet-set.theme").is_empty());
    }
}
