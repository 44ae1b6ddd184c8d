//! Command-line interface for pktgen_launch

use argh::{EarlyExit, FromArgs};

/// Set up the host for DPDK and launch applications described by .cfg units
#[derive(FromArgs, Debug, Default, PartialEq)]
pub struct LaunchArgs {
    /// display usage information and quit
    #[argh(switch, short = 'u')]
    pub usage: bool,

    /// print a list of known configuration units
    #[argh(switch, short = 'l')]
    pub list: bool,

    /// set up huge pages, driver modules and devices instead of launching
    #[argh(switch, short = 's')]
    pub setup: bool,

    /// print out more information
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// build and print the command line without running it
    #[argh(switch, short = 'n')]
    pub norun: bool,

    /// directory searched for configuration units (default: .)
    #[argh(option, default = "String::from(\".\")")]
    pub cfg_dir: String,

    /// configuration unit name, with or without the .cfg extension
    #[argh(positional)]
    pub units: Vec<String>,
}

/// What the binary should do after parsing
#[derive(Debug, PartialEq)]
pub enum Invocation {
    /// Print text and exit with the given code
    Exit { output: String, code: i32 },
    /// Proceed with the parsed arguments
    Run(LaunchArgs),
}

impl LaunchArgs {
    /// Parse the process arguments
    pub fn from_env() -> Invocation {
        let strings: Vec<String> = std::env::args().collect();
        let command = strings
            .first()
            .map(|s| s.rsplit('/').next().unwrap_or(s.as_str()).to_string())
            .unwrap_or_else(|| "pktgen_launch".to_string());
        let args: Vec<&str> = strings.iter().skip(1).map(String::as_str).collect();
        Self::parse(&command, &args)
    }

    /// Parse `args` as given after the program name
    pub fn parse(command: &str, args: &[&str]) -> Invocation {
        let args: Vec<&str> = args
            .iter()
            .map(|arg| if *arg == "-h" { "--help" } else { *arg })
            .collect();

        let parsed = match LaunchArgs::from_args(&[command], &args) {
            Ok(parsed) => parsed,
            Err(EarlyExit { output, status }) => {
                let code = if status.is_ok() { 0 } else { 1 };
                return Invocation::Exit { output, code };
            }
        };

        if parsed.usage {
            return Invocation::Exit {
                output: Self::usage(command),
                code: 0,
            };
        }
        if parsed.list {
            return Invocation::Run(parsed);
        }
        if parsed.units.len() != 1 {
            return Invocation::Exit {
                output: Self::usage(command),
                code: 1,
            };
        }
        Invocation::Run(parsed)
    }

    /// Usage text for `command`
    pub fn usage(command: &str) -> String {
        match LaunchArgs::from_args(&[command], &["--help"]) {
            Err(EarlyExit { output, .. }) => output,
            Ok(_) => String::new(),
        }
    }

    /// The single unit name; only valid after `parse` returned `Run`
    pub fn unit(&self) -> Option<&str> {
        self.units.first().map(String::as_str)
    }
}
