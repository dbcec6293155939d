//! procsim CLI
//!
//! Interactive console for the scheduler simulator.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session with config.txt in the working directory
//! procsim
//!
//! # Another config file, more logging
//! procsim --config sim.json -vv
//!
//! # Replay commands from a file
//! procsim --script commands.txt
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use procsim::{Command, Console, SimError, DEFAULT_CONFIG_FILE, DEFAULT_REPORT_FILE, PROMPT};

/// procsim - CPU scheduler and memory manager simulator
#[derive(Parser)]
#[command(name = "procsim")]
#[command(version)]
#[command(about = "CPU scheduler and paged memory manager simulator", long_about = None)]
struct Cli {
    /// Configuration file read by `initialize`
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Default output file for `report-util`
    #[arg(short, long, default_value = DEFAULT_REPORT_FILE)]
    report: PathBuf,

    /// Read commands from a file instead of stdin
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Verbosity (-v, -vv, -vvv), overrides --log-level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let interactive = cli.script.is_none();
    let input: Box<dyn BufRead> = match &cli.script {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut console = Console::new(cli.config, cli.report);
    if interactive {
        println!("procsim {}", env!("CARGO_PKG_VERSION"));
        println!("Type 'initialize' to begin, 'help' for commands.");
    }

    let mut stdout = io::stdout();
    let mut lines = input.lines();
    loop {
        if interactive {
            print!("{}", PROMPT);
            stdout.flush()?;
        }

        let Some(line) = lines.next() else {
            // end of input behaves like `exit`
            console.execute(Command::Exit)?;
            break;
        };
        let line = line?;
        if !interactive && !line.trim().is_empty() {
            println!("{}{}", PROMPT, line.trim());
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        debug!("command: {:?}", command);

        if command == Command::Clear {
            print!("\x1B[2J\x1B[1;1H");
        }

        match console.execute(command) {
            Ok(outcome) => {
                if !outcome.output.is_empty() {
                    println!("{}", outcome.output);
                }
                if outcome.exit {
                    break;
                }
            }
            Err(e) if e.is_user_error() || e.is_fatal_config() => println!("{}", e),
            Err(e @ SimError::InvalidConfiguration(_)) => println!("{}", e),
            Err(e) => {
                error!("{}", e);
                println!("Error: {}", e);
            }
        }
    }

    Ok(())
}
