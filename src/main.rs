#[macro_use]
extern crate log;

use std::env::consts::{ARCH, OS};
use std::fs::OpenOptions;
use std::process::exit;

use anyhow::Error;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger};

use crate::program::Program;

mod fetcher;
mod program;

/// Name of the log file written next to the binary.
const LOG_NAME: &str = "sequence_downloader.log";

fn main() -> Result<(), Error> {
    initialize_logger();
    log_system_information();
    install_interrupt_handler();

    let program = Program::new();
    program.run()
}

/// Initializes the logger with preset filtering.
///
/// The terminal gets `Info` and up; the log file gets everything emitted
/// by this crate. If the log file cannot be opened, terminal logging
/// still comes up on its own.
fn initialize_logger() {
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("sequence_downloader");

    match OpenOptions::new().create(true).append(true).open(LOG_NAME) {
        Ok(file) => {
            let result = CombinedLogger::init(vec![
                TermLogger::new(
                    LevelFilter::Info,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(LevelFilter::max(), config.build(), file),
            ]);
            if result.is_err() {
                let _ = TermLogger::init(
                    LevelFilter::Info,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                );
            }
        }
        Err(err) => {
            eprintln!("Failed to open {LOG_NAME}: {err}. Logging will only output to terminal.");
            let _ = TermLogger::init(
                LevelFilter::Info,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
        }
    }
}

/// Installs the Ctrl-C handler.
///
/// Progress is flushed after every fetch attempt, so an interrupt only
/// abandons requests that were still in flight.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        println!("\nInterrupted. Progress has been saved; run again to resume.");
        exit(0);
    });
    if let Err(err) = result {
        warn!("Could not install the Ctrl-C handler: {err}");
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("ARCH: \"{}\"", ARCH);
    trace!("OS:   \"{}\"", OS);
}
