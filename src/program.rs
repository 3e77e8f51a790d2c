use std::env::current_dir;
use std::sync::Arc;

use anyhow::{Context, Error};
use console::Term;
use dialoguer::{Confirm, Select};

use crate::fetcher::io::Config;
use crate::fetcher::progress::ProgressTracker;
use crate::fetcher::sender::RequestSender;
use crate::fetcher::{ConnectorOptions, SequenceConnector};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Menu entries, in display order.
const MENU_ITEMS: [&str; 4] = [
    "Download image batch",
    "Retry failed downloads",
    "Clear progress record",
    "Exit",
];

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program;

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new() -> Self {
        Self
    }

    /// Runs the interactive downloader loop until the user exits.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("sequence downloader");
        trace!("Starting {NAME} {VERSION}...");
        if let Ok(dir) = current_dir() {
            trace!("Program Working Directory: {}", dir.display());
        }

        trace!("Checking if config file exists...");
        if !Config::config_exists() {
            info!("Creating config file...");
            Config::create_config()?;

            let edit_first = Confirm::new()
                .with_prompt("A default config.json has been created. Exit now to review it before downloading?")
                .default(true)
                .interact()
                .unwrap_or(true);
            if edit_first {
                info!("Adjust config.json (base URL, date, category) and start the program again.");
                return Ok(());
            }
        }

        let config = Config::get();
        let sender = RequestSender::new(
            config.base_url(),
            config.user_agent(),
            config.request_timeout(),
            config.proxy(),
        )?;
        let tracker = Arc::new(ProgressTracker::new(config.progress_path()));
        let connector =
            SequenceConnector::new(sender, Arc::clone(&tracker), ConnectorOptions::from_config(config));

        loop {
            let choice = Select::new()
                .with_prompt("Select an operation")
                .items(&MENU_ITEMS)
                .default(0)
                .interact()
                .context("terminal unable to set up the selection prompt")?;

            match choice {
                0 => {
                    if let Err(err) = connector.run_batch() {
                        error!("Batch download failed: {err:#}");
                    }
                }
                1 => {
                    if let Err(err) = connector.retry_failed() {
                        error!("Retry run failed: {err:#}");
                    }
                }
                2 => match tracker.clear() {
                    Ok(true) => info!("Progress record cleared."),
                    Ok(false) => warn!("There is no progress record to clear."),
                    Err(err) => error!("Could not clear the progress record: {err}"),
                },
                _ => {
                    info!("Exiting. Goodbye!");
                    break;
                }
            }
        }

        Ok(())
    }
}
