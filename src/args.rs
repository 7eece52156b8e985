use clap::{Parser, Subcommand};

use crate::intake::config_reader::ConfigOverrides;

/// Collects the submissions of the X-ray machine evaluation form into a response sheet.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON configuration file. The options below take precedence
    /// over its content.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (directory or 'memory', default ./responses) Where the response sheet is kept.
    /// 'memory' keeps it in memory for the lifetime of the process.
    #[clap(short, long, value_parser)]
    pub store: Option<String>,

    /// (default Responses) The name of the response table.
    #[clap(short, long, value_parser)]
    pub table: Option<String>,

    /// (default 127.0.0.1:8080) The address the server listens on.
    #[clap(short, long, value_parser)]
    pub listen: Option<String>,

    /// Turns on the notification sent after each saved submission.
    #[clap(long, takes_value = false, conflicts_with = "no-notify")]
    pub notify: bool,

    /// Turns off the notifications, even if the configuration file enables them.
    #[clap(long, takes_value = false)]
    pub no_notify: bool,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Runs the HTTP server: GET / shows the status page, POST / accepts a submission.
    Serve,
    /// Creates the response table if needed and reports how many responses it holds.
    Check,
    /// Submits a sample evaluation with every rating set to 3, then waits for its
    /// notification when notifications are on.
    Selftest,
    /// Prints every response as JSON, keyed by column label.
    Export,
    /// Deletes every response. The header row is kept.
    Clear {
        /// Confirms the deletion.
        #[clap(long, takes_value = false)]
        yes: bool,
    },
    /// Prints the column labels of the response sheet, one per line.
    Header,
}

impl Args {
    pub fn overrides(&self) -> ConfigOverrides {
        let notify = match (self.notify, self.no_notify) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        ConfigOverrides {
            store: self.store.clone(),
            table: self.table.clone(),
            listen: self.listen.clone(),
            notify,
        }
    }
}
