mod args;
mod intake;
mod server;

use log::{debug, info};
use snafu::{prelude::*, Snafu};

use std::sync::Arc;

use clap::Parser;

use crate::args::{Args, Command};
use crate::intake::config_reader::*;
use crate::intake::*;

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("{source}"))]
    Config { source: ConfigError },
    #[snafu(display("{source}"))]
    Intake { source: IntakeError },
    #[snafu(display("{source}"))]
    Serve { source: server::ServeError },
    #[snafu(display("Error writing the output: {source}"))]
    Output { source: serde_json::Error },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type CliResult<T> = Result<T, CliError>;

fn load_config(args: &Args) -> CliResult<ServiceConfig> {
    let file = match &args.config {
        Some(path) => Some(read_config_file(path).context(ConfigSnafu {})?),
        None => None,
    };
    ServiceConfig::resolve(file, &args.overrides()).context(ConfigSnafu {})
}

async fn run(args: Args) -> CliResult<()> {
    let config = Arc::new(load_config(&args)?);
    let service = IntakeService::from_config(config);
    debug!("run: command {:?}", args.command);

    match args.command {
        Command::Serve => server::serve(service).await.context(ServeSnafu {})?,
        Command::Check => {
            let gateway = service.gateway();
            let handle = gateway.open_or_create_table().context(IntakeSnafu {})?;
            let count = gateway.data_row_count(&handle).context(IntakeSnafu {})?;
            println!(
                "Table {} in {}: {} responses",
                handle.table(),
                gateway.reference(),
                count
            );
        }
        Command::Selftest => {
            let body = serde_json::to_vec(&sample_submission()).context(OutputSnafu {})?;
            let resp = service.submit_and_notify(&body).await;
            let pretty = serde_json::to_string_pretty(&resp).context(OutputSnafu {})?;
            println!("{}", pretty);
            if resp.status != ResponseStatus::Success {
                whatever!("Self test failed: {}", resp.message);
            }
        }
        Command::Export => {
            let gateway = service.gateway();
            let handle = gateway.open_or_create_table().context(IntakeSnafu {})?;
            let rows = gateway.read_all_rows(&handle).context(IntakeSnafu {})?;
            let pretty = serde_json::to_string_pretty(&rows).context(OutputSnafu {})?;
            println!("{}", pretty);
        }
        Command::Clear { yes } => {
            if !yes {
                whatever!("Refusing to delete the responses without --yes");
            }
            let gateway = service.gateway();
            let handle = gateway.open_or_create_table().context(IntakeSnafu {})?;
            let removed = gateway.delete_data_rows(&handle).context(IntakeSnafu {})?;
            println!("Deleted {} responses", removed);
        }
        Command::Header => {
            for label in evaluation_sheet::build_header() {
                println!("{}", label);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.verbose {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
    info!("xrayintake {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        eprintln!("An error occurred: {}", e);
        std::process::exit(1);
    }
}
