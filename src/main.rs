//! Command-line entry point.
//!
//! ```bash
//! datamule run trips.csv --table trips --index tpep_pickup_datetime
//! datamule run trips.csv --plan steps.json --mode append
//! datamule query "SELECT COUNT(*) AS n FROM trips"
//! datamule profile trips.csv
//! ```

#![warn(clippy::all, rust_2018_idioms)]

mod cli;

use anyhow::Result;
use clap::Parser as _;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    datamule::logging::init(cli.verbose)?;

    tokio::runtime::Runtime::new()?.block_on(cli::run_command(cli))
}
