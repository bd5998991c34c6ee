//! Tally server entry point.

use tally_lib::cli::{self, Cli};
use tally_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
