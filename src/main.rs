use anyhow::Context;
use clap::Parser;
use drip::cli::{DripCli, run_cli};
use drip::registry::Registry;

fn main() -> anyhow::Result<()> {
    let cli = DripCli::parse();
    run_cli(cli, Registry::builtin()).context("engine error")?;
    Ok(())
}
