use clap::Parser;
use rtoscope_cli::{run, Cli};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    run(Cli::parse())
}
