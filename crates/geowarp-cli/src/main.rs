mod cli;
mod layers;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Render(args) => run::run_render(args),
        Command::Extents(args) => run::run_extents(args),
    }
}
