#[path = "mod.rs"]
mod internal;

use clap::Parser;
use internal::{handlers, shell};
use sectionleader::{
    cli::{SectionleaderArgs, SectionleaderSubcommand},
    LeaderResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> LeaderResult<()> {
    // `.env` has to be loaded before clap reads env-backed flags.
    dotenvy::dotenv().ok();

    let args = SectionleaderArgs::parse();
    let _log_guard = sectionleader::init_logging(args.verbose, args.log_file.as_deref())?;

    let config = handlers::load_config(&args).await?;
    let manager = handlers::build_manager(config)?;

    match args.subcommand {
        SectionleaderSubcommand::Serve { addr } => {
            handlers::serve_subcommand(manager, addr).await?;
        }
        SectionleaderSubcommand::Shell => {
            shell::shell_subcommand(manager).await?;
        }
    }

    Ok(())
}
