//! Reset command handler

use crate::commands::ResetArgs;
use crate::discovery::absolute;
use crate::error::CliResult;
use probecov::HitsReader;

/// Execute the reset command, deleting every hits file
///
/// Returns the number of files removed. A missing directory is not an error.
pub fn execute_reset(args: &ResetArgs) -> CliResult<usize> {
    let workdir = absolute(&std::env::current_dir()?, &args.workdir);
    let directory = absolute(&workdir, &args.hits_directory);
    let files = HitsReader::list(&directory)?;
    for file in &files {
        std::fs::remove_file(file)?;
        tracing::debug!(file = %file.display(), "removed");
    }
    tracing::info!("Removed {} hits files from {}", files.len(), directory.display());
    Ok(files.len())
}
