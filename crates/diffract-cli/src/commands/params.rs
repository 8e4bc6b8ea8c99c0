//! Params command - print or write the default parameter file.

use std::path::PathBuf;

use colored::Colorize;
use diffract::ReductionConfig;

pub fn run(output: Option<PathBuf>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = ReductionConfig::default();

    match output {
        Some(path) => {
            config.dump(&path)?;
            println!(
                "{} {}",
                "Wrote parameters to".green().bold(),
                path.display().to_string().white()
            );
            if verbose {
                println!("  {} parameters", config.parameters().len());
            }
        }
        None => print!("{}", config.to_file_string()),
    }

    Ok(())
}
