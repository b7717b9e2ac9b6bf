use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata archive tooling: name hashes, headers and record listings",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the name hash of each name
    Hash(HashArgs),
    /// Validate and print a binary archive header
    Header(HeaderArgs),
    /// List the records of a structured archive
    List(ListArgs),
    /// Rewrite an archive of built-in types in the other format
    Convert(ConvertArgs),
}

#[derive(Args)]
pub struct HashArgs {
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Args)]
pub struct HeaderArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ListArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ConvertArgs {
    pub input: PathBuf,
    /// Output path; a `.json` extension selects the structured format
    pub output: PathBuf,
    /// Skip the trailing name table
    #[arg(long)]
    pub no_names: bool,
}
