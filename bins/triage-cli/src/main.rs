mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "triage-cli")]
#[command(about = "Triage CLI - Set up projects and inspect stored test runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config/triage.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Render the grouped report of a stored run
    Show {
        /// Results file written by `triage-runner --results`
        results: String,

        /// Print the captured output of one test instead
        #[arg(short, long)]
        test: Option<String>,
    },

    /// List tests whose category changed between two stored runs
    Compare {
        /// Earlier results file
        old: String,

        /// Later results file
        new: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
        Commands::Show { results, test } => {
            commands::show_results(&results, test.as_deref()).await?;
        }
        Commands::Compare { old, new } => {
            commands::compare_results(&old, &new).await?;
        }
    }

    Ok(())
}
