mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codepad_common::types::Language;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codepad-cli")]
#[command(about = "Codepad CLI - Run and judge solutions, manage the problem catalog", long_about = None)]
struct Cli {
    /// Harness configuration file (defaults to CODEPAD_CONFIG or config/harness.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Problem catalog file
    #[arg(long, global = true, default_value = "data/problems.json")]
    problems: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file once and print its output
    Run {
        /// Language (python, javascript, typescript)
        #[arg(short, long)]
        language: Language,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Argument literals passed to the function, one per line
        #[arg(short, long)]
        input: Option<String>,

        /// Function called with the input
        #[arg(long)]
        function: Option<String>,
    },

    /// Judge a source file against a problem's test cases or a fixtures file
    Judge {
        #[arg(short, long)]
        language: Language,

        #[arg(short, long)]
        file: PathBuf,

        /// Problem id from the catalog
        #[arg(short, long, conflicts_with = "fixtures", required_unless_present = "fixtures")]
        problem: Option<u32>,

        /// JSON file with test cases
        #[arg(long)]
        fixtures: Option<PathBuf>,

        /// Function under test (defaults to the problem's, then `solution`)
        #[arg(long)]
        function: Option<String>,
    },

    /// List problems in the catalog
    Problems {
        #[arg(short, long)]
        difficulty: Option<String>,

        #[arg(short, long)]
        category: Option<String>,
    },

    /// Copy the problem catalog into Redis
    Seed {
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            file,
            input,
            function,
        } => {
            let ok = commands::run_file(cli.config.as_deref(), language, &file, input, function).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Judge {
            language,
            file,
            problem,
            fixtures,
            function,
        } => {
            let source = match (problem, fixtures) {
                (Some(id), _) => commands::FixtureSource::Problem(id),
                (None, Some(path)) => commands::FixtureSource::File(path),
                (None, None) => anyhow::bail!("Either --problem or --fixtures is required"),
            };
            let all_passed = commands::judge_file(
                cli.config.as_deref(),
                &cli.problems,
                language,
                &file,
                source,
                function,
            )
            .await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Problems {
            difficulty,
            category,
        } => {
            commands::list_problems(&cli.problems, difficulty, category).await?;
        }
        Commands::Seed { redis_url } => {
            commands::seed_redis(&cli.problems, &redis_url).await?;
        }
    }

    Ok(())
}
