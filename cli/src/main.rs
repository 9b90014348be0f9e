use clap::{Parser, Subcommand};
use steward_core::coach::ProviderChoice;

mod commands;
mod util;

#[derive(Parser)]
#[command(name = "steward", version, about = "Steward CLI: ask the budget coach from your terminal")]
struct Cli {
    /// API base URL
    #[arg(long, env = "STEWARD_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health and which providers are configured
    Health,
    /// Ask the budget coach a question
    Coach {
        /// The question to ask
        message: String,
        /// Budget snapshot as a JSON object, forwarded to the coach
        #[arg(long)]
        context: Option<String>,
        /// Frame advice around biblical stewardship
        #[arg(long)]
        biblical: bool,
        /// Provider to use: auto, openai or perplexity
        #[arg(long, default_value = "auto")]
        provider: ProviderChoice,
        /// Print the reply as it is generated
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Coach {
            message,
            context,
            biblical,
            provider,
            stream,
        } => {
            commands::coach::run(
                &cli.api_url,
                commands::coach::CoachArgs {
                    message,
                    context,
                    biblical,
                    provider,
                    stream,
                },
            )
            .await
        }
    };

    std::process::exit(code);
}
