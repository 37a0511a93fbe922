use clap::{Parser, Subcommand};
use coach_retrieval::Result;
use coach_retrieval::commands::{
    AddLessonArgs, add_lesson, delete_lesson, list_lessons, publish_lesson, reindex, search,
    show_status, update_lesson,
};
use coach_retrieval::config::{get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coach-retrieval")]
#[command(about = "Lesson ingestion and knowledge retrieval for a learning coach")]
#[command(version)]
struct Cli {
    /// Configuration and data directory (defaults to ~/.coach-retrieval)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure embedding backends, the vector index and retrieval limits
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a markdown lesson
    Add {
        /// Path to the lesson markdown file
        file: PathBuf,
        /// Lesson title, defaults to the file name
        #[arg(long)]
        title: Option<String>,
        /// Owner of the lesson
        #[arg(long)]
        owner: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        level: Option<String>,
        /// Make the lesson visible to everyone
        #[arg(long)]
        public: bool,
    },
    /// Replace a lesson's content and re-embed it
    Update {
        /// Lesson ID
        lesson: String,
        /// Path to the new markdown content
        file: PathBuf,
    },
    /// Make a lesson public
    Publish {
        /// Lesson ID
        lesson: String,
        /// Make the lesson private instead
        #[arg(long)]
        private: bool,
    },
    /// Delete a lesson and its vectors
    Delete {
        /// Lesson ID
        lesson: String,
    },
    /// List lessons
    List {
        /// Only show lessons of this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Search lesson content
    Search {
        query: String,
        /// Requesting user; anonymous requests only see public lessons
        #[arg(long)]
        requester: Option<String>,
        /// Number of results, defaults to the configured value
        #[arg(long, allow_negative_numbers = true)]
        top_k: Option<i64>,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the status of the lesson store, embedding backends and vector index
    Status,
    /// Rebuild the vector index from the lesson store
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Add {
            file,
            title,
            owner,
            subject,
            level,
            public,
        } => {
            let args = AddLessonArgs {
                title,
                owner,
                subject,
                level,
                public,
            };
            add_lesson(&config_dir, &file, args).await?;
        }
        Commands::Update { lesson, file } => {
            update_lesson(&config_dir, &lesson, &file).await?;
        }
        Commands::Publish { lesson, private } => {
            publish_lesson(&config_dir, &lesson, private).await?;
        }
        Commands::Delete { lesson } => {
            delete_lesson(&config_dir, &lesson).await?;
        }
        Commands::List { owner } => {
            list_lessons(&config_dir, owner.as_deref()).await?;
        }
        Commands::Search {
            query,
            requester,
            top_k,
            json,
        } => {
            search(&config_dir, &query, requester.as_deref(), top_k, json).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
        Commands::Reindex => {
            reindex(&config_dir).await?;
        }
    }

    Ok(())
}
