use clap::{Parser, Subcommand, ValueEnum};
use docstore_rank::commands::{
    add_document, classify_query, delete_document, list_documents, promote_document,
    relate_documents, search_documents, show_config, show_related, show_status,
};
use docstore_rank::config::Config;
use docstore_rank::model::ScopeLevel;

#[derive(Parser)]
#[command(name = "docstore")]
#[command(about = "A scoped document store with composite ranking and relationship graphs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    Project,
    Workspace,
    Global,
}

impl From<LevelArg> for ScopeLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Project => ScopeLevel::Project,
            LevelArg::Workspace => ScopeLevel::Workspace,
            LevelArg::Global => ScopeLevel::Global,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a document from a local file
    Add {
        /// Project the document belongs to
        project: String,
        /// Path of the file to index
        path: String,
        /// Scope level to store the document at
        #[arg(long, value_enum, default_value_t = LevelArg::Project)]
        level: LevelArg,
        /// Explicit document id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,
        /// Tags to attach, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List documents visible from a project's scope chain
    List {
        /// Project to list documents for
        project: String,
    },
    /// Delete a document from every scope
    Delete {
        /// Project the document belongs to
        project: String,
        /// Document id to delete
        id: String,
    },
    /// Search and rank documents
    Search {
        /// Project to search within
        project: String,
        /// Query string
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Classify a query without running it
    Classify {
        /// Query string to classify
        query: String,
    },
    /// Promote a document from Project scope to its parent scope
    Promote {
        /// Project the document belongs to
        project: String,
        /// Document id to promote
        id: String,
    },
    /// Record a relationship between two documents
    Relate {
        /// Project the documents belong to
        project: String,
        /// Source document id
        source: String,
        /// Target document id
        target: String,
        /// Relationship type, e.g. supports, contradicts, cites
        #[arg(long = "type", default_value = "related")]
        relationship: String,
        /// Confidence in [0, 1]
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
    },
    /// Show documents related via the relationship graph
    Related {
        /// Project the document belongs to
        project: String,
        /// Document id to start from
        id: String,
        /// Maximum traversal depth
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },
    /// Show store statistics for a project
    Status {
        /// Project to report on
        project: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                let config = Config::load()?;
                config.save()?;
                match Config::config_file_path() {
                    Ok(path) => println!("Wrote configuration to {}", path.display()),
                    Err(_) => println!("Wrote configuration"),
                }
            }
        }
        Commands::Add {
            project,
            path,
            level,
            id,
            tags,
        } => {
            add_document(&project, &path, level.into(), id, tags).await?;
        }
        Commands::List { project } => {
            list_documents(&project).await?;
        }
        Commands::Delete { project, id } => {
            delete_document(&project, &id).await?;
        }
        Commands::Search {
            project,
            query,
            limit,
        } => {
            search_documents(&project, &query, limit).await?;
        }
        Commands::Classify { query } => {
            classify_query(&query).await?;
        }
        Commands::Promote { project, id } => {
            promote_document(&project, &id).await?;
        }
        Commands::Relate {
            project,
            source,
            target,
            relationship,
            confidence,
        } => {
            relate_documents(&project, &source, &target, &relationship, confidence).await?;
        }
        Commands::Related { project, id, depth } => {
            show_related(&project, &id, depth).await?;
        }
        Commands::Status { project } => {
            show_status(&project).await?;
        }
    }

    Ok(())
}
