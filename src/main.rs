use clap::{Parser, Subcommand, ValueEnum};
use exn::ResultExt;
use lectern::error::{ErrorKind, Result};
use lectern::{DocumentFormat, Engine, ExportFormat, ItemFilter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lectern", version, about = "Catalog, read and search a local document library")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan directories and bring the catalog up to date
    Scan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List catalogued documents
    Query {
        /// Case-insensitive text to look for in titles, authors and tags
        text: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        tag: Option<String>,
        /// Only documents of this type (pdf, epub, txt, ...)
        #[arg(long = "type", value_parser = parse_format)]
        file_type: Option<DocumentFormat>,
    },
    /// Search inside one document
    Search { id: String, query: String },
    /// Render a page and report its size
    Render {
        id: String,
        page: usize,
        #[arg(long)]
        scale: Option<f32>,
    },
    /// Work with annotations
    Annotations {
        #[command(subcommand)]
        command: AnnotationCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AnnotationCommand {
    /// List an item's annotations as JSON
    List { item_id: String },
    /// Export an item's annotations
    Export {
        item_id: String,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Markdown,
}

impl From<Format> for ExportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => ExportFormat::Json,
            Format::Markdown => ExportFormat::Markdown,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = lectern::load_config(cli.config.as_deref())?;
    let engine = Engine::start(config).await?;
    let result = execute(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

async fn execute(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Scan { paths } => print_json(&engine.scan_library(&paths).await),
        Command::Query { text, limit, tag, file_type } => {
            let filter = ItemFilter { text, file_type, tag, limit };
            print_json(&engine.query_library(&filter).await?)
        },
        Command::Search { id, query } => {
            let session = engine.open_document(&id).await?;
            let matches = engine.search_document(&session.session_id, &query).await;
            engine.close_document(&session.session_id);
            print_json(&matches?)
        },
        Command::Render { id, page, scale } => {
            let session = engine.open_document(&id).await?;
            let rendered = match scale {
                Some(scale) => engine.render_page_at(&session.session_id, page, scale).await,
                None => engine.render_page(&session.session_id, page).await,
            };
            engine.close_document(&session.session_id);
            let rendered = rendered?;
            print_json(&serde_json::json!({
                "page": rendered.page,
                "scale": rendered.scale(),
                "width": rendered.width,
                "height": rendered.height,
                "bytes": rendered.pixels.len(),
            }))
        },
        Command::Annotations { command: AnnotationCommand::List { item_id } } => {
            print_json(&engine.list_annotations(&item_id).await?)
        },
        Command::Annotations { command: AnnotationCommand::Export { item_id, format } } => {
            print!("{}", engine.export_annotations(&item_id, format.into()).await?);
            Ok(())
        },
    }
}

fn parse_format(name: &str) -> std::result::Result<DocumentFormat, String> {
    name.parse().map_err(|_| format!("unknown document type `{name}`"))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::IoFailure("cannot encode output".to_string()))?;
    println!("{json}");
    Ok(())
}
