//! picsearch CLI - reverse image search from the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use picsearch::{engines, ClientConfig, FileSource, HttpClient, ImageSource, MultiSearch, ProxyConfig, ReqwestClient};

/// picsearch - reverse image search over many engines
#[derive(Parser)]
#[command(name = "picsearch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for an image
    Search(SearchArgs),

    /// List available engines
    Engines,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Input {
    /// Image URL
    #[arg(short, long)]
    url: Option<String>,

    /// Local image file
    #[arg(short = 'F', long)]
    file: Option<PathBuf>,
}

#[derive(Parser)]
struct SearchArgs {
    /// Engines to use (comma-separated shortcuts or names)
    #[arg(value_delimiter = ',')]
    engines: Vec<String>,

    #[command(flatten)]
    input: Input,

    /// Maximum number of results to display
    #[arg(short, long, default_value = "10")]
    limit: usize,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Proxy URL (e.g., http://127.0.0.1:8080 or socks5://127.0.0.1:1080)
    #[arg(short, long)]
    proxy: Option<String>,

    /// Cookie string sent with every request ("a=b; c=d")
    #[arg(long)]
    cookies: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match cli.command {
        Commands::Search(args) => run_search(args).await,
        Commands::Engines => list_engines(),
    }
}

fn list_engines() -> Result<()> {
    println!("Available engines:\n");
    for (shortcut, description) in engines::AVAILABLE {
        println!("  {shortcut:<5} - {description}");
    }
    println!();
    println!("Usage: picsearch search sn,iq --url https://example.com/image.jpg");
    Ok(())
}

async fn run_search(args: SearchArgs) -> Result<()> {
    if args.engines.is_empty() {
        anyhow::bail!("No engines specified");
    }

    let mut config = ClientConfig::new().with_timeout(Duration::from_secs(args.timeout));
    if let Some(proxy) = &args.proxy {
        config = config.with_proxy(ProxyConfig::parse(proxy)?);
        if matches!(args.format, OutputFormat::Text) {
            eprintln!("Using proxy: {proxy}");
        }
    }
    if let Some(cookies) = &args.cookies {
        config = config.with_cookies(cookies)?;
    }
    let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::from_config(&config)?);

    let mut search = MultiSearch::new();
    search.set_timeout(Duration::from_secs(args.timeout));
    for name in &args.engines {
        search.add_dyn_engine(engines::build(name, client.clone())?);
    }

    let source = ImageSource::from_parts(args.input.url.as_deref(), args.input.file.map(FileSource::Path))?;
    let hits = search.search(&source).await?;

    match args.format {
        OutputFormat::Text => {
            println!("\n{} results in {}ms:\n", hits.count, hits.duration_ms);
            for (i, hit) in hits.items().iter().take(args.limit).enumerate() {
                println!("{}. {}", i + 1, if hit.title.is_empty() { "(untitled)" } else { hit.title.as_str() });
                println!("   URL: {}", hit.url);
                if hit.similarity > 0.0 {
                    println!("   Similarity: {:.1}%", hit.similarity);
                }
                println!("   Engines: {:?} | Score: {:.2}", hit.engines, hit.score);
                println!();
            }
            for (engine, message) in hits.errors() {
                eprintln!("Warning: {engine} failed: {message}");
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = hits.items().iter().take(args.limit).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
