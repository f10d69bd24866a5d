use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use url::Url;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for campus-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "CAMPUS_GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// Show limiter statistics, presets and active blocks
    Limiter,
    /// Lift the block on a rate limit key (e.g. "admin:203.0.113.7")
    Unblock { key: String },
    /// Evict expired buckets and blocks now
    Sweep,
    /// List Auth users
    Users {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 100)]
        per_page: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", cli.key))?);

    let base = Url::parse(&cli.url)?;
    let (method, url) = match cli.command {
        Commands::Status => (Method::GET, endpoint(&base, &["admin", "status"])?),
        Commands::Limiter => (Method::GET, endpoint(&base, &["admin", "limiter"])?),
        Commands::Unblock { key } => (Method::DELETE, endpoint(&base, &["admin", "blocks", &key])?),
        Commands::Sweep => (Method::POST, endpoint(&base, &["admin", "sweep"])?),
        Commands::Users { page, per_page } => {
            let mut url = endpoint(&base, &["admin", "users"])?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &per_page.to_string());
            (Method::GET, url)
        }
    };

    let res = client.request(method, url).headers(headers).send().await?;
    print_response(res).await
}

/// Append path segments to `base`, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| "base URL cannot have a path")?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
