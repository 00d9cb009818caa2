use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the debug proxy admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8889")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status and live connections
    Status,
    /// List rewrite rules in evaluation order
    Rules,
    /// Add a rewrite rule
    AddRule {
        /// Status to match: a code like 404 or a class like 5xx
        original: String,
        /// Status to substitute
        new: String,
        /// URL substring the rule is limited to
        #[arg(short, long, default_value = "")]
        endpoint: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Remove the rule at an index
    RemoveRule { index: usize },
    /// Enable every rule
    EnableAll,
    /// Disable every rule
    DisableAll,
    /// List captured transactions
    Transactions {
        #[arg(short, long, default_value = "")]
        filter: String,
    },
    /// Clear captured transactions
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Rules => (Method::GET, "/admin/rules".to_string(), None),
        Commands::AddRule {
            original,
            new,
            endpoint,
            description,
        } => (
            Method::POST,
            "/admin/rules".to_string(),
            Some(json!({
                "original_status_code": original,
                "new_status_code": new,
                "endpoint_pattern": endpoint,
                "description": description,
            })),
        ),
        Commands::RemoveRule { index } => (Method::DELETE, format!("/admin/rules/{index}"), None),
        Commands::EnableAll => (Method::POST, "/admin/rules/enable-all".to_string(), None),
        Commands::DisableAll => (Method::POST, "/admin/rules/disable-all".to_string(), None),
        Commands::Transactions { filter } => (
            Method::GET,
            format!("/admin/transactions?filter={}", encode(&filter)),
            None,
        ),
        Commands::Clear => (Method::DELETE, "/admin/transactions".to_string(), None),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url, path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

fn encode(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("OK ({})", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
