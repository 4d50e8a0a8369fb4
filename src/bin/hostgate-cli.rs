use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "hostgate-cli")]
#[command(about = "Management CLI for the hostgate admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:9091", env = "HOSTGATE_ADMIN_URL")]
    url: String,

    #[arg(short, long, env = "HOSTGATE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status
    Status,
    /// List routes
    Routes,
    /// Show one route by ID
    Get { id: String },
    /// Add a route
    Add {
        domain: String,
        service: String,
        #[arg(long)]
        sticky: bool,
        /// PEM certificate file for the domain
        #[arg(long, requires = "tls_key")]
        tls_cert: Option<std::path::PathBuf>,
        /// PEM private key file for the domain
        #[arg(long, requires = "tls_cert")]
        tls_key: Option<std::path::PathBuf>,
        /// Replace an existing route for the domain instead of failing
        #[arg(long)]
        replace: bool,
    },
    /// Remove a route by ID
    Remove { id: String },
    /// Follow route change events
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/admin/status", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Routes => {
            let res = client.get(format!("{}/admin/routes", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Get { id } => {
            let res = client.get(format!("{}/admin/routes/{}", base, id)).send().await?;
            print_response(res).await?;
        }
        Commands::Add {
            domain,
            service,
            sticky,
            tls_cert,
            tls_key,
            replace,
        } => {
            let mut body = json!({ "domain": domain, "service": service, "sticky": sticky });
            if let (Some(cert), Some(key)) = (tls_cert, tls_key) {
                body["tls_cert"] = Value::String(std::fs::read_to_string(cert)?);
                body["tls_key"] = Value::String(std::fs::read_to_string(key)?);
            }
            let url = format!("{}/admin/routes", base);
            let req = if replace { client.put(url) } else { client.post(url) };
            let res = req.json(&body).send().await?;
            print_response(res).await?;
        }
        Commands::Remove { id } => {
            let res = client.delete(format!("{}/admin/routes/{}", base, id)).send().await?;
            print_response(res).await?;
        }
        Commands::Watch => {
            let mut res = client.get(format!("{}/admin/events", base)).send().await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            while let Some(chunk) = res.chunk().await? {
                for line in String::from_utf8_lossy(&chunk).lines() {
                    if let Some(data) = line.strip_prefix("data:") {
                        println!("{}", data.trim());
                    }
                }
            }
        }
    }

    Ok(())
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
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
