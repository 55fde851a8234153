use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "plaint", about = "Plaint: complaint tracking service", version)]
struct Cli {
    /// Plaint server URL (default: http://localhost:5000 or $PLAINT_SERVER)
    #[arg(long, env = "PLAINT_SERVER", default_value = "http://localhost:5000")]
    server: String,

    /// Session token from `plaint login` ($PLAINT_TOKEN)
    #[arg(long, env = "PLAINT_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Plaint HTTP server
    Serve {
        /// Port to listen on (default: $PLAINT_PORT or 5000)
        #[arg(long, env = "PLAINT_PORT", default_value = "5000")]
        port: u16,
        /// Host to bind (default: $PLAINT_HOST or 0.0.0.0)
        #[arg(long, env = "PLAINT_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Data directory (default: $PLAINT_DATA_DIR or the platform data dir)
        #[arg(long, env = "PLAINT_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Create an account
    Register {
        name: String,
        email: String,
        #[arg(long, env = "PLAINT_PASSWORD")]
        password: String,
        /// Request an administrator account (needs approval)
        #[arg(long)]
        admin: bool,
    },
    /// Log in and print a session token
    Login {
        email: String,
        #[arg(long, env = "PLAINT_PASSWORD")]
        password: String,
    },
    /// Show the logged-in account
    Me,
    /// List complaints visible to you
    List,
    /// File a new complaint
    File {
        title: String,
        description: String,
        /// General, Technical, Hostel, Academic or Other
        #[arg(long, default_value = "General")]
        category: String,
        /// Low, Medium or High
        #[arg(long)]
        priority: Option<String>,
    },
    /// Show one complaint
    Show { id: String },
    /// Change status, resolution or priority (administrators)
    Transition {
        id: String,
        /// Pending, "In Progress", Resolved or Rejected
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        resolution: Option<String>,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Edit your own pending complaint
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Delete a complaint
    Delete { id: String },
    /// Complaint counts by status, priority and category (administrators)
    Stats,
    /// Show whether the system is online
    Status,
    /// Flip the system online/offline (administrators)
    Toggle,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLAINT_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let api = Api::new(&cli.server, cli.token.clone());

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
        } => cmd_serve(host, port, data_dir).await,

        Commands::Register {
            name,
            email,
            password,
            admin,
        } => cmd_register(&api, &name, &email, &password, admin).await,

        Commands::Login { email, password } => cmd_login(&api, &email, &password).await,

        Commands::Me => {
            let json = api.call(Method::GET, "/auth/me", None).await?;
            print_profile(&json["data"]);
            Ok(())
        }

        Commands::List => cmd_list(&api).await,

        Commands::File {
            title,
            description,
            category,
            priority,
        } => {
            let mut body = json!({"title": title, "description": description, "category": category});
            if let Some(p) = priority {
                body["priority"] = json!(p);
            }
            let json = api.call(Method::POST, "/complaints", Some(body)).await?;
            println!("✓ filed {}", json["data"]["id"].as_str().unwrap_or("?"));
            Ok(())
        }

        Commands::Show { id } => {
            let json = api
                .call(Method::GET, &format!("/complaints/{id}"), None)
                .await?;
            print_complaint_detail(&json["data"]);
            Ok(())
        }

        Commands::Transition {
            id,
            status,
            resolution,
            priority,
        } => {
            let body = object_of(&[
                ("status", status),
                ("resolution", resolution),
                ("priority", priority),
            ]);
            let json = api
                .call(Method::PUT, &format!("/complaints/{id}"), Some(body))
                .await?;
            println!(
                "✓ {id} is now {}",
                json["data"]["status"].as_str().unwrap_or("?")
            );
            Ok(())
        }

        Commands::Edit {
            id,
            title,
            description,
            category,
            priority,
        } => {
            let body = object_of(&[
                ("title", title),
                ("description", description),
                ("category", category),
                ("priority", priority),
            ]);
            api.call(Method::PUT, &format!("/complaints/{id}/update"), Some(body))
                .await?;
            println!("✓ updated {id}");
            Ok(())
        }

        Commands::Delete { id } => {
            api.call(Method::DELETE, &format!("/complaints/{id}"), None)
                .await?;
            println!("✓ deleted {id}");
            Ok(())
        }

        Commands::Stats => cmd_stats(&api).await,

        Commands::Status => {
            let json = api.call(Method::GET, "/system/status", None).await?;
            print_mode(&json["data"]);
            Ok(())
        }

        Commands::Toggle => {
            let json = api.call(Method::PUT, "/system/toggle", None).await?;
            print_mode(&json["data"]);
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, data_dir: Option<PathBuf>) -> Result<()> {
    let cfg = plaint_server::ServerConfig {
        host,
        port,
        data_dir,
        ..Default::default()
    };

    plaint_server::run(cfg).await
}

async fn cmd_register(
    api: &Api,
    name: &str,
    email: &str,
    password: &str,
    admin: bool,
) -> Result<()> {
    let role = if admin { "admin" } else { "user" };
    let json = api
        .call(
            Method::POST,
            "/auth/register",
            Some(json!({"name": name, "email": email, "password": password, "role": role})),
        )
        .await?;

    match json["token"].as_str() {
        Some(token) => {
            println!("✓ registered {email}");
            println!("export PLAINT_TOKEN={token}");
        }
        None => println!("{}", json["message"].as_str().unwrap_or("pending approval")),
    }
    Ok(())
}

async fn cmd_login(api: &Api, email: &str, password: &str) -> Result<()> {
    let json = api
        .call(
            Method::POST,
            "/auth/login",
            Some(json!({"email": email, "password": password})),
        )
        .await?;
    let token = json["token"].as_str().context("login response has no token")?;
    println!("export PLAINT_TOKEN={token}");
    Ok(())
}

async fn cmd_list(api: &Api) -> Result<()> {
    let json = api.call(Method::GET, "/complaints", None).await?;
    let items = json["data"].as_array().cloned().unwrap_or_default();
    if items.is_empty() {
        println!("(no complaints)");
        return Ok(());
    }
    for c in &items {
        println!(
            "  {} — [{}] {} — {}/{} — filed {}",
            c["id"].as_str().unwrap_or("?"),
            c["status"].as_str().unwrap_or("?"),
            c["title"].as_str().unwrap_or(""),
            c["category"].as_str().unwrap_or("?"),
            c["priority"].as_str().unwrap_or("?"),
            age(c["created_at"].as_i64()),
        );
    }
    Ok(())
}

async fn cmd_stats(api: &Api) -> Result<()> {
    let json = api.call(Method::GET, "/complaints/stats", None).await?;
    let stats = &json["data"];
    println!("total: {}", stats["total"].as_u64().unwrap_or(0));
    for group in ["status", "priority", "category"] {
        println!("by {group}:");
        if let Some(counts) = stats[group].as_object() {
            for (name, n) in counts {
                println!("  {name:<12} {}", n.as_u64().unwrap_or(0));
            }
        }
    }
    Ok(())
}

// ── HTTP client ───────────────────────────────────────────────────────────────

struct Api {
    client: Client,
    server: String,
    token: Option<String>,
}

impl Api {
    fn new(server: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            server: server.trim_end_matches('/').to_owned(),
            token,
        }
    }

    /// Send a request and return the JSON body, or bail with the server's
    /// error message on a non-success status.
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let mut req = self.client.request(method, format!("{}{path}", self.server));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.context("HTTP request failed")?;
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or_default();

        if !status.is_success() {
            let error = json["error"].as_str().unwrap_or("unknown error");
            anyhow::bail!("server returned {status}: {error}");
        }
        Ok(json)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn object_of(fields: &[(&str, Option<String>)]) -> Value {
    let map = fields
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| ((*k).to_owned(), json!(v))))
        .collect();
    Value::Object(map)
}

fn age(created_at: Option<i64>) -> String {
    let Some(ts) = created_at else {
        return "?".into();
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let secs = (now - ts).max(0) as u64;
    // Minute resolution is plenty for a listing.
    let rounded = Duration::from_secs(secs - secs % 60);
    if rounded.is_zero() {
        "just now".into()
    } else {
        format!("{} ago", humantime::format_duration(rounded))
    }
}

fn print_profile(p: &Value) {
    println!("id:     {}", p["id"].as_str().unwrap_or("?"));
    println!("name:   {}", p["name"].as_str().unwrap_or(""));
    println!("email:  {}", p["email"].as_str().unwrap_or(""));
    println!("role:   {}", p["role"].as_str().unwrap_or("?"));
    println!("status: {}", p["status"].as_str().unwrap_or("?"));
}

fn print_complaint_detail(c: &Value) {
    println!("{}", c["title"].as_str().unwrap_or(""));
    println!("  id:       {}", c["id"].as_str().unwrap_or("?"));
    println!("  status:   {}", c["status"].as_str().unwrap_or("?"));
    println!("  category: {}", c["category"].as_str().unwrap_or("?"));
    println!("  priority: {}", c["priority"].as_str().unwrap_or("?"));
    println!("  filed:    {}", age(c["created_at"].as_i64()));
    if let Some(resolution) = c["resolution"].as_str() {
        println!("  resolution: {resolution}");
    }
    println!();
    println!("{}", c["description"].as_str().unwrap_or(""));
}

fn print_mode(m: &Value) {
    let online = m["online"].as_bool().unwrap_or(true);
    println!("system is {}", if online { "online" } else { "offline" });
}
