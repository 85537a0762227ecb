use anyhow::anyhow;
use birii_client::{
    ClientError, Credentials, ErrorInfo, Registration, SessionEvent, SessionManager, Settings,
};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "birii", about = "Command-line client for the Birii marketplace API")]
struct Cli {
    /// Overrides `api.base_url` from the configuration files
    #[arg(long, env = "BIRII_BASE_URL")]
    base_url: Option<String>,

    /// Overrides `storage.path`
    #[arg(long, env = "BIRII_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login(LoginArgs),
    Register(RegisterArgs),
    Logout,
    /// Show the profile of the persisted session
    Whoami,
    /// Exchange the refresh token for a new access token
    Refresh,
    /// List marketplace items
    Items(ItemsArgs),
    Item {
        id: String,
    },
    Favorite {
        id: String,
    },
    Categories,
    Featured,
    Conversations,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long, env = "BIRII_USERNAME")]
    username: String,
    #[arg(long, env = "BIRII_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "BIRII_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
}

#[derive(Args, Debug)]
struct ItemsArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let mut settings = Settings::new()?;
    if let Some(base_url) = cli.base_url.clone() {
        settings.api.base_url = base_url;
    }
    if let Some(path) = cli.session_file.clone() {
        settings.storage.path = path;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Configuration loaded successfully");

    let manager = SessionManager::from_settings(settings)?;
    watch_session(&manager);

    let result = run(&manager, cli.command).await;
    manager.dispose().await;
    result
}

/// Log forced logouts while the command runs.
fn watch_session(manager: &SessionManager) {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::AuthenticationRequired => {
                    warn!("Session expired, run `birii login` to sign in again")
                }
                other => info!("Session event: {:?}", other),
            }
        }
    });
}

async fn run(manager: &SessionManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login(args) => {
            let credentials = Credentials::new(args.username, args.password);
            manager
                .login(&credentials)
                .await
                .map_err(|e| session_error(manager, e))?;
            print_json(&manager.state().user.unwrap_or(Value::Null))
        }
        Command::Register(args) => {
            let mut fields = json!({
                "username": args.username,
                "email": args.email,
                "password1": args.password,
                "password2": args.password,
            });
            if let Some(first_name) = args.first_name {
                fields["first_name"] = json!(first_name);
            }
            if let Some(last_name) = args.last_name {
                fields["last_name"] = json!(last_name);
            }

            match manager
                .register(&fields)
                .await
                .map_err(|e| session_error(manager, e))?
            {
                Registration::Authenticated(user) => print_json(&user),
                Registration::LoginRequired => {
                    println!("Account created. Run `birii login` to sign in.");
                    Ok(())
                }
            }
        }
        Command::Logout => {
            manager.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => {
            let state = manager.initialize().await;
            match state.user {
                Some(user) if state.is_authenticated => print_json(&user),
                _ => Err(anyhow!("Not logged in")),
            }
        }
        Command::Refresh => {
            manager.initialize().await;
            manager.refresh_access_token().await.map_err(report)?;
            println!("Access token refreshed.");
            Ok(())
        }
        Command::Items(args) => {
            manager.initialize().await;
            let page = args.page.to_string();
            let mut filters = vec![("page", page.as_str())];
            if let Some(search) = args.search.as_deref() {
                filters.push(("search", search));
            }
            if let Some(category) = args.category.as_deref() {
                filters.push(("category", category));
            }

            let page = manager.items().list(&filters).await.map_err(report)?;
            info!(count = page.count, more = page.has_next(), "Listed items");
            print_json(&Value::Array(page.results))
        }
        Command::Item { id } => {
            manager.initialize().await;
            print_json(&manager.items().get(&id).await.map_err(report)?)
        }
        Command::Favorite { id } => {
            manager.initialize().await;
            print_json(&manager.items().toggle_favorite(&id).await.map_err(report)?)
        }
        Command::Categories => {
            manager.initialize().await;
            let categories = manager.categories().list().await.map_err(report)?;
            print_json(&Value::Array(categories))
        }
        Command::Featured => {
            manager.initialize().await;
            let items = manager.categories().featured_items().await.map_err(report)?;
            print_json(&Value::Array(items))
        }
        Command::Conversations => {
            manager.initialize().await;
            let conversations = manager.conversations().list().await.map_err(report)?;
            print_json(&Value::Array(conversations))
        }
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(err: ClientError) -> anyhow::Error {
    let info = ErrorInfo::from(&err);
    anyhow::Error::new(err).context(format!("{} (status {})", info.message, info.status))
}

/// Prefer the message the session recorded for login and registration.
fn session_error(manager: &SessionManager, err: ClientError) -> anyhow::Error {
    match manager.state().last_error {
        Some(info) => anyhow::Error::new(err).context(info.message),
        None => report(err),
    }
}
