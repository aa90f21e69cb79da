use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    DurableCredentialStore, SessionClient, SessionError, SessionHandle, SessionState,
};
use shared::protocol::UpdateProfileRequest;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "console", about = "Session console for the dashboard API")]
struct Args {
    /// Overrides the configured API base URL.
    #[arg(long)]
    server_url: Option<String>,
    /// Overrides the configured credential database.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate and persist the session for later commands.
    Login { username: String, password: String },
    /// Discard the persisted session.
    Logout,
    /// Show the current user, re-fetched from the server.
    Me,
    /// Change the current user's password.
    ChangePassword {
        current_password: String,
        new_password: String,
    },
    /// Update profile fields of the current user.
    UpdateProfile {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// List CMS pages.
    Pages,
    /// List CMS posts.
    Posts,
    /// List users (admin only).
    Users,
    /// Fetch an arbitrary API path and pretty-print the JSON.
    Get { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = config::normalize_server_url(&server_url);
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }

    let credentials = DurableCredentialStore::initialize(&settings.database_url).await?;
    let client = SessionClient::new(settings.server_url, credentials);
    let handle: &dyn SessionHandle = &client;

    let state = handle.initialize().await?;
    let needs_session = !matches!(
        args.command,
        Command::Login { .. } | Command::Logout | Command::Me
    );
    if state == SessionState::Anonymous && needs_session {
        println!("Not logged in. Run `console login <username> <password>` first.");
        return Ok(());
    }

    match args.command {
        Command::Login { username, password } => {
            let user = handle.login(&username, &password).await?;
            println!("Logged in as {} ({})", user.display_name(), user.role);
        }
        Command::Logout => {
            handle.logout().await;
            println!("Logged out.");
        }
        Command::Me => match handle.refresh_profile().await {
            Ok(user) => {
                println!("{} <{}> role={}", user.display_name(), user.email, user.role);
            }
            Err(SessionError::NotAuthenticated) => println!("Not logged in."),
            Err(err) => return Err(err.into()),
        },
        Command::ChangePassword {
            current_password,
            new_password,
        } => {
            handle
                .change_password(&current_password, &new_password)
                .await?;
            println!("Password updated.");
        }
        Command::UpdateProfile {
            first_name,
            last_name,
            email,
        } => {
            let update = UpdateProfileRequest {
                first_name,
                last_name,
                email,
            };
            let user = handle.update_profile(update).await?;
            println!("Profile updated: {} <{}>", user.display_name(), user.email);
        }
        Command::Pages => {
            for page in handle.list_pages().await? {
                println!("{:>4}  {:?}  {}  /{}", page.id.0, page.status, page.title, page.slug);
            }
        }
        Command::Posts => {
            for post in handle.list_posts().await? {
                println!("{:>4}  {:?}  {}  /{}", post.id.0, post.status, post.title, post.slug);
            }
        }
        Command::Users => {
            for user in handle.list_users().await? {
                println!(
                    "{:>4}  {}  {}  role={}  active={}",
                    user.id.0,
                    user.username,
                    user.email,
                    user.role,
                    user.is_active
                );
            }
        }
        Command::Get { path } => {
            let value = handle.fetch(&path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
