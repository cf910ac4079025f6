//! linkshelf CLI: personal bookmarks over a shared SQLite database.
//!
//! Usage:
//!   linkshelf login --id <id> [--email e] [--name n] [--avatar-url u]
//!   linkshelf logout | whoami
//!   linkshelf add <url> [--title t]
//!   linkshelf list | rm <id> | watch
//!
//! Global: --db <path>, --config <path>. Logging via LINKSHELF_LOG.

use clap::{Parser, Subcommand};
use linkshelf::present::render_view;
use linkshelf::{
    Bookmark, BookmarkId, Config, IdentityMetadata, OpenBackend, SignIn, SqliteBackend, SyncViewModel,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long one-shot commands wait for the change feed to echo their write
const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "linkshelf",
    version,
    about = "Personal bookmarks, synchronized in real time"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as a user
    Login {
        /// User id to sign in as
        #[arg(long)]
        id: String,
        #[arg(long)]
        email: Option<String>,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    /// Sign out
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Add a bookmark
    Add {
        /// Absolute URL to save
        url: String,
        /// Title (defaults to the URL's host)
        #[arg(long)]
        title: Option<String>,
    },
    /// List bookmarks, newest first
    List,
    /// Delete a bookmark by id
    Rm {
        /// Bookmark id as shown by `list`
        id: String,
    },
    /// Show bookmarks and keep the view updated until Ctrl-C
    Watch,
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_env("LINKSHELF_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_view_model(config: &Config) -> Result<SyncViewModel, String> {
    let backend = SqliteBackend::open(&config.db_path)
        .map_err(|e| format!("Failed to open database {}: {}", config.db_path.display(), e))?
        .with_poll_interval(config.poll_interval());
    Ok(SyncViewModel::from_backend(Arc::new(backend)))
}

async fn cmd_login(
    vm: &SyncViewModel,
    id: String,
    email: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
) -> i32 {
    let request = SignIn {
        user_id: id,
        email,
        metadata: IdentityMetadata {
            avatar_url,
            full_name: name,
            name: None,
        },
    };
    match vm.store().sign_in(request).await {
        Ok(identity) => {
            println!("Signed in as {}", identity.display_label());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_logout(vm: &SyncViewModel) -> i32 {
    match vm.store().sign_out().await {
        Ok(()) => {
            println!("Signed out");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_whoami(vm: &SyncViewModel) -> i32 {
    match vm.store().current_identity().await {
        Ok(Some(identity)) => {
            println!("{}", identity.display_label());
            if let Some(email) = &identity.email {
                println!("email: {}", email);
            }
            println!("id:    {}", identity.id);
            0
        }
        Ok(None) => {
            println!("Not signed in");
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_add(vm: &SyncViewModel, url: &str, title: Option<&str>) -> i32 {
    if let Err(e) = vm.start().await {
        eprintln!("Error: {}", e);
        return 1;
    }
    let known: HashSet<BookmarkId> = vm.view().snapshot.iter().map(|b| b.id.clone()).collect();
    match vm.add(url, title).await {
        Ok(()) => {
            let echoed = tokio::time::timeout(
                ECHO_TIMEOUT,
                vm.wait_until(|v| find_added(v.bookmarks(), &known, url).is_some()),
            )
            .await;
            match echoed.ok().as_ref().and_then(|v| find_added(v.bookmarks(), &known, url)) {
                Some(added) => println!("Added '{}' ({})", added.title, added.id),
                None => println!("Bookmark added"),
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// The echo of our own insert: a row that was not in view before and
/// carries the submitted url. Rows added concurrently elsewhere are skipped.
fn find_added<'a>(
    bookmarks: &'a [Bookmark],
    known: &HashSet<BookmarkId>,
    url: &str,
) -> Option<&'a Bookmark> {
    let url = url.trim();
    bookmarks.iter().find(|b| !known.contains(&b.id) && b.url == url)
}

async fn cmd_list(vm: &SyncViewModel) -> i32 {
    if let Err(e) = vm.start().await {
        eprintln!("Error: {}", e);
        return 1;
    }
    print!("{}", render_view(&vm.view(), chrono::Utc::now()));
    0
}

async fn cmd_rm(vm: &SyncViewModel, id: &str) -> i32 {
    if let Err(e) = vm.start().await {
        eprintln!("Error: {}", e);
        return 1;
    }
    let id = BookmarkId::from(id);
    match vm.remove(&id).await {
        Ok(()) => {
            let gone = tokio::time::timeout(ECHO_TIMEOUT, vm.wait_until(|v| !v.snapshot.contains(&id))).await;
            match gone {
                Ok(_) => println!("Deleted bookmark {}", id),
                Err(_) => println!("Delete of {} accepted; not yet confirmed", id),
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_watch(vm: &SyncViewModel, poll_interval: Duration) -> i32 {
    if let Err(e) = vm.start().await {
        eprintln!("Error: {}", e);
        return 1;
    }

    let redraw = |vm: &SyncViewModel| {
        print!("\x1B[2J\x1B[H{}", render_view(&vm.view(), chrono::Utc::now()));
    };

    let mut changes = vm.changes();
    let follow = vm.follow_identity();
    tokio::pin!(follow);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    // Sign-in and sign-out by other processes only surface when the
    // session is read, so read it on the same cadence as the feed.
    let mut session_check = tokio::time::interval(poll_interval);

    redraw(vm);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut follow => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                redraw(vm);
            }
            _ = session_check.tick() => {
                if let Err(e) = vm.store().current_identity().await {
                    tracing::warn!(error = %e, "failed to read session");
                }
            }
        }
    }
    vm.close();
    0
}

async fn run(command: Commands, config: Config) -> i32 {
    let vm = match open_view_model(&config) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match command {
        Commands::Login { id, email, name, avatar_url } => cmd_login(&vm, id, email, name, avatar_url).await,
        Commands::Logout => cmd_logout(&vm).await,
        Commands::Whoami => cmd_whoami(&vm).await,
        Commands::Add { url, title } => cmd_add(&vm, &url, title.as_deref()).await,
        Commands::List => cmd_list(&vm).await,
        Commands::Rm { id } => cmd_rm(&vm, &id).await,
        Commands::Watch => cmd_watch(&vm, config.poll_interval()).await,
    }
}

fn main() {
    let cli = Cli::parse();
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    init_logging(&config.log_filter);

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    let code = rt.block_on(run(cli.command, config));
    std::process::exit(code);
}
