use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};

use cloudtune_server::library::{
    delete_user_and_reclaim, AuthTokenValue, GuardedLibraryStore, SqliteLibraryStore,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "cli-auth", about = "Manages cloudtune users and their auth tokens.")]
struct CliArgs {
    /// Path to the SQLite database file of the server.
    #[clap(long, value_parser = parse_path)]
    pub db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a user with the given handle.
    AddUser { user_handle: String },

    /// Issues a new auth token for the given user and prints it.
    IssueToken { user_handle: String },

    /// Lists all user handles.
    ListUsers,

    /// Deletes the user, its playlists and library, and every stored song
    /// no other user still has.
    DeleteUser { user_handle: String },

    /// Shows the path of the current db.
    Where,
}

fn resolve_user_id(store: &GuardedLibraryStore, user_handle: &str) -> Result<usize> {
    match store.get_user_id(user_handle)? {
        Some(user_id) => Ok(user_id),
        None => bail!("User {} not found", user_handle),
    }
}

async fn execute_command(store: &GuardedLibraryStore, args: &CliArgs) -> Result<()> {
    match &args.command {
        Command::AddUser { user_handle } => {
            if store.get_user_id(user_handle)?.is_some() {
                bail!("User {} already exists", user_handle);
            }
            let user_id = store.create_user(user_handle)?;
            println!("Created user {} with id {}", user_handle, user_id);
        }
        Command::IssueToken { user_handle } => {
            let user_id = resolve_user_id(store, user_handle)?;
            let token = AuthTokenValue::generate();
            store.add_auth_token(user_id, &token)?;
            println!("{}", token.0);
        }
        Command::ListUsers => {
            for handle in store.get_all_user_handles()? {
                println!("{}", handle);
            }
        }
        Command::DeleteUser { user_handle } => {
            let user_id = resolve_user_id(store, user_handle)?;
            let summary = delete_user_and_reclaim(store, user_id)
                .await?
                .with_context(|| format!("User {} vanished during deletion", user_handle))?;
            println!(
                "Deleted user {}: {} library entries, {} playlists, {} songs, {} files",
                user_handle,
                summary.library_links_removed,
                summary.playlists_removed,
                summary.songs_deleted,
                summary.files_removed
            );
        }
        Command::Where => println!("{}", args.db_path.display()),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    if !cli_args.db_path.exists() && !matches!(cli_args.command, Command::AddUser { .. }) {
        bail!("Database file {:?} does not exist", cli_args.db_path);
    }
    let store: GuardedLibraryStore = Arc::new(
        SqliteLibraryStore::new(&cli_args.db_path)
            .with_context(|| format!("Could not open database {:?}", cli_args.db_path))?,
    );

    execute_command(&store, &cli_args).await
}
