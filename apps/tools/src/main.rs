use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::Message;
use storage::Storage;

/// Read-only access to the message store for operators.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/chat.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump a room's history, oldest first.
    Room { name: String },
    /// Dump the direct conversation between two identities.
    Conversation { a: String, b: String },
    /// Ping the store.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Room { name } => {
            let messages = storage.find_by_room(name.trim()).await?;
            print_messages(&messages)?;
        }
        Command::Conversation { a, b } => {
            let messages = storage.find_conversation(a.trim(), b.trim()).await?;
            print_messages(&messages)?;
        }
        Command::Health => {
            storage.health_check().await?;
            println!("ok");
        }
    }

    Ok(())
}

fn print_messages(messages: &[Message]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(messages)?);
    Ok(())
}
