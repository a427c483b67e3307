use std::path::PathBuf;

use clap::{Args, Subcommand};
use voxcore::PersistedProtectionList;

use super::Cli;

#[derive(Args, Debug)]
pub struct ProtectionArgs {
    /// Path to the `redb` database backing the protection list.
    #[arg(long, default_value = "voxcore_protection.redb")]
    pub db_path: PathBuf,
    #[clap(subcommand)]
    pub command: ProtectionCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProtectionCommand {
    /// Add a word or phrase to the protection list.
    Add { word: String },
    /// Remove a word or phrase from the protection list.
    Remove { word: String },
    /// List every protected word or phrase.
    List,
}

impl Cli {
    pub fn protection(&self, args: &ProtectionArgs) -> anyhow::Result<()> {
        let db = PersistedProtectionList::open(&args.db_path)?;

        match &args.command {
            ProtectionCommand::Add { word } => {
                db.add(word)?;
                tracing::info!(%word, "added protected word");
            }
            ProtectionCommand::Remove { word } => {
                db.remove(word)?;
                tracing::info!(%word, "removed protected word");
            }
            ProtectionCommand::List => {
                for word in db.all_words()? {
                    println!("{word}");
                }
            }
        }

        Ok(())
    }
}
