mod cli;

pub use cli::Cli;
use cli::Commands;

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Transcribe(args) => self.transcribe(args).await?,
            Commands::Process(args) => self.process(args)?,
            Commands::Protection(args) => self.protection(args)?,
        }

        Ok(())
    }
}
