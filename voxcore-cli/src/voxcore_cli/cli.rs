use clap::{Parser, Subcommand};

pub mod process;
pub mod protection;
pub mod transcribe;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Whether to run in development mode.
    #[arg(long)]
    pub dev: bool,
    /// The verbosity level (0-3).
    #[arg(long, default_value_t = 1)]
    pub verbosity: u8,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a 16kHz mono WAV file through the ASR engine and the post-processing pipeline.
    Transcribe(self::transcribe::TranscribeArgs),
    /// Run already-transcribed text through the post-processing pipeline only.
    Process(self::process::ProcessArgs),
    /// Inspect or edit the correction protection list.
    Protection(self::protection::ProtectionArgs),
}
