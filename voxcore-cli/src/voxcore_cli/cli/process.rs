use std::path::PathBuf;

use clap::Args;
use voxcore::{Context, PinyinDb, ProtectionList, VoxCoreConfig};

use super::Cli;

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// The raw transcript text to run through the post-processing pipeline.
    pub text: String,
    /// Directory holding `char_pinyin.json`, `word_freq.json`, and
    /// `bigram_freq.json`. Without it the data-driven correction engines
    /// (homophone, nasal, syllable-expansion) are skipped.
    #[arg(long)]
    pub pinyin_dir: Option<PathBuf>,
    /// Recent transcript(s) to feed the rule corrector's context tier,
    /// repeatable.
    #[arg(long = "recent")]
    pub recent_transcripts: Vec<String>,
    /// Foreground application name, used as a context hint.
    #[arg(long)]
    pub app_name: Option<String>,
    /// Print the result as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn process(&self, args: &ProcessArgs) -> anyhow::Result<()> {
        let db = match &args.pinyin_dir {
            Some(dir) => PinyinDb::load(dir)?,
            None => PinyinDb::from_parts(Default::default(), Default::default(), Default::default()),
        };
        let index = args.pinyin_dir.as_ref().map(|_| voxcore::MergePinyinIndex::new());
        let index = index.as_ref();

        let context = Context {
            recent_transcripts: args.recent_transcripts.clone(),
            app_name: args.app_name.clone(),
            window_title: None,
        };

        let stages = VoxCoreConfig::default().stages;
        let protection = ProtectionList::new();
        let result = voxcore::postproc::run(&args.text, &context, &stages, &db, index, &protection);

        if args.json {
            let payload = serde_json::json!({
                "processed_text": result.processed_text,
                "applied_steps": result.applied_steps,
                "repetition": result.repetition_info.map(|r| serde_json::json!({
                    "pattern": r.pattern,
                    "repeat_count": r.repeat_count,
                    "ratio": r.ratio,
                    "severe": r.severe,
                })),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            println!("{}", result.processed_text);
            tracing::info!(steps = ?result.applied_steps, "applied post-processing steps");
        }

        Ok(())
    }
}
