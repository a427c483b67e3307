use std::fs::create_dir_all;
use std::path::PathBuf;

use clap::Parser;
use hf_hub::{api::sync::Api, Repo, RepoType};
use qwen3_candle::DataFile;
use qwen3_candle::weights::model_weight_dir;

/// Downloads a Qwen3-ASR checkpoint's config, tokenizer and weight shards
/// from the Hugging Face Hub into a sanitized local model directory.
#[derive(Parser)]
struct Args {
    /// Hub repo id, e.g. "Qwen/Qwen3-ASR-Compact".
    #[arg(long)]
    repo: String,

    /// Revision (branch, tag or commit sha).
    #[arg(long, default_value = "main")]
    revision: String,

    /// Local directory models are fetched into; the repo id is sanitized
    /// into a subdirectory name under it.
    #[arg(long, default_value = "./models_data")]
    data_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    stderrlog::new()
        .module(module_path!())
        .verbosity(log::Level::Trace)
        .init()?;

    let model_dir = model_weight_dir(&args.data_dir, &args.repo);
    create_dir_all(&model_dir)?;

    let api = Api::new()?;
    let repo = api.repo(Repo::with_revision(
        args.repo.clone(),
        RepoType::Model,
        args.revision.clone(),
    ));

    for file in enum_iterator::all::<DataFile>() {
        let file_name = file.file_name();
        log::info!("start processing {}", file_name);
        let res_path = model_dir.join(file_name);
        if res_path.exists() {
            log::info!("{} already exists", file_name);
            continue;
        }
        match repo.get(file_name) {
            Ok(cached) => {
                std::fs::copy(cached.as_path(), &res_path)?;
                log::info!("{} downloaded and copied", file_name);
            }
            Err(e) if !file.is_required() => {
                log::info!("{} not present in repo, skipping ({e})", file_name);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
