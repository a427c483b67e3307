use std::path::PathBuf;

use candle_core::Device;
use clap::{Args, ValueEnum};
use qwen3_candle::features::SAMPLE_RATE;
use voxcore::{Context, VoxCoreEngine};

use super::Cli;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Size {
    Compact,
    Standard,
}

impl From<Size> for qwen3_candle::ModelSize {
    fn from(size: Size) -> Self {
        match size {
            Size::Compact => qwen3_candle::ModelSize::Compact,
            Size::Standard => qwen3_candle::ModelSize::Standard,
        }
    }
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Directory holding `config.json`, the tokenizer sidecars, and the
    /// weight shards.
    #[arg(long)]
    pub model_dir: PathBuf,
    /// Identifier used to decide whether a model already loaded in this
    /// process can be reused as-is.
    #[arg(long, default_value = "qwen3-asr")]
    pub model_id: String,
    #[arg(long, value_enum, default_value = "standard")]
    pub size: Size,
    /// 16kHz mono PCM WAV file to transcribe.
    pub wav: PathBuf,
    /// Pin the recognition language instead of auto-detecting it.
    #[arg(long)]
    pub language: Option<String>,
    /// Extra text hint appended to the recognition prompt.
    #[arg(long)]
    pub prompt: Option<String>,
    /// Directory holding the pinyin/word-frequency resources. Without it the
    /// data-driven correction engines are skipped.
    #[arg(long)]
    pub pinyin_dir: Option<PathBuf>,
    /// Print the result as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub async fn transcribe(&self, args: &TranscribeArgs) -> anyhow::Result<()> {
        let samples = read_wav_mono_f32(&args.wav)?;

        let engine = VoxCoreEngine::new(Device::Cpu);
        engine.load(&args.model_dir, &args.model_id, args.size.into())?;
        if let Some(dir) = &args.pinyin_dir {
            engine.load_pinyin_db(dir)?;
        }

        let context = Context::default();
        let result = engine.transcribe(&samples, args.language.as_deref(), args.prompt.as_deref(), &context)?;

        if args.json {
            let payload = serde_json::json!({
                "text": result.text,
                "needs_llm": result.needs_llm,
                "voice_command": result.voice_command,
                "applied_steps": result.applied_steps,
                "detected_language": result.detected_language,
                "retried_to": result.retried_to,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            println!("{}", result.text);
            tracing::info!(
                needs_llm = result.needs_llm,
                voice_command = ?result.voice_command,
                language = ?result.detected_language,
                "transcription finished"
            );
        }

        Ok(())
    }
}

/// Reads a WAV file into normalized `f32` samples in `[-1, 1]`, rejecting
/// anything that isn't 16kHz mono (the engine's only supported input shape).
fn read_wav_mono_f32(path: &std::path::Path) -> anyhow::Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    anyhow::ensure!(
        spec.channels == 1,
        "expected mono audio, got {} channels",
        spec.channels
    );
    anyhow::ensure!(
        spec.sample_rate == SAMPLE_RATE as u32,
        "expected {SAMPLE_RATE}Hz audio, got {}Hz",
        spec.sample_rate
    );

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_amplitude = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_amplitude))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(samples)
}
