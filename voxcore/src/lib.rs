pub mod collab;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod homophone;
pub mod nasal;
pub mod pinyin_db;
pub mod postproc;
pub mod protection;
pub mod punctuation;
pub mod repetition;
pub mod router;
pub mod rules;
pub mod s2t;
mod scoring;
pub mod syllable;

pub use collab::{LlmEnhancer, TranscriptHistoryStore, TranscriptionProvider};
pub use config::{StageFlags, VoxCoreConfig};
pub use context::{Context, ContextMemory};
pub use engine::{ModelState, VoxCoreEngine, VoxCoreTranscription};
pub use error::{Result, VoxCoreError};
pub use pinyin_db::PinyinDb;
pub use protection::{PersistedProtectionList, ProtectionList};
pub use postproc::PostProcessResult;
pub use repetition::RepetitionInfo;
pub use router::{Provider, RetryTarget, TranscriptionMetadata};
pub use syllable::MergePinyinIndex;
