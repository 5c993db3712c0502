//! 记忆层：工作记忆（任务内）、观察压缩、情景文档（单任务持久化）、
//! 任务生命周期与子任务图、多 Agent 共享会话、相似任务检索

pub mod compressor;
pub mod document;
pub mod episodic;
pub mod lifecycle;
pub mod search;
pub mod shared;
pub mod subtasks;
pub mod working;

pub use compressor::{
    CompressorConfig, CompressorSummary, ContextCompressor, FailureAdvisory, Observation,
    ObservationKind,
};
pub use document::{Section, TaskDocument};
pub use episodic::{EpisodicMemory, StepStatus};
pub use lifecycle::{
    CleanupReport, MemoryManager, MemoryStats, MetadataIndex, RetentionPolicy, TaskRecord,
    TaskStatus,
};
pub use search::{KeywordTaskSearch, SimilarTask, TaskSearch};
pub use shared::{AgentInfo, ProgressEntry, SharedFinding, SharedMemory, SharedSession};
pub use subtasks::{Subtask, SubtaskManager, SubtaskProgress, SubtaskStatus};
pub use working::{CommandRecord, WorkingMemory, WorkingMemoryStats};
