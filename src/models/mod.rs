pub mod realtime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use realtime::{MessageKind, RealtimeMessage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trilogy {
    pub id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub narrative_overview: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateTrilogyRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative_overview: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateTrilogyRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative_overview: Option<String>,
}

/// One of the three books of a trilogy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub trilogy_id: Uuid,
    pub book_number: u8,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_word_count: Option<u32>,
    #[serde(default)]
    pub current_word_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub book_id: Uuid,
    /// 1-based and contiguous within the book
    pub chapter_number: u32,
    pub title: String,
    #[serde(default)]
    pub chapter_plot: Option<String>,
    /// Point-of-view character
    #[serde(default)]
    pub character_id: Option<Uuid>,
    #[serde(default)]
    pub target_word_count: Option<u32>,
    #[serde(default)]
    pub current_word_count: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateChapterRequest {
    pub book_id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_word_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateChapterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_word_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubChapter {
    pub id: Uuid,
    pub chapter_id: Uuid,
    /// 1-based and contiguous within the chapter
    pub sub_chapter_number: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub plot_points: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateSubChapterRequest {
    pub chapter_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_points: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateSubChapterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Stored revision of a sub-chapter's prose. Exactly one per sub-chapter is
/// current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubChapterVersion {
    pub id: Uuid,
    pub sub_chapter_id: Uuid,
    pub version_number: u32,
    pub content: String,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub generation_job_id: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Side-by-side summary of two versions of the same sub-chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionComparison {
    pub older_version: u32,
    pub newer_version: u32,
    pub older_words: u32,
    pub newer_words: u32,
    /// `newer_words - older_words`
    pub word_delta: i64,
    pub current_version: Option<u32>,
}

impl VersionComparison {
    /// Orders the pair by `version_number` regardless of argument order.
    pub fn between(a: &SubChapterVersion, b: &SubChapterVersion) -> Self {
        let (older, newer) = if a.version_number <= b.version_number {
            (a, b)
        } else {
            (b, a)
        };
        let older_words = version_words(older);
        let newer_words = version_words(newer);

        Self {
            older_version: older.version_number,
            newer_version: newer.version_number,
            older_words,
            newer_words,
            word_delta: i64::from(newer_words) - i64::from(older_words),
            current_version: [older, newer]
                .into_iter()
                .find(|v| v.is_current)
                .map(|v| v.version_number),
        }
    }
}

fn version_words(version: &SubChapterVersion) -> u32 {
    if version.word_count > 0 {
        version.word_count
    } else {
        crate::utils::word_count::count_words(&version.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: Uuid,
    pub trilogy_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub traits: Option<serde_json::Value>,
    #[serde(default)]
    pub book_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CharacterRequest {
    pub trilogy_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traits: Option<serde_json::Value>,
    pub book_ids: Vec<Uuid>,
}

/// A consistency constraint checked against generated prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldRule {
    pub id: Uuid,
    pub trilogy_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub book_ids: Vec<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub times_flagged: u32,
    #[serde(default)]
    pub times_true_violation: u32,
    #[serde(default)]
    pub times_false_positive: u32,
    #[serde(default)]
    pub times_intentional_break: u32,
    #[serde(default)]
    pub times_checker_error: u32,
    /// Computed by the backend
    #[serde(default)]
    pub accuracy_rate: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldRuleRequest {
    pub trilogy_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub book_ids: Vec<Uuid>,
}

/// How a flagged rule violation turned out once reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFeedback {
    TrueViolation,
    FalsePositive,
    IntentionalBreak,
    CheckerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    #[serde(default)]
    pub sub_chapter_id: Option<Uuid>,
    #[serde(default)]
    pub job_type: Option<String>,
    pub status: JobStatus,
    /// Percentage, 0..=100
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub stage: Option<String>,
    /// Seconds
    #[serde(default)]
    pub estimated_time_remaining: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReorderRequest {
    pub new_position: u32,
}

/// Raised on a sub-chapter when plot points change or an inconsistency is
/// detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReviewFlag {
    pub id: Uuid,
    pub sub_chapter_id: Uuid,
    pub flag_type: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_resolved: bool,
    #[serde(default)]
    pub resolution_note: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveFlagRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

/// Word-count figures reported by the progress endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordCountReport {
    pub current_word_count: u32,
    #[serde(default)]
    pub target_word_count: Option<u32>,
}
