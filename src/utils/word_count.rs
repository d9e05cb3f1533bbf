//! Word-count progress classification for chapters and sub-chapters.
//!
//! Chapters and sub-chapters use different buckets. Chapters compare against
//! their own target and flag anything at or past 110% as over target.
//! Sub-chapters assume a fixed 250-word target and report "near complete"
//! from 80%.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Target assumed for every sub-chapter.
pub const SUB_CHAPTER_TARGET_WORDS: u32 = 250;

static WORD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’\-][\p{L}\p{N}]+)*").ok());

/// Counts words in prose, ignoring stray punctuation such as dashes.
pub fn count_words(text: &str) -> u32 {
    let count = match WORD.as_ref() {
        Some(word) => word.find_iter(text).count(),
        None => text.split_whitespace().count(),
    };
    count.try_into().unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    NotStarted,
    InProgress,
    Complete,
    OverTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubChapterStatus {
    NotStarted,
    InProgress,
    NearComplete,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress<S> {
    pub current: u32,
    pub target: u32,
    /// Display percentage, always within `0.0..=100.0`
    pub percentage: f64,
    pub status: S,
}

fn raw_percentage(current: u32, target: u32) -> f64 {
    if target == 0 {
        return 0.0;
    }
    f64::from(current) / f64::from(target) * 100.0
}

pub fn chapter_progress(current: u32, target: u32) -> Progress<ChapterStatus> {
    let raw = raw_percentage(current, target);

    let status = if current == 0 {
        ChapterStatus::NotStarted
    } else if raw >= 110.0 {
        ChapterStatus::OverTarget
    } else if raw >= 100.0 {
        ChapterStatus::Complete
    } else {
        ChapterStatus::InProgress
    };

    Progress {
        current,
        target,
        percentage: raw.min(100.0),
        status,
    }
}

pub fn sub_chapter_progress(current: u32) -> Progress<SubChapterStatus> {
    let raw = raw_percentage(current, SUB_CHAPTER_TARGET_WORDS);

    let status = if current == 0 {
        SubChapterStatus::NotStarted
    } else if raw >= 100.0 {
        SubChapterStatus::Complete
    } else if raw >= 80.0 {
        SubChapterStatus::NearComplete
    } else {
        SubChapterStatus::InProgress
    };

    Progress {
        current,
        target: SUB_CHAPTER_TARGET_WORDS,
        percentage: raw.min(100.0),
        status,
    }
}
