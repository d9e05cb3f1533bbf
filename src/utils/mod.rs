pub mod backoff;
pub mod word_count;
