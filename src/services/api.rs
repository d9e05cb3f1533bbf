use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::models::{
    Book, Chapter, Character, CharacterRequest, ContentReviewFlag, CreateChapterRequest,
    CreateSubChapterRequest, CreateTrilogyRequest, GenerateRequest, GenerationJob,
    ReorderRequest, ResolveFlagRequest, RuleFeedback, SubChapter, SubChapterVersion, Trilogy,
    UpdateChapterRequest, UpdateSubChapterRequest, UpdateTrilogyRequest, WordCountReport,
    WorldRule, WorldRuleRequest,
};
use crate::services::auth::TokenProvider;
use crate::services::reorder::ListBackend;

/// Typed client for the backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(api_url: &str, tokens: Arc<dyn TokenProvider>) -> Self {
        ApiClient {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        // Fetched per request so a refreshed session is picked up immediately
        let token = self.tokens.access_token().await?;

        Ok(self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Content-Type", "application/json")
            .bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        debug!(%status, %message, "API request failed");
        Err(ForgeError::Api { status, message })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.request(Method::GET, path).await?;
        Ok(self.send(request).await?.json().await?)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.request(method, path).await?.json(body);
        Ok(self.send(request).await?.json().await?)
    }

    /// For endpoints whose response body is ignored.
    async fn send_unit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<()> {
        let mut request = self.request(method, path).await?;
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send_unit::<()>(Method::DELETE, path, None).await
    }

    // Trilogies

    pub async fn list_trilogies(&self) -> Result<Vec<Trilogy>> {
        self.get("/api/trilogies").await
    }

    pub async fn get_trilogy(&self, id: Uuid) -> Result<Trilogy> {
        self.get(&format!("/api/trilogies/{id}")).await
    }

    pub async fn create_trilogy(&self, body: &CreateTrilogyRequest) -> Result<Trilogy> {
        self.send_json(Method::POST, "/api/trilogies", body).await
    }

    pub async fn update_trilogy(&self, id: Uuid, body: &UpdateTrilogyRequest) -> Result<Trilogy> {
        self.send_json(Method::PUT, &format!("/api/trilogies/{id}"), body)
            .await
    }

    pub async fn delete_trilogy(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("/api/trilogies/{id}")).await
    }

    pub async fn list_books(&self, trilogy_id: Uuid) -> Result<Vec<Book>> {
        self.get(&format!("/api/trilogies/{trilogy_id}/books")).await
    }

    // Chapters

    pub async fn list_chapters(&self, book_id: Uuid) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self.get(&format!("/api/chapters/book/{book_id}")).await?;
        chapters.sort_by_key(|c| c.chapter_number);
        Ok(chapters)
    }

    pub async fn get_chapter(&self, id: Uuid) -> Result<Chapter> {
        self.get(&format!("/api/chapters/{id}")).await
    }

    pub async fn create_chapter(&self, body: &CreateChapterRequest) -> Result<Chapter> {
        self.send_json(Method::POST, "/api/chapters", body).await
    }

    pub async fn update_chapter(&self, id: Uuid, body: &UpdateChapterRequest) -> Result<Chapter> {
        self.send_json(Method::PUT, &format!("/api/chapters/{id}"), body)
            .await
    }

    pub async fn delete_chapter(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("/api/chapters/{id}")).await
    }

    pub async fn reorder_chapter(&self, id: Uuid, new_position: u32) -> Result<()> {
        self.send_unit(
            Method::PUT,
            &format!("/api/chapters/{id}/reorder"),
            Some(&ReorderRequest { new_position }),
        )
        .await
    }

    pub async fn chapter_progress(&self, id: Uuid) -> Result<WordCountReport> {
        self.get(&format!("/api/chapters/{id}/progress")).await
    }

    // Sub-chapters

    pub async fn list_sub_chapters(&self, chapter_id: Uuid) -> Result<Vec<SubChapter>> {
        let mut subs: Vec<SubChapter> = self
            .get(&format!("/api/sub-chapters/chapter/{chapter_id}"))
            .await?;
        subs.sort_by_key(|s| s.sub_chapter_number);
        Ok(subs)
    }

    pub async fn get_sub_chapter(&self, id: Uuid) -> Result<SubChapter> {
        self.get(&format!("/api/sub-chapters/{id}")).await
    }

    pub async fn create_sub_chapter(&self, body: &CreateSubChapterRequest) -> Result<SubChapter> {
        self.send_json(Method::POST, "/api/sub-chapters", body).await
    }

    pub async fn update_sub_chapter(
        &self,
        id: Uuid,
        body: &UpdateSubChapterRequest,
    ) -> Result<SubChapter> {
        self.send_json(Method::PUT, &format!("/api/sub-chapters/{id}"), body)
            .await
    }

    pub async fn delete_sub_chapter(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("/api/sub-chapters/{id}")).await
    }

    pub async fn reorder_sub_chapter(&self, id: Uuid, new_position: u32) -> Result<()> {
        self.send_unit(
            Method::PUT,
            &format!("/api/sub-chapters/{id}/reorder"),
            Some(&ReorderRequest { new_position }),
        )
        .await
    }

    pub async fn sub_chapter_progress(&self, id: Uuid) -> Result<WordCountReport> {
        self.get(&format!("/api/sub-chapters/{id}/progress")).await
    }

    /// Queues prose generation and returns the job tracking it.
    pub async fn generate_sub_chapter(
        &self,
        id: Uuid,
        body: &GenerateRequest,
    ) -> Result<GenerationJob> {
        self.send_json(Method::POST, &format!("/api/sub-chapters/{id}/generate"), body)
            .await
    }

    pub async fn regenerate_sub_chapter(
        &self,
        id: Uuid,
        body: &GenerateRequest,
    ) -> Result<GenerationJob> {
        self.send_json(
            Method::POST,
            &format!("/api/sub-chapters/{id}/regenerate"),
            body,
        )
        .await
    }

    pub async fn list_versions(&self, sub_chapter_id: Uuid) -> Result<Vec<SubChapterVersion>> {
        let mut versions: Vec<SubChapterVersion> = self
            .get(&format!("/api/sub-chapters/{sub_chapter_id}/versions"))
            .await?;
        versions.sort_by_key(|v| std::cmp::Reverse(v.version_number));
        Ok(versions)
    }

    /// Makes a stored version the current one.
    pub async fn activate_version(
        &self,
        sub_chapter_id: Uuid,
        version_id: Uuid,
    ) -> Result<SubChapterVersion> {
        self.send_json(
            Method::POST,
            &format!("/api/sub-chapters/{sub_chapter_id}/versions/{version_id}/activate"),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn list_review_flags(&self, sub_chapter_id: Uuid) -> Result<Vec<ContentReviewFlag>> {
        self.get(&format!("/api/sub-chapters/{sub_chapter_id}/review-flags"))
            .await
    }

    pub async fn resolve_review_flag(
        &self,
        flag_id: Uuid,
        resolution_note: Option<String>,
    ) -> Result<ContentReviewFlag> {
        self.send_json(
            Method::PUT,
            &format!("/api/sub-chapters/review-flags/{flag_id}/resolve"),
            &ResolveFlagRequest { resolution_note },
        )
        .await
    }

    // Characters

    pub async fn list_characters(&self, trilogy_id: Uuid) -> Result<Vec<Character>> {
        self.get(&format!("/api/characters/trilogy/{trilogy_id}"))
            .await
    }

    pub async fn create_character(&self, body: &CharacterRequest) -> Result<Character> {
        self.send_json(Method::POST, "/api/characters", body).await
    }

    pub async fn update_character(&self, id: Uuid, body: &CharacterRequest) -> Result<Character> {
        self.send_json(Method::PUT, &format!("/api/characters/{id}"), body)
            .await
    }

    pub async fn delete_character(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("/api/characters/{id}")).await
    }

    // World rules

    pub async fn list_world_rules(&self, trilogy_id: Uuid) -> Result<Vec<WorldRule>> {
        self.get(&format!("/api/world_rules/trilogy/{trilogy_id}"))
            .await
    }

    pub async fn create_world_rule(&self, body: &WorldRuleRequest) -> Result<WorldRule> {
        self.send_json(Method::POST, "/api/world_rules", body).await
    }

    pub async fn update_world_rule(&self, id: Uuid, body: &WorldRuleRequest) -> Result<WorldRule> {
        self.send_json(Method::PUT, &format!("/api/world_rules/{id}"), body)
            .await
    }

    pub async fn delete_world_rule(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("/api/world_rules/{id}")).await
    }

    /// Records how a flagged violation of this rule was judged.
    pub async fn record_rule_feedback(&self, id: Uuid, outcome: RuleFeedback) -> Result<WorldRule> {
        self.send_json(
            Method::POST,
            &format!("/api/world_rules/{id}/feedback"),
            &serde_json::json!({ "outcome": outcome }),
        )
        .await
    }

    /// Rules of a trilogy, least accurate first. Rules never flagged sort last.
    pub async fn rule_analytics(&self, trilogy_id: Uuid) -> Result<Vec<WorldRule>> {
        let mut rules = self.list_world_rules(trilogy_id).await?;
        rules.sort_by(|a, b| {
            let a = a.accuracy_rate.unwrap_or(f64::INFINITY);
            let b = b.accuracy_rate.unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        });
        Ok(rules)
    }

    // Generation jobs

    pub async fn get_job(&self, id: Uuid) -> Result<GenerationJob> {
        self.get(&format!("/api/generation-jobs/{id}")).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<GenerationJob>> {
        self.get("/api/generation-jobs").await
    }

    pub async fn cancel_job(&self, id: Uuid) -> Result<()> {
        self.send_unit::<()>(
            Method::POST,
            &format!("/api/generation-jobs/{id}/cancel"),
            None,
        )
        .await
    }
}

/// Best-effort human-readable message from an error response body.
pub(crate) async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let parsed = serde_json::from_str::<serde_json::Value>(&text).ok();
    let field = parsed.as_ref().and_then(|value| {
        ["detail", "message", "msg", "error_description", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    });

    match field {
        Some(message) => message,
        None if !text.trim().is_empty() => text,
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

#[async_trait]
impl ListBackend<Chapter> for ApiClient {
    async fn fetch_list(&self, book_id: Uuid) -> Result<Vec<Chapter>> {
        self.list_chapters(book_id).await
    }

    async fn reorder(&self, chapter_id: Uuid, new_position: u32) -> Result<()> {
        self.reorder_chapter(chapter_id, new_position).await
    }
}

#[async_trait]
impl ListBackend<SubChapter> for ApiClient {
    async fn fetch_list(&self, chapter_id: Uuid) -> Result<Vec<SubChapter>> {
        self.list_sub_chapters(chapter_id).await
    }

    async fn reorder(&self, sub_chapter_id: Uuid, new_position: u32) -> Result<()> {
        self.reorder_sub_chapter(sub_chapter_id, new_position).await
    }
}
