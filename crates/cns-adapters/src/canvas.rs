//! Canvas LMS REST client.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use cns_core::{Assignment, Course, SubmissionSnapshot};
use cns_storage::{ApiRequest, HttpFetcher};
use scraper::{Html, Node};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{SourceApi, SourceError};

const SCOPE: &str = "canvas";
const PAGE_SIZE: &str = "100";

/// Elements whose boundaries separate words in the rendered text.
const BLOCK_TAGS: [&str; 16] = [
    "p", "div", "br", "li", "ul", "ol", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote",
];

/// Elements whose text is never rendered.
const SKIPPED_TAGS: [&str; 2] = ["script", "style"];

#[derive(Debug, Clone)]
pub struct CanvasConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct CanvasClient {
    http: Arc<HttpFetcher>,
    base_url: String,
    token: String,
}

impl CanvasClient {
    pub fn new(config: CanvasConfig, http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    /// Follow `rel="next"` links until the listing is exhausted.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        first: ApiRequest,
    ) -> Result<Vec<T>, SourceError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(first);

        while let Some(request) = next.take() {
            if !seen.insert(request.url.clone()) && request.query.is_empty() {
                warn!(url = %request.url, "pagination loop detected; stopping");
                break;
            }
            let resp = self.http.send(SCOPE, &request).await?;
            let page: Vec<T> = resp.json()?;
            debug!(url = %resp.final_url, count = page.len(), "fetched page");
            items.extend(page);
            // the next link already carries the query string
            next = resp
                .next_link
                .map(|url| ApiRequest::get(url).bearer(self.token.clone()));
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceApi for CanvasClient {
    async fn get_course(&self, course_id: u64) -> Result<Course, SourceError> {
        let request = ApiRequest::get(self.api_url(&format!("/courses/{course_id}")))
            .bearer(self.token.clone());
        let resp = self.http.send(SCOPE, &request).await?;
        Ok(resp.json()?)
    }

    async fn list_assignments(&self, course_id: u64) -> Result<Vec<Assignment>, SourceError> {
        let request = ApiRequest::get(self.api_url(&format!("/courses/{course_id}/assignments")))
            .bearer(self.token.clone())
            .query("per_page", PAGE_SIZE)
            .query("include[]", "submission");
        self.get_paginated(request).await
    }

    async fn list_submissions_since(
        &self,
        course_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SubmissionSnapshot>, SourceError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = self.api_url(&format!("/courses/{course_id}/students/submissions"));

        let mut by_assignment: BTreeMap<u64, SubmissionSnapshot> = BTreeMap::new();
        // graded results go last so they win over the submitted view of the same row
        for filter in ["submitted_since", "graded_since"] {
            let request = ApiRequest::get(url.clone())
                .bearer(self.token.clone())
                .query("student_ids[]", "self")
                .query(filter, since.clone())
                .query("include[]", "assignment")
                .query("per_page", PAGE_SIZE);
            let page: Vec<SubmissionSnapshot> = self.get_paginated(request).await?;
            for submission in page {
                match submission.resolved_assignment_id() {
                    Some(id) => {
                        by_assignment.insert(id, submission);
                    }
                    None => debug!(course_id, "submission without assignment id ignored"),
                }
            }
        }

        Ok(by_assignment.into_values().collect())
    }
}

/// Render an HTML description as plain text with collapsed whitespace.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    for node in fragment.root_element().descendants() {
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
        });
        match node.value() {
            Node::Text(text) if !skipped => out.push_str(text),
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => out.push(' '),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
