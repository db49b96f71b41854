//! Notion database client and property wire encoding.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cns_core::{
    ColumnSpec, ColumnType, EncodedValue, RowFilter, RowId, RowProperties, SchemaDescriptor,
};
use cns_storage::{ApiRequest, FetchedResponse, HttpFetcher, Method};
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::{DestinationApi, DestinationError};

const SCOPE: &str = "notion";

pub const DEFAULT_API_BASE: &str = "https://api.notion.com/v1";
pub const DEFAULT_API_VERSION: &str = "2022-06-28";

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub token: String,
    pub database_id: String,
    pub api_base: String,
    pub api_version: String,
}

impl NotionConfig {
    pub fn new(token: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            database_id: database_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotionClient {
    http: Arc<HttpFetcher>,
    config: NotionConfig,
}

impl NotionClient {
    pub fn new(config: NotionConfig, http: Arc<HttpFetcher>) -> Self {
        Self { http, config }
    }

    fn request(&self, method: Method, path: &str) -> ApiRequest {
        ApiRequest::new(
            method,
            format!("{}{path}", self.config.api_base.trim_end_matches('/')),
        )
        .bearer(self.config.token.clone())
        .header("Notion-Version", self.config.api_version.clone())
    }

    async fn send(&self, request: ApiRequest) -> Result<FetchedResponse, DestinationError> {
        Ok(self.http.send(SCOPE, &request).await?)
    }
}

#[async_trait]
impl DestinationApi for NotionClient {
    async fn retrieve_schema(&self) -> Result<SchemaDescriptor, DestinationError> {
        let path = format!("/databases/{}", self.config.database_id);
        let body: JsonValue = self.send(self.request(Method::GET, &path)).await?.json()?;
        parse_schema(&body)
    }

    async fn add_column(&self, name: &str, spec: &ColumnSpec) -> Result<(), DestinationError> {
        let path = format!("/databases/{}", self.config.database_id);
        let mut properties = Map::new();
        properties.insert(name.to_string(), column_spec_json(spec)?);
        let request = self
            .request(Method::PATCH, &path)
            .json(json!({ "properties": properties }));
        self.send(request).await?;
        Ok(())
    }

    async fn find_row(&self, filter: &RowFilter) -> Result<Option<RowId>, DestinationError> {
        let path = format!("/databases/{}/query", self.config.database_id);
        let request = self
            .request(Method::POST, &path)
            .json(json!({ "filter": filter_json(filter), "page_size": 1 }));
        let body: JsonValue = self.send(request).await?.json()?;
        let row = body
            .get("results")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| DestinationError::Malformed("query response without results".into()))?
            .first()
            .and_then(|page| page.get("id"))
            .and_then(JsonValue::as_str)
            .map(|id| RowId(id.to_string()));
        debug!(found = row.is_some(), "row lookup");
        Ok(row)
    }

    async fn create_row(&self, properties: &RowProperties) -> Result<RowId, DestinationError> {
        let request = self.request(Method::POST, "/pages").json(json!({
            "parent": { "database_id": self.config.database_id },
            "properties": properties_json(properties),
        }));
        let body: JsonValue = self.send(request).await?.json()?;
        body.get("id")
            .and_then(JsonValue::as_str)
            .map(|id| RowId(id.to_string()))
            .ok_or_else(|| DestinationError::Malformed("created page without id".into()))
    }

    async fn update_row(
        &self,
        row: &RowId,
        properties: &RowProperties,
    ) -> Result<(), DestinationError> {
        let request = self
            .request(Method::PATCH, &format!("/pages/{}", row.0))
            .json(json!({ "properties": properties_json(properties) }));
        self.send(request).await?;
        Ok(())
    }
}

/// Column name to type, from a `GET /databases/{id}` body.
pub fn parse_schema(body: &JsonValue) -> Result<SchemaDescriptor, DestinationError> {
    let properties = body
        .get("properties")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| DestinationError::Malformed("database without properties".into()))?;
    let columns = properties
        .iter()
        .map(|(name, prop)| {
            let wire = prop.get("type").and_then(JsonValue::as_str).unwrap_or_default();
            (name.clone(), ColumnType::from_wire(wire))
        })
        .collect::<BTreeMap<_, _>>();
    Ok(SchemaDescriptor::new(columns))
}

fn options_json(options: &[String]) -> JsonValue {
    JsonValue::Array(options.iter().map(|o| json!({ "name": o })).collect())
}

pub fn column_spec_json(spec: &ColumnSpec) -> Result<JsonValue, DestinationError> {
    let value = match &spec.column_type {
        ColumnType::Title => json!({ "title": {} }),
        ColumnType::RichText => json!({ "rich_text": {} }),
        ColumnType::Date => json!({ "date": {} }),
        ColumnType::Url => json!({ "url": {} }),
        ColumnType::Select => json!({ "select": { "options": options_json(&spec.options) } }),
        ColumnType::MultiSelect => {
            json!({ "multi_select": { "options": options_json(&spec.options) } })
        }
        ColumnType::Status => json!({ "status": { "options": options_json(&spec.options) } }),
        ColumnType::Unsupported(other) => {
            return Err(DestinationError::Message(format!(
                "unsupported column type {other}"
            )))
        }
    };
    Ok(value)
}

fn text_json(content: &str) -> JsonValue {
    if content.is_empty() {
        return json!([]);
    }
    json!([{ "type": "text", "text": { "content": content } }])
}

pub fn encoded_value_json(value: &EncodedValue) -> JsonValue {
    match value {
        EncodedValue::Title(s) => json!({ "title": text_json(s) }),
        EncodedValue::RichText(s) => json!({ "rich_text": text_json(s) }),
        EncodedValue::Select(s) if s.is_empty() => json!({ "select": null }),
        EncodedValue::Select(s) => json!({ "select": { "name": s } }),
        EncodedValue::MultiSelect(names) => {
            let options: Vec<JsonValue> = names
                .iter()
                .filter(|n| !n.is_empty())
                .map(|n| json!({ "name": n }))
                .collect();
            json!({ "multi_select": options })
        }
        EncodedValue::Status(s) => json!({ "status": { "name": s } }),
        EncodedValue::Date(s) => json!({ "date": { "start": s } }),
        EncodedValue::Url(s) if s.is_empty() => json!({ "url": null }),
        EncodedValue::Url(s) => json!({ "url": s }),
    }
}

pub fn properties_json(properties: &RowProperties) -> JsonValue {
    JsonValue::Object(
        properties
            .iter()
            .map(|(name, value)| (name.clone(), encoded_value_json(value)))
            .collect(),
    )
}

pub fn filter_json(filter: &RowFilter) -> JsonValue {
    match filter {
        RowFilter::Equals { column, value } => {
            let (kind, condition) = match value {
                EncodedValue::Title(s) => ("title", json!({ "equals": s })),
                EncodedValue::RichText(s) => ("rich_text", json!({ "equals": s })),
                EncodedValue::Select(s) => ("select", json!({ "equals": s })),
                EncodedValue::Status(s) => ("status", json!({ "equals": s })),
                EncodedValue::Date(s) => ("date", json!({ "equals": s })),
                EncodedValue::Url(s) => ("url", json!({ "equals": s })),
                EncodedValue::MultiSelect(names) => (
                    "multi_select",
                    json!({ "contains": names.first().cloned().unwrap_or_default() }),
                ),
            };
            let mut object = Map::new();
            object.insert("property".into(), json!(column));
            object.insert(kind.into(), condition);
            JsonValue::Object(object)
        }
        RowFilter::And(filters) => {
            json!({ "and": filters.iter().map(filter_json).collect::<Vec<_>>() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cns_storage::{BackoffPolicy, HttpClientConfig};
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NotionClient {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            ..Default::default()
        })
        .expect("fetcher");
        let mut config = NotionConfig::new("secret", "db1");
        config.api_base = server.uri();
        NotionClient::new(config, Arc::new(http))
    }

    #[test]
    fn schema_parse_keeps_unknown_types() {
        let body = json!({
            "properties": {
                "Task": {"id": "title", "type": "title", "title": {}},
                "Class": {"id": "a", "type": "rich_text", "rich_text": {}},
                "Points": {"id": "b", "type": "number", "number": {}}
            }
        });
        let schema = parse_schema(&body).expect("schema");
        assert_eq!(schema.column_type("Class"), Some(&ColumnType::RichText));
        assert_eq!(
            schema.column_type("Points"),
            Some(&ColumnType::Unsupported("number".into()))
        );
        assert!(parse_schema(&json!({})).is_err());
    }

    #[test]
    fn status_and_select_encode_differently() {
        assert_eq!(
            encoded_value_json(&EncodedValue::Status("DNF".into())),
            json!({"status": {"name": "DNF"}})
        );
        assert_eq!(
            encoded_value_json(&EncodedValue::Select("DNF".into())),
            json!({"select": {"name": "DNF"}})
        );
        assert_eq!(
            encoded_value_json(&EncodedValue::RichText("CSE 412".into())),
            json!({"rich_text": [{"type": "text", "text": {"content": "CSE 412"}}]})
        );
    }

    #[test]
    fn filter_uses_column_kind() {
        let filter = RowFilter::And(vec![
            RowFilter::equals("Task", EncodedValue::Title("HW3".into())),
            RowFilter::equals("Class", EncodedValue::Select("CSE 412".into())),
        ]);
        assert_eq!(
            filter_json(&filter),
            json!({"and": [
                {"property": "Task", "title": {"equals": "HW3"}},
                {"property": "Class", "select": {"equals": "CSE 412"}}
            ]})
        );
    }

    #[tokio::test]
    async fn find_row_queries_by_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .and(header("notion-version", DEFAULT_API_VERSION))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({
                "filter": {"property": "Key", "rich_text": {"equals": "42:555"}},
                "page_size": 1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "page-1"}], "has_more": false
            })))
            .mount(&server)
            .await;

        let filter = RowFilter::equals("Key", EncodedValue::RichText("42:555".into()));
        let row = client(&server).find_row(&filter).await.expect("find");
        assert_eq!(row, Some(RowId("page-1".into())));
    }

    #[tokio::test]
    async fn create_row_targets_database_parent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(body_json(json!({
                "parent": {"database_id": "db1"},
                "properties": {"Key": {"rich_text": [{"type": "text", "text": {"content": "1:2"}}]}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new-page"})))
            .mount(&server)
            .await;

        let mut props = RowProperties::new();
        props.insert("Key".into(), EncodedValue::RichText("1:2".into()));
        let row = client(&server).create_row(&props).await.expect("create");
        assert_eq!(row, RowId("new-page".into()));
    }

    #[tokio::test]
    async fn add_column_patches_database_properties() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/databases/db1"))
            .and(body_json(json!({
                "properties": {"Type": {"select": {"options": [
                    {"name": "Assignment"}, {"name": "Quiz"}, {"name": "Exam"}
                ]}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "db1"})))
            .expect(1)
            .mount(&server)
            .await;

        let spec = ColumnSpec::with_options(ColumnType::Select, &["Assignment", "Quiz", "Exam"]);
        client(&server).add_column("Type", &spec).await.expect("add");
    }

    #[tokio::test]
    async fn update_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/pages/page-9"))
            .respond_with(ResponseTemplate::new(400).set_body_string("validation_error"))
            .mount(&server)
            .await;

        let err = client(&server)
            .update_row(&RowId("page-9".into()), &RowProperties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DestinationError::Fetch(_)));
    }
}
