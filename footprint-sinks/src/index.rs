//! HTTP document index.
//!
//! Documents are posted to `{base_url}/{destination}/_doc`, which is the
//! single-document endpoint of Elasticsearch/OpenSearch-style engines.

use std::time::Duration;

use async_trait::async_trait;
use footprint_core::{IndexConfig, IndexError, SearchIndex};
use tracing::{debug, trace};

use crate::error::Result;

/// [`SearchIndex`] that talks to a document index over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSearchIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchIndex {
    /// Create a client for the index at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, ?timeout, "Created HTTP search index client");
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.timeout)
    }

    /// URL a document for `destination` is posted to.
    pub fn document_url(&self, destination: &str) -> String {
        format!("{}/{}/_doc", self.base_url, destination)
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn index_document(
        &self,
        destination: &str,
        document: &serde_json::Value,
    ) -> std::result::Result<(), IndexError> {
        let url = self.document_url(destination);

        let response = self
            .client
            .post(&url)
            .json(document)
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        trace!(url = %url, status = status.as_u16(), "Indexed document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::json;

    use super::*;

    type Received = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn accept(
        State(received): State<Received>,
        Path(index): Path<String>,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> StatusCode {
        received.lock().unwrap().push((index, body));
        StatusCode::CREATED
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn document_url_strips_trailing_slash() {
        let index = HttpSearchIndex::new("http://search:9200/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            index.document_url("activity-2023-10-25"),
            "http://search:9200/activity-2023-10-25/_doc"
        );
    }

    #[tokio::test]
    async fn posts_document_to_destination() {
        let received = Received::default();
        let router = Router::new()
            .route("/:index/_doc", post(accept))
            .with_state(Arc::clone(&received));
        let base = serve(router).await;

        let index = HttpSearchIndex::new(base, Duration::from_secs(2)).unwrap();
        index
            .index_document("activity-2023-10-25", &json!({"actorId": "u1"}))
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "activity-2023-10-25");
        assert_eq!(received[0].1["actorId"], "u1");
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let router = Router::new().route(
            "/:index/_doc",
            post(|| async { (StatusCode::BAD_REQUEST, "mapper_parsing_exception") }),
        );
        let base = serve(router).await;

        let index = HttpSearchIndex::new(base, Duration::from_secs(2)).unwrap();
        let err = index
            .index_document("activity-2023-10-25", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IndexError::Rejected { status: 400, ref body } if body == "mapper_parsing_exception"
        ));
    }

    #[tokio::test]
    async fn unreachable_index_is_reported() {
        // Port 1 is never a search index
        let index = HttpSearchIndex::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = index
            .index_document("activity-2023-10-25", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::Unreachable(_)));
    }
}
