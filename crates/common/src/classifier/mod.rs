//! Topic classification client
//!
//! Tags are predicted by an external service:
//!
//! ```text
//! POST {base_url}/predict  {"title": "...", "description": "..."}
//! 200                      {"predicted_tags": ["...", ...]}
//! ```
//!
//! A non-2xx status or a body of any other shape is a hard failure for that
//! paper. There is no retry at this level.

use crate::config::ClassifierConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for tag prediction
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, title: &str, description: &str) -> Result<Vec<String>>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    predicted_tags: Vec<String>,
}

/// HTTP client for the prediction service
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/predict", base_url.trim_end_matches('/')),
        })
    }

    async fn predict(&self, title: &str, description: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&PredictRequest { title, description })
            .send()
            .await
            .map_err(|e| AppError::ClassifierError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ClassifierError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: PredictResponse = response.json().await.map_err(|e| AppError::ClassifierError {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result.predicted_tags)
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, title: &str, description: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        let result = self.predict(title, description).await;
        crate::metrics::record_classification(start.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

/// Mock classifier for testing
#[derive(Default)]
pub struct MockClassifier {
    tags: Vec<String>,
    failing_titles: HashSet<String>,
    latency: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockClassifier {
    /// Answers every call with `tags`
    pub fn new(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Fail calls for a paper with this title
    pub fn failing_on(mut self, title: &str) -> Self {
        self.failing_titles.insert(title.to_string());
        self
    }

    /// Hold every call for `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were in flight at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, title: &str, _description: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.failing_titles.contains(title) {
            return Err(AppError::ClassifierError {
                message: format!("API error 500 Internal Server Error: {}", title),
            });
        }
        Ok(self.tags.clone())
    }
}

/// Create the classifier described by configuration
pub fn create_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    Ok(Arc::new(HttpClassifier::new(
        &config.base_url,
        Duration::from_secs(config.timeout_secs),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response, returning the base URL and the raw request
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Read until the JSON body has arrived
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_predict_posts_title_and_description() {
        let (base, server) = serve_once("200 OK", r#"{"predicted_tags":["nlp","ml"]}"#).await;
        let classifier = HttpClassifier::new(&base, Duration::from_secs(5)).unwrap();

        let tags = classifier.classify("Attention", "Transformers").await.unwrap();
        assert_eq!(tags, vec!["nlp", "ml"]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /predict "));
        assert!(request.contains(r#""title":"Attention""#));
        assert!(request.contains(r#""description":"Transformers""#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let (base, _server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let classifier = HttpClassifier::new(&base, Duration::from_secs(5)).unwrap();

        let err = classifier.classify("t", "d").await.unwrap_err();
        assert!(matches!(err, AppError::ClassifierError { .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_failure() {
        let (base, _server) = serve_once("200 OK", r#"{"tags":["nlp"]}"#).await;
        let classifier = HttpClassifier::new(&base, Duration::from_secs(5)).unwrap();

        assert!(classifier.classify("t", "d").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_classifier_fails_selectively() {
        let classifier = MockClassifier::new(&["nlp"]).failing_on("bad");
        tokio_test::assert_ok!(classifier.classify("good", "").await);
        tokio_test::assert_err!(classifier.classify("bad", "").await);
        assert_eq!(classifier.calls(), 2);
    }
}
