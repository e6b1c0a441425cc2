//! Calculate cycle processor
//!
//! Recomputes a researcher's metrics from their stored papers, enriches every
//! paper with predicted tags and tells the owning admin when it is done.
//! Tagging is best effort: one paper failing never stops its siblings.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scholarflow_common::citation::CitationMetrics;
use scholarflow_common::classifier::Classifier;
use scholarflow_common::db::ScholarStore;
use scholarflow_common::errors::AppError;
use scholarflow_common::metrics::{self as telemetry, CycleMetrics};
use scholarflow_common::notify::Notifier;
use scholarflow_common::queue::{CalculateRequest, Delivery, DeliveryHandler, Settlement};
use scholarflow_common::scholar::Paper;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CalculateError {
    #[error("Researcher not found: {0}")]
    ResearcherNotFound(Uuid),

    #[error(transparent)]
    Pipeline(#[from] AppError),
}

impl CalculateError {
    pub fn is_transient(&self) -> bool {
        match self {
            CalculateError::ResearcherNotFound(_) => false,
            CalculateError::Pipeline(e) => e.is_transient(),
        }
    }
}

/// Outcome of a successful calculate cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculateReport {
    pub researcher_name: String,
    pub admin_id: Option<Uuid>,
    pub metrics: CitationMetrics,
    pub tagged: usize,
    pub failed: usize,
}

impl CalculateReport {
    pub fn notification_message(&self) -> String {
        if self.failed == 0 {
            format!(
                "Publications of {} are up to date: {} papers, h-index {}, i10-index {}",
                self.researcher_name,
                self.metrics.total_papers,
                self.metrics.h_index,
                self.metrics.i10_index
            )
        } else {
            format!(
                "Publications of {} are up to date: {} papers, h-index {}, i10-index {} ({} papers could not be tagged)",
                self.researcher_name,
                self.metrics.total_papers,
                self.metrics.h_index,
                self.metrics.i10_index,
                self.failed
            )
        }
    }
}

pub struct CalculateProcessor {
    store: Arc<dyn ScholarStore>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
    tag_concurrency: usize,
}

impl CalculateProcessor {
    pub fn new(
        store: Arc<dyn ScholarStore>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
        tag_concurrency: usize,
    ) -> Self {
        Self {
            store,
            classifier,
            notifier,
            tag_concurrency: tag_concurrency.max(1),
        }
    }

    /// Classify and tag every paper with at most `tag_concurrency` calls in flight.
    ///
    /// Returns `(tagged, failed)`.
    pub async fn tag_papers(&self, papers: &[Paper]) -> (usize, usize) {
        let outcomes: Vec<bool> = stream::iter(papers.to_vec())
            .map(|paper| {
                let classifier = self.classifier.clone();
                let store = self.store.clone();
                async move {
                    match tag_paper(classifier.as_ref(), store.as_ref(), &paper).await {
                        Ok(count) => {
                            info!(paper_id = %paper.id, tags = count, "Paper tagged");
                            true
                        }
                        Err(e) => {
                            warn!(paper_id = %paper.id, title = %paper.title, error = %e, "Failed to tag paper");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.tag_concurrency)
            .collect()
            .await;

        let tagged = outcomes.iter().filter(|ok| **ok).count();
        (tagged, outcomes.len() - tagged)
    }

    /// Run one calculate cycle, without the notification
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, researcher_id: Uuid) -> Result<CalculateReport, CalculateError> {
        let researcher = self
            .store
            .find_researcher(researcher_id)
            .await?
            .ok_or(CalculateError::ResearcherNotFound(researcher_id))?;

        let papers = self.store.find_papers_by_researcher(researcher_id).await?;
        info!(name = %researcher.name, papers = papers.len(), "Recomputing metrics");

        let counts: Vec<u32> = papers.iter().map(|p| p.total_citations).collect();
        let metrics = CitationMetrics::compute(&counts);
        let updated = self
            .store
            .upsert_researcher_metrics(researcher_id, &metrics, None)
            .await?;

        let stamped = self.store.stamp_department(researcher_id, &updated.department).await?;
        info!(department = %updated.department, stamped, "Department stamped on papers");

        let (tagged, failed) = self.tag_papers(&papers).await;
        if failed > 0 {
            warn!(tagged, failed, "Some papers could not be tagged");
        }

        Ok(CalculateReport {
            researcher_name: updated.name,
            admin_id: updated.admin_id,
            metrics,
            tagged,
            failed,
        })
    }

    async fn notify(&self, report: &CalculateReport) {
        let Some(admin_id) = report.admin_id else {
            warn!(name = %report.researcher_name, "Researcher has no owning admin, skipping notification");
            return;
        };

        let result = self
            .notifier
            .send_notification(admin_id, &report.notification_message())
            .await;
        telemetry::record_notification(result.is_ok());
        if let Err(e) = result {
            error!(admin_id = %admin_id, error = %e, "Error sending notification");
        }
    }
}

async fn tag_paper(
    classifier: &dyn Classifier,
    store: &dyn ScholarStore,
    paper: &Paper,
) -> Result<usize, AppError> {
    let description = paper.description.as_deref().unwrap_or_default();
    let tags = classifier.classify(&paper.title, description).await?;
    store.update_paper_tags(paper.id, &tags).await?;
    Ok(tags.len())
}

#[async_trait]
impl DeliveryHandler for CalculateProcessor {
    async fn handle(&self, delivery: Delivery) -> Settlement {
        let request = match delivery.decode::<CalculateRequest>() {
            Ok(request) => request,
            Err(e) => {
                error!(message_id = %delivery.id(), error = %e, "Rejecting malformed calculate request");
                if let Err(e) = delivery.nack().await {
                    error!(error = %e, "Failed to nack message");
                }
                return Settlement::Rejected;
            }
        };

        info!(
            queue = %delivery.queue(),
            researcher_id = %request.researcher_id,
            "Received calculate request"
        );

        let cycle = CycleMetrics::start("calculate");
        match self.run_cycle(request.researcher_id).await {
            Ok(report) => {
                cycle.finish(true);
                // Acknowledged once the notification attempt is over, whatever its outcome
                self.notify(&report).await;
                if let Err(e) = delivery.ack().await {
                    error!(researcher_id = %request.researcher_id, error = %e, "Failed to ack message");
                }
                Settlement::Acked
            }
            Err(e) => {
                cycle.finish(false);
                if e.is_transient() {
                    warn!(
                        researcher_id = %request.researcher_id,
                        error = %e,
                        "Calculate cycle failed on an infrastructure error, dropping message"
                    );
                } else {
                    error!(
                        researcher_id = %request.researcher_id,
                        error = %e,
                        "Calculate cycle failed, dropping message"
                    );
                }
                if let Err(e) = delivery.nack().await {
                    error!(error = %e, "Failed to nack message");
                }
                Settlement::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scholarflow_common::classifier::MockClassifier;
    use scholarflow_common::db::InMemoryStore;
    use scholarflow_common::notify::RecordingNotifier;
    use scholarflow_common::queue::{InMemoryChannel, MessageChannel, PipelinePayload};
    use scholarflow_common::scholar::{Researcher, ResearcherSnapshot};

    const QUEUE: &str = "calculations-queue";

    fn researcher(department: &str) -> Researcher {
        Researcher {
            id: Uuid::new_v4(),
            name: "Barbara Liskov".to_string(),
            scholar_id: "liskovAAAAJ".to_string(),
            email: "liskov@example.edu".to_string(),
            department: department.to_string(),
            gender: "female".to_string(),
            verified: true,
            admin_id: Some(Uuid::new_v4()),
            positions: Vec::new(),
            previous_admins: Vec::new(),
            total_papers: 0,
            h_index: 0,
            i10_index: 0,
            citations: 0,
            last_fetch: None,
        }
    }

    fn paper(researcher: &Researcher, title: &str, citations: u32, department: &str) -> Paper {
        Paper {
            id: Uuid::new_v4(),
            researcher: ResearcherSnapshot {
                researcher_id: researcher.id,
                name: researcher.name.clone(),
                scholar_id: researcher.scholar_id.clone(),
                department: department.to_string(),
            },
            admin_id: researcher.admin_id,
            title: title.to_string(),
            link: format!("https://scholar.example/{}", title),
            authors: vec![researcher.name.clone()],
            publication_date: "1987".to_string(),
            journal: None,
            volume: None,
            issue: None,
            pages: None,
            publisher: None,
            description: Some(format!("About {}", title)),
            total_citations: citations,
            publication_link: None,
            pdf_link: None,
            tags: Vec::new(),
            previous: Vec::new(),
            last_fetch: Utc::now(),
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        classifier: Arc<MockClassifier>,
        notifier: Arc<RecordingNotifier>,
        channel: Arc<InMemoryChannel>,
        processor: CalculateProcessor,
    }

    fn harness(classifier: MockClassifier, notifier: RecordingNotifier) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let classifier = Arc::new(classifier);
        let notifier = Arc::new(notifier);
        let processor =
            CalculateProcessor::new(store.clone(), classifier.clone(), notifier.clone(), 4);
        Harness {
            store,
            classifier,
            notifier,
            channel: Arc::new(InMemoryChannel::new()),
            processor,
        }
    }

    impl Harness {
        async fn deliver(&self, body: String) -> Settlement {
            self.channel.publish(QUEUE, body).await.unwrap();
            let dyn_channel: Arc<dyn MessageChannel> = self.channel.clone();
            let message = dyn_channel.receive(QUEUE, 1).await.unwrap().remove(0);
            self.processor.handle(Delivery::new(QUEUE, message, dyn_channel)).await
        }

        async fn calculate(&self, researcher_id: Uuid) -> Settlement {
            self.deliver(CalculateRequest { researcher_id }.encode().unwrap()).await
        }
    }

    #[tokio::test]
    async fn test_calculate_tags_every_paper_and_notifies_once() {
        let h = harness(MockClassifier::new(&["nlp"]), RecordingNotifier::new());
        let r = researcher("CSE");
        h.store.insert_researcher(r.clone()).await;
        h.store
            .insert_papers(&[paper(&r, "CLU", 12, "CSE"), paper(&r, "Liskov substitution", 30, "CSE")])
            .await
            .unwrap();

        assert_eq!(h.calculate(r.id).await, Settlement::Acked);

        let papers = h.store.find_papers_by_researcher(r.id).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert!(papers.iter().all(|p| p.tags == vec!["nlp".to_string()]));

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, r.admin_id.unwrap());
        assert!(sent[0].1.contains("Barbara Liskov"));

        let updated = h.store.find_researcher(r.id).await.unwrap().unwrap();
        assert_eq!(updated.total_papers, 2);
        assert_eq!(updated.i10_index, 2);
        assert_eq!(h.channel.ack_count(QUEUE), 1);
    }

    #[tokio::test]
    async fn test_one_failing_classification_spares_siblings() {
        let h = harness(MockClassifier::new(&["systems"]).failing_on("B"), RecordingNotifier::new());
        let r = researcher("CSE");
        h.store.insert_researcher(r.clone()).await;
        h.store
            .insert_papers(&[paper(&r, "A", 1, "CSE"), paper(&r, "B", 2, "CSE"), paper(&r, "C", 3, "CSE")])
            .await
            .unwrap();

        let report = h.processor.run_cycle(r.id).await.unwrap();
        assert_eq!((report.tagged, report.failed), (2, 1));
        assert_eq!(h.classifier.calls(), 3);

        for p in h.store.find_papers_by_researcher(r.id).await.unwrap() {
            if p.title == "B" {
                assert!(p.tags.is_empty());
            } else {
                assert_eq!(p.tags, vec!["systems"]);
            }
        }
    }

    #[tokio::test]
    async fn test_tagging_stays_within_concurrency() {
        let classifier = MockClassifier::new(&["ml"]).with_latency(std::time::Duration::from_millis(10));
        let h = harness(classifier, RecordingNotifier::new());
        let r = researcher("CSE");
        h.store.insert_researcher(r.clone()).await;
        let papers: Vec<Paper> = (0..12).map(|i| paper(&r, &format!("P{}", i), i, "CSE")).collect();
        h.store.insert_papers(&papers).await.unwrap();

        let (tagged, failed) = h.processor.tag_papers(&papers).await;

        assert_eq!((tagged, failed), (12, 0));
        assert!(h.classifier.peak() <= 4, "peak {} over limit", h.classifier.peak());
        assert!(h.classifier.peak() > 1);
    }

    #[test]
    fn test_missing_researcher_is_not_transient() {
        assert!(!CalculateError::ResearcherNotFound(Uuid::new_v4()).is_transient());
        let err: CalculateError = AppError::DatabaseConnection {
            message: "connection reset".to_string(),
        }
        .into();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_department_restamped_and_last_fetch_kept() {
        let h = harness(MockClassifier::new(&[]), RecordingNotifier::new());
        let mut r = researcher("EECS");
        let fetched_at = Utc::now();
        r.last_fetch = Some(fetched_at);
        h.store.insert_researcher(r.clone()).await;
        h.store.insert_papers(&[paper(&r, "Old dept", 4, "Maths")]).await.unwrap();

        h.processor.run_cycle(r.id).await.unwrap();

        let papers = h.store.find_papers_by_researcher(r.id).await.unwrap();
        assert_eq!(papers[0].researcher.department, "EECS");
        let updated = h.store.find_researcher(r.id).await.unwrap().unwrap();
        assert_eq!(updated.last_fetch, Some(fetched_at));
    }

    #[tokio::test]
    async fn test_notification_failure_still_acks() {
        let h = harness(MockClassifier::new(&["nlp"]), RecordingNotifier::failing());
        let r = researcher("CSE");
        h.store.insert_researcher(r.clone()).await;

        assert_eq!(h.calculate(r.id).await, Settlement::Acked);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.channel.ack_count(QUEUE), 1);
        assert_eq!(h.channel.nack_count(QUEUE), 0);
    }

    #[tokio::test]
    async fn test_released_researcher_skips_notification() {
        let h = harness(MockClassifier::new(&["nlp"]), RecordingNotifier::new());
        let mut r = researcher("CSE");
        r.release();
        h.store.insert_researcher(r.clone()).await;

        assert_eq!(h.calculate(r.id).await, Settlement::Acked);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_researcher_nacks() {
        let h = harness(MockClassifier::new(&["nlp"]), RecordingNotifier::new());

        assert_eq!(h.calculate(Uuid::new_v4()).await, Settlement::Rejected);
        assert_eq!(h.channel.nack_count(QUEUE), 1);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_nacks() {
        let h = harness(MockClassifier::new(&["nlp"]), RecordingNotifier::new());

        assert_eq!(h.deliver("{}".to_string()).await, Settlement::Rejected);
        assert_eq!(h.channel.nack_count(QUEUE), 1);
    }

    #[test]
    fn test_notification_message_mentions_failures() {
        let report = CalculateReport {
            researcher_name: "Barbara Liskov".to_string(),
            admin_id: None,
            metrics: CitationMetrics::compute(&[12, 30]),
            tagged: 1,
            failed: 1,
        };
        let message = report.notification_message();
        assert!(message.contains("2 papers"));
        assert!(message.contains("1 papers could not be tagged"));
    }
}
