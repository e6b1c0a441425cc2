//! Fetch cycle processor
//!
//! Turns one fetch request into a persisted set of papers plus refreshed
//! researcher metrics, then hands the researcher to the calculate stage.

use crate::errors::ScrapeError;
use crate::parser::PublicationDetails;
use crate::source::ScholarSource;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use scholarflow_common::citation::CitationMetrics;
use scholarflow_common::db::ScholarStore;
use scholarflow_common::metrics::{self as telemetry, CycleMetrics};
use scholarflow_common::queue::{
    publish_message, CalculateRequest, Delivery, DeliveryHandler, FetchRequest, MessageChannel,
    PipelineMessage, QueueNames, Settlement,
};
use scholarflow_common::scholar::ResearcherSnapshot;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Listing pages requested before a cycle gives up on reaching the end
const MAX_LISTING_PAGES: usize = 200;

/// Outcome of a successful fetch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub links: usize,
    pub papers: usize,
    pub metrics: CitationMetrics,
}

pub struct ScrapeProcessor {
    source: Arc<dyn ScholarSource>,
    store: Arc<dyn ScholarStore>,
    channel: Arc<dyn MessageChannel>,
    queues: QueueNames,
    replace_existing: bool,
}

impl ScrapeProcessor {
    pub fn new(
        source: Arc<dyn ScholarSource>,
        store: Arc<dyn ScholarStore>,
        channel: Arc<dyn MessageChannel>,
        queues: QueueNames,
        replace_existing: bool,
    ) -> Self {
        Self {
            source,
            store,
            channel,
            queues,
            replace_existing,
        }
    }

    /// Walk the listing until a page yields no links
    pub async fn collect_links(&self, scholar_id: &str) -> Result<Vec<String>, ScrapeError> {
        let page_size = self.source.page_size();
        let mut links = Vec::new();
        let mut offset = 0;

        for _ in 0..MAX_LISTING_PAGES {
            debug!(scholar_id, offset, "Fetching listing page");
            let page = self.source.listing_page(scholar_id, offset).await?;
            telemetry::record_listing_page(page.len());

            if page.is_empty() {
                return Ok(links);
            }
            links.extend(page);
            offset += page_size;
        }

        warn!(
            scholar_id,
            pages = MAX_LISTING_PAGES,
            links = links.len(),
            "Listing did not end, keeping the links collected so far"
        );
        Ok(links)
    }

    /// Fetch every detail page, dropping the ones that fail
    pub async fn fetch_details(&self, links: &[String]) -> Vec<PublicationDetails> {
        let concurrency = self.source.concurrency().max(1);

        let results: Vec<Option<PublicationDetails>> = stream::iter(links.to_vec())
            .map(|link| {
                let source = self.source.clone();
                async move {
                    let start = Instant::now();
                    match source.publication(&link).await {
                        Ok(details) => {
                            telemetry::record_detail_fetch(start.elapsed().as_secs_f64(), true);
                            Some(details)
                        }
                        Err(e) => {
                            telemetry::record_detail_fetch(start.elapsed().as_secs_f64(), false);
                            warn!(link = %link, error = %e, "Error fetching publication details");
                            None
                        }
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Run one fetch cycle up to and including persistence
    #[instrument(
        skip(self, request),
        fields(
            researcher_id = %request.researcher.researcher_id,
            scholar_id = %request.researcher.scholar_id
        )
    )]
    pub async fn run_cycle(&self, request: &FetchRequest) -> Result<FetchReport, ScrapeError> {
        let researcher = &request.researcher;
        info!(name = %researcher.name, "Fetching papers");

        let links = self.collect_links(&researcher.scholar_id).await?;
        let details = self.fetch_details(&links).await;
        info!(
            links = links.len(),
            fetched = details.len(),
            "Fetched publication details"
        );

        // Nothing usable came back; keep the stored papers and metrics as they are
        if !links.is_empty() && details.is_empty() {
            return Err(ScrapeError::NoPublications {
                scholar_id: researcher.scholar_id.clone(),
                links: links.len(),
            });
        }

        let counts: Vec<u32> = details.iter().map(|d| d.total_citations).collect();
        let metrics = CitationMetrics::compute(&counts);
        let fetched_at = Utc::now();

        let updated = self
            .store
            .upsert_researcher_metrics(researcher.researcher_id, &metrics, Some(fetched_at))
            .await?;

        let snapshot = ResearcherSnapshot {
            researcher_id: researcher.researcher_id,
            name: researcher.name.clone(),
            scholar_id: researcher.scholar_id.clone(),
            department: updated.department,
        };
        let papers: Vec<_> = details
            .into_iter()
            .map(|d| d.into_paper(snapshot.clone(), request.admin_id, fetched_at))
            .collect();

        info!(count = papers.len(), "Inserting papers");
        let inserted = if self.replace_existing {
            self.store.replace_papers(researcher.researcher_id, &papers).await?
        } else {
            self.store.insert_papers(&papers).await?
        };
        telemetry::record_papers_persisted(inserted);

        Ok(FetchReport {
            links: links.len(),
            papers: inserted,
            metrics,
        })
    }
}

#[async_trait]
impl DeliveryHandler for ScrapeProcessor {
    async fn handle(&self, delivery: Delivery) -> Settlement {
        let request = match delivery.decode::<FetchRequest>() {
            Ok(request) => request,
            Err(e) => {
                error!(message_id = %delivery.id(), error = %e, "Rejecting malformed fetch request");
                if let Err(e) = delivery.nack().await {
                    error!(error = %e, "Failed to nack message");
                }
                return Settlement::Rejected;
            }
        };
        let researcher_id = request.researcher.researcher_id;

        let cycle = CycleMetrics::start("fetch");
        match self.run_cycle(&request).await {
            Ok(report) => {
                cycle.finish(true);
                info!(
                    researcher_id = %researcher_id,
                    papers = report.papers,
                    h_index = report.metrics.h_index,
                    i10_index = report.metrics.i10_index,
                    "Fetch cycle complete"
                );

                if let Err(e) = delivery.ack().await {
                    error!(researcher_id = %researcher_id, error = %e, "Failed to ack message");
                }

                let next: PipelineMessage = CalculateRequest { researcher_id }.into();
                if let Err(e) = publish_message(self.channel.as_ref(), &self.queues, &next).await {
                    error!(researcher_id = %researcher_id, error = %e, "Failed to publish calculate request");
                }
                Settlement::Acked
            }
            Err(e) => {
                cycle.finish(false);
                if e.is_transient() {
                    warn!(
                        researcher_id = %researcher_id,
                        error = %e,
                        "Fetch cycle failed on an upstream error, dropping message"
                    );
                } else {
                    error!(
                        researcher_id = %researcher_id,
                        error = %e,
                        "Fetch cycle failed, dropping message"
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
