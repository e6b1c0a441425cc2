//! External profile source

use crate::errors::ScrapeError;
use crate::parser::{PublicationDetails, ScholarParser};
use crate::pool::FetchPool;
use async_trait::async_trait;
use scholarflow_common::config::ScraperConfig;
use url::Url;

/// Paginated listing plus per-publication detail pages
#[async_trait]
pub trait ScholarSource: Send + Sync {
    /// Links on the listing page starting at `offset`; empty past the end
    async fn listing_page(
        &self,
        scholar_id: &str,
        offset: usize,
    ) -> Result<Vec<String>, ScrapeError>;

    async fn publication(&self, link: &str) -> Result<PublicationDetails, ScrapeError>;

    /// Links per listing page, also the pagination stride
    fn page_size(&self) -> usize;

    /// Detail fetches worth keeping in flight at once
    fn concurrency(&self) -> usize;
}

/// Source backed by HTTP requests through the fetch pool
pub struct HttpScholarSource {
    pool: FetchPool,
    parser: ScholarParser,
    listing_url: Url,
    origin: Url,
    language: String,
    page_size: usize,
}

impl HttpScholarSource {
    pub fn new(config: &ScraperConfig, pool: FetchPool) -> Result<Self, ScrapeError> {
        Ok(Self {
            pool,
            parser: ScholarParser::new()?,
            listing_url: Url::parse(&config.listing_url)?,
            origin: Url::parse(&config.source_origin)?,
            language: config.language.clone(),
            page_size: config.page_size.max(1),
        })
    }

    /// `<listing>?user=<id>&hl=<lang>&cstart=<offset>&pagesize=<n>`
    pub fn listing_url(&self, scholar_id: &str, offset: usize) -> Url {
        let mut url = self.listing_url.clone();
        url.query_pairs_mut()
            .append_pair("user", scholar_id)
            .append_pair("hl", &self.language)
            .append_pair("cstart", &offset.to_string())
            .append_pair("pagesize", &self.page_size.to_string());
        url
    }
}

#[async_trait]
impl ScholarSource for HttpScholarSource {
    async fn listing_page(
        &self,
        scholar_id: &str,
        offset: usize,
    ) -> Result<Vec<String>, ScrapeError> {
        let url = self.listing_url(scholar_id, offset);
        let listing_error = |e: ScrapeError| ScrapeError::Listing {
            scholar_id: scholar_id.to_string(),
            offset,
            message: e.to_string(),
        };
        let html = self.pool.get(&url).await.map_err(listing_error)?;
        self.parser.listing_links(&html, &url, &self.origin).map_err(listing_error)
    }

    async fn publication(&self, link: &str) -> Result<PublicationDetails, ScrapeError> {
        let url = Url::parse(link)?;
        let html = self.pool.get(&url).await?;
        self.parser.publication(&html, &url)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn concurrency(&self) -> usize {
        self.pool.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url() {
        let config = ScraperConfig::default();
        let source = HttpScholarSource::new(&config, FetchPool::new(&config).unwrap()).unwrap();

        let url = source.listing_url("qc6CJjYAAAAJ", 200);
        assert_eq!(
            url.as_str(),
            "https://scholar.google.co.in/citations?user=qc6CJjYAAAAJ&hl=en&cstart=200&pagesize=100"
        );
    }
}
