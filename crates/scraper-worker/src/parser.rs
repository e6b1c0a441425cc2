//! HTML extraction for listing and publication pages

use crate::errors::ScrapeError;
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use scholarflow_common::scholar::{Paper, ResearcherSnapshot};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

/// Fields extracted from one publication detail page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicationDetails {
    pub title: String,
    /// Detail page the fields were read from
    pub link: String,
    pub authors: Vec<String>,
    /// Year part of the publication date, empty when unknown
    pub publication_date: String,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub total_citations: u32,
    /// Outbound link behind the title
    pub publication_link: Option<String>,
    pub pdf_link: Option<String>,
}

impl PublicationDetails {
    /// Build the record persisted for a researcher's fetch cycle
    pub fn into_paper(
        self,
        researcher: ResearcherSnapshot,
        admin_id: Uuid,
        fetched_at: DateTime<Utc>,
    ) -> Paper {
        Paper {
            id: Uuid::new_v4(),
            researcher,
            admin_id: Some(admin_id),
            title: self.title,
            link: self.link,
            authors: self.authors,
            publication_date: self.publication_date,
            journal: self.journal,
            volume: self.volume,
            issue: self.issue,
            pages: self.pages,
            publisher: self.publisher,
            description: self.description,
            total_citations: self.total_citations,
            publication_link: self.publication_link,
            pdf_link: self.pdf_link,
            tags: Vec::new(),
            previous: Vec::new(),
            last_fetch: fetched_at,
        }
    }
}

/// Compiled selectors for the profile source's markup
pub struct ScholarParser {
    listing_table: Selector,
    listing_link: Selector,
    field_row: Selector,
    field_name: Selector,
    field_value: Selector,
    title: Selector,
    title_link: Selector,
    description: Selector,
    pdf_link: Selector,
    anchor: Selector,
    cited_by: Regex,
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::ConfigError(format!("invalid selector {}: {}", css, e)))
}

/// Whitespace-collapsed text content
fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ScholarParser {
    pub fn new() -> Result<Self, ScrapeError> {
        Ok(Self {
            listing_table: selector("#gsc_a_b")?,
            listing_link: selector("#gsc_a_b .gsc_a_t a")?,
            field_row: selector(".gs_scl")?,
            field_name: selector(".gsc_oci_field")?,
            field_value: selector(".gsc_oci_value")?,
            title: selector("#gsc_oci_title")?,
            title_link: selector("#gsc_oci_title a")?,
            description: selector("#gsc_oci_descr")?,
            pdf_link: selector("#gsc_vcpb .gsc_oci_title_ggi a")?,
            anchor: selector("a")?,
            cited_by: Regex::new(r"Cited by\s+(\d+)")
                .map_err(|e| ScrapeError::ConfigError(format!("invalid pattern: {}", e)))?,
        })
    }

    /// Publication links on one listing page, resolved against `origin`.
    ///
    /// An empty result marks the end of the listing: the publication table is
    /// there but holds no rows (past the last page, or the `td.gsc_a_e` "no
    /// articles" row of an empty profile). A page without the table at all is a
    /// block or error page and is rejected.
    pub fn listing_links(
        &self,
        html: &str,
        page_url: &Url,
        origin: &Url,
    ) -> Result<Vec<String>, ScrapeError> {
        let document = Html::parse_document(html);
        if document.select(&self.listing_table).next().is_none() {
            return Err(ScrapeError::Parse {
                url: page_url.to_string(),
                message: "listing page has no publication table".to_string(),
            });
        }

        Ok(document
            .select(&self.listing_link)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| origin.join(href).ok())
            .map(String::from)
            .collect())
    }

    /// Extract a publication from its detail page.
    ///
    /// A page without a title is rejected; every other field is optional.
    pub fn publication(
        &self,
        html: &str,
        page_url: &Url,
    ) -> Result<PublicationDetails, ScrapeError> {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ScrapeError::Parse {
                url: page_url.to_string(),
                message: "publication page has no title".to_string(),
            })?;

        // Field label -> value row, first occurrence wins
        let mut rows: HashMap<String, ElementRef<'_>> = HashMap::new();
        for row in document.select(&self.field_row) {
            let (Some(name), Some(value)) = (
                row.select(&self.field_name).next(),
                row.select(&self.field_value).next(),
            ) else {
                continue;
            };
            rows.entry(text_of(name)).or_insert(value);
        }
        let field = |name: &str| non_empty(rows.get(name).map(|v| text_of(*v)));

        let authors = field("Authors")
            .map(|a| {
                a.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let publication_date = field("Publication date")
            .and_then(|d| d.split('/').next().map(|y| y.trim().to_string()))
            .unwrap_or_default();

        let total_citations = rows
            .get("Total citations")
            .and_then(|value| value.select(&self.anchor).next())
            .and_then(|a| {
                self.cited_by
                    .captures(&text_of(a))
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
            })
            .unwrap_or(0);

        let resolve = |element: Option<ElementRef<'_>>| {
            element
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| page_url.join(href).ok())
                .map(String::from)
        };

        Ok(PublicationDetails {
            title,
            link: page_url.to_string(),
            authors,
            publication_date,
            journal: field("Journal"),
            volume: field("Volume"),
            issue: field("Issue"),
            pages: field("Pages"),
            publisher: field("Publisher"),
            description: non_empty(document.select(&self.description).next().map(text_of)),
            total_citations,
            publication_link: resolve(document.select(&self.title_link).next()),
            pdf_link: resolve(document.select(&self.pdf_link).next()),
        })
    }
}
