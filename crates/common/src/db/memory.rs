//! In-memory store for tests and local runs

use crate::citation::CitationMetrics;
use crate::db::ScholarStore;
use crate::errors::{AppError, Result};
use crate::scholar::{Paper, Researcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    researchers: RwLock<HashMap<Uuid, Researcher>>,
    papers: RwLock<Vec<Paper>>,
    fail_inserts: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_researcher(&self, researcher: Researcher) {
        self.researchers.write().await.insert(researcher.id, researcher);
    }

    /// Make every subsequent paper insert fail
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn paper_count(&self) -> usize {
        self.papers.read().await.len()
    }
}

#[async_trait]
impl ScholarStore for InMemoryStore {
    async fn find_researcher(&self, id: Uuid) -> Result<Option<Researcher>> {
        Ok(self.researchers.read().await.get(&id).cloned())
    }

    async fn find_papers_by_researcher(&self, researcher_id: Uuid) -> Result<Vec<Paper>> {
        let mut papers: Vec<Paper> = self
            .papers
            .read()
            .await
            .iter()
            .filter(|p| p.researcher.researcher_id == researcher_id)
            .cloned()
            .collect();
        papers.sort_by(|a, b| b.total_citations.cmp(&a.total_citations));
        Ok(papers)
    }

    async fn upsert_researcher_metrics(
        &self,
        researcher_id: Uuid,
        metrics: &CitationMetrics,
        last_fetch: Option<DateTime<Utc>>,
    ) -> Result<Researcher> {
        let mut researchers = self.researchers.write().await;
        let researcher = researchers
            .get_mut(&researcher_id)
            .ok_or(AppError::ResearcherNotFound { id: researcher_id })?;

        researcher.total_papers = metrics.total_papers;
        researcher.h_index = metrics.h_index;
        researcher.i10_index = metrics.i10_index;
        researcher.citations = metrics.total_citations;
        if last_fetch.is_some() {
            researcher.last_fetch = last_fetch;
        }
        Ok(researcher.clone())
    }

    async fn insert_papers(&self, papers: &[Paper]) -> Result<usize> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Internal {
                message: "insert rejected by store".to_string(),
            });
        }
        self.papers.write().await.extend_from_slice(papers);
        Ok(papers.len())
    }

    async fn purge_papers(&self, researcher_id: Uuid) -> Result<u64> {
        let mut papers = self.papers.write().await;
        let before = papers.len();
        papers.retain(|p| p.researcher.researcher_id != researcher_id);
        Ok((before - papers.len()) as u64)
    }

    async fn update_paper_tags(&self, paper_id: Uuid, tags: &[String]) -> Result<()> {
        let mut papers = self.papers.write().await;
        let paper = papers
            .iter_mut()
            .find(|p| p.id == paper_id)
            .ok_or(AppError::PaperNotFound { id: paper_id })?;
        paper.tags = tags.to_vec();
        Ok(())
    }

    async fn stamp_department(&self, researcher_id: Uuid, department: &str) -> Result<u64> {
        let mut stamped = 0;
        for paper in self
            .papers
            .write()
            .await
            .iter_mut()
            .filter(|p| p.researcher.researcher_id == researcher_id)
        {
            paper.researcher.department = department.to_string();
            stamped += 1;
        }
        Ok(stamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scholar::fixtures;

    #[tokio::test]
    async fn test_upsert_unknown_researcher() {
        let store = InMemoryStore::new();
        let err = store
            .upsert_researcher_metrics(Uuid::new_v4(), &CitationMetrics::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResearcherNotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_keeps_last_fetch_when_absent() {
        let store = InMemoryStore::new();
        let r = fixtures::researcher("Ada Lovelace", "CSE");
        let id = r.id;
        store.insert_researcher(r).await;

        let fetched_at = Utc::now();
        let metrics = CitationMetrics::compute(&[10, 8, 5, 4, 3]);
        store.upsert_researcher_metrics(id, &metrics, Some(fetched_at)).await.unwrap();

        let updated = store.upsert_researcher_metrics(id, &metrics, None).await.unwrap();
        assert_eq!(updated.last_fetch, Some(fetched_at));
        assert_eq!(updated.h_index, 4);
        assert_eq!(updated.total_papers, 5);
    }

    #[tokio::test]
    async fn test_replace_papers_purges_only_that_researcher() {
        let store = InMemoryStore::new();
        let a = fixtures::researcher("Ada Lovelace", "CSE");
        let b = fixtures::researcher("Alan Turing", "Maths");

        store
            .insert_papers(&[fixtures::paper(&a, "old", 1), fixtures::paper(&b, "other", 2)])
            .await
            .unwrap();
        store
            .replace_papers(a.id, &[fixtures::paper(&a, "new 1", 3), fixtures::paper(&a, "new 2", 4)])
            .await
            .unwrap();

        let titles: Vec<String> = store
            .find_papers_by_researcher(a.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["new 2", "new 1"]);
        assert_eq!(store.find_papers_by_researcher(b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_tags_and_stamp_department() {
        let store = InMemoryStore::new();
        let r = fixtures::researcher("Grace Hopper", "CSE");
        let paper = fixtures::paper(&r, "COBOL", 50);
        let paper_id = paper.id;
        store.insert_papers(&[paper]).await.unwrap();

        store.update_paper_tags(paper_id, &["compilers".to_string()]).await.unwrap();
        assert_eq!(store.stamp_department(r.id, "EE").await.unwrap(), 1);

        let papers = store.find_papers_by_researcher(r.id).await.unwrap();
        assert_eq!(papers[0].tags, vec!["compilers"]);
        assert_eq!(papers[0].researcher.department, "EE");

        assert!(store.update_paper_tags(Uuid::new_v4(), &[]).await.is_err());
    }
}
