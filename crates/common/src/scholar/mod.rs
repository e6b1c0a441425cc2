//! Researcher and paper records
//!
//! Storage-agnostic domain types shared by both workers. The persistence layer
//! maps these to and from its own entities.

use crate::errors::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-bounded employment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub position: String,
    pub institute: String,
    pub current: bool,
}

/// A researcher tracked by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Researcher {
    pub id: Uuid,
    pub name: String,
    /// Identifier on the external profile source (unique)
    pub scholar_id: String,
    pub email: String,
    pub department: String,
    pub gender: String,
    pub verified: bool,
    /// Owning admin; `None` while released
    pub admin_id: Option<Uuid>,
    pub positions: Vec<Position>,
    pub previous_admins: Vec<Uuid>,
    pub total_papers: u32,
    pub h_index: u32,
    pub i10_index: u32,
    pub citations: u64,
    pub last_fetch: Option<DateTime<Utc>>,
}

impl Researcher {
    /// Check the employment history invariants.
    ///
    /// At most one position is current. Every non-current position has an end
    /// date on or after its start, and non-current `[start, end)` ranges do
    /// not overlap.
    pub fn validate_positions(&self) -> Result<()> {
        validate_positions(&self.positions)
    }

    /// Assign an owning admin. The previous owner, if any, moves to history.
    pub fn claim(&mut self, admin_id: Uuid) {
        if let Some(previous) = self.admin_id.replace(admin_id) {
            if previous != admin_id {
                self.previous_admins.push(previous);
            }
        }
    }

    /// Drop the owning admin, keeping them in history.
    pub fn release(&mut self) {
        if let Some(previous) = self.admin_id.take() {
            self.previous_admins.push(previous);
        }
    }

    /// Snapshot stamped onto papers at insertion time
    pub fn snapshot(&self) -> ResearcherSnapshot {
        ResearcherSnapshot {
            researcher_id: self.id,
            name: self.name.clone(),
            scholar_id: self.scholar_id.clone(),
            department: self.department.clone(),
        }
    }
}

pub fn validate_positions(positions: &[Position]) -> Result<()> {
    let current = positions.iter().filter(|p| p.current).count();
    if current > 1 {
        return Err(AppError::InvalidPositions {
            message: format!("{} positions are marked current", current),
        });
    }

    let mut closed = Vec::with_capacity(positions.len());
    for p in positions.iter().filter(|p| !p.current) {
        let end = p.end.ok_or_else(|| AppError::InvalidPositions {
            message: format!("position '{}' at {} has no end date", p.position, p.institute),
        })?;
        if p.start > end {
            return Err(AppError::InvalidPositions {
                message: format!(
                    "position '{}' at {} ends ({}) before it starts ({})",
                    p.position, p.institute, end, p.start
                ),
            });
        }
        closed.push((p.start, end, p));
    }

    closed.sort_by_key(|(start, _, _)| *start);
    for pair in closed.windows(2) {
        let (_, prev_end, prev) = pair[0];
        let (next_start, _, next) = pair[1];
        if next_start < prev_end {
            return Err(AppError::InvalidPositions {
                message: format!(
                    "position '{}' overlaps '{}' starting {}",
                    prev.position, next.position, next_start
                ),
            });
        }
    }

    Ok(())
}

/// Researcher fields denormalized onto each paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearcherSnapshot {
    pub researcher_id: Uuid,
    pub name: String,
    pub scholar_id: String,
    pub department: String,
}

/// A prior admin/department attribution of a paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub admin_id: Option<Uuid>,
    pub department: String,
}

/// A publication record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: Uuid,
    pub researcher: ResearcherSnapshot,
    pub admin_id: Option<Uuid>,
    pub title: String,
    /// Detail page on the profile source
    pub link: String,
    pub authors: Vec<String>,
    /// Publication year, empty when unknown
    pub publication_date: String,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub total_citations: u32,
    pub publication_link: Option<String>,
    pub pdf_link: Option<String>,
    pub tags: Vec<String>,
    pub previous: Vec<Attribution>,
    pub last_fetch: DateTime<Utc>,
}

impl Paper {
    /// Move the paper to a new owner and department, recording the old ones
    pub fn reattribute(&mut self, admin_id: Option<Uuid>, department: &str) {
        self.previous.push(Attribution {
            admin_id: self.admin_id,
            department: self.researcher.department.clone(),
        });
        self.admin_id = admin_id;
        self.researcher.department = department.to_string();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn closed(start: NaiveDate, end: NaiveDate, title: &str) -> Position {
        Position {
            start,
            end: Some(end),
            position: title.to_string(),
            institute: "IIT".to_string(),
            current: false,
        }
    }

    #[test]
    fn test_valid_history() {
        let positions = vec![
            closed(date(2010, 1, 1), date(2014, 6, 1), "Lecturer"),
            // Touching ranges are allowed: [start, end) is half-open
            closed(date(2014, 6, 1), date(2018, 1, 1), "Assistant Professor"),
            Position {
                start: date(2018, 1, 1),
                end: None,
                position: "Professor".to_string(),
                institute: "IIT".to_string(),
                current: true,
            },
        ];
        assert!(validate_positions(&positions).is_ok());
    }

    #[test]
    fn test_two_current_positions_rejected() {
        let mut a = closed(date(2010, 1, 1), date(2012, 1, 1), "A");
        let mut b = closed(date(2013, 1, 1), date(2014, 1, 1), "B");
        a.current = true;
        b.current = true;
        let err = validate_positions(&[a, b]).unwrap_err();
        assert!(matches!(err, AppError::InvalidPositions { .. }));
    }

    #[test]
    fn test_closed_position_needs_end() {
        let mut p = closed(date(2010, 1, 1), date(2012, 1, 1), "A");
        p.end = None;
        assert!(validate_positions(&[p]).is_err());
    }

    #[test]
    fn test_end_before_start_rejected() {
        let p = closed(date(2012, 1, 1), date(2010, 1, 1), "A");
        assert!(validate_positions(&[p]).is_err());
    }

    #[test]
    fn test_overlap_rejected() {
        let positions = vec![
            closed(date(2015, 1, 1), date(2019, 1, 1), "B"),
            closed(date(2010, 1, 1), date(2016, 1, 1), "A"),
        ];
        assert!(validate_positions(&positions).is_err());
    }

    #[test]
    fn test_claim_and_release_track_history() {
        let mut r = fixtures::researcher("Ada Lovelace", "CSE");
        let first = r.admin_id.unwrap();

        r.release();
        assert_eq!(r.admin_id, None);
        assert_eq!(r.previous_admins, vec![first]);

        let second = Uuid::new_v4();
        r.claim(second);
        assert_eq!(r.admin_id, Some(second));
        assert_eq!(r.previous_admins, vec![first]);

        let third = Uuid::new_v4();
        r.claim(third);
        assert_eq!(r.previous_admins, vec![first, second]);
    }

    #[test]
    fn test_reattribute_records_previous() {
        let r = fixtures::researcher("Alan Turing", "Maths");
        let mut paper = fixtures::paper(&r, "On Computable Numbers", 1000);
        let new_admin = Uuid::new_v4();

        paper.reattribute(Some(new_admin), "CSE");

        assert_eq!(paper.admin_id, Some(new_admin));
        assert_eq!(paper.researcher.department, "CSE");
        assert_eq!(
            paper.previous,
            vec![Attribution {
                admin_id: r.admin_id,
                department: "Maths".to_string()
            }]
        );
    }
}
