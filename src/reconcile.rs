use crate::grading::{classify, GradeLetter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_CREDITS: i64 = 3;
pub const DEFAULT_SEMESTER: &str = "Fall 2024";

/// One student's score and derived letter for one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    /// Store row id; `None` until the record has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub student_id: i64,
    pub course_id: i64,
    pub score: f64,
    pub grade: GradeLetter,
    pub credits: i64,
    pub semester: String,
}

/// Whether a field on a matched record keeps its stored value or is overwritten.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    Keep,
    Set(T),
}

impl<T> FieldUpdate<T> {
    pub fn from_option(v: Option<T>) -> Self {
        match v {
            Some(v) => FieldUpdate::Set(v),
            None => FieldUpdate::Keep,
        }
    }

    fn resolve(self, current: T) -> T {
        match self {
            FieldUpdate::Keep => current,
            FieldUpdate::Set(v) => v,
        }
    }
}

/// A single submission in a bulk batch. The score is always replaced; credits
/// and semester only when `Set`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub student_id: i64,
    pub score: f64,
    pub credits: FieldUpdate<i64>,
    pub semester: FieldUpdate<String>,
}

#[cfg(test)]
impl ScoreUpdate {
    pub fn score_only(student_id: i64, score: f64) -> Self {
        Self {
            student_id,
            score,
            credits: FieldUpdate::Keep,
            semester: FieldUpdate::Keep,
        }
    }
}

/// Values used for fields left as `Keep` when an update inserts a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertDefaults {
    pub credits: i64,
    pub semester: String,
}

impl Default for InsertDefaults {
    fn default() -> Self {
        Self {
            credits: DEFAULT_CREDITS,
            semester: DEFAULT_SEMESTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("{count} records exist for student {student_id} in course {course_id}")]
    DuplicateRecord {
        student_id: i64,
        course_id: i64,
        count: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub records: Vec<ScoreRecord>,
    /// Positions in `records` of pre-existing records whose values an update
    /// changed. A matched record written back unchanged is not listed.
    pub updated: Vec<usize>,
    /// Positions in `records` of appended records, in batch order.
    pub inserted: Vec<usize>,
}

/// Merge `updates` for `course_id` into `existing` using the built-in insert defaults.
pub fn reconcile(
    existing: &[ScoreRecord],
    course_id: i64,
    updates: &[ScoreUpdate],
) -> Result<Vec<ScoreRecord>, ReconcileError> {
    reconcile_with(existing, course_id, updates, &InsertDefaults::default()).map(|r| r.records)
}

pub fn reconcile_with(
    existing: &[ScoreRecord],
    course_id: i64,
    updates: &[ScoreUpdate],
    defaults: &InsertDefaults,
) -> Result<Reconciliation, ReconcileError> {
    let mut positions: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, r) in existing.iter().enumerate() {
        if r.course_id == course_id {
            positions.entry(r.student_id).or_default().push(i);
        }
    }

    // Integrity is checked for the whole batch before anything is merged.
    for u in updates {
        if let Some(p) = positions.get(&u.student_id) {
            if p.len() > 1 {
                return Err(ReconcileError::DuplicateRecord {
                    student_id: u.student_id,
                    course_id,
                    count: p.len(),
                });
            }
        }
    }

    let mut records = existing.to_vec();
    let mut slot: HashMap<i64, usize> = positions
        .into_iter()
        .map(|(student_id, p)| (student_id, p[0]))
        .collect();
    let mut updated: Vec<usize> = Vec::new();
    let mut inserted: Vec<usize> = Vec::new();

    for u in updates {
        let grade = classify(u.score);
        match slot.get(&u.student_id).copied() {
            Some(i) => {
                let r = &mut records[i];
                r.score = u.score;
                r.grade = grade;
                r.credits = u.credits.clone().resolve(r.credits);
                r.semester = u.semester.clone().resolve(std::mem::take(&mut r.semester));
                if i < existing.len() && !updated.contains(&i) {
                    updated.push(i);
                }
            }
            None => {
                let i = records.len();
                records.push(ScoreRecord {
                    id: None,
                    student_id: u.student_id,
                    course_id,
                    score: u.score,
                    grade,
                    credits: u.credits.clone().resolve(defaults.credits),
                    semester: u.semester.clone().resolve(defaults.semester.clone()),
                });
                slot.insert(u.student_id, i);
                inserted.push(i);
            }
        }
    }

    updated.retain(|&i| records[i] != existing[i]);
    updated.sort_unstable();
    Ok(Reconciliation {
        records,
        updated,
        inserted,
    })
}
