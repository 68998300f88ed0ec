use std::collections::HashMap;

use clap::ValueEnum;
use serde::Serialize;

use crate::error::DashboardError;
use crate::models::{
    CalendarRecord, FactRow, LetterGrade, MonthKey, QuarterKey, RawDataset, PASS_MARK,
};

pub const UNKNOWN_MEMBER: &str = "Unknown";

/// Which score counts as "perfect". `Auto` infers it from the unfiltered
/// maximum: 100 when any score exceeds 1.0, otherwise 1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
pub enum ScoreScale {
    #[default]
    Auto,
    Percent,
    Unit,
}

#[derive(Debug, Clone, Copy)]
struct CalendarEntry {
    quarter: QuarterKey,
    month: MonthKey,
}

/// The flattened exam table. Built once, never mutated; share it behind an `Arc`.
#[derive(Debug)]
pub struct FactTable {
    rows: Vec<FactRow>,
    max_score: f64,
    scale: ScoreScale,
    month_parents: HashMap<MonthKey, QuarterKey>,
}

impl FactTable {
    /// Joins the star schema into fact rows. Facts with an unknown student or
    /// subject keep an `Unknown` member; facts with an unknown DateKey stay in
    /// the table without a quarter or month.
    pub fn build(raw: RawDataset, scale: ScoreScale) -> Result<Self, DashboardError> {
        let calendar = index_calendar(&raw.calendar)?;

        let mut levels: HashMap<&str, &str> = HashMap::new();
        for student in &raw.students {
            levels
                .entry(student.student_id.as_str())
                .or_insert(student.grade_level.as_str());
        }

        let mut subjects: HashMap<&str, &str> = HashMap::new();
        for subject in &raw.subjects {
            subjects
                .entry(subject.subject_id.as_str())
                .or_insert(subject.subject_name.as_str());
        }

        if raw.facts.is_empty() {
            return Err(DashboardError::EmptyDataset);
        }

        let mut rows = Vec::with_capacity(raw.facts.len());
        let mut undated = 0usize;

        for fact in &raw.facts {
            let entry = calendar.get(&fact.date_key);
            if entry.is_none() {
                undated += 1;
            }

            let weight = fact.weight.unwrap_or(1.0);
            rows.push(FactRow {
                student_id: fact.student_id.clone(),
                subject_id: fact.subject_id.clone(),
                subject_name: subjects
                    .get(fact.subject_id.as_str())
                    .unwrap_or(&UNKNOWN_MEMBER)
                    .to_string(),
                date_key: fact.date_key,
                quarter: entry.map(|entry| entry.quarter),
                month: entry.map(|entry| entry.month),
                level: levels
                    .get(fact.student_id.as_str())
                    .unwrap_or(&UNKNOWN_MEMBER)
                    .to_string(),
                score: fact.score,
                weight,
                weighted_score: fact.score * weight,
                passed: fact.score >= PASS_MARK,
                letter_grade: LetterGrade::from_score(fact.score),
            });
        }

        if undated > 0 {
            tracing::warn!(undated, "exam records reference a DateKey missing from the calendar");
        }

        let table = Self::from_rows(rows, scale);
        tracing::info!(
            rows = table.len(),
            students = raw.students.len(),
            subjects = raw.subjects.len(),
            max_score = table.max_score,
            "fact table built"
        );
        Ok(table)
    }

    pub fn from_rows(rows: Vec<FactRow>, scale: ScoreScale) -> Self {
        let max_score = rows
            .iter()
            .map(|row| row.score)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut month_parents = HashMap::new();
        for row in &rows {
            if let (Some(month), Some(quarter)) = (row.month, row.quarter) {
                month_parents.entry(month).or_insert(quarter);
            }
        }

        Self {
            rows,
            max_score,
            scale,
            month_parents,
        }
    }

    pub fn rows(&self) -> &[FactRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Score compared (exactly) against when counting perfect scores.
    pub fn perfect_score_target(&self) -> f64 {
        match self.scale {
            ScoreScale::Percent => 100.0,
            ScoreScale::Unit => 1.0,
            ScoreScale::Auto if self.max_score > 1.0 => 100.0,
            ScoreScale::Auto => 1.0,
        }
    }

    /// Quarter recorded for the first row in `month`, if any row falls in it.
    pub fn parent_quarter(&self, month: MonthKey) -> Option<QuarterKey> {
        self.month_parents.get(&month).copied()
    }
}

fn index_calendar(records: &[CalendarRecord]) -> Result<HashMap<i64, CalendarEntry>, DashboardError> {
    let mut calendar = HashMap::with_capacity(records.len());

    for record in records {
        let invalid = |reason: &str| DashboardError::InvalidCalendar {
            date_key: record.date_key,
            reason: reason.to_string(),
        };
        let quarter = u8::try_from(record.quarter_number)
            .ok()
            .and_then(|q| QuarterKey::new(record.year, q))
            .ok_or_else(|| invalid("QuarterNumber must be 1-4"))?;
        let month = u8::try_from(record.month)
            .ok()
            .and_then(|m| MonthKey::new(record.year, m))
            .ok_or_else(|| invalid("Month must be 1-12"))?;

        let entry = CalendarEntry { quarter, month };
        if calendar.insert(record.date_key, entry).is_some() {
            return Err(DashboardError::DuplicateDateKey(record.date_key));
        }
    }

    Ok(calendar)
}
