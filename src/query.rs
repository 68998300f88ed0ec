use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::fact_table::FactTable;
use crate::filter::{Dimension, DimensionSet, FilterState};
use crate::models::{FactRow, LetterGrade, TimeBucket};

pub const PULL_SELECTED: f64 = 0.1;
pub const OPACITY_SELECTED: f64 = 1.0;
pub const OPACITY_DIMMED: f64 = 0.3;

/// Rows matching every active filter except those on `ignore`. Borrows from
/// the table; an empty result is a valid view.
pub fn filtered_view<'a>(
    table: &'a FactTable,
    state: &FilterState,
    ignore: DimensionSet,
) -> Vec<&'a FactRow> {
    table
        .rows()
        .iter()
        .filter(|row| matches_filters(row, state, ignore))
        .collect()
}

fn matches_filters(row: &FactRow, state: &FilterState, ignore: DimensionSet) -> bool {
    if !ignore.contains(Dimension::Grade) {
        if let Some(grade) = state.grade.value() {
            if row.letter_grade != *grade {
                return false;
            }
        }
    }

    if !ignore.contains(Dimension::Level) {
        if let Some(level) = state.level.value() {
            if row.level != *level {
                return false;
            }
        }
    }

    if !ignore.contains(Dimension::Subject) {
        if let Some(subject) = state.subject.value() {
            if row.subject_name != *subject {
                return false;
            }
        }
    }

    if !ignore.contains(Dimension::Time) {
        match state.time.value() {
            Some(TimeBucket::Quarter(quarter)) if row.quarter != Some(*quarter) => return false,
            Some(TimeBucket::Month(month)) if row.month != Some(*month) => return false,
            _ => {}
        }
    }

    true
}

pub fn mean_score(rows: &[&FactRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    Some(rows.iter().map(|row| row.score).sum::<f64>() / rows.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiLabels {
    pub avg_score: String,
    pub weighted_avg: String,
    pub pass_rate: String,
    pub perfect_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub exam_count: usize,
    pub avg_score: f64,
    /// `sum(weighted_score) / sum(weight)`, unscaled.
    pub weighted_avg: f64,
    pub pass_rate: f64,
    pub perfect_rate: f64,
    pub labels: KpiLabels,
}

/// Headline numbers over the fully filtered view.
pub fn compute_kpis(table: &FactTable, full: &[&FactRow]) -> Kpis {
    if full.is_empty() {
        return Kpis {
            exam_count: 0,
            avg_score: 0.0,
            weighted_avg: 0.0,
            pass_rate: 0.0,
            perfect_rate: 0.0,
            labels: KpiLabels {
                avg_score: "0.00".to_string(),
                weighted_avg: "0.00%".to_string(),
                pass_rate: "0.00%".to_string(),
                perfect_rate: "0.0%".to_string(),
            },
        };
    }

    let count = full.len() as f64;
    let avg_score = mean_score(full).unwrap_or(0.0);

    let weight_sum: f64 = full.iter().map(|row| row.weight).sum();
    let weighted_avg = if weight_sum > 0.0 {
        full.iter().map(|row| row.weighted_score).sum::<f64>() / weight_sum
    } else {
        0.0
    };
    // Ratios at or below 1 are taken to be on a 0-1 scale.
    let weighted_display = if weighted_avg <= 1.0 {
        weighted_avg * 100.0
    } else {
        weighted_avg
    };

    let passed = full.iter().filter(|row| row.passed).count() as f64;
    let pass_rate = passed / count * 100.0;

    let target = table.perfect_score_target();
    let perfect = full.iter().filter(|row| row.score == target).count() as f64;
    let perfect_rate = perfect / count * 100.0;

    Kpis {
        exam_count: full.len(),
        avg_score,
        weighted_avg,
        pass_rate,
        perfect_rate,
        labels: KpiLabels {
            avg_score: format!("{avg_score:.2}"),
            weighted_avg: format!("{weighted_display:.2}%"),
            pass_rate: format!("{pass_rate:.2}%"),
            perfect_rate: format!("{perfect_rate:.1}%"),
        },
    }
}

/// One category on a chart. `emphasis` is the slice pull-out for pie charts
/// and the bar opacity for bar charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
    pub emphasis: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieChart {
    pub points: Vec<ChartPoint>,
    pub center_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarChart {
    pub points: Vec<ChartPoint>,
    pub reference_line: f64,
}

/// Exam count per letter grade, every grade listed even at zero.
pub fn grade_distribution(
    table: &FactTable,
    state: &FilterState,
    full: &[&FactRow],
) -> Option<PieChart> {
    let view = filtered_view(table, state, DimensionSet::only(Dimension::Grade));
    if view.is_empty() {
        return None;
    }

    let mut counts: BTreeMap<LetterGrade, usize> =
        LetterGrade::ALL.into_iter().map(|grade| (grade, 0)).collect();
    for row in &view {
        *counts.entry(row.letter_grade).or_default() += 1;
    }

    let points = counts
        .into_iter()
        .map(|(grade, count)| ChartPoint {
            label: grade.label().to_string(),
            value: count as f64,
            emphasis: pull(state.grade.is(&grade)),
            color: Some(grade.color()),
        })
        .collect();

    Some(PieChart {
        points,
        center_label: format!("{} Tests", with_thousands(full.len())),
    })
}

/// Distinct students per level.
pub fn level_distribution(
    table: &FactTable,
    state: &FilterState,
    full: &[&FactRow],
) -> Option<PieChart> {
    let view = filtered_view(table, state, DimensionSet::only(Dimension::Level));
    if view.is_empty() {
        return None;
    }

    let mut students: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for row in &view {
        students
            .entry(row.level.as_str())
            .or_default()
            .insert(row.student_id.as_str());
    }

    let points = students
        .into_iter()
        .map(|(level, ids)| ChartPoint {
            label: level.to_string(),
            value: ids.len() as f64,
            emphasis: pull(state.level.value().is_some_and(|selected| selected == level)),
            color: None,
        })
        .collect();

    Some(PieChart {
        points,
        center_label: format!("{} Students", with_thousands(unique_students(full))),
    })
}

/// Mean score per subject, best first.
pub fn subject_ranking(
    table: &FactTable,
    state: &FilterState,
    full: &[&FactRow],
) -> Option<BarChart> {
    let view = filtered_view(table, state, DimensionSet::only(Dimension::Subject));
    if view.is_empty() {
        return None;
    }

    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for row in &view {
        let entry = totals.entry(row.subject_name.as_str()).or_insert((0.0, 0));
        entry.0 += row.score;
        entry.1 += 1;
    }

    let mut means: Vec<(&str, f64)> = totals
        .into_iter()
        .map(|(subject, (sum, count))| (subject, sum / count as f64))
        .collect();
    means.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let points = means
        .into_iter()
        .map(|(subject, mean)| ChartPoint {
            label: subject.to_string(),
            value: mean,
            emphasis: match state.subject.value() {
                Some(selected) if selected == subject => OPACITY_SELECTED,
                Some(_) => OPACITY_DIMMED,
                None => OPACITY_SELECTED,
            },
            color: None,
        })
        .collect();

    Some(BarChart {
        points,
        reference_line: mean_score(full).unwrap_or(0.0),
    })
}

pub fn unique_students(rows: &[&FactRow]) -> usize {
    rows.iter()
        .map(|row| row.student_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

fn pull(selected: bool) -> f64 {
    if selected {
        PULL_SELECTED
    } else {
        0.0
    }
}

pub fn with_thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut output = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            output.push(',');
        }
        output.push(digit);
    }
    output
}
