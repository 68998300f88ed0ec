use std::collections::BTreeMap;

use serde::Serialize;

use crate::fact_table::FactTable;
use crate::filter::{Dimension, DimensionSet, FilterState, Selection, ViewMode};
use crate::models::{FactRow, QuarterKey, TimeBucket};
use crate::query::{self, BarChart, ChartPoint, OPACITY_DIMMED, OPACITY_SELECTED};

pub const DEFAULT_TIME_TITLE: &str = "Performance Over Time";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeChart {
    pub title: String,
    pub granularity: ViewMode,
    pub chart: Option<BarChart>,
}

/// A time click drills a quarter view down into months; in month view it toggles.
pub fn apply_time_click(state: &mut FilterState, clicked: TimeBucket) {
    match state.view_mode {
        ViewMode::Quarter => {
            state.time = Selection::Only(clicked);
            state.view_mode = ViewMode::Month;
        }
        ViewMode::Month => state.time.toggle(clicked),
    }
}

/// Quarter the month view is confined to, if any.
///
/// A selected quarter confines the view directly. A selected month confines it
/// to the quarter the calendar assigns that month; when no row carries the
/// month the view stays unrestricted.
pub fn trend_scope(table: &FactTable, state: &FilterState) -> Option<QuarterKey> {
    if state.view_mode != ViewMode::Month {
        return None;
    }

    match state.time.value()? {
        TimeBucket::Quarter(quarter) => Some(*quarter),
        TimeBucket::Month(month) => {
            let parent = table.parent_quarter(*month);
            if parent.is_none() {
                tracing::warn!(month = %month, "no exam falls in the selected month; showing every month");
            }
            parent
        }
    }
}

pub fn time_title(state: &FilterState) -> String {
    match state.drilled_quarter() {
        Some(quarter) => format!("Monthly Breakdown for {quarter}"),
        None => DEFAULT_TIME_TITLE.to_string(),
    }
}

/// Mean score per quarter or month, in calendar order. Undated exams have no bar.
pub fn time_trend(table: &FactTable, state: &FilterState, full: &[&FactRow]) -> TimeChart {
    let mut view = query::filtered_view(table, state, DimensionSet::only(Dimension::Time));
    if let Some(scope) = trend_scope(table, state) {
        view.retain(|row| row.quarter == Some(scope));
    }

    let quarterly = state.view_mode == ViewMode::Quarter;
    let mut buckets: BTreeMap<TimeBucket, (f64, usize)> = BTreeMap::new();
    for row in &view {
        let Some(bucket) = row.time_bucket(quarterly) else {
            continue;
        };
        let entry = buckets.entry(bucket).or_insert((0.0, 0));
        entry.0 += row.score;
        entry.1 += 1;
    }

    let chart = (!buckets.is_empty()).then(|| {
        // While drilled into a quarter no month is selected yet, so nothing is highlighted.
        let highlighted = match state.time.value() {
            Some(selected) if state.drilled_quarter().is_none() => Some(*selected),
            _ => None,
        };

        let points = buckets
            .into_iter()
            .map(|(bucket, (sum, count))| ChartPoint {
                label: bucket.to_string(),
                value: sum / count as f64,
                emphasis: match highlighted {
                    Some(selected) if selected != bucket => OPACITY_DIMMED,
                    _ => OPACITY_SELECTED,
                },
                color: None,
            })
            .collect();

        BarChart {
            points,
            reference_line: query::mean_score(full).unwrap_or(0.0),
        }
    });

    TimeChart {
        title: time_title(state),
        granularity: state.view_mode,
        chart,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact_table::tests::row;
    use crate::fact_table::ScoreScale;
    use crate::models::LetterGrade;

    fn year_table() -> FactTable {
        FactTable::from_rows(
            vec![
                row("s1", "Year 9", "Math", "2023-01", 80.0),
                row("s2", "Year 9", "Math", "2023-02", 60.0),
                row("s3", "Year 9", "Math", "2023-03", 70.0),
                row("s1", "Year 9", "Math", "2023-04", 90.0),
                row("s2", "Year 9", "Math", "2023-05", 50.0),
                row("s3", "Year 10", "Math", "2023-10", 40.0),
            ],
            ScoreScale::Auto,
        )
    }

    fn labels(chart: &TimeChart) -> Vec<String> {
        chart
            .chart
            .as_ref()
            .map(|c| c.points.iter().map(|p| p.label.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn quarter_click_drills_into_months() {
        let table = year_table();
        let mut state = FilterState::default();
        apply_time_click(&mut state, "2023 Q1".parse().unwrap());

        assert_eq!(state.view_mode, ViewMode::Month);
        assert_eq!(state.time, Selection::Only("2023 Q1".parse().unwrap()));

        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        let chart = time_trend(&table, &state, &full);
        assert_eq!(chart.title, "Monthly Breakdown for 2023 Q1");
        assert_eq!(labels(&chart), vec!["2023-01", "2023-02", "2023-03"]);

        let bars = chart.chart.unwrap();
        assert!(bars.points.iter().all(|p| p.emphasis == OPACITY_SELECTED));
        assert_eq!(bars.reference_line, 70.0);
    }

    #[test]
    fn month_click_toggles_within_the_quarter() {
        let table = year_table();
        let mut state = FilterState::default();
        apply_time_click(&mut state, "2023 Q1".parse().unwrap());
        apply_time_click(&mut state, "2023-02".parse().unwrap());

        assert_eq!(state.view_mode, ViewMode::Month);
        assert_eq!(state.time, Selection::Only("2023-02".parse().unwrap()));

        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        let chart = time_trend(&table, &state, &full);
        assert_eq!(chart.title, DEFAULT_TIME_TITLE);
        assert_eq!(labels(&chart), vec!["2023-01", "2023-02", "2023-03"]);

        let emphasis: Vec<f64> = chart.chart.unwrap().points.iter().map(|p| p.emphasis).collect();
        assert_eq!(emphasis, vec![OPACITY_DIMMED, OPACITY_SELECTED, OPACITY_DIMMED]);

        apply_time_click(&mut state, "2023-02".parse().unwrap());
        assert_eq!(state.time, Selection::All);
        assert_eq!(state.view_mode, ViewMode::Month);

        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        let chart = time_trend(&table, &state, &full);
        assert_eq!(labels(&chart).len(), 6);
    }

    #[test]
    fn quarter_view_groups_by_quarter() {
        let table = year_table();
        let state = FilterState::default();
        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        let chart = time_trend(&table, &state, &full);

        assert_eq!(chart.granularity, ViewMode::Quarter);
        assert_eq!(labels(&chart), vec!["2023 Q1", "2023 Q2", "2023 Q4"]);
        let values: Vec<f64> = chart.chart.unwrap().points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![70.0, 70.0, 40.0]);
    }

    #[test]
    fn unknown_month_leaves_view_unrestricted() {
        let table = year_table();
        let state = FilterState {
            time: Selection::Only("2022-06".parse().unwrap()),
            view_mode: ViewMode::Month,
            ..FilterState::default()
        };
        assert_eq!(trend_scope(&table, &state), None);

        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        assert!(full.is_empty());
        let chart = time_trend(&table, &state, &full);
        assert_eq!(labels(&chart).len(), 6);
        assert_eq!(chart.chart.unwrap().reference_line, 0.0);
    }

    #[test]
    fn other_filters_still_apply_to_the_trend() {
        let table = year_table();
        let state = FilterState {
            level: Selection::Only("Year 10".to_string()),
            ..FilterState::default()
        };
        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        assert_eq!(labels(&time_trend(&table, &state, &full)), vec!["2023 Q4"]);

        let state = FilterState {
            grade: Selection::Only(LetterGrade::A),
            level: Selection::Only("Year 10".to_string()),
            ..FilterState::default()
        };
        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        assert!(full.is_empty());
        assert!(time_trend(&table, &state, &full).chart.is_none());
    }

    #[test]
    fn undated_exams_skip_the_trend_but_count_in_the_average() {
        let mut undated = row("s4", "Year 9", "Math", "2023-01", 10.0);
        undated.quarter = None;
        undated.month = None;
        let table = FactTable::from_rows(
            vec![row("s1", "Year 9", "Math", "2023-01", 80.0), undated],
            ScoreScale::Auto,
        );

        let state = FilterState::default();
        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        assert_eq!(full.len(), 2);
        let chart = time_trend(&table, &state, &full).chart.unwrap();
        assert_eq!(chart.points.len(), 1);
        assert_eq!(chart.points[0].value, 80.0);
        assert_eq!(chart.reference_line, 45.0);

        let only_undated = FactTable::from_rows(vec![table.rows()[1].clone()], ScoreScale::Auto);
        let full = query::filtered_view(&only_undated, &state, DimensionSet::NONE);
        assert!(time_trend(&only_undated, &state, &full).chart.is_none());
    }

    #[test]
    fn quarter_mode_dims_unselected_quarters() {
        let table = year_table();
        let state = FilterState {
            time: Selection::Only("2023 Q2".parse().unwrap()),
            ..FilterState::default()
        };
        let full = query::filtered_view(&table, &state, DimensionSet::NONE);
        let chart = time_trend(&table, &state, &full);
        let emphasis: Vec<f64> = chart.chart.unwrap().points.iter().map(|p| p.emphasis).collect();
        assert_eq!(emphasis, vec![OPACITY_DIMMED, OPACITY_SELECTED, OPACITY_DIMMED]);
        assert_eq!(chart.title, DEFAULT_TIME_TITLE);
    }
}
