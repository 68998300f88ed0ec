use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::drilldown::{self, TimeChart};
use crate::fact_table::FactTable;
use crate::filter::{Dimension, DimensionSet, FilterState, ViewMode};
use crate::models::{LetterGrade, TimeBucket};
use crate::query::{self, BarChart, Kpis, PieChart};

/// Something the user did on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEvent {
    GradeClicked(String),
    LevelClicked(String),
    SubjectClicked(String),
    TimeClicked(String),
    ViewModeToggled(ViewMode),
    ResetRequested,
}

impl DashboardEvent {
    /// Decodes a chart click payload such as
    /// `{"dimension": "grade", "points": [{"label": "A"}]}`,
    /// `{"view_mode": "Month"}` or `{"reset": true}`.
    /// Payloads missing the fields we need decode to `None`.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if payload.get("reset").and_then(Value::as_bool) == Some(true) {
            return Some(DashboardEvent::ResetRequested);
        }

        if let Some(mode) = payload.get("view_mode") {
            return mode.as_str()?.parse().ok().map(DashboardEvent::ViewModeToggled);
        }

        let dimension: Dimension = payload.get("dimension")?.as_str()?.parse().ok()?;
        let point = payload.get("points")?.as_array()?.first()?;
        let (primary, fallback) = match dimension {
            Dimension::Grade | Dimension::Level => ("label", "x"),
            Dimension::Subject | Dimension::Time => ("x", "label"),
        };
        let label = match point.get(primary).or_else(|| point.get(fallback))? {
            Value::String(label) => label.clone(),
            Value::Number(number) => number.to_string(),
            _ => return None,
        };

        Some(match dimension {
            Dimension::Grade => DashboardEvent::GradeClicked(label),
            Dimension::Level => DashboardEvent::LevelClicked(label),
            Dimension::Subject => DashboardEvent::SubjectClicked(label),
            Dimension::Time => DashboardEvent::TimeClicked(label),
        })
    }
}

impl FromStr for DashboardEvent {
    type Err = String;

    /// `grade=A`, `level=Year 9`, `subject=Math`, `time=2023 Q1`, `view=Month` or `reset`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("reset") {
            return Ok(DashboardEvent::ResetRequested);
        }

        let (key, label) = value
            .split_once('=')
            .ok_or_else(|| format!("expected <dimension>=<label> or reset, got {value:?}"))?;
        let label = label.trim().to_string();

        if key.trim().eq_ignore_ascii_case("view") {
            return label.parse().map(DashboardEvent::ViewModeToggled);
        }

        Ok(match key.parse::<Dimension>()? {
            Dimension::Grade => DashboardEvent::GradeClicked(label),
            Dimension::Level => DashboardEvent::LevelClicked(label),
            Dimension::Subject => DashboardEvent::SubjectClicked(label),
            Dimension::Time => DashboardEvent::TimeClicked(label),
        })
    }
}

/// Everything the presentation layer draws, computed from one filter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub status: String,
    pub filters: FilterState,
    pub kpis: Kpis,
    pub grade_chart: Option<PieChart>,
    pub level_chart: Option<PieChart>,
    pub subject_chart: Option<BarChart>,
    pub time_chart: TimeChart,
}

/// Applies events to a filter state and recomputes every output.
#[derive(Debug, Clone)]
pub struct Controller {
    table: Arc<FactTable>,
}

impl Controller {
    pub fn new(table: Arc<FactTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &FactTable {
        &self.table
    }

    /// Applies `event` and returns the fully recomputed dashboard.
    /// Events that cannot be applied leave `state` untouched.
    pub fn dispatch(&self, state: &mut FilterState, event: DashboardEvent) -> Dashboard {
        tracing::debug!(?event, "dispatching dashboard event");
        if !apply_event(state, event) {
            tracing::debug!("event ignored");
        }
        self.render(state)
    }

    pub fn render(&self, state: &FilterState) -> Dashboard {
        let table = self.table.as_ref();
        let full = query::filtered_view(table, state, DimensionSet::NONE);

        Dashboard {
            status: state.status_line(),
            filters: state.clone(),
            kpis: query::compute_kpis(table, &full),
            grade_chart: query::grade_distribution(table, state, &full),
            level_chart: query::level_distribution(table, state, &full),
            subject_chart: query::subject_ranking(table, state, &full),
            time_chart: drilldown::time_trend(table, state, &full),
        }
    }
}

/// Mutates `state` for one event. Returns false when the event carries a label
/// that is not a member of its dimension's type (a grade outside A-F, a time
/// label that is neither a quarter nor a month).
pub fn apply_event(state: &mut FilterState, event: DashboardEvent) -> bool {
    match event {
        // Grades are a closed set, so an unknown label is malformed rather than a stale member.
        DashboardEvent::GradeClicked(label) => match label.parse::<LetterGrade>() {
            Ok(grade) => state.grade.toggle(grade),
            Err(reason) => {
                tracing::debug!(%reason, "ignoring grade click");
                return false;
            }
        },
        DashboardEvent::LevelClicked(label) => state.level.toggle(label),
        DashboardEvent::SubjectClicked(label) => state.subject.toggle(label),
        DashboardEvent::TimeClicked(label) => match label.parse::<TimeBucket>() {
            Ok(bucket) => drilldown::apply_time_click(state, bucket),
            Err(reason) => {
                tracing::debug!(%reason, "ignoring time click");
                return false;
            }
        },
        DashboardEvent::ViewModeToggled(mode) => state.view_mode = mode,
        DashboardEvent::ResetRequested => state.reset(),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact_table::tests::row;
    use crate::fact_table::ScoreScale;
    use crate::filter::Selection;
    use proptest::prelude::*;
    use serde_json::json;

    fn controller() -> Controller {
        Controller::new(Arc::new(FactTable::from_rows(
            vec![
                row("s1", "Year 9", "Math", "2023-01", 90.0),
                row("s2", "Year 9", "English", "2023-03", 60.0),
                row("s3", "Year 10", "Math", "2023-05", 40.0),
            ],
            ScoreScale::Auto,
        )))
    }

    #[test]
    fn grade_click_filters_kpis_but_keeps_grade_distribution() {
        let controller = controller();
        let mut state = FilterState::default();
        let dashboard = controller.dispatch(&mut state, DashboardEvent::GradeClicked("A".to_string()));

        assert_eq!(state.grade, Selection::Only(LetterGrade::A));
        assert_eq!(dashboard.kpis.labels.avg_score, "90.00");
        let grades = dashboard.grade_chart.unwrap();
        assert_eq!(grades.points.iter().filter(|p| p.value > 0.0).count(), 3);
        assert_eq!(dashboard.status, "Filters | Grade: A | Level: All | Time: All | Sub: All");
    }

    #[test]
    fn every_output_reflects_the_same_snapshot() {
        let controller = controller();
        let mut state = FilterState::default();
        controller.dispatch(&mut state, DashboardEvent::LevelClicked("Year 9".to_string()));
        let dashboard = controller.dispatch(&mut state, DashboardEvent::SubjectClicked("Math".to_string()));

        assert_eq!(dashboard.filters, state);
        assert_eq!(dashboard.kpis.exam_count, 1);
        assert_eq!(dashboard.grade_chart.unwrap().center_label, "1 Tests");
        assert_eq!(dashboard.level_chart.unwrap().center_label, "1 Students");
        assert_eq!(dashboard.subject_chart.unwrap().reference_line, 90.0);
        assert_eq!(dashboard.time_chart.chart.unwrap().reference_line, 90.0);
    }

    #[test]
    fn time_clicks_drill_then_toggle_and_reset_returns_to_quarters() {
        let controller = controller();
        let mut state = FilterState::default();

        let dashboard = controller.dispatch(&mut state, DashboardEvent::TimeClicked("2023 Q1".to_string()));
        assert_eq!(state.view_mode, ViewMode::Month);
        assert_eq!(dashboard.time_chart.title, "Monthly Breakdown for 2023 Q1");

        controller.dispatch(&mut state, DashboardEvent::TimeClicked("2023-03-01".to_string()));
        assert_eq!(state.time, Selection::Only("2023-03".parse().unwrap()));

        let dashboard = controller.dispatch(&mut state, DashboardEvent::ResetRequested);
        assert_eq!(state, FilterState::default());
        assert_eq!(dashboard.time_chart.granularity, ViewMode::Quarter);
    }

    #[test]
    fn view_toggle_keeps_time_filter() {
        let mut state = FilterState::default();
        assert!(apply_event(&mut state, DashboardEvent::TimeClicked("2023 Q1".to_string())));
        assert!(apply_event(&mut state, DashboardEvent::ViewModeToggled(ViewMode::Quarter)));
        assert_eq!(state.view_mode, ViewMode::Quarter);
        assert_eq!(state.time, Selection::Only("2023 Q1".parse().unwrap()));
    }

    #[test]
    fn malformed_labels_are_ignored() {
        let mut state = FilterState::default();
        assert!(!apply_event(&mut state, DashboardEvent::GradeClicked("Z".to_string())));
        assert!(!apply_event(&mut state, DashboardEvent::TimeClicked("soon".to_string())));
        assert_eq!(state, FilterState::default());
    }

    #[test]
    fn stale_level_yields_empty_dashboard() {
        let controller = controller();
        let mut state = FilterState::default();
        let dashboard = controller.dispatch(&mut state, DashboardEvent::LevelClicked("Year 12".to_string()));

        assert_eq!(dashboard.kpis.labels.avg_score, "0.00");
        assert_eq!(dashboard.kpis.labels.perfect_rate, "0.0%");
        assert!(dashboard.grade_chart.is_none());
        assert!(dashboard.subject_chart.is_none());
        assert!(dashboard.time_chart.chart.is_none());
        // the level chart ignores its own filter
        assert_eq!(dashboard.level_chart.unwrap().center_label, "0 Students");
    }

    #[test]
    fn decodes_chart_payloads() {
        assert_eq!(
            DashboardEvent::from_payload(&json!({"dimension": "grade", "points": [{"label": "B"}]})),
            Some(DashboardEvent::GradeClicked("B".to_string()))
        );
        assert_eq!(
            DashboardEvent::from_payload(&json!({"dimension": "level", "points": [{"label": 9}]})),
            Some(DashboardEvent::LevelClicked("9".to_string()))
        );
        assert_eq!(
            DashboardEvent::from_payload(&json!({"dimension": "time", "points": [{"x": "2023-01-01"}]})),
            Some(DashboardEvent::TimeClicked("2023-01-01".to_string()))
        );
        assert_eq!(
            DashboardEvent::from_payload(&json!({"view_mode": "Month"})),
            Some(DashboardEvent::ViewModeToggled(ViewMode::Month))
        );
        assert_eq!(
            DashboardEvent::from_payload(&json!({"reset": true})),
            Some(DashboardEvent::ResetRequested)
        );
    }

    #[test]
    fn rejects_incomplete_payloads() {
        assert_eq!(DashboardEvent::from_payload(&json!({})), None);
        assert_eq!(DashboardEvent::from_payload(&json!({"dimension": "grade"})), None);
        assert_eq!(DashboardEvent::from_payload(&json!({"dimension": "grade", "points": []})), None);
        assert_eq!(DashboardEvent::from_payload(&json!({"dimension": "color", "points": [{"x": "red"}]})), None);
        assert_eq!(DashboardEvent::from_payload(&json!({"view_mode": "Week"})), None);
        assert_eq!(DashboardEvent::from_payload(&json!({"dimension": "time", "points": [{"x": null}]})), None);
    }

    #[test]
    fn parses_cli_shorthand() {
        assert_eq!("grade=A".parse(), Ok(DashboardEvent::GradeClicked("A".to_string())));
        assert_eq!("level=Year 9".parse(), Ok(DashboardEvent::LevelClicked("Year 9".to_string())));
        assert_eq!("time=2023 Q1".parse(), Ok(DashboardEvent::TimeClicked("2023 Q1".to_string())));
        assert_eq!("view=Month".parse(), Ok(DashboardEvent::ViewModeToggled(ViewMode::Month)));
        assert_eq!("reset".parse(), Ok(DashboardEvent::ResetRequested));
        assert!("colour=red".parse::<DashboardEvent>().is_err());
        assert!("grade".parse::<DashboardEvent>().is_err());
    }

    proptest! {
        #[test]
        fn clicking_twice_restores_all(
            dimension in prop_oneof![Just("grade"), Just("level"), Just("subject")],
            label in prop_oneof![Just("A"), Just("C"), Just("Year 9"), Just("Math")],
        ) {
            let mut state = FilterState::default();
            let event: DashboardEvent = format!("{dimension}={label}").parse().unwrap();
            apply_event(&mut state, event.clone());
            apply_event(&mut state, event);
            prop_assert_eq!(state, FilterState::default());
        }

        #[test]
        fn quarter_click_always_descends(quarter in 1..=4u8, year in 2000..2100i32) {
            let mut state = FilterState::default();
            let label = format!("{year} Q{quarter}");
            apply_event(&mut state, DashboardEvent::TimeClicked(label.clone()));
            prop_assert_eq!(state.view_mode, ViewMode::Month);
            prop_assert_eq!(state.time.to_string(), label);
        }
    }
}
