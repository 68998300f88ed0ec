use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

pub const PASS_MARK: f64 = 55.0;

/// One exam record as delivered by the loader, before dimension joins.
#[derive(Debug, Clone, Deserialize)]
pub struct FactRecord {
    #[serde(rename = "StudentID")]
    pub student_id: String,
    #[serde(rename = "SubjectID")]
    pub subject_id: String,
    #[serde(rename = "DateKey")]
    pub date_key: i64,
    #[serde(rename = "Score")]
    pub score: f64,
    #[serde(rename = "Weight", default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentRecord {
    #[serde(rename = "StudentID")]
    pub student_id: String,
    #[serde(rename = "GradeLevel")]
    pub grade_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectRecord {
    #[serde(rename = "SubjectID")]
    pub subject_id: String,
    #[serde(rename = "SubjectName")]
    pub subject_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarRecord {
    #[serde(rename = "DateKey")]
    pub date_key: i64,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "QuarterNumber")]
    pub quarter_number: i32,
    #[serde(rename = "Month")]
    pub month: i32,
}

/// The four star-schema tables, unjoined.
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub facts: Vec<FactRecord>,
    pub students: Vec<StudentRecord>,
    pub subjects: Vec<SubjectRecord>,
    pub calendar: Vec<CalendarRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 5] = [
        LetterGrade::A,
        LetterGrade::B,
        LetterGrade::C,
        LetterGrade::D,
        LetterGrade::F,
    ];

    pub fn from_score(score: f64) -> Self {
        if score > 84.0 {
            LetterGrade::A
        } else if score > 74.0 {
            LetterGrade::B
        } else if score > 64.0 {
            LetterGrade::C
        } else if score > 54.0 {
            LetterGrade::D
        } else {
            LetterGrade::F
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            LetterGrade::A => "#2ca02c",
            LetterGrade::B => "#1f77b4",
            LetterGrade::C => "#ff7f0e",
            LetterGrade::D => "#d62728",
            LetterGrade::F => "#7f7f7f",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LetterGrade {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LetterGrade::ALL
            .into_iter()
            .find(|grade| grade.label() == value.trim())
            .ok_or_else(|| format!("unknown letter grade {value:?}"))
    }
}

impl Serialize for LetterGrade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// A calendar quarter, rendered as `2023 Q1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuarterKey {
    pub year: i32,
    pub quarter: u8,
}

impl QuarterKey {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Self { year, quarter })
    }
}

impl fmt::Display for QuarterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Q{}", self.year, self.quarter)
    }
}

/// A calendar month, rendered as `2023-03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u8,
}

impl MonthKey {
    pub fn new(year: i32, month: u8) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Gregorian quarter of this month. The drill-down resolver prefers the
    /// quarter recorded in the calendar dimension, see `FactTable::parent_quarter`.
    pub fn calendar_quarter(self) -> QuarterKey {
        QuarterKey {
            year: self.year,
            quarter: (self.month - 1) / 3 + 1,
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// A value on the time axis at either granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeBucket {
    Quarter(QuarterKey),
    Month(MonthKey),
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBucket::Quarter(quarter) => quarter.fmt(f),
            TimeBucket::Month(month) => month.fmt(f),
        }
    }
}

impl FromStr for TimeBucket {
    type Err = String;

    /// Accepts `2023 Q1`, `2023-03` and full dates such as `2023-03-01`, which
    /// chart libraries report for month axes; those are truncated to the month.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let invalid = || format!("not a quarter or month label: {value:?}");

        if let Some((year, quarter)) = value.split_once(" Q") {
            let year = year.parse::<i32>().map_err(|_| invalid())?;
            let quarter = quarter.parse::<u8>().map_err(|_| invalid())?;
            return QuarterKey::new(year, quarter)
                .map(TimeBucket::Quarter)
                .ok_or_else(invalid);
        }

        if value.len() > 7 {
            let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;
            return month_of(date).map(TimeBucket::Month).ok_or_else(invalid);
        }

        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u8>().map_err(|_| invalid())?;
        MonthKey::new(year, month)
            .map(TimeBucket::Month)
            .ok_or_else(invalid)
    }
}

impl Serialize for TimeBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn month_of(date: chrono::NaiveDate) -> Option<MonthKey> {
    use chrono::Datelike;
    MonthKey::new(date.year(), u8::try_from(date.month()).ok()?)
}

/// One exam record joined with its dimensions and enriched with derived fields.
#[derive(Debug, Clone)]
pub struct FactRow {
    pub student_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub date_key: i64,
    /// `None` when the DateKey has no calendar row.
    pub quarter: Option<QuarterKey>,
    pub month: Option<MonthKey>,
    pub level: String,
    pub score: f64,
    pub weight: f64,
    pub weighted_score: f64,
    pub passed: bool,
    pub letter_grade: LetterGrade,
}

impl FactRow {
    pub fn time_bucket(&self, quarterly: bool) -> Option<TimeBucket> {
        if quarterly {
            self.quarter.map(TimeBucket::Quarter)
        } else {
            self.month.map(TimeBucket::Month)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_grades_follow_thresholds() {
        assert_eq!(LetterGrade::from_score(90.0), LetterGrade::A);
        assert_eq!(LetterGrade::from_score(85.0), LetterGrade::A);
        assert_eq!(LetterGrade::from_score(84.0), LetterGrade::B);
        assert_eq!(LetterGrade::from_score(75.0), LetterGrade::B);
        assert_eq!(LetterGrade::from_score(74.5), LetterGrade::B);
        assert_eq!(LetterGrade::from_score(65.0), LetterGrade::C);
        assert_eq!(LetterGrade::from_score(60.0), LetterGrade::D);
        assert_eq!(LetterGrade::from_score(54.0), LetterGrade::F);
        assert_eq!(LetterGrade::from_score(40.0), LetterGrade::F);
    }

    #[test]
    fn letter_grades_are_ordered_best_first() {
        assert!(LetterGrade::A < LetterGrade::B);
        assert!(LetterGrade::D < LetterGrade::F);
        assert_eq!("c".to_uppercase().parse::<LetterGrade>(), Ok(LetterGrade::C));
        assert!("E".parse::<LetterGrade>().is_err());
    }

    #[test]
    fn time_labels_render_like_the_calendar() {
        let quarter = QuarterKey::new(2023, 1).unwrap();
        let month = MonthKey::new(2023, 3).unwrap();
        assert_eq!(quarter.to_string(), "2023 Q1");
        assert_eq!(month.to_string(), "2023-03");
        assert_eq!(month.calendar_quarter(), quarter);
        assert_eq!(MonthKey::new(2023, 12).unwrap().calendar_quarter().quarter, 4);
    }

    #[test]
    fn parses_both_label_families() {
        assert_eq!(
            "2023 Q2".parse::<TimeBucket>(),
            Ok(TimeBucket::Quarter(QuarterKey { year: 2023, quarter: 2 }))
        );
        assert_eq!(
            "2023-07".parse::<TimeBucket>(),
            Ok(TimeBucket::Month(MonthKey { year: 2023, month: 7 }))
        );
        assert_eq!(
            "2023-07-01".parse::<TimeBucket>(),
            Ok(TimeBucket::Month(MonthKey { year: 2023, month: 7 }))
        );
    }

    #[test]
    fn rejects_non_time_labels() {
        assert!("2023 Q5".parse::<TimeBucket>().is_err());
        assert!("2023-13".parse::<TimeBucket>().is_err());
        assert!("Math".parse::<TimeBucket>().is_err());
        assert!("".parse::<TimeBucket>().is_err());
    }

    #[test]
    fn quarters_sort_chronologically() {
        let mut quarters = vec![
            QuarterKey::new(2024, 1).unwrap(),
            QuarterKey::new(2023, 4).unwrap(),
            QuarterKey::new(2023, 2).unwrap(),
        ];
        quarters.sort();
        let labels: Vec<String> = quarters.iter().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["2023 Q2", "2023 Q4", "2024 Q1"]);
    }
}
