use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::models::{LetterGrade, TimeBucket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Grade,
    Level,
    Subject,
    Time,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Grade,
        Dimension::Level,
        Dimension::Subject,
        Dimension::Time,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::Grade => "grade",
            Dimension::Level => "level",
            Dimension::Subject => "subject",
            Dimension::Time => "time",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Dimension::Grade => 1,
            Dimension::Level => 2,
            Dimension::Subject => 4,
            Dimension::Time => 8,
        }
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.label().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown dimension {value:?}"))
    }
}

/// Dimensions whose filters a view skips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionSet(u8);

impl DimensionSet {
    pub const NONE: DimensionSet = DimensionSet(0);

    pub fn only(dimension: Dimension) -> Self {
        DimensionSet(dimension.bit())
    }

    pub fn contains(self, dimension: Dimension) -> bool {
        self.0 & dimension.bit() != 0
    }
}

impl FromIterator<Dimension> for DimensionSet {
    fn from_iter<I: IntoIterator<Item = Dimension>>(iter: I) -> Self {
        DimensionSet(iter.into_iter().fold(0, |bits, d| bits | d.bit()))
    }
}

/// A filter value: everything, or one member of the dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection<T> {
    #[default]
    All,
    Only(T),
}

impl<T: PartialEq> Selection<T> {
    /// Clicking the active member clears the filter; clicking anything else selects it.
    pub fn toggle(&mut self, clicked: T) {
        let clear = matches!(self, Selection::Only(current) if *current == clicked);
        *self = if clear {
            Selection::All
        } else {
            Selection::Only(clicked)
        };
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Selection::All => None,
            Selection::Only(value) => Some(value),
        }
    }

    pub fn is(&self, candidate: &T) -> bool {
        self.value() == Some(candidate)
    }
}

impl<T: fmt::Display> fmt::Display for Selection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str("All"),
            Selection::Only(value) => value.fmt(f),
        }
    }
}

impl<T: fmt::Display> Serialize for Selection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    #[default]
    Quarter,
    Month,
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Quarter" | "quarter" => Ok(ViewMode::Quarter),
            "Month" | "month" => Ok(ViewMode::Month),
            other => Err(format!("unknown view mode {other:?}")),
        }
    }
}

/// Active selection per dimension for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterState {
    pub grade: Selection<LetterGrade>,
    pub level: Selection<String>,
    pub subject: Selection<String>,
    pub time: Selection<TimeBucket>,
    pub view_mode: ViewMode,
}

impl FilterState {
    pub fn reset(&mut self) {
        *self = FilterState::default();
    }

    /// Quarter the time chart is drilled into, i.e. Month mode with a quarter selected.
    pub fn drilled_quarter(&self) -> Option<crate::models::QuarterKey> {
        match (self.view_mode, self.time.value()) {
            (ViewMode::Month, Some(TimeBucket::Quarter(quarter))) => Some(*quarter),
            _ => None,
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "Filters | Grade: {} | Level: {} | Time: {} | Sub: {}",
            self.grade, self.level, self.time, self.subject
        )
    }
}
