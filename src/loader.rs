use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::DashboardError;
use crate::models::{CalendarRecord, FactRecord, RawDataset, StudentRecord, SubjectRecord};

pub const FACT_FILE: &str = "FactPerformance.csv";
pub const STUDENTS_FILE: &str = "DimStudents.csv";
pub const SUBJECTS_FILE: &str = "DimSubjects.csv";
pub const CALENDAR_FILE: &str = "DimCalendar.csv";

/// Reads the four star-schema CSV files from `dir`.
pub fn read_csv_dir(dir: &Path) -> Result<RawDataset, DashboardError> {
    let dataset = RawDataset {
        facts: read_csv::<FactRecord>(&dir.join(FACT_FILE))?,
        students: read_csv::<StudentRecord>(&dir.join(STUDENTS_FILE))?,
        subjects: read_csv::<SubjectRecord>(&dir.join(SUBJECTS_FILE))?,
        calendar: read_csv::<CalendarRecord>(&dir.join(CALENDAR_FILE))?,
    };

    tracing::info!(
        dir = %dir.display(),
        facts = dataset.facts.len(),
        students = dataset.students.len(),
        subjects = dataset.subjects.len(),
        dates = dataset.calendar.len(),
        "read star schema from CSV"
    );
    Ok(dataset)
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DashboardError> {
    let wrap = |source: csv::Error| DashboardError::Csv {
        file: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(wrap)?;

    let mut records = Vec::new();
    for result in reader.deserialize::<T>() {
        records.push(result.map_err(wrap)?);
    }
    Ok(records)
}
