use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Invalid calendar row for DateKey {date_key}: {reason}")]
    InvalidCalendar { date_key: i64, reason: String },

    #[error("Duplicate calendar DateKey: {0}")]
    DuplicateDateKey(i64),

    #[error("No exam records to load")]
    EmptyDataset,

    #[error("CSV error in {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },
}
