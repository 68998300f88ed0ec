use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::loader;
use crate::models::{
    CalendarRecord, FactRecord, MonthKey, RawDataset, StudentRecord, SubjectRecord,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let students = [
        ("1001", "Year 9"),
        ("1002", "Year 9"),
        ("1003", "Year 9"),
        ("1004", "Year 9"),
        ("1005", "Year 10"),
        ("1006", "Year 10"),
        ("1007", "Year 10"),
        ("1008", "Year 10"),
        ("1009", "Year 11"),
        ("1010", "Year 11"),
        ("1011", "Year 11"),
        ("1012", "Year 11"),
    ];
    let subjects = [
        ("MATH", "Mathematics"),
        ("ENG", "English"),
        ("SCI", "Science"),
        ("HIST", "History"),
    ];

    for (student_id, level) in students {
        upsert_student(pool, student_id, level).await?;
    }
    for (subject_id, name) in subjects {
        upsert_subject(pool, subject_id, name).await?;
    }

    let first = NaiveDate::from_ymd_opt(2023, 1, 1).context("invalid date")?;
    let last = NaiveDate::from_ymd_opt(2023, 12, 31).context("invalid date")?;
    for date in first.iter_days().take_while(|date| *date <= last) {
        upsert_calendar(pool, &calendar_record(date)?, Some(date)).await?;
    }

    // One exam per student, subject and month, sat on the 15th.
    let mut inserted = 0usize;
    for (s, (student_id, _)) in students.iter().enumerate() {
        for (j, (subject_id, _)) in subjects.iter().enumerate() {
            for month in 1..=12u32 {
                let date = NaiveDate::from_ymd_opt(2023, month, 15).context("invalid date")?;
                let fact = FactRecord {
                    student_id: student_id.to_string(),
                    subject_id: subject_id.to_string(),
                    date_key: date_key(date),
                    score: seed_score(s, j, month),
                    weight: (j == 0).then_some(2.0),
                };
                let source_key = format!("seed-{student_id}-{subject_id}-{}", fact.date_key);
                if insert_fact(pool, &fact, &source_key).await? {
                    inserted += 1;
                }
            }
        }
    }

    Ok(inserted)
}

fn seed_score(student: usize, subject: usize, month: u32) -> f64 {
    let spread = (student * 37 + subject * 23 + month as usize * 11) % 56;
    let score = 44 + spread as u32 + if student % 4 == 0 { 5 } else { 0 };
    f64::from(score.min(100))
}

pub fn date_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

fn calendar_record(date: NaiveDate) -> anyhow::Result<CalendarRecord> {
    let month = u8::try_from(date.month())
        .ok()
        .and_then(|month| MonthKey::new(date.year(), month))
        .context("invalid month")?;

    Ok(CalendarRecord {
        date_key: date_key(date),
        year: date.year(),
        quarter_number: i32::from(month.calendar_quarter().quarter),
        month: i32::from(month.month),
    })
}

/// Imports a directory of star-schema CSV files. Re-importing the same files
/// does not duplicate exams.
pub async fn import_csv_dir(pool: &PgPool, dir: &std::path::Path) -> anyhow::Result<usize> {
    let raw = loader::read_csv_dir(dir)?;

    for student in &raw.students {
        upsert_student(pool, &student.student_id, &student.grade_level).await?;
    }
    for subject in &raw.subjects {
        upsert_subject(pool, &subject.subject_id, &subject.subject_name).await?;
    }
    for record in &raw.calendar {
        let date = NaiveDate::parse_from_str(&record.date_key.to_string(), "%Y%m%d").ok();
        upsert_calendar(pool, record, date).await?;
    }

    let mut inserted = 0usize;
    for (index, fact) in raw.facts.iter().enumerate() {
        let source_key = format!(
            "import-{}-{}-{}-{index}",
            fact.student_id, fact.subject_id, fact.date_key
        );
        if insert_fact(pool, fact, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn upsert_student(pool: &PgPool, student_id: &str, level: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO exam_dashboard.students (student_id, grade_level)
        VALUES ($1, $2)
        ON CONFLICT (student_id) DO UPDATE SET grade_level = EXCLUDED.grade_level
        "#,
    )
    .bind(student_id)
    .bind(level)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_subject(pool: &PgPool, subject_id: &str, name: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO exam_dashboard.subjects (subject_id, subject_name)
        VALUES ($1, $2)
        ON CONFLICT (subject_id) DO UPDATE SET subject_name = EXCLUDED.subject_name
        "#,
    )
    .bind(subject_id)
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_calendar(
    pool: &PgPool,
    record: &CalendarRecord,
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO exam_dashboard.calendar (date_key, year, quarter_number, month, calendar_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (date_key) DO UPDATE
        SET year = EXCLUDED.year,
            quarter_number = EXCLUDED.quarter_number,
            month = EXCLUDED.month,
            calendar_date = EXCLUDED.calendar_date
        "#,
    )
    .bind(record.date_key)
    .bind(record.year)
    .bind(record.quarter_number)
    .bind(record.month)
    .bind(date)
    .execute(pool)
    .await
    .with_context(|| format!("failed to store calendar row {}", record.date_key))?;
    Ok(())
}

async fn insert_fact(pool: &PgPool, fact: &FactRecord, source_key: &str) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO exam_dashboard.performance
        (id, student_id, subject_id, date_key, score, weight, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&fact.student_id)
    .bind(&fact.subject_id)
    .bind(fact.date_key)
    .bind(fact.score)
    .bind(fact.weight)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Reads the four star-schema tables; joining happens in `FactTable::build`.
pub async fn fetch_dataset(pool: &PgPool) -> anyhow::Result<RawDataset> {
    let facts = sqlx::query(
        "SELECT student_id, subject_id, date_key, score, weight \
         FROM exam_dashboard.performance ORDER BY date_key, imported_at",
    )
    .fetch_all(pool)
    .await
    .context("failed to read exam records")?
    .into_iter()
    .map(|row| FactRecord {
        student_id: row.get("student_id"),
        subject_id: row.get("subject_id"),
        date_key: row.get("date_key"),
        score: row.get("score"),
        weight: row.get("weight"),
    })
    .collect();

    let students = sqlx::query("SELECT student_id, grade_level FROM exam_dashboard.students")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| StudentRecord {
            student_id: row.get("student_id"),
            grade_level: row.get("grade_level"),
        })
        .collect();

    let subjects = sqlx::query("SELECT subject_id, subject_name FROM exam_dashboard.subjects")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| SubjectRecord {
            subject_id: row.get("subject_id"),
            subject_name: row.get("subject_name"),
        })
        .collect();

    let calendar = sqlx::query(
        "SELECT date_key, year, quarter_number, month FROM exam_dashboard.calendar",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| CalendarRecord {
        date_key: row.get("date_key"),
        year: row.get("year"),
        quarter_number: row.get("quarter_number"),
        month: row.get("month"),
    })
    .collect();

    Ok(RawDataset {
        facts,
        students,
        subjects,
        calendar,
    })
}
