use std::fmt::Write;

use crate::controller::Dashboard;
use crate::fact_table::FactTable;
use crate::query::{with_thousands, BarChart, PieChart};

/// Size and coverage of the loaded table, for report headers.
pub fn dataset_summary(table: &FactTable) -> String {
    if table.is_empty() {
        return "no exams loaded".to_string();
    }

    let rows = table.rows();
    let students: std::collections::HashSet<&str> =
        rows.iter().map(|row| row.student_id.as_str()).collect();
    let subjects: std::collections::HashSet<&str> =
        rows.iter().map(|row| row.subject_id.as_str()).collect();
    let first = rows.iter().map(|row| row.date_key).min();
    let last = rows.iter().map(|row| row.date_key).max();

    let mut summary = format!(
        "{} exams, {} students, {} subjects",
        with_thousands(table.len()),
        with_thousands(students.len()),
        subjects.len()
    );
    if let (Some(first), Some(last)) = (first, last) {
        let _ = write!(summary, " (DateKey {first} to {last})");
    }
    summary
}

pub fn build_report(summary: &str, dashboard: &Dashboard) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Education Performance Analysis");
    let _ = writeln!(output, "Dataset: {summary}");
    let _ = writeln!(output, "{}", dashboard.status);
    let _ = writeln!(output);

    let kpis = &dashboard.kpis.labels;
    let _ = writeln!(output, "## Key Figures");
    let _ = writeln!(output, "- Average Score: {}", kpis.avg_score);
    let _ = writeln!(output, "- Weighted Avg: {}", kpis.weighted_avg);
    let _ = writeln!(output, "- Pass Rate: {}", kpis.pass_rate);
    let _ = writeln!(output, "- Perfect Scores: {}", kpis.perfect_rate);

    write_pie(&mut output, "Grade Distribution", dashboard.grade_chart.as_ref());
    write_pie(&mut output, "Level Distribution", dashboard.level_chart.as_ref());
    write_bars(
        &mut output,
        &dashboard.time_chart.title,
        dashboard.time_chart.chart.as_ref(),
    );
    write_bars(&mut output, "Score by Subject", dashboard.subject_chart.as_ref());

    output
}

fn write_pie(output: &mut String, title: &str, chart: Option<&PieChart>) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    let Some(chart) = chart else {
        let _ = writeln!(output, "No exams match the current filters.");
        return;
    };

    let _ = writeln!(output, "Total: {}", chart.center_label);
    for point in &chart.points {
        let marker = if point.emphasis > 0.0 { " (selected)" } else { "" };
        let _ = writeln!(output, "- {}: {}{}", point.label, point.value, marker);
    }
}

fn write_bars(output: &mut String, title: &str, chart: Option<&BarChart>) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    let Some(chart) = chart else {
        let _ = writeln!(output, "No exams match the current filters.");
        return;
    };

    let _ = writeln!(output, "Reference (filtered average): {:.1}", chart.reference_line);
    for point in &chart.points {
        let marker = if point.emphasis < 1.0 { " (dimmed)" } else { "" };
        let _ = writeln!(output, "- {}: {:.1}{}", point.label, point.value, marker);
    }
}
