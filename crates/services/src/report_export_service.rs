use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use lms_core::model::{AdminReport, EnrolmentStatus, Percentage};
use serde::Serialize;
use storage::repository::AdminReportRepository;
use tracing::info;

use crate::error::ExportError;

/// Exportable report column; `name` is the identifier accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportColumn {
    StudentId,
    StudentName,
    StudentEmail,
    StudentActive,
    Company,
    Trainers,
    Leaders,
    Course,
    Category,
    Status,
    StartDate,
    EndDate,
    Deferred,
    Progress,
    UpdatedAt,
}

impl ReportColumn {
    pub const ALL: [ReportColumn; 15] = [
        ReportColumn::StudentId,
        ReportColumn::StudentName,
        ReportColumn::StudentEmail,
        ReportColumn::StudentActive,
        ReportColumn::Company,
        ReportColumn::Trainers,
        ReportColumn::Leaders,
        ReportColumn::Course,
        ReportColumn::Category,
        ReportColumn::Status,
        ReportColumn::StartDate,
        ReportColumn::EndDate,
        ReportColumn::Deferred,
        ReportColumn::Progress,
        ReportColumn::UpdatedAt,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ReportColumn::StudentId => "student_id",
            ReportColumn::StudentName => "student_name",
            ReportColumn::StudentEmail => "student_email",
            ReportColumn::StudentActive => "student_active",
            ReportColumn::Company => "company",
            ReportColumn::Trainers => "trainers",
            ReportColumn::Leaders => "leaders",
            ReportColumn::Course => "course",
            ReportColumn::Category => "category",
            ReportColumn::Status => "status",
            ReportColumn::StartDate => "start_date",
            ReportColumn::EndDate => "end_date",
            ReportColumn::Deferred => "deferred",
            ReportColumn::Progress => "progress",
            ReportColumn::UpdatedAt => "updated_at",
        }
    }

    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            ReportColumn::StudentId => "Student ID",
            ReportColumn::StudentName => "Student",
            ReportColumn::StudentEmail => "Email",
            ReportColumn::StudentActive => "Active",
            ReportColumn::Company => "Company",
            ReportColumn::Trainers => "Trainers",
            ReportColumn::Leaders => "Leaders",
            ReportColumn::Course => "Course",
            ReportColumn::Category => "Category",
            ReportColumn::Status => "Status",
            ReportColumn::StartDate => "Start Date",
            ReportColumn::EndDate => "End Date",
            ReportColumn::Deferred => "Deferred",
            ReportColumn::Progress => "Progress (%)",
            ReportColumn::UpdatedAt => "Last Updated",
        }
    }

    #[must_use]
    pub fn value(self, report: &AdminReport) -> String {
        let yes_no = |b: bool| if b { "Yes" } else { "No" }.to_string();
        match self {
            ReportColumn::StudentId => report.student_id.to_string(),
            ReportColumn::StudentName => report.student_name.clone(),
            ReportColumn::StudentEmail => report.student_email.clone(),
            ReportColumn::StudentActive => yes_no(report.student_active),
            ReportColumn::Company => report.company_name.clone().unwrap_or_default(),
            ReportColumn::Trainers => report.trainer_names.clone(),
            ReportColumn::Leaders => report.leader_names.clone(),
            ReportColumn::Course => report.course_title.clone(),
            ReportColumn::Category => report.course_category.clone().unwrap_or_default(),
            ReportColumn::Status => report.enrolment_status.to_string(),
            ReportColumn::StartDate => report.course_start_at.format("%Y-%m-%d").to_string(),
            ReportColumn::EndDate => report.course_ends_at.format("%Y-%m-%d").to_string(),
            ReportColumn::Deferred => yes_no(report.deferred),
            ReportColumn::Progress => report.progress_percentage.to_string(),
            ReportColumn::UpdatedAt => report.source_updated_at.to_rfc3339(),
        }
    }

    /// Parses a comma-separated selection, keeping the given order.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::UnknownColumn` for an unrecognised name and
    /// `ExportError::NoColumns` when nothing is selected.
    pub fn parse_list(raw: &str) -> Result<Vec<ReportColumn>, ExportError> {
        let mut columns = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let column = token.parse::<ReportColumn>()?;
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        if columns.is_empty() {
            return Err(ExportError::NoColumns);
        }
        Ok(columns)
    }
}

impl fmt::Display for ReportColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportColumn {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ReportColumn::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExportError::UnknownColumn(s.to_string()))
    }
}

/// Running totals over the exported rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportTotals {
    pub rows: usize,
    /// Enrolled and not deferred.
    pub active: usize,
    pub deferred: usize,
    pub by_status: BTreeMap<String, usize>,
    pub percentage_sum: u64,
}

impl ExportTotals {
    pub fn record(&mut self, report: &AdminReport) {
        self.rows += 1;
        if report.deferred {
            self.deferred += 1;
        } else if report.enrolment_status == EnrolmentStatus::Enrolled {
            self.active += 1;
        }
        *self
            .by_status
            .entry(report.enrolment_status.as_str().to_string())
            .or_default() += 1;
        self.percentage_sum += u64::from(report.progress_percentage.value());
    }

    #[must_use]
    pub fn mean_percentage(&self) -> Option<Percentage> {
        let rows = u64::try_from(self.rows).ok().filter(|r| *r > 0)?;
        let mean = (self.percentage_sum * 2 + rows) / (rows * 2);
        Some(Percentage::clamped(i64::try_from(mean).unwrap_or(100)))
    }
}

/// Streams `admin_reports` rows to CSV.
#[derive(Clone)]
pub struct ReportExportService {
    reports: Arc<dyn AdminReportRepository>,
}

impl ReportExportService {
    #[must_use]
    pub fn new(reports: Arc<dyn AdminReportRepository>) -> Self {
        Self { reports }
    }

    /// Writes a header and one line per report row, reading `page_size` rows at a time.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::NoColumns` for an empty selection, `Csv`/`Io` if
    /// writing fails, `Storage` if a page cannot be read.
    pub async fn export_csv<W: Write>(
        &self,
        writer: W,
        columns: &[ReportColumn],
        page_size: u32,
    ) -> Result<ExportTotals, ExportError> {
        if columns.is_empty() {
            return Err(ExportError::NoColumns);
        }
        let page_size = page_size.max(1);
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(columns.iter().map(|c| c.header()))?;

        let mut totals = ExportTotals::default();
        let mut offset = 0_u64;
        loop {
            let page = self.reports.list_reports_page(offset, page_size).await?;
            for report in &page {
                write_row(&mut out, columns, report, &mut totals)?;
            }
            if page.len() < page_size as usize {
                break;
            }
            offset += u64::from(page_size);
        }
        out.flush()?;

        info!(rows = totals.rows, columns = columns.len(), "admin reports exported");
        Ok(totals)
    }
}

fn write_row<W: Write>(
    out: &mut csv::Writer<W>,
    columns: &[ReportColumn],
    report: &AdminReport,
    totals: &mut ExportTotals,
) -> Result<(), ExportError> {
    out.write_record(columns.iter().map(|c| c.value(report)))?;
    totals.record(report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_selection_keeps_order_and_rejects_unknown_names() {
        let columns = ReportColumn::parse_list("progress, Student_Name,progress,").unwrap();
        assert_eq!(columns, vec![ReportColumn::Progress, ReportColumn::StudentName]);

        assert!(matches!(
            ReportColumn::parse_list("progress,grade"),
            Err(ExportError::UnknownColumn(name)) if name == "grade"
        ));
        assert!(matches!(ReportColumn::parse_list(" , "), Err(ExportError::NoColumns)));
    }

    #[test]
    fn empty_totals_have_no_mean() {
        assert_eq!(ExportTotals::default().mean_percentage(), None);
    }
}
