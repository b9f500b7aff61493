//! Serialization of payroll exports.
//!
//! CSV and Excel share one row layout; Excel output is tab-separated with a
//! UTF-8 byte order mark so spreadsheet tools open it with the right
//! encoding. JSON carries the same rows plus per-staff summaries.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    BillingPeriod, Charge, ChargeType, ExportFormat, PayrollExport, StaffSummary, Transaction,
};

use super::ledger::sum_by_type;

const ROW_HEADER: [&str; 13] = [
    "staff_id",
    "charge_id",
    "type",
    "description",
    "amount",
    "tax_amount",
    "discount_amount",
    "total_amount",
    "proration_factor",
    "start_date",
    "end_date",
    "source",
    "source_id",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Everything that goes into one export artifact.
#[derive(Debug, Clone, Copy)]
pub struct ExportDocument<'a> {
    /// The exported period.
    pub period: &'a BillingPeriod,
    /// The export record being produced.
    pub export: &'a PayrollExport,
    /// Every charge of the period, in creation order.
    pub charges: &'a [Charge],
    /// Per-staff summaries of `charges`.
    pub summaries: &'a [StaffSummary],
}

/// Serializes an export document in the requested format.
///
/// Rows are ordered by staff member, then by creation order.
pub fn render(format: ExportFormat, doc: &ExportDocument<'_>) -> EngineResult<Vec<u8>> {
    match format {
        ExportFormat::Csv => render_delimited(doc, b',', false),
        ExportFormat::Excel => render_delimited(doc, b'\t', true),
        ExportFormat::Json => render_json(doc),
    }
}

fn sorted_rows<'a>(charges: &'a [Charge]) -> Vec<&'a Charge> {
    let mut rows: Vec<&Charge> = charges.iter().collect();
    rows.sort_by(|a, b| {
        a.staff_id
            .cmp(&b.staff_id)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    rows
}

fn render_delimited(doc: &ExportDocument<'_>, delimiter: u8, bom: bool) -> EngineResult<Vec<u8>> {
    let export_id = doc.export.id;
    let failure = |e: csv::Error| EngineError::ExportFailure {
        export_id,
        message: format!("CSV write error: {e}"),
    };

    let mut buffer = Vec::new();
    if bom {
        buffer.extend_from_slice(UTF8_BOM);
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(buffer);

    writer.write_record(ROW_HEADER).map_err(failure)?;
    for charge in sorted_rows(doc.charges) {
        writer
            .write_record([
                charge.staff_id.clone(),
                charge.id.to_string(),
                charge.charge_type.to_string(),
                charge.description.clone(),
                charge.amount.to_string(),
                optional_amount(charge.tax_amount),
                optional_amount(charge.discount_amount),
                charge.total_amount.to_string(),
                charge.proration_factor.round_dp(6).to_string(),
                optional_date(charge.start_date),
                optional_date(charge.end_date),
                charge.source_name.clone().unwrap_or_default(),
                charge.source_id.clone().unwrap_or_default(),
            ])
            .map_err(failure)?;
    }

    writer.into_inner().map_err(|e| EngineError::ExportFailure {
        export_id,
        message: format!("CSV flush error: {}", e.error()),
    })
}

fn optional_amount(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn optional_date(value: Option<NaiveDate>) -> String {
    value.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

#[derive(Serialize)]
struct JsonPeriod<'a> {
    id: Uuid,
    name: &'a str,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

#[derive(Serialize)]
struct JsonExport<'a> {
    export_id: Uuid,
    export_date: NaiveDate,
    period: JsonPeriod<'a>,
    record_count: u64,
    total_amount: Decimal,
    totals_by_type: BTreeMap<ChargeType, Decimal>,
    staff: &'a [StaffSummary],
    deductions: Vec<Transaction>,
    charges: Vec<&'a Charge>,
}

fn render_json(doc: &ExportDocument<'_>) -> EngineResult<Vec<u8>> {
    let deductions =
        payroll_deductions(doc.charges, doc.export.export_date).map_err(|e| EngineError::ExportFailure {
            export_id: doc.export.id,
            message: format!("deduction error: {e}"),
        })?;
    let body = JsonExport {
        export_id: doc.export.id,
        export_date: doc.export.export_date,
        period: JsonPeriod {
            id: doc.period.id,
            name: &doc.period.name,
            start_date: doc.period.start_date,
            end_date: doc.period.end_date,
        },
        record_count: doc.export.record_count,
        total_amount: doc.export.total_amount,
        totals_by_type: sum_by_type(doc.charges),
        staff: doc.summaries,
        deductions,
        charges: sorted_rows(doc.charges),
    };

    serde_json::to_vec_pretty(&body).map_err(|e| EngineError::ExportFailure {
        export_id: doc.export.id,
        message: format!("JSON write error: {e}"),
    })
}

/// Groups charges by staff member, ordered by staff id.
pub fn summarize_by_staff(charges: &[Charge]) -> Vec<StaffSummary> {
    let mut by_staff: BTreeMap<&str, StaffSummary> = BTreeMap::new();
    for charge in charges {
        let summary = by_staff
            .entry(charge.staff_id.as_str())
            .or_insert_with(|| StaffSummary {
                staff_id: charge.staff_id.clone(),
                charge_count: 0,
                by_type: BTreeMap::new(),
                total_amount: Decimal::ZERO,
            });
        summary.charge_count += 1;
        *summary
            .by_type
            .entry(charge.charge_type)
            .or_insert(Decimal::ZERO) += charge.amount;
        summary.total_amount += charge.amount;
    }
    by_staff.into_values().collect()
}

/// One payroll deduction per staff member, ordered by staff id.
///
/// Amount, tax and discount are summed over the staff member's charges and
/// the deduction's total is derived from them, so it always equals the sum
/// of the charges' totals.
pub fn payroll_deductions(charges: &[Charge], date: NaiveDate) -> EngineResult<Vec<Transaction>> {
    let mut by_staff: BTreeMap<&str, (Decimal, Option<Decimal>, Option<Decimal>, usize)> =
        BTreeMap::new();
    for charge in charges {
        let entry = by_staff
            .entry(charge.staff_id.as_str())
            .or_insert((Decimal::ZERO, None, None, 0));
        entry.0 += charge.amount;
        entry.1 = add_optional(entry.1, charge.tax_amount);
        entry.2 = add_optional(entry.2, charge.discount_amount);
        entry.3 += 1;
    }

    by_staff
        .into_iter()
        .map(|(staff_id, (amount, tax, discount, count))| {
            Transaction::new(
                staff_id,
                "payroll_deduction",
                amount,
                tax,
                discount,
                format!("{count} charge(s)"),
                date,
            )
        })
        .collect()
}

fn add_optional(sum: Option<Decimal>, value: Option<Decimal>) -> Option<Decimal> {
    match (sum, value) {
        (None, None) => None,
        (sum, value) => Some(sum.unwrap_or_default() + value.unwrap_or_default()),
    }
}

/// Builds the artifact name, e.g. `payroll-2024-01-20240205-1.csv`.
///
/// Characters other than ASCII letters, digits, `-` and `_` in the period
/// name are replaced with `-`.
pub fn export_file_name(
    prefix: &str,
    period_name: &str,
    export_date: NaiveDate,
    attempt: usize,
    format: ExportFormat,
) -> String {
    let slug: String = period_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!(
        "{}-{}-{}-{}.{}",
        prefix,
        slug,
        export_date.format("%Y%m%d"),
        attempt,
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewCharge;
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct Sample {
        period: BillingPeriod,
        export: PayrollExport,
        charges: Vec<Charge>,
    }

    fn sample() -> Sample {
        let period = BillingPeriod::new("2024-01", d(2024, 1, 1), d(2024, 1, 31), Utc::now()).unwrap();
        let charges = vec![
            NewCharge::new("staff-2", ChargeType::Rent, dec("850.00"), "Rent, Unit 4B")
                .with_source("a-1")
                .into_charge(period.id, 0, Utc::now()),
            NewCharge::new("staff-1", ChargeType::Transport, dec("20.00"), "Airport run")
                .with_source("t-1")
                .with_adjustments(Some(dec("2.00")), None)
                .into_charge(period.id, 1, Utc::now()),
            NewCharge::new("staff-2", ChargeType::Utilities, dec("40.00"), "Power")
                .into_charge(period.id, 2, Utc::now()),
        ];
        let export = PayrollExport::pending(
            period.id,
            d(2024, 2, 5),
            "payroll.csv",
            ExportFormat::Csv,
            Utc::now(),
        );
        Sample {
            period,
            export,
            charges,
        }
    }

    fn csv_text(sample: &Sample) -> String {
        let bytes = render(
            ExportFormat::Csv,
            &ExportDocument {
                period: &sample.period,
                export: &sample.export,
                charges: &sample.charges,
                summaries: &[],
            },
        )
        .unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_csv_rows_sorted_by_staff_then_sequence() {
        let sample = sample();
        let text = csv_text(&sample);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("staff_id,charge_id,type"));
        assert!(lines[1].starts_with("staff-1,"));
        assert!(lines[2].contains("\"Rent, Unit 4B\""));
        assert!(lines[3].contains(",utilities,Power,40.00,"));
        assert!(lines[1].contains(",20.00,2.00,,22.00,"));
    }

    #[test]
    fn test_excel_is_tab_separated_with_bom() {
        let sample = sample();
        let bytes = render(
            ExportFormat::Excel,
            &ExportDocument {
                period: &sample.period,
                export: &sample.export,
                charges: &sample.charges,
                summaries: &[],
            },
        )
        .unwrap();

        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        assert!(text.starts_with("staff_id\tcharge_id\t"));
        assert!(text.contains("Rent, Unit 4B"));
    }

    #[test]
    fn test_json_includes_summaries() {
        let sample = sample();
        let summaries = summarize_by_staff(&sample.charges);
        let bytes = render(
            ExportFormat::Json,
            &ExportDocument {
                period: &sample.period,
                export: &sample.export,
                charges: &sample.charges,
                summaries: &summaries,
            },
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["period"]["name"], "2024-01");
        assert_eq!(value["staff"].as_array().unwrap().len(), 2);
        assert_eq!(value["charges"].as_array().unwrap().len(), 3);
        assert_eq!(value["charges"][0]["staff_id"], "staff-1");
        assert_eq!(value["deductions"].as_array().unwrap().len(), 2);
        assert_eq!(value["deductions"][0]["total_amount"], "22.00");
    }

    #[test]
    fn test_deductions_total_matches_charge_totals() {
        let sample = sample();
        let deductions = payroll_deductions(&sample.charges, d(2024, 2, 5)).unwrap();

        assert_eq!(deductions.len(), 2);
        assert_eq!(deductions[0].staff_id, "staff-1");
        assert_eq!(deductions[0].tax_amount, Some(dec("2.00")));
        assert_eq!(deductions[1].total_amount, dec("890.00"));
        assert_eq!(deductions[1].tax_amount, None);
        assert!(deductions.iter().all(|t| t.validate().is_ok()));

        let deducted: Decimal = deductions.iter().map(|t| t.total_amount).sum();
        let charged: Decimal = sample.charges.iter().map(|c| c.total_amount).sum();
        assert_eq!(deducted, charged);
    }

    #[test]
    fn test_summaries_group_by_staff() {
        let sample = sample();
        let summaries = summarize_by_staff(&sample.charges);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].staff_id, "staff-1");
        assert_eq!(summaries[1].charge_count, 2);
        assert_eq!(summaries[1].total_amount, dec("890.00"));
        assert_eq!(summaries[1].by_type[&ChargeType::Utilities], dec("40.00"));
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let name = export_file_name(
            "payroll",
            "Jan 2024/site A",
            d(2024, 2, 5),
            2,
            ExportFormat::Excel,
        );
        assert_eq!(name, "payroll-Jan-2024-site-A-20240205-2.tsv");
    }
}
