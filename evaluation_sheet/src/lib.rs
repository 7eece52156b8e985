mod config;
use log::debug;

use std::collections::HashMap;

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;

pub use crate::config::*;

// **** Layout ****

/// All the rating keys, in column order: question ascending, then BullsEye, Aimed, GE.
///
/// Both the header and the rows are generated from this sequence.
pub fn rating_keys() -> impl Iterator<Item = RatingKey> {
    (1..=QUESTION_COUNT).flat_map(|question| {
        Machine::ALL
            .iter()
            .map(move |&machine| RatingKey { question, machine })
    })
}

fn total_labels() -> Vec<String> {
    let mut labels: Vec<String> = Machine::ALL.iter().map(|m| m.total_label()).collect();
    labels.push(GRAND_TOTAL_LABEL.to_string());
    labels
}

/// The header row of the sheet.
///
/// ```
/// let header = evaluation_sheet::build_header();
/// assert_eq!(header.len(), 92);
/// assert_eq!(header[4], "Q1 BullsEye");
/// assert_eq!(header[91], "Grand Total");
/// ```
pub fn build_header() -> Vec<String> {
    let mut header: Vec<String> = IDENTITY_COLUMNS.iter().map(|s| s.to_string()).collect();
    header.extend(rating_keys().map(|k| k.header_label()));
    header.extend(total_labels());
    header
}

/// Checks that a stored header row is the one produced by `build_header`.
pub fn check_header(header: &[String]) -> Result<(), LayoutError> {
    let expected = build_header();
    if header.len() != expected.len() {
        return Err(LayoutError::WrongWidth {
            expected: expected.len(),
            found: header.len(),
        });
    }
    for (column, (e, f)) in expected.iter().zip(header.iter()).enumerate() {
        if e != f {
            return Err(LayoutError::HeaderMismatch {
                column,
                expected: e.clone(),
                found: f.clone(),
            });
        }
    }
    Ok(())
}

// **** Ratings and totals ****

/// Turns a submitted rating into a number.
///
/// Anything that does not read as a finite number counts as 0. Booleans count as 1 and 0.
pub fn coerce_rating(value: &JSValue) -> f64 {
    let x = match value {
        JSValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JSValue::String(s) if s.trim().is_empty() => 0.0,
        JSValue::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        JSValue::Bool(true) => 1.0,
        _ => 0.0,
    };
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// The 84 rating values of a submission, in column order. Missing keys are 0.
pub fn rating_values(ratings: &JSMap<String, JSValue>) -> Vec<f64> {
    for k in ratings.keys() {
        if RatingKey::parse(k).is_none() {
            debug!("rating_values: ignoring unknown rating key {:?}", k);
        }
    }
    rating_keys()
        .map(|k| {
            ratings
                .get(&k.to_string())
                .map(coerce_rating)
                .unwrap_or(0.0)
        })
        .collect()
}

/// Sums the ratings of each machine and the grand total.
///
/// The values are interleaved by machine: positions 0, 3, 6, ... belong to BullsEye,
/// 1, 4, 7, ... to Aimed and 2, 5, 8, ... to GE.
pub fn compute_totals(values: &[f64]) -> MachineTotals {
    let mut sums = [0.0_f64; 3];
    for (idx, v) in values.iter().enumerate() {
        sums[idx % Machine::ALL.len()] += v;
    }
    let [bullseye, aimed, ge] = sums;
    MachineTotals {
        bullseye,
        aimed,
        ge,
        grand: bullseye + aimed + ge,
    }
}

// **** Rows ****

/// Builds the cells of a row, following the column order of `build_header`.
pub fn encode_row(
    submission: &EvaluationSubmission,
    timestamp: &str,
    totals: &MachineTotals,
) -> Vec<Cell> {
    let mut row: Vec<Cell> = vec![
        Cell::Text(timestamp.to_string()),
        Cell::Text(submission.reviewer_name.clone()),
        Cell::Text(submission.reviewer_role.clone()),
        Cell::Text(submission.review_date.clone()),
    ];
    row.extend(
        rating_values(&submission.ratings)
            .into_iter()
            .map(Cell::Number),
    );
    for m in Machine::ALL {
        row.push(Cell::Number(totals.for_machine(m)));
    }
    row.push(Cell::Number(totals.grand));
    row
}

/// Computes the totals of a submission and encodes its row.
pub fn build_row(
    submission: &EvaluationSubmission,
    timestamp: &str,
) -> (Vec<Cell>, MachineTotals) {
    let totals = compute_totals(&rating_values(&submission.ratings));
    debug!(
        "build_row: reviewer {:?} totals {:?}",
        submission.reviewer_name, totals
    );
    (encode_row(submission, timestamp, &totals), totals)
}

/// Reads a stored numeric cell. Blank or unreadable cells are 0.
pub fn parse_number_cell(s: &str) -> f64 {
    match s.trim().parse::<f64>() {
        Ok(x) if x.is_finite() => x,
        _ => 0.0,
    }
}

fn zip_row<'a>(
    header: &'a [String],
    row: &'a [String],
) -> Result<HashMap<&'a str, &'a str>, LayoutError> {
    check_header(header)?;
    if row.len() > header.len() {
        return Err(LayoutError::WrongWidth {
            expected: header.len(),
            found: row.len(),
        });
    }
    // Short rows are padded with blank cells.
    Ok(header
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            let value = row.get(idx).map(|s| s.as_str()).unwrap_or("");
            (label.as_str(), value)
        })
        .collect())
}

/// Reads back a stored row, using the header labels to locate each value.
pub fn decode_row(header: &[String], row: &[String]) -> Result<ResponseRecord, LayoutError> {
    let cells = zip_row(header, row)?;
    let text = |label: &str| cells.get(label).map(|s| s.to_string()).unwrap_or_default();
    let number = |label: &str| cells.get(label).map(|s| parse_number_cell(s)).unwrap_or(0.0);

    let ratings: Vec<f64> = rating_keys().map(|k| number(&k.header_label())).collect();
    let totals = MachineTotals {
        bullseye: number(&Machine::BullsEye.total_label()),
        aimed: number(&Machine::Aimed.total_label()),
        ge: number(&Machine::GE.total_label()),
        grand: number(GRAND_TOTAL_LABEL),
    };
    Ok(ResponseRecord {
        timestamp: text(IDENTITY_COLUMNS[0]),
        reviewer_name: text(IDENTITY_COLUMNS[1]),
        reviewer_role: text(IDENTITY_COLUMNS[2]),
        review_date: text(IDENTITY_COLUMNS[3]),
        ratings,
        totals,
    })
}

fn number_to_json(x: f64) -> JSValue {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        json!(x as i64)
    } else {
        json!(x)
    }
}

/// A stored row as a JSON object keyed by the header labels.
///
/// Any header is accepted, extra columns included. The identity columns are strings; other
/// cells are numbers when they read as one and are kept as stored text otherwise.
pub fn row_to_json(
    header: &[String],
    row: &[String],
) -> Result<JSMap<String, JSValue>, LayoutError> {
    if row.len() > header.len() {
        return Err(LayoutError::WrongWidth {
            expected: header.len(),
            found: row.len(),
        });
    }
    let mut res: JSMap<String, JSValue> = JSMap::new();
    for (idx, label) in header.iter().enumerate() {
        let raw = row.get(idx).map(|s| s.as_str()).unwrap_or("");
        let value = match raw.trim().parse::<f64>() {
            _ if IDENTITY_COLUMNS.contains(&label.as_str()) => json!(raw),
            Ok(x) if x.is_finite() => number_to_json(x),
            _ => json!(raw),
        };
        res.insert(label.clone(), value);
    }
    Ok(res)
}
