// ********* Input data structures ***********

use serde::{Deserialize, Serialize};
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use std::error::Error;
use std::fmt::Display;

/// Number of questions on the evaluation form.
pub const QUESTION_COUNT: u32 = 28;

/// The leading columns that identify a response.
pub const IDENTITY_COLUMNS: [&str; 4] = [
    "Timestamp",
    "Reviewer Name",
    "Role/Position",
    "Review Date",
];

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";

/// One rating per question and machine.
pub const RATING_COLUMN_COUNT: usize = (QUESTION_COUNT as usize) * Machine::ALL.len();

/// Identity columns, rating columns, three machine totals and the grand total.
pub const COLUMN_COUNT: usize =
    IDENTITY_COLUMNS.len() + RATING_COLUMN_COUNT + Machine::ALL.len() + 1;

/// The X-ray systems under evaluation.
///
/// The declaration order is the column order within a question.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Machine {
    BullsEye,
    Aimed,
    GE,
}

impl Machine {
    pub const ALL: [Machine; 3] = [Machine::BullsEye, Machine::Aimed, Machine::GE];

    /// The suffix used in the rating keys of the submitted form.
    pub fn key_suffix(&self) -> &'static str {
        match self {
            Machine::BullsEye => "bullseye",
            Machine::Aimed => "aimed",
            Machine::GE => "ge",
        }
    }

    /// The name used in column labels.
    pub fn label(&self) -> &'static str {
        match self {
            Machine::BullsEye => "BullsEye",
            Machine::Aimed => "Aimed",
            Machine::GE => "GE",
        }
    }

    pub fn total_label(&self) -> String {
        format!("{} Total", self.label())
    }

    fn from_key_suffix(s: &str) -> Option<Machine> {
        Machine::ALL.iter().copied().find(|m| m.key_suffix() == s)
    }
}

/// Identifies a single rating cell: one question for one machine.
///
/// The derived ordering (question first, then machine) is the column order of the sheet.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct RatingKey {
    pub question: u32,
    pub machine: Machine,
}

impl RatingKey {
    pub fn new(question: u32, machine: Machine) -> Option<RatingKey> {
        if (1..=QUESTION_COUNT).contains(&question) {
            Some(RatingKey { question, machine })
        } else {
            None
        }
    }

    /// Parses a key of the form `q<N>_<machine>`, for example `q12_aimed`.
    pub fn parse(key: &str) -> Option<RatingKey> {
        let rest = key.strip_prefix('q')?;
        let (num, machine) = rest.split_once('_')?;
        if num.is_empty() || num.starts_with('0') || !num.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let question = num.parse::<u32>().ok()?;
        RatingKey::new(question, Machine::from_key_suffix(machine)?)
    }

    pub fn header_label(&self) -> String {
        format!("Q{} {}", self.question, self.machine.label())
    }

    /// Position of this rating among the rating columns.
    pub fn offset(&self) -> usize {
        let machine_idx = Machine::ALL
            .iter()
            .position(|m| *m == self.machine)
            .unwrap_or(0);
        (self.question as usize).saturating_sub(1) * Machine::ALL.len() + machine_idx
    }
}

impl Display for RatingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}_{}", self.question, self.machine.key_suffix())
    }
}

/// A submission whose identity fields have been checked.
///
/// The ratings are kept as submitted; they are coerced to numbers when a row is built.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSubmission {
    pub reviewer_name: String,
    pub reviewer_role: String,
    pub review_date: String,
    pub ratings: JSMap<String, JSValue>,
}

// ******** Output data structures *********

/// A single value written to the sheet.
#[derive(PartialEq, Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{}", s),
            Cell::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MachineTotals {
    pub bullseye: f64,
    pub aimed: f64,
    pub ge: f64,
    pub grand: f64,
}

impl MachineTotals {
    pub fn for_machine(&self, machine: Machine) -> f64 {
        match machine {
            Machine::BullsEye => self.bullseye,
            Machine::Aimed => self.aimed,
            Machine::GE => self.ge,
        }
    }
}

/// A persisted response, read back from the sheet.
#[derive(PartialEq, Debug, Clone)]
pub struct ResponseRecord {
    pub timestamp: String,
    pub reviewer_name: String,
    pub reviewer_role: String,
    pub review_date: String,
    /// The 84 ratings, in column order.
    pub ratings: Vec<f64>,
    pub totals: MachineTotals,
}

impl ResponseRecord {
    pub fn rating(&self, key: RatingKey) -> f64 {
        self.ratings.get(key.offset()).copied().unwrap_or(0.0)
    }
}

/// The stored layout does not match the layout of this version.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum LayoutError {
    HeaderMismatch {
        column: usize,
        expected: String,
        found: String,
    },
    WrongWidth {
        expected: usize,
        found: usize,
    },
}

impl Error for LayoutError {}

impl Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::HeaderMismatch {
                column,
                expected,
                found,
            } => write!(
                f,
                "unexpected header in column {}: expected {:?}, found {:?}",
                column + 1,
                expected,
                found
            ),
            LayoutError::WrongWidth { expected, found } => {
                write!(f, "expected {} columns, found {}", expected, found)
            }
        }
    }
}
