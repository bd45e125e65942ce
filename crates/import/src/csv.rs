use chrono::NaiveDate;
use csv::StringRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tally_core::{AccountInfo, Money, TransactionType, UserId, YearMonth};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fingerprint::fingerprint;

/// How a source encodes direction in its signed amount column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    /// Negative amounts are money coming in (the Rocket Money style export).
    #[default]
    NegativeIsIncome,
    NegativeIsExpense,
}

impl SignConvention {
    pub fn classify(self, signed: Money) -> TransactionType {
        match (self, signed.is_negative()) {
            (SignConvention::NegativeIsIncome, true) => TransactionType::Income,
            (SignConvention::NegativeIsIncome, false) => TransactionType::Expense,
            (SignConvention::NegativeIsExpense, true) => TransactionType::Expense,
            (SignConvention::NegativeIsExpense, false) => TransactionType::Income,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceProfile {
    pub name: String,
    pub delimiter: String,
    pub sign_convention: SignConvention,
}

impl Default for SourceProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            delimiter: ",".to_string(),
            sign_convention: SignConvention::default(),
        }
    }
}

impl SourceProfile {
    fn delimiter_byte(&self) -> Result<u8, CsvError> {
        match self.delimiter.as_bytes() {
            [] => Ok(b','),
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(CsvError::InvalidDelimiter(self.delimiter.clone())),
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Delimiter must be a single ASCII character, got '{0}'")]
    InvalidDelimiter(String),
    #[error("No header row")]
    NoHeader,
}

const ORIGINAL_DATE_HEADERS: &[&str] = &["original date"];
const DATE_HEADERS: &[&str] = &["date", "transaction date", "posted date"];
const AMOUNT_HEADERS: &[&str] = &["amount"];
const NAME_HEADERS: &[&str] = &["name", "merchant", "merchant name", "payee"];
const CUSTOM_NAME_HEADERS: &[&str] = &["custom name"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "memo", "original statement"];
const CATEGORY_HEADERS: &[&str] = &["category"];
const ACCOUNT_NAME_HEADERS: &[&str] = &["account name", "account"];
const ACCOUNT_NUMBER_HEADERS: &[&str] = &["account number", "account #"];
const INSTITUTION_HEADERS: &[&str] = &["institution name", "institution"];

/// Column positions resolved from a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub date: usize,
    /// Generic date column, consulted when the preferred one is blank.
    pub fallback_date: Option<usize>,
    pub amount: usize,
    pub name: Option<usize>,
    pub custom_name: Option<usize>,
    pub description: Option<usize>,
    pub category: Option<usize>,
    pub account_name: Option<usize>,
    pub account_number: Option<usize>,
    pub institution_name: Option<usize>,
}

impl ColumnMapping {
    pub fn from_headers(headers: &StringRecord) -> Result<Self, CsvError> {
        let find = |aliases: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim_start_matches('\u{feff}').trim();
                aliases.iter().any(|a| h.eq_ignore_ascii_case(a))
            })
        };

        let original_date = find(ORIGINAL_DATE_HEADERS);
        let generic_date = find(DATE_HEADERS);
        let (date, fallback_date) = match (original_date, generic_date) {
            (Some(original), generic) => (original, generic),
            (None, Some(generic)) => (generic, None),
            (None, None) => return Err(CsvError::MissingColumn("date".to_string())),
        };

        let amount =
            find(AMOUNT_HEADERS).ok_or_else(|| CsvError::MissingColumn("amount".to_string()))?;

        Ok(ColumnMapping {
            date,
            fallback_date,
            amount,
            name: find(NAME_HEADERS),
            custom_name: find(CUSTOM_NAME_HEADERS),
            description: find(DESCRIPTION_HEADERS),
            category: find(CATEGORY_HEADERS),
            account_name: find(ACCOUNT_NAME_HEADERS),
            account_number: find(ACCOUNT_NUMBER_HEADERS),
            institution_name: find(INSTITUTION_HEADERS),
        })
    }
}

/// One successfully parsed data row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    /// 1-based position among data rows (header excluded).
    pub row_index: usize,
    pub date: NaiveDate,
    /// Absolute value; direction is in `transaction_type`.
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub description: String,
    pub merchant: Option<String>,
    pub raw_category: Option<String>,
    pub account: AccountInfo,
    pub fingerprint: String,
}

impl NormalizedRow {
    pub fn match_text(&self) -> &str {
        self.merchant.as_deref().unwrap_or(&self.description)
    }
}

/// A header-validated export, ready to be read row by row.
pub struct ParsedStatement<'a> {
    text: &'a str,
    delimiter: u8,
    sign_convention: SignConvention,
    user_id: UserId,
    columns: ColumnMapping,
}

impl<'a> ParsedStatement<'a> {
    pub fn parse(
        text: &'a str,
        profile: &SourceProfile,
        user_id: UserId,
    ) -> Result<Self, CsvError> {
        let delimiter = profile.delimiter_byte()?;
        let mut reader = reader_for(text, delimiter);
        let headers = reader.headers()?.clone();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(CsvError::NoHeader);
        }
        let columns = ColumnMapping::from_headers(&headers)?;
        debug!(source = %profile.name, ?columns, "Resolved CSV columns");

        Ok(ParsedStatement {
            text,
            delimiter,
            sign_convention: profile.sign_convention,
            user_id,
            columns,
        })
    }

    pub fn columns(&self) -> &ColumnMapping {
        &self.columns
    }

    /// A fresh lazy pass over the data rows. Each call starts from the first row.
    pub fn rows(&self) -> NormalizedRows<'_> {
        NormalizedRows {
            statement: self,
            records: reader_for(self.text, self.delimiter).into_records(),
            position: 0,
            dropped: 0,
        }
    }

    fn normalize_record(
        &self,
        row_index: usize,
        record: &StringRecord,
    ) -> Result<NormalizedRow, CsvError> {
        let cols = &self.columns;

        let date_text = cell(record, Some(cols.date))
            .or_else(|| cell(record, cols.fallback_date))
            .ok_or_else(|| CsvError::InvalidDate(String::new()))?;
        let date = parse_date(date_text)?;

        let amount_text = cell(record, Some(cols.amount))
            .ok_or_else(|| CsvError::InvalidAmount(String::new()))?;
        let signed = parse_amount(amount_text)?;

        let merchant = cell(record, cols.custom_name)
            .or_else(|| cell(record, cols.name))
            .map(str::to_string);
        let description = cell(record, cols.description)
            .map(str::to_string)
            .or_else(|| merchant.clone())
            .unwrap_or_default();

        let account = AccountInfo {
            account_name: cell(record, cols.account_name).map(str::to_string),
            account_number: cell(record, cols.account_number).map(str::to_string),
            institution_name: cell(record, cols.institution_name).map(str::to_string),
        };

        let fingerprint = fingerprint(
            self.user_id,
            date,
            signed,
            merchant.as_deref().unwrap_or(&description),
            account.account_number.as_deref(),
        );

        Ok(NormalizedRow {
            row_index,
            date,
            amount: signed.abs(),
            transaction_type: self.sign_convention.classify(signed),
            description,
            merchant,
            raw_category: cell(record, cols.category).map(str::to_string),
            account,
            fingerprint,
        })
    }
}

/// Lazy iterator over normalized rows; unparseable rows are logged and skipped.
pub struct NormalizedRows<'a> {
    statement: &'a ParsedStatement<'a>,
    records: csv::StringRecordsIntoIter<&'a [u8]>,
    position: usize,
    dropped: usize,
}

impl NormalizedRows<'_> {
    /// Rows skipped so far because their date or amount could not be parsed.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl Iterator for NormalizedRows<'_> {
    type Item = NormalizedRow;

    fn next(&mut self) -> Option<NormalizedRow> {
        loop {
            let result = self.records.next()?;
            self.position += 1;
            let row_index = self.position;

            let outcome = result.map_err(CsvError::from).and_then(|record| {
                if record.iter().all(|f| f.trim().is_empty()) {
                    Ok(None)
                } else {
                    self.statement.normalize_record(row_index, &record).map(Some)
                }
            });

            match outcome {
                Ok(Some(row)) => return Some(row),
                Ok(None) => continue,
                Err(e) => {
                    self.dropped += 1;
                    warn!(row = row_index, error = %e, "Dropping unparseable CSV row");
                }
            }
        }
    }
}

/// Keeps only rows dated inside `period`.
pub fn in_period<I>(rows: I, period: YearMonth) -> impl Iterator<Item = NormalizedRow>
where
    I: IntoIterator<Item = NormalizedRow>,
{
    rows.into_iter().filter(move |row| period.contains(row.date))
}

fn reader_for(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes())
}

fn cell(record: &StringRecord, column: Option<usize>) -> Option<&str> {
    column
        .and_then(|c| record.get(c))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_date(s: &str) -> Result<NaiveDate, CsvError> {
    let s = s.trim();

    for fmt in &[
        "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%m-%d-%Y", "%d-%m-%Y",
    ] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(CsvError::InvalidDate(s.to_string()))
}

/// Signed amount; accepts `$`, thousands separators and accounting parentheses.
fn parse_amount(s: &str) -> Result<Money, CsvError> {
    let s = s.trim();
    let (negative, s) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };
    let s = s.replace([',', '$', ' '], "");
    let mut dec = Decimal::from_str(&s).map_err(|_| CsvError::InvalidAmount(s.to_string()))?;
    if negative {
        dec = -dec;
    }
    let money = Money::from_decimal(dec);
    if money.checked_cents().is_none() {
        return Err(CsvError::InvalidAmount(s.to_string()));
    }
    Ok(money)
}
