use serde::{Deserialize, Deserializer};
use std::io::Read;

use crate::workflows::lifecycle::{InternshipKind, OfferStatus};

/// One row of the offer catalogue CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OfferRecord {
    pub(crate) line: usize,
    pub(crate) reference: String,
    pub(crate) title: String,
    pub(crate) company: String,
    pub(crate) kind: InternshipKind,
    pub(crate) status: OfferStatus,
    pub(crate) location: String,
}

/// Rejected catalogue row, with its 1-based line number (header is line 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug)]
pub(crate) enum ParseError {
    Csv(csv::Error),
    Row(RowError),
}

impl From<csv::Error> for ParseError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

pub(crate) fn parse_offers<R: Read>(reader: R) -> Result<Vec<OfferRecord>, ParseError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();

    for (index, record) in csv_reader.deserialize::<OfferRow>().enumerate() {
        let row = record?;
        let line = index + 2;
        records.push(row.into_record(line).map_err(ParseError::Row)?);
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct OfferRow {
    reference: String,
    title: String,
    company: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    status: Option<String>,
    #[serde(default)]
    location: String,
}

impl OfferRow {
    fn into_record(self, line: usize) -> Result<OfferRecord, RowError> {
        let fail = |message: String| RowError { line, message };

        for (column, value) in [
            ("reference", &self.reference),
            ("title", &self.title),
            ("company", &self.company),
        ] {
            if value.is_empty() {
                return Err(fail(format!("{column} is required")));
            }
        }
        let kind = parse_kind(&self.kind)
            .ok_or_else(|| fail(format!("unknown internship type '{}'", self.kind)))?;
        let status = match self.status.as_deref() {
            None => OfferStatus::Open,
            Some(raw) => {
                parse_status(raw).ok_or_else(|| fail(format!("unknown offer status '{raw}'")))?
            }
        };

        Ok(OfferRecord {
            line,
            reference: self.reference,
            title: self.title,
            company: self.company,
            kind,
            status,
            location: self.location,
        })
    }
}

fn parse_kind(value: &str) -> Option<InternshipKind> {
    match value.to_ascii_lowercase().as_str() {
        "pfe" => Some(InternshipKind::Pfe),
        "other" | "summer" | "observation" => Some(InternshipKind::Other),
        _ => None,
    }
}

fn parse_status(value: &str) -> Option<OfferStatus> {
    match value.to_ascii_lowercase().as_str() {
        "open" | "published" => Some(OfferStatus::Open),
        "closed" | "archived" => Some(OfferStatus::Closed),
        _ => None,
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
