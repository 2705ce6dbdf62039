use std::num::IntErrorKind;

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DeckError {
    #[error("empty upload: file body contained no bytes")]
    EmptyUpload,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
}

impl DeckError {
    /// Stable machine-readable discriminator carried in error envelopes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyUpload => "empty_upload",
            Self::Decode(_) => "ingest_decode",
            Self::MissingColumn(_) => "missing_column",
            Self::InvalidPagination(_) => "invalid_pagination",
        }
    }
}

/// One persisted tabular row. `post_id` is the non-unique origin identifier
/// carried by the source file; `id` is the unique primary key.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub post_id: i64,
    pub id: i64,
    pub name: String,
    pub email: String,
    pub body: String,
}

/// Header names an upload MUST carry, in any column order.
pub const REQUIRED_HEADERS: [&str; 5] = ["postId", "id", "name", "email", "body"];

/// A data row excluded from an upload batch, with a human-readable reason.
/// Row numbers are 1-based over data rows; the header row is not counted.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RejectedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DecodedUpload {
    pub rows: Vec<Record>,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    post_id: usize,
    id: usize,
    name: usize,
    email: usize,
    body: usize,
}

fn map_columns(headers: &StringRecord) -> Result<ColumnMap, DeckError> {
    let locate = |wanted: &str| {
        headers
            .iter()
            .position(|header| header == wanted)
            .ok_or_else(|| DeckError::MissingColumn(wanted.to_string()))
    };
    Ok(ColumnMap {
        post_id: locate("postId")?,
        id: locate("id")?,
        name: locate("name")?,
        email: locate("email")?,
        body: locate("body")?,
    })
}

fn text_field(record: &StringRecord, index: usize, header: &str) -> Result<String, String> {
    record
        .get(index)
        .map(ToString::to_string)
        .ok_or_else(|| format!("missing field {header}"))
}

fn int_field(record: &StringRecord, index: usize, header: &str) -> Result<i64, String> {
    let raw = record.get(index).ok_or_else(|| format!("missing field {header}"))?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("field {header} is not an integer: {raw:?}"))
}

fn map_row(columns: ColumnMap, record: &StringRecord) -> Result<Record, String> {
    Ok(Record {
        post_id: int_field(record, columns.post_id, "postId")?,
        id: int_field(record, columns.id, "id")?,
        name: text_field(record, columns.name, "name")?,
        email: text_field(record, columns.email, "email")?,
        body: text_field(record, columns.body, "body")?,
    })
}

/// Decode an uploaded CSV payload into insertable records plus per-row
/// rejections.
///
/// The header row is mandatory and maps columns by name (see
/// [`REQUIRED_HEADERS`]), so column order in the file does not matter.
/// Malformed data rows become [`RejectedRow`] entries and never abort the
/// surrounding upload.
///
/// # Errors
/// Returns [`DeckError::EmptyUpload`] for a zero-byte payload,
/// [`DeckError::Decode`] when the payload is not UTF-8 text or the header row
/// cannot be read, and [`DeckError::MissingColumn`] when a required header is
/// absent.
pub fn decode_csv(bytes: &[u8]) -> Result<DecodedUpload, DeckError> {
    if bytes.is_empty() {
        return Err(DeckError::EmptyUpload);
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|_| DeckError::Decode("upload is not valid UTF-8 text".to_string()))?;
    // Spreadsheet exports often lead with a BOM that would corrupt the first header name.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| DeckError::Decode(format!("unreadable CSV header row: {err}")))?
        .clone();
    let columns = map_columns(&headers)?;

    let mut upload = DecodedUpload::default();
    for (index, outcome) in reader.records().enumerate() {
        let row = index + 1;
        match outcome {
            Ok(record) => match map_row(columns, &record) {
                Ok(parsed) => upload.rows.push(parsed),
                Err(reason) => upload.rejected.push(RejectedRow { row, reason }),
            },
            Err(err) => upload
                .rejected
                .push(RejectedRow { row, reason: format!("malformed CSV row: {err}") }),
        }
    }
    Ok(upload)
}

/// Default page number when the caller omits one or sends a non-numeric value.
pub const DEFAULT_PAGE: u64 = 1;
/// Default page size when the caller omits one or sends a non-numeric value.
pub const DEFAULT_LIMIT: u64 = 10;

/// A validated pagination request. Both components are always >= 1, so
/// window math never sees a zero divisor; the only ways to build one are
/// the validating constructors below.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PageRequest {
    page: u64,
    limit: u64,
}

impl PageRequest {
    /// # Errors
    /// Returns [`DeckError::InvalidPagination`] when either component is zero.
    pub fn new(page: u64, limit: u64) -> Result<Self, DeckError> {
        if page == 0 {
            return Err(DeckError::InvalidPagination(format!("page MUST be >= 1, got {page}")));
        }
        if limit == 0 {
            return Err(DeckError::InvalidPagination(format!("limit MUST be >= 1, got {limit}")));
        }
        Ok(Self { page, limit })
    }

    /// Build a request from raw query-string components.
    ///
    /// Absent or non-numeric components fall back to [`DEFAULT_PAGE`] and
    /// [`DEFAULT_LIMIT`]; numeric values below 1 are rejected, never clamped.
    /// Digits past the `i64` range still count as numeric: the component
    /// saturates to `u64::MAX`, which reads back as an empty page far past
    /// the end.
    ///
    /// # Errors
    /// Returns [`DeckError::InvalidPagination`] when a component parses to a
    /// value below 1.
    pub fn from_raw(page: Option<&str>, limit: Option<&str>) -> Result<Self, DeckError> {
        Ok(Self {
            page: parse_page_component("page", page, DEFAULT_PAGE)?,
            limit: parse_page_component("limit", limit, DEFAULT_LIMIT)?,
        })
    }

    #[must_use]
    pub fn page(self) -> u64 {
        self.page
    }

    #[must_use]
    pub fn limit(self) -> u64 {
        self.limit
    }

    /// Derive the zero-based row window for this request over a collection of
    /// `total_records` rows. `total_pages` is zero exactly when the collection
    /// is empty; a page past the end keeps its (out-of-range) offset so the
    /// caller naturally reads back an empty window rather than an error.
    #[must_use]
    pub fn window(self, total_records: u64) -> PageWindow {
        PageWindow {
            offset: self.page.saturating_sub(1).saturating_mul(self.limit),
            total_pages: total_records.div_ceil(self.limit),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: DEFAULT_PAGE, limit: DEFAULT_LIMIT }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PageWindow {
    pub offset: u64,
    pub total_pages: u64,
}

fn parse_page_component(name: &str, raw: Option<&str>, default: u64) -> Result<u64, DeckError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    match trimmed.parse::<i64>() {
        Ok(value) if value >= 1 => Ok(value.unsigned_abs()),
        Ok(value) => {
            Err(DeckError::InvalidPagination(format!("{name} MUST be >= 1, got {value}")))
        }
        // A digits-only value past the i64 range is still numeric: positive
        // overflow saturates to a page far past the end, negative overflow is
        // below 1 and rejected like any other nonpositive value.
        Err(err) => match err.kind() {
            IntErrorKind::PosOverflow => Ok(u64::MAX),
            IntErrorKind::NegOverflow => {
                Err(DeckError::InvalidPagination(format!("{name} MUST be >= 1, got {trimmed}")))
            }
            _ => Ok(default),
        },
    }
}
