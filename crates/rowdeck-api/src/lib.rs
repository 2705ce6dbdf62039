use std::sync::Arc;

use rowdeck_core::{decode_csv, DeckError, PageRequest, Record, RejectedRow};
use rowdeck_store_sqlite::{RecordStore, SearchPredicate, StoreError};
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Invalid(#[from] DeckError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Stable machine-readable discriminator carried in error envelopes.
    /// Every store-side failure collapses to `store`; callers map that to an
    /// internal error without exposing query detail.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid(err) => err.kind(),
            Self::Store(_) => "store",
        }
    }
}

/// Wire shape of one record. Boundary naming is camelCase and independent of
/// the storage column names.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub post_id: i64,
    pub id: i64,
    pub name: String,
    pub email: String,
    pub body: String,
}

impl From<Record> for RecordPayload {
    fn from(record: Record) -> Self {
        Self {
            post_id: record.post_id,
            id: record.id,
            name: record.name,
            email: record.email,
            body: record.body,
        }
    }
}

/// One page of records plus the pagination metadata a client needs to render
/// controls: total matching rows, page count, and the served page/limit.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub data: Vec<RecordPayload>,
    pub total_records: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted_count: usize,
    pub rejected_rows: Vec<RejectedRow>,
}

/// Orchestration facade over the record store.
///
/// The store is injected once at construction and shared by reference, so
/// every handler, CLI command, and test exercises the same instance instead
/// of reaching for process-global state.
#[derive(Clone)]
pub struct RowdeckApi {
    store: Arc<RecordStore>,
}

impl RowdeckApi {
    #[must_use]
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Decode an uploaded CSV payload and persist the accepted rows in one
    /// batch. Row-level problems become rejection entries in the report and
    /// never abort the upload; upload-level problems fail the whole call, and
    /// nothing becomes visible to queries until the batch commits.
    ///
    /// # Errors
    /// Returns [`ApiError::Invalid`] for empty, non-UTF-8, or header-less
    /// payloads, and [`ApiError::Store`] when the batch insert fails.
    pub fn ingest_csv(&self, bytes: &[u8]) -> Result<IngestReport, ApiError> {
        let upload = decode_csv(bytes)?;
        if !upload.rows.is_empty() {
            self.store.insert_batch(&upload.rows)?;
        }
        Ok(IngestReport { accepted_count: upload.rows.len(), rejected_rows: upload.rejected })
    }

    /// Serve one listing page filtered by an optional substring query.
    ///
    /// The predicate is built once and drives both the count and the data
    /// query, so the two always agree on which rows are in the filtered set.
    /// The two store calls do not share a read transaction: a concurrent
    /// upload committing between them can make `total_records` and the page
    /// contents reflect different moments. Callers get eventually consistent
    /// pagination metadata, never a failed request.
    ///
    /// # Errors
    /// Returns [`ApiError::Store`] when either query fails.
    pub fn search(&self, query: Option<&str>, page: PageRequest) -> Result<ListingPage, ApiError> {
        let predicate = SearchPredicate::matching(query);
        let total_records = self.store.count(&predicate)?;
        let window = page.window(total_records);
        let records = self.store.query_range(&predicate, window.offset, page.limit())?;

        Ok(ListingPage {
            data: records.into_iter().map(RecordPayload::from).collect(),
            total_records,
            total_pages: window.total_pages,
            current_page: page.page(),
            limit: page.limit(),
        })
    }

    /// Serve one unfiltered listing page.
    ///
    /// # Errors
    /// Returns [`ApiError::Store`] when the underlying queries fail.
    pub fn list(&self, page: PageRequest) -> Result<ListingPage, ApiError> {
        self.search(None, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_api() -> Result<RowdeckApi, ApiError> {
        Ok(RowdeckApi::new(Arc::new(RecordStore::open_in_memory()?)))
    }

    fn page(page: u64, limit: u64) -> PageRequest {
        match PageRequest::new(page, limit) {
            Ok(request) => request,
            Err(err) => panic!("page fixture should validate: {err}"),
        }
    }

    // Test IDs: TAPI-001
    #[test]
    fn ingest_then_list_round_trips_every_field() -> Result<(), ApiError> {
        let api = test_api()?;

        let report = api.ingest_csv(
            b"postId,id,name,email,body\n\
              1,1,alice,alice@example.com,first comment\n\
              1,2,bob,bob@example.com,second comment\n\
              2,3,carol,carol@example.com,third comment\n",
        )?;
        assert_eq!(report.accepted_count, 3);
        assert_eq!(report.rejected_rows, Vec::new());

        let listing = api.list(PageRequest::default())?;
        assert_eq!(listing.total_records, 3);
        assert_eq!(listing.total_pages, 1);
        assert_eq!(listing.current_page, 1);
        assert_eq!(listing.limit, 10);
        assert_eq!(
            listing.data[0],
            RecordPayload {
                post_id: 1,
                id: 1,
                name: "alice".to_string(),
                email: "alice@example.com".to_string(),
                body: "first comment".to_string(),
            }
        );
        assert_eq!(listing.data.iter().map(|record| record.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn partially_bad_upload_keeps_good_rows_and_reports_the_rest() -> Result<(), ApiError> {
        let api = test_api()?;

        let report = api.ingest_csv(
            b"postId,id,name,email,body\n\
              1,1,a,a@example.com,m1\n\
              1,oops,b,b@example.com,m2\n\
              1,3,c,c@example.com,m3\n\
              1,4,d,d@example.com,m4\n",
        )?;
        assert_eq!(report.accepted_count, 3);
        assert_eq!(report.rejected_rows.len(), 1);
        assert_eq!(report.rejected_rows[0].row, 2);

        let listing = api.list(PageRequest::default())?;
        assert_eq!(listing.total_records, 3);
        assert_eq!(listing.data.iter().map(|record| record.id).collect::<Vec<_>>(), vec![1, 3, 4]);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn search_matches_body_text_and_counts_agree() -> Result<(), ApiError> {
        let api = test_api()?;
        api.ingest_csv(
            b"postId,id,name,email,body\n\
              1,1,alice,alice@example.com,plain comment\n\
              1,2,bob,bob@example.com,mentions zebras once\n\
              1,3,carol,carol@example.com,another plain comment\n",
        )?;

        let listing = api.search(Some("zebra"), PageRequest::default())?;
        assert_eq!(listing.total_records, 1);
        assert_eq!(listing.total_pages, 1);
        assert_eq!(listing.data.len(), 1);
        assert_eq!(listing.data[0].id, 2);
        Ok(())
    }

    // Test IDs: TAPI-004
    #[test]
    fn pages_past_the_end_are_empty_with_intact_metadata() -> Result<(), ApiError> {
        let api = test_api()?;

        let mut upload = String::from("postId,id,name,email,body\n");
        for id in 1..=25 {
            upload.push_str(&format!("1,{id},user{id},user{id}@example.com,comment {id}\n"));
        }
        let report = api.ingest_csv(upload.as_bytes())?;
        assert_eq!(report.accepted_count, 25);

        let third = api.list(page(3, 10))?;
        assert_eq!(third.data.iter().map(|record| record.id).collect::<Vec<_>>(), vec![21, 22, 23, 24, 25]);
        assert_eq!(third.total_pages, 3);

        let ninth = api.list(page(9, 10))?;
        assert_eq!(ninth.data, Vec::new());
        assert_eq!(ninth.total_records, 25);
        assert_eq!(ninth.total_pages, 3);
        assert_eq!(ninth.current_page, 9);
        Ok(())
    }

    // Test IDs: TAPI-005
    #[test]
    fn wire_payloads_use_camel_case_names() -> Result<(), ApiError> {
        let api = test_api()?;
        api.ingest_csv(b"postId,id,name,email,body\n7,1,a,a@example.com,m\n")?;

        let listing = api.list(PageRequest::default())?;
        let value = match serde_json::to_value(&listing) {
            Ok(value) => value,
            Err(err) => panic!("listing should serialize: {err}"),
        };
        assert_eq!(value["totalRecords"], 1);
        assert_eq!(value["totalPages"], 1);
        assert_eq!(value["currentPage"], 1);
        assert_eq!(value["data"][0]["postId"], 7);
        assert_eq!(value["data"][0]["id"], 1);

        let report = IngestReport {
            accepted_count: 2,
            rejected_rows: vec![RejectedRow { row: 3, reason: "bad".to_string() }],
        };
        let value = match serde_json::to_value(&report) {
            Ok(value) => value,
            Err(err) => panic!("report should serialize: {err}"),
        };
        assert_eq!(value["acceptedCount"], 2);
        assert_eq!(value["rejectedRows"][0]["row"], 3);
        assert_eq!(value["rejectedRows"][0]["reason"], "bad");
        Ok(())
    }

    // Test IDs: TAPI-006
    #[test]
    fn re_uploading_existing_ids_fails_whole_batch_as_store_error() -> Result<(), ApiError> {
        let api = test_api()?;
        let upload = b"postId,id,name,email,body\n1,1,a,a@example.com,m1\n1,2,b,b@example.com,m2\n";
        api.ingest_csv(upload)?;

        let outcome = api.ingest_csv(upload);
        match outcome {
            Err(err @ ApiError::Store(_)) => assert_eq!(err.kind(), "store"),
            other => panic!("duplicate ids should surface a store error, got {other:?}"),
        }

        let listing = api.list(PageRequest::default())?;
        assert_eq!(listing.total_records, 2);
        Ok(())
    }

    // Test IDs: TAPI-007
    #[test]
    fn upload_level_failures_carry_queryable_kinds() -> Result<(), ApiError> {
        let api = test_api()?;

        match api.ingest_csv(b"") {
            Err(err @ ApiError::Invalid(DeckError::EmptyUpload)) => {
                assert_eq!(err.kind(), "empty_upload");
            }
            other => panic!("empty upload should be rejected, got {other:?}"),
        }

        match api.ingest_csv(b"postId,id,name\n1,1,a\n") {
            Err(err @ ApiError::Invalid(DeckError::MissingColumn(_))) => {
                assert_eq!(err.kind(), "missing_column");
            }
            other => panic!("missing headers should be rejected, got {other:?}"),
        }
        Ok(())
    }

    // Test IDs: TAPI-008
    #[test]
    fn all_rejected_upload_persists_nothing() -> Result<(), ApiError> {
        let api = test_api()?;

        let report = api.ingest_csv(
            b"postId,id,name,email,body\nx,1,a,a@example.com,m\n1,y,b,b@example.com,m\n",
        )?;
        assert_eq!(report.accepted_count, 0);
        assert_eq!(report.rejected_rows.len(), 2);

        let listing = api.list(PageRequest::default())?;
        assert_eq!(listing.total_records, 0);
        assert_eq!(listing.total_pages, 0);
        Ok(())
    }
}
