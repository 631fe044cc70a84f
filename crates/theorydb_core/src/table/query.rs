//! Queries, scans and pagination.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use theorydb_codec::Item;
use tracing::{debug, warn};

use super::Table;
use crate::backend::{PageResponse, QueryRequest, ScanRequest};
use crate::cursor::{decode_cursor, encode_cursor, Cursor, SortDirection};
use crate::error::{CoreError, CoreResult};
use crate::expr::{
    compile_filter, compile_key_condition, compile_projection, Filter, Placeholders,
    SortKeyCondition,
};
use crate::model::{IndexKind, Record};
use crate::retry::RetryConfig;
use crate::types::Value;

/// One page of decoded records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Records on this page, in store order.
    pub items: Vec<T>,
    /// Token for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// True if there is no next page.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Options for [`Table::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Sort key condition.
    pub sort: Option<SortKeyCondition>,
    /// Secondary index to read.
    pub index: Option<String>,
    /// Maximum items evaluated per page; must be positive.
    pub limit: Option<u32>,
    /// Resume token from a previous page.
    pub cursor: Option<String>,
    /// Ascending sort key order.
    pub scan_forward: bool,
    /// Strongly consistent read; not allowed on global indexes.
    pub consistent_read: bool,
    /// Fields to return.
    pub projection: Option<Vec<String>>,
    /// Post-read filter.
    pub filter: Option<Filter>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sort: None,
            index: None,
            limit: None,
            cursor: None,
            scan_forward: true,
            consistent_read: false,
            projection: None,
            filter: None,
        }
    }
}

impl QueryOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the sort key.
    #[must_use]
    pub fn sort(mut self, condition: SortKeyCondition) -> Self {
        self.sort = Some(condition);
        self
    }

    /// Read a secondary index.
    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Limit items per page.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continue from a cursor.
    #[must_use]
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Read in descending sort key order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.scan_forward = false;
        self
    }

    /// Request a strongly consistent read.
    #[must_use]
    pub fn consistent_read(mut self, value: bool) -> Self {
        self.consistent_read = value;
        self
    }

    /// Return only these fields.
    #[must_use]
    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Filter items after the read.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn direction(&self) -> SortDirection {
        SortDirection::from_forward(self.scan_forward)
    }
}

/// Options for [`Table::scan`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    /// Secondary index to read.
    pub index: Option<String>,
    /// Maximum items evaluated per page; must be positive.
    pub limit: Option<u32>,
    /// Resume token from a previous page.
    pub cursor: Option<String>,
    /// Strongly consistent read; not allowed on global indexes.
    pub consistent_read: bool,
    /// Fields to return.
    pub projection: Option<Vec<String>>,
    /// Post-read filter.
    pub filter: Option<Filter>,
    /// Segment of a parallel scan; requires `total_segments`.
    pub segment: Option<u32>,
    /// Segments in a parallel scan; requires `segment`.
    pub total_segments: Option<u32>,
}

impl ScanOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a secondary index.
    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Limit items per page.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continue from a cursor.
    #[must_use]
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Request a strongly consistent read.
    #[must_use]
    pub fn consistent_read(mut self, value: bool) -> Self {
        self.consistent_read = value;
        self
    }

    /// Return only these fields.
    #[must_use]
    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Filter items after the read.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Read one segment of a parallel scan.
    #[must_use]
    pub fn segment(mut self, segment: u32, total_segments: u32) -> Self {
        self.segment = Some(segment);
        self.total_segments = Some(total_segments);
        self
    }
}

/// Key attributes of the table or an index, by wire name.
struct ResolvedIndex<'a> {
    partition: &'a str,
    sort: Option<&'a str>,
    kind: Option<IndexKind>,
}

impl<T: Record> Table<T> {
    /// Read one page of a partition.
    ///
    /// # Errors
    ///
    /// Validation errors for a strongly consistent read on a global index,
    /// a null partition, a zero limit, a sort condition on a model or index
    /// without a sort key, an unknown index, and a cursor that is malformed
    /// or belongs to a different index or direction.
    pub fn query(&self, partition: impl Into<Value>, options: &QueryOptions) -> CoreResult<Page<T>> {
        let partition = partition.into();
        let request = self.query_request(&partition, options)?;
        debug!(
            table = %self.table_name,
            operation = "query",
            index = ?request.index_name,
            "sending request"
        );
        let response = self.backend.query(&request)?;
        self.page(
            response,
            options.index.as_deref(),
            Some(options.direction()),
        )
    }

    /// Read every page of a partition, starting at `options.cursor`.
    pub fn query_all(&self, partition: impl Into<Value>, options: &QueryOptions) -> CoreResult<Vec<T>> {
        let partition = partition.into();
        let mut options = options.clone();
        let mut out = Vec::new();
        loop {
            self.cancel.check()?;
            let page = self.query(partition.clone(), &options)?;
            out.extend(page.items);
            match page.next_cursor {
                Some(cursor) => options.cursor = Some(cursor),
                None => return Ok(out),
            }
        }
    }

    /// Query with the table's retry settings until `verify` accepts the
    /// page (by default: until the page is non-empty).
    ///
    /// When the budget runs out without an error the last page is returned.
    pub fn query_with_retry(
        &self,
        partition: impl Into<Value>,
        options: &QueryOptions,
        verify: Option<&dyn Fn(&Page<T>) -> bool>,
    ) -> CoreResult<Page<T>> {
        let retry = self.config.retry;
        self.query_with_retry_config(partition, options, &retry, verify)
    }

    /// [`query_with_retry`](Self::query_with_retry) with explicit settings.
    pub fn query_with_retry_config(
        &self,
        partition: impl Into<Value>,
        options: &QueryOptions,
        retry: &RetryConfig,
        verify: Option<&dyn Fn(&Page<T>) -> bool>,
    ) -> CoreResult<Page<T>> {
        retry.validate()?;
        let partition = partition.into();
        self.retry_pages("query", retry, verify, || self.query(partition.clone(), options))
    }

    /// Read one page of the table or an index.
    ///
    /// # Errors
    ///
    /// As for [`query`](Self::query), plus `segment` and `total_segments`
    /// given without each other or with `segment >= total_segments`.
    pub fn scan(&self, options: &ScanOptions) -> CoreResult<Page<T>> {
        let request = self.scan_request(options)?;
        debug!(
            table = %self.table_name,
            operation = "scan",
            index = ?request.index_name,
            segment = ?request.segment,
            "sending request"
        );
        let response = self.backend.scan(&request)?;
        self.page(response, options.index.as_deref(), None)
    }

    /// Read every page of a scan, starting at `options.cursor`.
    pub fn scan_all(&self, options: &ScanOptions) -> CoreResult<Vec<T>> {
        let mut options = options.clone();
        let mut out = Vec::new();
        loop {
            self.cancel.check()?;
            let page = self.scan(&options)?;
            out.extend(page.items);
            match page.next_cursor {
                Some(cursor) => options.cursor = Some(cursor),
                None => return Ok(out),
            }
        }
    }

    /// Scan with the table's retry settings until `verify` accepts the page.
    pub fn scan_with_retry(
        &self,
        options: &ScanOptions,
        verify: Option<&dyn Fn(&Page<T>) -> bool>,
    ) -> CoreResult<Page<T>> {
        let retry = self.config.retry;
        self.scan_with_retry_config(options, &retry, verify)
    }

    /// [`scan_with_retry`](Self::scan_with_retry) with explicit settings.
    pub fn scan_with_retry_config(
        &self,
        options: &ScanOptions,
        retry: &RetryConfig,
        verify: Option<&dyn Fn(&Page<T>) -> bool>,
    ) -> CoreResult<Page<T>> {
        retry.validate()?;
        self.retry_pages("scan", retry, verify, || self.scan(options))
    }

    /// Scan every segment to exhaustion on a pool of `max_workers` threads
    /// (default: the table's `scan_workers`) and concatenate the results in
    /// segment order.
    ///
    /// `options.segment`, `options.total_segments` and `options.cursor` are
    /// ignored. The first failing segment's error is returned.
    pub fn scan_all_segments(
        &self,
        total_segments: u32,
        max_workers: Option<usize>,
        options: &ScanOptions,
    ) -> CoreResult<Vec<T>> {
        if total_segments == 0 {
            return Err(CoreError::validation("total_segments must be > 0"));
        }
        let segments = total_segments as usize;
        let workers = max_workers.unwrap_or(self.config.scan_workers);
        if workers == 0 {
            return Err(CoreError::validation("max_workers must be > 0"));
        }
        let workers = workers.min(segments);

        let next = AtomicU32::new(0);
        let slots: Vec<Mutex<Option<CoreResult<Vec<T>>>>> =
            (0..segments).map(|_| Mutex::new(None)).collect();

        debug!(table = %self.table_name, total_segments, workers, "starting segmented scan");
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let segment = next.fetch_add(1, Ordering::SeqCst);
                    if segment >= total_segments {
                        break;
                    }
                    let mut segment_options = options.clone();
                    segment_options.cursor = None;
                    segment_options.segment = Some(segment);
                    segment_options.total_segments = Some(total_segments);
                    let result = self.scan_all(&segment_options);
                    *slots[segment as usize].lock() = Some(result);
                });
            }
        });

        let mut out = Vec::new();
        for slot in slots {
            out.extend(slot.into_inner().unwrap_or(Err(CoreError::Cancelled))?);
        }
        Ok(out)
    }

    fn retry_pages(
        &self,
        operation: &'static str,
        retry: &RetryConfig,
        verify: Option<&dyn Fn(&Page<T>) -> bool>,
        mut read: impl FnMut() -> CoreResult<Page<T>>,
    ) -> CoreResult<Page<T>> {
        let mut delay = retry.initial_delay;
        let mut last_page = None;

        for attempt in 0..=retry.max_retries {
            self.cancel.check()?;
            match read() {
                Ok(page) => {
                    let accepted = match verify {
                        Some(verify) => verify(&page),
                        None => !retry.retry_on_empty || !page.items.is_empty(),
                    };
                    if accepted {
                        return Ok(page);
                    }
                    last_page = Some(page);
                }
                Err(err) => {
                    if !retry.retry_on_error || !err.is_retryable() || attempt == retry.max_retries {
                        return Err(err);
                    }
                    warn!(table = %self.table_name, operation, attempt, error = %err, "retrying after error");
                }
            }

            if attempt < retry.max_retries {
                debug!(table = %self.table_name, operation, attempt, delay_ms = delay.as_millis() as u64, "page not accepted, backing off");
                self.backoff(delay)?;
                delay = retry.next_delay(delay);
            }
        }

        last_page.ok_or_else(|| CoreError::validation("retry exhausted without results"))
    }

    fn resolve_index(&self, index: Option<&str>) -> CoreResult<ResolvedIndex<'_>> {
        let model = self.model();
        match index {
            None => Ok(ResolvedIndex {
                partition: model.partition_key().attribute_name(),
                sort: model.sort_key().map(|attr| attr.attribute_name()),
                kind: None,
            }),
            Some(name) => {
                let index = model
                    .index(name)
                    .ok_or_else(|| CoreError::validation(format!("unknown index: {name}")))?;
                Ok(ResolvedIndex {
                    partition: &index.partition,
                    sort: index.sort.as_deref(),
                    kind: Some(index.kind),
                })
            }
        }
    }

    fn check_consistent_read(resolved: &ResolvedIndex<'_>, consistent_read: bool) -> CoreResult<()> {
        if resolved.kind == Some(IndexKind::Global) && consistent_read {
            return Err(CoreError::validation("consistent_read is not supported for GSIs"));
        }
        Ok(())
    }

    fn check_limit(limit: Option<u32>) -> CoreResult<()> {
        if limit == Some(0) {
            return Err(CoreError::validation("limit must be > 0"));
        }
        Ok(())
    }

    fn start_key(
        cursor: Option<&str>,
        index: Option<&str>,
        sort: Option<SortDirection>,
        operation: &str,
    ) -> CoreResult<Option<Item>> {
        let Some(token) = cursor else {
            return Ok(None);
        };
        let cursor: Cursor =
            decode_cursor(token).map_err(|_| CoreError::validation("invalid cursor"))?;
        cursor.ensure_matches(index, sort, operation)?;
        Ok(Some(cursor.last_key))
    }

    pub(crate) fn query_request(&self, partition: &Value, options: &QueryOptions) -> CoreResult<QueryRequest> {
        let resolved = self.resolve_index(options.index.as_deref())?;
        Self::check_consistent_read(&resolved, options.consistent_read)?;
        if partition.is_null() {
            return Err(CoreError::validation("partition is required"));
        }
        Self::check_limit(options.limit)?;

        let mut placeholders = Placeholders::new();
        let sort = match &options.sort {
            None => None,
            Some(condition) => {
                let attr = resolved
                    .sort
                    .ok_or_else(|| CoreError::validation("model/index does not define a sort key"))?;
                Some((attr, condition))
            }
        };
        let key_condition_expression =
            compile_key_condition(&self.codec, resolved.partition, partition, sort, &mut placeholders)?;

        let exclusive_start_key = Self::start_key(
            options.cursor.as_deref(),
            options.index.as_deref(),
            Some(options.direction()),
            "query",
        )?;
        let projection_expression = options
            .projection
            .as_deref()
            .map(|fields| compile_projection(fields, self.model(), &mut placeholders))
            .transpose()?;
        let filter_expression = self.filter_expression(options.filter.as_ref(), &mut placeholders)?;

        let (names, values) = placeholders.into_parts();
        Ok(QueryRequest {
            table_name: self.table_name.clone(),
            index_name: options.index.clone(),
            key_condition_expression,
            filter_expression,
            projection_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            limit: options.limit,
            exclusive_start_key,
            scan_index_forward: options.scan_forward,
            consistent_read: options.consistent_read,
        })
    }

    pub(crate) fn scan_request(&self, options: &ScanOptions) -> CoreResult<ScanRequest> {
        let resolved = self.resolve_index(options.index.as_deref())?;
        Self::check_consistent_read(&resolved, options.consistent_read)?;
        Self::check_limit(options.limit)?;

        let exclusive_start_key =
            Self::start_key(options.cursor.as_deref(), options.index.as_deref(), None, "scan")?;

        let mut placeholders = Placeholders::new();
        let projection_expression = options
            .projection
            .as_deref()
            .map(|fields| compile_projection(fields, self.model(), &mut placeholders))
            .transpose()?;
        let filter_expression = self.filter_expression(options.filter.as_ref(), &mut placeholders)?;

        let (segment, total_segments) = match (options.segment, options.total_segments) {
            (None, None) => (None, None),
            (Some(segment), Some(total)) => {
                if total == 0 || segment >= total {
                    return Err(CoreError::validation("invalid segment/total_segments"));
                }
                (Some(segment), Some(total))
            }
            _ => {
                return Err(CoreError::validation(
                    "segment and total_segments must be provided together",
                ))
            }
        };

        let (names, values) = placeholders.into_parts();
        Ok(ScanRequest {
            table_name: self.table_name.clone(),
            index_name: options.index.clone(),
            filter_expression,
            projection_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            limit: options.limit,
            exclusive_start_key,
            consistent_read: options.consistent_read,
            segment,
            total_segments,
        })
    }

    fn filter_expression(
        &self,
        filter: Option<&Filter>,
        placeholders: &mut Placeholders,
    ) -> CoreResult<Option<String>> {
        match filter {
            None => Ok(None),
            Some(filter) => {
                let expression = compile_filter(filter, &self.codec, placeholders)?;
                Ok((!expression.is_empty()).then_some(expression))
            }
        }
    }

    fn page(
        &self,
        response: PageResponse,
        index: Option<&str>,
        sort: Option<SortDirection>,
    ) -> CoreResult<Page<T>> {
        let items = response
            .items
            .iter()
            .map(|item| self.decode(item))
            .collect::<CoreResult<Vec<_>>>()?;
        let next_cursor = match response.last_evaluated_key {
            Some(last) if !last.is_empty() => Some(encode_cursor(&last, index, sort)?),
            _ => None,
        };
        Ok(Page { items, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{stored, Note};
    use super::*;
    use crate::expr::Condition;
    use crate::retry::RetryConfig;
    use crate::test_support::{Call, Recorder, Reply, StepClock};
    use std::sync::Arc;
    use std::time::Duration;
    use theorydb_codec::AttributeValue;

    fn table(recorder: &Arc<Recorder>) -> Table<Note> {
        Table::new(recorder.clone()).unwrap()
    }

    fn page(items: Vec<Item>, last: Option<Item>) -> Reply {
        Reply::Page(PageResponse {
            items,
            last_evaluated_key: last,
        })
    }

    fn last_key(pk: &str, sk: &str) -> Item {
        Item::from([
            ("pk".to_string(), AttributeValue::from(pk)),
            ("sk".to_string(), AttributeValue::from(sk)),
        ])
    }

    #[test]
    fn query_request_shape() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let options = QueryOptions::new()
            .sort(SortKeyCondition::begins_with("0"))
            .limit(10)
            .descending()
            .filter(Condition::gt("value", 1));
        notes.query("A", &options).unwrap();

        let calls = recorder.calls();

        let Call::Query(request) = &calls[0] else {
            panic!("expected query");
        };
        assert_eq!(request.key_condition_expression, "#pk = :pk AND begins_with(#sk, :sk)");
        assert_eq!(request.filter_expression.as_deref(), Some("#f_value > :f1"));
        assert_eq!(request.limit, Some(10));
        assert!(!request.scan_index_forward);
        assert_eq!(request.expression_attribute_values[":sk"], AttributeValue::from("0"));
    }

    #[test]
    fn query_validation() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let cases = [
            (
                QueryOptions::new().index("byValue").consistent_read(true),
                "consistent_read is not supported for GSIs",
            ),
            (QueryOptions::new().limit(0), "limit must be > 0"),
            (QueryOptions::new().index("nope"), "unknown index: nope"),
            (
                QueryOptions::new().index("byValue").sort(SortKeyCondition::eq("x")),
                "model/index does not define a sort key",
            ),
            (QueryOptions::new().cursor("***"), "invalid cursor"),
        ];
        for (options, message) in cases {
            let err = notes.query("A", &options).unwrap_err();
            assert_eq!(err.to_string(), format!("validation error: {message}"));
        }
        let err = notes.query(Value::Null, &QueryOptions::new()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: partition is required");
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn local_index_allows_consistent_read() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let options = QueryOptions::new()
            .index("byNote")
            .consistent_read(true)
            .sort(SortKeyCondition::ge("m"));
        notes.query("A", &options).unwrap();
        let calls = recorder.calls();
        let Call::Query(request) = &calls[0] else {
            panic!("expected query");
        };
        assert_eq!(request.expression_attribute_names["#sk"], "note");
        assert_eq!(request.index_name.as_deref(), Some("byNote"));
    }

    #[test]
    fn cursor_carries_index_and_direction() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(page(vec![stored("A", "1", 1)], Some(last_key("A", "1"))));
        let notes = table(&recorder);
        let first = notes.query("A", &QueryOptions::new().descending()).unwrap();
        let cursor = first.next_cursor.clone().unwrap();
        let decoded = decode_cursor(&cursor).unwrap();
        assert_eq!(decoded.sort, Some(SortDirection::Desc));
        assert_eq!(decoded.index, None);

        let err = notes
            .query("A", &QueryOptions::new().cursor(cursor.clone()))
            .unwrap_err();
        assert_eq!(err.to_string(), "validation error: cursor sort does not match query");

        notes
            .query("A", &QueryOptions::new().descending().cursor(cursor))
            .unwrap();
        let calls = recorder.calls();
        let Call::Query(request) = &calls[1] else {
            panic!("expected query");
        };
        assert_eq!(request.exclusive_start_key, Some(last_key("A", "1")));
    }

    #[test]
    fn query_all_follows_cursors() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(page(vec![stored("A", "1", 1)], Some(last_key("A", "1"))));
        recorder.reply(page(vec![stored("A", "2", 2)], None));
        let values: Vec<i64> = table(&recorder)
            .query_all("A", &QueryOptions::new())
            .unwrap()
            .into_iter()
            .map(|n| n.value)
            .collect();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(recorder.calls().len(), 2);
    }

    #[test]
    fn scan_segments_validation() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let mut options = ScanOptions::new();
        options.segment = Some(1);
        let err = notes.scan(&options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: segment and total_segments must be provided together"
        );
        let err = notes.scan(&ScanOptions::new().segment(2, 2)).unwrap_err();
        assert_eq!(err.to_string(), "validation error: invalid segment/total_segments");

        notes.scan(&ScanOptions::new().segment(1, 2)).unwrap();
        let calls = recorder.calls();
        let Call::Scan(request) = &calls[0] else {
            panic!("expected scan");
        };
        assert_eq!((request.segment, request.total_segments), (Some(1), Some(2)));
    }

    #[test]
    fn scan_cursor_has_no_direction() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(page(vec![], Some(last_key("A", "1"))));
        let notes = table(&recorder);
        let cursor = notes
            .scan(&ScanOptions::new().index("byNote"))
            .unwrap()
            .next_cursor
            .unwrap();
        let decoded = decode_cursor(&cursor).unwrap();
        assert_eq!(decoded.index.as_deref(), Some("byNote"));
        assert_eq!(decoded.sort, None);

        let err = notes.scan(&ScanOptions::new().cursor(cursor)).unwrap_err();
        assert_eq!(err.to_string(), "validation error: cursor index does not match scan");
    }

    #[test]
    fn retry_until_non_empty() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(page(vec![], None));
        recorder.reply(Reply::Fail(crate::backend::BackendError::throttled()));
        recorder.reply(page(vec![stored("A", "1", 1)], None));
        let clock = Arc::new(StepClock::at(0.0));
        let notes = Table::<Note>::builder(recorder.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        let page = notes.query_with_retry("A", &QueryOptions::new(), None).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(
            *clock.sleeps.lock(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn retry_returns_last_page_when_exhausted() {
        let recorder = Arc::new(Recorder::new());
        let clock = Arc::new(StepClock::at(0.0));
        let notes = Table::<Note>::builder(recorder.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        let retry = RetryConfig::new().max_retries(2);
        let verify = |page: &Page<Note>| page.items.len() > 5;
        let page = notes
            .scan_with_retry_config(&ScanOptions::new(), &retry, Some(&verify))
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(recorder.calls().len(), 3);
        assert_eq!(clock.sleeps.lock().len(), 2);
    }

    #[test]
    fn retry_does_not_retry_validation_or_disabled_errors() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(Reply::Fail(crate::backend::BackendError::throttled()));
        let notes = table(&recorder);
        let retry = RetryConfig::new().retry_on_error(false);
        assert!(notes
            .query_with_retry_config("A", &QueryOptions::new(), &retry, None)
            .unwrap_err()
            .is_retryable());

        let err = notes
            .query_with_retry("A", &QueryOptions::new().limit(0), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(recorder.calls().len(), 1);
    }

    #[test]
    fn cancelled_retry_stops() {
        let recorder = Arc::new(Recorder::new());
        let notes = Table::<Note>::builder(recorder.clone())
            .clock(Arc::new(StepClock::at(0.0)))
            .build()
            .unwrap();
        notes.cancellation_token().cancel();
        let err = notes.query_with_retry("A", &QueryOptions::new(), None).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn segmented_scan_validation() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let err = notes.scan_all_segments(0, None, &ScanOptions::new()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: total_segments must be > 0");
        let err = notes.scan_all_segments(2, Some(0), &ScanOptions::new()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: max_workers must be > 0");
    }
}
