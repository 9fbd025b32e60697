//! Fluent PostgREST query builder
//!
//! A single [`QueryBuilder`] accumulates exactly one request: chaining is
//! left-to-right append (table().select().eq().order()... each method
//! returns the concrete builder, never a new generic type), and a terminal
//! method (`execute`) consumes it into one HTTP call.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::postgrest::filter::{Filter, FilterValue, IsValue, TextSearchType};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    Rpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Many,
    Single,
    MaybeSingle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    Exact,
    Planned,
    Estimated,
}

impl CountMode {
    fn wire(self) -> &'static str {
        match self {
            CountMode::Exact => "exact",
            CountMode::Planned => "planned",
            CountMode::Estimated => "estimated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    MergeDuplicates,
    IgnoreDuplicates,
}

impl ConflictResolution {
    fn wire(self) -> &'static str {
        match self {
            ConflictResolution::MergeDuplicates => "merge-duplicates",
            ConflictResolution::IgnoreDuplicates => "ignore-duplicates",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, Default)]
pub struct ExplainOptions {
    pub analyze: bool,
    pub verbose: bool,
    pub settings: bool,
    pub buffers: bool,
    pub wal: bool,
    pub as_text: bool,
}

/// Outcome shape selected by the cardinality modifier in effect when
/// `execute` was called.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult<T> {
    Many(Vec<T>),
    One(T),
    MaybeOne(Option<T>),
}

impl<T> QueryResult<T> {
    /// Collapses any cardinality into a `Vec`: `Many` as-is, `One`/`MaybeOne`
    /// as a zero-or-one-element vec. Convenient at call sites that only
    /// ever used the default many-rows cardinality.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            QueryResult::Many(rows) => rows,
            QueryResult::One(row) => vec![row],
            QueryResult::MaybeOne(Some(row)) => vec![row],
            QueryResult::MaybeOne(None) => Vec::new(),
        }
    }
}

/// Accumulates exactly one PostgREST request; every modifier method
/// consumes and returns `Self`.
pub struct QueryBuilder {
    transport: Transport,
    schema: String,
    path: String,
    verb: Verb,
    select: Option<String>,
    filters: Vec<Filter>,
    order: Vec<String>,
    offset: u64,
    limit: Option<u64>,
    explicit_range: Option<(u64, u64)>,
    cardinality: Cardinality,
    count: Option<CountMode>,
    format: ResponseFormat,
    on_conflict: Option<String>,
    resolution: Option<ConflictResolution>,
    return_representation: bool,
    missing_default: bool,
    body: Option<JsonValue>,
    explain: Option<ExplainOptions>,
    head: bool,
}

impl QueryBuilder {
    pub(crate) fn table(transport: Transport, schema: String, table: &str) -> Self {
        Self {
            transport,
            schema,
            path: table.to_string(),
            verb: Verb::Select,
            select: None,
            filters: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
            explicit_range: None,
            cardinality: Cardinality::Many,
            count: None,
            format: ResponseFormat::Json,
            on_conflict: None,
            resolution: None,
            return_representation: false,
            missing_default: false,
            body: None,
            explain: None,
            head: false,
        }
    }

    pub(crate) fn rpc(transport: Transport, schema: String, function: &str, args: JsonValue) -> Self {
        Self {
            transport,
            schema,
            path: format!("rpc/{function}"),
            verb: Verb::Rpc,
            select: None,
            filters: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
            explicit_range: None,
            cardinality: Cardinality::Many,
            count: None,
            format: ResponseFormat::Json,
            on_conflict: None,
            resolution: None,
            return_representation: false,
            missing_default: false,
            body: Some(args),
            explain: None,
            head: false,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    pub fn insert(mut self, value: JsonValue) -> Self {
        self.verb = Verb::Insert;
        self.body = Some(value);
        self
    }

    pub fn update(mut self, value: JsonValue) -> Self {
        self.verb = Verb::Update;
        self.body = Some(value);
        self
    }

    pub fn delete(mut self) -> Self {
        self.verb = Verb::Delete;
        self
    }

    /// Insert with `on_conflict` resolution. Defaults to
    /// `resolution=merge-duplicates` and implies `return=representation`
    /// (matching the wire scenario in spec §8.3); call `ignore_duplicates`
    /// afterward to switch resolution.
    pub fn upsert(mut self, value: JsonValue) -> Self {
        self.verb = Verb::Insert;
        self.body = Some(value);
        self.resolution = Some(ConflictResolution::MergeDuplicates);
        self.return_representation = true;
        self
    }

    pub fn ignore_duplicates(mut self) -> Self {
        self.resolution = Some(ConflictResolution::IgnoreDuplicates);
        self
    }

    pub fn on_conflict(mut self, column: &str) -> Self {
        self.on_conflict = Some(column.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::eq(column, value, false))
    }

    pub fn neq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::neq(column, value, false))
    }

    pub fn gt(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::gt(column, value, false))
    }

    pub fn gte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::gte(column, value, false))
    }

    pub fn lt(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::lt(column, value, false))
    }

    pub fn lte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::lte(column, value, false))
    }

    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.filter(Filter::like(column, pattern, false))
    }

    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.filter(Filter::ilike(column, pattern, false))
    }

    pub fn is(self, column: &str, value: IsValue) -> Self {
        self.filter(Filter::is(column, value, false))
    }

    pub fn in_list(self, column: &str, values: Vec<FilterValue>) -> Self {
        self.filter(Filter::in_list(column, values, false))
    }

    pub fn contains(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::contains(column, value, false))
    }

    pub fn contained_by(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::contained_by(column, value, false))
    }

    pub fn overlaps(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::overlaps(column, value, false))
    }

    pub fn text_search(self, column: &str, query: &str, search_type: TextSearchType, config: Option<&str>) -> Self {
        self.filter(Filter::text_search(column, query, search_type, config, false))
    }

    /// Expands `pairs` into repeated `eq` filters
    pub fn match_(mut self, pairs: Vec<(String, FilterValue)>) -> Self {
        self.filters.extend(Filter::match_object(pairs));
        self
    }

    pub fn or(self, expr: &str) -> Self {
        self.filter(Filter::or(expr))
    }

    pub fn and(self, expr: &str) -> Self {
        self.filter(Filter::and(expr))
    }

    pub fn order(mut self, column: &str, ascending: bool, nulls: Option<NullsOrder>) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        let mut segment = format!("{column}.{direction}");
        if let Some(nulls) = nulls {
            segment.push_str(match nulls {
                NullsOrder::First => ".nullsfirst",
                NullsOrder::Last => ".nullslast",
            });
        }
        self.order.push(segment);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = n;
        self
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.explicit_range = Some((from, to));
        self
    }

    pub fn single(mut self) -> Self {
        self.cardinality = Cardinality::Single;
        self
    }

    pub fn maybe_single(mut self) -> Self {
        self.cardinality = Cardinality::MaybeSingle;
        self
    }

    pub fn csv(mut self) -> Self {
        self.format = ResponseFormat::Csv;
        self
    }

    pub fn explain(mut self, options: ExplainOptions) -> Self {
        self.explain = Some(options);
        self
    }

    pub fn count(mut self, mode: CountMode) -> Self {
        self.count = Some(mode);
        self
    }

    pub fn returning_representation(mut self) -> Self {
        self.return_representation = true;
        self
    }

    pub fn default_to_null(mut self) -> Self {
        self.missing_default = true;
        self
    }

    pub fn default_to_undefined(mut self) -> Self {
        self.missing_default = false;
        self
    }

    pub fn head(mut self) -> Self {
        self.head = true;
        self
    }

    fn http_method(&self) -> Method {
        match self.verb {
            Verb::Select => if self.head { Method::HEAD } else { Method::GET },
            Verb::Insert => Method::POST,
            Verb::Update => Method::PATCH,
            Verb::Delete => Method::DELETE,
            Verb::Rpc => Method::POST,
        }
    }

    fn prefer_header(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(resolution) = self.resolution {
            parts.push(format!("resolution={}", resolution.wire()));
        }
        if matches!(self.verb, Verb::Insert | Verb::Update | Verb::Delete) {
            parts.push(format!(
                "return={}",
                if self.return_representation { "representation" } else { "minimal" }
            ));
        }
        if let Some(count) = self.count {
            parts.push(format!("count={}", count.wire()));
        }
        if self.missing_default {
            parts.push("missing=default".to_string());
        }
        if parts.is_empty() { None } else { Some(parts.join(",")) }
    }

    fn accept_header(&self) -> Option<&'static str> {
        if let Some(explain) = &self.explain {
            return Some(if explain.as_text {
                "application/vnd.pgrst.plan+text"
            } else {
                "application/vnd.pgrst.plan+json"
            });
        }
        match self.format {
            ResponseFormat::Csv => Some("text/csv"),
            ResponseFormat::Json => match self.cardinality {
                Cardinality::Single | Cardinality::MaybeSingle => {
                    Some("application/vnd.pgrst.object+json")
                }
                Cardinality::Many => None,
            },
        }
    }

    fn build_request(&self) -> Result<reqwest::RequestBuilder> {
        let path = format!("{}/{}", self.transport.config().paths().rest, self.path);
        let mut request = self.transport.new_request(self.http_method(), &path)?;

        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(select) = &self.select {
            query.push(("select".to_string(), select.clone()));
        }
        if let Some(on_conflict) = &self.on_conflict {
            query.push(("on_conflict".to_string(), on_conflict.clone()));
        }
        for filter in &self.filters {
            query.push(filter.to_query_pair());
        }
        if !self.order.is_empty() {
            query.push(("order".to_string(), self.order.join(",")));
        }
        if self.head && self.verb == Verb::Rpc {
            query.push(("get".to_string(), "true".to_string()));
        }
        if let Some(explain) = &self.explain {
            if explain.analyze { query.push(("analyze".to_string(), "true".to_string())); }
            if explain.verbose { query.push(("verbose".to_string(), "true".to_string())); }
            if explain.settings { query.push(("settings".to_string(), "true".to_string())); }
            if explain.buffers { query.push(("buffers".to_string(), "true".to_string())); }
            if explain.wal { query.push(("wal".to_string(), "true".to_string())); }
        }
        request = request.query(&query);

        match self.http_method() {
            Method::GET | Method::HEAD => {
                request = request.header("Accept-Profile", &self.schema);
            }
            _ => {
                request = request.header("Content-Profile", &self.schema);
            }
        }

        if let Some(prefer) = self.prefer_header() {
            request = request.header("Prefer", prefer);
        }
        if let Some(accept) = self.accept_header() {
            request = request.header("Accept", accept);
        }

        let range = self.explicit_range.or_else(|| {
            self.limit.map(|limit| (self.offset, self.offset + limit.saturating_sub(1)))
        });
        if let Some((from, to)) = range {
            request = request
                .header("Range", format!("{from}-{to}"))
                .header("Range-Unit", "items");
        }

        if let Some(body) = &self.body {
            request = request.json(body);
        }

        Ok(request)
    }

    /// The text-body terminal for `csv()`/`explain(as_text)`
    pub async fn execute_text(self) -> Result<String> {
        let request = self.build_request()?;
        self.transport.send_text(request).await
    }

    /// The primary terminal method. Shape depends on the cardinality
    /// modifier previously applied (`single`/`maybe_single`/default-many).
    /// Discards the exact row count even when `count(mode)` was set — use
    /// `execute_with_count` to read it back.
    pub async fn execute<T: DeserializeOwned>(self) -> Result<QueryResult<T>> {
        Ok(self.execute_with_count().await?.0)
    }

    /// Like `execute`, but also returns the total row count PostgREST
    /// reports in `Content-Range` when `count(mode)` was set (§4.4); `None`
    /// if `count` was never called, or the header was absent/unparseable.
    pub async fn execute_with_count<T: DeserializeOwned>(self) -> Result<(QueryResult<T>, Option<i64>)> {
        let cardinality = self.cardinality;
        let request = self.build_request()?;

        if cardinality == Cardinality::MaybeSingle {
            let cloned = request.try_clone().expect("request body is buffered JSON, always cloneable");
            match self.transport.send_response(cloned).await {
                Ok(response) => {
                    let count = content_range_total(&response);
                    let value: T = decode_body(response).await?;
                    return Ok((QueryResult::MaybeOne(Some(value)), count));
                }
                Err(Error::Http { status: 406, body: Some(ref body), .. })
                    if body.code.as_deref() == Some("PGRST116") && is_zero_row_406(body) =>
                {
                    return Ok((QueryResult::MaybeOne(None), None));
                }
                Err(other) => return Err(other),
            }
        }

        match cardinality {
            Cardinality::Single => {
                let response = self.transport.send_response(request).await?;
                let count = content_range_total(&response);
                let value: T = decode_body(response).await?;
                Ok((QueryResult::One(value), count))
            }
            Cardinality::Many => {
                let response = self.transport.send_response(request).await?;
                let count = content_range_total(&response);
                let values: Vec<T> = decode_body(response).await?;
                Ok((QueryResult::Many(values), count))
            }
            Cardinality::MaybeSingle => unreachable!("handled above"),
        }
    }
}

/// Parses the PostgREST `Content-Range` response header (`0-9/97`, or
/// `*/97` when no range was requested) for the total row count that
/// `count(mode)` asked the server to compute.
fn content_range_total(response: &reqwest::Response) -> Option<i64> {
    let value = response.headers().get(reqwest::header::CONTENT_RANGE)?.to_str().ok()?;
    value.rsplit('/').next()?.parse::<i64>().ok()
}

/// Whether a `406 PGRST116` error's body describes a *zero*-row result
/// (`maybe_single`'s "tolerate zero rows" case) as opposed to a multi-row
/// result (which must still raise, per §8's law for `maybeSingle()`).
fn is_zero_row_406(body: &crate::error::PostgrestErrorBody) -> bool {
    body.details
        .as_deref()
        .or(body.message.as_deref())
        .map(|text| text.contains("0 rows"))
        .unwrap_or(false)
}

async fn decode_body<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return serde_json::from_str("null").map_err(Error::from);
    }
    serde_json::from_slice(&bytes).map_err(Error::decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn builder(table: &str) -> QueryBuilder {
        let config = Config::builder("https://project.supabase.co", "anon-key")
            .build()
            .unwrap();
        let transport = Transport::new(config).unwrap();
        QueryBuilder::table(transport, "public".to_string(), table)
    }

    #[tokio::test]
    async fn anonymous_select_with_filter_and_order() {
        let request = builder("todos")
            .select("id,title")
            .eq("user_id", 7i64)
            .order("created_at", false, None)
            .limit(10)
            .build_request()
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/todos");
        let query = request.url().query().unwrap();
        assert!(query.contains("select=id%2Ctitle"));
        assert!(query.contains("user_id=eq.7"));
        assert!(query.contains("order=created_at.desc"));
        assert_eq!(request.headers().get("range").unwrap(), "0-9");
        assert_eq!(request.headers().get("range-unit").unwrap(), "items");
        assert_eq!(request.headers().get("accept-profile").unwrap(), "public");
    }

    #[tokio::test]
    async fn authenticated_insert_with_representation() {
        let request = builder("todos")
            .insert(serde_json::json!({"title": "x"}))
            .returning_representation()
            .build_request()
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.headers().get("prefer").unwrap(), "return=representation");
        assert_eq!(request.headers().get("content-profile").unwrap(), "public");
    }

    #[tokio::test]
    async fn upsert_on_conflict_sets_resolution_and_representation() {
        let request = builder("users")
            .upsert(serde_json::json!({"id": 1, "name": "a"}))
            .on_conflict("id")
            .build_request()
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().query().unwrap(), "on_conflict=id");
        assert_eq!(
            request.headers().get("prefer").unwrap(),
            "resolution=merge-duplicates,return=representation"
        );
    }

    #[tokio::test]
    async fn rpc_sets_path_and_body() {
        let config = Config::builder("https://project.supabase.co", "anon-key")
            .build()
            .unwrap();
        let transport = Transport::new(config).unwrap();
        let request = QueryBuilder::rpc(transport, "public".to_string(), "add", serde_json::json!({"a": 1, "b": 2}))
            .select("sum")
            .build_request()
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().path(), "/rest/v1/rpc/add");
        assert_eq!(request.url().query().unwrap(), "select=sum");
    }

    #[tokio::test]
    async fn custom_rest_path_prefix_is_honored() {
        let config = Config::builder("https://project.supabase.co", "anon-key")
            .rest_path("/custom/rest/v2")
            .build()
            .unwrap();
        let transport = Transport::new(config).unwrap();
        let request = QueryBuilder::table(transport, "public".to_string(), "todos")
            .build_request()
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().path(), "/custom/rest/v2/todos");
    }

    #[test]
    fn left_associative_eq_chain_matches_match_object() {
        let via_chain = builder("todos").eq("a", 1i64).eq("b", 2i64);
        let via_match = builder("todos").match_(vec![
            ("a".to_string(), FilterValue::Int(1)),
            ("b".to_string(), FilterValue::Int(2)),
        ]);
        assert_eq!(via_chain.filters, via_match.filters);
    }

    #[test]
    fn into_vec_collapses_every_cardinality() {
        assert_eq!(QueryResult::Many(vec![1, 2]).into_vec(), vec![1, 2]);
        assert_eq!(QueryResult::One(1).into_vec(), vec![1]);
        assert_eq!(QueryResult::MaybeOne(Some(1)).into_vec(), vec![1]);
        assert_eq!(QueryResult::<i32>::MaybeOne(None).into_vec(), Vec::<i32>::new());
    }

    fn wiremock_builder(base_url: &str, table: &str) -> QueryBuilder {
        let config = Config::builder(base_url, "anon-key").build().unwrap();
        let transport = Transport::new(config).unwrap();
        QueryBuilder::table(transport, "public".to_string(), table)
    }

    #[tokio::test]
    async fn count_reads_total_from_content_range_header() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/rest/v1/todos"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-range", "0-1/97")
                    .set_body_json(serde_json::json!([{"id": 1}, {"id": 2}])),
            )
            .mount(&server)
            .await;

        let (result, count) = wiremock_builder(&server.uri(), "todos")
            .count(CountMode::Exact)
            .execute_with_count::<serde_json::Value>()
            .await
            .unwrap();

        assert_eq!(count, Some(97));
        assert_eq!(result.into_vec().len(), 2);
    }

    #[tokio::test]
    async fn maybe_single_zero_rows_collapses_to_none() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/rest/v1/todos"))
            .respond_with(wiremock::ResponseTemplate::new(406).set_body_json(serde_json::json!({
                "code": "PGRST116",
                "message": "JSON object requested, multiple (or no) rows returned",
                "details": "Results contain 0 rows, application/vnd.pgrst.object+json requires 1 row",
            })))
            .mount(&server)
            .await;

        let result = wiremock_builder(&server.uri(), "todos")
            .maybe_single()
            .execute::<serde_json::Value>()
            .await
            .unwrap();

        assert!(matches!(result, QueryResult::MaybeOne(None)));
    }

    #[tokio::test]
    async fn maybe_single_multiple_rows_propagates_http_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/rest/v1/todos"))
            .respond_with(wiremock::ResponseTemplate::new(406).set_body_json(serde_json::json!({
                "code": "PGRST116",
                "message": "JSON object requested, multiple (or no) rows returned",
                "details": "Results contain 3 rows, application/vnd.pgrst.object+json requires 1 row",
            })))
            .mount(&server)
            .await;

        let result = wiremock_builder(&server.uri(), "todos")
            .maybe_single()
            .execute::<serde_json::Value>()
            .await;

        match result {
            Err(Error::Http { status: 406, .. }) => {}
            other => panic!("expected propagated Http(406), got {other:?}"),
        }
    }
}
