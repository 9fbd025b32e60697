//! PostgREST Query-Builder Engine (C4)

pub mod builder;
pub mod filter;

pub use builder::{
    Cardinality, ConflictResolution, CountMode, ExplainOptions, NullsOrder, QueryBuilder,
    QueryResult, ResponseFormat,
};
pub use filter::{Filter, FilterValue, IsValue, TextSearchType};

use serde_json::Value as JsonValue;

use crate::transport::Transport;

/// Entry point for the query engine: `table(name)` and `rpc(fn, args)`
#[derive(Clone)]
pub struct Postgrest {
    transport: Transport,
}

impl Postgrest {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn table(&self, name: &str) -> QueryBuilder {
        QueryBuilder::table(
            self.transport.clone(),
            self.transport.config().schema().to_string(),
            name,
        )
    }

    pub fn rpc(&self, function: &str, args: JsonValue) -> QueryBuilder {
        QueryBuilder::rpc(
            self.transport.clone(),
            self.transport.config().schema().to_string(),
            function,
            args,
        )
    }
}
