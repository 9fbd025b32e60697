//! PostgREST filter term model and wire serialization
//!
//! A [`Filter`] already holds its fully-encoded wire value (`eq.7`,
//! `not.in.(1,2,3)`, …) so the builder only has to pair it with a column
//! name to produce a query parameter.

use serde_json::Value as JsonValue;

/// A scalar or structured value accepted by filter operators
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<FilterValue>),
    Json(JsonValue),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

/// `is.` operand: PostgREST only accepts these four
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsValue {
    Null,
    True,
    False,
    Unknown,
}

impl IsValue {
    fn wire(self) -> &'static str {
        match self {
            IsValue::Null => "null",
            IsValue::True => "true",
            IsValue::False => "false",
            IsValue::Unknown => "unknown",
        }
    }
}

/// `textSearch` config selects the operator variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSearchType {
    Plain,
    Phrase,
    Websearch,
    Default,
}

impl TextSearchType {
    fn op(self) -> &'static str {
        match self {
            TextSearchType::Default => "fts",
            TextSearchType::Plain => "plfts",
            TextSearchType::Phrase => "phfts",
            TextSearchType::Websearch => "wfts",
        }
    }
}

/// Canonical decimal / lowercase-bool / null encoding for a scalar value,
/// outside of the `in.(...)` quoting context.
pub(crate) fn encode_scalar(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "null".to_string(),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Int(i) => i.to_string(),
        FilterValue::Float(f) => f.to_string(),
        FilterValue::Text(s) => s.clone(),
        FilterValue::Array(items) => format!(
            "{{{}}}",
            items.iter().map(encode_scalar).collect::<Vec<_>>().join(",")
        ),
        FilterValue::Json(v) => v.to_string(),
    }
}

/// Quote a value for use inside `in.(v1,v2,...)`: embedded commas,
/// parentheses, dots and backslashes are escaped; strings that need it are
/// wrapped in double quotes, per PostgREST's list-literal convention.
fn encode_in_list_element(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => {
            if s.chars().any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\')) {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{escaped}\"")
            } else {
                s.clone()
            }
        }
        other => encode_scalar(other),
    }
}

/// A single filter term, already rendered to its wire value
/// (`<op>.<val>` or `not.<op>.<val>`)
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub wire: String,
}

impl Filter {
    fn simple(column: impl Into<String>, op: &str, value: &FilterValue, negated: bool) -> Self {
        let encoded = encode_scalar(value);
        let wire = if negated {
            format!("not.{op}.{encoded}")
        } else {
            format!("{op}.{encoded}")
        };
        Self { column: column.into(), wire }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "eq", &value.into(), negated)
    }

    pub fn neq(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "neq", &value.into(), negated)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "gt", &value.into(), negated)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "gte", &value.into(), negated)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "lt", &value.into(), negated)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "lte", &value.into(), negated)
    }

    /// `*` in `pattern` is treated as the SQL `%` wildcard (glob form)
    pub fn like(column: impl Into<String>, pattern: &str, negated: bool) -> Self {
        let value = FilterValue::Text(pattern.replace('*', "%"));
        Self::simple(column, "like", &value, negated)
    }

    pub fn ilike(column: impl Into<String>, pattern: &str, negated: bool) -> Self {
        let value = FilterValue::Text(pattern.replace('*', "%"));
        Self::simple(column, "ilike", &value, negated)
    }

    pub fn is(column: impl Into<String>, value: IsValue, negated: bool) -> Self {
        let wire = if negated {
            format!("not.is.{}", value.wire())
        } else {
            format!("is.{}", value.wire())
        };
        Self { column: column.into(), wire }
    }

    pub fn in_list(column: impl Into<String>, values: Vec<FilterValue>, negated: bool) -> Self {
        let joined = values
            .iter()
            .map(encode_in_list_element)
            .collect::<Vec<_>>()
            .join(",");
        let wire = if negated {
            format!("not.in.({joined})")
        } else {
            format!("in.({joined})")
        };
        Self { column: column.into(), wire }
    }

    pub fn contains(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "cs", &value.into(), negated)
    }

    pub fn contained_by(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "cd", &value.into(), negated)
    }

    pub fn range_lt(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "sl", &value.into(), negated)
    }

    pub fn range_gt(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "sr", &value.into(), negated)
    }

    pub fn range_lte(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "nxl", &value.into(), negated)
    }

    pub fn range_gte(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "nxr", &value.into(), negated)
    }

    pub fn range_adjacent(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "adj", &value.into(), negated)
    }

    pub fn overlaps(column: impl Into<String>, value: impl Into<FilterValue>, negated: bool) -> Self {
        Self::simple(column, "ov", &value.into(), negated)
    }

    pub fn text_search(
        column: impl Into<String>,
        query: &str,
        search_type: TextSearchType,
        config: Option<&str>,
        negated: bool,
    ) -> Self {
        let op = search_type.op();
        let prefixed_op = match config {
            Some(config) => format!("{op}({config})"),
            None => op.to_string(),
        };
        let wire = if negated {
            format!("not.{prefixed_op}.{query}")
        } else {
            format!("{prefixed_op}.{query}")
        };
        Self { column: column.into(), wire }
    }

    /// `or=(...)` / `and=(...)`. `expr` is the already-composed,
    /// comma-separated inner expression (nesting is allowed: an inner
    /// element may itself be an `or(...)`/`and(...)` clause).
    pub fn or(expr: impl Into<String>) -> Self {
        Self { column: "or".to_string(), wire: format!("({})", expr.into()) }
    }

    pub fn and(expr: impl Into<String>) -> Self {
        Self { column: "and".to_string(), wire: format!("({})", expr.into()) }
    }

    /// Expands a key/value object into repeated `eq` filters, one per pair
    pub fn match_object(pairs: Vec<(String, FilterValue)>) -> Vec<Filter> {
        pairs
            .into_iter()
            .map(|(column, value)| Filter::eq(column, value, false))
            .collect()
    }

    pub fn to_query_pair(&self) -> (String, String) {
        (self.column.clone(), self.wire.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_encodes_scalar() {
        let filter = Filter::eq("user_id", 7i64, false);
        assert_eq!(filter.to_query_pair(), ("user_id".to_string(), "eq.7".to_string()));
    }

    #[test]
    fn negated_filter_gets_not_prefix() {
        let filter = Filter::eq("user_id", 7i64, true);
        assert_eq!(filter.wire, "not.eq.7");
    }

    #[test]
    fn like_substitutes_glob_star() {
        let filter = Filter::like("name", "al*", false);
        assert_eq!(filter.wire, "like.al%");
    }

    #[test]
    fn in_list_joins_and_quotes_special_strings() {
        let filter = Filter::in_list(
            "status",
            vec![FilterValue::Text("open".to_string()), FilterValue::Text("a,b".to_string())],
            false,
        );
        assert_eq!(filter.wire, "in.(open,\"a,b\")");
    }

    #[test]
    fn is_accepts_only_four_values() {
        assert_eq!(Filter::is("deleted_at", IsValue::Null, false).wire, "is.null");
        assert_eq!(Filter::is("active", IsValue::True, false).wire, "is.true");
    }

    #[test]
    fn match_object_expands_to_repeated_eq() {
        let filters = Filter::match_object(vec![
            ("a".to_string(), FilterValue::Int(1)),
            ("b".to_string(), FilterValue::Int(2)),
        ]);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].to_query_pair(), ("a".to_string(), "eq.1".to_string()));
        assert_eq!(filters[1].to_query_pair(), ("b".to_string(), "eq.2".to_string()));
    }

    #[test]
    fn or_wraps_expression_in_parens() {
        let filter = Filter::or("a.eq.1,b.eq.2");
        assert_eq!(filter.to_query_pair(), ("or".to_string(), "(a.eq.1,b.eq.2)".to_string()));
    }

    #[test]
    fn array_value_encodes_as_brace_list() {
        let value = FilterValue::Array(vec![FilterValue::Int(1), FilterValue::Int(2)]);
        let filter = Filter::contains("tags", value, false);
        assert_eq!(filter.wire, "cs.{1,2}");
    }

    #[test]
    fn range_operators_map_positionally_lt_gt_lte_gte_adjacent() {
        let value = || FilterValue::Text("[2020-01-01,2020-02-01)".to_string());
        assert_eq!(Filter::range_lt("during", value(), false).wire, "sl.[2020-01-01,2020-02-01)");
        assert_eq!(Filter::range_gt("during", value(), false).wire, "sr.[2020-01-01,2020-02-01)");
        assert_eq!(Filter::range_lte("during", value(), false).wire, "nxl.[2020-01-01,2020-02-01)");
        assert_eq!(Filter::range_gte("during", value(), false).wire, "nxr.[2020-01-01,2020-02-01)");
        assert_eq!(Filter::range_adjacent("during", value(), false).wire, "adj.[2020-01-01,2020-02-01)");
    }
}
