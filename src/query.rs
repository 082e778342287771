/// Structured queries over the document store.
///
/// A query is a filter, an ordering, and a page. Filters form a small
/// algebra: logical combinators over leaf predicates, where each leaf
/// names a path into the document value and a comparison against the value
/// found there. Evaluation is an exhaustive match over the filter variants;
/// an operator the algebra does not define is rejected as an input error
/// when parsed through [`Filter::from_json`] or [`Query::from_json`].
///
/// # Example
///
/// ```ignore
/// use silt::query::{Filter, OrderBy, Query};
/// use serde_json::json;
///
/// let adults = Query::new()
///     .filter(Filter::gte(&["age"], json!(18)))
///     .order_by(OrderBy::asc(&["age"]))
///     .limit(10);
///
/// let results = db.find(&adults).await?;
/// ```
use std::cmp::Ordering;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{SiltError, SiltResult};

/// A path into a document value: field names, with numeric segments
/// indexing into arrays.
pub type FieldPath = Vec<String>;

/// A filter condition over a document value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Filter {
    /// All child filters hold.
    And(Vec<Filter>),
    /// At least one child filter holds.
    Or(Vec<Filter>),
    /// The child filter does not hold.
    Not(Box<Filter>),
    /// Leaf is structurally equal to the operand.
    Eq { path: FieldPath, value: JsonValue },
    /// Leaf is absent or structurally unequal to the operand.
    Ne { path: FieldPath, value: JsonValue },
    /// Leaf is greater than the operand; both sides must share a primitive
    /// type, otherwise false.
    Gt { path: FieldPath, value: JsonValue },
    /// Greater-or-equal, same typing rule as `Gt`.
    Gte { path: FieldPath, value: JsonValue },
    /// Less-than, same typing rule as `Gt`.
    Lt { path: FieldPath, value: JsonValue },
    /// Less-or-equal, same typing rule as `Gt`.
    Lte { path: FieldPath, value: JsonValue },
    /// Leaf is present (null counts as present).
    Exists { path: FieldPath },
    /// Leaf is exactly null.
    IsNull { path: FieldPath },
    /// Leaf is a string matching the regex pattern.
    Matches {
        path: FieldPath,
        pattern: String,
        case_insensitive: bool,
    },
    /// Leaf is a string with the given prefix.
    StartsWith { path: FieldPath, prefix: String },
}

fn to_path(path: &[&str]) -> FieldPath {
    path.iter().map(|s| s.to_string()).collect()
}

impl Filter {
    /// Combine filters with AND.
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Combine filters with OR.
    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    /// Negate a filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Create an equality filter.
    pub fn eq(path: &[&str], value: impl Into<JsonValue>) -> Self {
        Self::Eq {
            path: to_path(path),
            value: value.into(),
        }
    }

    /// Create a not-equals filter.
    pub fn ne(path: &[&str], value: impl Into<JsonValue>) -> Self {
        Self::Ne {
            path: to_path(path),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(path: &[&str], value: impl Into<JsonValue>) -> Self {
        Self::Gt {
            path: to_path(path),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(path: &[&str], value: impl Into<JsonValue>) -> Self {
        Self::Gte {
            path: to_path(path),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(path: &[&str], value: impl Into<JsonValue>) -> Self {
        Self::Lt {
            path: to_path(path),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(path: &[&str], value: impl Into<JsonValue>) -> Self {
        Self::Lte {
            path: to_path(path),
            value: value.into(),
        }
    }

    /// Create a presence filter.
    pub fn exists(path: &[&str]) -> Self {
        Self::Exists {
            path: to_path(path),
        }
    }

    /// Create an is-null filter.
    pub fn is_null(path: &[&str]) -> Self {
        Self::IsNull {
            path: to_path(path),
        }
    }

    /// Create a regex match filter.
    pub fn matches(path: &[&str], pattern: impl Into<String>, case_insensitive: bool) -> Self {
        Self::Matches {
            path: to_path(path),
            pattern: pattern.into(),
            case_insensitive,
        }
    }

    /// Create a string prefix filter.
    pub fn starts_with(path: &[&str], prefix: impl Into<String>) -> Self {
        Self::StartsWith {
            path: to_path(path),
            prefix: prefix.into(),
        }
    }

    /// Parse a filter from its JSON wire shape.
    ///
    /// An operator the algebra does not define is an input error, not a
    /// serialization failure.
    pub fn from_json(raw: JsonValue) -> SiltResult<Self> {
        serde_json::from_value(raw)
            .map_err(|e| SiltError::invalid_input(format!("unsupported filter: {e}")))
    }

    /// Evaluate this filter against a document value.
    pub fn matches_value(&self, doc: &JsonValue) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches_value(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches_value(doc)),
            Filter::Not(filter) => !filter.matches_value(doc),
            Filter::Eq { path, value } => path_value(doc, path) == Some(value),
            Filter::Ne { path, value } => path_value(doc, path) != Some(value),
            Filter::Gt { path, value } => range_matches(doc, path, value, Ordering::is_gt),
            Filter::Gte { path, value } => range_matches(doc, path, value, Ordering::is_ge),
            Filter::Lt { path, value } => range_matches(doc, path, value, Ordering::is_lt),
            Filter::Lte { path, value } => range_matches(doc, path, value, Ordering::is_le),
            Filter::Exists { path } => path_value(doc, path).is_some(),
            Filter::IsNull { path } => path_value(doc, path) == Some(&JsonValue::Null),
            Filter::Matches {
                path,
                pattern,
                case_insensitive,
            } => path_value(doc, path)
                .and_then(JsonValue::as_str)
                .is_some_and(|s| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(*case_insensitive)
                        .build()
                        .is_ok_and(|re| re.is_match(s))
                }),
            Filter::StartsWith { path, prefix } => path_value(doc, path)
                .and_then(JsonValue::as_str)
                .is_some_and(|s| s.starts_with(prefix)),
        }
    }
}

fn range_matches(
    doc: &JsonValue,
    path: &[String],
    operand: &JsonValue,
    accept: fn(Ordering) -> bool,
) -> bool {
    path_value(doc, path)
        .and_then(|leaf| compare_same_type(leaf, operand))
        .is_some_and(accept)
}

/// Compare two leaves of the same primitive type. Mixed or non-primitive
/// operands are incomparable here, which range filters read as false.
fn compare_same_type(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Walk a field path into a document value.
pub(crate) fn path_value<'a>(doc: &'a JsonValue, path: &[String]) -> Option<&'a JsonValue> {
    let mut current = doc;
    for part in path {
        current = match current {
            JsonValue::Object(map) => map.get(part)?,
            JsonValue::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// One ordering key: a path and a direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Path to the sort leaf
    pub path: FieldPath,
    /// Sort direction
    pub direction: Direction,
}

impl OrderBy {
    /// Sort ascending on a path.
    pub fn asc(path: &[&str]) -> Self {
        Self {
            path: to_path(path),
            direction: Direction::Asc,
        }
    }

    /// Sort descending on a path.
    pub fn desc(path: &[&str]) -> Self {
        Self {
            path: to_path(path),
            direction: Direction::Desc,
        }
    }
}

/// A query: optional filter, ordering keys, and a skip/limit page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Filter to evaluate per document (absent = match everything).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Ordering keys; earlier entries dominate later ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// Matches to drop before taking `limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    /// Maximum number of results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    /// Create an empty query (matches everything, unordered, unbounded).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Append an ordering key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the number of matches to skip.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parse a query from its JSON wire shape.
    ///
    /// Unknown filter operators are reported as input errors, the same as
    /// [`Filter::from_json`].
    pub fn from_json(raw: JsonValue) -> SiltResult<Self> {
        serde_json::from_value(raw)
            .map_err(|e| SiltError::invalid_input(format!("unsupported query: {e}")))
    }

    /// Does a document value match this query's filter?
    pub fn matches(&self, value: &JsonValue) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches_value(value))
    }
}

/// A query result: the document's key and its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The document's key
    pub key: String,
    /// The document's value
    pub value: JsonValue,
}

/// Query executor: filter, sort, paginate a scanned document set.
pub struct QueryExecutor;

impl QueryExecutor {
    /// Run a query over an iterator of documents.
    ///
    /// The sort is stable, so documents that compare equal keep their scan
    /// order (ascending key order). `skip` applies before `limit`.
    pub fn execute<I>(query: &Query, documents: I) -> Vec<Document>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|doc| query.matches(&doc.value))
            .collect();

        if !query.order_by.is_empty() {
            matched.sort_by(|a, b| compare_documents(&a.value, &b.value, &query.order_by));
        }

        let skip = query.skip.unwrap_or(0);
        if skip > 0 {
            matched.drain(..skip.min(matched.len()));
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        matched
    }
}

fn compare_documents(a: &JsonValue, b: &JsonValue, order_by: &[OrderBy]) -> Ordering {
    for spec in order_by {
        let cmp = compare_leaves(path_value(a, &spec.path), path_value(b, &spec.path));
        let cmp = match spec.direction {
            Direction::Asc => cmp,
            Direction::Desc => cmp.reverse(),
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

/// Total order over optional sort leaves: absent sorts before any present
/// value; present values order by type rank, then within their type.
/// Arrays and objects fall back to their canonical JSON text.
fn compare_leaves(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let by_rank = type_rank(a).cmp(&type_rank(b));
            if by_rank != Ordering::Equal {
                return by_rank;
            }
            match (a, b) {
                (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
                (JsonValue::Bool(a), JsonValue::Bool(b)) => a.cmp(b),
                (JsonValue::Number(a), JsonValue::Number(b)) => {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                        _ => Ordering::Equal,
                    }
                }
                (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
                _ => a.to_string().cmp(&b.to_string()),
            }
        }
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, value: JsonValue) -> Document {
        Document {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_filter_eq() {
        let filter = Filter::eq(&["name"], json!("Alice"));
        assert!(filter.matches_value(&json!({"name": "Alice"})));
        assert!(!filter.matches_value(&json!({"name": "Bob"})));
        assert!(!filter.matches_value(&json!({})));
    }

    #[test]
    fn test_filter_ne_absent_leaf() {
        let filter = Filter::ne(&["name"], json!("Alice"));
        assert!(filter.matches_value(&json!({"name": "Bob"})));
        assert!(filter.matches_value(&json!({})));
        assert!(!filter.matches_value(&json!({"name": "Alice"})));
    }

    #[test]
    fn test_filter_range_operators() {
        let value = json!({"age": 30});
        assert!(Filter::gt(&["age"], json!(25)).matches_value(&value));
        assert!(!Filter::gt(&["age"], json!(30)).matches_value(&value));
        assert!(Filter::gte(&["age"], json!(30)).matches_value(&value));
        assert!(Filter::lt(&["age"], json!(31)).matches_value(&value));
        assert!(Filter::lte(&["age"], json!(30)).matches_value(&value));
        assert!(!Filter::lte(&["age"], json!(29)).matches_value(&value));
    }

    #[test]
    fn test_filter_range_string_comparison() {
        let value = json!({"name": "carol"});
        assert!(Filter::gt(&["name"], json!("bob")).matches_value(&value));
        assert!(!Filter::gt(&["name"], json!("dave")).matches_value(&value));
    }

    #[test]
    fn test_filter_cross_type_comparison_is_false() {
        let value = json!({"age": "30"});
        assert!(!Filter::gt(&["age"], json!(15)).matches_value(&value));
        assert!(!Filter::lt(&["age"], json!(99)).matches_value(&value));
        assert!(!Filter::gte(&["age"], json!(15)).matches_value(&value));
    }

    #[test]
    fn test_filter_exists_and_is_null() {
        let value = json!({"a": null, "b": 1});
        assert!(Filter::exists(&["a"]).matches_value(&value));
        assert!(Filter::exists(&["b"]).matches_value(&value));
        assert!(!Filter::exists(&["c"]).matches_value(&value));

        assert!(Filter::is_null(&["a"]).matches_value(&value));
        assert!(!Filter::is_null(&["b"]).matches_value(&value));
        assert!(!Filter::is_null(&["c"]).matches_value(&value));
    }

    #[test]
    fn test_filter_matches_regex() {
        let value = json!({"email": "Alice@Example.com"});
        assert!(Filter::matches(&["email"], "^alice@", true).matches_value(&value));
        assert!(!Filter::matches(&["email"], "^alice@", false).matches_value(&value));
        // Non-string leaf never matches.
        assert!(!Filter::matches(&["email"], ".*", true).matches_value(&json!({"email": 7})));
    }

    #[test]
    fn test_filter_starts_with() {
        let value = json!({"name": "Alice"});
        assert!(Filter::starts_with(&["name"], "Ali").matches_value(&value));
        assert!(!Filter::starts_with(&["name"], "ali").matches_value(&value));
        assert!(!Filter::starts_with(&["age"], "1").matches_value(&json!({"age": 12})));
    }

    #[test]
    fn test_filter_logical_combinators() {
        let filter = Filter::and(vec![
            Filter::gt(&["age"], json!(18)),
            Filter::or(vec![
                Filter::eq(&["role"], json!("admin")),
                Filter::eq(&["role"], json!("editor")),
            ]),
            Filter::not(Filter::eq(&["banned"], json!(true))),
        ]);

        assert!(filter.matches_value(&json!({"age": 30, "role": "admin", "banned": false})));
        assert!(!filter.matches_value(&json!({"age": 30, "role": "viewer"})));
        assert!(!filter.matches_value(&json!({"age": 30, "role": "admin", "banned": true})));
        assert!(!filter.matches_value(&json!({"age": 10, "role": "admin"})));
    }

    #[test]
    fn test_path_walker_nested_and_indexed() {
        let value = json!({"user": {"emails": ["a@x", "b@x"]}});
        assert_eq!(
            path_value(&value, &to_path(&["user", "emails", "1"])),
            Some(&json!("b@x"))
        );
        assert_eq!(path_value(&value, &to_path(&["user", "emails", "9"])), None);
        assert_eq!(path_value(&value, &to_path(&["user", "name"])), None);
        assert_eq!(path_value(&value, &to_path(&["user", "emails", "x"])), None);
    }

    #[test]
    fn test_unknown_operator_is_input_error() {
        let raw = json!({"between": {"path": ["age"], "low": 1, "high": 9}});
        assert!(matches!(
            Filter::from_json(raw),
            Err(SiltError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_query_from_json() {
        let raw = json!({
            "filter": {"gt": {"path": ["age"], "value": 15}},
            "orderBy": [{"path": ["age"], "direction": "ASC"}],
            "limit": 1
        });

        let query = Query::from_json(raw).unwrap();
        assert_eq!(query.filter, Some(Filter::gt(&["age"], json!(15))));
        assert_eq!(query.order_by, vec![OrderBy::asc(&["age"])]);
        assert_eq!(query.limit, Some(1));
        assert_eq!(query.skip, None);
    }

    #[test]
    fn test_query_from_json_unknown_operator_is_input_error() {
        let raw = json!({"filter": {"frobnicate": {"path": ["age"]}}});
        assert!(matches!(
            Query::from_json(raw),
            Err(SiltError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_filter_wire_shape() {
        let filter = Filter::and(vec![Filter::is_null(&["a"]), Filter::starts_with(&["b"], "x")]);
        let raw = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            raw,
            json!({"and": [
                {"isNull": {"path": ["a"]}},
                {"startsWith": {"path": ["b"], "prefix": "x"}}
            ]})
        );
        let parsed: Filter = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, filter);
    }

    #[test]
    fn test_direction_wire_shape() {
        assert_eq!(
            serde_json::to_value(&OrderBy::asc(&["age"])).unwrap(),
            json!({"path": ["age"], "direction": "ASC"})
        );
    }

    #[test]
    fn test_execute_filters_sorts_limits() {
        let query = Query::new()
            .filter(Filter::gt(&["age"], json!(15)))
            .order_by(OrderBy::asc(&["age"]))
            .limit(1);

        let docs = vec![
            doc("1", json!({"age": 10})),
            doc("2", json!({"age": 30})),
            doc("3", json!({"age": 20})),
        ];

        let results = QueryExecutor::execute(&query, docs);
        assert_eq!(results, vec![doc("3", json!({"age": 20}))]);
    }

    #[test]
    fn test_execute_skip_then_limit() {
        let query = Query::new()
            .order_by(OrderBy::asc(&["n"]))
            .skip(1)
            .limit(2);

        let docs = (1..=5).map(|n| doc(&n.to_string(), json!({"n": n})));
        let results = QueryExecutor::execute(&query, docs);

        let ns: Vec<i64> = results.iter().map(|d| d.value["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3]);
    }

    #[test]
    fn test_execute_skip_past_end() {
        let query = Query::new().skip(10);
        let results = QueryExecutor::execute(&query, vec![doc("1", json!({"n": 1}))]);
        assert!(results.is_empty());
    }

    #[test]
    fn test_order_desc_and_secondary_key() {
        let query = Query::new()
            .order_by(OrderBy::desc(&["group"]))
            .order_by(OrderBy::asc(&["n"]));

        let docs = vec![
            doc("a", json!({"group": 1, "n": 2})),
            doc("b", json!({"group": 2, "n": 9})),
            doc("c", json!({"group": 1, "n": 1})),
            doc("d", json!({"group": 2, "n": 3})),
        ];

        let results = QueryExecutor::execute(&query, docs);
        let keys: Vec<&str> = results.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_order_missing_sorts_less() {
        let query = Query::new().order_by(OrderBy::asc(&["age"]));

        let docs = vec![
            doc("with", json!({"age": 1})),
            doc("without", json!({})),
        ];

        let keys: Vec<String> = QueryExecutor::execute(&query, docs)
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(keys, vec!["without", "with"]);
    }

    #[test]
    fn test_order_mixed_types_is_total_and_stable() {
        let query = Query::new().order_by(OrderBy::asc(&["v"]));

        let docs = vec![
            doc("s", json!({"v": "text"})),
            doc("n", json!({"v": 7})),
            doc("b", json!({"v": true})),
            doc("z", json!({"v": null})),
        ];

        let keys: Vec<String> = QueryExecutor::execute(&query, docs)
            .into_iter()
            .map(|d| d.key)
            .collect();
        // null < bool < number < string
        assert_eq!(keys, vec!["z", "b", "n", "s"]);
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let results = QueryExecutor::execute(
            &Query::new(),
            vec![doc("a", json!({"x": 1})), doc("b", json!("scalar"))],
        );
        assert_eq!(results.len(), 2);
    }
}
