//! Aggregation query builder
//!
//! Queries are accumulated as a small typed AST (`Clause` for the boolean
//! query, `Aggregation` for the aggregation tree) and written out by a single
//! recursive serializer in [`QueryBuilder::build`].
//!
//! Sub-aggregations are attached by parent path, using the same `>` separator
//! the search engine uses for `buckets_path`:
//!
//! ```ignore
//! let mut builder = QueryBuilder::new();
//! builder
//!     .filter(Clause::range("timestamp", RangeBounds::new().gte("now-1h")))
//!     .aggregate("tokens", Aggregation::terms("token_address", 100))?
//!     .sub_aggregate("tokens", "window_1h", Aggregation::filter(window_clause))?
//!     .sub_aggregate("tokens>window_1h", "volume", Aggregation::sum("amount_usd"))?;
//! let body = builder.build();
//! ```
//!
//! Attaching to a path that does not exist fails with
//! [`SearchError::UnknownParentAggregation`] instead of silently dropping the
//! metric.

use crate::error::SearchError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Separator between aggregation names in a parent path
pub const PATH_SEPARATOR: char = '>';

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Bounds of a range clause. Values are kept as JSON so date math
/// (`now-1h`) and numbers share one representation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeBounds {
    pub gte: Option<Value>,
    pub gt: Option<Value>,
    pub lte: Option<Value>,
    pub lt: Option<Value>,
}

impl RangeBounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.gte.is_none() && self.gt.is_none() && self.lte.is_none() && self.lt.is_none()
    }

    fn to_json(&self) -> Value {
        let mut bounds = Map::new();
        for (op, value) in [
            ("gte", &self.gte),
            ("gt", &self.gt),
            ("lte", &self.lte),
            ("lt", &self.lt),
        ] {
            if let Some(value) = value {
                bounds.insert(op.to_string(), value.clone());
            }
        }
        Value::Object(bounds)
    }
}

/// Boolean query clause
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range { field: String, bounds: RangeBounds },
    Exists { field: String },
    Bool(BoolQuery),
}

impl Clause {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Clause::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        Clause::Range {
            field: field.into(),
            bounds,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Clause::Exists {
            field: field.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Clause::Term { field, value } => json!({ "term": { field: value } }),
            Clause::Terms { field, values } => json!({ "terms": { field: values } }),
            Clause::Range { field, bounds } => json!({ "range": { field: bounds.to_json() } }),
            Clause::Exists { field } => json!({ "exists": { "field": field } }),
            Clause::Bool(query) => query.to_json(),
        }
    }
}

/// `bool` compound query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub filter: Vec<Clause>,
    pub must: Vec<Clause>,
    pub should: Vec<Clause>,
    pub must_not: Vec<Clause>,
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
            && self.must.is_empty()
            && self.should.is_empty()
            && self.must_not.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (occurrence, clauses) in [
            ("filter", &self.filter),
            ("must", &self.must),
            ("should", &self.should),
            ("must_not", &self.must_not),
        ] {
            if !clauses.is_empty() {
                body.insert(
                    occurrence.to_string(),
                    Value::Array(clauses.iter().map(Clause::to_json).collect()),
                );
            }
        }
        if let Some(min) = self.minimum_should_match {
            body.insert("minimum_should_match".to_string(), json!(min));
        }
        json!({ "bool": body })
    }
}

/// Aggregation node kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Bucket per distinct value, optionally ordered by a sub-metric path
    Terms {
        field: String,
        size: usize,
        order: Option<(String, SortOrder)>,
    },
    /// Single bucket of documents matching a clause
    Filter(Clause),
    /// Projection of the best matching documents in the bucket
    TopHits {
        size: usize,
        sort: Vec<(String, SortOrder)>,
        source: Vec<String>,
    },
    Sum { field: String },
    ValueCount { field: String },
    Cardinality { field: String },
    Max { field: String },
    Min { field: String },
    Avg { field: String },
    /// Drops parent buckets for which the script evaluates to false
    BucketSelector {
        buckets_path: BTreeMap<String, String>,
        script: String,
    },
    /// Computes a per-bucket value from sibling metrics
    BucketScript {
        buckets_path: BTreeMap<String, String>,
        script: String,
    },
    /// Sums a metric across the buckets of a sibling multi-bucket aggregation
    SumBucket { buckets_path: String },
}

impl Aggregation {
    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        Aggregation::Terms {
            field: field.into(),
            size,
            order: None,
        }
    }

    /// Order a terms aggregation by a metric path such as `window_1h>volume`
    /// or `_count`. No effect on other kinds.
    pub fn ordered_by(self, metric: impl Into<String>, direction: SortOrder) -> Self {
        match self {
            Aggregation::Terms { field, size, .. } => Aggregation::Terms {
                field,
                size,
                order: Some((metric.into(), direction)),
            },
            other => other,
        }
    }

    pub fn filter(clause: Clause) -> Self {
        Aggregation::Filter(clause)
    }

    pub fn top_hits(size: usize) -> Self {
        Aggregation::TopHits {
            size,
            sort: Vec::new(),
            source: Vec::new(),
        }
    }

    /// Add a sort key to a top-hits projection. No effect on other kinds.
    pub fn sorted_by(self, field: impl Into<String>, direction: SortOrder) -> Self {
        match self {
            Aggregation::TopHits {
                size,
                mut sort,
                source,
            } => {
                sort.push((field.into(), direction));
                Aggregation::TopHits { size, sort, source }
            }
            other => other,
        }
    }

    /// Restrict a top-hits projection to the given source fields.
    pub fn including<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            Aggregation::TopHits { size, sort, .. } => Aggregation::TopHits {
                size,
                sort,
                source: fields.into_iter().map(Into::into).collect(),
            },
            other => other,
        }
    }

    pub fn sum(field: impl Into<String>) -> Self {
        Aggregation::Sum {
            field: field.into(),
        }
    }

    pub fn value_count(field: impl Into<String>) -> Self {
        Aggregation::ValueCount {
            field: field.into(),
        }
    }

    pub fn cardinality(field: impl Into<String>) -> Self {
        Aggregation::Cardinality {
            field: field.into(),
        }
    }

    pub fn max(field: impl Into<String>) -> Self {
        Aggregation::Max {
            field: field.into(),
        }
    }

    pub fn min(field: impl Into<String>) -> Self {
        Aggregation::Min {
            field: field.into(),
        }
    }

    pub fn avg(field: impl Into<String>) -> Self {
        Aggregation::Avg {
            field: field.into(),
        }
    }

    pub fn bucket_selector<I, K, P>(buckets_path: I, script: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        Aggregation::BucketSelector {
            buckets_path: collect_paths(buckets_path),
            script: script.into(),
        }
    }

    pub fn bucket_script<I, K, P>(buckets_path: I, script: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        Aggregation::BucketScript {
            buckets_path: collect_paths(buckets_path),
            script: script.into(),
        }
    }

    pub fn sum_bucket(buckets_path: impl Into<String>) -> Self {
        Aggregation::SumBucket {
            buckets_path: buckets_path.into(),
        }
    }

    /// Only bucket aggregations may carry sub-aggregations
    pub fn accepts_children(&self) -> bool {
        matches!(self, Aggregation::Terms { .. } | Aggregation::Filter(_))
    }

    fn body(&self) -> Value {
        match self {
            Aggregation::Terms { field, size, order } => {
                let mut terms = json!({ "field": field, "size": size });
                if let Some((metric, direction)) = order {
                    terms["order"] = json!({ metric: direction.as_str() });
                }
                json!({ "terms": terms })
            }
            Aggregation::Filter(clause) => json!({ "filter": clause.to_json() }),
            Aggregation::TopHits { size, sort, source } => {
                let mut top_hits = json!({ "size": size });
                if !sort.is_empty() {
                    top_hits["sort"] = Value::Array(
                        sort.iter()
                            .map(|(field, direction)| {
                                json!({ field: { "order": direction.as_str() } })
                            })
                            .collect(),
                    );
                }
                if !source.is_empty() {
                    top_hits["_source"] = json!({ "includes": source });
                }
                json!({ "top_hits": top_hits })
            }
            Aggregation::Sum { field } => json!({ "sum": { "field": field } }),
            Aggregation::ValueCount { field } => json!({ "value_count": { "field": field } }),
            Aggregation::Cardinality { field } => json!({ "cardinality": { "field": field } }),
            Aggregation::Max { field } => json!({ "max": { "field": field } }),
            Aggregation::Min { field } => json!({ "min": { "field": field } }),
            Aggregation::Avg { field } => json!({ "avg": { "field": field } }),
            Aggregation::BucketSelector {
                buckets_path,
                script,
            } => json!({
                "bucket_selector": { "buckets_path": buckets_path, "script": script }
            }),
            Aggregation::BucketScript {
                buckets_path,
                script,
            } => json!({
                "bucket_script": { "buckets_path": buckets_path, "script": script }
            }),
            Aggregation::SumBucket { buckets_path } => {
                json!({ "sum_bucket": { "buckets_path": buckets_path } })
            }
        }
    }
}

fn collect_paths<I, K, P>(paths: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, P)>,
    K: Into<String>,
    P: Into<String>,
{
    paths
        .into_iter()
        .map(|(k, p)| (k.into(), p.into()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct AggregationNode {
    aggregation: Aggregation,
    children: BTreeMap<String, AggregationNode>,
}

impl AggregationNode {
    fn new(aggregation: Aggregation) -> Self {
        Self {
            aggregation,
            children: BTreeMap::new(),
        }
    }

    fn to_json(&self) -> Value {
        let mut body = self.aggregation.body();
        if !self.children.is_empty() {
            body["aggs"] = write_tree(&self.children);
        }
        body
    }
}

fn write_tree(nodes: &BTreeMap<String, AggregationNode>) -> Value {
    Value::Object(
        nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.to_json()))
            .collect(),
    )
}

/// Accumulates query clauses and aggregations into one search document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    size: usize,
    query: BoolQuery,
    aggs: BTreeMap<String, AggregationNode>,
}

impl QueryBuilder {
    /// New builder returning no hits (`size: 0`), aggregations only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn filter(&mut self, clause: Clause) -> &mut Self {
        self.query.filter.push(clause);
        self
    }

    pub fn must(&mut self, clause: Clause) -> &mut Self {
        self.query.must.push(clause);
        self
    }

    pub fn must_not(&mut self, clause: Clause) -> &mut Self {
        self.query.must_not.push(clause);
        self
    }

    pub fn should(&mut self, clause: Clause) -> &mut Self {
        self.query.should.push(clause);
        self
    }

    pub fn minimum_should_match(&mut self, count: u32) -> &mut Self {
        self.query.minimum_should_match = Some(count);
        self
    }

    /// Declare an aggregation at the query root
    pub fn aggregate(&mut self, name: &str, aggregation: Aggregation) -> Result<&mut Self> {
        if self.aggs.contains_key(name) {
            return Err(SearchError::DuplicateAggregation(name.to_string()));
        }
        self.aggs
            .insert(name.to_string(), AggregationNode::new(aggregation));
        Ok(self)
    }

    /// Attach `aggregation` under the aggregation at `parent` (a `>`-separated
    /// path from the root, e.g. `tokens>window_1h`).
    pub fn sub_aggregate(
        &mut self,
        parent: &str,
        name: &str,
        aggregation: Aggregation,
    ) -> Result<&mut Self> {
        let unknown = || SearchError::UnknownParentAggregation {
            parent: parent.to_string(),
            name: name.to_string(),
        };

        let mut segments = parent.split(PATH_SEPARATOR);
        let first = segments.next().ok_or_else(unknown)?;
        let mut node = self.aggs.get_mut(first).ok_or_else(unknown)?;
        for segment in segments {
            node = node.children.get_mut(segment).ok_or_else(unknown)?;
        }

        if !node.aggregation.accepts_children() {
            return Err(SearchError::LeafAggregation(parent.to_string()));
        }
        if node.children.contains_key(name) {
            return Err(SearchError::DuplicateAggregation(format!(
                "{}{}{}",
                parent, PATH_SEPARATOR, name
            )));
        }

        node.children
            .insert(name.to_string(), AggregationNode::new(aggregation));
        Ok(self)
    }

    /// Whether an aggregation exists at the given path
    pub fn has_aggregation(&self, path: &str) -> bool {
        let mut segments = path.split(PATH_SEPARATOR);
        let Some(first) = segments.next() else {
            return false;
        };
        let Some(mut node) = self.aggs.get(first) else {
            return false;
        };
        for segment in segments {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    /// Serialize to `{size, query: {bool: {...}}, aggs}`
    pub fn build(&self) -> Value {
        let mut document = json!({
            "size": self.size,
            "query": self.query.to_json(),
        });
        if !self.aggs.is_empty() {
            document["aggs"] = write_tree(&self.aggs);
        }
        document
    }

    /// Serialized request body
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.build())?)
    }
}
