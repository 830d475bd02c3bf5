//! Vector values, distance metrics, and pgvector index types.

use ruvector_common::{Error, Result};
use serde::Serialize;

/// A dense embedding vector.
///
/// Stored as `f32` components, matching pgvector's `vector` type. Construction
/// validates dimensionality against an expected size when one is known (most
/// call sites validate against the column's declared dimension before the
/// value ever reaches SQL).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vector(Vec<f32>);

impl Vector {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::ValidationError("vector cannot be empty".into()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::ValidationError(
                "vector components must be finite".into(),
            ));
        }
        Ok(Self(values))
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Formats the pgvector literal form `[v1,v2,...]`, suitable only for
    /// inlining into SQL text (pgvector cannot bind vector literals as a
    /// query parameter) after the caller has validated it came from a
    /// trusted numeric source, never from raw user text.
    pub fn to_literal(&self) -> String {
        let mut s = String::with_capacity(2 + self.0.len() * 8);
        s.push('[');
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            s.push_str(&format_component(*v));
        }
        s.push(']');
        s
    }

    /// Parses a pgvector text literal back into a `Vector`: either the
    /// bracketed `[v0,v1,...]` form pgvector returns, or the brace form
    /// `{v0,v1,...}` some drivers use for array-typed columns.
    pub fn from_literal(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .or_else(|| trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
            .ok_or_else(|| Error::ValidationError(format!("malformed vector literal: {text}")))?;

        if inner.is_empty() {
            return Err(Error::ValidationError("vector literal has no components".into()));
        }

        let values = inner
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f32>()
                    .map_err(|e| Error::ValidationError(format!("invalid vector component '{part}': {e}")))
            })
            .collect::<Result<Vec<f32>>>()?;

        Self::new(values)
    }
}

fn format_component(v: f32) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Distance metrics supported by pgvector, plus fallback metrics the
/// database has no native operator for. Every variant still maps to one of
/// pgvector's five operators — the fallbacks ride on the nearest-available
/// operator (Euclidean) since pgvector cannot evaluate them natively, and
/// their own distinct `distance_to_score` conversion is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    InnerProduct,
    Hamming,
    Manhattan,
    Chebyshev,
    Jaccard,
    Minkowski,
    BrayCurtis,
    Canberra,
    Mahalanobis,
    Correlation,
}

impl DistanceMetric {
    /// The pgvector distance operator used in `ORDER BY embedding <op> $1`.
    /// Metrics pgvector has no native operator for fall back to `<->`
    /// (Euclidean), the closest general-purpose distance pgvector computes
    /// in the database; the metric's own score conversion still applies to
    /// whatever raw distance that operator returns.
    pub fn operator(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::Euclidean => "<->",
            DistanceMetric::InnerProduct => "<#>",
            DistanceMetric::Hamming => "<~>",
            DistanceMetric::Manhattan => "<+>",
            DistanceMetric::Chebyshev
            | DistanceMetric::Jaccard
            | DistanceMetric::Minkowski
            | DistanceMetric::BrayCurtis
            | DistanceMetric::Canberra
            | DistanceMetric::Mahalanobis
            | DistanceMetric::Correlation => "<->",
        }
    }

    /// The pgvector operator class used when creating an index for this metric.
    pub fn operator_class(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::Euclidean => "vector_l2_ops",
            DistanceMetric::InnerProduct => "vector_ip_ops",
            DistanceMetric::Hamming => "vector_hamming_ops",
            DistanceMetric::Manhattan => "vector_l1_ops",
            DistanceMetric::Chebyshev
            | DistanceMetric::Jaccard
            | DistanceMetric::Minkowski
            | DistanceMetric::BrayCurtis
            | DistanceMetric::Canberra
            | DistanceMetric::Mahalanobis
            | DistanceMetric::Correlation => "vector_l2_ops",
        }
    }

    /// `cosine`/`dot` use `score = 1 - distance`; every other metric
    /// (including the fallbacks, which never produce a bounded distance)
    /// uses `score = 1 / (1 + distance)`.
    pub fn uses_linear_score(&self) -> bool {
        matches!(self, DistanceMetric::Cosine | DistanceMetric::InnerProduct)
    }

    /// Converts a raw pgvector distance (as produced by `operator()`) into a
    /// similarity score matching `SearchResult::score`'s contract.
    pub fn distance_to_score(&self, distance: f64) -> f64 {
        if self.uses_linear_score() {
            1.0 - distance
        } else {
            1.0 / (1.0 + distance)
        }
    }
}

/// pgvector index access methods, plus the source system's broader index
/// vocabulary mapped onto what pgvector actually supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Hnsw,
    IvfFlat,
    /// Inverted-file index with product quantization; pgvector has no
    /// native ivfpq, so this rides on `ivfflat`'s DDL syntax.
    IvfPq,
    /// Brute-force scan, no index. `create_index` is a no-op for this type.
    Flat,
    /// DiskANN has no pgvector access method; falls back to `hnsw`.
    DiskAnn,
}

impl IndexType {
    pub fn access_method(&self) -> &'static str {
        match self {
            IndexType::Hnsw | IndexType::DiskAnn => "hnsw",
            IndexType::IvfFlat | IndexType::IvfPq => "ivfflat",
            IndexType::Flat => "",
        }
    }

    /// `flat` means brute-force scan: no DDL is ever emitted for it.
    pub fn is_no_op(&self) -> bool {
        matches!(self, IndexType::Flat)
    }

    /// The source system's name for this index type, used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Hnsw => "hnsw",
            IndexType::IvfFlat => "ivfflat",
            IndexType::IvfPq => "ivfpq",
            IndexType::Flat => "flat",
            IndexType::DiskAnn => "diskann",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_vector() {
        assert!(Vector::new(vec![]).is_err());
    }

    #[test]
    fn rejects_non_finite_components() {
        assert!(Vector::new(vec![1.0, f32::NAN]).is_err());
        assert!(Vector::new(vec![f32::INFINITY]).is_err());
    }

    #[test]
    fn literal_formats_integers_without_decimal() {
        let v = Vector::new(vec![1.0, -2.0, 0.5]).unwrap();
        assert_eq!(v.to_literal(), "[1,-2,0.5]");
    }

    #[test]
    fn literal_round_trips_through_from_literal() {
        let v = Vector::new(vec![1.0, -2.0, 0.5]).unwrap();
        let parsed = Vector::from_literal(&v.to_literal()).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn from_literal_accepts_brace_form() {
        let parsed = Vector::from_literal("{1,2,3}").unwrap();
        assert_eq!(parsed.as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn from_literal_rejects_malformed_text() {
        assert!(Vector::from_literal("1,2,3").is_err());
        assert!(Vector::from_literal("[]").is_err());
    }

    #[test]
    fn distance_metric_operators() {
        assert_eq!(DistanceMetric::Cosine.operator(), "<=>");
        assert_eq!(DistanceMetric::Euclidean.operator(), "<->");
        assert_eq!(DistanceMetric::InnerProduct.operator(), "<#>");
        assert_eq!(DistanceMetric::Hamming.operator(), "<~>");
        assert_eq!(DistanceMetric::Manhattan.operator(), "<+>");
        assert_eq!(DistanceMetric::Jaccard.operator(), "<->");
    }

    #[test]
    fn cosine_and_dot_use_linear_score() {
        assert_eq!(DistanceMetric::Cosine.distance_to_score(0.1), 0.9);
        assert_eq!(DistanceMetric::InnerProduct.distance_to_score(0.1), 0.9);
    }

    #[test]
    fn other_metrics_use_reciprocal_score() {
        assert_eq!(DistanceMetric::Euclidean.distance_to_score(1.0), 0.5);
        assert_eq!(DistanceMetric::Manhattan.distance_to_score(0.0), 1.0);
        assert!(DistanceMetric::Chebyshev.distance_to_score(1.0) > 0.0);
    }

    #[test]
    fn index_type_access_methods_and_fallbacks() {
        assert_eq!(IndexType::Hnsw.access_method(), "hnsw");
        assert_eq!(IndexType::DiskAnn.access_method(), "hnsw");
        assert_eq!(IndexType::IvfFlat.access_method(), "ivfflat");
        assert_eq!(IndexType::IvfPq.access_method(), "ivfflat");
        assert!(IndexType::Flat.is_no_op());
        assert!(!IndexType::Hnsw.is_no_op());
    }
}
