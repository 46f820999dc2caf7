use crate::error::H5Error;

/// Caller-side selection for one dimension: either bound may be omitted to
/// default to the dimension's edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimSpec {
    pub lo: Option<u64>,
    pub hi: Option<u64>,
}

impl DimSpec {
    /// The full extent of the dimension.
    pub const FULL: DimSpec = DimSpec { lo: None, hi: None };

    pub fn range(lo: u64, hi: u64) -> Self {
        Self {
            lo: Some(lo),
            hi: Some(hi),
        }
    }
}

impl From<(u64, u64)> for DimSpec {
    fn from((lo, hi): (u64, u64)) -> Self {
        DimSpec::range(lo, hi)
    }
}

/// One normalized per-dimension interval `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub lo: u64,
    pub hi: u64,
}

impl Span {
    pub fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    pub fn len(&self) -> u64 {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.hi == self.lo
    }
}

/// Normalize a caller hyperslice against the dataset's dimensions.
///
/// Unspecified trailing dimensions and unspecified endpoints default to the
/// full extent. After normalization `0 <= lo <= hi <= dimensions[d]` holds
/// in every dimension, or the selection is rejected.
pub fn normalize(spec: &[DimSpec], dimensions: &[u64]) -> Result<Vec<Span>, H5Error> {
    if spec.len() > dimensions.len() {
        return Err(H5Error::Hyperslice(format!(
            "hyperslice has more dimensions than dataset: {} > {}",
            spec.len(),
            dimensions.len()
        )));
    }
    let mut spans = Vec::with_capacity(dimensions.len());
    for (d, &dim) in dimensions.iter().enumerate() {
        let given = spec.get(d).copied().unwrap_or_default();
        let lo = given.lo.unwrap_or(0);
        let hi = given.hi.unwrap_or(dim);
        if hi < lo || hi > dim {
            return Err(H5Error::Hyperslice(format!(
                "dimension {d}: [{lo}, {hi}) is not within [0, {dim})"
            )));
        }
        spans.push(Span::new(lo, hi));
    }
    Ok(spans)
}

/// Extent of each normalized dimension (the output shape).
pub fn shape(spans: &[Span]) -> Vec<u64> {
    spans.iter().map(Span::len).collect()
}

/// Total element count of the selection.
pub fn element_count(spans: &[Span]) -> u64 {
    spans.iter().map(Span::len).product()
}
