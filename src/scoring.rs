//! Rule-based RFM quintile scores and segment names

use crate::features::CustomerFeatures;
use std::fmt;

/// Upper quantile at which frequency and monetary are clipped before ranking
pub const WINSOR_QUANTILE: f64 = 0.99;

/// Named marketing segment derived from RFM scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Champions,
    Loyal,
    PotentialLoyalist,
    AtRiskDormant,
    BigSpenders,
    NewCustomers,
    Regular,
}

impl Segment {
    pub fn label(&self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::Loyal => "Loyal",
            Segment::PotentialLoyalist => "Potential Loyalist",
            Segment::AtRiskDormant => "At Risk / Dormant",
            Segment::BigSpenders => "Big Spenders",
            Segment::NewCustomers => "New Customers",
            Segment::Regular => "Regular",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Quintile scores (1..=5, higher is better) for one customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfmScore {
    pub recency: u8,
    pub frequency: u8,
    pub monetary: u8,
}

impl RfmScore {
    pub fn sum(&self) -> u8 {
        self.recency + self.frequency + self.monetary
    }

    /// First matching rule wins
    pub fn segment(&self) -> Segment {
        let (r, f, m) = (self.recency, self.frequency, self.monetary);
        if r >= 4 && f >= 4 && m >= 4 {
            Segment::Champions
        } else if r >= 4 && f >= 3 {
            Segment::Loyal
        } else if r >= 3 && f >= 2 && m >= 3 {
            Segment::PotentialLoyalist
        } else if r <= 2 && f <= 2 && m <= 2 {
            Segment::AtRiskDormant
        } else if r >= 3 && m >= 4 {
            Segment::BigSpenders
        } else if r >= 4 && f <= 2 {
            Segment::NewCustomers
        } else {
            Segment::Regular
        }
    }
}

/// Score every customer against the whole population
///
/// Recency is scored on `1 / (recency_days + 1)` so that recent buyers rank
/// high; frequency and monetary are winsorized at the 99th percentile first.
pub fn score_customers(customers: &[CustomerFeatures]) -> Vec<RfmScore> {
    let recency_inv: Vec<f64> = customers
        .iter()
        .map(|c| 1.0 / (c.recency_days as f64 + 1.0))
        .collect();
    let frequency: Vec<f64> = customers.iter().map(|c| c.frequency as f64).collect();
    let monetary: Vec<f64> = customers.iter().map(|c| c.monetary).collect();

    let r = quintile_scores(&recency_inv);
    let f = quintile_scores(&winsorize(&frequency, WINSOR_QUANTILE));
    let m = quintile_scores(&winsorize(&monetary, WINSOR_QUANTILE));

    r.into_iter()
        .zip(f)
        .zip(m)
        .map(|((recency, frequency), monetary)| RfmScore {
            recency,
            frequency,
            monetary,
        })
        .collect()
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Clip values above the `q` quantile
pub fn winsorize(values: &[f64], q: f64) -> Vec<f64> {
    match quantile(values, q) {
        Some(high) => values.iter().map(|&v| v.min(high)).collect(),
        None => Vec::new(),
    }
}

/// 1-based ranks with ties sharing the average of their positions
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Map percentile ranks to 1..=5: (0, .2] -> 1, ..., (.8, 1] -> 5
pub fn quintile_scores(values: &[f64]) -> Vec<u8> {
    let n = values.len() as f64;
    average_ranks(values)
        .into_iter()
        .map(|rank| ((rank * 5.0) / n).ceil().clamp(1.0, 5.0) as u8)
        .collect()
}
