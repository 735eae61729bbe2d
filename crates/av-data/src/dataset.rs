use av_types::Period;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One transaction: its period, the price to predict, and numeric features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub period: Period,
    pub price: f64,
    pub features: Vec<f64>,
}

impl Sample {
    pub fn new(period: Period, price: f64, features: Vec<f64>) -> Self {
        Self {
            period,
            price,
            features,
        }
    }
}

/// Read-only sample set, kept sorted by period so that any run of
/// consecutive periods is a contiguous slice.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    feature_names: Vec<String>,
    samples: Vec<Sample>,
}

impl Dataset {
    /// Samples are stably sorted by period; within a period the source order is kept.
    pub fn new(feature_names: Vec<String>, mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.period);
        Self {
            feature_names,
            samples,
        }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Index of the first sample whose period is not before `period`.
    pub(crate) fn lower_bound(&self, period: Period) -> usize {
        self.samples.partition_point(|s| s.period < period)
    }

    /// Row count per period.
    pub fn period_counts(&self) -> BTreeMap<Period, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.period).or_insert(0) += 1;
        }
        counts
    }

    pub fn first_period(&self) -> Option<Period> {
        self.samples.first().map(|s| s.period)
    }

    pub fn last_period(&self) -> Option<Period> {
        self.samples.last().map(|s| s.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn sorts_by_period_keeping_source_order() {
        let dataset = Dataset::new(
            vec!["size".into()],
            vec![
                Sample::new(p("2007-02"), 1.0, vec![1.0]),
                Sample::new(p("2007-01"), 2.0, vec![2.0]),
                Sample::new(p("2007-02"), 3.0, vec![3.0]),
            ],
        );

        let prices: Vec<f64> = dataset.samples().iter().map(|s| s.price).collect();
        assert_eq!(prices, vec![2.0, 1.0, 3.0]);
        assert_eq!(dataset.first_period(), Some(p("2007-01")));
        assert_eq!(dataset.last_period(), Some(p("2007-02")));
        assert_eq!(dataset.period_counts()[&p("2007-02")], 2);
    }

    #[test]
    fn lower_bound_finds_period_start() {
        let dataset = Dataset::new(
            vec![],
            vec![
                Sample::new(p("2007-01"), 1.0, vec![]),
                Sample::new(p("2007-03"), 1.0, vec![]),
            ],
        );
        assert_eq!(dataset.lower_bound(p("2006-12")), 0);
        assert_eq!(dataset.lower_bound(p("2007-02")), 1);
        assert_eq!(dataset.lower_bound(p("2007-04")), 2);
    }
}
