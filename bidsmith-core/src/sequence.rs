//! Bounds-checked neighbor access over the unique-series list
//!
//! Several classification conditions look at the series just before or
//! after the one being classified. [`SeriesView`] gives those lookups as
//! `Option`s instead of raw index arithmetic.

use crate::record::AcquisitionRecord;
use crate::reducer::UniqueSeries;

/// A position in the unique-series list
#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a> {
    series: &'a [UniqueSeries],
    index: usize,
}

impl<'a> SeriesView<'a> {
    pub fn new(series: &'a [UniqueSeries], index: usize) -> Option<Self> {
        (index < series.len()).then_some(Self { series, index })
    }

    /// Representative record of the current series
    pub fn current(&self) -> &'a AcquisitionRecord {
        &self.series[self.index].record
    }

    /// Record `n` positions earlier
    pub fn back(&self, n: usize) -> Option<&'a AcquisitionRecord> {
        let idx = self.index.checked_sub(n)?;
        self.series.get(idx).map(|s| &s.record)
    }

    /// Record `n` positions later
    pub fn ahead(&self, n: usize) -> Option<&'a AcquisitionRecord> {
        let idx = self.index.checked_add(n)?;
        self.series.get(idx).map(|s| &s.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::reduce;
    use crate::record::Sidecar;
    use std::path::PathBuf;

    fn series(n: usize) -> Vec<UniqueSeries> {
        let mut records: Vec<_> = (0..n)
            .map(|i| {
                let sidecar = Sidecar {
                    series_description: format!("s{}", i),
                    ..Sidecar::default()
                };
                let mut r = AcquisitionRecord::new(PathBuf::from(format!("{}.nii", i)), PathBuf::new(), &sidecar);
                r.idx = i;
                r
            })
            .collect();
        reduce(&mut records, 0.1, false)
    }

    #[test]
    fn test_neighbors_are_bounds_checked() {
        let list = series(3);
        let view = SeriesView::new(&list, 0).unwrap();
        assert!(view.back(1).is_none());
        assert_eq!(view.ahead(2).map(|r| r.description()), Some("s2"));
        assert!(view.ahead(3).is_none());

        let last = SeriesView::new(&list, 2).unwrap();
        assert_eq!(last.back(2).map(|r| r.description()), Some("s0"));
        assert!(SeriesView::new(&list, 3).is_none());
    }
}
