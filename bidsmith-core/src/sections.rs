//! Section partitioning
//!
//! A subject's scans split into sections at each localizer run: the first
//! record opens section 1, and every localizer not directly preceded by
//! another localizer opens the next one. Sections scope field-map pairing
//! and are numbered from 1.

/// Contiguous block of records between localizer runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: usize,
    /// Record `idx` values, in scan order
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    InLocalizerRun,
}

/// Split `(record idx, is_localizer)` pairs into sections
pub fn partition(scans: &[(usize, bool)]) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut state = ScanState::Scanning;

    for &(idx, localizer) in scans {
        let opens = match state {
            ScanState::Scanning => localizer,
            ScanState::InLocalizerRun => false,
        };
        if sections.is_empty() || (opens && sections.last().map_or(false, |s| !s.members.is_empty())) {
            sections.push(Section {
                id: sections.len() + 1,
                members: Vec::new(),
            });
        }
        if let Some(current) = sections.last_mut() {
            current.members.push(idx);
        }
        state = if localizer {
            ScanState::InLocalizerRun
        } else {
            ScanState::Scanning
        };
    }

    sections
}
