//! Read-only record queries used by inspection.

use crate::{AttendanceRecord, SyncState};
use serde::{Deserialize, Serialize};

/// Default page size for record listings.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Which delivery states a query should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Pending,
    Synced,
    Failed,
    /// Pending or failed
    Unsynced,
}

impl StateFilter {
    pub fn matches(&self, state: &SyncState) -> bool {
        match self {
            StateFilter::Pending => matches!(state, SyncState::Pending),
            StateFilter::Synced => matches!(state, SyncState::Synced),
            StateFilter::Failed => matches!(state, SyncState::Failed { .. }),
            StateFilter::Unsynced => state.is_unsynced(),
        }
    }
}

/// Ordering of a record listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest capture first
    #[default]
    Newest,
    /// Oldest id first
    Oldest,
}

/// Filter and pagination for a record listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordFilter {
    pub state: Option<StateFilter>,
    /// Case-insensitive substring of the badge identifier
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            state: None,
            search: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            order: SortOrder::default(),
        }
    }
}

impl RecordFilter {
    /// A filter matching everything, without a page limit.
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: StateFilter) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Check whether a record passes the state and search criteria.
    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        if let Some(state) = &self.state {
            if !state.matches(&record.sync_state) {
                return false;
            }
        }

        match &self.search {
            Some(needle) if !needle.is_empty() => record
                .identifier
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }

    /// Apply the filter to records given in ascending id order.
    pub fn apply<'a, I>(&self, records: I) -> RecordPage
    where
        I: DoubleEndedIterator<Item = &'a AttendanceRecord>,
    {
        let matching: Vec<&AttendanceRecord> = match self.order {
            SortOrder::Oldest => records.filter(|r| self.matches(r)).collect(),
            SortOrder::Newest => records.rev().filter(|r| self.matches(r)).collect(),
        };

        let total = matching.len();
        let page: Vec<AttendanceRecord> = matching
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .cloned()
            .collect();

        RecordPage {
            has_more: self.offset.saturating_add(page.len()) < total,
            records: page,
            total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// One page of a record listing. Records are copies of the stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<AttendanceRecord>,
    /// Number of records matching the filter, across all pages
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceMeta;

    fn records() -> Vec<AttendanceRecord> {
        let device = DeviceMeta::new("dev-1", "Gate", "Lobby");
        let mut records: Vec<_> = ["AA01", "bb02", "AA03", "CC04"]
            .iter()
            .enumerate()
            .map(|(i, code)| AttendanceRecord::new(i as u64 + 1, *code, 1000, device.clone()))
            .collect();
        records[1].mark_synced(2000);
        records[2].mark_failed(2000);
        records
    }

    #[test]
    fn newest_first_by_default() {
        let records = records();
        let page = RecordFilter::default().apply(records.iter());

        let ids: Vec<_> = page.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
        assert_eq!(page.total, 4);
        assert!(!page.has_more);
    }

    #[test]
    fn state_filters() {
        let records = records();

        let unsynced = RecordFilter::all()
            .with_state(StateFilter::Unsynced)
            .with_order(SortOrder::Oldest)
            .apply(records.iter());
        let ids: Vec<_> = unsynced.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);

        let failed = RecordFilter::all()
            .with_state(StateFilter::Failed)
            .apply(records.iter());
        assert_eq!(failed.total, 1);
        assert_eq!(failed.records[0].id, 3);
    }

    #[test]
    fn search_is_case_insensitive() {
        let records = records();
        let page = RecordFilter::all().with_search("aa").apply(records.iter());
        assert_eq!(page.total, 2);

        let page = RecordFilter::all().with_search("B0").apply(records.iter());
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].identifier, "bb02");
    }

    #[test]
    fn pagination() {
        let records = records();
        let page = RecordFilter::default()
            .with_order(SortOrder::Oldest)
            .with_page(2, 1)
            .apply(records.iter());

        let ids: Vec<_> = page.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(page.total, 4);
        assert!(page.has_more);

        let last = RecordFilter::default()
            .with_page(2, 2)
            .apply(records.iter());
        assert!(!last.has_more);
    }
}
