//! Paged query engine: stable pages over filtered, ordered collections.
//!
//! Pagination here is deliberately dumb: a page is a window into a fully
//! ordered set. The only design hazard is the ordering — it must be
//! deterministic per entity type, otherwise repeated calls return
//! overlapping pages. [`PageOrder`] names each entity's sort key and the
//! entity id breaks ties. No stability is promised if the underlying data
//! changes between calls.

use serde::{Deserialize, Serialize};

use tickethub_core::Entity;
use tickethub_ticketing::{EventRecord, Ticket};

/// Pagination parameters, clamped at construction.
///
/// Policy (kept from the original API surface):
/// - `page_number < 1` is treated as `1`, not rejected
/// - `page_size` outside `[1, MAX_PAGE_SIZE)` falls back to
///   `MAX_PAGE_SIZE / 2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    page_number: u32,
    page_size: u32,
}

impl PageParams {
    /// Upper bound (exclusive) for a caller-supplied page size.
    pub const MAX_PAGE_SIZE: u32 = 50;

    /// Page size used when the caller supplies an out-of-range value.
    pub const FALLBACK_PAGE_SIZE: u32 = Self::MAX_PAGE_SIZE / 2;

    /// Build parameters from raw (possibly out-of-range) caller input.
    pub fn new(page_number: i64, page_size: i64) -> Self {
        let page_number = u32::try_from(page_number).ok().filter(|n| *n >= 1).unwrap_or(1);
        let page_size = u32::try_from(page_size)
            .ok()
            .filter(|s| (1..Self::MAX_PAGE_SIZE).contains(s))
            .unwrap_or(Self::FALLBACK_PAGE_SIZE);
        Self {
            page_number,
            page_size,
        }
    }

    pub fn page_number(self) -> u32 {
        self.page_number
    }

    pub fn page_size(self) -> u32 {
        self.page_size
    }

    /// Zero-based offset of the first record on this page.
    pub fn offset(self) -> u64 {
        u64::from(self.page_number - 1) * u64::from(self.page_size)
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 10,
        }
    }
}

/// One page of an ordered, filtered set.
///
/// `total_count` is the size of the whole filtered set, independent of the
/// paging window, so it is the same on every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page_number: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Map the items while keeping the paging envelope (DTO conversion).
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_number: self.page_number,
            page_size: self.page_size,
        }
    }
}

/// Deterministic page ordering for an entity type.
///
/// Composition over inheritance: the generic engine ([`paginate`]) is
/// parameterized by this trait, and each entity-specific store method wraps
/// it with its own filter.
pub trait PageOrder: Entity {
    type Key: Ord;

    /// Primary sort key; the entity id is the tie-break.
    fn page_key(&self) -> Self::Key;
}

impl PageOrder for EventRecord {
    type Key = chrono::DateTime<chrono::Utc>;

    fn page_key(&self) -> Self::Key {
        self.starts_at()
    }
}

impl PageOrder for Ticket {
    type Key = chrono::DateTime<chrono::Utc>;

    fn page_key(&self) -> Self::Key {
        self.issued_at()
    }
}

/// Produce one page from an already-filtered collection.
///
/// Sorts by `(page_key, id)` so repeated calls against unchanged data
/// return disjoint, stable pages.
pub fn paginate<T: PageOrder>(mut items: Vec<T>, params: PageParams) -> Page<T> {
    items.sort_by(|a, b| {
        a.page_key()
            .cmp(&b.page_key())
            .then_with(|| a.id().cmp(&b.id()))
    });

    let total_count = items.len() as u64;
    let items = items
        .into_iter()
        .skip(params.offset() as usize)
        .take(params.page_size() as usize)
        .collect();

    Page {
        items,
        total_count,
        page_number: params.page_number(),
        page_size: params.page_size(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tickethub_core::EventId;

    fn events(n: i64) -> Vec<EventRecord> {
        let start = Utc::now();
        (0..n)
            .map(|i| {
                EventRecord::new(EventId::new(), format!("event-{i}"), start + Duration::hours(i), 10)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn page_number_below_one_is_treated_as_one() {
        let params = PageParams::new(-1, 10);
        assert_eq!(params.page_number(), 1);
        assert_eq!(params.page_size(), 10);
    }

    #[test]
    fn out_of_range_page_size_falls_back() {
        assert_eq!(PageParams::new(1, 0).page_size(), PageParams::FALLBACK_PAGE_SIZE);
        assert_eq!(PageParams::new(1, 50).page_size(), PageParams::FALLBACK_PAGE_SIZE);
        assert_eq!(PageParams::new(1, 999).page_size(), PageParams::FALLBACK_PAGE_SIZE);
        assert_eq!(PageParams::new(1, 49).page_size(), 49);
    }

    #[test]
    fn pages_are_disjoint_and_count_the_full_set() {
        let set = events(25);
        let ids: Vec<_> = {
            let page = paginate(set.clone(), PageParams::new(1, 45));
            page.items.iter().map(|e| e.id()).collect()
        };

        let p1 = paginate(set.clone(), PageParams::new(1, 10));
        let p2 = paginate(set.clone(), PageParams::new(2, 10));
        let p3 = paginate(set.clone(), PageParams::new(3, 10));

        assert_eq!(p1.items.len(), 10);
        assert_eq!(p2.items.len(), 10);
        assert_eq!(p3.items.len(), 5);
        for p in [&p1, &p2, &p3] {
            assert_eq!(p.total_count, 25);
        }

        let paged_ids: Vec<_> = p1
            .items
            .iter()
            .chain(p2.items.iter())
            .chain(p3.items.iter())
            .map(|e| e.id())
            .collect();
        assert_eq!(paged_ids, ids);
    }

    #[test]
    fn page_past_the_end_is_empty_but_still_counts() {
        let page = paginate(events(3), PageParams::new(5, 10));
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 3);
    }

    #[test]
    fn map_keeps_the_envelope() {
        let page = paginate(events(3), PageParams::default()).map(|e| e.name().to_string());
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 3);
    }
}
