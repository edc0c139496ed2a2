//! Page windows of a layer cursor.
//!
//! The controller only decides which window to ask for next and when to stop. Fetching and
//! decoding stay with the cursor, which reports back through [`PagingController::page_done`].

use log::debug;

use crate::capabilities::Capabilities;
use crate::config::ResolvedOptions;
use crate::decoder::ResponseCounts;

/// Page size used when paging is on and neither the options nor the server give one.
pub(crate) const DEFAULT_PAGE_SIZE: u64 = 100;

/// Page size of the cursors of a datasource, or `None` when paging is off. Options win over
/// the server's `CountDefault`.
pub(crate) fn page_size(capabilities: &Capabilities, options: &ResolvedOptions) -> Option<u64> {
    let allowed = options.paging_allowed.unwrap_or(capabilities.paging_supported);
    allowed.then(|| {
        options
            .page_size
            .or(capabilities.default_page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    })
}

/// How a cursor pages through a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    /// One request, optionally bounded by a count.
    Single { count: Option<u64> },
    /// `STARTINDEX`/`COUNT` windows of `page_size` records.
    Windowed { page_size: u64 },
}

impl PagingMode {
    /// Picks the mode for a cursor.
    ///
    /// Windows need a stable order across requests, which only a layer with a primary key
    /// guarantees. Without one, a known total turns into a single request for exactly that
    /// many records.
    #[must_use]
    pub fn select(
        page_size: Option<u64>,
        has_primary_key: bool,
        known_count: Option<u64>,
        max_features: Option<u64>,
    ) -> Self {
        match (page_size, known_count) {
            (Some(_), Some(count)) if !has_primary_key => Self::Single {
                count: Some(max_features.map_or(count, |max| max.min(count))),
            },
            (Some(page_size), _) => Self::Windowed {
                page_size: page_size.max(1),
            },
            (None, _) => Self::Single {
                count: max_features,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingPhase {
    Idle,
    /// A window was handed out and its page is being read.
    Fetching,
    Exhausted,
}

/// Request window for the next page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageWindow {
    pub start_index: Option<u64>,
    pub count: Option<u64>,
}

/// Cursor state across pages.
#[derive(Debug, Clone)]
pub struct PagingController {
    mode: PagingMode,
    max_features: Option<u64>,
    phase: PagingPhase,
    next_start: u64,
    returned: u64,
    pages: usize,
    number_matched: Option<u64>,
}

impl PagingController {
    #[must_use]
    pub fn new(mode: PagingMode, max_features: Option<u64>) -> Self {
        Self {
            mode,
            max_features,
            phase: PagingPhase::Idle,
            next_start: 0,
            returned: 0,
            pages: 0,
            number_matched: None,
        }
    }

    /// Rewinds to the first page under `mode`. A known `numberMatched` is kept.
    pub fn reset(&mut self, mode: PagingMode) {
        self.mode = mode;
        self.phase = PagingPhase::Idle;
        self.next_start = 0;
        self.returned = 0;
        self.pages = 0;
    }

    /// Forgets the known total, e.g. after a filter change.
    pub fn invalidate_count(&mut self) {
        self.number_matched = None;
    }

    #[must_use]
    pub fn mode(&self) -> PagingMode {
        self.mode
    }

    #[must_use]
    pub fn phase(&self) -> PagingPhase {
        self.phase
    }

    #[must_use]
    pub fn number_matched(&self) -> Option<u64> {
        self.number_matched
    }

    /// Records a total learnt elsewhere (hits request, full iteration). The first value wins.
    pub fn set_number_matched(&mut self, count: u64) {
        if self.number_matched.is_none() {
            self.number_matched = Some(count);
        }
    }

    /// Records handed out so far.
    #[must_use]
    pub fn returned(&self) -> u64 {
        self.returned
    }

    /// Number of pages requested since the last reset.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.pages
    }

    fn remaining_budget(&self) -> Option<u64> {
        self.max_features
            .map(|max| max.saturating_sub(self.returned))
    }

    /// Window of the next request, or `None` once the result set is exhausted.
    pub fn next_window(&mut self) -> Option<PageWindow> {
        if self.phase == PagingPhase::Exhausted || self.remaining_budget() == Some(0) {
            self.phase = PagingPhase::Exhausted;
            return None;
        }
        let window = match self.mode {
            PagingMode::Single { count } => {
                if self.pages > 0 {
                    self.phase = PagingPhase::Exhausted;
                    return None;
                }
                PageWindow {
                    start_index: None,
                    count,
                }
            },
            PagingMode::Windowed { page_size } => PageWindow {
                start_index: Some(self.next_start),
                count: Some(
                    self.remaining_budget()
                        .map_or(page_size, |budget| budget.min(page_size)),
                ),
            },
        };
        self.phase = PagingPhase::Fetching;
        self.pages += 1;
        debug!("page {} window {window:?}", self.pages);
        Some(window)
    }

    /// Accounts for a page that yielded `returned` records.
    ///
    /// A window is the last one when it came back empty or when a known `numberMatched` has
    /// been reached. A short page is not enough: servers may cap pages below `COUNT`.
    pub fn page_done(&mut self, returned: u64, counts: ResponseCounts) {
        let records_total = match self.mode {
            PagingMode::Windowed { .. } | PagingMode::Single { count: None } => true,
            PagingMode::Single { count: Some(_) } => false,
        };
        if let Some(matched) = counts.number_matched.filter(|_| records_total) {
            self.set_number_matched(matched);
        }
        self.returned += returned;

        match self.mode {
            PagingMode::Single { .. } => self.phase = PagingPhase::Exhausted,
            PagingMode::Windowed { .. } => {
                self.next_start += returned;
                let reached = self
                    .number_matched
                    .is_some_and(|matched| self.next_start >= matched);
                self.phase = if returned == 0 || reached {
                    PagingPhase::Exhausted
                } else {
                    PagingPhase::Idle
                };
            },
        }
        if self.remaining_budget() == Some(0) {
            self.phase = PagingPhase::Exhausted;
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.phase == PagingPhase::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(matched: Option<u64>) -> ResponseCounts {
        ResponseCounts {
            number_matched: matched,
            number_returned: None,
        }
    }

    #[test]
    fn unknown_total_stops_on_empty_page() {
        let mut paging = PagingController::new(PagingMode::Windowed { page_size: 2 }, None);
        let mut starts = Vec::new();
        let mut sizes = [2, 2, 0].into_iter();
        while let Some(window) = paging.next_window() {
            starts.push(window.start_index.unwrap());
            assert_eq!(window.count, Some(2));
            paging.page_done(sizes.next().unwrap(), counts(None));
        }
        assert_eq!(starts, [0, 2, 4]);
        assert_eq!(paging.pages(), 3);
        assert_eq!(paging.number_matched(), None);
    }

    #[test]
    fn short_pages_advance_by_what_was_returned() {
        let mut paging = PagingController::new(PagingMode::Windowed { page_size: 2 }, None);
        let mut starts = Vec::new();
        let mut sizes = [2, 1, 1, 0].into_iter();
        while let Some(window) = paging.next_window() {
            starts.push(window.start_index.unwrap());
            paging.page_done(sizes.next().unwrap(), counts(None));
        }
        assert_eq!(starts, [0, 2, 3, 4]);
    }

    #[test]
    fn known_total_stops_without_an_extra_request() {
        let mut paging = PagingController::new(PagingMode::Windowed { page_size: 2 }, None);
        let mut starts = Vec::new();
        let mut sizes = [2, 2].into_iter();
        while let Some(window) = paging.next_window() {
            starts.push(window.start_index.unwrap());
            paging.page_done(sizes.next().unwrap(), counts(Some(4)));
        }
        assert_eq!(starts, [0, 2]);
        assert_eq!(paging.number_matched(), Some(4));

        // the first total sticks
        paging.page_done(0, counts(Some(9)));
        assert_eq!(paging.number_matched(), Some(4));
        paging.invalidate_count();
        assert_eq!(paging.number_matched(), None);
    }

    #[test]
    fn max_features_caps_windows() {
        let mut paging = PagingController::new(PagingMode::Windowed { page_size: 2 }, Some(3));
        assert_eq!(paging.next_window().unwrap().count, Some(2));
        paging.page_done(2, counts(None));
        assert_eq!(
            paging.next_window(),
            Some(PageWindow {
                start_index: Some(2),
                count: Some(1)
            })
        );
        paging.page_done(1, counts(None));
        assert!(paging.next_window().is_none());
        assert!(paging.is_exhausted());
    }

    #[test]
    fn single_request() {
        let mut paging = PagingController::new(PagingMode::Single { count: None }, None);
        assert_eq!(paging.next_window(), Some(PageWindow::default()));
        assert_eq!(paging.phase(), PagingPhase::Fetching);
        paging.page_done(5, counts(Some(5)));
        assert!(paging.next_window().is_none());
        assert_eq!(paging.number_matched(), Some(5));

        paging.reset(PagingMode::Single { count: None });
        assert_eq!(paging.phase(), PagingPhase::Idle);
        assert!(paging.next_window().is_some());
    }

    #[test]
    fn mode_selection() {
        assert_eq!(
            PagingMode::select(Some(2), false, Some(2), None),
            PagingMode::Single { count: Some(2) }
        );
        assert_eq!(
            PagingMode::select(Some(2), false, None, None),
            PagingMode::Windowed { page_size: 2 }
        );
        assert_eq!(
            PagingMode::select(Some(2), true, Some(10), None),
            PagingMode::Windowed { page_size: 2 }
        );
        assert_eq!(
            PagingMode::select(None, true, None, Some(7)),
            PagingMode::Single { count: Some(7) }
        );
    }

    fn capabilities(constraints: &str) -> Capabilities {
        let document = format!(
            r#"<WFS_Capabilities version="2.0.0">
    <OperationsMetadata>{constraints}</OperationsMetadata>
    <FeatureTypeList><FeatureType><Name>my_layer</Name></FeatureType></FeatureTypeList>
</WFS_Capabilities>"#
        );
        Capabilities::parse(document.as_bytes(), Some("/wfs")).unwrap()
    }

    #[test]
    fn page_size_resolution() {
        let paging = capabilities(
            r#"<ows:Operation name="GetFeature">
            <ows:Constraint name="CountDefault"><ows:NoValues/><ows:DefaultValue>2</ows:DefaultValue></ows:Constraint>
        </ows:Operation>
        <ows:Constraint name="ImplementsResultPaging"><ows:NoValues/><ows:DefaultValue>TRUE</ows:DefaultValue></ows:Constraint>"#,
        );
        let plain = capabilities("");
        let defaults = ResolvedOptions::default();

        assert_eq!(page_size(&paging, &defaults), Some(2));
        assert_eq!(page_size(&plain, &defaults), None);

        let forced = ResolvedOptions {
            paging_allowed: Some(true),
            ..ResolvedOptions::default()
        };
        assert_eq!(page_size(&plain, &forced), Some(DEFAULT_PAGE_SIZE));

        let sized = ResolvedOptions {
            page_size: Some(5),
            ..forced.clone()
        };
        assert_eq!(page_size(&paging, &sized), Some(5));

        let disabled = ResolvedOptions {
            paging_allowed: Some(false),
            ..ResolvedOptions::default()
        };
        assert_eq!(page_size(&paging, &disabled), None);
    }
}
