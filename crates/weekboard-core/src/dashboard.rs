use std::collections::BTreeSet;

use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::categorize::{Bucket, CategorizeMemo, CategorizedResult};
use crate::datetime::DateRange;
use crate::loader::LoadEvent;
use crate::task::{Board, Owner, Task};

/// The one message shown for any fetch failure.
pub const FETCH_ERROR_MESSAGE: &str = "Error fetching data. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Stale,
}

/// View state for one dashboard: the board list, the current selection and
/// whatever was last loaded for it.
#[derive(Debug, Default)]
pub struct DashboardState {
    boards: Vec<Board>,
    selected: Option<String>,
    expected_generation: Option<u64>,
    loading: bool,
    owners: Vec<Owner>,
    tasks: Vec<Task>,
    revision: u64,
    error: Option<String>,
    boards_error: Option<String>,
    open: BTreeSet<Bucket>,
    show_subitems: bool,
    memo: CategorizeMemo,
}

impl DashboardState {
    pub fn new(open: impl IntoIterator<Item = Bucket>, show_subitems: bool) -> Self {
        Self {
            open: open.into_iter().collect(),
            show_subitems,
            ..Self::default()
        }
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_board(&self) -> Option<&Board> {
        let id = self.selected.as_deref()?;
        self.boards.iter().find(|b| b.id == id)
    }

    pub fn owners(&self) -> &[Owner] {
        &self.owners
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Failure of the selected board's load.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Failure of the last board list refresh. Kept apart from [`Self::error`]
    /// so it never hides a board that did load.
    pub fn boards_error(&self) -> Option<&str> {
        self.boards_error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn show_subitems(&self) -> bool {
        self.show_subitems
    }

    pub fn set_show_subitems(&mut self, show: bool) {
        self.show_subitems = show;
    }

    pub fn is_open(&self, bucket: Bucket) -> bool {
        self.open.contains(&bucket)
    }

    pub fn set_open(&mut self, bucket: Bucket, open: bool) {
        if open {
            self.open.insert(bucket);
        } else {
            self.open.remove(&bucket);
        }
    }

    pub fn toggle(&mut self, bucket: Bucket) {
        let open = !self.is_open(bucket);
        self.set_open(bucket, open);
    }

    pub fn set_boards(&mut self, result: Result<Vec<Board>, ApiError>) {
        match result {
            Ok(boards) => {
                debug!(count = boards.len(), "board list updated");
                self.boards = boards;
                self.boards_error = None;
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch boards");
                self.boards.clear();
                self.boards_error = Some(FETCH_ERROR_MESSAGE.to_string());
            }
        }
    }

    /// Records a new selection. Data of the previous board is dropped right
    /// away so it is never shown under the new one.
    pub fn begin_selection(&mut self, board_id: &str, generation: u64) {
        self.selected = Some(board_id.to_string());
        self.expected_generation = Some(generation);
        self.loading = true;
        self.error = None;
        self.replace_data(vec![], vec![]);
    }

    /// Applies a finished load unless a newer selection superseded it.
    pub fn apply(&mut self, event: LoadEvent) -> Applied {
        if self.expected_generation != Some(event.generation) {
            debug!(
                generation = event.generation,
                expected = ?self.expected_generation,
                board_id = %event.board_id,
                "dropping superseded load"
            );
            return Applied::Stale;
        }

        self.loading = false;
        match event.outcome {
            Ok(data) => {
                self.error = None;
                self.replace_data(data.owners, data.tasks);
            }
            Err(err) => {
                warn!(board_id = %event.board_id, error = %err, "failed to load board");
                self.error = Some(FETCH_ERROR_MESSAGE.to_string());
                self.replace_data(vec![], vec![]);
            }
        }
        Applied::Updated
    }

    fn replace_data(&mut self, owners: Vec<Owner>, tasks: Vec<Task>) {
        self.owners = owners;
        self.tasks = tasks;
        self.revision += 1;
    }

    /// Buckets for the current tasks, recomputed only when the tasks or the
    /// range changed since the last call.
    pub fn categorized(&mut self, range: &DateRange, zone: &Tz) -> &CategorizedResult {
        self.memo.get(self.revision, &self.tasks, range, zone)
    }

    pub fn memo_misses(&self) -> u64 {
        self.memo.misses()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::datetime::compute_date_range;
    use crate::loader::BoardData;

    fn event(generation: u64, ids: &[&str]) -> LoadEvent {
        LoadEvent {
            generation,
            board_id: "b".to_string(),
            outcome: Ok(BoardData {
                owners: vec![Owner {
                    id: "o".to_string(),
                    name: "Ada".to_string(),
                }],
                tasks: ids.iter().map(|id| Task::new(*id, *id)).collect(),
            }),
        }
    }

    #[test]
    fn stale_generation_is_ignored() {
        let mut state = DashboardState::default();
        state.begin_selection("1", 1);
        state.begin_selection("2", 2);

        assert_eq!(state.apply(event(1, &["old"])), Applied::Stale);
        assert!(state.tasks().is_empty());
        assert!(state.is_loading());

        assert_eq!(state.apply(event(2, &["new"])), Applied::Updated);
        assert_eq!(state.tasks()[0].id, "new");
        assert_eq!(state.selected(), Some("2"));
        assert!(!state.is_loading());
    }

    #[test]
    fn fetch_error_clears_data_and_sets_message() {
        let mut state = DashboardState::default();
        state.begin_selection("1", 1);
        state.apply(event(1, &["a"]));
        state.begin_selection("1", 2);
        state.apply(LoadEvent {
            generation: 2,
            board_id: "1".to_string(),
            outcome: Err(ApiError::Timeout),
        });
        assert!(state.tasks().is_empty());
        assert!(state.owners().is_empty());
        assert_eq!(state.error(), Some(FETCH_ERROR_MESSAGE));
    }

    #[test]
    fn categorization_is_memoized_per_revision() {
        let now = Utc
            .with_ymd_and_hms(2024, 6, 15, 0, 0, 0)
            .single()
            .expect("valid now");
        let range = compute_date_range(now);
        let mut state = DashboardState::default();
        state.begin_selection("1", 1);
        state.apply(event(1, &["a", "b"]));

        assert_eq!(state.categorized(&range, &chrono_tz::UTC).undated.len(), 2);
        state.categorized(&range, &chrono_tz::UTC);
        assert_eq!(state.memo_misses(), 1);

        state.begin_selection("1", 2);
        state.apply(event(2, &["c"]));
        assert_eq!(state.categorized(&range, &chrono_tz::UTC).undated.len(), 1);
        assert_eq!(state.memo_misses(), 2);
    }

    #[test]
    fn board_list_failure_keeps_loaded_board() {
        let mut state = DashboardState::default();
        state.set_boards(Ok(vec![Board {
            id: "1".to_string(),
            name: "Roadmap".to_string(),
            owners: vec![],
        }]));
        state.begin_selection("1", 1);
        state.apply(event(1, &["a"]));

        state.set_boards(Err(ApiError::Timeout));
        assert_eq!(state.boards_error(), Some(FETCH_ERROR_MESSAGE));
        assert_eq!(state.error(), None);
        assert_eq!(state.tasks().len(), 1);
        assert_eq!(state.owners().len(), 1);

        state.set_boards(Ok(vec![]));
        assert_eq!(state.boards_error(), None);
    }

    #[test]
    fn panels_toggle() {
        let mut state = DashboardState::new([Bucket::Current], false);
        assert!(state.is_open(Bucket::Current));
        state.toggle(Bucket::Current);
        state.toggle(Bucket::Past);
        assert!(!state.is_open(Bucket::Current));
        assert!(state.is_open(Bucket::Past));
    }
}
