//! Date-sharded layout of sealed segments.
//!
//! Segments live under `{root}/yyyy/MM/dd/{start}.csv.gz`, where the date is the
//! UTC calendar day of the segment's first sample and `start` is that sample's
//! timestamp in decimal without padding.

use crate::store::Store;
use crate::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File extension of sealed segments.
pub const SEGMENT_EXTENSION: &str = ".csv.gz";

/// Consecutive days without a directory after which a backward search gives up.
pub const MAX_GAP_DAYS: u32 = 30;

/// Returns the UTC calendar day of an epoch-millisecond timestamp.
///
/// Timestamps beyond chrono's range clamp to its first or last representable day.
pub fn date_of(timestamp: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .unwrap_or(if timestamp < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
        .date_naive()
}

/// File name of the segment starting at `start`.
pub fn segment_name(start: i64) -> String {
    format!("{start}{SEGMENT_EXTENSION}")
}

/// Parses the start timestamp out of a segment file name.
pub fn parse_segment_name(name: &str) -> Option<i64> {
    let prefix = name.strip_suffix(SEGMENT_EXTENSION)?;
    if prefix.contains('.') {
        return None;
    }
    prefix.parse().ok()
}

/// A sealed segment found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Timestamp of the segment's first sample.
    pub start: i64,
    pub path: PathBuf,
}

/// Maps timestamps to directories and segment files below a sink root.
#[derive(Debug, Clone)]
pub struct SegmentLayout {
    root: PathBuf,
}

impl SegmentLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding segments that start on `date`.
    pub fn directory_for_date(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    /// Directory holding segments that start at `timestamp`.
    pub fn date_directory(&self, timestamp: i64) -> PathBuf {
        self.directory_for_date(date_of(timestamp))
    }

    /// Full path of the segment starting at `start`.
    pub fn segment_path(&self, start: i64) -> PathBuf {
        self.date_directory(start).join(segment_name(start))
    }

    /// Lists the segments of `dir` whose start lies in `[from, until]`,
    /// ordered by start timestamp.
    pub fn list_segments(
        &self,
        store: &dyn Store,
        dir: &Path,
        from: i64,
        until: i64,
    ) -> Result<Vec<SegmentRef>> {
        let mut segments = Vec::new();

        for entry in store.list(dir)? {
            if entry.is_dir {
                continue;
            }
            let Some(start) = parse_segment_name(&entry.name) else {
                continue;
            };
            if start >= from && start <= until {
                segments.push(SegmentRef {
                    start,
                    path: dir.join(&entry.name),
                });
            }
        }

        // Numeric order; names are not zero-padded so string order would be wrong.
        segments.sort_by_key(|segment| segment.start);
        Ok(segments)
    }

    /// Walks existing date directories backward from `start`, one day at a time.
    ///
    /// The walk ends once `max_gap_days` consecutive days have no directory.
    pub fn walk_backward<'a>(
        &'a self,
        store: &'a dyn Store,
        start: NaiveDate,
        max_gap_days: u32,
    ) -> BackwardWalk<'a> {
        BackwardWalk {
            layout: self,
            store,
            next: Some(start),
            misses: 0,
            max_gap_days,
        }
    }

    /// Returns the existing date directories between `from` and `until`
    /// inclusive, ascending.
    pub fn walk_forward(
        &self,
        store: &dyn Store,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        if from > until {
            return Ok(dirs);
        }

        // Enumerate what exists instead of probing every day of a possibly huge range.
        for (year, year_dir) in numeric_children(store, &self.root)? {
            if year < i64::from(from.year()) || year > i64::from(until.year()) {
                continue;
            }
            for (month, month_dir) in numeric_children(store, &year_dir)? {
                for (day, day_dir) in numeric_children(store, &month_dir)? {
                    let (Ok(y), Ok(m), Ok(d)) =
                        (i32::try_from(year), u32::try_from(month), u32::try_from(day))
                    else {
                        continue;
                    };
                    let Some(date) = NaiveDate::from_ymd_opt(y, m, d) else {
                        continue;
                    };
                    if date >= from && date <= until {
                        dirs.push(day_dir);
                    }
                }
            }
        }

        Ok(dirs)
    }

    /// Finds the most recent segment starting strictly before `timestamp`.
    ///
    /// Searches backward from the day of `timestamp`, giving up after
    /// [`MAX_GAP_DAYS`] days without a directory.
    pub fn latest_segment_before(
        &self,
        store: &dyn Store,
        timestamp: i64,
    ) -> Result<Option<SegmentRef>> {
        if timestamp == i64::MIN {
            return Ok(None);
        }

        for dir in self.walk_backward(store, date_of(timestamp), MAX_GAP_DAYS) {
            let mut segments = self.list_segments(store, &dir, i64::MIN, timestamp - 1)?;
            if let Some(segment) = segments.pop() {
                return Ok(Some(segment));
            }
        }
        Ok(None)
    }
}

/// Lazy backward walk over date directories, see [`SegmentLayout::walk_backward`].
pub struct BackwardWalk<'a> {
    layout: &'a SegmentLayout,
    store: &'a dyn Store,
    next: Option<NaiveDate>,
    misses: u32,
    max_gap_days: u32,
}

impl Iterator for BackwardWalk<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        while let Some(date) = self.next {
            if self.misses >= self.max_gap_days {
                self.next = None;
                break;
            }

            self.next = date.pred_opt();
            let dir = self.layout.directory_for_date(date);
            if self.store.is_dir(&dir) {
                self.misses = 0;
                return Some(dir);
            }
            self.misses += 1;
        }
        None
    }
}

/// Child directories whose names are plain integers, sorted numerically.
fn numeric_children(store: &dyn Store, dir: &Path) -> Result<Vec<(i64, PathBuf)>> {
    if !store.is_dir(dir) {
        return Ok(Vec::new());
    }

    let mut children = Vec::new();
    for entry in store.list(dir)? {
        if !entry.is_dir {
            continue;
        }
        match entry.name.parse::<i64>() {
            Ok(number) => children.push((number, dir.join(&entry.name))),
            Err(_) => warn!(
                directory = %dir.display(),
                entry = %entry.name,
                "Skipping non-numeric directory in segment layout"
            ),
        }
    }
    children.sort_by_key(|(number, _)| *number);
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn touch(store: &MemoryStore, path: &Path) {
        store.create_dir_all(path.parent().unwrap()).unwrap();
        store.writer(path).unwrap();
    }

    #[test]
    fn test_date_directory_is_utc_calendar_day() {
        let layout = SegmentLayout::new("root");
        // 2024-03-09T23:59:59.999Z
        assert_eq!(
            layout.date_directory(1_710_028_799_999),
            Path::new("root/2024/03/09")
        );
        assert_eq!(
            layout.date_directory(1_710_028_800_000),
            Path::new("root/2024/03/10")
        );
        assert_eq!(layout.date_directory(0), Path::new("root/1970/01/01"));
        assert_eq!(layout.date_directory(-1), Path::new("root/1969/12/31"));
    }

    #[test]
    fn test_segment_path_uses_unpadded_start() {
        let layout = SegmentLayout::new("");
        assert_eq!(
            layout.segment_path(1000),
            Path::new("1970/01/01/1000.csv.gz")
        );
    }

    #[test]
    fn test_parse_segment_name() {
        assert_eq!(parse_segment_name("1000.csv.gz"), Some(1000));
        assert_eq!(parse_segment_name("-5.csv.gz"), Some(-5));
        assert_eq!(parse_segment_name("1000.csv"), None);
        assert_eq!(parse_segment_name("meta.json"), None);
        assert_eq!(parse_segment_name("1.2.csv.gz"), None);
    }

    #[test]
    fn test_list_segments_orders_numerically_and_filters() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let dir = layout.date_directory(0);
        for start in [900, 10_000, 1000, 99] {
            touch(&store, &dir.join(segment_name(start)));
        }
        touch(&store, &dir.join("notes.txt"));

        let all = layout.list_segments(&store, &dir, i64::MIN, i64::MAX).unwrap();
        let starts: Vec<i64> = all.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![99, 900, 1000, 10_000]);

        let some = layout.list_segments(&store, &dir, 900, 1000).unwrap();
        let starts: Vec<i64> = some.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![900, 1000]);
    }

    #[test]
    fn test_walk_backward_tolerates_gaps_up_to_limit() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let today = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        let days_back = |n: u64| today.checked_sub_days(chrono::Days::new(n)).unwrap();

        for n in [0, 10, 40, 71, 102] {
            store
                .create_dir_all(&layout.directory_for_date(days_back(n)))
                .unwrap();
        }

        let found: Vec<PathBuf> = layout.walk_backward(&store, today, MAX_GAP_DAYS).collect();
        // 10 -> 40 leaves 29 empty days, 40 -> 71 leaves 30 and ends the walk.
        assert_eq!(
            found,
            vec![
                layout.directory_for_date(days_back(0)),
                layout.directory_for_date(days_back(10)),
                layout.directory_for_date(days_back(40)),
            ]
        );
    }

    #[test]
    fn test_walk_backward_on_empty_store_ends() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("sink");
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(layout.walk_backward(&store, start, MAX_GAP_DAYS).count(), 0);
    }

    #[test]
    fn test_walk_forward_is_inclusive_and_ascending() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("sink");
        let dates = [
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        ];
        for date in dates.iter().rev() {
            store.create_dir_all(&layout.directory_for_date(*date)).unwrap();
        }
        store.create_dir_all(Path::new("sink/lost+found")).unwrap();

        let found = layout.walk_forward(&store, dates[0], dates[2]).unwrap();
        assert_eq!(
            found,
            dates[..3]
                .iter()
                .map(|d| layout.directory_for_date(*d))
                .collect::<Vec<_>>()
        );
        assert!(
            layout
                .walk_forward(&store, dates[3], dates[0])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_latest_segment_before_crosses_directories() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let day = 86_400_000;
        touch(&store, &layout.segment_path(day - 10));
        touch(&store, &layout.segment_path(day - 5));
        touch(&store, &layout.segment_path(day + 5));

        let found = layout.latest_segment_before(&store, day + 1).unwrap().unwrap();
        assert_eq!(found.start, day - 5);
        let found = layout.latest_segment_before(&store, day + 6).unwrap().unwrap();
        assert_eq!(found.start, day + 5);
        assert!(layout.latest_segment_before(&store, day - 10).unwrap().is_none());
    }
}
