//! Read paths that stitch the open partition and sealed segments together.

use crate::codec;
use crate::layout::{MAX_GAP_DAYS, SegmentLayout, SegmentRef, date_of};
use crate::store::Store;
use crate::{Result, Sample, Snapshot};
use chrono::Utc;
use std::ops::ControlFlow;
use tracing::debug;

/// Answers queries for one sink.
pub struct QueryEngine<'a> {
    store: &'a dyn Store,
    layout: &'a SegmentLayout,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a dyn Store, layout: &'a SegmentLayout) -> Self {
        Self { store, layout }
    }

    /// Returns the most recent `amount` samples at or before `until`, ascending.
    ///
    /// History is searched backward from the day of `until`, or from today when
    /// `until` lies in the future, and the search gives up after
    /// [`MAX_GAP_DAYS`] consecutive days without data.
    pub fn snapshot_until(&self, buffer: &Snapshot, amount: usize, until: i64) -> Result<Snapshot> {
        if amount == 0 {
            return Ok(Snapshot::new());
        }

        let live = buffer.values();
        let eligible = live.partition_point(|s| s.timestamp <= until);
        let live = &live[eligible.saturating_sub(amount)..eligible];

        let mut remaining = amount - live.len();
        // Newest segment first; every chunk is ascending on its own.
        let mut chunks: Vec<Vec<Sample>> = Vec::new();

        if remaining > 0 {
            let start = date_of(until).min(Utc::now().date_naive());
            'walk: for dir in self.layout.walk_backward(self.store, start, MAX_GAP_DAYS) {
                let segments = self.layout.list_segments(self.store, &dir, i64::MIN, until)?;
                for segment in segments.iter().rev() {
                    let snapshot = codec::decode(self.store, &segment.path, true)?;
                    let samples = snapshot.values();
                    let samples = &samples[..samples.partition_point(|s| s.timestamp <= until)];

                    if samples.len() >= remaining {
                        chunks.push(samples[samples.len() - remaining..].to_vec());
                        break 'walk;
                    }
                    chunks.push(samples.to_vec());
                    remaining -= samples.len();
                }
            }
        }

        let mut values = Vec::with_capacity(amount);
        for chunk in chunks.into_iter().rev() {
            values.extend(chunk);
        }
        values.extend_from_slice(live);
        Ok(Snapshot::from_values(values))
    }

    /// Returns every sample with `from <= timestamp <= until`, ascending.
    pub fn snapshot_between(&self, buffer: &Snapshot, from: i64, until: i64) -> Result<Snapshot> {
        let mut values = Vec::new();
        if from > until {
            return Ok(Snapshot::from_values(values));
        }

        let buffer_start = buffer.first().map(|s| s.timestamp);

        // Sealed segments may end on the buffer's first timestamp, so history is
        // also consulted when `from` equals it.
        if buffer_start.is_none_or(|start| from <= start) {
            self.collect_history(from, until, &mut values)?;
        }

        if let Some(start) = buffer_start
            && until >= start
        {
            for sample in buffer {
                if sample.timestamp > until {
                    break;
                }
                if sample.timestamp >= from {
                    values.push(*sample);
                }
            }
        }

        Ok(Snapshot::from_values(values))
    }

    fn collect_history(&self, from: i64, until: i64, values: &mut Vec<Sample>) -> Result<()> {
        // The segment that was open at `from` may have started on an earlier day.
        if let Some(segment) = self.layout.latest_segment_before(self.store, from)?
            && self.scan_segment(&segment, from, until, values)?.is_break()
        {
            return Ok(());
        }

        let dirs = self
            .layout
            .walk_forward(self.store, date_of(from), date_of(until))?;
        debug!(
            root = %self.layout.root().display(),
            from,
            until,
            directories = dirs.len(),
            "Scanning sealed segments"
        );

        for dir in dirs {
            for segment in self.layout.list_segments(self.store, &dir, from, until)? {
                if self.scan_segment(&segment, from, until, values)?.is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Copies in-range samples of one segment; breaks once a sample passes `until`.
    fn scan_segment(
        &self,
        segment: &SegmentRef,
        from: i64,
        until: i64,
        values: &mut Vec<Sample>,
    ) -> Result<ControlFlow<()>> {
        let snapshot = codec::decode(self.store, &segment.path, true)?;
        for sample in snapshot.iter() {
            if sample.timestamp > until {
                return Ok(ControlFlow::Break(()));
            }
            if sample.timestamp >= from {
                values.push(*sample);
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}
