//! Syncpoint counters with blocking waits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{Host1xError, Result};
use crate::fence::{syncpoint_reached, Timeout, WaitOutcome};

#[derive(Debug)]
pub(crate) struct SyncpointTable {
    values: Vec<AtomicU32>,
    /// Highest value promised to submitted jobs.
    max: Vec<AtomicU32>,
    lock: Mutex<()>,
    cond: Condvar,
}

impl SyncpointTable {
    pub(crate) fn new(count: u32) -> Self {
        Self {
            values: (0..count).map(|_| AtomicU32::new(0)).collect(),
            max: (0..count).map(|_| AtomicU32::new(0)).collect(),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn len(&self) -> u32 {
        self.values.len() as u32
    }

    fn slot(&self, id: u32) -> Result<usize> {
        let idx = id as usize;
        if idx >= self.values.len() {
            return Err(Host1xError::NoSyncpoint(id));
        }
        Ok(idx)
    }

    pub(crate) fn read(&self, id: u32) -> Result<u32> {
        Ok(self.values[self.slot(id)?].load(Ordering::Acquire))
    }

    pub(crate) fn read_max(&self, id: u32) -> Result<u32> {
        Ok(self.max[self.slot(id)?].load(Ordering::Acquire))
    }

    /// Reserves `increments` future increments and returns the value marking their completion.
    pub(crate) fn reserve(&self, id: u32, increments: u32) -> Result<u32> {
        let idx = self.slot(id)?;
        // Serialized with `increment`, which may raise the maximum.
        let _guard = self.lock.lock();
        let prev = self.max[idx].fetch_add(increments, Ordering::AcqRel);
        Ok(prev.wrapping_add(increments))
    }

    /// Increments syncpoint `id` and wakes waiters. Returns the new value.
    pub(crate) fn increment(&self, id: u32) -> Result<u32> {
        let idx = self.slot(id)?;
        let value = {
            let _guard = self.lock.lock();
            let value = self.values[idx].fetch_add(1, Ordering::AcqRel).wrapping_add(1);
            // Keep the promised maximum at or ahead of the counter.
            let max = &self.max[idx];
            let current_max = max.load(Ordering::Acquire);
            if !syncpoint_reached(current_max, value) {
                max.store(value, Ordering::Release);
            }
            value
        };
        self.cond.notify_all();
        trace!(id, value, "syncpoint incremented");
        Ok(value)
    }

    pub(crate) fn wait(&self, id: u32, threshold: u32, timeout: Timeout) -> Result<WaitOutcome> {
        let idx = self.slot(id)?;
        let value = &self.values[idx];
        let deadline = timeout.deadline(Instant::now());

        let mut guard = self.lock.lock();
        loop {
            if syncpoint_reached(value.load(Ordering::Acquire), threshold) {
                return Ok(WaitOutcome::Completed);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(WaitOutcome::TimedOut);
                    }
                    let _ = self.cond.wait_until(&mut guard, deadline);
                }
                // Infinite, or too far out to represent.
                None => self.cond.wait(&mut guard),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn out_of_range_ids_fail() {
        let table = SyncpointTable::new(2);
        assert!(matches!(table.read(2), Err(Host1xError::NoSyncpoint(2))));
        assert!(table.increment(5).is_err());
    }

    #[test]
    fn reserve_accumulates_and_wraps() {
        let table = SyncpointTable::new(1);
        assert_eq!(table.reserve(0, 3).unwrap(), 3);
        assert_eq!(table.reserve(0, 2).unwrap(), 5);
        table.max[0].store(u32::MAX, Ordering::Release);
        assert_eq!(table.reserve(0, 2).unwrap(), 1);
    }

    #[test]
    fn reservations_stay_ahead_of_concurrent_overshoot() {
        let table = Arc::new(SyncpointTable::new(1));
        let bumper = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..1000 {
                    table.increment(0).unwrap();
                }
            })
        };
        let mut last: u32 = 0;
        for _ in 0..1000 {
            let fence = table.reserve(0, 1).unwrap();
            assert!(syncpoint_reached(fence, last.wrapping_add(1)));
            last = fence;
        }
        bumper.join().unwrap();
        assert!(syncpoint_reached(table.read_max(0).unwrap(), last));
        assert!(syncpoint_reached(table.read_max(0).unwrap(), table.read(0).unwrap()));
    }

    #[test]
    fn zero_timeout_polls_once() {
        let table = SyncpointTable::new(1);
        assert_eq!(table.wait(0, 1, Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
        table.increment(0).unwrap();
        assert_eq!(table.wait(0, 1, Timeout::ZERO).unwrap(), WaitOutcome::Completed);
    }

    #[test]
    fn waiter_wakes_on_increment_from_another_thread() {
        let table = Arc::new(SyncpointTable::new(1));
        let bumper = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                table.increment(0).unwrap();
                table.increment(0).unwrap();
            })
        };
        assert_eq!(table.wait(0, 2, Timeout::INFINITE).unwrap(), WaitOutcome::Completed);
        bumper.join().unwrap();
    }

    #[test]
    fn finite_timeout_expires() {
        let table = SyncpointTable::new(1);
        let start = Instant::now();
        assert_eq!(
            table.wait(0, 1, Timeout::from_millis(20)).unwrap(),
            WaitOutcome::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
