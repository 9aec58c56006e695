// Batch scheduling and page fan-out
use std::ops::RangeInclusive;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::types::{IngestError, Result};

/// Splits `1..=total_pages` into ordered, contiguous batches of at most
/// `batch_size` pages.
#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: u32,
}

impl BatchScheduler {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = u32::try_from(batch_size).unwrap_or(u32::MAX).max(1);
        Self { batch_size }
    }

    pub fn batch_count(&self, total_pages: u32) -> u32 {
        total_pages.div_ceil(self.batch_size)
    }

    pub fn batches(&self, total_pages: u32) -> Batches {
        Batches { next: 1, total_pages, batch_size: self.batch_size }
    }
}

#[derive(Debug, Clone)]
pub struct Batches {
    next: u32,
    total_pages: u32,
    batch_size: u32,
}

impl Iterator for Batches {
    type Item = RangeInclusive<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 || self.next > self.total_pages {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.batch_size - 1).min(self.total_pages);
        // Wraps to 0 only when `end` is u32::MAX, which ends iteration.
        self.next = end.wrapping_add(1);
        Some(start..=end)
    }
}

/// Runs the pages of one batch, either inline or on a bounded pool.
/// Results always come back in page order.
pub(crate) enum PagePool {
    Sequential,
    Parallel(ThreadPool),
}

impl PagePool {
    pub(crate) fn new(workers: usize) -> Result<Self> {
        if workers <= 1 {
            return Ok(PagePool::Sequential);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ingest-worker-{i}"))
            .build()
            .map_err(|e| IngestError::InvalidConfig(format!("cannot start {workers} workers: {e}")))?;
        Ok(PagePool::Parallel(pool))
    }

    pub(crate) fn run<T, F>(&self, pages: RangeInclusive<u32>, work: F) -> Vec<T>
    where
        T: Send,
        F: Fn(u32) -> T + Sync + Send,
    {
        match self {
            PagePool::Sequential => pages.map(work).collect(),
            PagePool::Parallel(pool) => pool.install(|| pages.into_par_iter().map(|page| work(page)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(120, 25, vec![1..=25, 26..=50, 51..=75, 76..=100, 101..=120])]
    #[case(3, 25, vec![1..=3])]
    #[case(50, 25, vec![1..=25, 26..=50])]
    #[case(4, 1, vec![1..=1, 2..=2, 3..=3, 4..=4])]
    #[case(0, 25, vec![])]
    fn batches_cover_every_page_once(
        #[case] total: u32,
        #[case] size: usize,
        #[case] expected: Vec<RangeInclusive<u32>>,
    ) {
        let scheduler = BatchScheduler::new(size);
        let batches: Vec<_> = scheduler.batches(total).collect();
        assert_eq!(batches.len() as u32, scheduler.batch_count(total));
        assert_eq!(batches, expected);
    }

    #[test]
    fn last_page_of_u32_terminates() {
        let batches: Vec<_> = Batches { next: u32::MAX - 1, total_pages: u32::MAX, batch_size: 5 }.collect();
        assert_eq!(batches, vec![(u32::MAX - 1)..=u32::MAX]);
    }

    #[test]
    fn parallel_pool_keeps_page_order() {
        let pool = PagePool::new(4).unwrap();
        let pages = pool.run(1..=64, |page| {
            std::thread::sleep(std::time::Duration::from_micros(u64::from(64 - page)));
            page
        });
        assert_eq!(pages, (1..=64).collect::<Vec<_>>());
        assert!(matches!(PagePool::new(1).unwrap(), PagePool::Sequential));
    }
}
