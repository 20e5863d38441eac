//! Thread-safe IMU sample buffer.
//!
//! One producer appends samples in strictly increasing time order while one
//! or more consumers request time ranges. Every returned range ends exactly
//! at the requested upper timestamp, interpolating linearly when no sample
//! lands there. Consumers either poll (`get_*`) or wait on a condition
//! variable with an explicit timeout (`wait_for_*`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, warn};

use super::sample::ImuSample;
use crate::error::{InitError, Result};

/// Buffer retention configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Samples older than `newest - max_duration_s` are evicted on insert.
    pub max_duration_s: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_duration_s: 30.0,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_duration_s.is_finite() || self.max_duration_s <= 0.0 {
            return Err(InitError::InvalidConfig(format!(
                "buffer max_duration_s must be positive, got {}",
                self.max_duration_s
            )));
        }
        Ok(())
    }

    fn max_duration_ns(&self) -> u64 {
        (self.max_duration_s * 1e9).round() as u64
    }
}

/// A contiguous run of samples returned by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuRange {
    pub samples: Vec<ImuSample>,
}

impl ImuRange {
    pub fn timestamps(&self) -> Vec<u64> {
        self.samples.iter().map(|s| s.timestamp_ns).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<u64> {
        self.samples.first().map(|s| s.timestamp_ns)
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.samples.last().map(|s| s.timestamp_ns)
    }
}

/// Counters describing buffer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub accepted: u64,
    pub rejected: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct BufferInner {
    samples: VecDeque<ImuSample>,
    stats: BufferStats,
    shutdown: bool,
}

impl BufferInner {
    fn oldest(&self) -> Option<u64> {
        self.samples.front().map(|s| s.timestamp_ns)
    }

    fn newest(&self) -> Option<u64> {
        self.samples.back().map(|s| s.timestamp_ns)
    }

    /// Index of the first sample with timestamp > `t`.
    fn upper_index(&self, t: u64) -> usize {
        self.samples.partition_point(|s| s.timestamp_ns <= t)
    }

    /// Sample at exactly `t`, or interpolated between its neighbours.
    /// Caller guarantees `oldest <= t <= newest`.
    fn sample_at(&self, t: u64) -> ImuSample {
        let idx = self.upper_index(t);
        let prev = &self.samples[idx - 1];
        if prev.timestamp_ns == t || idx == self.samples.len() {
            return *prev;
        }
        prev.interpolate(&self.samples[idx], t)
    }

    fn check_range(&self, t_start: u64, t_end: u64) -> Result<()> {
        if t_start >= t_end {
            return Err(InitError::InvalidQuery(format!(
                "range start {t_start} must precede end {t_end}"
            )));
        }
        let (oldest, newest) = match (self.oldest(), self.newest()) {
            (Some(o), Some(n)) => (o, n),
            _ => {
                return Err(InitError::BufferNotYetReady {
                    to_ns: t_end,
                    newest_ns: None,
                })
            }
        };
        // An evicted start can never be served, however long the caller waits
        if t_start < oldest {
            return Err(InitError::BufferGap {
                from_ns: t_start,
                to_ns: t_end,
                oldest_ns: oldest,
            });
        }
        if t_end > newest {
            return Err(InitError::BufferNotYetReady {
                to_ns: t_end,
                newest_ns: Some(newest),
            });
        }
        Ok(())
    }

    fn upper_border_range(&self, t_start: u64, t_end: u64) -> Result<ImuRange> {
        self.check_range(t_start, t_end)?;

        let first = self.upper_index(t_start);
        let last = self.samples.partition_point(|s| s.timestamp_ns < t_end);
        let mut samples: Vec<ImuSample> = self.samples.range(first..last).copied().collect();
        samples.push(self.sample_at(t_end));
        Ok(ImuRange { samples })
    }

    fn borders_range(&self, t_start: u64, t_end: u64) -> Result<ImuRange> {
        let mut range = self.upper_border_range(t_start, t_end)?;
        range.samples.insert(0, self.sample_at(t_start));
        Ok(range)
    }
}

/// IMU buffer shared between the sensor producer and the initialization
/// thread.
#[derive(Debug)]
pub struct ImuBuffer {
    config: BufferConfig,
    inner: Mutex<BufferInner>,
    data_ready: Condvar,
}

impl ImuBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BufferInner::default()),
            data_ready: Condvar::new(),
        }
    }

    /// Append a sample; rejects timestamps that do not advance the buffer.
    pub fn add_measurement(&self, sample: ImuSample) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(last) = inner.newest() {
            if sample.timestamp_ns <= last {
                inner.stats.rejected += 1;
                drop(inner);
                warn!(
                    "Dropping non-monotonic IMU sample at {} ns (last accepted {} ns)",
                    sample.timestamp_ns, last
                );
                return Err(InitError::NonMonotonicTimestamp {
                    timestamp_ns: sample.timestamp_ns,
                    last_ns: last,
                });
            }
        }

        inner.samples.push_back(sample);
        inner.stats.accepted += 1;

        // Evict everything older than the retention window
        let cutoff = sample
            .timestamp_ns
            .saturating_sub(self.config.max_duration_ns());
        let mut evicted = 0;
        while inner.samples.len() > 1
            && inner.samples.front().is_some_and(|s| s.timestamp_ns < cutoff)
        {
            inner.samples.pop_front();
            evicted += 1;
        }
        inner.stats.evicted += evicted;
        drop(inner);

        if evicted > 0 {
            debug!("Evicted {} IMU samples older than {} ns", evicted, cutoff);
        }
        self.data_ready.notify_all();
        Ok(())
    }

    /// Samples in `(t_start, t_end]`, the last one placed exactly at `t_end`.
    pub fn get_interpolated_range(&self, t_start: u64, t_end: u64) -> Result<ImuRange> {
        self.inner.lock().upper_border_range(t_start, t_end)
    }

    /// Samples spanning exactly `[t_start, t_end]`, both borders interpolated
    /// when needed.
    pub fn get_interpolated_borders(&self, t_start: u64, t_end: u64) -> Result<ImuRange> {
        self.inner.lock().borders_range(t_start, t_end)
    }

    /// Blocking variant of [`get_interpolated_range`](Self::get_interpolated_range).
    pub fn wait_for_range(&self, t_start: u64, t_end: u64, timeout: Duration) -> Result<ImuRange> {
        self.wait_then(timeout, |inner| {
            inner.upper_border_range(t_start, t_end)
        })
    }

    /// Blocking variant of [`get_interpolated_borders`](Self::get_interpolated_borders).
    pub fn wait_for_borders(
        &self,
        t_start: u64,
        t_end: u64,
        timeout: Duration,
    ) -> Result<ImuRange> {
        self.wait_then(timeout, |inner| inner.borders_range(t_start, t_end))
    }

    fn wait_then<F>(&self, timeout: Duration, query: F) -> Result<ImuRange>
    where
        F: Fn(&BufferInner) -> Result<ImuRange>,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return Err(InitError::BufferShutdown);
            }
            match query(&*inner) {
                Err(e) if e.is_transient() => {}
                outcome => return outcome,
            }
            if self.data_ready.wait_until(&mut inner, deadline).timed_out() {
                if inner.shutdown {
                    return Err(InitError::BufferShutdown);
                }
                return query(&*inner);
            }
        }
    }

    /// Wake all waiting readers; subsequent waits fail with `BufferShutdown`.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown = true;
        self.data_ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.inner.lock().oldest()
    }

    pub fn newest_timestamp(&self) -> Option<u64> {
        self.inner.lock().newest()
    }

    pub fn stats(&self) -> BufferStats {
        self.inner.lock().stats
    }
}

impl Default for ImuBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn sample(t: u64, value: f64) -> ImuSample {
        ImuSample::new(
            t,
            Vector3::new(value, 0.0, 9.81),
            Vector3::new(0.0, value, 0.0),
        )
    }

    fn filled_buffer() -> ImuBuffer {
        let buffer = ImuBuffer::default();
        for k in 0..=10u64 {
            buffer.add_measurement(sample(k * 100, k as f64)).unwrap();
        }
        buffer
    }

    fn assert_strictly_increasing(range: &ImuRange) {
        for pair in range.samples.windows(2) {
            assert!(pair[0].timestamp_ns < pair[1].timestamp_ns);
        }
    }

    #[test]
    fn test_rejects_non_increasing_timestamps() {
        let buffer = ImuBuffer::default();
        buffer.add_measurement(sample(100, 1.0)).unwrap();
        buffer.add_measurement(sample(200, 2.0)).unwrap();

        assert!(matches!(
            buffer.add_measurement(sample(200, 3.0)),
            Err(InitError::NonMonotonicTimestamp {
                timestamp_ns: 200,
                last_ns: 200
            })
        ));
        assert!(matches!(
            buffer.add_measurement(sample(150, 3.0)),
            Err(InitError::NonMonotonicTimestamp { .. })
        ));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stats().rejected, 2);
        buffer.add_measurement(sample(300, 3.0)).unwrap();

        let range = buffer.get_interpolated_range(100, 300).unwrap();
        assert_eq!(range.timestamps(), vec![200, 300]);
        assert_strictly_increasing(&range);
    }

    #[test]
    fn test_exact_upper_border_returns_stored_sample() {
        let buffer = filled_buffer();
        let range = buffer.get_interpolated_range(200, 500).unwrap();

        assert_eq!(range.timestamps(), vec![300, 400, 500]);
        assert_eq!(range.samples[2], sample(500, 5.0));
    }

    #[test]
    fn test_interpolated_upper_border() {
        let buffer = filled_buffer();
        let range = buffer.get_interpolated_range(200, 550).unwrap();

        assert_eq!(range.timestamps(), vec![300, 400, 500, 550]);
        let last = range.samples.last().unwrap();
        assert_relative_eq!(last.accel.x, 5.5, epsilon = 1e-12);
        assert_relative_eq!(last.gyro.y, 5.5, epsilon = 1e-12);
        assert_strictly_increasing(&range);
    }

    #[test]
    fn test_interpolated_borders_span_exactly() {
        let buffer = filled_buffer();
        let range = buffer.get_interpolated_borders(150, 420).unwrap();

        assert_eq!(range.first_timestamp(), Some(150));
        assert_eq!(range.last_timestamp(), Some(420));
        assert_eq!(range.timestamps(), vec![150, 200, 300, 400, 420]);
        assert_relative_eq!(range.samples[0].accel.x, 1.5, epsilon = 1e-12);
        assert_relative_eq!(range.samples[4].accel.x, 4.2, epsilon = 1e-12);

        let exact = buffer.get_interpolated_borders(100, 300).unwrap();
        assert_eq!(exact.samples[0], sample(100, 1.0));
        assert_eq!(exact.timestamps(), vec![100, 200, 300]);
    }

    #[test]
    fn test_not_yet_available() {
        let buffer = filled_buffer();
        let err = buffer.get_interpolated_range(500, 1500).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            err,
            InitError::BufferNotYetReady {
                to_ns: 1500,
                newest_ns: Some(1000)
            }
        );

        let empty = ImuBuffer::default();
        assert!(matches!(
            empty.get_interpolated_range(0, 10),
            Err(InitError::BufferNotYetReady { newest_ns: None, .. })
        ));
    }

    #[test]
    fn test_never_available_after_eviction() {
        let buffer = ImuBuffer::new(BufferConfig {
            max_duration_s: 500e-9,
        });
        for k in 0..=10u64 {
            buffer.add_measurement(sample(k * 100, k as f64)).unwrap();
        }
        assert_eq!(buffer.oldest_timestamp(), Some(500));
        assert_eq!(buffer.newest_timestamp(), Some(1000));
        assert_eq!(buffer.stats().evicted, 5);

        let err = buffer.get_interpolated_range(200, 800).unwrap_err();
        assert!(matches!(err, InitError::BufferGap { oldest_ns: 500, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_evicted_start_is_gap_even_past_newest() {
        let buffer = ImuBuffer::new(BufferConfig {
            max_duration_s: 500e-9,
        });
        for k in 0..=10u64 {
            buffer.add_measurement(sample(k * 100, k as f64)).unwrap();
        }

        let err = buffer.get_interpolated_range(100, 2000).unwrap_err();
        assert_eq!(
            err,
            InitError::BufferGap {
                from_ns: 100,
                to_ns: 2000,
                oldest_ns: 500
            }
        );
        assert!(!err.is_transient());

        // Waiting returns the gap at once instead of running out the timeout
        let start = Instant::now();
        let err = buffer
            .wait_for_borders(100, 2000, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, InitError::BufferGap { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_query() {
        let buffer = filled_buffer();
        assert!(matches!(
            buffer.get_interpolated_range(500, 500),
            Err(InitError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_wait_times_out_without_data() {
        let buffer = filled_buffer();
        let start = Instant::now();
        let err = buffer
            .wait_for_range(500, 5000, Duration::from_millis(20))
            .unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(matches!(err, InitError::BufferNotYetReady { .. }));
    }

    #[test]
    fn test_wait_wakes_on_new_data() {
        let buffer = Arc::new(filled_buffer());
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for k in 11..=20u64 {
                    thread::sleep(Duration::from_millis(2));
                    buffer.add_measurement(sample(k * 100, k as f64)).unwrap();
                }
            })
        };

        let range = buffer
            .wait_for_borders(900, 1850, Duration::from_secs(5))
            .unwrap();
        assert_eq!(range.first_timestamp(), Some(900));
        assert_eq!(range.last_timestamp(), Some(1850));
        assert_strictly_increasing(&range);
        producer.join().unwrap();
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let buffer = Arc::new(filled_buffer());
        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_for_range(500, 9000, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(10));
        buffer.shutdown();
        assert_eq!(waiter.join().unwrap(), Err(InitError::BufferShutdown));
    }
}
