//! Bandwidth limiting.
//!
//! `BandwidthLimiter` wraps a `governor` rate limiter counting one cell per
//! byte. Clones share the same limiter, so every worker of one download draws
//! from a single budget and the cap applies to the aggregate rate. Burst is a
//! tenth of a second's worth of bytes; larger writes are paced in burst-sized
//! steps. Waiting blocks the calling worker thread.

use std::fmt;
use std::io::{self, Write};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::thread;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct Paced {
    limit: u64,
    burst: NonZeroU32,
    limiter: DirectLimiter,
    clock: DefaultClock,
}

#[derive(Clone)]
pub struct BandwidthLimiter {
    paced: Option<Arc<Paced>>,
}

impl fmt::Debug for BandwidthLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandwidthLimiter")
            .field("limit", &self.limit())
            .finish()
    }
}

impl BandwidthLimiter {
    /// `limit` in bytes/sec; None or Some(0) disables the cap.
    pub fn new(limit: Option<u64>) -> Self {
        let paced = limit.filter(|&l| l > 0).map(|limit| {
            let per_sec = u32::try_from(limit).unwrap_or(u32::MAX);
            let rate = NonZeroU32::new(per_sec).unwrap_or(NonZeroU32::MIN);
            let burst = NonZeroU32::new(per_sec / 10).unwrap_or(NonZeroU32::MIN);
            let quota = Quota::per_second(rate).allow_burst(burst);
            Arc::new(Paced {
                limit,
                burst,
                limiter: RateLimiter::direct(quota),
                clock: DefaultClock::default(),
            })
        });
        Self { paced }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn limit(&self) -> Option<u64> {
        self.paced.as_ref().map(|p| p.limit)
    }

    /// Record `n` bytes and block the calling thread until the cap allows them.
    pub fn throttle(&self, n: usize) {
        let Some(paced) = &self.paced else {
            return;
        };
        let mut left = n as u64;
        while left > 0 {
            let step = left.min(u64::from(paced.burst.get())) as u32;
            let Some(cells) = NonZeroU32::new(step) else {
                return;
            };
            // step never exceeds burst, so capacity is always sufficient
            while let Ok(Err(not_until)) = paced.limiter.check_n(cells) {
                thread::sleep(not_until.wait_time_from(paced.clock.now()));
            }
            left -= u64::from(step);
        }
    }
}

/// Writer adapter that throttles every write through a shared limiter.
///
/// curl pushes body data into a sink, so the limiter wraps the part-file
/// writer rather than a response reader.
pub struct LimitedWriter<W: Write> {
    inner: W,
    limiter: BandwidthLimiter,
}

impl<W: Write> LimitedWriter<W> {
    pub fn new(inner: W, limiter: BandwidthLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.limiter.throttle(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn zero_or_none_is_unlimited() {
        assert_eq!(BandwidthLimiter::new(Some(0)).limit(), None);
        assert_eq!(BandwidthLimiter::unlimited().limit(), None);
        assert_eq!(BandwidthLimiter::new(Some(4096)).limit(), Some(4096));

        let l = BandwidthLimiter::unlimited();
        let start = Instant::now();
        l.throttle(50_000_000);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn burst_passes_without_waiting() {
        // burst is a tenth of the rate
        let l = BandwidthLimiter::new(Some(100_000));
        let start = Instant::now();
        l.throttle(10_000);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn clones_share_one_budget() {
        let a = BandwidthLimiter::new(Some(10_000));
        let b = a.clone();
        let start = Instant::now();
        a.throttle(1_500);
        b.throttle(1_500);
        // 3000 bytes minus a 1000 byte burst at 10000 B/s
        assert!(start.elapsed() >= Duration::from_millis(180), "{:?}", start.elapsed());
    }

    #[test]
    fn tiny_limit_still_progresses() {
        let l = BandwidthLimiter::new(Some(5));
        let start = Instant::now();
        l.throttle(2);
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn limited_writer_passes_bytes_through() {
        let mut w = LimitedWriter::new(Vec::new(), BandwidthLimiter::unlimited());
        w.write_all(b"hello").unwrap();
        w.flush().unwrap();
        assert_eq!(w.into_inner(), b"hello");
    }

    #[test]
    fn limited_writer_slows_down() {
        let mut w = LimitedWriter::new(Vec::new(), BandwidthLimiter::new(Some(10_000)));
        let start = Instant::now();
        w.write_all(&[0u8; 3_000]).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(180));
        assert_eq!(w.get_ref().len(), 3_000);
    }
}
