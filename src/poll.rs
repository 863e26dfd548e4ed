// Report polling. The loop asks for the report, sleeps a fixed delay when
// it is not ready yet and gives up once the overall timeout has elapsed.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::{ApiError, Report, RESPONSE_PENDING};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Source of time for the poll loop.
pub trait Clock {
    /// Time since polling started.
    fn elapsed(&self) -> Duration;
    fn sleep(&mut self, d: Duration);
}

/// Wall clock backed by `Instant` and `thread::sleep`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Ready(Report),
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Poller {
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Poller {
    pub fn new(delay: Duration) -> Self {
        Poller {
            delay,
            ..Poller::default()
        }
    }

    /// Call `fetch` until it yields a ready report or `timeout` elapses.
    ///
    /// Empty results and unknown response codes count as "not ready yet".
    /// An `ApiError` from `fetch` stops polling immediately.
    pub fn poll<F, C>(&self, mut fetch: F, clock: &mut C) -> Result<PollOutcome, ApiError>
    where
        F: FnMut() -> Result<Option<Report>, ApiError>,
        C: Clock + ?Sized,
    {
        let mut attempt: u32 = 0;
        loop {
            let elapsed = clock.elapsed();
            if elapsed >= self.timeout {
                info!(attempts = attempt, "gave up waiting after {}s", elapsed.as_secs());
                return Ok(PollOutcome::TimedOut);
            }

            attempt += 1;
            match fetch()? {
                Some(report) if report.is_ready() => {
                    debug!(attempt, "report ready");
                    return Ok(PollOutcome::Ready(report));
                }
                Some(report) if report.response_code != RESPONSE_PENDING => {
                    warn!(
                        attempt,
                        code = report.response_code,
                        msg = %report.verbose_msg,
                        "unexpected report response code, still waiting"
                    );
                }
                Some(_) => debug!(attempt, "report pending"),
                None => debug!(attempt, "empty report response"),
            }

            let remaining = self.timeout.saturating_sub(clock.elapsed());
            clock.sleep(self.delay.min(remaining));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Clock that only moves when slept on.
    #[derive(Default)]
    struct FakeClock {
        now: Duration,
        sleeps: Vec<Duration>,
    }

    impl Clock for FakeClock {
        fn elapsed(&self) -> Duration {
            self.now
        }

        fn sleep(&mut self, d: Duration) {
            self.now += d;
            self.sleeps.push(d);
        }
    }

    fn report(code: i64) -> Report {
        Report {
            response_code: code,
            ..Report::default()
        }
    }

    fn scripted(codes: &[i64]) -> impl FnMut() -> Result<Option<Report>, ApiError> {
        let mut queue: VecDeque<Report> = codes.iter().map(|&c| report(c)).collect();
        move || Ok(queue.pop_front())
    }

    #[test]
    fn returns_first_ready_report_after_two_waits() {
        let mut clock = FakeClock::default();
        let poller = Poller::new(Duration::from_secs(60));

        let outcome = poller.poll(scripted(&[0, 0, 1]), &mut clock).unwrap();
        match outcome {
            PollOutcome::Ready(r) => assert_eq!(r.response_code, 1),
            other => panic!("expected ready report, got {:?}", other),
        }
        assert_eq!(clock.sleeps, vec![Duration::from_secs(60); 2]);
    }

    #[test]
    fn always_pending_times_out() {
        let mut clock = FakeClock::default();
        let poller = Poller::new(Duration::from_secs(60));
        let mut calls = 0;

        let outcome = poller
            .poll(
                || {
                    calls += 1;
                    Ok(Some(report(0)))
                },
                &mut clock,
            )
            .unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(clock.now, DEFAULT_TIMEOUT);
        assert_eq!(calls, 60);
    }

    #[test]
    fn last_sleep_is_clipped_to_timeout() {
        let mut clock = FakeClock::default();
        let poller = Poller {
            delay: Duration::from_secs(40),
            timeout: Duration::from_secs(100),
        };

        let outcome = poller.poll(scripted(&[]), &mut clock).unwrap();
        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(
            clock.sleeps,
            vec![
                Duration::from_secs(40),
                Duration::from_secs(40),
                Duration::from_secs(20)
            ]
        );
    }

    #[test]
    fn unknown_codes_keep_polling() {
        let mut clock = FakeClock::default();
        let poller = Poller::new(Duration::from_secs(5));

        let outcome = poller.poll(scripted(&[-2, 0, 1]), &mut clock).unwrap();
        assert!(matches!(outcome, PollOutcome::Ready(_)));
        assert_eq!(clock.sleeps.len(), 2);
    }

    #[test]
    fn api_errors_stop_polling() {
        let mut clock = FakeClock::default();
        let poller = Poller::default();

        let err = poller
            .poll(|| Err(ApiError::RateLimited), &mut clock)
            .unwrap_err();
        assert_eq!(err, ApiError::RateLimited);
        assert!(clock.sleeps.is_empty());

        let err = poller
            .poll(|| Err(ApiError::Unauthorized), &mut clock)
            .unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }
}
