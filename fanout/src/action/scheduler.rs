//! Bounded-concurrency launcher used by composites to run their children.
//!
//! Items launch in slice order on scoped OS threads. A launch waits for a free
//! slot and for the throttle interval since the previous launch. Completion
//! order is unconstrained; [`run_bounded`] returns once every launched item has
//! finished. Items whose turn comes after the deadline are handed to `skip`
//! instead of being launched.

use std::num::NonZeroUsize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::ValidationError;

/// Launch constraints for one composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchPolicy {
    /// Maximum simultaneously running items. `None` is unbounded.
    pub limit: Option<NonZeroUsize>,
    /// Minimum spacing between consecutive launches.
    pub throttle: Duration,
}

impl LaunchPolicy {
    pub fn new(limit: Option<usize>, throttle: Duration) -> Result<Self, ValidationError> {
        let limit = match limit {
            None => None,
            Some(raw) => Some(NonZeroUsize::new(raw).ok_or_else(|| {
                ValidationError::new("concurrency limit must be a positive integer")
            })?),
        };
        Ok(Self { limit, throttle })
    }
}

/// Counter of running items, shared between the launcher and workers.
struct Slots {
    limit: Option<usize>,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl Slots {
    fn new(limit: Option<NonZeroUsize>) -> Self {
        Self {
            limit: limit.map(NonZeroUsize::get),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a slot, blocking while all are busy. Returns `false` if the
    /// deadline passes first.
    fn acquire(&self, deadline: Option<Instant>) -> bool {
        let mut in_use = self.lock();
        if let Some(limit) = self.limit {
            while *in_use >= limit {
                match deadline {
                    None => {
                        in_use = self
                            .freed
                            .wait(in_use)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return false;
                        }
                        in_use = self
                            .freed
                            .wait_timeout(in_use, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        }
        *in_use += 1;
        trace!(in_use = *in_use, "slot acquired");
        true
    }

    fn release(&self) {
        let mut in_use = self.lock();
        *in_use = in_use.saturating_sub(1);
        self.freed.notify_one();
    }
}

/// Releases its slot when the worker finishes, even by panic.
struct SlotGuard<'a>(&'a Slots);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Sleep until `ready_at`, but never past `deadline`.
fn wait_for_throttle(ready_at: Instant, deadline: Option<Instant>) {
    let target = match deadline {
        Some(deadline) => ready_at.min(deadline),
        None => ready_at,
    };
    let now = Instant::now();
    if target > now {
        debug!(wait_ms = (target - now).as_millis() as u64, "throttling launch");
        thread::sleep(target - now);
    }
}

/// Run `run` over every item under `policy`, blocking until all launched items finish.
///
/// Never fails because an item failed: outcomes are written into the items
/// themselves. Items not launched before `deadline` are passed to `skip`.
pub fn run_bounded<T, R, S>(
    items: &mut [T],
    policy: &LaunchPolicy,
    deadline: Option<Instant>,
    run: R,
    mut skip: S,
) where
    T: Send,
    R: Fn(&mut T) + Sync,
    S: FnMut(&mut T),
{
    let slots = Slots::new(policy.limit);
    let run = &run;

    thread::scope(|scope| {
        let mut last_launch: Option<Instant> = None;
        for (index, item) in items.iter_mut().enumerate() {
            if !slots.acquire(deadline) {
                skip(item);
                continue;
            }
            if let Some(last) = last_launch {
                wait_for_throttle(last + policy.throttle, deadline);
            }
            if deadline_passed(deadline) {
                slots.release();
                skip(item);
                continue;
            }

            last_launch = Some(Instant::now());
            debug!(index, "launching");
            let guard = SlotGuard(&slots);
            scope.spawn(move || {
                let _guard = guard;
                run(item);
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UNIT: Duration = Duration::from_millis(100);

    #[test]
    fn zero_limit_is_rejected() {
        let err = LaunchPolicy::new(Some(0), Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn limit_bounds_simultaneous_items() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut items = vec![0u32; 5];
        let policy = LaunchPolicy::new(Some(2), Duration::ZERO).expect("policy");

        let start = Instant::now();
        run_bounded(
            &mut items,
            &policy,
            None,
            |item| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(UNIT);
                active.fetch_sub(1, Ordering::SeqCst);
                *item = 1;
            },
            |_| panic!("nothing should be skipped"),
        );
        let elapsed = start.elapsed();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert!(items.iter().all(|item| *item == 1));
        assert!(elapsed >= UNIT * 3, "finished too fast: {elapsed:?}");
        assert!(elapsed < UNIT * 5, "finished too slow: {elapsed:?}");
    }

    #[test]
    fn unbounded_runs_everything_at_once() {
        let mut items = vec![0u32; 6];
        let start = Instant::now();
        run_bounded(
            &mut items,
            &LaunchPolicy::default(),
            None,
            |item| {
                thread::sleep(UNIT);
                *item += 1;
            },
            |_| {},
        );
        assert!(start.elapsed() < UNIT * 3);
        assert!(items.iter().all(|item| *item == 1));
    }

    #[test]
    fn throttle_spaces_consecutive_launches() {
        let launches = Mutex::new(Vec::new());
        let mut items = vec![(); 4];
        let policy = LaunchPolicy::new(None, UNIT / 2).expect("policy");

        run_bounded(
            &mut items,
            &policy,
            None,
            |_| launches.lock().expect("lock").push(Instant::now()),
            |_| {},
        );

        let mut launches = launches.into_inner().expect("lock");
        launches.sort();
        assert_eq!(launches.len(), 4);
        assert!(launches[3] - launches[0] >= (UNIT / 2) * 3);
    }

    #[test]
    fn items_after_deadline_are_skipped() {
        let mut items = vec!["pending"; 3];
        let policy = LaunchPolicy::new(Some(1), Duration::ZERO).expect("policy");
        let deadline = Instant::now() + UNIT;

        run_bounded(
            &mut items,
            &policy,
            Some(deadline),
            |item| {
                thread::sleep(UNIT * 2);
                *item = "ran";
            },
            |item| *item = "skipped",
        );

        assert_eq!(items, vec!["ran", "skipped", "skipped"]);
    }
}
