/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use tokio::task::{Id, JoinError, JoinSet};

use super::CandidateError;

pub(super) enum RaceEvent<T> {
    Won { index: usize, value: T },
    Failed { index: usize, error: CandidateError },
}

/// Concurrent candidate attempts, each under its own timeout.
///
/// Attempts that finish together are ordered by index, so the lowest
/// index wins a tie.
pub(super) struct CandidateRace<T> {
    tasks: JoinSet<Result<T, CandidateError>>,
    indexes: HashMap<Id, usize>,
    ready: BTreeMap<usize, T>,
    failed: VecDeque<(usize, CandidateError)>,
}

impl<T: Send + 'static> CandidateRace<T> {
    pub(super) fn new() -> Self {
        CandidateRace {
            tasks: JoinSet::new(),
            indexes: HashMap::new(),
            ready: BTreeMap::new(),
            failed: VecDeque::new(),
        }
    }

    pub(super) fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.ready.is_empty() && self.failed.is_empty()
    }

    pub(super) fn spawn<F>(&mut self, index: usize, timeout: Duration, attempt: F)
    where
        F: Future<Output = Result<T, CandidateError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(r) => r,
                Err(_) => Err(CandidateError::TimedOut),
            }
        });
        self.indexes.insert(handle.id(), index);
    }

    /// Next finished attempt. Failures are reported before successes.
    pub(super) async fn next(&mut self) -> Option<RaceEvent<T>> {
        if self.ready.is_empty() && self.failed.is_empty() {
            let joined = self.tasks.join_next_with_id().await?;
            self.collect(joined);
            while let Some(joined) = self.tasks.try_join_next_with_id() {
                self.collect(joined);
            }
        }
        if let Some((index, error)) = self.failed.pop_front() {
            return Some(RaceEvent::Failed { index, error });
        }
        self.ready
            .pop_first()
            .map(|(index, value)| RaceEvent::Won { index, value })
    }

    fn collect(&mut self, joined: Result<(Id, Result<T, CandidateError>), JoinError>) {
        match joined {
            Ok((id, r)) => {
                let Some(index) = self.indexes.remove(&id) else {
                    return;
                };
                match r {
                    Ok(value) => {
                        self.ready.insert(index, value);
                    }
                    Err(error) => self.failed.push_back((index, error)),
                }
            }
            Err(e) => {
                let Some(index) = self.indexes.remove(&e.id()) else {
                    return;
                };
                if e.is_panic() {
                    self.failed.push_back((index, CandidateError::Panicked));
                }
            }
        }
    }

    /// Abort every attempt still running and wait until all are gone.
    ///
    /// Finished but unclaimed values are dropped too.
    pub(super) async fn cancel_all(&mut self) {
        self.ready.clear();
        self.failed.clear();
        self.tasks.shutdown().await;
        self.indexes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn failure_then_success() {
        let mut race = CandidateRace::<&'static str>::new();
        race.spawn(0, Duration::from_secs(5), async {
            Err(CandidateError::Handshake("bad magic"))
        });
        race.spawn(1, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok("one")
        });

        let Some(RaceEvent::Failed { index, .. }) = race.next().await else {
            panic!("expected failure first");
        };
        assert_eq!(index, 0);
        let Some(RaceEvent::Won { index, value }) = race.next().await else {
            panic!("expected a winner");
        };
        assert_eq!(index, 1);
        assert_eq!(value, "one");
        assert!(race.is_empty());
        assert!(race.next().await.is_none());
    }

    #[tokio::test]
    async fn tie_lowest_index() {
        let mut race = CandidateRace::new();
        race.spawn(2, Duration::from_secs(5), async { Ok(2) });
        race.spawn(0, Duration::from_secs(5), async { Ok(0) });
        race.spawn(1, Duration::from_secs(5), async { Ok(1) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let Some(RaceEvent::Won { index, value }) = race.next().await else {
            panic!("expected a winner");
        };
        assert_eq!(index, 0);
        assert_eq!(value, 0);
        race.cancel_all().await;
        assert!(race.is_empty());
    }

    #[tokio::test]
    async fn timeout_and_cancel() {
        let released = Arc::new(AtomicBool::new(false));
        let mut race = CandidateRace::<()>::new();
        race.spawn(0, Duration::from_millis(10), std::future::pending());
        let flag = DropFlag(released.clone());
        race.spawn(1, Duration::from_secs(60), async move {
            let _flag = flag;
            std::future::pending::<()>().await;
            Ok(())
        });

        let Some(RaceEvent::Failed { index, error }) = race.next().await else {
            panic!("expected timeout");
        };
        assert_eq!(index, 0);
        assert!(matches!(error, CandidateError::TimedOut));

        assert!(!released.load(Ordering::SeqCst));
        race.cancel_all().await;
        assert!(released.load(Ordering::SeqCst));
        assert!(race.is_empty());
    }

    #[tokio::test]
    async fn panic_reported() {
        let explode = true;
        let mut race = CandidateRace::<()>::new();
        race.spawn(4, Duration::from_secs(1), async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        });
        let Some(RaceEvent::Failed { index, error }) = race.next().await else {
            panic!("expected failure");
        };
        assert_eq!(index, 4);
        assert!(matches!(error, CandidateError::Panicked));
    }
}
