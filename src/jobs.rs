/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A bounded worker pool with priority classes.
//!
//! Background work in the node is not all equal: consensus must not wait behind ledger
//! saves. Jobs are submitted under a [`JobClass`]; workers always take from the highest
//! non-empty class, FIFO within a class. Submission never blocks. The pool itself is a
//! fixed number of threads; a job runs to completion once started, so anything submitted
//! here must not block indefinitely.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use threadpool::ThreadPool;

/// Priority classes, highest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobClass {
    /// Consensus round work.
    Consensus = 0,
    /// Applying transactions outside the round-critical path.
    TxApply = 1,
    /// Fetching missing trie nodes and ledgers from peers.
    NodeFetch = 2,
    /// Writing accepted ledgers out to the store.
    LedgerSave = 3,
}

const CLASS_COUNT: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// See the module documentation.
#[derive(Clone)]
pub struct JobPool {
    pool: ThreadPool,
    pending: Arc<Mutex<[VecDeque<Job>; CLASS_COUNT]>>,
}

impl JobPool {
    /// A pool with `workers` threads.
    pub fn new(workers: usize) -> JobPool {
        JobPool {
            pool: ThreadPool::new(workers.max(1)),
            pending: Arc::new(Mutex::new(std::array::from_fn(|_| VecDeque::new()))),
        }
    }

    /// Queue `job` under `class`. Returns immediately.
    pub fn submit(&self, class: JobClass, job: impl FnOnce() + Send + 'static) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending[class as usize].push_back(Box::new(job));
        }
        // Each pool task takes the highest-priority job available at the time it runs,
        // which may not be the one submitted here.
        let pending = self.pending.clone();
        self.pool.execute(move || {
            let job = {
                let mut pending = pending.lock().unwrap();
                pending.iter_mut().find_map(|queue| queue.pop_front())
            };
            if let Some(job) = job {
                job();
            }
        });
    }

    /// Block until every queued job has run. Used on shutdown and in tests.
    pub fn join(&self) {
        self.pool.join();
    }

    pub fn queued(&self) -> usize {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|queue| queue.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn every_submitted_job_runs() {
        let pool = JobPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..100 {
            let counter = counter.clone();
            let class = match i % 4 {
                0 => JobClass::Consensus,
                1 => JobClass::TxApply,
                2 => JobClass::NodeFetch,
                _ => JobClass::LedgerSave,
            };
            pool.submit(class, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn higher_classes_run_first() {
        // One worker, blocked while we stack the queues; once released, the backlog
        // must drain in class order.
        let pool = JobPool::new(1);
        let (release, gate) = mpsc::channel::<()>();
        pool.submit(JobClass::LedgerSave, move || {
            gate.recv().unwrap();
        });

        let order = Arc::new(Mutex::new(Vec::new()));
        let classes = [
            (JobClass::LedgerSave, "save"),
            (JobClass::NodeFetch, "fetch"),
            (JobClass::Consensus, "consensus"),
        ];
        for (class, name) in classes {
            let order = order.clone();
            pool.submit(class, move || {
                order.lock().unwrap().push(name);
            });
        }

        release.send(()).unwrap();
        pool.join();
        assert_eq!(*order.lock().unwrap(), vec!["consensus", "fetch", "save"]);
    }
}
