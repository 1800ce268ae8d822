//! Purpose: Present one pull-based source as several independently paced branches.
//! Exports: `duplicate`, `Branch`.
//! Role: Lets the cache return data to the caller and persist it from one fetch.
//! Invariants: The source is pulled at most once per item, under a single lock.
//! Invariants: Buffered items are trimmed once every live branch has consumed them.
//! Invariants: The source is cancelled only after every branch has closed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::error::Error;
use crate::core::source::Source;

struct Shared<S: Source> {
    source: Option<S>,
    buffer: VecDeque<S::Item>,
    offsets: Vec<usize>,
    closed: Vec<bool>,
    exhausted: bool,
    failure: Option<Error>,
    pulls: u64,
}

impl<S: Source> Shared<S>
where
    S::Item: Clone,
{
    // Pulls the source only when this branch has caught up with the buffer.
    fn pull_for(&mut self, index: usize) -> Result<Option<S::Item>, Error> {
        if self.offsets[index] >= self.buffer.len() {
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            if self.exhausted {
                return Ok(None);
            }
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };
            self.pulls += 1;
            match source.next_item() {
                Ok(Some(item)) => self.buffer.push_back(item),
                Ok(None) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                Err(err) => {
                    self.failure = Some(err.clone());
                    return Err(err);
                }
            }
        }

        let item = self.buffer[self.offsets[index]].clone();
        self.offsets[index] += 1;
        self.trim();
        Ok(Some(item))
    }
}

impl<S: Source> Shared<S> {
    fn trim(&mut self) {
        let live_min = self
            .offsets
            .iter()
            .zip(&self.closed)
            .filter(|(_, closed)| !**closed)
            .map(|(offset, _)| *offset)
            .min();
        let Some(consumed) = live_min else {
            self.buffer.clear();
            return;
        };
        if consumed == 0 {
            return;
        }
        self.buffer.drain(..consumed);
        for (offset, closed) in self.offsets.iter_mut().zip(&self.closed) {
            *offset = if *closed { 0 } else { *offset - consumed };
        }
    }

    fn close(&mut self, index: usize) {
        if self.closed[index] {
            return;
        }
        self.closed[index] = true;
        if self.closed.iter().all(|closed| *closed) {
            if let Some(mut source) = self.source.take() {
                if !self.exhausted && self.failure.is_none() {
                    source.cancel();
                }
            }
            self.buffer.clear();
            return;
        }
        self.trim();
    }
}

/// One consumer of a duplicated source. Dropping a branch closes it.
pub struct Branch<S: Source> {
    shared: Arc<Mutex<Shared<S>>>,
    index: usize,
}

impl<S: Source> Branch<S> {
    fn lock(&self) -> MutexGuard<'_, Shared<S>> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of times the shared source has been pulled, across all branches.
    pub fn source_pulls(&self) -> u64 {
        self.lock().pulls
    }

    /// Items pulled but not yet consumed by every live branch.
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn close(&mut self) {
        let index = self.index;
        self.lock().close(index);
    }
}

impl<S> Source for Branch<S>
where
    S: Source,
    S::Item: Clone + Send,
{
    type Item = S::Item;

    fn next_item(&mut self) -> Result<Option<S::Item>, Error> {
        let index = self.index;
        let mut shared = self.lock();
        if shared.closed[index] {
            return Ok(None);
        }
        shared.pull_for(index)
    }

    fn cancel(&mut self) {
        self.close();
    }
}

impl<S: Source> Drop for Branch<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Split `source` into `count` branches that each observe the full sequence.
pub fn duplicate<S>(source: S, count: usize) -> Vec<Branch<S>>
where
    S: Source,
    S::Item: Clone + Send,
{
    let shared = Arc::new(Mutex::new(Shared {
        source: Some(source),
        buffer: VecDeque::new(),
        offsets: vec![0; count],
        closed: vec![false; count],
        exhausted: false,
        failure: None,
        pulls: 0,
    }));
    (0..count)
        .map(|index| Branch {
            shared: Arc::clone(&shared),
            index,
        })
        .collect()
}
