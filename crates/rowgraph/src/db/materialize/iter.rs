use crate::{
    db::{
        layout::LayoutTree,
        materialize::{CancelHandle, Materializer},
    },
    error::InternalError,
    obs::ExecutionStatistics,
};
use std::collections::VecDeque;

///
/// QueryIter
///
/// Single-pass, forward-only entity stream over an owned materializer.
///
/// Unbuffered iterators run one grouping step per `next`. Buffered iterators
/// pull up to `buffer_size` entities ahead and hand them out in order; an
/// error hit while refilling is yielded after the entities read before it.
/// Cancellation ends the stream at the next call, read-ahead included.
/// The iterator fuses after exhaustion or an error and closes the
/// materializer, and dropping it early closes it too.
///

pub struct QueryIter<L: LayoutTree> {
    materializer: Materializer<L>,
    buffer_size: usize,
    buffer: VecDeque<L::Entity>,
    deferred_error: Option<InternalError>,
    done: bool,
}

impl<L: LayoutTree> QueryIter<L> {
    pub(crate) fn new(materializer: Materializer<L>, buffer_size: usize) -> Self {
        Self {
            materializer,
            buffer_size,
            buffer: VecDeque::with_capacity(buffer_size),
            deferred_error: None,
            done: false,
        }
    }

    #[must_use]
    pub const fn is_buffered(&self) -> bool {
        self.buffer_size > 0
    }

    pub fn cancel(&self) -> Result<(), InternalError> {
        self.materializer.cancel()
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.materializer.cancel_handle()
    }

    /// Stop iterating and release the fetch. Buffered entities are dropped.
    pub fn close(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.deferred_error = None;
        self.materializer.close();
    }

    #[must_use]
    pub fn statistics(&self) -> ExecutionStatistics {
        self.materializer.execution_statistics()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.materializer.is_cancelled()
    }

    fn refill(&mut self) {
        while self.buffer.len() < self.buffer_size {
            match self.materializer.next_entity() {
                Ok(Some(entity)) => self.buffer.push_back(entity),
                Ok(None) => break,
                Err(err) => {
                    self.deferred_error = Some(err);
                    break;
                }
            }
        }
    }

    fn step(&mut self) -> Option<Result<L::Entity, InternalError>> {
        if !self.is_buffered() {
            return self.materializer.next_entity().transpose();
        }

        if self.materializer.is_cancelled() {
            self.materializer.discard_read_ahead(self.buffer.len());
            self.buffer.clear();
            self.deferred_error = None;
            return None;
        }
        if self.buffer.is_empty() && self.deferred_error.is_none() {
            self.refill();
        }

        match self.buffer.pop_front() {
            Some(entity) => Some(Ok(entity)),
            None => self.deferred_error.take().map(Err),
        }
    }
}

impl<L: LayoutTree> Iterator for QueryIter<L> {
    type Item = Result<L::Entity, InternalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self.step();
        if !matches!(item, Some(Ok(_))) {
            self.close();
        }

        item
    }
}

impl<L: LayoutTree> std::iter::FusedIterator for QueryIter<L> {}
