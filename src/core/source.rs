// Pull-based sequences: an explicit cursor over fallible, blocking producers.
use crate::core::error::Error;

/// Forward-only, fallible, finite sequence.
///
/// `Ok(None)` marks the end of the sequence; implementations must keep
/// returning `Ok(None)` afterwards. `cancel` releases the producer early.
pub trait Source: Send {
    type Item;

    fn next_item(&mut self) -> Result<Option<Self::Item>, Error>;

    fn cancel(&mut self) {}
}

impl<S: Source + ?Sized> Source for Box<S> {
    type Item = S::Item;

    fn next_item(&mut self) -> Result<Option<Self::Item>, Error> {
        (**self).next_item()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

/// Pull every remaining item into memory.
pub fn drain<S: Source + ?Sized>(source: &mut S) -> Result<Vec<S::Item>, Error> {
    let mut items = Vec::new();
    while let Some(item) = source.next_item()? {
        items.push(item);
    }
    Ok(items)
}

/// Source over items that are already in memory.
#[derive(Debug)]
pub struct Buffered<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> Buffered<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl<T: Send> Source for Buffered<T> {
    type Item = T;

    fn next_item(&mut self) -> Result<Option<T>, Error> {
        Ok(self.items.next())
    }

    fn cancel(&mut self) {
        self.items = Vec::new().into_iter();
    }
}
