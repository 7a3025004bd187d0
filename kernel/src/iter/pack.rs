//! Lazy bin-packing of weighted items under a bounded lookback window.

use std::collections::VecDeque;

use crate::FloeResult;

struct Bin<T> {
    items: Vec<T>,
    weight: u64,
}

impl<T> Bin<T> {
    fn new(item: T, weight: u64) -> Self {
        Bin {
            items: vec![item],
            weight,
        }
    }
}

/// Groups a fallible stream of items into bins approximating `target_weight`.
///
/// Up to `lookback` bins stay open in insertion order. Each incoming item goes into the first
/// open bin it fits; otherwise a new bin is opened, evicting (emitting) the oldest open bin once
/// the window is full. Remaining bins are emitted in order when input ends. An item heavier than
/// the target occupies a bin of its own. Emission is lazy: a bin leaves only when it is evicted
/// or input is exhausted, so downstream pull drives upstream pull.
///
/// An upstream error is forwarded immediately and terminates the stream, dropping any open bins.
pub struct PackingIterator<T, I, W>
where
    I: Iterator<Item = FloeResult<T>>,
    W: Fn(&T) -> u64,
{
    iter: I,
    target_weight: u64,
    lookback: usize,
    weight_fn: W,
    bins: VecDeque<Bin<T>>,
    done: bool,
}

impl<T, I, W> PackingIterator<T, I, W>
where
    I: Iterator<Item = FloeResult<T>>,
    W: Fn(&T) -> u64,
{
    /// `lookback` must be positive; callers validate it against configuration first.
    pub fn new(iter: I, target_weight: u64, lookback: usize, weight_fn: W) -> Self {
        debug_assert!(lookback > 0, "lookback must be positive");
        Self {
            iter,
            target_weight,
            lookback: lookback.max(1),
            weight_fn,
            bins: VecDeque::new(),
            done: false,
        }
    }

    fn place(&mut self, item: T, weight: u64) -> Option<Bin<T>> {
        if let Some(bin) = self
            .bins
            .iter_mut()
            .find(|bin| bin.weight + weight <= self.target_weight)
        {
            bin.items.push(item);
            bin.weight += weight;
            return None;
        }
        let evicted = if self.bins.len() < self.lookback {
            None
        } else {
            self.bins.pop_front()
        };
        self.bins.push_back(Bin::new(item, weight));
        evicted
    }
}

impl<T, I, W> Iterator for PackingIterator<T, I, W>
where
    I: Iterator<Item = FloeResult<T>>,
    W: Fn(&T) -> u64,
{
    type Item = FloeResult<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.iter.next() {
                Some(Ok(item)) => {
                    let weight = (self.weight_fn)(&item);
                    if let Some(bin) = self.place(item, weight) {
                        return Some(Ok(bin.items));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    self.bins.clear();
                    return Some(Err(e));
                }
                None => {
                    return self.bins.pop_front().map(|bin| Ok(bin.items));
                }
            }
        }
    }
}
