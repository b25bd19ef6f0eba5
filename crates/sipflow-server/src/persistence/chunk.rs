//! Lazy fixed-size chunking of an iterator

/// Tasks inserted per statement by `create_tasks`.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Iterator over consecutive chunks of at most `size` items.
///
/// Items are pulled from the source only as chunks are requested, so a
/// consumer that stops early leaves the rest of the source untouched.
#[derive(Debug)]
pub struct Chunks<I> {
    iter: I,
    size: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<_> = self.iter.by_ref().take(self.size).collect();
        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}

/// A `size` of zero is treated as one.
pub fn chunk<I: IntoIterator>(iter: I, size: usize) -> Chunks<I::IntoIter> {
    Chunks {
        iter: iter.into_iter(),
        size: size.max(1),
    }
}
