use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out routing tags for journals sharing completion ports.
///
/// Completions from many handles can arrive interleaved on one port; the tag
/// carried in each [`Echo`](lithos_io::Echo) says which handle it belongs to.
/// Whoever opens journals owns one sequence and passes it to
/// [`Journal::open`](crate::Journal::open), so tags are unique among the
/// handles it creates. Tags start at 1.
#[derive(Debug, Default)]
pub struct TagSequence {
    last: AtomicU32,
}

impl TagSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_tag(&self) -> u32 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}
