//! Rolling score history
//!
//! A fixed-capacity circular buffer of recent scores backing the classifier's
//! trend queries. It is a derived cache: once full, the oldest score is
//! overwritten on every push.

/// Default number of scores retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

/// Circular buffer of recent scores (arena + head index)
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    slots: Vec<u8>,
    /// Index of the next write
    head: usize,
    len: usize,
}

impl Default for ScoreHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ScoreHistory {
    /// Create a history retaining at most `capacity` scores (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, score: u8) {
        let capacity = self.slots.len();
        self.slots[self.head] = score;
        self.head = (self.head + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// The most recent `n` scores, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = u8> + '_ {
        let take = n.min(self.len);
        let capacity = self.slots.len();
        let start = (self.head + capacity - take) % capacity;
        (0..take).map(move |i| self.slots[(start + i) % capacity])
    }
}
