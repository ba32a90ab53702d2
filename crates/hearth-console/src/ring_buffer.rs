/// Fixed-capacity circular buffer.
///
/// `push` never evicts: once full it refuses the record and the caller decides
/// whether to `pop` first. No internal locking; the owner supplies exclusion.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    start: usize,
    len: usize,
    slots: Vec<Option<T>>,
}

impl<T> RingBuffer<T> {
    /// Capacity is clamped to at least 1.
    pub fn new(cap: usize) -> Self {
        Self {
            start: 0,
            len: 0,
            slots: empty_slots(cap.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn cap(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.cap()
    }

    /// Oldest record, without removing it.
    pub fn get(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.start].as_ref()
    }

    /// Removes and returns the oldest record.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let out = self.slots[self.start].take();
        self.start = (self.start + 1) % self.cap();
        self.len -= 1;
        out
    }

    /// Appends at the tail. Returns false (and drops nothing) when full.
    pub fn push(&mut self, record: T) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = (self.start + self.len) % self.cap();
        self.slots[idx] = Some(record);
        self.len += 1;
        true
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
        self.slots = empty_slots(self.cap());
    }

    /// Reallocates to `cap` slots, re-linearizing records from index 0.
    ///
    /// Fails without touching the buffer when `cap` is zero or smaller than
    /// the current length.
    pub fn set_cap(&mut self, cap: usize) -> bool {
        if cap == 0 || cap < self.len {
            return false;
        }
        let old_cap = self.cap();
        let mut slots = empty_slots(cap);
        for (i, slot) in slots.iter_mut().enumerate().take(self.len) {
            *slot = self.slots[(self.start + i) % old_cap].take();
        }
        self.slots = slots;
        self.start = 0;
        true
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.cap();
        (0..self.len).filter_map(move |i| self.slots[(self.start + i) % cap].as_ref())
    }
}

fn empty_slots<T>(cap: usize) -> Vec<Option<T>> {
    std::iter::repeat_with(|| None).take(cap).collect()
}
