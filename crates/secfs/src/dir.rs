//! Fixed table of open directory iterators

/// Directory iterators a mount can hold open at once
pub const DIR_SLOTS: usize = 4;

/// Handle returned by [`Mount::opendir`](crate::Mount::opendir).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(pub(crate) usize);

impl DirHandle {
    pub fn slot(&self) -> usize {
        self.0
    }
}

pub(crate) struct DirSlots<D> {
    slots: [Option<D>; DIR_SLOTS],
}

impl<D> DirSlots<D> {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Put `dir` in the first free slot. Hands it back when all are taken.
    pub(crate) fn claim(&mut self, dir: D) -> Result<DirHandle, D> {
        match self.slots.iter_mut().position(|s| s.is_none()) {
            Some(idx) => {
                self.slots[idx] = Some(dir);
                Ok(DirHandle(idx))
            }
            None => Err(dir),
        }
    }

    pub(crate) fn get_mut(&mut self, handle: DirHandle) -> Option<&mut D> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    pub(crate) fn release(&mut self, handle: DirHandle) -> Option<D> {
        self.slots.get_mut(handle.0).and_then(Option::take)
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = D> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_lowest_free_slot() {
        let mut slots = DirSlots::new();
        let a = slots.claim("a").unwrap();
        let b = slots.claim("b").unwrap();
        assert_eq!((a.slot(), b.slot()), (0, 1));

        assert_eq!(slots.release(a), Some("a"));
        assert_eq!(slots.claim("c").unwrap().slot(), 0);
        assert_eq!(slots.in_use(), 2);
    }

    #[test]
    fn full_table_hands_dir_back() {
        let mut slots = DirSlots::new();
        for i in 0..DIR_SLOTS {
            slots.claim(i).unwrap();
        }
        assert!(slots.is_full());
        assert_eq!(slots.claim(99), Err(99));
    }

    #[test]
    fn stale_and_out_of_range_handles() {
        let mut slots: DirSlots<u8> = DirSlots::new();
        let h = slots.claim(1).unwrap();
        assert_eq!(slots.release(h), Some(1));
        assert_eq!(slots.release(h), None);
        assert!(slots.get_mut(DirHandle(DIR_SLOTS + 3)).is_none());
    }

    #[test]
    fn drain_empties_every_slot() {
        let mut slots = DirSlots::new();
        slots.claim('x').unwrap();
        slots.claim('y').unwrap();
        let drained: Vec<_> = slots.drain().collect();
        assert_eq!(drained, vec!['x', 'y']);
        assert_eq!(slots.in_use(), 0);
    }
}
