//! Scratch buffer arena.
//!
//! Every temporary signal a channel needs (oversampled input, sidechain,
//! per-band VCA and band audio) lives in one allocation made at
//! initialisation. Buffers are addressed through [`Region`] handles and
//! borrowed as disjoint `&mut [f32]` slices, so the audio path never
//! allocates and never aliases.

use std::collections::TryReserveError;

/// Region offsets are rounded up to this many floats (64 bytes).
const ALIGN_FLOATS: usize = 16;

/// Typed handle into a [`ScratchArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    offset: usize,
    len: usize,
}

impl Region {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Collects region sizes, then performs the single allocation.
#[derive(Debug, Default)]
pub struct ArenaLayout {
    total: usize,
}

impl ArenaLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, len: usize) -> Region {
        let offset = self.total.div_ceil(ALIGN_FLOATS) * ALIGN_FLOATS;
        self.total = offset + len;
        Region { offset, len }
    }

    pub fn build(self) -> Result<ScratchArena, TryReserveError> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(self.total)?;
        storage.resize(self.total, 0.0);
        Ok(ScratchArena { storage })
    }
}

pub struct ScratchArena {
    storage: Vec<f32>,
}

impl ScratchArena {
    pub fn get(&self, region: Region) -> &[f32] {
        &self.storage[region.offset..region.offset + region.len]
    }

    pub fn get_mut(&mut self, region: Region) -> &mut [f32] {
        &mut self.storage[region.offset..region.offset + region.len]
    }

    /// Borrow several regions at once. Panics if two of them overlap.
    pub fn slices_mut<const N: usize>(&mut self, regions: [Region; N]) -> [&mut [f32]; N] {
        let mut order: [usize; N] = std::array::from_fn(|i| i);
        order.sort_unstable_by_key(|&i| regions[i].offset);

        let mut out: [Option<&mut [f32]>; N] = std::array::from_fn(|_| None);
        let mut rest: &mut [f32] = &mut self.storage;
        let mut consumed = 0;
        for &i in order.iter() {
            let r = regions[i];
            assert!(r.offset >= consumed, "overlapping arena regions");
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(r.offset - consumed);
            let (head, tail) = tail.split_at_mut(r.len);
            out[i] = Some(head);
            rest = tail;
            consumed = r.offset + r.len;
        }
        out.map(|s| s.unwrap_or_default())
    }

    pub fn clear(&mut self) {
        self.storage.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_are_aligned_and_disjoint() {
        let mut layout = ArenaLayout::new();
        let a = layout.reserve(5);
        let b = layout.reserve(33);
        let c = layout.reserve(1);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset % ALIGN_FLOATS, 0);
        assert!(b.offset >= a.offset + a.len);
        assert!(c.offset >= b.offset + b.len);

        let mut arena = layout.build().unwrap();
        let [sa, sb, sc] = arena.slices_mut([c, a, b]);
        assert_eq!(sa.len(), 1);
        assert_eq!(sb.len(), 5);
        assert_eq!(sc.len(), 33);
        sb.fill(1.0);
        sc.fill(2.0);
        sa.fill(3.0);
        assert!(arena.get(a).iter().all(|&x| x == 1.0));
        assert!(arena.get(b).iter().all(|&x| x == 2.0));
        assert!(arena.get(c).iter().all(|&x| x == 3.0));
    }

    #[test]
    #[should_panic(expected = "overlapping")]
    fn test_same_region_twice_panics() {
        let mut layout = ArenaLayout::new();
        let a = layout.reserve(8);
        let mut arena = layout.build().unwrap();
        let _ = arena.slices_mut([a, a]);
    }
}
