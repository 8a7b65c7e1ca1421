//! Ring of recent input frames.
//!
//! Slots are fixed textures allocated once at the maximum input size. The
//! ring never moves texture data: advancing only rotates which slot index
//! receives the next frame.

use crate::backend::TextureId;

/// Number of slots in the ring: the frame being written plus the history.
pub const HISTORY_SLOTS: usize = 8;
const HISTORY_MASK: usize = HISTORY_SLOTS - 1;

/// How many previous frames passes can reference (`prev`, `prev1`..`prev6`).
pub const PREV_TEXTURES: usize = HISTORY_SLOTS - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistorySlot {
    pub texture: TextureId,
    /// Logical size of the frame last written here; zero until first use.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: [HistorySlot; HISTORY_SLOTS],
    cursor: usize,
    texel_size: (u32, u32),
}

impl HistoryRing {
    pub fn new(textures: [TextureId; HISTORY_SLOTS], texel_size: (u32, u32)) -> Self {
        Self {
            slots: textures.map(|texture| HistorySlot {
                texture,
                width: 0,
                height: 0,
            }),
            cursor: 0,
            texel_size,
        }
    }

    /// Allocated size shared by every slot.
    pub fn texel_size(&self) -> (u32, u32) {
        self.texel_size
    }

    /// Index of the slot receiving the current frame.
    pub fn write_index(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> &HistorySlot {
        &self.slots[self.cursor]
    }

    pub(crate) fn current_mut(&mut self) -> &mut HistorySlot {
        &mut self.slots[self.cursor]
    }

    /// Commit the current slot and move the cursor to the next one.
    /// Returns the index of the committed slot.
    pub fn advance(&mut self) -> usize {
        let committed = self.cursor;
        self.cursor = (self.cursor + 1) & HISTORY_MASK;
        committed
    }

    /// Index of the frame committed `offset` advances ago; offset 0 is the
    /// most recent commit (`prev`), 6 the oldest (`prev6`).
    pub fn back_index(&self, offset: usize) -> Option<usize> {
        if offset >= PREV_TEXTURES {
            return None;
        }
        Some((self.cursor + HISTORY_SLOTS - 1 - offset) & HISTORY_MASK)
    }

    pub fn back(&self, offset: usize) -> Option<&HistorySlot> {
        self.back_index(offset).map(|i| &self.slots[i])
    }

    pub fn slots(&self) -> &[HistorySlot] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> HistoryRing {
        let ids = std::array::from_fn(|i| TextureId(100 + i as u32));
        HistoryRing::new(ids, (1024, 1024))
    }

    #[test]
    fn advance_rotates_one_slot_per_call() {
        let mut ring = ring();
        let mut committed = Vec::new();
        for _ in 0..20 {
            let before = ring.write_index();
            let slot = ring.advance();
            assert_eq!(slot, before);
            assert_eq!(ring.back_index(0), Some(slot));
            committed.push(slot);
        }
        for (n, slot) in committed.iter().enumerate() {
            assert_eq!(*slot, n % HISTORY_SLOTS);
        }
    }

    #[test]
    fn oldest_reachable_frame_is_next_to_be_overwritten() {
        let mut ring = ring();
        let mut committed = Vec::new();
        for _ in 0..HISTORY_SLOTS * 2 {
            committed.push(ring.advance());
        }
        let n = committed.len();
        // The slot written HISTORY_SLOTS calls ago is the one now receiving data.
        assert_eq!(committed[n - HISTORY_SLOTS], ring.write_index());
        // And the oldest prev offset is the call after that.
        assert_eq!(ring.back_index(PREV_TEXTURES - 1), Some(committed[n - PREV_TEXTURES]));
        assert_eq!(ring.back_index(PREV_TEXTURES), None);
    }

    #[test]
    fn slots_keep_their_textures() {
        let mut ring = ring();
        ring.current_mut().width = 256;
        ring.current_mut().height = 224;
        ring.advance();
        let prev = ring.back(0).unwrap();
        assert_eq!(prev.texture, TextureId(100));
        assert_eq!((prev.width, prev.height), (256, 224));
        assert_eq!(ring.current().texture, TextureId(101));
        assert_eq!(ring.current().width, 0);
    }
}
