//! Tracked variables: values derived from emulated memory and exposed to
//! pass programs as `f32` uniforms.

use std::sync::{Arc, RwLock};

use postfx_config::{VariableDesc, VariableKind, VariableWidth};

use crate::error::{ChainError, Result};

/// One refreshed variable.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedValue {
    pub id: String,
    pub value: f32,
}

/// Supplies tracked variable values once per frame.
pub trait StateTracker {
    /// Replace `out` with this frame's values.
    fn refresh(&mut self, frame_count: u64, out: &mut Vec<TrackedValue>);
}

/// Byte-addressable memory the tracker reads from.
pub trait MemorySource {
    fn len(&self) -> usize;
    fn read_u8(&self, address: usize) -> Option<u8>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemorySource for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read_u8(&self, address: usize) -> Option<u8> {
        self.get(address).copied()
    }
}

/// Memory shared with the host, which keeps writing to it between frames.
impl<M: MemorySource> MemorySource for Arc<RwLock<M>> {
    fn len(&self) -> usize {
        self.read().map(|m| m.len()).unwrap_or(0)
    }

    fn read_u8(&self, address: usize) -> Option<u8> {
        self.read().ok()?.read_u8(address)
    }
}

#[derive(Debug, Clone)]
struct VariableState {
    desc: VariableDesc,
    seen: bool,
    last: u32,
    previous: u32,
    transition: u64,
    transition_prev: u64,
    transition_count: u64,
}

/// Tracker implementing the capture and transition variable kinds over a
/// [`MemorySource`].
pub struct MemoryTracker<M: MemorySource> {
    memory: M,
    vars: Vec<VariableState>,
}

impl<M: MemorySource> MemoryTracker<M> {
    /// Fails when a variable reads outside `memory`.
    pub fn new(memory: M, variables: &[VariableDesc]) -> Result<Self> {
        let size = memory.len();
        let mut vars = Vec::with_capacity(variables.len());
        for desc in variables {
            let width = match desc.width {
                VariableWidth::U8 => 1,
                VariableWidth::U16 => 2,
            };
            if desc.address as usize + width > size {
                return Err(ChainError::Config(format!(
                    "variable `{}` address {:#x} out of bounds ({} bytes of memory)",
                    desc.id, desc.address, size
                )));
            }
            log::info!(
                "tracked variable: id={} kind={:?} address={:#x} width={:?} mask={:#x} equal={:#x}",
                desc.id,
                desc.kind,
                desc.address,
                desc.width,
                desc.mask,
                desc.equal
            );
            vars.push(VariableState {
                desc: desc.clone(),
                seen: false,
                last: 0,
                previous: 0,
                transition: 0,
                transition_prev: 0,
                transition_count: 0,
            });
        }
        Ok(Self { memory, vars })
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    fn read(&self, desc: &VariableDesc) -> u32 {
        let at = desc.address as usize;
        let lo = self.memory.read_u8(at).unwrap_or(0) as u32;
        let raw = match desc.width {
            VariableWidth::U8 => lo,
            VariableWidth::U16 => lo | ((self.memory.read_u8(at + 1).unwrap_or(0) as u32) << 8),
        };
        let masked = if desc.mask != 0 { raw & desc.mask } else { raw };
        if desc.equal != 0 {
            (masked == desc.equal) as u32
        } else {
            masked
        }
    }
}

impl<M: MemorySource> StateTracker for MemoryTracker<M> {
    fn refresh(&mut self, frame_count: u64, out: &mut Vec<TrackedValue>) {
        out.clear();
        for i in 0..self.vars.len() {
            let current = self.read(&self.vars[i].desc);
            let var = &mut self.vars[i];
            if !var.seen {
                var.seen = true;
                var.last = current;
                var.previous = current;
            } else {
                var.previous = var.last;
                if current != var.last {
                    var.transition_prev = var.transition;
                    var.transition = frame_count;
                    var.transition_count += 1;
                }
                var.last = current;
            }
            let value = match var.desc.kind {
                VariableKind::Capture => var.last as f32,
                VariableKind::CapturePrev => var.previous as f32,
                VariableKind::Transition => var.transition as f32,
                VariableKind::TransitionCount => var.transition_count as f32,
                VariableKind::TransitionPrev => var.transition_prev as f32,
            };
            out.push(TrackedValue {
                id: var.desc.id.clone(),
                value,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(id: &str, kind: VariableKind, address: u32) -> VariableDesc {
        VariableDesc {
            id: id.into(),
            kind,
            address,
            width: VariableWidth::U8,
            mask: 0,
            equal: 0,
        }
    }

    fn value(out: &[TrackedValue], id: &str) -> f32 {
        out.iter().find(|v| v.id == id).map(|v| v.value).unwrap()
    }

    #[test]
    fn out_of_bounds_address_is_rejected() {
        let err = MemoryTracker::new(vec![0u8; 16], &[var("x", VariableKind::Capture, 16)])
            .err()
            .unwrap();
        assert!(err.to_string().contains("out of bounds"));

        let mut wide = var("y", VariableKind::Capture, 15);
        wide.width = VariableWidth::U16;
        assert!(MemoryTracker::new(vec![0u8; 16], &[wide]).is_err());
    }

    #[test]
    fn capture_mask_and_equal() {
        let mut mem = vec![0u8; 8];
        mem[0] = 0xab;
        mem[2] = 0x34;
        mem[3] = 0x12;
        let mut masked = var("masked", VariableKind::Capture, 0);
        masked.mask = 0x0f;
        let mut eq = var("eq", VariableKind::Capture, 0);
        eq.equal = 0xab;
        let mut wide = var("wide", VariableKind::Capture, 2);
        wide.width = VariableWidth::U16;

        let mut tracker = MemoryTracker::new(mem, &[masked, eq, wide]).unwrap();
        let mut out = Vec::new();
        tracker.refresh(0, &mut out);
        assert_eq!(value(&out, "masked"), 11.0);
        assert_eq!(value(&out, "eq"), 1.0);
        assert_eq!(value(&out, "wide"), 0x1234 as f32);
    }

    #[test]
    fn transitions_follow_changes() {
        let mem = Arc::new(RwLock::new(vec![0u8; 4]));
        let vars = [
            var("cur", VariableKind::Capture, 1),
            var("prev", VariableKind::CapturePrev, 1),
            var("at", VariableKind::Transition, 1),
            var("count", VariableKind::TransitionCount, 1),
            var("before", VariableKind::TransitionPrev, 1),
        ];
        let mut tracker = MemoryTracker::new(mem.clone(), &vars).unwrap();
        let mut out = Vec::new();

        tracker.refresh(0, &mut out);
        assert_eq!(value(&out, "count"), 0.0);

        mem.write().unwrap()[1] = 5;
        tracker.refresh(3, &mut out);
        assert_eq!(value(&out, "cur"), 5.0);
        assert_eq!(value(&out, "prev"), 0.0);
        assert_eq!(value(&out, "at"), 3.0);
        assert_eq!(value(&out, "count"), 1.0);

        tracker.refresh(4, &mut out);
        assert_eq!(value(&out, "prev"), 5.0);
        assert_eq!(value(&out, "at"), 3.0);

        mem.write().unwrap()[1] = 7;
        tracker.refresh(9, &mut out);
        assert_eq!(value(&out, "at"), 9.0);
        assert_eq!(value(&out, "before"), 3.0);
        assert_eq!(value(&out, "count"), 2.0);
    }
}
