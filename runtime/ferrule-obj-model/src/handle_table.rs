//! Back-reference side table.
//!
//! Maps a subclass shell object to the implementation cell it forwards to.
//! Shells carry the generation-checked handle returned at registration and
//! resolve through it, so a stale handle from a released shell never reaches
//! a recycled slot. The per-shard address index only serves registration and
//! release.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::RawObject;

const HANDLE_SHARD_BITS: u64 = 4;
const HANDLE_GEN_BITS: u64 = 16;
const HANDLE_INDEX_BITS: u64 = 48 - HANDLE_SHARD_BITS - HANDLE_GEN_BITS;
const HANDLE_INDEX_MASK: u64 = (1u64 << HANDLE_INDEX_BITS) - 1;
const HANDLE_GEN_MASK: u64 = (1u64 << HANDLE_GEN_BITS) - 1;
const HANDLE_SHARD_MASK: u64 = (1u64 << HANDLE_SHARD_BITS) - 1;
const HANDLE_SHARDS: usize = 1usize << (HANDLE_SHARD_BITS as usize);

#[derive(Copy, Clone)]
struct CellPtr(*mut u8);

unsafe impl Send for CellPtr {}
unsafe impl Sync for CellPtr {}

#[derive(Copy, Clone)]
struct BackRefSlot {
    cell: CellPtr,
    generation: u16,
}

struct BackRefShard {
    slots: Vec<BackRefSlot>,
    free: Vec<u32>,
    by_shell: HashMap<usize, u64>,
}

impl BackRefShard {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_shell: HashMap::new(),
        }
    }

    fn slot_for(&self, handle: u64) -> Option<&BackRefSlot> {
        let (_, index, generation) = decode_handle(handle)?;
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation || slot.cell.0.is_null() {
            return None;
        }
        Some(slot)
    }
}

static BACK_REFS: OnceLock<Vec<RwLock<BackRefShard>>> = OnceLock::new();

fn shards() -> &'static [RwLock<BackRefShard>] {
    BACK_REFS
        .get_or_init(|| {
            (0..HANDLE_SHARDS)
                .map(|_| RwLock::new(BackRefShard::new()))
                .collect()
        })
        .as_slice()
}

fn encode_handle(index: u32, generation: u16, shard: u8) -> u64 {
    ((shard as u64) << (HANDLE_INDEX_BITS + HANDLE_GEN_BITS))
        | ((generation as u64) << HANDLE_INDEX_BITS)
        | (index as u64)
}

fn decode_handle(handle: u64) -> Option<(u8, u32, u16)> {
    if handle == 0 {
        return None;
    }
    let index = (handle & HANDLE_INDEX_MASK) as u32;
    let generation = ((handle >> HANDLE_INDEX_BITS) & HANDLE_GEN_MASK) as u16;
    let shard = ((handle >> (HANDLE_INDEX_BITS + HANDLE_GEN_BITS)) & HANDLE_SHARD_MASK) as u8;
    if generation == 0 {
        return None;
    }
    Some((shard, index, generation))
}

fn next_generation(generation: u16) -> u16 {
    let next = generation.wrapping_add(1);
    if next == 0 { 1 } else { next }
}

fn shard_for_addr(addr: usize) -> usize {
    let mut x = addr as u64;
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    (x as usize) & (HANDLE_SHARDS - 1)
}

/// Record that `shell` forwards to `cell`. Registering the same shell again
/// returns the existing handle and keeps the original cell. Returns 0 for a
/// null shell or cell.
pub fn register_back_ref(shell: *mut RawObject, cell: *mut u8) -> u64 {
    if shell.is_null() || cell.is_null() {
        return 0;
    }
    let addr = shell as usize;
    let shard = shard_for_addr(addr);
    let mut table = shards()[shard].write();
    if let Some(existing) = table.by_shell.get(&addr).copied() {
        return existing;
    }
    let (index, generation) = if let Some(index) = table.free.pop() {
        let slot = &mut table.slots[index as usize];
        let generation = next_generation(slot.generation);
        slot.generation = generation;
        slot.cell = CellPtr(cell);
        (index, generation)
    } else {
        let index = table.slots.len() as u32;
        table.slots.push(BackRefSlot {
            cell: CellPtr(cell),
            generation: 1,
        });
        (index, 1)
    };
    let handle = encode_handle(index, generation, shard as u8);
    table.by_shell.insert(addr, handle);
    handle
}

/// Cell behind a handle previously returned by [`register_back_ref`], or
/// `None` once the entry was released.
pub fn resolve_back_ref(handle: u64) -> Option<*mut u8> {
    let (shard, _, _) = decode_handle(handle)?;
    let table = shards().get(shard as usize)?.read();
    table.slot_for(handle).map(|slot| slot.cell.0)
}

/// Drop the entry for `shell`, returning the cell it pointed at. The slot's
/// generation advances so outstanding handles stop resolving.
pub fn release_back_ref(shell: *mut RawObject) -> Option<*mut u8> {
    if shell.is_null() {
        return None;
    }
    let addr = shell as usize;
    let shard = shard_for_addr(addr);
    let mut table = shards()[shard].write();
    let handle = table.by_shell.remove(&addr)?;
    let (handle_shard, index, generation) = decode_handle(handle)?;
    if handle_shard as usize != shard {
        return None;
    }
    let slot = table.slots.get_mut(index as usize)?;
    if slot.generation != generation || slot.cell.0.is_null() {
        return None;
    }
    let cell = slot.cell.0;
    slot.cell = CellPtr(std::ptr::null_mut());
    slot.generation = next_generation(slot.generation);
    table.free.push(index);
    Some(cell)
}

/// Forget every entry. Only meant for benches and test setup.
pub fn reset_back_refs() {
    for shard in shards() {
        let mut table = shard.write();
        table.slots.clear();
        table.free.clear();
        table.by_shell.clear();
    }
}
