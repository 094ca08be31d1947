//! Logical memory pool with per-allocation ownership and bounds.
//!
//! Workers are independent processes without a shared address space, so
//! this is a simulation: the pool is the sole gatekeeper, and every access
//! re-validates owner, bounds and the read-only flag. Nothing here relies
//! on OS memory protection.
//!
//! Not thread-safe by design. One pool is exclusively owned by one worker
//! process and lives for the worker's lifetime.

use std::collections::HashMap;

use crate::error::MemoryViolation;

type MemResult<T> = std::result::Result<T, MemoryViolation>;

/// Opaque handle to one allocation.
///
/// Ids are monotonically increasing and never reused, so any operation on
/// a released handle is detected as a use-after-release violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(u64);

impl MemoryHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Allocation {
    owner: String,
    data: Vec<u8>,
    read_only: bool,
}

/// Per-worker logical memory pool.
#[derive(Debug)]
pub struct MemoryPool {
    capacity: usize,
    used: usize,
    next_id: u64,
    allocations: HashMap<u64, Allocation>,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            next_id: 0,
            allocations: HashMap::new(),
        }
    }

    /// Allocate `size` zeroed bytes bound to `owner` with bounds `[0, size)`.
    pub fn allocate(&mut self, owner: &str, size: usize) -> MemResult<MemoryHandle> {
        if size == 0 {
            return Err(MemoryViolation::ZeroSize);
        }
        if self
            .used
            .checked_add(size)
            .is_none_or(|total| total > self.capacity)
        {
            return Err(MemoryViolation::CapacityExceeded {
                needed: size,
                free: self.capacity - self.used,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.allocations.insert(
            id,
            Allocation {
                owner: owner.to_string(),
                data: vec![0; size],
                read_only: false,
            },
        );
        self.used += size;
        tracing::trace!(handle = id, owner, size, "allocated");
        Ok(MemoryHandle(id))
    }

    /// Read `len` bytes at `offset`, owner- and bounds-checked.
    pub fn read(
        &self,
        handle: MemoryHandle,
        requester: &str,
        offset: usize,
        len: usize,
    ) -> MemResult<Vec<u8>> {
        let alloc = self.require(handle)?;
        Self::check_owner(alloc, requester)?;
        Self::check_bounds(alloc, offset, len)?;
        Ok(alloc.data[offset..offset + len].to_vec())
    }

    /// Write `data` at `offset`, owner-, bounds- and read-only-checked.
    pub fn write(
        &mut self,
        handle: MemoryHandle,
        requester: &str,
        offset: usize,
        data: &[u8],
    ) -> MemResult<()> {
        let alloc = self
            .allocations
            .get_mut(&handle.0)
            .ok_or(MemoryViolation::UseAfterRelease(handle.0))?;
        if alloc.read_only {
            return Err(MemoryViolation::ReadOnly(handle.0));
        }
        Self::check_owner(alloc, requester)?;
        Self::check_bounds(alloc, offset, data.len())?;
        alloc.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Mark an allocation read-only. Owner-checked; irreversible.
    pub fn protect(&mut self, handle: MemoryHandle, requester: &str) -> MemResult<()> {
        let alloc = self
            .allocations
            .get_mut(&handle.0)
            .ok_or(MemoryViolation::UseAfterRelease(handle.0))?;
        Self::check_owner(alloc, requester)?;
        alloc.read_only = true;
        Ok(())
    }

    /// Free an allocation. Owner-checked; capacity is returned exactly once.
    pub fn release(&mut self, handle: MemoryHandle, requester: &str) -> MemResult<()> {
        let alloc = self
            .allocations
            .get(&handle.0)
            .ok_or(MemoryViolation::UseAfterRelease(handle.0))?;
        Self::check_owner(alloc, requester)?;
        let alloc = self
            .allocations
            .remove(&handle.0)
            .expect("allocation present");
        self.used -= alloc.data.len();
        tracing::trace!(handle = handle.0, "released");
        Ok(())
    }

    /// Free without an owner check. Used by the worker to reclaim whatever
    /// a finished task left behind; quietly ignores already-freed handles.
    pub(crate) fn reclaim(&mut self, handle: MemoryHandle) {
        if let Some(alloc) = self.allocations.remove(&handle.0) {
            self.used -= alloc.data.len();
            tracing::debug!(handle = handle.0, owner = %alloc.owner, "reclaimed leaked allocation");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn free_bytes(&self) -> usize {
        self.capacity - self.used
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    fn require(&self, handle: MemoryHandle) -> MemResult<&Allocation> {
        self.allocations
            .get(&handle.0)
            .ok_or(MemoryViolation::UseAfterRelease(handle.0))
    }

    fn check_owner(alloc: &Allocation, requester: &str) -> MemResult<()> {
        if alloc.owner != requester {
            return Err(MemoryViolation::OwnerMismatch {
                owner: alloc.owner.clone(),
                requester: requester.to_string(),
            });
        }
        Ok(())
    }

    fn check_bounds(alloc: &Allocation, offset: usize, len: usize) -> MemResult<()> {
        let size = alloc.data.len();
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(MemoryViolation::OutOfBounds { offset, len, size });
        }
        Ok(())
    }
}
