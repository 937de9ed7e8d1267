//! Buffer objects.
//!
//! An allocation is shared between the buffer object that created it and every wrap taken from
//! it (and from wraps of wraps). The device memory is released when the last of them goes away,
//! no matter in which order or on which thread they are dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::device::{BoFlags, BoHandle, CpuMemory, Device};
use crate::error::{Host1xError, Result};

#[derive(Debug)]
struct Allocation {
    device: Arc<dyn Device>,
    handle: BoHandle,
    size: u64,
    flags: BoFlags,
    memory: Mutex<Option<Arc<dyn CpuMemory>>>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        match self.device.free(self.handle) {
            Ok(()) => debug!(handle = %self.handle, size = self.size, "released buffer object"),
            Err(err) => warn!(handle = %self.handle, %err, "device failed to release buffer object"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoKind {
    /// Created by an allocation.
    Owner,
    /// A sub-range view sharing another buffer object's allocation.
    Wrap,
}

/// Handle to a device memory region, or to a sub-range of one.
#[derive(Debug)]
pub struct BufferObject {
    alloc: Arc<Allocation>,
    offset: u64,
    size: u64,
    kind: BoKind,
}

pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> Result<()> {
    let end = offset.checked_add(len).ok_or(Host1xError::OffsetOverflow)?;
    if end > size {
        return Err(Host1xError::RangeOutOfBounds { offset, len, size });
    }
    Ok(())
}

impl BufferObject {
    pub fn allocate(device: &Arc<dyn Device>, size: u64, flags: BoFlags) -> Result<Self> {
        if size == 0 {
            return Err(Host1xError::ZeroSize);
        }
        let handle = device.alloc(size, flags)?;
        debug!(%handle, size, ?flags, device = device.name(), "allocated buffer object");
        Ok(Self {
            alloc: Arc::new(Allocation {
                device: Arc::clone(device),
                handle,
                size,
                flags,
                memory: Mutex::new(None),
            }),
            offset: 0,
            size,
            kind: BoKind::Owner,
        })
    }

    pub fn handle(&self) -> BoHandle {
        self.alloc.handle
    }

    /// Byte offset of this view within the allocation.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> BoKind {
        self.kind
    }

    pub fn is_wrap(&self) -> bool {
        self.kind == BoKind::Wrap
    }

    pub fn flags(&self) -> BoFlags {
        self.alloc.flags
    }

    pub fn allocation_size(&self) -> u64 {
        self.alloc.size
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.alloc.device
    }

    /// Number of buffer objects (owner, wraps, pushbuffer references) keeping the allocation alive.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.alloc)
    }

    /// Whether `self` and `other` share one allocation.
    pub fn same_allocation(&self, other: &BufferObject) -> bool {
        Arc::ptr_eq(&self.alloc, &other.alloc)
    }

    /// Creates a view of `[offset, offset + len)` of this buffer object. The range must fit in
    /// the allocation; the wrap keeps the allocation alive.
    pub fn wrap(&self, offset: u64, len: u64) -> Result<BufferObject> {
        let start = self
            .offset
            .checked_add(offset)
            .ok_or(Host1xError::OffsetOverflow)?;
        let end = start.checked_add(len).ok_or(Host1xError::OffsetOverflow)?;
        if end > self.alloc.size {
            return Err(Host1xError::WrapOutOfBounds {
                offset,
                len,
                available: self.alloc.size - self.offset,
            });
        }
        trace!(handle = %self.alloc.handle, start, len, "wrapped buffer object");
        Ok(BufferObject {
            alloc: Arc::clone(&self.alloc),
            offset: start,
            size: len,
            kind: BoKind::Wrap,
        })
    }

    /// Another reference to this exact view.
    pub(crate) fn share(&self) -> BufferObject {
        BufferObject {
            alloc: Arc::clone(&self.alloc),
            offset: self.offset,
            size: self.size,
            kind: self.kind,
        }
    }

    /// Maps the allocation for CPU access. The mapping is established once and shared by every
    /// view of the allocation.
    pub fn map(&self) -> Result<Mapping> {
        let mut slot = self.alloc.memory.lock();
        let memory = match slot.as_ref() {
            Some(memory) => Arc::clone(memory),
            None => {
                let memory = self.alloc.device.map(self.alloc.handle)?;
                if memory.len() < self.alloc.size {
                    return Err(Host1xError::device(
                        "map",
                        0,
                        format!(
                            "mapping of {} is {} bytes, expected {}",
                            self.alloc.handle,
                            memory.len(),
                            self.alloc.size
                        ),
                    ));
                }
                trace!(handle = %self.alloc.handle, "mapped buffer object");
                *slot = Some(Arc::clone(&memory));
                memory
            }
        };
        Ok(Mapping {
            memory,
            base: self.offset,
            len: self.size,
        })
    }

    pub fn is_mapped(&self) -> bool {
        self.alloc.memory.lock().is_some()
    }

    /// The mapping of this view if the allocation has been mapped.
    pub fn mapping(&self) -> Option<Mapping> {
        let memory = self.alloc.memory.lock().as_ref().map(Arc::clone)?;
        Some(Mapping {
            memory,
            base: self.offset,
            len: self.size,
        })
    }

    /// Makes device writes to `[offset, offset + len)` of this view visible to the CPU.
    pub fn invalidate(&self, offset: u64, len: u64) -> Result<()> {
        check_range(offset, len, self.size)?;
        self.alloc
            .device
            .invalidate(self.alloc.handle, self.offset + offset, len)
    }

    /// Makes CPU writes to `[offset, offset + len)` of this view visible to the device.
    pub fn flush(&self, offset: u64, len: u64) -> Result<()> {
        check_range(offset, len, self.size)?;
        self.alloc
            .device
            .flush(self.alloc.handle, self.offset + offset, len)
    }

    /// Drops this reference. The allocation is released once no other holder remains.
    pub fn free(self) {
        trace!(
            handle = %self.alloc.handle,
            remaining = Arc::strong_count(&self.alloc) - 1,
            "freeing buffer object reference"
        );
    }
}

/// CPU access to one buffer object view. Offsets are relative to the view.
#[derive(Clone, Debug)]
pub struct Mapping {
    memory: Arc<dyn CpuMemory>,
    base: u64,
    len: u64,
}

impl Mapping {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of this view within the allocation.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// `true` when both mappings point at the same CPU memory.
    pub fn shares_memory_with(&self, other: &Mapping) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.memory), Arc::as_ptr(&other.memory))
    }

    pub fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.len)?;
        self.memory.read(self.base + offset, buf);
        Ok(())
    }

    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_range(offset, data.len() as u64, self.len)?;
        self.memory.write(self.base + offset, data);
        Ok(())
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut word = 0u32;
        self.read_bytes(offset, bytemuck::bytes_of_mut(&mut word))?;
        Ok(word)
    }

    pub fn write_u32(&self, offset: u64, value: u32) -> Result<()> {
        self.write_bytes(offset, bytemuck::bytes_of(&value))
    }

    pub fn read_words(&self, offset: u64, count: usize) -> Result<Vec<u32>> {
        let mut words = vec![0u32; count];
        self.read_bytes(offset, bytemuck::cast_slice_mut(&mut words))?;
        Ok(words)
    }

    pub fn write_words(&self, offset: u64, words: &[u32]) -> Result<()> {
        self.write_bytes(offset, bytemuck::cast_slice(words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyDevice;

    fn device() -> (Arc<DummyDevice>, Arc<dyn Device>) {
        let dummy = Arc::new(DummyDevice::default());
        let device: Arc<dyn Device> = dummy.clone();
        (dummy, device)
    }

    #[test]
    fn zero_size_is_rejected_without_touching_the_device() {
        let (dummy, device) = device();
        assert!(matches!(
            BufferObject::allocate(&device, 0, BoFlags::empty()),
            Err(Host1xError::ZeroSize)
        ));
        assert_eq!(dummy.stats().allocations, 0);
    }

    #[test]
    fn nested_wraps_accumulate_offsets() {
        let (_dummy, device) = device();
        let bo = BufferObject::allocate(&device, 0x1000, BoFlags::empty()).unwrap();
        let outer = bo.wrap(0x10, 0x100).unwrap();
        let inner = outer.wrap(0x20, 0x10).unwrap();

        assert_eq!(inner.offset(), 0x30);
        assert_eq!(inner.size(), 0x10);
        assert_eq!(inner.kind(), BoKind::Wrap);
        assert_eq!(inner.handle(), bo.handle());
        assert!(inner.same_allocation(&bo));
        assert_eq!(bo.holders(), 3);
    }

    #[test]
    fn wrap_past_allocation_end_fails() {
        let (_dummy, device) = device();
        let bo = BufferObject::allocate(&device, 0x100, BoFlags::empty()).unwrap();
        let err = bo.wrap(0x10, 0x100 - 0x9).unwrap_err();
        assert!(matches!(
            err,
            Host1xError::WrapOutOfBounds {
                offset: 0x10,
                len: 0xf7,
                available: 0x100
            }
        ));
        assert!(matches!(
            bo.wrap(u64::MAX, 2),
            Err(Host1xError::OffsetOverflow)
        ));
        assert!(bo.wrap(0x10, 0xf0).is_ok());
    }

    #[test]
    fn mapping_is_shared_between_views() {
        let (_dummy, device) = device();
        let bo = BufferObject::allocate(&device, 0x100, BoFlags::empty()).unwrap();
        let view = bo.wrap(0x40, 0x10).unwrap();
        assert!(view.mapping().is_none());

        let map = bo.map().unwrap();
        let view_map = view.mapping().expect("mapped through owner");
        assert!(map.shares_memory_with(&view_map));

        view_map.write_u32(4, 0xcafe_f00d).unwrap();
        assert_eq!(map.read_u32(0x44).unwrap(), 0xcafe_f00d);
        assert!(view_map.write_u32(0x10, 0).is_err());
    }

    #[test]
    fn cache_maintenance_is_range_checked() {
        let (dummy, device) = device();
        let bo = BufferObject::allocate(&device, 0x100, BoFlags::CACHED).unwrap();
        let view = bo.wrap(0x80, 0x20).unwrap();
        view.flush(0, 0x20).unwrap();
        view.invalidate(0x10, 0x10).unwrap();
        assert!(matches!(
            view.flush(0x10, 0x11),
            Err(Host1xError::RangeOutOfBounds { .. })
        ));
        assert_eq!(dummy.stats().flushes, 1);
        assert_eq!(dummy.stats().invalidates, 1);
    }

    #[test]
    fn allocation_released_after_last_holder() {
        let (dummy, device) = device();
        let bo = BufferObject::allocate(&device, 0x100, BoFlags::empty()).unwrap();
        let wrap = bo.wrap(0, 0x80).unwrap();
        bo.free();
        assert_eq!(dummy.stats().releases, 0);
        drop(wrap);
        assert_eq!(dummy.stats().releases, 1);
        assert_eq!(dummy.live_allocations(), 0);
    }

    #[test]
    fn freeing_one_wrap_keeps_owner_and_sibling_alive() {
        let (dummy, device) = device();
        let bo = BufferObject::allocate(&device, 0x1000, BoFlags::empty()).unwrap();
        let w1 = bo.wrap(0x100, 0x200).unwrap();
        let w2 = w1.wrap(0x10, 0x20).unwrap();

        w1.free();
        assert_eq!(dummy.stats().releases, 0);
        assert_eq!(w2.offset(), 0x110);

        bo.free();
        assert_eq!(dummy.stats().releases, 0);
        assert_eq!(dummy.live_allocations(), 1);

        drop(w2);
        assert_eq!(dummy.stats().releases, 1);
        assert_eq!(dummy.live_allocations(), 0);
    }
}
