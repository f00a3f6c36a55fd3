//! RDRAM abstraction shared between the emulated CPU and the video core.
//!
//! The real emulator provides an implementation backed by its memory system.
//! The trait is intentionally small so it can be implemented over plain host
//! allocations as well as mapped views.

use core::fmt;
use std::cell::{Ref, RefCell, RefMut};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RdramError {
    pub address: u32,
    pub len: usize,
}

impl fmt::Display for RdramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RDRAM access out of bounds: address=0x{:x}, len=0x{:x}",
            self.address, self.len
        )
    }
}

impl std::error::Error for RdramError {}

/// Minimal RDRAM interface.
///
/// All accesses are byte-granular; callers deal in the guest's own pixel and
/// texel layouts on top of this.
pub trait Rdram {
    fn read(&self, address: u32, dst: &mut [u8]) -> Result<(), RdramError>;
    fn write(&self, address: u32, src: &[u8]) -> Result<(), RdramError>;
    /// Total addressable bytes.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Simple contiguous RDRAM implementation for tests and the reference host.
#[derive(Debug)]
pub struct VecRdram {
    mem: RefCell<Vec<u8>>,
}

impl VecRdram {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: RefCell::new(vec![0u8; size_bytes]),
        }
    }

    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        Ref::map(self.mem.borrow(), |v| v.as_slice())
    }

    pub fn as_mut_slice(&self) -> RefMut<'_, [u8]> {
        RefMut::map(self.mem.borrow_mut(), |v| v.as_mut_slice())
    }

    fn span(&self, address: u32, len: usize) -> Result<(usize, usize), RdramError> {
        let start = address as usize;
        let end = start.checked_add(len).ok_or(RdramError { address, len })?;
        if end > self.mem.borrow().len() {
            return Err(RdramError { address, len });
        }
        Ok((start, end))
    }

    pub fn read(&self, address: u32, dst: &mut [u8]) -> Result<(), RdramError> {
        let (start, end) = self.span(address, dst.len())?;
        dst.copy_from_slice(&self.mem.borrow()[start..end]);
        Ok(())
    }

    pub fn write(&self, address: u32, src: &[u8]) -> Result<(), RdramError> {
        let (start, end) = self.span(address, src.len())?;
        self.mem.borrow_mut()[start..end].copy_from_slice(src);
        Ok(())
    }
}

impl Rdram for VecRdram {
    fn read(&self, address: u32, dst: &mut [u8]) -> Result<(), RdramError> {
        VecRdram::read(self, address, dst)
    }

    fn write(&self, address: u32, src: &[u8]) -> Result<(), RdramError> {
        VecRdram::write(self, address, src)
    }

    fn len(&self) -> usize {
        self.mem.borrow().len()
    }
}

/// A byte span written by the emulated CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteSpan {
    pub address: u32,
    pub len: u32,
}

impl WriteSpan {
    pub fn end(&self) -> u32 {
        self.address.saturating_add(self.len)
    }
}

/// Rendezvous point between the emulated-CPU thread and the render thread.
///
/// The CPU thread records spans it has written; the render thread drains the
/// log at frame boundaries before trusting any cached render-target contents.
/// A mutex is deliberate here: draw order and memory-write order have to
/// interleave observably, so a lock-free queue buys nothing.
#[derive(Debug, Default)]
pub struct WriteLog {
    spans: Mutex<Vec<WriteSpan>>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a written span, merging with the previous span when adjacent
    /// or overlapping. CPU writes tend to be sequential row fills, so this
    /// keeps the log short without sorting.
    pub fn record(&self, address: u32, len: u32) {
        if len == 0 {
            return;
        }
        let mut spans = self.spans.lock().expect("write log poisoned");
        if let Some(last) = spans.last_mut() {
            if address <= last.end() && last.address <= address.saturating_add(len) {
                let start = last.address.min(address);
                let end = last.end().max(address.saturating_add(len));
                last.address = start;
                last.len = end - start;
                return;
            }
        }
        spans.push(WriteSpan { address, len });
    }

    /// Drains all recorded spans. Called from the render thread only.
    pub fn drain(&self) -> Vec<WriteSpan> {
        let mut spans = self.spans.lock().expect("write log poisoned");
        std::mem::take(&mut *spans)
    }

    /// True if any recorded span intersects `[address, address + len)`.
    pub fn touches(&self, address: u32, len: u32) -> bool {
        let end = address.saturating_add(len);
        let spans = self.spans.lock().expect("write log poisoned");
        spans.iter().any(|s| s.address < end && address < s.end())
    }
}
