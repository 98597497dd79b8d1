//! Byte-addressable device storage backed by 32-bit atomic words.
//!
//! Work-groups of one launch run on different threads and write into the
//! same allocation, so every access goes through an atomic word. Sub-word
//! writes merge with a compare-exchange loop, which keeps byte stores from
//! neighbouring work-items intact.

use bytemuck::Pod;
use std::sync::atomic::{AtomicU32, Ordering};

const WORD: usize = 4;

pub(crate) struct DeviceMemory {
    words: Box<[AtomicU32]>,
    len: usize,
}

impl DeviceMemory {
    pub fn zeroed(len: usize) -> Self {
        let words = (0..(len + WORD - 1) / WORD).map(|_| AtomicU32::new(0)).collect();
        Self { words, len }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mem = Self::zeroed(bytes.len());
        mem.write_bytes(0, bytes);
        mem
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.len);
        let mut pos = offset;
        let mut done = 0;
        while done < out.len() {
            let word = self.words[pos / WORD].load(Ordering::Acquire).to_ne_bytes();
            let start = pos % WORD;
            let take = (WORD - start).min(out.len() - done);
            out[done..done + take].copy_from_slice(&word[start..start + take]);
            done += take;
            pos += take;
        }
    }

    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len);
        let mut pos = offset;
        let mut done = 0;
        while done < data.len() {
            let slot = &self.words[pos / WORD];
            let start = pos % WORD;
            let take = (WORD - start).min(data.len() - done);
            let chunk = &data[done..done + take];

            if take == WORD {
                let mut word = [0u8; WORD];
                word.copy_from_slice(chunk);
                slot.store(u32::from_ne_bytes(word), Ordering::Release);
            } else {
                let _ = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    let mut word = current.to_ne_bytes();
                    word[start..start + take].copy_from_slice(chunk);
                    Some(u32::from_ne_bytes(word))
                });
            }
            done += take;
            pos += take;
        }
    }

    pub fn load<T: Pod>(&self, offset: usize) -> T {
        let mut value = T::zeroed();
        self.read_bytes(offset, bytemuck::bytes_of_mut(&mut value));
        value
    }

    pub fn store<T: Pod>(&self, offset: usize, value: T) {
        self.write_bytes(offset, bytemuck::bytes_of(&value));
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.read_bytes(0, &mut out);
        out
    }

    pub fn to_vec<T: Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        let mut out = vec![T::zeroed(); count];
        self.read_bytes(offset, bytemuck::cast_slice_mut(&mut out));
        out
    }

    /// Read-modify-write of the aligned 32-bit word at `offset`. Returns the
    /// previous value.
    pub fn update_word<F>(&self, offset: usize, mut f: F) -> u32
    where
        F: FnMut(u32) -> u32,
    {
        debug_assert!(offset % WORD == 0 && offset + WORD <= self.len);
        match self.words[offset / WORD].fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
            Some(f(w))
        }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

impl std::fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemory").field("len", &self.len).finish()
    }
}
