//! Latest-value-wins triple buffer between exactly one writer and one reader.
//!
//! Three slots rotate between three roles: the slot the writer is filling, the
//! slot holding the most recently published value, and the slot the reader has
//! locked. Publishing and locking are a single atomic swap of the "ready" index,
//! so neither side ever blocks, and the reader always sees the newest complete
//! value. A value that is superseded before the reader locks it is dropped from
//! view and its slot is recycled by the writer's next fill.
//!
//! ```text
//!   writer slot ──publish──▶ ready slot ──lock_latest──▶ reader slot
//!        ▲                                                    │
//!        └──────────────── recycled on next swap ─────────────┘
//! ```

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Low bits of the ready word: index of the ready slot.
const INDEX_MASK: u8 = 0b011;
/// Set while the ready slot holds a value the reader has not locked yet.
const FRESH: u8 = 0b100;

struct Shared<T> {
    slots: [UnsafeCell<T>; 3],
    ready: AtomicU8,
}

// SAFETY: the writer and reader halves each own a distinct slot index, and the
// third slot is only reachable through the atomic swap, so no slot is ever
// mutated while another thread can see it. A shared reader hands out `&T`, so
// `T` must be `Sync` as well.
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

/// Create a triple buffer, initializing each of the three slots with `init`.
///
/// Slots are never reallocated afterwards, so `init` should produce values of
/// the final size (e.g. snapshot arrays sized from the negotiated geometry).
pub fn triple_buffer<T>(
    mut init: impl FnMut() -> T,
) -> (TripleBufferWriter<T>, TripleBufferReader<T>) {
    let shared = Arc::new(Shared {
        slots: [
            UnsafeCell::new(init()),
            UnsafeCell::new(init()),
            UnsafeCell::new(init()),
        ],
        ready: AtomicU8::new(1),
    });

    let writer = TripleBufferWriter {
        shared: Arc::clone(&shared),
        write_index: 0,
    };
    let reader = TripleBufferReader {
        shared,
        read_index: 2,
    };
    (writer, reader)
}

/// Producer half of a triple buffer.
pub struct TripleBufferWriter<T> {
    shared: Arc<Shared<T>>,
    write_index: u8,
}

impl<T> TripleBufferWriter<T> {
    /// Return the slot to fill with the next value.
    ///
    /// This is never the slot the reader holds, nor the one holding the last
    /// published value. It still contains whatever value it held when it was
    /// last recycled, so callers must overwrite every element they care about.
    pub fn acquire_write_slot(&mut self) -> &mut T {
        // SAFETY: `write_index` is owned exclusively by this half; see `Shared`.
        unsafe { &mut *self.shared.slots[self.write_index as usize].get() }
    }

    /// Publish the slot returned by [`acquire_write_slot`](Self::acquire_write_slot)
    /// as the newest value.
    ///
    /// Any previously published value the reader has not locked yet is
    /// superseded and its slot becomes the next write slot.
    pub fn publish(&mut self) {
        let former = self
            .shared
            .ready
            .swap(self.write_index | FRESH, Ordering::AcqRel);
        self.write_index = former & INDEX_MASK;
    }

    /// Whether the reader has locked the last published value.
    pub fn is_consumed(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire) & FRESH == 0
    }
}

/// Consumer half of a triple buffer.
pub struct TripleBufferReader<T> {
    shared: Arc<Shared<T>>,
    read_index: u8,
}

impl<T> TripleBufferReader<T> {
    /// Lock the newest published value, if there is one the reader has not
    /// seen yet. Returns `true` when the locked value changed.
    ///
    /// The previously locked slot is handed back for the writer to recycle.
    pub fn lock_latest(&mut self) -> bool {
        if self.shared.ready.load(Ordering::Relaxed) & FRESH == 0 {
            return false;
        }
        let former = self.shared.ready.swap(self.read_index, Ordering::AcqRel);
        self.read_index = former & INDEX_MASK;
        true
    }

    /// The currently locked value.
    pub fn locked(&self) -> &T {
        // SAFETY: `read_index` is owned exclusively by this half; see `Shared`.
        unsafe { &*self.shared.slots[self.read_index as usize].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_initial_value_is_locked_without_publish() {
        let (_writer, mut reader) = triple_buffer(|| 7u32);
        assert_eq!(*reader.locked(), 7);
        assert!(!reader.lock_latest(), "Nothing has been published yet");
    }

    #[test]
    fn test_publish_then_lock() {
        let (mut writer, mut reader) = triple_buffer(|| 0u32);
        *writer.acquire_write_slot() = 42;
        writer.publish();

        assert!(reader.lock_latest());
        assert_eq!(*reader.locked(), 42);
    }

    #[test]
    fn test_only_latest_of_many_publishes_is_observed_once() {
        let (mut writer, mut reader) = triple_buffer(|| 0u32);
        for value in 1..=10 {
            *writer.acquire_write_slot() = value;
            writer.publish();
        }

        assert!(reader.lock_latest());
        assert_eq!(*reader.locked(), 10);
        assert!(!reader.lock_latest(), "The same value must not be delivered twice");
        assert_eq!(*reader.locked(), 10);
    }

    #[test]
    fn test_absent_reader_never_blocks_writer() {
        let (mut writer, reader) = triple_buffer(|| 0usize);
        let reader_slot: *const usize = reader.locked();
        for value in 0..1000 {
            let slot = writer.acquire_write_slot();
            let slot_ptr: *const usize = &*slot;
            assert_ne!(slot_ptr, reader_slot, "Writer must not touch the read slot");
            *slot = value;
            writer.publish();
        }
        assert_eq!(*reader.locked(), 0, "Reader's locked value is untouched");
    }

    #[test]
    fn test_write_slot_differs_from_ready_slot() {
        let (mut writer, mut reader) = triple_buffer(|| 0u32);
        *writer.acquire_write_slot() = 1;
        writer.publish();
        // Scribble over the next write slot without publishing.
        *writer.acquire_write_slot() = 99;

        assert!(reader.lock_latest());
        assert_eq!(*reader.locked(), 1, "Unpublished writes must stay invisible");
    }

    #[test]
    fn test_is_consumed_tracks_reader() {
        let (mut writer, mut reader) = triple_buffer(|| 0u32);
        assert!(writer.is_consumed());
        writer.publish();
        assert!(!writer.is_consumed());
        reader.lock_latest();
        assert!(writer.is_consumed());
    }

    #[test]
    fn test_concurrent_reader_sees_monotonic_values() {
        const LAST: u64 = 20_000;
        let (mut writer, mut reader) = triple_buffer(|| [0u64; 16]);

        let producer = thread::spawn(move || {
            for value in 1..=LAST {
                let slot = writer.acquire_write_slot();
                slot.fill(value);
                writer.publish();
            }
        });

        let mut last_seen = 0;
        while last_seen < LAST {
            if reader.lock_latest() {
                let value = reader.locked();
                assert!(
                    value.iter().all(|v| *v == value[0]),
                    "Torn read: {value:?}"
                );
                assert!(value[0] > last_seen, "Values must only move forward");
                last_seen = value[0];
            }
        }

        producer.join().unwrap();
        assert_eq!(reader.locked()[0], LAST, "Final value must be observed");
        assert!(!reader.lock_latest());
    }
}
