// Modified from https://github.com/rust-lang/rust/blob/master/library/std/src/sys/sync/rwlock/futex.rs
use std::sync::atomic::{
    AtomicU32, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};

/// A reader-preferring reader/writer lock parked on a futex word.
///
/// Bits 0..30 of `state` count readers (or hold `WRITE_LOCKED`), bit 30 marks
/// sleeping readers and bit 31 marks sleeping writers. A reader only waits
/// while a writer holds the lock; a waiting writer never keeps readers out,
/// so writers may starve under a steady stream of readers. Writers sleep on
/// the separate `writer_notify` counter so that waking one writer never wakes
/// the readers.
pub struct RwLock {
    state: AtomicU32,
    writer_notify: AtomicU32,
    contentions: AtomicUsize,
}

const READ_LOCKED: u32 = 1;
const MASK: u32 = (1 << 30) - 1;
const WRITE_LOCKED: u32 = MASK;
const MAX_READERS: u32 = MASK - 1;
const READERS_WAITING: u32 = 1 << 30;
const WRITERS_WAITING: u32 = 1 << 31;

#[inline]
fn is_unlocked(state: u32) -> bool {
    state & MASK == 0
}

#[inline]
fn is_write_locked(state: u32) -> bool {
    state & MASK == WRITE_LOCKED
}

#[inline]
fn has_readers_waiting(state: u32) -> bool {
    state & READERS_WAITING != 0
}

#[inline]
fn has_writers_waiting(state: u32) -> bool {
    state & WRITERS_WAITING != 0
}

#[inline]
fn is_read_lockable(state: u32) -> bool {
    // Waiting bits are ignored: only an active writer keeps readers out.
    state & MASK < MAX_READERS
}

#[inline]
fn has_reached_max_readers(state: u32) -> bool {
    state & MASK == MAX_READERS
}

impl RwLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            writer_notify: AtomicU32::new(0),
            contentions: AtomicUsize::new(0),
        }
    }

    /// Number of acquisitions that could not take the fast path.
    #[inline]
    pub fn contentions(&self) -> usize {
        self.contentions.load(Relaxed)
    }

    #[inline]
    pub fn try_read(&self) -> bool {
        self.state
            .fetch_update(Acquire, Relaxed, |s| {
                is_read_lockable(s).then(|| s + READ_LOCKED)
            })
            .is_ok()
    }

    #[inline]
    pub fn read(&self) {
        let state = self.state.load(Relaxed);
        if !is_read_lockable(state)
            || self
                .state
                .compare_exchange(state, state + READ_LOCKED, Acquire, Relaxed)
                .is_err()
        {
            self.read_contended();
        }
    }

    #[inline]
    pub fn read_unlock(&self) {
        let state = self.state.fetch_sub(READ_LOCKED, Release) - READ_LOCKED;

        // Wake up a writer if we were the last reader and there's a writer waiting.
        if is_unlocked(state) && has_writers_waiting(state) {
            self.wake_writer();
        }
    }

    #[cold]
    fn read_contended(&self) {
        self.contentions.fetch_add(1, Relaxed);
        let mut state = self.spin_read();

        loop {
            if is_read_lockable(state) {
                match self
                    .state
                    .compare_exchange_weak(state, state + READ_LOCKED, Acquire, Relaxed)
                {
                    Ok(_) => return, // Locked!
                    Err(s) => {
                        state = s;
                        continue;
                    }
                }
            }

            if has_reached_max_readers(state) {
                panic!("too many active read locks on RwLock");
            }

            // Only a writer holds us off here. Make sure the readers waiting
            // bit is set before we go to sleep, so its unlock wakes us.
            if !has_readers_waiting(state) {
                if let Err(s) =
                    self.state
                        .compare_exchange(state, state | READERS_WAITING, Relaxed, Relaxed)
                {
                    state = s;
                    continue;
                }
            }

            atomic_wait::wait(&self.state, state | READERS_WAITING);

            // Spin again after waking up.
            state = self.spin_read();
        }
    }

    #[inline]
    pub fn try_write(&self) -> bool {
        self.state
            .fetch_update(Acquire, Relaxed, |s| {
                is_unlocked(s).then(|| s | WRITE_LOCKED)
            })
            .is_ok()
    }

    #[inline]
    pub fn write(&self) {
        if self
            .state
            .compare_exchange(0, WRITE_LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.write_contended();
        }
    }

    #[inline]
    pub fn write_unlock(&self) {
        let state = self.state.fetch_sub(WRITE_LOCKED, Release) - WRITE_LOCKED;

        debug_assert!(is_unlocked(state));

        // Readers go first: release all of them, then hand a writer the
        // chance to compete for whatever is left.
        if has_readers_waiting(state) {
            self.state.fetch_and(!READERS_WAITING, Relaxed);
            atomic_wait::wake_all(&self.state);
        }
        if has_writers_waiting(state) {
            self.wake_writer();
        }
    }

    #[cold]
    fn write_contended(&self) {
        self.contentions.fetch_add(1, Relaxed);
        let mut state = self.spin_write();

        let mut other_writers_waiting = 0;

        loop {
            // If it's unlocked, we try to lock it.
            if is_unlocked(state) {
                match self.state.compare_exchange_weak(
                    state,
                    state | WRITE_LOCKED | other_writers_waiting,
                    Acquire,
                    Relaxed,
                ) {
                    Ok(_) => return, // Locked!
                    Err(s) => {
                        state = s;
                        continue;
                    }
                }
            }

            // Set the waiting bit indicating that we're waiting on it.
            if !has_writers_waiting(state) {
                if let Err(s) =
                    self.state
                        .compare_exchange(state, state | WRITERS_WAITING, Relaxed, Relaxed)
                {
                    state = s;
                    continue;
                }
            }

            // Other writers might be waiting now too, so we should make sure
            // we keep that bit on once we manage lock it.
            other_writers_waiting = WRITERS_WAITING;

            // Examine the notification counter before we check if `state` has changed,
            // to make sure we don't miss any notifications.
            let seq = self.writer_notify.load(Acquire);

            // Don't go to sleep if the lock has become available,
            // or if the writers waiting bit is no longer set.
            state = self.state.load(Relaxed);
            if is_unlocked(state) || !has_writers_waiting(state) {
                continue;
            }

            atomic_wait::wait(&self.writer_notify, seq);

            // Spin again after waking up.
            state = self.spin_write();
        }
    }

    /// Clears the writers waiting bit and wakes one writer if it was set.
    ///
    /// The woken writer sets the bit again if it still cannot take the lock,
    /// and keeps it set once it does while others may still be asleep.
    #[cold]
    fn wake_writer(&self) {
        if has_writers_waiting(self.state.fetch_and(!WRITERS_WAITING, Relaxed)) {
            self.writer_notify.fetch_add(1, Release);
            atomic_wait::wake_one(&self.writer_notify);
        }
    }

    /// Spin for a while, but stop directly at the given condition.
    #[inline]
    fn spin_until(&self, f: impl Fn(u32) -> bool) -> u32 {
        let mut spin = 100;
        loop {
            // We only use `load` (and not `swap` or `compare_exchange`)
            // while spinning, to be easier on the caches.
            let state = self.state.load(Relaxed);
            if f(state) || spin == 0 {
                return state;
            }
            std::hint::spin_loop();
            spin -= 1;
        }
    }

    #[inline]
    fn spin_write(&self) -> u32 {
        // Stop spinning when it's unlocked or when there's waiting writers, to keep things somewhat fair.
        self.spin_until(|state| is_unlocked(state) || has_writers_waiting(state))
    }

    #[inline]
    fn spin_read(&self) -> u32 {
        // Stop spinning once no writer holds it, or when readers are already asleep.
        self.spin_until(|state| !is_write_locked(state) || has_readers_waiting(state))
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_try_lock_modes() {
        let lock = RwLock::new();
        assert!(lock.try_read());
        assert!(lock.try_read());
        assert!(!lock.try_write());
        lock.read_unlock();
        lock.read_unlock();

        assert!(lock.try_write());
        assert!(!lock.try_read());
        assert!(!lock.try_write());
        lock.write_unlock();

        assert!(lock.try_read());
        lock.read_unlock();
        assert_eq!(lock.contentions(), 0);
    }

    #[test]
    fn test_writers_exclusive() {
        let lock = Arc::new(RwLock::new());
        let current = Arc::new(AtomicU32::new(0));
        const N: usize = 8;
        const M: usize = 1 << 16;

        let mut tasks = vec![];
        for _ in 0..N {
            let lock = lock.clone();
            let current = current.clone();
            tasks.push(std::thread::spawn(move || {
                for _ in 0..M {
                    lock.write();
                    assert_eq!(current.fetch_add(1, Acquire), 0);
                    current.fetch_sub(1, Acquire);
                    lock.write_unlock();
                }
            }));
        }
        for task in tasks {
            task.join().unwrap();
        }
    }

    #[test]
    fn test_readers_and_writers() {
        let lock = Arc::new(RwLock::new());
        // Positive while readers hold the lock, `u32::MAX` while a writer does.
        let current = Arc::new(AtomicU32::new(0));
        const READERS: usize = 4;
        const WRITERS: usize = 2;
        const ITERATIONS: usize = 10000;

        let mut handles = vec![];
        for _ in 0..READERS {
            let lock = lock.clone();
            let current = current.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    lock.read();
                    let prev = current.fetch_add(1, Acquire);
                    assert_ne!(prev, u32::MAX);
                    std::thread::yield_now();
                    current.fetch_sub(1, Release);
                    lock.read_unlock();
                }
            }));
        }
        for _ in 0..WRITERS {
            let lock = lock.clone();
            let current = current.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    lock.write();
                    assert_eq!(current.swap(u32::MAX, Acquire), 0);
                    std::thread::yield_now();
                    assert_eq!(current.swap(0, Release), u32::MAX);
                    lock.write_unlock();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(current.load(Relaxed), 0);
    }

    #[test]
    fn test_blocked_reader_counts_contention() {
        let lock = Arc::new(RwLock::new());
        lock.write();

        let reader = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                lock.read();
                lock.read_unlock();
            })
        };

        while lock.contentions() == 0 {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(10));
        assert!(!reader.is_finished());
        lock.write_unlock();
        reader.join().unwrap();

        assert!(lock.contentions() >= 1);
    }

    #[test]
    fn test_parked_writer_does_not_block_readers() {
        let lock = Arc::new(RwLock::new());
        lock.read();

        let writer = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                lock.write();
                lock.write_unlock();
            })
        };

        while lock.contentions() == 0 {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(10));
        assert!(!writer.is_finished());

        // New readers still get in while the writer waits.
        assert!(lock.try_read());
        lock.read();
        lock.read_unlock();
        lock.read_unlock();
        assert!(!writer.is_finished());

        lock.read_unlock();
        writer.join().unwrap();

        assert!(lock.try_write());
        lock.write_unlock();
    }
}
