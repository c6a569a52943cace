//! ロックフリー FIFO（プロセス内キュー）
//!
//! crossbeam の SegQueue（無制限）を使う。
//! - producer は consumer の有無に関係なく即座に push できる
//! - 満杯による拒否はない。バースト吸収はキュー側、上限は呼び出し側のタイムアウトで決まる

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct FifoQueue<T> {
    inner: SegQueue<T>,
    pushed_total: AtomicU64,
    popped_total: AtomicU64,
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
            pushed_total: AtomicU64::new(0),
            popped_total: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn push(&self, item: T) {
        self.inner.push(item);
        self.pushed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn pop(&self) -> Option<T> {
        let item = self.inner.pop();
        if item.is_some() {
            self.popped_total.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// (push 累計, pop 累計)
    pub fn totals(&self) -> (u64, u64) {
        (
            self.pushed_total.load(Ordering::Relaxed),
            self.popped_total.load(Ordering::Relaxed),
        )
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let q = FifoQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert!(q.pop().is_none());
        assert_eq!(q.totals(), (3, 3));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let q = std::sync::Arc::new(FifoQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = std::sync::Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        q.push(t * 10_000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut seen = 0;
        while q.pop().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4_000);
    }
}
