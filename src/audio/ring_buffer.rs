//! 播放样本环形缓冲区
//!
//! 软件设备的“硬件缓冲区”，单生产者单消费者：
//! - 渲染线程写入交织样本
//! - 设备时钟线程按周期取走
//!
//! 读写游标单调递增，按容量掩码取下标；各占一个 cache line

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// SPSC 样本环形缓冲区
pub struct RingBuffer {
    slots: Box<[UnsafeCell<f32>]>,
    mask: usize,
    // 生产者游标
    head: CachePadded<AtomicUsize>,
    // 消费者游标
    tail: CachePadded<AtomicUsize>,
    locked: bool,
}

// 生产者只写 [head, tail + capacity)，消费者只读 [tail, head)，两段不重叠
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// 容量向上取整到 2 的幂（至少 1）
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(1).next_power_of_two();
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(0.0)).collect(),
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            locked: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn queued(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// 可写样本数
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.queued()
    }

    /// 写入样本（仅渲染侧调用），返回实际写入数
    pub fn write(&self, samples: &[f32]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let count = samples.len().min(self.capacity() - head.wrapping_sub(tail));

        for (offset, &sample) in samples[..count].iter().enumerate() {
            let slot = &self.slots[head.wrapping_add(offset) & self.mask];
            unsafe { *slot.get() = sample };
        }

        self.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }

    /// 读取样本（仅设备时钟侧调用），返回实际读取数
    pub fn read(&self, out: &mut [f32]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let count = out.len().min(head.wrapping_sub(tail));

        for (offset, sample) in out[..count].iter_mut().enumerate() {
            let slot = &self.slots[tail.wrapping_add(offset) & self.mask];
            *sample = unsafe { *slot.get() };
        }

        self.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    #[cfg(unix)]
    fn byte_span(&self) -> (*const libc::c_void, usize) {
        (
            self.slots.as_ptr() as *const libc::c_void,
            std::mem::size_of_val(&*self.slots),
        )
    }

    /// 锁定样本内存，避免设备时钟线程缺页
    ///
    /// 尽力而为，返回是否锁定
    #[cfg(unix)]
    pub fn lock_memory(&mut self) -> bool {
        if self.locked {
            return true;
        }

        let (ptr, len) = self.byte_span();
        if unsafe { libc::mlock(ptr, len) } == 0 {
            self.locked = true;
            log::debug!("Device buffer locked: {} bytes", len);
        } else {
            log::debug!(
                "Device buffer not locked: {}",
                std::io::Error::last_os_error()
            );
        }
        self.locked
    }

    #[cfg(not(unix))]
    pub fn lock_memory(&mut self) -> bool {
        false
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if self.locked {
                let (ptr, len) = self.byte_span();
                unsafe { libc::munlock(ptr, len) };
            }
        }
    }
}
