//! # 字节缓冲与缓冲工厂
//!
//! ## 设计思路
//!
//! 流水线中每一段编码数据都持有一个 `PooledBuffer`。底层存储用 `bytes::Bytes`，
//! 克隆只增加引用计数；每个逻辑缓冲额外绑定一个 `BufferLease`，最后一个持有者
//! 释放时租约自动归还。归还依赖 `Drop`，因此任意退出路径都只会归还一次。
//!
//! 缓冲的分配算法不属于本模块关注点，`BufferFactory` 只是一个可替换的协作者；
//! 默认的 `HeapBufferFactory` 在堆上分配，并统计存活缓冲数，便于测试发现泄漏。

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};

/// 缓冲租约：创建时计数 +1，释放时计数 -1。
struct BufferLease {
    live: Arc<AtomicUsize>,
}

impl BufferLease {
    fn acquire(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { live }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 只读、可廉价克隆的编码数据缓冲。
#[derive(Clone)]
pub struct PooledBuffer {
    bytes: Bytes,
    _lease: Arc<BufferLease>,
}

impl PooledBuffer {
    /// 不经过工厂直接包装一段数据（租约计数独立）。
    pub fn unpooled(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            _lease: Arc::new(BufferLease::acquire(Arc::new(AtomicUsize::new(0)))),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 截取前 `len` 字节，与原缓冲共享同一租约。
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            bytes: self.bytes.slice(..len.min(self.bytes.len())),
            _lease: Arc::clone(&self._lease),
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer").field("len", &self.bytes.len()).finish()
    }
}

/// 可写输出流，写完后通过 `into_buffer` 转为 `PooledBuffer`。
///
/// 若未转换就被丢弃（例如编码中途出错），租约随之归还。
pub struct PooledOutputStream {
    buf: BytesMut,
    lease: BufferLease,
}

impl PooledOutputStream {
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 冻结已写入内容，租约转移给返回的缓冲。
    pub fn into_buffer(self) -> PooledBuffer {
        let Self { buf, lease } = self;
        PooledBuffer {
            bytes: buf.freeze(),
            _lease: Arc::new(lease),
        }
    }
}

impl io::Write for PooledOutputStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 缓冲工厂协作者。
pub trait BufferFactory: Send + Sync {
    /// 申请一个新的输出流。
    fn new_output_stream(&self) -> PooledOutputStream;

    /// 将已有数据复制到新缓冲。
    fn new_byte_buffer(&self, data: &[u8]) -> PooledBuffer {
        let mut stream = self.new_output_stream();
        stream.buf.extend_from_slice(data);
        stream.into_buffer()
    }
}

/// 默认的堆上缓冲工厂。
#[derive(Debug)]
pub struct HeapBufferFactory {
    live: Arc<AtomicUsize>,
    allocated: AtomicUsize,
    initial_capacity: usize,
}

impl HeapBufferFactory {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            allocated: AtomicUsize::new(0),
            initial_capacity: 16 * 1024,
        }
    }

    /// 当前尚未归还的缓冲数量。
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// 累计分配过的缓冲数量。
    pub fn total_allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }
}

impl Default for HeapBufferFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferFactory for HeapBufferFactory {
    fn new_output_stream(&self) -> PooledOutputStream {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        PooledOutputStream {
            buf: BytesMut::with_capacity(self.initial_capacity),
            lease: BufferLease::acquire(Arc::clone(&self.live)),
        }
    }
}
