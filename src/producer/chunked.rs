//! 把一段完整字节按比例切成 N 个逐渐变长的快照依次交给下游，模拟渐进式下载。

use std::sync::Arc;
use std::time::Duration;

use super::consumer::{Consumer, Status};
use super::context::ProducerContext;
use super::Producer;
use crate::image::{EncodedImage, PooledBuffer};

pub const PRODUCER_NAME: &str = "ChunkedSourceProducer";

pub struct ChunkedSourceProducer {
    data: PooledBuffer,
    chunks: usize,
    chunk_delay: Duration,
}

impl ChunkedSourceProducer {
    /// `chunks` 为 0 时按 1 处理。
    pub fn new(data: PooledBuffer, chunks: usize) -> Self {
        Self {
            data,
            chunks: chunks.max(1),
            chunk_delay: Duration::ZERO,
        }
    }

    /// 相邻两次通知之间阻塞等待的时长。
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// 第 `index` 个快照（从 1 开始）的字节数。
    fn prefix_len(&self, index: usize) -> usize {
        let total = self.data.len();
        if index >= self.chunks {
            return total;
        }
        (total * index / self.chunks).max(1).min(total)
    }
}

impl Producer for ChunkedSourceProducer {
    fn produce_results(&self, consumer: Arc<dyn Consumer>, context: Arc<ProducerContext>) {
        let listener = context.listener();
        listener.on_producer_start(context.id(), PRODUCER_NAME);

        for index in 1..=self.chunks {
            if context.is_cancelled() {
                listener.on_producer_finish_with_cancellation(context.id(), PRODUCER_NAME, None);
                consumer.on_cancellation();
                return;
            }

            let last = index == self.chunks;
            let mut image = EncodedImage::parsed(self.data.prefix(self.prefix_len(index)));
            let status = if last {
                Status::IS_LAST
            } else {
                Status::IS_PARTIAL_RESULT
            };
            log::trace!(
                "📦 [{}] 第 {}/{} 段：{} 字节，格式 {}",
                context.id(),
                index,
                self.chunks,
                image.size(),
                image.format().as_str()
            );
            consumer.on_new_result(Some(&image), status);
            image.close();

            if !last && !self.chunk_delay.is_zero() {
                std::thread::sleep(self.chunk_delay);
            }
        }

        listener.on_producer_finish_with_success(context.id(), PRODUCER_NAME, None);
    }
}
