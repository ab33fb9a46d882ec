#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Rgb};
use image_transform_pipeline::producer::{ExtraMap, Job, JobExecutor, ProducerListener};
use image_transform_pipeline::{Consumer, EncodedImage, ImageFormat, Status, TransformError};

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 255) as u8, (y % 255) as u8, ((x * 3 + y) % 255) as u8])
    });
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85)
        .encode_image(&DynamicImage::ImageRgb8(img))
        .expect("failed to encode test jpeg");
    out
}

/// 大尺寸纯色 JPEG，编码很快。
pub fn solid_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([90u8, 140, 200]));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 75)
        .encode_image(&DynamicImage::ImageRgb8(img))
        .expect("failed to encode test jpeg");
    out
}

#[derive(Debug, Clone)]
pub struct Delivered {
    pub status: Status,
    pub format: ImageFormat,
    pub dimensions: Option<(u32, u32)>,
    pub size: usize,
}

#[derive(Default)]
pub struct CollectingConsumer {
    results: Mutex<Vec<Delivered>>,
    failures: AtomicUsize,
    cancellations: AtomicUsize,
}

impl CollectingConsumer {
    pub fn results(&self) -> Vec<Delivered> {
        self.results.lock().expect("results lock").clone()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl Consumer for CollectingConsumer {
    fn on_new_result(&self, result: Option<&EncodedImage>, status: Status) {
        self.results.lock().expect("results lock").push(Delivered {
            status,
            format: result.map_or(ImageFormat::Unknown, EncodedImage::format),
            dimensions: result.and_then(EncodedImage::dimensions),
            size: result.map_or(0, EncodedImage::size),
        });
    }

    fn on_failure(&self, _error: TransformError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}

/// 统计变换体执行次数的监听器。
#[derive(Default)]
pub struct CountingListener {
    pub starts: AtomicUsize,
    pub successes: AtomicUsize,
    pub failures: AtomicUsize,
}

impl CountingListener {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl ProducerListener for CountingListener {
    fn on_producer_start(&self, _request_id: &str, producer_name: &str) {
        if producer_name == "ResizeAndRotateProducer" {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_producer_finish_with_success(&self, _: &str, producer_name: &str, _: Option<&ExtraMap>) {
        if producer_name == "ResizeAndRotateProducer" {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_producer_finish_with_failure(
        &self,
        _: &str,
        _: &str,
        _: &TransformError,
        _: Option<&ExtraMap>,
    ) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_producer_finish_with_cancellation(&self, _: &str, _: &str, _: Option<&ExtraMap>) {}

    fn requires_extra_map(&self, _request_id: &str) -> bool {
        false
    }
}

/// 任务只入队、由测试手动执行的执行器。
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<(Duration, Job)>>,
}

impl ManualExecutor {
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.queue
            .lock()
            .expect("queue lock")
            .iter()
            .map(|(delay, _)| *delay)
            .collect()
    }

    pub fn run_all(&self) {
        loop {
            let next = self.queue.lock().expect("queue lock").pop_front();
            match next {
                Some((_, job)) => job(),
                None => break,
            }
        }
    }
}

impl JobExecutor for ManualExecutor {
    fn execute(&self, job: Job) {
        self.queue.lock().expect("queue lock").push_back((Duration::ZERO, job));
    }

    fn schedule(&self, delay: Duration, job: Job) {
        self.queue.lock().expect("queue lock").push_back((delay, job));
    }
}
