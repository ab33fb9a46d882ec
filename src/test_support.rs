//! 单元测试共用的图片构造与记录型协作者。

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Rgb, Rgba};

use crate::error::TransformError;
use crate::image::{EncodedImage, ImageFormat, PooledBuffer};
use crate::producer::{Consumer, ExtraMap, Job, JobExecutor, ProducerListener, Status};
use crate::transcoder::{ImageRasterCodec, SimpleImageTranscoder};

pub(crate) fn jpeg_bytes(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8])
    });
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&DynamicImage::ImageRgb8(img))
        .expect("failed to encode test jpeg");
    out
}

/// 在 SOI 之后插入只含 Orientation 一项的 APP1 EXIF 段。
pub(crate) fn jpeg_bytes_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let jpeg = jpeg_bytes(width, height, 90);

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"MM\x00\x2A");
    tiff.extend_from_slice(&8u32.to_be_bytes());
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x0112u16.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&orientation.to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes());

    let segment_len = (2 + 6 + tiff.len()) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\x00\x00");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 255])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("failed to encode test png");
    cursor.into_inner()
}

/// 只有元数据、字节不可解码的图片句柄。
pub(crate) fn metadata_only_image(format: ImageFormat, width: u32, height: u32, rotation: u32) -> EncodedImage {
    let mut image = EncodedImage::new(PooledBuffer::unpooled(vec![0u8; 4]));
    image.set_format(format);
    image.set_dimensions(width, height);
    image.set_rotation_angle(rotation);
    image
}

pub(crate) fn simple_transcoder(resizing_enabled: bool) -> SimpleImageTranscoder {
    SimpleImageTranscoder::new(resizing_enabled, 2048, Arc::new(ImageRasterCodec::default()))
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedResult {
    pub status: Status,
    pub format: ImageFormat,
    pub dimensions: Option<(u32, u32)>,
    pub rotation_angle: Option<u32>,
    pub size: usize,
}

/// 只记录元数据、不持有缓冲的消费者。
#[derive(Default)]
pub(crate) struct RecordingConsumer {
    results: Mutex<Vec<RecordedResult>>,
    failures: AtomicUsize,
    cancellations: AtomicUsize,
}

impl RecordingConsumer {
    pub fn results(&self) -> Vec<RecordedResult> {
        self.results.lock().expect("results lock").clone()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl Consumer for RecordingConsumer {
    fn on_new_result(&self, result: Option<&EncodedImage>, status: Status) {
        let recorded = RecordedResult {
            status,
            format: result.map_or(ImageFormat::Unknown, EncodedImage::format),
            dimensions: result.and_then(EncodedImage::dimensions),
            rotation_angle: result.and_then(EncodedImage::rotation_angle),
            size: result.map_or(0, EncodedImage::size),
        };
        self.results.lock().expect("results lock").push(recorded);
    }

    fn on_failure(&self, _error: TransformError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    starts: AtomicUsize,
    successes: AtomicUsize,
    failures: AtomicUsize,
    cancellations: AtomicUsize,
    last_success_extra: Mutex<Option<ExtraMap>>,
}

impl RecordingListener {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn last_success_extra(&self) -> Option<ExtraMap> {
        self.last_success_extra.lock().expect("extra lock").clone()
    }
}

impl ProducerListener for RecordingListener {
    fn on_producer_start(&self, _request_id: &str, producer_name: &str) {
        if producer_name == crate::producer::resize_and_rotate::PRODUCER_NAME {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_producer_finish_with_success(
        &self,
        _request_id: &str,
        producer_name: &str,
        extra_map: Option<&ExtraMap>,
    ) {
        if producer_name == crate::producer::resize_and_rotate::PRODUCER_NAME {
            self.successes.fetch_add(1, Ordering::SeqCst);
            *self.last_success_extra.lock().expect("extra lock") = extra_map.cloned();
        }
    }

    fn on_producer_finish_with_failure(
        &self,
        _request_id: &str,
        _producer_name: &str,
        _error: &TransformError,
        _extra_map: Option<&ExtraMap>,
    ) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_producer_finish_with_cancellation(
        &self,
        _request_id: &str,
        _producer_name: &str,
        _extra_map: Option<&ExtraMap>,
    ) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }

    fn requires_extra_map(&self, _request_id: &str) -> bool {
        true
    }
}

/// 手动驱动的执行器：任务只入队，由测试决定何时执行；延迟只记录不等待。
#[derive(Default)]
pub(crate) struct ManualExecutor {
    queue: Mutex<VecDeque<(Duration, Job)>>,
}

impl ManualExecutor {
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("queue lock").len()
    }

    pub fn pending_delays(&self) -> Vec<Duration> {
        self.queue
            .lock()
            .expect("queue lock")
            .iter()
            .map(|(delay, _)| *delay)
            .collect()
    }

    pub fn run_next(&self) -> bool {
        let next = self.queue.lock().expect("queue lock").pop_front();
        match next {
            Some((_, job)) => {
                job();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) {
        while self.run_next() {}
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
