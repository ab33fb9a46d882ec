//! # 变换流水线演示入口
//!
//! 把本地图片切成若干段模拟渐进下载，经过缩放旋转阶段后写出结果。
//! 业务逻辑都在库里，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::mpsc;

use image_transform_pipeline::{
    AppError, BufferFactory, ChunkedSourceProducer, Consumer, EncodedImage, HeapBufferFactory,
    ImageFormat, ImageRequest, LoggingProducerListener, PerformanceProfile, PipelineConfig,
    Producer, ProducerContext, ResizeAndRotateProducer, ResizeOptions, RotationOptions,
    SimpleImageTranscoder, Status, TokioJobExecutor, TransformError,
};

const RESULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "transform-demo", version, about = "渐进式图片缩放旋转演示")]
struct Args {
    /// 输入图片路径
    input: PathBuf,

    /// 输出图片路径，扩展名决定输出格式（jpg / png / webp）
    output: PathBuf,

    /// 目标宽度
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// 目标高度
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// 旋转方式：auto | none | defer | 0 | 90 | 180 | 270
    #[arg(long, default_value = "auto", value_parser = parse_rotation)]
    rotate: RotationOptions,

    /// 模拟渐进下载的分段数
    #[arg(long, default_value_t = 4)]
    chunks: usize,

    /// 相邻两段之间的间隔（毫秒）
    #[arg(long, default_value_t = 30)]
    chunk_delay_ms: u64,

    /// 性能档位：quality | balanced | speed
    #[arg(long)]
    profile: Option<PerformanceProfile>,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 需要中间结果
    #[arg(long)]
    intermediate: bool,
}

fn parse_rotation(value: &str) -> Result<RotationOptions, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(RotationOptions::auto_rotate()),
        "none" => Ok(RotationOptions::disable_rotation()),
        "defer" => Ok(RotationOptions::auto_rotate_at_render_time()),
        other => match other.parse::<u32>() {
            Ok(angle @ (0 | 90 | 180 | 270)) => Ok(RotationOptions::force_rotation(angle)),
            _ => Err(format!("无效的旋转参数：{}", value)),
        },
    }
}

fn output_format_for(path: &Path) -> ImageFormat {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => ImageFormat::Png,
        Some("webp") => ImageFormat::WebP,
        _ => ImageFormat::Jpeg,
    }
}

fn load_config(args: &Args) -> Result<PipelineConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<PipelineConfig>(&raw)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(profile) = args.profile {
        config.apply_performance_profile(profile);
    }
    config.validate()?;
    log::info!(
        "⚙️ 配置：档位 {}，最小间隔 {}ms，质量 {}，单边上限 {}",
        config.infer_performance_profile().as_str(),
        config.min_transform_interval_ms,
        config.default_quality,
        config.max_bitmap_size
    );
    Ok(config)
}

enum PipelineEvent {
    Intermediate { size: usize, status: Status },
    Last(Option<EncodedImage>, Status),
    Failure(TransformError),
    Cancelled,
}

/// 把回调转成 channel 消息，主任务异步等待。
struct ChannelConsumer {
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelConsumer {
    fn send(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            log::warn!("结果接收端已关闭，丢弃事件");
        }
    }
}

impl Consumer for ChannelConsumer {
    fn on_new_result(&self, result: Option<&EncodedImage>, status: Status) {
        if status.is_last() {
            self.send(PipelineEvent::Last(result.and_then(EncodedImage::try_clone), status));
        } else {
            self.send(PipelineEvent::Intermediate {
                size: result.map_or(0, EncodedImage::size),
                status,
            });
        }
    }

    fn on_failure(&self, error: TransformError) {
        self.send(PipelineEvent::Failure(error));
    }

    fn on_cancellation(&self) {
        self.send(PipelineEvent::Cancelled);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let started = Instant::now();
    let config = load_config(&args)?;
    let bytes = std::fs::read(&args.input)?;
    log::info!("📥 读取输入 {:?}（{} 字节）", args.input, bytes.len());

    let factory = Arc::new(HeapBufferFactory::new());
    let source = ChunkedSourceProducer::new(factory.new_byte_buffer(&bytes), args.chunks)
        .with_chunk_delay(Duration::from_millis(args.chunk_delay_ms));
    let producer = ResizeAndRotateProducer::new(
        Arc::new(source),
        Arc::new(TokioJobExecutor::current()?),
        factory.clone(),
        Arc::new(SimpleImageTranscoder::from_config(&config)),
        config,
    )
    .with_output_format(output_format_for(&args.output));

    let resize_options = match (args.width, args.height) {
        (Some(width), Some(height)) => ResizeOptions::for_dimensions(width, height),
        _ => None,
    };
    let request = ImageRequest::new(args.rotate, resize_options);
    let request_id = format!("demo-{}", std::process::id());
    let context = ProducerContext::new(
        request_id.clone(),
        request,
        Arc::new(LoggingProducerListener::default()),
        args.intermediate,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(ChannelConsumer { events: tx });
    let producer_context = context.clone();
    let feeding = tokio::task::spawn_blocking(move || {
        producer.produce_results(consumer, producer_context);
    });

    let outcome = tokio::time::timeout(RESULT_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Intermediate { size, status } => {
                    log::info!("🧩 中间结果：{} 字节 {:?}", size, status);
                }
                PipelineEvent::Last(image, status) => return Ok((image, status)),
                PipelineEvent::Failure(err) => return Err(AppError::from(err)),
                PipelineEvent::Cancelled => {
                    return Err(AppError::from(TransformError::Cancelled(request_id.clone())));
                }
            }
        }
        Err(AppError::Pipeline("流水线结束但没有最终结果".to_string()))
    })
    .await;

    let (image, status) = match outcome {
        Ok(result) => result?,
        Err(_) => {
            context.cancel();
            return Err(AppError::Pipeline(format!(
                "等待结果超时（{}s）",
                RESULT_TIMEOUT.as_secs()
            )));
        }
    };
    if let Err(err) = feeding.await {
        log::warn!("输入任务异常结束：{}", err);
    }

    let Some(mut image) = image else {
        return Err(AppError::Pipeline("最终结果为空".to_string()));
    };
    if !image.is_complete() {
        log::warn!("⚠️ 最终结果数据不完整，仍按原样写出");
    }
    let data = image
        .bytes()
        .ok_or_else(|| AppError::Pipeline("最终结果缓冲已释放".to_string()))?;
    std::fs::write(&args.output, data)?;
    log::info!(
        "💾 已写出 {:?}：{} {} 字节，尺寸 {}，{:?}，总耗时 {}ms",
        args.output,
        image.format().as_str(),
        data.len(),
        image
            .dimensions()
            .map_or_else(|| "?".to_string(), |(w, h)| format!("{}x{}", w, h)),
        status,
        started.elapsed().as_millis()
    );
    image.close();

    drop(context);
    log::debug!("共分配 {} 个缓冲", factory.total_allocated());
    if factory.live_buffers() > 0 {
        log::warn!("⚠️ 仍有 {} 个缓冲未释放", factory.live_buffers());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        log::error!("❌ {}", err);
        std::process::exit(1);
    }
}
