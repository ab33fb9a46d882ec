//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 流水线内部只使用一个错误枚举 `TransformError`，覆盖解码、编码、内存耗尽、
//! 取消后写入等全部失败来源，调用侧可按分支匹配而不是比对字符串。
//!
//! 命令行入口额外定义 `AppError`，通过 `#[from]` 吸收库错误与 I/O 错误，
//! 让 `main` 只需一个 `?`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - `code()` / `stage()` 提供稳定的机器可读标识，供监听器上报。

/// 变换流水线统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("解码错误：{0}")]
    Decode(String),

    #[error("编码错误：{0}")]
    Encode(String),

    /// 解码或编码阶段分配失败（超过内存上限）。
    #[error("内存不足：{0}")]
    OutOfMemory(String),

    /// 在已清理/已取消的请求上继续写入。
    #[error("状态错误：{0}")]
    InvalidState(String),

    #[error("I/O 错误：{0}")]
    Io(#[from] std::io::Error),

    #[error("请求已取消：{0}")]
    Cancelled(String),

    #[error("配置错误：{0}")]
    Config(String),
}

impl TransformError {
    /// 稳定错误码，供监听器与日志聚合使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_DECODE",
            Self::Encode(_) => "E_ENCODE",
            Self::OutOfMemory(_) => "E_OOM",
            Self::InvalidState(_) => "E_INVALID_STATE",
            Self::Io(_) => "E_IO",
            Self::Cancelled(_) => "E_CANCELLED",
            Self::Config(_) => "E_CONFIG",
        }
    }

    /// 出错所在阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Decode(_) | Self::OutOfMemory(_) => "decode",
            Self::Encode(_) | Self::Io(_) => "encode",
            Self::InvalidState(_) | Self::Cancelled(_) => "schedule",
            Self::Config(_) => "config",
        }
    }

    /// 当前错误是否由内存上限触发。
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}

impl From<image::ImageError> for TransformError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::Limits(e) => Self::OutOfMemory(e.to_string()),
            image::ImageError::IoError(e) => Self::Io(e),
            image::ImageError::Encoding(e) => Self::Encode(e.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// 命令行层统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 变换流水线错误（解码 / 编码 / 取消）
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件无法读取或解析
    #[error("配置错误: {0}")]
    Config(String),

    /// 流水线没有产出任何结果
    #[error("流水线错误: {0}")]
    Pipeline(String),
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}
