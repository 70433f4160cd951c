use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use thiserror::Error;

/// 外部 diffusers 报尺寸不匹配时的原文片段
const TENSOR_SIZE_MISMATCH: &str = "match the size of tensor";

/// 一次生成调用需要的全部参数
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: i64,
    pub guidance_scale: f64,
    pub width: u32,
    pub height: u32,
}

impl GenerateParams {
    /// 其余参数不变，只换尺寸
    pub fn with_size(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// 模型内部张量尺寸对不上（通常是宽高不被 U-Net 下采样整除）
    #[error("{0}")]
    DimensionMismatch(String),

    #[error("{0}")]
    Generation(String),
}

impl EngineError {
    /// 只有文字描述的错误按关键字归类
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(TENSOR_SIZE_MISMATCH) {
            EngineError::DimensionMismatch(message)
        } else {
            EngineError::Generation(message)
        }
    }

    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, EngineError::DimensionMismatch(_))
    }
}

impl From<candle_core::Error> for EngineError {
    fn from(err: candle_core::Error) -> Self {
        // candle 的错误只按结构判断，不看文案
        if is_shape_error(&err) {
            EngineError::DimensionMismatch(err.to_string())
        } else {
            EngineError::Generation(err.to_string())
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<candle_core::Error>() {
            Ok(candle_err) => candle_err.into(),
            Err(other) => EngineError::from_message(format!("{other:#}")),
        }
    }
}

fn is_shape_error(err: &candle_core::Error) -> bool {
    match err {
        candle_core::Error::ShapeMismatchBinaryOp { .. }
        | candle_core::Error::ShapeMismatchCat { .. } => true,
        candle_core::Error::WithBacktrace { inner, .. } => is_shape_error(inner),
        _ => false,
    }
}

/// 统一的文生图引擎抽象
#[async_trait]
pub trait ImageEngine: Send + Sync {
    fn name(&self) -> &str;

    /// 生成一张图
    async fn generate(&self, params: &GenerateParams) -> Result<RgbImage, EngineError>;
}

/// Dummy 实现：不下载权重，按请求尺寸画一张渐变图，方便联调
pub struct DummyEngine {
    pub model_name: String,
}

impl DummyEngine {
    pub fn new(model_name: &str) -> Arc<Self> {
        Arc::new(Self {
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl ImageEngine for DummyEngine {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, params: &GenerateParams) -> Result<RgbImage, EngineError> {
        if params.width == 0 || params.height == 0 {
            return Err(EngineError::Generation(format!(
                "invalid image size {}x{}",
                params.width, params.height
            )));
        }

        // 模拟一点延迟
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (w, h) = (params.width, params.height);
        // 用提示词长度做个种子，同一请求得到同一张图
        let tint = (params.prompt.len() % 256) as u8;
        let img = RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                (x * 255 / w.max(1)) as u8,
                (y * 255 / h.max(1)) as u8,
                tint,
            ])
        });
        Ok(img)
    }
}
