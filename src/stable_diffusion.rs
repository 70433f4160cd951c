use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use log::{debug, info};

use candle_core::{DType, Device, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;

use crate::config::ServiceConfig;
use crate::engine::{EngineError, GenerateParams, ImageEngine};

/// latent -> VAE 输入的缩放系数（SD 1.x）
const VAE_SCALE: f64 = 0.18215;
const END_OF_TEXT: &str = "<|endoftext|>";

/// 启动时选择设备：有 CUDA 用 GPU + F16，否则 CPU + F32
pub fn select_device(force_cpu: bool) -> candle_core::Result<(Device, DType)> {
    if force_cpu {
        return Ok((Device::Cpu, DType::F32));
    }
    let device = Device::cuda_if_available(0)?;
    let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };
    Ok((device, dtype))
}

/// 权重在 hub 上的文件路径，GPU 半精度时优先取 fp16 版本
struct WeightFiles {
    clip: &'static str,
    unet: &'static str,
    vae: &'static str,
}

impl WeightFiles {
    fn for_dtype(dtype: DType) -> Self {
        if dtype == DType::F16 {
            Self {
                clip: "text_encoder/model.fp16.safetensors",
                unet: "unet/diffusion_pytorch_model.fp16.safetensors",
                vae: "vae/diffusion_pytorch_model.fp16.safetensors",
            }
        } else {
            Self {
                clip: "text_encoder/model.safetensors",
                unet: "unet/diffusion_pytorch_model.safetensors",
                vae: "vae/diffusion_pytorch_model.safetensors",
            }
        }
    }
}

struct Pipeline {
    device: Device,
    dtype: DType,
    tokenizer: Tokenizer,
    pad_id: u32,
    eos_id: u32,
    max_tokens: usize,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

pub struct StableDiffusionEngine {
    model_name: String,
    pipeline: Arc<Pipeline>,
}

impl StableDiffusionEngine {
    /// 下载（或读缓存）并构建 CLIP / U-Net / VAE，耗时较长，只在启动时调用一次
    pub fn load(config: &ServiceConfig, device: Device, dtype: DType) -> Result<Arc<Self>> {
        let start = std::time::Instant::now();
        let files = WeightFiles::for_dtype(dtype);

        let api = Api::new()?;
        let repo = api.model(config.model_id.clone());
        let clip_path = repo.get(files.clip)?;
        let unet_path = repo.get(files.unet)?;
        let vae_path = repo.get(files.vae)?;

        let tokenizer_path = api.model(config.tokenizer_id.clone()).get("tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Error loading tokenizer: {e}"))?;
        info!(
            "weights for {} ready in {:.2}s",
            config.model_id,
            start.elapsed().as_secs_f32()
        );

        // 尺寸在每次请求时才确定，这里的配置只用来建模型
        let sd_config = StableDiffusionConfig::v1_5(None, None, None);
        let eos_id = tokenizer
            .token_to_id(END_OF_TEXT)
            .ok_or_else(|| anyhow::anyhow!("tokenizer has no {END_OF_TEXT} token"))?;
        let pad_id = match &sd_config.clip.pad_with {
            Some(padding) => tokenizer
                .token_to_id(padding)
                .ok_or_else(|| anyhow::anyhow!("tokenizer has no padding token"))?,
            None => eos_id,
        };

        let text_model =
            stable_diffusion::build_clip_transformer(&sd_config.clip, clip_path, &device, dtype)?;
        let unet = sd_config.build_unet(unet_path, &device, 4, false, dtype)?;
        let vae = sd_config.build_vae(vae_path, &device, dtype)?;
        info!(
            "model {} built on {:?}/{:?} in {:.2}s",
            config.model_id,
            device,
            dtype,
            start.elapsed().as_secs_f32()
        );

        Ok(Arc::new(Self {
            model_name: config.model_id.clone(),
            pipeline: Arc::new(Pipeline {
                device,
                dtype,
                tokenizer,
                pad_id,
                eos_id,
                max_tokens: sd_config.clip.max_position_embeddings,
                text_model,
                unet,
                vae,
            }),
        }))
    }
}

impl Pipeline {
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow::anyhow!("Error encoding tokenizer: {e}"))?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_tokens {
            debug!("prompt truncated from {} to {} tokens", tokens.len(), self.max_tokens);
        }
        let tokens = fit_to_context(tokens, self.max_tokens, self.eos_id, self.pad_id);

        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }

    fn run(&self, params: &GenerateParams) -> Result<RgbImage> {
        let steps = step_count(params.num_inference_steps)?;
        let (width, height) = (params.width as usize, params.height as usize);
        let use_guidance = params.guidance_scale > 1.0;

        // 每次请求按尺寸建一个调度器，模型权重共用
        let sd_config = StableDiffusionConfig::v1_5(None, Some(height), Some(width));
        let mut scheduler = sd_config.build_scheduler(steps)?;

        let cond = self.encode_prompt(&params.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond = self.encode_prompt(&params.negative_prompt)?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        }
        .to_dtype(self.dtype)?;

        let latents = Tensor::randn(0f32, 1f32, (1, 4, height / 8, width / 8), &self.device)?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        let total = timesteps.len();
        for (idx, &timestep) in timesteps.iter().enumerate() {
            let step_start = std::time::Instant::now();
            let model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;

            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(
                "step {}/{} done, {:.2}s",
                idx + 1,
                total,
                step_start.elapsed().as_secs_f32()
            );
        }

        let images = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let images = ((images / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let images = (images.to_dtype(DType::F32)?.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&images.squeeze(0)?)
    }
}

/// 步数原样透传到这里，非正数算生成失败
fn step_count(steps: i64) -> Result<usize> {
    if steps <= 0 {
        anyhow::bail!("num_inference_steps must be greater than 0, got {steps}");
    }
    Ok(usize::try_from(steps)?)
}

/// 超过 CLIP 上下文长度就截断，但保留结尾的 EOS（和 diffusers 一致），不足补 pad
fn fit_to_context(mut tokens: Vec<u32>, max_tokens: usize, eos_id: u32, pad_id: u32) -> Vec<u32> {
    if tokens.len() > max_tokens {
        tokens.truncate(max_tokens - 1);
        tokens.push(eos_id);
    }
    tokens.resize(max_tokens, pad_id);
    tokens
}

/// (3, H, W) 的 u8 张量 -> RgbImage
fn tensor_to_image(chw: &Tensor) -> Result<RgbImage> {
    let (channels, height, width) = chw.dims3()?;
    if channels != 3 {
        anyhow::bail!("expected 3 channels, got {channels}");
    }
    let hwc = chw.permute((1, 2, 0))?.flatten_all()?;
    let data = hwc.to_vec1::<u8>()?;
    RgbImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| anyhow::anyhow!("failed to construct image buffer: invalid dimensions"))
}

#[async_trait]
impl ImageEngine for StableDiffusionEngine {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, params: &GenerateParams) -> Result<RgbImage, EngineError> {
        let pipeline = self.pipeline.clone();
        let params = params.clone();
        // 采样是纯 CPU/GPU 计算，放到阻塞线程池里跑
        let out = tokio::task::spawn_blocking(move || pipeline.run(&params))
            .await
            .map_err(|e| EngineError::Generation(format!("generation task failed: {e}")))?;
        Ok(out?)
    }
}
