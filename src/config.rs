use rocket::figment::Figment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";
pub const DEFAULT_TOKENIZER_ID: &str = "openai/clip-vit-base-patch32";

/// 启动时要加载哪一种引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    StableDiffusion,
    Dummy,
}

impl Default for EngineKind {
    fn default() -> Self {
        EngineKind::StableDiffusion
    }
}

/// 服务自身的配置，和 Rocket 的 address/port 共用同一个 figment（Rocket.toml + ROCKET_* 环境变量）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub engine: EngineKind,
    pub model_id: String,
    pub tokenizer_id: String,
    /// 即使检测到 CUDA 也强制用 CPU
    pub cpu: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            tokenizer_id: DEFAULT_TOKENIZER_ID.to_string(),
            cpu: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_figment(figment: &Figment) -> Self {
        match figment.extract::<ServiceConfig>() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("invalid service config ({e}), falling back to defaults");
                ServiceConfig::default()
            }
        }
    }
}
