use std::sync::Arc;
use std::time::SystemTime;

use log::{error, info, warn};
use serde::Serialize;

use crate::config::{EngineKind, ServiceConfig};
use crate::engine::{DummyEngine, ImageEngine};
use crate::stable_diffusion::{select_device, StableDiffusionEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelStatus {
    Loaded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub status: ModelStatus,
    pub device: String,
    pub last_updated: Option<SystemTime>,
}

/// 启动时加载一次的模型句柄，之后只读
pub enum ModelHandle {
    Loaded {
        engine: Arc<dyn ImageEngine>,
        meta: ModelMetadata,
    },
    Failed {
        meta: ModelMetadata,
        reason: String,
    },
}

impl ModelHandle {
    pub fn loaded(engine: Arc<dyn ImageEngine>, device: &str) -> Self {
        let meta = ModelMetadata {
            name: engine.name().to_string(),
            status: ModelStatus::Loaded,
            device: device.to_string(),
            last_updated: Some(SystemTime::now()),
        };
        ModelHandle::Loaded { engine, meta }
    }

    pub fn failed(name: &str, reason: impl Into<String>) -> Self {
        ModelHandle::Failed {
            meta: ModelMetadata {
                name: name.to_string(),
                status: ModelStatus::Error,
                device: "none".to_string(),
                last_updated: Some(SystemTime::now()),
            },
            reason: reason.into(),
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        match self {
            ModelHandle::Loaded { meta, .. } | ModelHandle::Failed { meta, .. } => meta,
        }
    }

    /// 根据配置创建对应 Engine；失败不会中断启动，只记录下来
    pub fn load(config: &ServiceConfig) -> Self {
        info!("initializing {:?} engine for {}", config.engine, config.model_id);

        match config.engine {
            EngineKind::Dummy => {
                let engine: Arc<dyn ImageEngine> = DummyEngine::new(&config.model_id);
                ModelHandle::loaded(engine, "cpu")
            }
            EngineKind::StableDiffusion => {
                let (device, dtype) = match select_device(config.cpu) {
                    Ok(selected) => selected,
                    Err(e) => {
                        error!("error selecting device: {e}");
                        return ModelHandle::failed(&config.model_id, e.to_string());
                    }
                };
                if device.is_cuda() {
                    info!("CUDA GPU detected, using GPU ({dtype:?})");
                } else {
                    warn!("no CUDA GPU in use, running on CPU (this will be slow)");
                }
                let device_name = format!("{device:?}");

                match StableDiffusionEngine::load(config, device, dtype) {
                    Ok(engine) => {
                        info!("model loaded successfully");
                        ModelHandle::loaded(engine, &device_name)
                    }
                    Err(e) => {
                        error!("error loading model: {e:#}");
                        ModelHandle::failed(&config.model_id, format!("{e:#}"))
                    }
                }
            }
        }
    }
}

/// Rocket 托管的全局共享状态
pub struct AppState {
    pub model: ModelHandle,
}

impl AppState {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }
}
