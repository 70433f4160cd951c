use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::{ImageFormat, RgbImage};
use log::{info, warn};

use crate::engine::{EngineError, GenerateParams, ImageEngine};
use crate::prompt::{DEFAULT_HEIGHT, DEFAULT_WIDTH};

pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// 调一次模型；尺寸不匹配时按 512x512 再试一次，其它错误直接返回
pub async fn generate_with_fallback(
    engine: &dyn ImageEngine,
    params: &GenerateParams,
) -> Result<RgbImage, EngineError> {
    info!(
        "generating '{}' ({}x{}) steps: {}",
        params.prompt, params.width, params.height, params.num_inference_steps
    );

    match engine.generate(params).await {
        Ok(img) => Ok(img),
        Err(e) if e.is_dimension_mismatch() => {
            warn!(
                "dimension error detected: {e}. falling back to {DEFAULT_WIDTH}x{DEFAULT_HEIGHT}"
            );
            let fallback = params.with_size(DEFAULT_WIDTH, DEFAULT_HEIGHT);
            engine.generate(&fallback).await
        }
        Err(e) => Err(e),
    }
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

pub fn encode_data_url(img: &RgbImage) -> Result<String, image::ImageError> {
    let png = encode_png(img)?;
    Ok(format!("{DATA_URL_PREFIX}{}", B64.encode(png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use image::Rgb;
    use parking_lot::Mutex;

    /// 按顺序返回预设结果，并记录每次调用的参数
    struct ScriptedEngine {
        script: Mutex<Vec<Result<RgbImage, EngineError>>>,
        calls: Mutex<Vec<GenerateParams>>,
    }

    impl ScriptedEngine {
        fn new(mut script: Vec<Result<RgbImage, EngineError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<GenerateParams> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ImageEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, params: &GenerateParams) -> Result<RgbImage, EngineError> {
            self.calls.lock().push(params.clone());
            self.script
                .lock()
                .pop()
                .unwrap_or_else(|| Err(EngineError::Generation("script exhausted".into())))
        }
    }

    fn params() -> GenerateParams {
        GenerateParams {
            prompt: "a tower, cyberpunk".to_string(),
            negative_prompt: "fog".to_string(),
            num_inference_steps: 25,
            guidance_scale: 9.0,
            width: 512,
            height: 288,
        }
    }

    fn image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([10, 20, 30]))
    }

    const TORCH_MISMATCH: &str =
        "The size of tensor a (18) must match the size of tensor b (19) at non-singleton dimension 3";

    #[rocket::async_test]
    async fn success_is_returned_as_is() {
        let engine = ScriptedEngine::new(vec![Ok(image(512, 288))]);
        let img = generate_with_fallback(&engine, &params()).await.unwrap();

        assert_eq!(img.dimensions(), (512, 288));
        assert_eq!(engine.calls(), vec![params()]);
    }

    #[rocket::async_test]
    async fn dimension_mismatch_retries_once_at_512() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::from_message(TORCH_MISMATCH)),
            Ok(image(512, 512)),
        ]);
        let img = generate_with_fallback(&engine, &params()).await.unwrap();

        assert_eq!(img.dimensions(), (512, 512));
        let calls = engine.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], params());
        assert_eq!(calls[1], params().with_size(512, 512));
    }

    #[rocket::async_test]
    async fn failing_retry_propagates() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::from_message(TORCH_MISMATCH)),
            Err(EngineError::Generation("out of memory".into())),
        ]);
        let err = generate_with_fallback(&engine, &params()).await.unwrap_err();

        assert_eq!(err.to_string(), "out of memory");
        assert_eq!(engine.calls().len(), 2);
    }

    #[rocket::async_test]
    async fn second_mismatch_is_not_retried_again() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::from_message(TORCH_MISMATCH)),
            Err(EngineError::from_message(TORCH_MISMATCH)),
            Ok(image(512, 512)),
        ]);
        let err = generate_with_fallback(&engine, &params()).await.unwrap_err();

        assert!(err.is_dimension_mismatch());
        assert_eq!(engine.calls().len(), 2);
    }

    #[rocket::async_test]
    async fn other_errors_are_not_retried() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::from_message("safety checker rejected the prompt")),
            Ok(image(512, 512)),
        ]);
        let err = generate_with_fallback(&engine, &params()).await.unwrap_err();

        assert_eq!(err.to_string(), "safety checker rejected the prompt");
        assert_eq!(engine.calls().len(), 1);
    }

    #[test]
    fn data_url_payload_decodes_to_same_png() {
        let mut img = image(16, 8);
        img.put_pixel(3, 4, Rgb([255, 0, 128]));

        let png = encode_png(&img).unwrap();
        let url = encode_data_url(&img).unwrap();

        let payload = url.strip_prefix(DATA_URL_PREFIX).expect("data url prefix");
        let decoded = B64.decode(payload).unwrap();
        assert_eq!(decoded, png);

        let back = image::load_from_memory_with_format(&decoded, ImageFormat::Png)
            .unwrap()
            .to_rgb8();
        assert_eq!(back, img);
    }
}
