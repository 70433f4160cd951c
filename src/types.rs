use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// POST /generate 的请求体，字段名沿用前端的 camelCase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    /// 目前只会返回一张图
    #[serde(default = "default_num_images")]
    pub num_images: i64,
    #[serde(default = "default_num_inference_steps")]
    pub num_inference_steps: i64,
}

fn default_style() -> String {
    "Anime".to_string()
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

fn default_guidance_scale() -> f64 {
    7.5
}

fn default_num_images() -> i64 {
    1
}

fn default_num_inference_steps() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_prompt_is_required() {
        let req: GenerateRequest = serde_json::from_str(r#"{"prompt": "a cat"}"#).unwrap();

        assert_eq!(req.prompt, "a cat");
        assert_eq!(req.style, "Anime");
        assert_eq!(req.aspect_ratio, "1:1");
        assert_eq!(req.negative_prompt, "");
        assert_eq!(req.guidance_scale, 7.5);
        assert_eq!(req.num_images, 1);
        assert_eq!(req.num_inference_steps, 30);
    }

    #[test]
    fn reads_camel_case_fields() {
        let body = r#"{
            "prompt": "a lighthouse",
            "style": "Sketch",
            "aspectRatio": "16:9",
            "negativePrompt": "blurry",
            "guidanceScale": 12,
            "numImages": 4,
            "numInferenceSteps": 50
        }"#;
        let req: GenerateRequest = serde_json::from_str(body).unwrap();

        assert_eq!(req.style, "Sketch");
        assert_eq!(req.aspect_ratio, "16:9");
        assert_eq!(req.negative_prompt, "blurry");
        assert_eq!(req.guidance_scale, 12.0);
        assert_eq!(req.num_images, 4);
        assert_eq!(req.num_inference_steps, 50);
    }

    #[test]
    fn out_of_range_counts_pass_through() {
        let req: GenerateRequest = serde_json::from_str(
            r#"{"prompt": "a cat", "numImages": -1, "numInferenceSteps": 5000000000}"#,
        )
        .unwrap();

        assert_eq!(req.num_images, -1);
        assert_eq!(req.num_inference_steps, 5_000_000_000);
    }

    #[test]
    fn missing_prompt_is_rejected() {
        let res = serde_json::from_str::<GenerateRequest>(r#"{"style": "Anime"}"#);
        assert!(res.is_err());
    }
}
