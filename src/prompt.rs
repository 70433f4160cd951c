//! 请求适配：风格 -> 提示词后缀，画幅比例 -> 像素尺寸

use crate::types::GenerateRequest;

pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_HEIGHT: u32 = 512;

/// 风格表，进程内只读
const STYLE_CATALOG: &[(&str, &str)] = &[
    ("Anime", "anime style, vibrant colors, studio ghibli, makoto shinkai"),
    ("Realistic", "photorealistic, 8k, highly detailed, cinematic lighting"),
    ("Sketch", "pencil sketch, rough lines, black and white"),
    ("Oil Painting", "oil painting, textured strokes, impressionist"),
    ("Cyberpunk", "cyberpunk, neon lights, futuristic city, sci-fi"),
    ("Pixel Art", "pixel art, 16-bit, retro game style"),
];

/// 未知风格返回空串，不报错
pub fn style_suffix(style: &str) -> &'static str {
    STYLE_CATALOG
        .iter()
        .find(|(name, _)| *name == style)
        .map(|(_, suffix)| *suffix)
        .unwrap_or("")
}

pub fn full_prompt(prompt: &str, style: &str) -> String {
    format!("{}, {}", prompt, style_suffix(style))
}

/// Stable Diffusion 要求宽高是 8 的倍数（向下取整）
pub fn align_to_8(px: u32) -> u32 {
    (px / 8) * 8
}

/// 返回 (width, height)
pub fn dimensions_for(aspect_ratio: &str) -> (u32, u32) {
    let (width, height) = match aspect_ratio {
        "3:4" => (384, 512),
        "16:9" => (512, 288),
        _ => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
    };
    (align_to_8(width), align_to_8(height))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub full_prompt: String,
    pub width: u32,
    pub height: u32,
}

pub fn resolve(req: &GenerateRequest) -> ResolvedRequest {
    let (width, height) = dimensions_for(&req.aspect_ratio);
    ResolvedRequest {
        full_prompt: full_prompt(&req.prompt, &req.style),
        width,
        height,
    }
}
