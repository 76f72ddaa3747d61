use std::path::Path;
use std::sync::LazyLock;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use opencv::core::Vector;
use opencv::imgcodecs;
use opencv::prelude::*;
use regex::Regex;

use crate::error::{KioskError, Result};

/// 人脸图库支持的图片后缀
static IMAGE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(jpe?g|png)$").expect("failed to build regex"));

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/(?<ext>[a-zA-Z0-9.+-]+);base64,").expect("failed to build regex")
});

/// 判断后缀名是否为支持的图片格式
pub fn is_image_suffix(ext: &str) -> bool {
    IMAGE_SUFFIX.is_match(ext)
}

/// 以彩色模式读取图片
pub fn imread(path: &Path) -> Result<Mat> {
    let img = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(KioskError::validation(format!("cannot read image {}", path.display())));
    }
    Ok(img)
}

/// 从内存中解码图片
pub fn imdecode(bytes: &[u8]) -> Result<Mat> {
    let buf = Vector::<u8>::from_slice(bytes);
    let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(KioskError::validation("unsupported or corrupt image data"));
    }
    Ok(img)
}

/// 将图片编码为 JPEG
pub fn imencode_jpeg(image: &Mat, quality: i32) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    if !imgcodecs::imencode(".jpg", image, &mut buf, &params)? {
        return Err(anyhow::anyhow!("JPEG 编码失败").into());
    }
    Ok(buf.to_vec())
}

/// 解析 base64 图片，可以带有 `data:image/<ext>;base64,` 前缀
///
/// 返回 `(后缀名, 图片数据)`，没有前缀时默认为 jpg
pub fn decode_data_url(data: &str) -> Result<(String, Vec<u8>)> {
    let data = data.trim();
    let (ext, payload) = match DATA_URL.captures(data) {
        Some(captures) => {
            let ext = match captures["ext"].to_ascii_lowercase().as_str() {
                "jpeg" | "jpg" => "jpg".to_string(),
                other => other.to_string(),
            };
            (ext, &data[captures.get(0).map_or(0, |m| m.end())..])
        }
        None => ("jpg".to_string(), data),
    };
    if !is_image_suffix(&ext) {
        return Err(KioskError::validation(format!("unsupported image type: {ext}")));
    }
    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| KioskError::validation(format!("invalid base64 image data: {e}")))?;
    if bytes.is_empty() {
        return Err(KioskError::validation("image data is empty"));
    }
    Ok((ext, bytes))
}
