use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{SceneError, SceneResult};

/// 汇总提示词文件名
pub const SCENE_PROMPTS_FILE: &str = "scene_prompts.txt";
/// 节点直接输出的提示词文件名（旧版节点写在关键帧目录中）
pub const PROMPTS_TEXT_FILE: &str = "prompts_text.txt";
/// 运行元数据文件名
pub const METADATA_FILE: &str = "metadata.json";

/// 读取文本文件
pub fn read_text(path: &Path) -> SceneResult<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SceneError::NotFound(
            format!("文件不存在: {}", path.display()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Err(SceneError::InvalidInput(
            format!("文件不是有效的 UTF-8 文本: {}", path.display()),
        )),
        Err(e) => Err(SceneError::Io(e)),
    }
}

/// 写入文本文件，超过 `max_bytes` 的内容直接拒绝
///
/// 先写临时文件再重命名，读者不会看到写了一半的文件。
pub fn write_text(path: &Path, content: &str, max_bytes: usize) -> SceneResult<()> {
    if content.len() > max_bytes {
        return Err(SceneError::InvalidInput(format!(
            "内容过大: {} 字节，上限 {} 字节",
            content.len(),
            max_bytes
        )));
    }
    write_atomic(path, content.as_bytes())
}

/// 读取 JSON 元数据
pub fn read_metadata<T: DeserializeOwned>(path: &Path) -> SceneResult<T> {
    let raw = read_text(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// 写入 JSON 元数据（格式化输出）
pub fn write_metadata<T: Serialize>(path: &Path, doc: &T) -> SceneResult<()> {
    let json = serde_json::to_string_pretty(doc)?;
    write_atomic(path, json.as_bytes())
}

/// 写入汇总提示词文件，每个场景一段 `Scene N: <text>`
pub fn write_scene_prompts(path: &Path, prompts: &[String]) -> SceneResult<()> {
    let mut content = String::new();
    for (i, prompt) in prompts.iter().enumerate() {
        content.push_str(&format!("Scene {}: {}\n\n", i + 1, prompt));
    }
    write_atomic(path, content.as_bytes())
}

/// 与图片同名的描述文件路径
pub fn description_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension("txt")
}

/// 字幕文件名（场景下标从 0 开始）
pub fn caption_file_name(index: usize) -> String {
    format!("scene_{:04}_caption.txt", index)
}

/// 根据文件内容（优先）或扩展名推断图片的 Content-Type
pub fn image_content_type(path: &Path, bytes: &[u8]) -> &'static str {
    let format = image::guess_format(bytes).ok().or_else(|| {
        path.extension()
            .and_then(|ext| image::ImageFormat::from_extension(ext))
    });
    match format {
        Some(image::ImageFormat::Png) => "image/png",
        Some(image::ImageFormat::Jpeg) => "image/jpeg",
        Some(image::ImageFormat::Gif) => "image/gif",
        Some(image::ImageFormat::Bmp) => "image/bmp",
        Some(image::ImageFormat::WebP) => "image/webp",
        Some(image::ImageFormat::Tiff) => "image/tiff",
        _ => "application/octet-stream",
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> SceneResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_path_for(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("⚠️  [产物] 清理临时文件失败 {}: {}", tmp_path.display(), cleanup);
            }
        }
        return Err(SceneError::Io(e));
    }

    debug!("已写入: {} ({} 字节)", path.display(), bytes.len());
    Ok(())
}

/// 同目录下的临时文件，保证 rename 不跨文件系统
fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}
