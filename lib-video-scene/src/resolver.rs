use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{SceneError, SceneResult};

/// 关键帧子目录的约定名称
pub const KEYFRAMES_SUBDIR: &str = "keyframes";
/// 默认的场景输出目录名称
pub const DEFAULT_OUTPUT_NAME: &str = "scene_outputs";
/// 字幕子目录名称
pub const CAPTIONS_SUBDIR: &str = "scene_captions";

/// 定位实际存放场景文件的目录
///
/// 优先使用 `base/keyframes`，其次是 `base` 本身；两者都不存在时返回 `NotFound`。
pub fn resolve_content_dir(base: &Path) -> SceneResult<PathBuf> {
    let keyframes = base.join(KEYFRAMES_SUBDIR);
    if keyframes.is_dir() {
        debug!("使用关键帧子目录: {}", keyframes.display());
        return Ok(keyframes);
    }
    if base.exists() {
        debug!("使用目录本身: {}", base.display());
        return Ok(base.to_path_buf());
    }
    Err(SceneError::NotFound(format!(
        "场景目录不存在: {}",
        base.display()
    )))
}

/// 存放汇总产物（scene_prompts.txt、metadata.json、缓存）的运行目录
pub fn output_root(content_dir: &Path) -> PathBuf {
    match (content_dir.file_name(), content_dir.parent()) {
        (Some(name), Some(parent)) if name == KEYFRAMES_SUBDIR => parent.to_path_buf(),
        _ => content_dir.to_path_buf(),
    }
}

/// 清理输出目录名称，保证在常见文件系统上可用
pub fn sanitize_output_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if "<>:\"/\\|?*".contains(c) { '_' } else { c })
        .collect();
    let mut trimmed = replaced.trim_matches(|c| c == '.' || c == ' ').to_string();
    if trimmed.len() > 255 {
        let mut cut = 255;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        trimmed.truncate(cut);
    }
    if trimmed.is_empty() {
        DEFAULT_OUTPUT_NAME.to_string()
    } else {
        trimmed
    }
}

/// 计算字幕流程的基准目录
///
/// 用户提供且存在的场景输出路径优先（不以 `scene_outputs` 结尾时追加该子目录），
/// 否则落在 `output_root/scene_outputs`。
pub fn captions_base(output_root: &Path, scenes_output: Option<&Path>) -> PathBuf {
    match scenes_output {
        Some(path) if !path.as_os_str().is_empty() && path.exists() => {
            if path.ends_with(DEFAULT_OUTPUT_NAME) {
                path.to_path_buf()
            } else {
                path.join(DEFAULT_OUTPUT_NAME)
            }
        }
        _ => output_root.join(DEFAULT_OUTPUT_NAME),
    }
}

/// 字幕文件所在目录
pub fn captions_dir(base: &Path) -> PathBuf {
    base.join(CAPTIONS_SUBDIR)
}
