use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::access::normalize_path;
use crate::artifact::{self, METADATA_FILE};
use crate::cache::{CacheEntry, CacheKey, CacheManager, CaptionParams};
use crate::captioner::{CaptionRequest, Captioner, FrameSampling};
use crate::metadata::{placeholder_description, CaptionMetadata, CaptionSceneMetadata};
use crate::prompts::truncate_description;
use crate::resolver::{captions_base, captions_dir};

/// 支持的视频扩展名（小写，不含点）
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "flv", "wmv"];

/// 前端播放视频的接口
pub const READ_VIDEO_ROUTE: &str = "/video_scene/viewer/read_video";

/// 路径作为查询参数时只保留字母数字和 `-_.~`
const PATH_QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// 场景视频字幕配置
#[derive(Debug, Clone)]
pub struct CaptionConfig {
    /// 默认输出根目录
    pub output_root: PathBuf,
    /// 场景提取节点的输出目录（存在时优先）
    pub scenes_output: Option<PathBuf>,
    /// 抽帧间隔（秒）
    pub sampling_interval: f64,
    /// 每个视频最多抽取的帧数
    pub max_frames: usize,
    pub max_description_length: usize,
    /// 选中的场景（从 1 开始）
    pub selected_scene: usize,
    pub use_cache: bool,
    pub max_text_bytes: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            scenes_output: None,
            sampling_interval: 1.0,
            max_frames: 8,
            max_description_length: 200,
            selected_scene: 1,
            use_cache: true,
            max_text_bytes: 5 * 1024 * 1024,
        }
    }
}

/// 缓存中保存的字幕结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResult {
    pub captions: Vec<String>,
    pub metadata: CaptionMetadata,
}

/// 字幕运行结果
#[derive(Debug, Clone, Serialize)]
pub struct CaptionOutput {
    pub base_dir: PathBuf,
    pub captions_dir: PathBuf,
    pub video_paths: Vec<PathBuf>,
    pub video_urls: Vec<Option<String>>,
    pub captions: Vec<String>,
    pub metadata: CaptionMetadata,
    /// 实际选中的场景（从 1 开始），没有字幕时为 0
    pub selected_scene: usize,
    pub selected_caption: String,
    pub from_cache: bool,
}

/// 递归查找视频文件，按路径排序
pub fn find_video_files(dir: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_video_file(path))
        .collect();
    videos.sort();
    videos
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 前端播放地址；文件不存在时为 `None`
pub fn video_url(video_path: &Path) -> Option<String> {
    let absolute = normalize_path(video_path)?;
    if !absolute.is_file() {
        return None;
    }
    let encoded = utf8_percent_encode(&absolute.to_string_lossy(), PATH_QUERY).to_string();
    Some(format!("{}?filepath={}", READ_VIDEO_ROUTE, encoded))
}

/// 为场景视频生成字幕并写出 `scene_captions/` 产物
///
/// 未给出视频时先在 `<base>/videos` 中查找，没有该目录再查找 `<base>` 本身。
pub async fn caption_scene_videos<C: Captioner>(
    videos: &[PathBuf],
    captioner: &C,
    config: &CaptionConfig,
) -> Result<CaptionOutput> {
    let total_start = Instant::now();
    let base_dir = captions_base(&config.output_root, config.scenes_output.as_deref());
    let captions_dir = captions_dir(&base_dir);
    std::fs::create_dir_all(&captions_dir)
        .with_context(|| format!("创建字幕目录失败: {}", captions_dir.display()))?;
    info!("🎬 [场景字幕] 开始生成字幕，输出目录: {}", captions_dir.display());

    let video_paths: Vec<PathBuf> = if videos.is_empty() {
        let videos_dir = base_dir.join("videos");
        let search_dir = if videos_dir.is_dir() { &videos_dir } else { &base_dir };
        let found = find_video_files(search_dir);
        info!("  • 在 {} 中找到 {} 个视频", search_dir.display(), found.len());
        found
    } else {
        videos.iter().filter(|p| p.exists()).cloned().collect()
    };

    let mut metadata = CaptionMetadata {
        base_directory: base_dir.clone(),
        captions_directory: captions_dir.clone(),
        model: captioner.model_name().to_string(),
        sampling_interval: config.sampling_interval,
        max_frames: config.max_frames,
        max_description_length: config.max_description_length,
        total_scenes: video_paths.len(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        scenes: Vec::new(),
    };

    if video_paths.is_empty() {
        warn!("⚠️  [场景字幕] 没有找到可用的视频文件");
        return Ok(CaptionOutput {
            base_dir,
            captions_dir,
            video_paths,
            video_urls: Vec::new(),
            captions: Vec::new(),
            metadata,
            selected_scene: 0,
            selected_caption: String::new(),
            from_cache: false,
        });
    }

    let video_urls: Vec<Option<String>> = video_paths.iter().map(|p| video_url(p)).collect();

    let params = CaptionParams {
        video_paths: video_paths.clone(),
        model: captioner.model_name().to_string(),
        sampling_interval: config.sampling_interval,
        max_frames: config.max_frames,
        max_description_length: config.max_description_length,
        base_dir: base_dir.clone(),
    };
    let cache_key = params.fingerprint();
    let cache = CacheManager::new(&captions_dir);

    let cached = if config.use_cache {
        cache.load::<CaptionResult>(&cache_key, Some(video_paths.len())).hit()
    } else {
        None
    };

    let (captions, from_cache) = match cached {
        Some(entry) => {
            metadata = entry.payload.metadata;
            (entry.payload.captions, true)
        }
        None => {
            let mut captions = Vec::with_capacity(video_paths.len());
            let mut caption_files = Vec::with_capacity(video_paths.len());
            let sampling = FrameSampling {
                interval_secs: config.sampling_interval,
                max_frames: config.max_frames,
            };
            for (i, video_path) in video_paths.iter().enumerate() {
                info!("⏳ [场景字幕] 处理场景 {}/{}: {}", i + 1, video_paths.len(), video_path.display());
                let request = CaptionRequest::video(video_path, config.max_description_length, sampling);
                let (caption, method) = match captioner.caption(&request).await {
                    Ok(text) => (truncate_description(text.trim(), config.max_description_length), "captioner"),
                    Err(e) => {
                        warn!("⚠️  [场景字幕] 场景 {} 生成失败，使用占位文本: {:#}", i + 1, e);
                        (placeholder_description(i + 1), "placeholder")
                    }
                };

                let caption_file = artifact::caption_file_name(i);
                let caption_filepath = captions_dir.join(&caption_file);
                artifact::write_text(&caption_filepath, &format!("{}\n", caption), config.max_text_bytes)
                    .with_context(|| format!("写入字幕文件失败: {}", caption_filepath.display()))?;

                metadata.scenes.push(CaptionSceneMetadata {
                    index: i,
                    video_path: video_path.clone(),
                    video_filename: video_path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    video_url: video_urls[i].clone(),
                    caption: caption.clone(),
                    caption_file,
                    caption_filepath: caption_filepath.clone(),
                    method: method.to_string(),
                });
                captions.push(caption);
                caption_files.push(caption_filepath);
            }

            if config.use_cache {
                cache.store(&CacheEntry {
                    cache_key,
                    scene_count: captions.len(),
                    artifact_paths: caption_files,
                    payload: CaptionResult {
                        captions: captions.clone(),
                        metadata: metadata.clone(),
                    },
                });
            }
            (captions, false)
        }
    };

    let metadata_path = captions_dir.join(METADATA_FILE);
    artifact::write_metadata(&metadata_path, &metadata).context("写入字幕元数据失败")?;

    let selected_scene = if (1..=captions.len()).contains(&config.selected_scene) {
        config.selected_scene
    } else {
        1
    };
    let selected_caption = captions.get(selected_scene - 1).cloned().unwrap_or_default();

    info!("🎉 [场景字幕] 完成！共 {} 条字幕，耗时: {:.2}秒",
        captions.len(),
        total_start.elapsed().as_secs_f64());

    Ok(CaptionOutput {
        base_dir,
        captions_dir,
        video_paths,
        video_urls,
        captions,
        metadata,
        selected_scene,
        selected_caption,
        from_cache,
    })
}
