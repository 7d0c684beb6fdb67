use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::artifact;
use crate::error::{SceneError, SceneResult};
use crate::scene_files::{parse_scene_number, SceneDirectory, SCENE_IMAGE_EXT, SCENE_PREFIX};

/// 单个检测到的场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// 场景下标（从 0 开始）
    pub index: usize,
    /// 场景开始时间（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// 场景开始帧号（按帧检测时使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
    /// 关键帧图片
    pub image_path: Option<PathBuf>,
    /// 与图片同名的描述文件
    pub description_path: Option<PathBuf>,
    /// 已加载的描述文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SceneRecord {
    /// 对外使用的场景编号（从 1 开始）
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// 读取描述文本；文件缺失或不可读时返回 `Scene {n}`
    pub fn load_description(&self) -> String {
        self.description_path
            .as_deref()
            .and_then(|path| artifact::read_text(path).ok())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| placeholder_description(self.number()))
    }
}

/// 一次视频处理产生的全部场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSet {
    content_directory: PathBuf,
    scenes: Vec<SceneRecord>,
}

impl SceneSet {
    pub fn new(content_directory: impl Into<PathBuf>) -> Self {
        Self {
            content_directory: content_directory.into(),
            scenes: Vec::new(),
        }
    }

    /// 从目录快照重建场景集合
    ///
    /// 场景编号取自文件名中的 `scene_NNN`，编号缺失的场景没有关键帧（`image_path` 为 `None`）；
    /// 时间戳从 `scene_NNN_MMmSSsXXXms` 命名中恢复。文件名里解析不出编号时按字典序编号。
    pub fn from_directory(snapshot: &SceneDirectory) -> Self {
        let mut set = Self::new(snapshot.path());
        let keyframes = snapshot.keyframes();
        let last_number = keyframes
            .iter()
            .filter_map(|image| image.file_name().and_then(|n| n.to_str()))
            .filter_map(parse_scene_number)
            .map(|n| n as usize)
            .max()
            .unwrap_or(0);

        if last_number == 0 {
            for image in keyframes {
                let timestamp = image_timestamp(&image);
                set.push_scene(timestamp, Some(image));
            }
            return set;
        }

        for number in 1..=last_number {
            let image = snapshot.find_scene_files(number).image().map(Path::to_path_buf);
            let timestamp = image.as_deref().and_then(image_timestamp);
            set.push_scene(timestamp, image);
        }
        set
    }

    /// 追加一个场景，下标由集合分配
    pub fn push_scene(&mut self, timestamp: Option<f64>, image_path: Option<PathBuf>) -> &mut SceneRecord {
        let description_path = image_path.as_deref().map(artifact::description_path_for);
        let index = self.scenes.len();
        self.scenes.push(SceneRecord {
            index,
            timestamp,
            frame_index: None,
            image_path,
            description_path,
            description: None,
        });
        &mut self.scenes[index]
    }

    pub fn content_directory(&self) -> &Path {
        &self.content_directory
    }

    pub fn scenes(&self) -> &[SceneRecord] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// 按场景编号（从 1 开始）取场景
    pub fn get(&self, scene_number: usize) -> Option<&SceneRecord> {
        scene_number.checked_sub(1).and_then(|i| self.scenes.get(i))
    }

    /// 场景描述；未加载时从文件读取，没有文件时为 `Scene {n}`
    pub fn description(&self, scene_number: usize) -> String {
        match self.get(scene_number) {
            Some(record) => record
                .description
                .clone()
                .unwrap_or_else(|| record.load_description()),
            None => placeholder_description(scene_number),
        }
    }

    /// 用户编辑描述：覆盖写入描述文件并更新内存中的值
    pub fn set_description(&mut self, scene_number: usize, text: &str, max_bytes: usize) -> SceneResult<()> {
        let record = scene_number
            .checked_sub(1)
            .and_then(|i| self.scenes.get_mut(i))
            .ok_or_else(|| SceneError::NotFound(format!("场景 {} 不存在", scene_number)))?;
        let path = record.description_path.clone().ok_or_else(|| {
            SceneError::NotFound(format!("场景 {} 没有关键帧，无法保存描述", scene_number))
        })?;
        artifact::write_text(&path, text, max_bytes)?;
        record.description = Some(text.to_string());
        Ok(())
    }

    /// 只更新内存中的描述，不写文件
    pub fn remember_description(&mut self, scene_number: usize, text: &str) -> SceneResult<()> {
        let record = scene_number
            .checked_sub(1)
            .and_then(|i| self.scenes.get_mut(i))
            .ok_or_else(|| SceneError::NotFound(format!("场景 {} 不存在", scene_number)))?;
        record.description = Some(text.to_string());
        Ok(())
    }

    /// 所有场景的产物路径，缓存校验使用
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.scenes
            .iter()
            .filter_map(|record| record.image_path.clone())
            .collect()
    }

    /// 检查 `scenes[i].index == i`
    pub fn validate(&self) -> SceneResult<()> {
        for (i, record) in self.scenes.iter().enumerate() {
            if record.index != i {
                return Err(SceneError::InvalidInput(format!(
                    "场景下标不连续: 位置 {} 的下标为 {}",
                    i, record.index
                )));
            }
        }
        Ok(())
    }
}

/// 没有描述时使用的占位文本
pub fn placeholder_description(scene_number: usize) -> String {
    format!("Scene {}", scene_number)
}

/// 秒数格式化为 `MMmSSsXXXms`
pub fn format_timestamp_tag(timestamp_secs: f64) -> String {
    let total_ms = (timestamp_secs.max(0.0) * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}m{:02}s{:03}ms", minutes, seconds, millis)
}

/// 解析 `MMmSSsXXXms` 时间标记
pub fn parse_timestamp_tag(tag: &str) -> Option<f64> {
    let (minutes, rest) = tag.split_once('m')?;
    let (seconds, rest) = rest.split_once('s')?;
    let millis = rest.strip_suffix("ms")?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(minutes) || !all_digits(seconds) || !all_digits(millis) {
        return None;
    }
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    let millis: u64 = millis.parse().ok()?;
    let whole_seconds = minutes.checked_mul(60)?.checked_add(seconds)?;
    Some(whole_seconds as f64 + millis as f64 / 1000.0)
}

fn image_timestamp(image: &Path) -> Option<f64> {
    image.file_name().and_then(|n| n.to_str()).and_then(timestamp_from_file_name)
}

fn timestamp_from_file_name(name: &str) -> Option<f64> {
    let stem = name.strip_suffix(SCENE_IMAGE_EXT)?;
    let rest = stem.strip_prefix(SCENE_PREFIX)?;
    let (_, tag) = rest.split_once('_')?;
    parse_timestamp_tag(tag)
}

/// 单个场景的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    /// 场景下标（从 0 开始）
    pub index: usize,
    /// 场景开始时间（秒）
    pub timestamp: Option<f64>,
    /// 关键帧图片文件名
    pub image_file: String,
    /// 描述文件名
    pub description_file: String,
    /// 描述文本
    pub description: String,
    pub image_path: PathBuf,
    pub description_path: PathBuf,
}

/// 一次描述运行的汇总元数据（metadata.json）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// 场景来源（视频文件或关键帧目录）
    pub source: String,
    /// 输出目录名称
    pub output_directory_name: String,
    /// 输出目录完整路径
    pub full_output_path: PathBuf,
    /// 场景检测方式
    pub detection_method: String,
    /// 描述模型
    pub model: String,
    /// 描述最大长度
    pub max_description_length: usize,
    /// 是否生成描述
    pub generate_descriptions: bool,
    /// 场景数量
    pub total_scenes: usize,
    /// 生成时间（RFC 3339）
    pub generated_at: String,
    /// 场景列表
    pub scenes: Vec<SceneMetadata>,
}

impl SceneMetadata {
    pub fn from_record(record: &SceneRecord, description: String) -> Self {
        let image_path = record.image_path.clone().unwrap_or_default();
        let description_path = record.description_path.clone().unwrap_or_default();
        let file_name = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        Self {
            index: record.index,
            timestamp: record.timestamp,
            image_file: file_name(&image_path),
            description_file: file_name(&description_path),
            description,
            image_path,
            description_path,
        }
    }
}

/// 单个场景视频的字幕元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSceneMetadata {
    pub index: usize,
    pub video_path: PathBuf,
    pub video_filename: String,
    /// 前端播放地址
    pub video_url: Option<String>,
    pub caption: String,
    pub caption_file: String,
    pub caption_filepath: PathBuf,
    /// 生成方式：captioner / placeholder
    pub method: String,
}

/// 字幕运行的汇总元数据（scene_captions/metadata.json）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionMetadata {
    pub base_directory: PathBuf,
    pub captions_directory: PathBuf,
    pub model: String,
    pub sampling_interval: f64,
    pub max_frames: usize,
    pub max_description_length: usize,
    pub total_scenes: usize,
    pub generated_at: String,
    pub scenes: Vec<CaptionSceneMetadata>,
}
