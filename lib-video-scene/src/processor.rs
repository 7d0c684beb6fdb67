use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::artifact::{self, METADATA_FILE, SCENE_PROMPTS_FILE};
use crate::cache::{CacheEntry, CacheKey, CacheLookup, CacheManager, DescribeParams};
use crate::captioner::{CaptionRequest, Captioner};
use crate::metadata::{placeholder_description, SceneMetadata, SceneSet, VideoMetadata};
use crate::prompts::truncate_description;
use crate::resolver::{output_root, resolve_content_dir, sanitize_output_name, DEFAULT_OUTPUT_NAME};
use crate::scene_files::SceneDirectory;

/// 关键帧描述配置
#[derive(Debug, Clone)]
pub struct DescribeConfig {
    /// 场景检测方式（写入元数据）
    pub detection_method: String,
    /// 描述最大长度（字符）
    pub max_description_length: usize,
    /// 是否调用描述服务生成描述
    pub generate_descriptions: bool,
    /// 已有描述文件时是否重新生成
    pub regenerate: bool,
    /// 输出目录名称
    pub output_name: String,
    /// 单个文本文件写入上限（字节）
    pub max_text_bytes: usize,
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self {
            detection_method: "content".to_string(),
            max_description_length: 200,
            generate_descriptions: true,
            regenerate: false,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            max_text_bytes: 5 * 1024 * 1024,
        }
    }
}

/// 缓存中保存的运行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResult {
    pub metadata: VideoMetadata,
    pub prompts: Vec<String>,
    /// 生成时的场景集合，命中缓存时校验
    pub scene_set: SceneSet,
}

/// 处理结果
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 存放汇总产物的运行目录
    pub output_dir: PathBuf,
    /// 关键帧所在目录
    pub content_dir: PathBuf,
    /// 元数据
    pub metadata: VideoMetadata,
    /// 每个场景的提示词
    pub prompts: Vec<String>,
    /// 结果是否来自缓存
    pub from_cache: bool,
}

/// 为场景目录中的每个关键帧生成描述，并写出汇总提示词、元数据和缓存
pub async fn process_scene_directory<C: Captioner>(
    base: impl AsRef<Path>,
    captioner: &C,
    config: &DescribeConfig,
) -> Result<ProcessOutput> {
    let base = base.as_ref();
    let total_start = Instant::now();
    info!("🎬 [场景描述] 开始处理场景目录: {}", base.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. 定位关键帧目录
    let content_dir = resolve_content_dir(base)
        .with_context(|| format!("定位场景目录失败: {}", base.display()))?;
    let output_dir = output_root(&content_dir);
    let snapshot = SceneDirectory::scan(&content_dir);
    let mut scene_set = SceneSet::from_directory(&snapshot);
    if scene_set.is_empty() {
        error!("❌ [场景描述] 目录中没有关键帧: {}", content_dir.display());
        anyhow::bail!("目录中没有关键帧: {}", content_dir.display());
    }
    info!("  • 关键帧目录: {}", content_dir.display());
    info!("  • 关键帧数量: {} 个", scene_set.len());

    // 2. 查询缓存
    let params = DescribeParams {
        source_dir: base.to_path_buf(),
        content_dir: content_dir.clone(),
        detection_method: config.detection_method.clone(),
        model: captioner.model_name().to_string(),
        max_description_length: config.max_description_length,
        generate_descriptions: config.generate_descriptions,
        output_name: config.output_name.clone(),
    };
    let cache_key = params.fingerprint();
    let cache = CacheManager::new(&output_dir);
    let keyframe_count = scene_set.artifact_paths().len();
    if !config.regenerate {
        if let CacheLookup::Hit(entry) = cache.load::<DescribeResult>(&cache_key, Some(keyframe_count)) {
            match entry.payload.scene_set.validate() {
                Ok(()) if entry.payload.scene_set.len() == scene_set.len() => {
                    info!("🎉 [场景描述] 使用缓存结果，耗时: {:.2}秒", total_start.elapsed().as_secs_f64());
                    return Ok(ProcessOutput {
                        output_dir,
                        content_dir,
                        metadata: entry.payload.metadata,
                        prompts: entry.payload.prompts,
                        from_cache: true,
                    });
                }
                Ok(()) => warn!("⚠️  [缓存] 缓存的场景数量与目录不一致，重新生成"),
                Err(e) => warn!("⚠️  [缓存] 缓存的场景集合无效，重新生成: {}", e),
            }
        }
    }

    // 3. 逐个场景生成描述
    let describe_start = Instant::now();
    info!("⏳ [场景描述] 正在生成场景描述...");
    let mut generated = 0usize;
    let mut degraded = 0usize;
    for number in 1..=scene_set.len() {
        let Some(record) = scene_set.get(number) else {
            continue;
        };
        let (Some(image_path), Some(text_path)) = (record.image_path.clone(), record.description_path.clone()) else {
            continue;
        };

        // 占位描述只保留在内存和汇总产物中，不写入场景的 .txt，下次运行会重新请求
        let needs_caption = config.generate_descriptions && (config.regenerate || !text_path.is_file());
        if needs_caption {
            let request = CaptionRequest::image(&image_path, config.max_description_length);
            match captioner.caption(&request).await {
                Ok(caption) => {
                    generated += 1;
                    let description = truncate_description(&caption, config.max_description_length);
                    scene_set
                        .set_description(number, &description, config.max_text_bytes)
                        .with_context(|| format!("写入场景 {} 的描述失败", number))?;
                }
                Err(e) => {
                    warn!("⚠️  [场景描述] 场景 {} 描述失败，使用占位文本: {:#}", number, e);
                    degraded += 1;
                    scene_set.remember_description(number, &placeholder_description(number))?;
                }
            }
        } else {
            debug!("场景 {} 已有描述文件或未启用生成，跳过", number);
            let description = record.load_description();
            scene_set.remember_description(number, &description)?;
        }
    }
    let describe_duration = describe_start.elapsed();
    info!("✅ [场景描述] 场景描述完成，耗时: {:.2}秒", describe_duration.as_secs_f64());
    info!("  • 新生成: {} 个", generated);
    if degraded > 0 {
        warn!("⚠️  [场景描述] {} 个场景使用了占位描述", degraded);
    }

    // 4. 汇总提示词与元数据
    let metadata_start = Instant::now();
    let prompts: Vec<String> = (1..=scene_set.len()).map(|n| scene_set.description(n)).collect();
    artifact::write_scene_prompts(&output_dir.join(SCENE_PROMPTS_FILE), &prompts)
        .context("写入汇总提示词失败")?;

    let metadata = VideoMetadata {
        source: base.to_string_lossy().to_string(),
        output_directory_name: sanitize_output_name(&config.output_name),
        full_output_path: output_dir.clone(),
        detection_method: config.detection_method.clone(),
        model: captioner.model_name().to_string(),
        max_description_length: config.max_description_length,
        generate_descriptions: config.generate_descriptions,
        total_scenes: scene_set.len(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        scenes: scene_set
            .scenes()
            .iter()
            .zip(prompts.iter())
            .map(|(record, prompt)| SceneMetadata::from_record(record, prompt.clone()))
            .collect(),
    };
    let metadata_path = output_dir.join(METADATA_FILE);
    artifact::write_metadata(&metadata_path, &metadata)
        .map_err(|e| {
            error!("❌ [场景描述] 写入元数据文件失败: {} - {}", metadata_path.display(), e);
            anyhow::anyhow!("写入元数据文件失败: {}", e)
        })?;
    info!("✅ [场景描述] 元数据生成完成，耗时: {:.2}秒", metadata_start.elapsed().as_secs_f64());
    info!("  • 元数据文件: {}", metadata_path.display());

    // 5. 保存缓存
    if degraded == 0 {
        let artifact_paths = scene_set.artifact_paths();
        let entry = CacheEntry {
            cache_key,
            scene_count: artifact_paths.len(),
            artifact_paths,
            payload: DescribeResult {
                metadata: metadata.clone(),
                prompts: prompts.clone(),
                scene_set,
            },
        };
        cache.store(&entry);
    } else {
        info!("ℹ️  [缓存] 存在占位描述，本次结果不写入缓存");
    }

    let total_duration = total_start.elapsed();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🎉 [场景描述] 处理完成！总耗时: {:.2}秒 ({:.0}ms)",
        total_duration.as_secs_f64(),
        total_duration.as_millis());
    info!("📁 [场景描述] 输出目录: {}", output_dir.display());

    Ok(ProcessOutput {
        output_dir,
        content_dir,
        metadata,
        prompts,
        from_cache: false,
    })
}
