use std::fmt;
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::artifact;
use crate::error::SceneResult;

/// 指纹长度（十六进制字符数）
const FINGERPRINT_LEN: usize = 16;

/// 参数指纹：SHA-1 十六进制的前 16 个字符
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// 对固定顺序的 `name=value` 行计算指纹
    pub fn compute(parts: &[(&str, String)]) -> Self {
        let mut hasher = Sha1::new();
        for (name, value) in parts {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_LEN);
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 参与缓存指纹计算的参数集合
pub trait CacheKey {
    /// 所有影响结果的参数，顺序固定
    fn key_parts(&self) -> Vec<(&'static str, String)>;

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.key_parts())
    }
}

/// 关键帧描述运行的参数
#[derive(Debug, Clone, PartialEq)]
pub struct DescribeParams {
    pub source_dir: PathBuf,
    pub content_dir: PathBuf,
    pub detection_method: String,
    pub model: String,
    pub max_description_length: usize,
    pub generate_descriptions: bool,
    pub output_name: String,
}

impl CacheKey for DescribeParams {
    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![
            ("source_dir", self.source_dir.display().to_string()),
            ("content_dir", self.content_dir.display().to_string()),
            ("detection_method", self.detection_method.clone()),
            ("model", self.model.clone()),
            ("max_description_length", self.max_description_length.to_string()),
            ("generate_descriptions", self.generate_descriptions.to_string()),
            ("output_name", self.output_name.clone()),
        ]
    }
}

/// 场景视频字幕运行的参数
///
/// 每个视频路径都参与指纹计算，视频列表变化即视为新的运行。
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionParams {
    pub video_paths: Vec<PathBuf>,
    pub model: String,
    pub sampling_interval: f64,
    pub max_frames: usize,
    pub max_description_length: usize,
    pub base_dir: PathBuf,
}

impl CacheKey for CaptionParams {
    fn key_parts(&self) -> Vec<(&'static str, String)> {
        let mut parts = vec![("video_count", self.video_paths.len().to_string())];
        for path in &self.video_paths {
            parts.push(("video", path.display().to_string()));
        }
        parts.push(("model", self.model.clone()));
        parts.push(("sampling_interval", self.sampling_interval.to_string()));
        parts.push(("max_frames", self.max_frames.to_string()));
        parts.push(("max_description_length", self.max_description_length.to_string()));
        parts.push(("base_dir", self.base_dir.display().to_string()));
        parts
    }
}

/// 缓存文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub cache_key: Fingerprint,
    pub scene_count: usize,
    /// 每个场景的主产物（关键帧或字幕文件）
    pub artifact_paths: Vec<PathBuf>,
    pub payload: T,
}

/// 缓存查询结果，未命中不是错误
#[derive(Debug)]
pub enum CacheLookup<T> {
    Hit(CacheEntry<T>),
    Miss(String),
}

impl<T> CacheLookup<T> {
    pub fn hit(self) -> Option<CacheEntry<T>> {
        match self {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Miss(_) => None,
        }
    }
}

/// 缓存文件名
pub fn cache_file_path(dir: &Path, key: &Fingerprint) -> PathBuf {
    dir.join(format!("cache_{}.json", key))
}

/// 某个输出目录下的运行结果缓存
///
/// 缓存文件不会被自动清理。
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 读取并校验缓存；`expected_count` 给出时场景数量也必须一致
    pub fn load<T: DeserializeOwned>(&self, key: &Fingerprint, expected_count: Option<usize>) -> CacheLookup<T> {
        let path = cache_file_path(&self.dir, key);
        let lookup = self.lookup(&path, key, expected_count);
        match &lookup {
            CacheLookup::Hit(entry) => {
                info!("✅ [缓存] 命中 {}，共 {} 个场景", path.display(), entry.scene_count);
            }
            CacheLookup::Miss(reason) => {
                info!("ℹ️  [缓存] 未命中 {}: {}", key, reason);
            }
        }
        lookup
    }

    fn lookup<T: DeserializeOwned>(&self, path: &Path, key: &Fingerprint, expected_count: Option<usize>) -> CacheLookup<T> {
        if !path.is_file() {
            return CacheLookup::Miss("缓存文件不存在".to_string());
        }
        let entry: CacheEntry<T> = match artifact::read_metadata(path) {
            Ok(entry) => entry,
            Err(e) => return CacheLookup::Miss(format!("缓存文件无法解析: {}", e)),
        };
        if &entry.cache_key != key {
            return CacheLookup::Miss(format!("缓存键不一致: {}", entry.cache_key));
        }
        if entry.scene_count != entry.artifact_paths.len() {
            return CacheLookup::Miss(format!(
                "场景数量 {} 与记录的产物数量 {} 不一致",
                entry.scene_count,
                entry.artifact_paths.len()
            ));
        }
        if let Some(expected) = expected_count {
            if entry.scene_count != expected {
                return CacheLookup::Miss(format!(
                    "场景数量 {} 与期望的 {} 不一致",
                    entry.scene_count, expected
                ));
            }
        }
        match entry.artifact_paths.first() {
            None => CacheLookup::Miss("缓存中没有产物路径".to_string()),
            Some(first) if !first.exists() => {
                CacheLookup::Miss(format!("产物已被删除: {}", first.display()))
            }
            Some(_) => CacheLookup::Hit(entry),
        }
    }

    /// 写入缓存文件
    pub fn save<T: Serialize>(&self, entry: &CacheEntry<T>) -> SceneResult<PathBuf> {
        let path = cache_file_path(&self.dir, &entry.cache_key);
        artifact::write_metadata(&path, entry)?;
        Ok(path)
    }

    /// 写入缓存，失败只记录日志；返回是否已持久化
    pub fn store<T: Serialize>(&self, entry: &CacheEntry<T>) -> bool {
        match self.save(entry) {
            Ok(path) => {
                info!("💾 [缓存] 已保存: {}", path.display());
                true
            }
            Err(e) => {
                warn!("⚠️  [缓存] 保存失败，本次结果未持久化: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe_params() -> DescribeParams {
        DescribeParams {
            source_dir: PathBuf::from("/runs/a"),
            content_dir: PathBuf::from("/runs/a/keyframes"),
            detection_method: "content".to_string(),
            model: "captioner".to_string(),
            max_description_length: 200,
            generate_descriptions: true,
            output_name: "scene_outputs".to_string(),
        }
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = describe_params().fingerprint();
        let b = describe_params().fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_sensitive_to_each_parameter() {
        let base = describe_params().fingerprint();

        let mut changed = describe_params();
        changed.max_description_length = 201;
        assert_ne!(base, changed.fingerprint());

        let mut changed = describe_params();
        changed.generate_descriptions = false;
        assert_ne!(base, changed.fingerprint());

        let mut changed = describe_params();
        changed.content_dir = PathBuf::from("/runs/a");
        assert_ne!(base, changed.fingerprint());
    }

    #[test]
    fn test_caption_fingerprint_covers_every_video() {
        let params = |paths: &[&str]| CaptionParams {
            video_paths: paths.iter().map(PathBuf::from).collect(),
            model: "captioner".to_string(),
            sampling_interval: 1.0,
            max_frames: 8,
            max_description_length: 200,
            base_dir: PathBuf::from("/out"),
        };
        let a = params(&["/v/1.mp4", "/v/2.mp4"]).fingerprint();
        let b = params(&["/v/1.mp4", "/v/3.mp4"]).fingerprint();
        let c = params(&["/v/2.mp4", "/v/1.mp4"]).fingerprint();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_roundtrip_and_miss_on_deleted_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let image = temp.path().join("scene_001_00m00s000ms.png");
        std::fs::write(&image, "png").unwrap();

        let key = describe_params().fingerprint();
        let manager = CacheManager::new(temp.path());
        let entry = CacheEntry {
            cache_key: key.clone(),
            scene_count: 1,
            artifact_paths: vec![image.clone()],
            payload: vec!["a red car".to_string()],
        };
        assert!(manager.store(&entry));
        assert!(cache_file_path(temp.path(), &key).is_file());

        let hit: CacheLookup<Vec<String>> = manager.load(&key, Some(1));
        assert_eq!(hit.hit().map(|e| e.payload), Some(vec!["a red car".to_string()]));

        let wrong_count: CacheLookup<Vec<String>> = manager.load(&key, Some(2));
        assert!(matches!(wrong_count, CacheLookup::Miss(_)));

        std::fs::remove_file(&image).unwrap();
        let miss: CacheLookup<Vec<String>> = manager.load(&key, None);
        assert!(matches!(miss, CacheLookup::Miss(_)));
    }

    #[test]
    fn test_missing_and_malformed_are_misses() {
        let temp = tempfile::tempdir().unwrap();
        let key = describe_params().fingerprint();
        let manager = CacheManager::new(temp.path());

        let missing: CacheLookup<serde_json::Value> = manager.load(&key, None);
        assert!(matches!(missing, CacheLookup::Miss(_)));

        std::fs::write(cache_file_path(temp.path(), &key), "{broken").unwrap();
        let malformed: CacheLookup<serde_json::Value> = manager.load(&key, None);
        assert!(matches!(malformed, CacheLookup::Miss(_)));
    }
}
