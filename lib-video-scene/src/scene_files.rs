use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

/// 场景文件名前缀
pub const SCENE_PREFIX: &str = "scene_";
/// 关键帧图片扩展名
pub const SCENE_IMAGE_EXT: &str = ".png";
/// 场景描述文本扩展名
pub const SCENE_TEXT_EXT: &str = ".txt";

/// 查看器支持的图片扩展名（小写，不含点）
const PAIR_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp", "tiff"];

/// 单个场景匹配到的文件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneFiles {
    /// 图片文件（字典序）
    pub images: Vec<PathBuf>,
    /// 文本文件（字典序）
    pub texts: Vec<PathBuf>,
}

impl SceneFiles {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.texts.is_empty()
    }

    pub fn image(&self) -> Option<&Path> {
        self.images.first().map(PathBuf::as_path)
    }

    pub fn text(&self) -> Option<&Path> {
        self.texts.first().map(PathBuf::as_path)
    }
}

/// 查看器使用的图片/文本配对
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenePair {
    pub filename: String,
    pub path: PathBuf,
    pub basename: String,
    pub txt_path: PathBuf,
}

/// 目录快照：一次逻辑操作只读取一次目录列表，后续匹配和计数都基于该快照
#[derive(Debug, Clone)]
pub struct SceneDirectory {
    path: PathBuf,
    /// 普通文件名，字典序
    names: Vec<String>,
}

impl SceneDirectory {
    /// 读取目录列表；目录不可读时得到空快照
    pub fn scan(dir: &Path) -> Self {
        let mut names = Vec::new();
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                    if !is_file {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
            Err(e) => {
                warn!("⚠️  [场景文件] 读取目录失败 {}: {}", dir.display(), e);
            }
        }
        names.sort();
        debug!("目录 {} 中共有 {} 个文件", dir.display(), names.len());
        Self {
            path: dir.to_path_buf(),
            names,
        }
    }

    /// 由已知文件名构造快照
    pub fn from_names<I, S>(dir: &Path, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        Self {
            path: dir.to_path_buf(),
            names,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 查找编号为 `scene_number`（从 1 开始）的场景文件
    ///
    /// 先匹配带时间戳的新命名 `scene_001_*.png`，没有任何命中再匹配旧命名
    /// `scene_001.png`；两种命名的结果不会合并。
    pub fn find_scene_files(&self, scene_number: usize) -> SceneFiles {
        let primary_prefix = format!("{}{:03}_", SCENE_PREFIX, scene_number);
        let primary = self.collect_family(|name, ext| name.starts_with(&primary_prefix) && name.ends_with(ext));
        if !primary.is_empty() {
            return primary;
        }

        let legacy_stem = format!("{}{:03}", SCENE_PREFIX, scene_number);
        self.collect_family(|name, ext| name.strip_suffix(ext) == Some(legacy_stem.as_str()))
    }

    fn collect_family<F>(&self, matches: F) -> SceneFiles
    where
        F: Fn(&str, &str) -> bool,
    {
        let pick = |ext: &str| {
            self.names
                .iter()
                .filter(|name| matches(name.as_str(), ext))
                .map(|name| self.path.join(name))
                .collect::<Vec<_>>()
        };
        SceneFiles {
            images: pick(SCENE_IMAGE_EXT),
            texts: pick(SCENE_TEXT_EXT),
        }
    }

    /// 统计场景数量
    ///
    /// 按文件名中的三位场景编号去重；一个编号都解析不出来时，退化为统计
    /// `scene_*.png` 文件数。
    pub fn count_scenes(&self) -> usize {
        let numbers: HashSet<u32> = self
            .names
            .iter()
            .filter_map(|name| parse_scene_number(name))
            .collect();
        if !numbers.is_empty() {
            return numbers.len();
        }
        self.keyframe_names().count()
    }

    /// 所有 `scene_*.png` 关键帧，字典序
    pub fn keyframes(&self) -> Vec<PathBuf> {
        self.keyframe_names().map(|name| self.path.join(name)).collect()
    }

    fn keyframe_names(&self) -> impl Iterator<Item = &String> {
        self.names
            .iter()
            .filter(|name| name.starts_with(SCENE_PREFIX) && name.ends_with(SCENE_IMAGE_EXT))
    }

    /// 找出所有带同名 `.txt` 描述文件的图片，按自然顺序排列
    pub fn image_text_pairs(&self) -> Vec<ScenePair> {
        let txt_basenames: BTreeSet<&str> = self
            .names
            .iter()
            .filter_map(|name| split_extension(name))
            .filter(|(_, ext)| ext.eq_ignore_ascii_case("txt"))
            .map(|(stem, _)| stem)
            .collect();

        let mut pairs: Vec<ScenePair> = self
            .names
            .iter()
            .filter_map(|name| {
                let (stem, ext) = split_extension(name)?;
                let ext = ext.to_ascii_lowercase();
                if !PAIR_IMAGE_EXTENSIONS.contains(&ext.as_str()) || !txt_basenames.contains(stem) {
                    return None;
                }
                Some(ScenePair {
                    filename: name.clone(),
                    path: self.path.join(name),
                    basename: stem.to_string(),
                    txt_path: self.path.join(format!("{}.txt", stem)),
                })
            })
            .collect();

        pairs.sort_by(|a, b| natural_cmp(&a.filename, &b.filename));
        pairs
    }
}

/// 便捷函数：对目录做一次快照后查找场景文件
pub fn find_scene_files(dir: &Path, scene_number: usize) -> SceneFiles {
    SceneDirectory::scan(dir).find_scene_files(scene_number)
}

/// 便捷函数：对目录做一次快照后统计场景数量
pub fn count_scenes(dir: &Path) -> usize {
    SceneDirectory::scan(dir).count_scenes()
}

/// 解析 `scene_NNN_` 或 `scene_NNN.` 开头的三位场景编号
pub fn parse_scene_number(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(SCENE_PREFIX)?;
    let bytes = rest.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes[3] != b'_' && bytes[3] != b'.' {
        return None;
    }
    rest[..3].parse().ok()
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some((&name[..dot], &name[dot + 1..]))
}

/// 自然排序：数字段按数值比较，其余部分忽略大小写
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = natural_key(a);
    let right = natural_key(b);
    left.cmp(&right)
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Text(String),
    Number(u128, usize),
}

fn natural_key(s: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    let flush = |current: &mut String, in_digits: bool, chunks: &mut Vec<Chunk>| {
        if current.is_empty() {
            return;
        }
        if in_digits {
            // 数值相同再按长度比较，保证 "01" 与 "1" 的顺序稳定
            let value = current.parse::<u128>().unwrap_or(u128::MAX);
            chunks.push(Chunk::Number(value, current.len()));
        } else {
            chunks.push(Chunk::Text(current.to_lowercase()));
        }
        current.clear();
    };

    for c in s.chars() {
        let is_digit = c.is_ascii_digit();
        if is_digit != in_digits {
            flush(&mut current, in_digits, &mut chunks);
            in_digits = is_digit;
        }
        current.push(c);
    }
    flush(&mut current, in_digits, &mut chunks);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), "x").unwrap();
        }
    }

    #[test]
    fn test_primary_pattern_wins_over_legacy() {
        let temp = tempfile::tempdir().unwrap();
        touch(
            temp.path(),
            &["scene_001_00m05s120ms.png", "scene_001_00m05s120ms.txt", "scene_001.png"],
        );

        let files = find_scene_files(temp.path(), 1);
        assert_eq!(files.images, vec![temp.path().join("scene_001_00m05s120ms.png")]);
        assert_eq!(files.texts, vec![temp.path().join("scene_001_00m05s120ms.txt")]);
    }

    #[test]
    fn test_legacy_pattern() {
        let temp = tempfile::tempdir().unwrap();
        touch(temp.path(), &["scene_002.png", "scene_002.txt", "scene_0020.png"]);

        let files = find_scene_files(temp.path(), 2);
        assert_eq!(files.image(), Some(temp.path().join("scene_002.png").as_path()));
        assert_eq!(files.text(), Some(temp.path().join("scene_002.txt").as_path()));
    }

    #[test]
    fn test_families_are_not_merged() {
        let temp = tempfile::tempdir().unwrap();
        // 新命名只有文本，旧命名有图片：仍只返回新命名的结果
        touch(temp.path(), &["scene_003_00m01s000ms.txt", "scene_003.png"]);

        let files = find_scene_files(temp.path(), 3);
        assert!(files.images.is_empty());
        assert_eq!(files.texts.len(), 1);
    }

    #[test]
    fn test_multiple_matches_sorted_and_deterministic() {
        let temp = tempfile::tempdir().unwrap();
        touch(temp.path(), &["scene_004_b.png", "scene_004_a.png"]);

        let first = find_scene_files(temp.path(), 4);
        let second = find_scene_files(temp.path(), 4);
        assert_eq!(first, second);
        assert_eq!(first.image(), Some(temp.path().join("scene_004_a.png").as_path()));
    }

    #[test]
    fn test_empty_directory() {
        let temp = tempfile::tempdir().unwrap();
        let files = find_scene_files(temp.path(), 1);
        assert!(files.images.is_empty());
        assert!(files.texts.is_empty());
        assert!(files.is_empty());
    }

    #[test]
    fn test_count_dedups_by_number() {
        let temp = tempfile::tempdir().unwrap();
        touch(temp.path(), &["scene_001_x.png", "scene_002_x.png", "scene_002_x.txt"]);
        assert_eq!(count_scenes(temp.path()), 2);
    }

    #[test]
    fn test_count_falls_back_to_png_files() {
        let dir = Path::new("/virtual");
        let snapshot = SceneDirectory::from_names(
            dir,
            ["scene_a.png", "scene_b.png", "scene_b.txt", "other.png"],
        );
        assert_eq!(snapshot.count_scenes(), 2);
    }

    #[test]
    fn test_parse_scene_number() {
        assert_eq!(parse_scene_number("scene_012_00m01s000ms.png"), Some(12));
        assert_eq!(parse_scene_number("scene_007.txt"), Some(7));
        assert_eq!(parse_scene_number("scene_0001_caption.txt"), None);
        assert_eq!(parse_scene_number("scene_12.png"), None);
        assert_eq!(parse_scene_number("shot_001.png"), None);
    }

    #[test]
    fn test_image_text_pairs_natural_order() {
        let dir = Path::new("/virtual");
        let snapshot = SceneDirectory::from_names(
            dir,
            ["shot10.jpg", "shot10.txt", "shot2.PNG", "shot2.txt", "lonely.png", "notes.txt"],
        );

        let pairs = snapshot.image_text_pairs();
        let names: Vec<&str> = pairs.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["shot2.PNG", "shot10.jpg"]);
        assert_eq!(pairs[0].txt_path, dir.join("shot2.txt"));
        assert_eq!(pairs[1].basename, "shot10");
    }

    #[test]
    fn test_keyframes_listing() {
        let dir = Path::new("/virtual");
        let snapshot = SceneDirectory::from_names(
            dir,
            ["scene_002_x.png", "scene_001_x.png", "scene_001_x.txt", "cover.png"],
        );
        assert_eq!(
            snapshot.keyframes(),
            vec![dir.join("scene_001_x.png"), dir.join("scene_002_x.png")]
        );
    }
}
