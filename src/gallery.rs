use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{KioskError, Result};
use crate::face::{Encoding, FaceEngine, face_distance};
use crate::utils;

/// 人脸匹配结果
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryMatch {
    pub identity: String,
    pub distance: f32,
}

/// 人脸图库
///
/// 目录中每个身份对应一张 `<identity>.<ext>` 图片，启动时载入为身份到特征列表的映射
pub struct GalleryStore {
    dir: PathBuf,
    encodings: RwLock<BTreeMap<String, Vec<Encoding>>>,
}

impl GalleryStore {
    /// 创建一个空图库，不扫描目录
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), encodings: RwLock::new(BTreeMap::new()) }
    }

    /// 打开图库目录并载入所有人脸特征
    pub fn open(dir: impl Into<PathBuf>, engine: &mut dyn FaceEngine) -> Result<Self> {
        let store = Self::new(dir);
        fs::create_dir_all(&store.dir)?;
        store.load(engine)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 扫描图库目录，重新计算所有图片的人脸特征
    ///
    /// 无法读取或没有人脸的图片会被跳过，返回成功载入的图片数量
    pub fn load(&self, engine: &mut dyn FaceEngine) -> Result<usize> {
        let mut map: BTreeMap<String, Vec<Encoding>> = BTreeMap::new();
        let mut loaded = 0;

        for path in self.image_files() {
            let Some(identity) = image_identity(&path) else { continue };
            let encodings = match utils::imread(&path).and_then(|img| Ok(engine.encode(&img)?)) {
                Ok(encodings) => encodings,
                Err(e) => {
                    warn!("读取图库图片失败 {}: {}", path.display(), e);
                    continue;
                }
            };
            if encodings.is_empty() {
                warn!("图库图片中没有检测到人脸: {}", path.display());
                continue;
            }
            debug!("载入 {} 个人脸特征: {}", encodings.len(), path.display());
            map.entry(identity).or_default().extend(encodings);
            loaded += 1;
        }

        info!("人脸图库载入完成：{} 张图片，{} 个身份", loaded, map.len());
        *self.write() = map;
        Ok(loaded)
    }

    /// 返回某个身份的所有特征
    pub fn encodings_for(&self, identity: &str) -> Vec<Encoding> {
        self.read().get(identity).cloned().unwrap_or_default()
    }

    /// 返回 `(身份, 特征数量)` 列表
    pub fn identities(&self) -> Vec<(String, usize)> {
        self.read().iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }

    /// 保存一张图片到图库并追加它的人脸特征
    ///
    /// 图片中没有人脸时不会留下任何文件，图库保持不变
    pub fn append(
        &self,
        identity: &str,
        ext: &str,
        bytes: &[u8],
        engine: &mut dyn FaceEngine,
    ) -> Result<PathBuf> {
        validate_identity(identity)?;
        let ext = ext.to_ascii_lowercase();
        if !utils::is_image_suffix(&ext) {
            return Err(KioskError::validation(format!("unsupported image type: {ext}")));
        }

        let image = utils::imdecode(bytes)?;
        fs::create_dir_all(&self.dir)?;
        let staging = self.dir.join(format!("{identity}.{ext}.part"));
        fs::write(&staging, bytes)?;

        let encoding = match engine.encode(&image) {
            Ok(encodings) => encodings.into_iter().next(),
            Err(e) => {
                remove_quietly(&staging);
                return Err(e.into());
            }
        };
        let Some(encoding) = encoding else {
            fs::remove_file(&staging)?;
            info!("图片中没有检测到人脸，已丢弃: {}", identity);
            return Err(KioskError::NoFaceDetected);
        };

        let target = self.dir.join(format!("{identity}.{ext}"));
        fs::rename(&staging, &target)?;
        self.remove_other_images(identity, &target);

        self.write().entry(identity.to_string()).or_default().push(encoding);
        info!("已保存人脸图片: {}", target.display());
        Ok(target)
    }

    /// 图库目录中已有图片的身份
    pub fn stored_identities(&self) -> BTreeSet<String> {
        self.image_files().iter().filter_map(|path| image_identity(path)).collect()
    }

    /// 在图库中查找与特征最接近的身份
    ///
    /// 只考虑距离不超过 `tolerance` 的特征；距离相同时取身份标识较小的一个
    pub fn best_match(&self, encoding: &[f32], tolerance: f32) -> Option<GalleryMatch> {
        let map = self.read();
        let mut best: Option<(&String, f32)> = None;
        for (identity, known) in map.iter() {
            for candidate in known {
                let distance = face_distance(candidate, encoding);
                if distance > tolerance {
                    continue;
                }
                // BTreeMap 按键有序遍历，严格小于保证相同距离时保留较小的键
                if best.is_none_or(|(_, d)| distance < d) {
                    best = Some((identity, distance));
                }
            }
        }
        best.map(|(identity, distance)| GalleryMatch { identity: identity.clone(), distance })
    }

    fn image_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// 删除同一身份的其他后缀图片，保证每个身份最多一张图片
    fn remove_other_images(&self, identity: &str, keep: &Path) {
        for path in self.image_files() {
            if path != keep && image_identity(&path).as_deref() == Some(identity) {
                debug!("删除旧图片: {}", path.display());
                remove_quietly(&path);
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<Encoding>>> {
        self.encodings.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<Encoding>>> {
        self.encodings.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// 身份标识只允许字母、数字、`-` 和 `_`
pub fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(KioskError::validation("card_id is required"));
    }
    if !identity.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(KioskError::validation(format!("invalid card_id: {identity}")));
    }
    Ok(())
}

/// 从图片路径中取出身份标识，不是图库图片时返回 None
fn image_identity(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    if !utils::is_image_suffix(ext) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_identity(stem).ok()?;
    Some(stem.to_string())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("删除文件失败 {}: {}", path.display(), e);
    }
}

#[cfg(test)]
impl GalleryStore {
    pub(crate) fn insert(&self, identity: &str, encodings: Vec<Encoding>) {
        self.write().entry(identity.to_string()).or_default().extend(encodings);
    }
}
