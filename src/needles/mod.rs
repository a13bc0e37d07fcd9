pub mod matching;

pub use matching::{best_match, find_matches, pixel_color, NeedleMatch, Region};

use crate::errors::SessionResult;
use crate::utils::{read_unpoisoned, write_unpoisoned};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

const NEEDLE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 一个目录下的全部模板图片，键为文件名（不含扩展名）
#[derive(Debug, Default)]
pub struct NeedleSet {
    images: HashMap<String, RgbaImage>,
}

impl NeedleSet {
    pub fn get(&self, name: &str) -> Option<&RgbaImage> {
        self.images.get(name)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

/// 进程级模板缓存，加载后只读，多个自动化实例共享
#[derive(Default)]
pub struct NeedleCache {
    sets: RwLock<HashMap<PathBuf, Arc<NeedleSet>>>,
}

impl NeedleCache {
    /// 读取并缓存一个目录。目录不存在时返回空集合但不缓存，之后创建目录仍然可以加载。
    pub fn load(&self, folder: &Path) -> SessionResult<Arc<NeedleSet>> {
        if !folder.is_dir() {
            warn!("findimg folder not found: {:?}", folder);
            return Ok(Arc::new(NeedleSet::default()));
        }
        let key = folder.canonicalize().unwrap_or_else(|_| folder.to_path_buf());
        if let Some(set) = read_unpoisoned(&self.sets).get(&key) {
            return Ok(Arc::clone(set));
        }
        let mut sets = write_unpoisoned(&self.sets);
        if let Some(set) = sets.get(&key) {
            return Ok(Arc::clone(set));
        }
        let set = Arc::new(load_folder(folder)?);
        sets.insert(key, Arc::clone(&set));
        Ok(set)
    }

    pub fn clear(&self) {
        write_unpoisoned(&self.sets).clear();
    }
}

fn load_folder(folder: &Path) -> SessionResult<NeedleSet> {
    let mut images = HashMap::new();
    info!("Loading shared assets from {:?}", folder);
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| NEEDLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match image::open(&path) {
            Ok(image) => {
                images.insert(name.to_string(), image.into_rgba8());
            }
            Err(e) => warn!("skipping unreadable needle {:?}: {}", path, e),
        }
    }
    info!("Loaded {} needle images (shared)", images.len());
    Ok(NeedleSet { images })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_images_once() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::new(4, 4).save(dir.path().join("button_ok.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let cache = NeedleCache::default();
        let first = cache.load(dir.path()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.get("button_ok").unwrap().dimensions(), (4, 4));

        let second = cache.load(dir.path()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_folder_is_empty() {
        let cache = NeedleCache::default();
        let set = cache.load(Path::new("/definitely/not/here")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_folder_created_later_is_loaded() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("findimg");
        let cache = NeedleCache::default();
        assert!(cache.load(&folder).unwrap().is_empty());

        std::fs::create_dir(&folder).unwrap();
        RgbaImage::new(3, 3).save(folder.join("coin.png")).unwrap();
        assert_eq!(cache.load(&folder).unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::new(4, 4).save(dir.path().join("good.png")).unwrap();
        std::fs::write(dir.path().join("broken.png"), b"\x89PNG garbage").unwrap();

        let set = NeedleCache::default().load(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("good").is_some());
        assert!(set.get("broken").is_none());
    }
}
