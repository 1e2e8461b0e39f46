//! 会话容器：按标签存取的二进制数据块

use std::path::Path;

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;

/// 会话容器中的数据块标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkTag {
    PatchInfo,
}

/// 引擎读写会话数据块所需的接口
pub trait SessionFile {
    fn write_chunk(&mut self, tag: ChunkTag, data: &[u8]);

    /// 没有该数据块时返回 None
    fn read_chunk(&self, tag: ChunkTag) -> Option<Vec<u8>>;

    fn set_can_reload(&mut self, can_reload: bool);

    fn write_patch_info(&mut self, data: &[u8]) {
        self.write_chunk(ChunkTag::PatchInfo, data)
    }

    fn read_patch_info(&self) -> Option<Vec<u8>> {
        self.read_chunk(ChunkTag::PatchInfo)
    }
}

#[derive(Debug, Clone)]
pub struct MemorySessionFile {
    chunks: FxHashMap<ChunkTag, Vec<u8>>,
    can_reload: bool,
}

impl Default for MemorySessionFile {
    fn default() -> Self {
        Self {
            chunks: FxHashMap::default(),
            can_reload: true,
        }
    }
}

impl MemorySessionFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从磁盘读入单独导出的补丁数据块
    pub fn from_patch_info_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(&path)
            .with_context(|| format!("无法读取补丁数据块: {:?}", path.as_ref().as_os_str()))?;
        let mut file = Self::new();
        file.write_patch_info(&data);
        Ok(file)
    }

    pub fn can_reload(&self) -> bool {
        self.can_reload
    }
}

impl SessionFile for MemorySessionFile {
    fn write_chunk(&mut self, tag: ChunkTag, data: &[u8]) {
        self.chunks.insert(tag, data.to_vec());
    }

    fn read_chunk(&self, tag: ChunkTag) -> Option<Vec<u8>> {
        self.chunks.get(&tag).cloned()
    }

    fn set_can_reload(&mut self, can_reload: bool) {
        self.can_reload = can_reload;
    }
}
