//! 帧缓冲设备：映射为一段平坦显存
//!
//! 显存按客户机字节序保存，每次写入都把触及的范围并入脏区，
//! 由显示端取走后重绘。

use std::ops::Range;

use mmio_trait::{DeviceError, MmioDevice};

pub struct FrameBuffer {
    name: String,
    base: u32,
    vram: Vec<u8>,
    /// 脏区，相对显存起点的字节范围 [start, end)
    dirty: Option<(usize, usize)>,
}

impl FrameBuffer {
    pub fn new(name: String, base: u32, size: u32) -> Self {
        Self {
            name,
            base,
            vram: vec![0; size as usize],
            dirty: None,
        }
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    /// 取走并清除当前脏区，可直接用于索引 [`vram`](Self::vram)
    pub fn take_dirty(&mut self) -> Option<Range<usize>> {
        self.dirty.take().map(|(start, end)| start..end)
    }

    fn mark_dirty(&mut self, offset: usize, len: usize) {
        let end = offset + len;
        self.dirty = Some(match self.dirty {
            Some((s, e)) => (s.min(offset), e.max(end)),
            None => (offset, end),
        });
    }

    fn offset(&self, addr: u32, size: usize) -> Result<usize, DeviceError> {
        if !matches!(size, 1 | 2 | 4) {
            return Err(DeviceError::Unsupported(format!(
                "{} 只支持 1/2/4 字节访问, 实际 {}",
                self.name, size
            )));
        }
        if !self.contains(addr, size) {
            return Err(DeviceError::Access(format!(
                "{} 地址越界: {:#x}",
                self.name, addr
            )));
        }
        Ok((addr - self.base) as usize)
    }
}

impl MmioDevice for FrameBuffer {
    fn read(&mut self, addr: u32, size: usize) -> Result<Vec<u8>, DeviceError> {
        let offset = self.offset(addr, size)?;
        Ok(self.vram[offset..offset + size].to_vec())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
        let offset = self.offset(addr, data.len())?;
        self.vram[offset..offset + data.len()].copy_from_slice(data);
        self.mark_dirty(offset, data.len());
        Ok(())
    }

    fn address_start(&self) -> u32 {
        self.base
    }

    fn address_range(&self) -> u32 {
        self.vram.len() as u32
    }

    // 复位不清显存

    fn save(&self) -> Option<Vec<u8>> {
        Some(self.vram.clone())
    }

    fn load(&mut self, image: Option<&[u8]>) -> Result<(), DeviceError> {
        let image = image.ok_or_else(|| DeviceError::MissingImage(self.name.clone()))?;
        if image.len() != self.vram.len() {
            return Err(DeviceError::Access(format!(
                "{} 映像大小不符: 期望 {:#x}, 实际 {:#x}",
                self.name,
                self.vram.len(),
                image.len()
            )));
        }
        self.vram.copy_from_slice(image);
        self.mark_dirty(0, self.vram.len());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
