//! 内存映射设备 trait 定义

use thiserror::Error;

/// 设备错误类型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("设备访问错误: {0}")]
    Access(String),
    #[error("设备不支持的操作: {0}")]
    Unsupported(String),
    #[error("会话中没有设备映像: {0}")]
    MissingImage(String),
}

/// 内存映射设备
///
/// 地址均为客户机绝对地址，数据按客户机字节序（大端）传递。
pub trait MmioDevice: Send + Sync {
    /// 读取 `size` 字节（1, 2, 4）
    fn read(&mut self, addr: u32, size: usize) -> Result<Vec<u8>, DeviceError>;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// 设备占用的起始地址
    fn address_start(&self) -> u32;

    /// 设备占用的字节数
    fn address_range(&self) -> u32;

    fn contains(&self, addr: u32, size: usize) -> bool {
        let start = self.address_start() as u64;
        let end = start + self.address_range() as u64;
        let addr = addr as u64;
        addr >= start && addr + size as u64 <= end
    }

    /// 复位；软件复位与硬件复位由参数区分
    fn reset(&mut self, _hardware_reset: bool) {}

    /// 需要随会话保存的映像
    fn save(&self) -> Option<Vec<u8>> {
        None
    }

    /// 从会话恢复；`None` 表示会话中没有该设备的映像
    fn load(&mut self, _image: Option<&[u8]>) -> Result<(), DeviceError> {
        Ok(())
    }

    /// 获取设备名称（用于调试）
    fn name(&self) -> &str {
        "unknown"
    }
}
