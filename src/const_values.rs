use anyhow::{self, Context};
use serde::Deserialize;
use std::path::Path;

/// 系统陷阱号范围 [SYS_TRAP_BASE, SYS_LIB_TRAP_BASE)
pub const SYS_TRAP_BASE: u16 = 0xA000;
pub const SYS_LIB_TRAP_BASE: u16 = 0xA800;

/// 与空闲等待相关的系统陷阱
pub const SYS_TRAP_EVT_GET_EVENT: u16 = 0xA11D;
pub const SYS_TRAP_EVT_GET_PEN: u16 = 0xA11E;
pub const SYS_TRAP_SYS_SEMAPHORE_WAIT: u16 = 0xA0B2;
pub const SYS_TRAP_SYS_EV_GROUP_WAIT: u16 = 0xA2CB;
pub const SYS_TRAP_DLK_GET_SYNC_INFO: u16 = 0xA2A6;

/// 判断陷阱字是否属于系统陷阱区间
#[inline(always)]
pub fn is_system_trap(trap_word: u16) -> bool {
    trap_word.wrapping_sub(SYS_TRAP_BASE) < SYS_LIB_TRAP_BASE - SYS_TRAP_BASE
}

/// 系统陷阱在系统补丁模块中的索引
#[inline(always)]
pub fn sys_trap_index(trap_word: u16) -> u16 {
    trap_word.wrapping_sub(SYS_TRAP_BASE)
}

/// 按键修饰位
pub mod key_mask {
    pub const SHIFT: u16 = 0x0001;
    pub const CAPS_LOCK: u16 = 0x0002;
    pub const NUM_LOCK: u16 = 0x0004;
    pub const OPTION: u16 = 0x0010;
    pub const CONTROL: u16 = 0x0020;
}

/// 四字符码
pub const fn four_cc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

pub const SYS_FILE_C_SYSTEM: u32 = four_cc(b"psys");
pub const SYS_FILE_T_APPLICATION: u32 = four_cc(b"appl");
pub const SYS_FILE_T_PANEL: u32 = four_cc(b"panl");
pub const SYS_FTR_NUM_ROM_VERSION: u16 = 1;

/// 远程调试器公告特性
pub const GDB_FTR_CREATOR: u32 = four_cc(b"gdbS");
pub const GDB_FTR_VALUE: u32 = 0x12BE_EF34;

/// 覆盖层错误报告特性
pub const OM_FTR_CREATOR: u32 = four_cc(b"ovly");
pub const OM_FTR_SHOW_ERRORS_FLAG: u16 = 0;

/// 应用启动命令
pub const SYS_APP_LAUNCH_CMD_NORMAL_LAUNCH: u16 = 0;
pub const SYS_APP_LAUNCH_CMD_OPEN_DB: u16 = 28;
/// SysAppLaunchCmdOpenDBType: cardNo(u16) + dbID(u32)
pub const OPEN_DB_PARAM_SIZE: u32 = 6;

/// 客户机错误码
pub const MEM_ERR_NOT_ENOUGH_SPACE: u16 = 0x0102;
pub const DM_ERR_CANT_FIND: u16 = 0x0207;
pub const FTR_ERR_NO_SUCH_FEATURE: u16 = 0x0C02;

/// 强制 EvtGetEvent 返回空事件时的结果码（内核超时）
pub const FORCED_NIL_EVENT_RESULT: u32 = 4;

/// 客户机无限等待的超时值
pub const EVT_WAIT_FOREVER: i32 = -1;

/// 当前补丁数据块版本；版本 0 的数据块不含尾补丁记录
pub const PATCH_INFO_VERSION: i32 = 5;

/// 客户机日期起点（1904-01-01）相对 UNIX 纪元的秒数
pub const GUEST_EPOCH_OFFSET_SECS: u64 = 2_082_844_800;

#[derive(Deserialize, Debug, Clone)]
pub struct PatchConfig {
    pub system_module: String,
    pub htal_module: String,
    pub htal_magic_refnum: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PersistConfig {
    pub save_version: i32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PuppetConfig {
    #[serde(default)]
    pub log_enqueued_events: bool,
    pub forced_wait_ticks: i32,
}

/// 补丁引擎配置（来自 profile/config.toml）
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    pub patch: PatchConfig,
    pub persist: PersistConfig,
    pub puppet: PuppetConfig,
}

impl EngineConfig {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
        let toml_str = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取配置文件: {:?}", &path.as_ref().as_os_str()))?;
        let config: EngineConfig = toml::from_str(&toml_str)
            .with_context(|| format!("无法解析配置文件: {:?}", &path.as_ref().as_os_str()))?;
        config
            .validate()
            .with_context(|| format!("配置文件无效: {:?}", &path.as_ref().as_os_str()))?;
        anyhow::Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let version = self.persist.save_version;
        if !(1..=PATCH_INFO_VERSION).contains(&version) {
            anyhow::bail!(
                "persist.save_version 须在 1..={} 之间, 实际为 {}",
                PATCH_INFO_VERSION,
                version
            );
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            patch: PatchConfig {
                system_module: "~system".to_string(),
                htal_module: "~Htal".to_string(),
                htal_magic_refnum: 0x666,
            },
            persist: PersistConfig {
                save_version: PATCH_INFO_VERSION,
            },
            puppet: PuppetConfig {
                log_enqueued_events: false,
                forced_wait_ticks: 1,
            },
        }
    }
}
