//! 宿主侧协作者接口
//!
//! 补丁引擎只通过这些 trait 访问 CPU、会话、客户机 ROM 例程与输入源，
//! 这些组件的实现都在引擎之外。

use thiserror::Error;

/// 客户机例程返回的错误码
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("客户机错误: {0:#06x}")]
pub struct GuestError(pub u16);

pub type GuestResult<T> = Result<T, GuestError>;

/// 客户机坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

impl Point {
    pub const PEN_UP: Point = Point { x: -1, y: -1 };

    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// 宿主键盘事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyEvent {
    pub key: u16,
    pub shift_down: bool,
    pub caps_lock_down: bool,
    pub num_lock_down: bool,
    pub command_down: bool,
    pub option_down: bool,
    pub control_down: bool,
    pub alt_down: bool,
    pub windows_down: bool,
}

/// 宿主触笔事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PenEvent {
    pub point: Point,
    pub pen_down: bool,
}

/// 会话中持久化的用户偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pref {
    ReportStrictIntlChecks,
    ReportOverlayErrors,
}

/// 串行线路
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartDevice {
    Serial,
    Infrared,
}

impl UartDevice {
    pub const ALL: [UartDevice; 2] = [UartDevice::Serial, UartDevice::Infrared];
}

/// DmDatabaseInfo 返回的数据库信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseInfo {
    pub attributes: u16,
    pub db_type: u32,
    pub creator: u32,
}

/// CPU 寄存器与当前陷阱的参数帧
pub trait Cpu {
    fn pc(&self) -> u32;

    /// 设置例程返回值（D0）
    fn set_result(&mut self, value: u32);

    /// 当前等待类陷阱的超时参数
    fn wait_timeout(&self) -> i32;

    fn set_wait_timeout(&mut self, ticks: i32);
}

/// 解释器地址元数据中的指令断点标记
pub trait InstructionBreaks {
    fn mark_instruction_break(&mut self, addr: u32);

    fn unmark_instruction_break(&mut self, addr: u32);
}

/// 运行中的模拟会话
pub trait Session {
    /// 会话加载后是否还需要执行延迟引导
    fn need_post_load(&self) -> bool;

    fn set_need_post_load(&mut self, need: bool);

    /// 当前是否处于宿主发起的嵌套客户机调用中
    fn is_nested(&self) -> bool;

    /// 事件管理器的低内存“空闲”标志
    fn evt_mgr_idle(&self) -> bool;

    fn has_key_event(&self) -> bool;

    fn get_key_event(&mut self) -> KeyEvent;

    fn has_pen_event(&self) -> bool;

    fn get_pen_event(&mut self) -> PenEvent;

    /// 通知等待空闲信号的 RPC 调用方
    fn signal_idle_waiters(&mut self);

    fn connected_to_debugger(&self) -> bool;

    fn preference(&self, pref: Pref) -> bool;

    /// 写回 HotSync 用户名偏好
    fn set_user_name(&mut self, name: &str);

    /// 触发自动加载目录中的文件安装
    fn autoload(&mut self) -> anyhow::Result<()>;

    fn line_driver_active(&self, uart: UartDevice) -> bool;

    fn open_transport(&mut self, uart: UartDevice) -> anyhow::Result<()>;

    /// 启用或停用性能分析，返回之前的状态
    fn set_profiling_enabled(&mut self, enabled: bool) -> bool;
}

/// 通过模拟调用跳板执行的客户机例程
pub trait GuestCalls {
    fn trap_exists(&self, trap_word: u16) -> bool;

    fn ftr_get(&mut self, creator: u32, num: u16) -> GuestResult<u32>;

    fn ftr_set(&mut self, creator: u32, num: u16, value: u32) -> GuestResult<()>;

    fn ftr_unregister(&mut self, creator: u32, num: u16) -> GuestResult<()>;

    fn intl_set_strict_checks(&mut self, on: bool);

    /// DlkGetSyncInfo 中的用户名
    fn sync_user_name(&mut self) -> GuestResult<String>;

    fn evt_wakeup(&mut self);

    /// 设置客户机时间（自 1904 年起的秒数）
    fn set_seconds(&mut self, seconds: u32);

    fn enqueue_key(&mut self, chr: u16, key_code: u16, modifiers: u16);

    fn enqueue_pen_point(&mut self, point: Point);

    /// 共享库当前的名字；句柄未使用时返回 None
    fn library_name(&mut self, refnum: u16) -> Option<String>;

    fn database_info(&mut self, card_no: u16, db_id: u32) -> GuestResult<DatabaseInfo>;

    /// 按类型与创建者查找第一个数据库，返回 (card_no, db_id)
    fn next_database_by_type_creator(
        &mut self,
        db_type: u32,
        creator: u32,
    ) -> GuestResult<(u16, u32)>;

    /// 分配客户机内存，失败返回 None
    fn mem_ptr_new(&mut self, size: u32) -> Option<u32>;

    fn mem_ptr_set_owner(&mut self, ptr: u32, owner: u16);

    fn put16(&mut self, addr: u32, value: u16);

    fn put32(&mut self, addr: u32, value: u32);

    fn ui_app_switch(
        &mut self,
        card_no: u16,
        db_id: u32,
        cmd: u16,
        param: Option<u32>,
    ) -> GuestResult<()>;
}

/// 脚本事件回放
pub trait EventPlayback {
    fn replaying(&self) -> bool;

    fn replay_get_event(&mut self) -> bool;

    fn replay_get_pen(&mut self) -> bool;
}

/// 自动压力注入（Gremlins / Hordes）
pub trait Hordes {
    fn is_on(&self) -> bool;

    fn post_fake_event(&mut self) -> bool;

    fn post_fake_pen_event(&mut self) -> bool;
}

/// 一次陷阱处理期间可用的全部协作者
pub trait Host {
    fn cpu(&mut self) -> &mut dyn Cpu;
    fn breaks(&mut self) -> &mut dyn InstructionBreaks;
    fn session(&mut self) -> &mut dyn Session;
    fn guest(&mut self) -> &mut dyn GuestCalls;
    fn playback(&mut self) -> &mut dyn EventPlayback;
    fn hordes(&mut self) -> &mut dyn Hordes;
}
