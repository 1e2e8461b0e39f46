//! 补丁子状态：由补丁例程维护、随会话保存的少量客户机状态

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// 子状态的两个持久化阶段，分别位于尾补丁列表之前和之后
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStep {
    Step1,
    Step2,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchState {
    ui_initialized: bool,
    heap_initialized: bool,
    /// 最近一次进入的取事件陷阱（EvtGetEvent / EvtGetPen）
    last_evt_trap: u16,
    /// ROM 版本（sysFtrNumROMVersion 格式）
    os_version: u32,
    next_app_card_no: u16,
    next_app_db_id: u32,
}

impl PatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn ui_initialized(&self) -> bool {
        self.ui_initialized
    }

    pub fn set_ui_initialized(&mut self, value: bool) {
        self.ui_initialized = value;
    }

    pub fn heap_initialized(&self) -> bool {
        self.heap_initialized
    }

    pub fn set_heap_initialized(&mut self, value: bool) {
        self.heap_initialized = value;
    }

    pub fn last_evt_trap(&self) -> u16 {
        self.last_evt_trap
    }

    pub fn set_last_evt_trap(&mut self, trap_word: u16) {
        self.last_evt_trap = trap_word;
    }

    pub fn os_version(&self) -> u32 {
        self.os_version
    }

    pub fn set_os_version(&mut self, version: u32) {
        self.os_version = version;
    }

    pub fn next_app(&self) -> Option<(u16, u32)> {
        (self.next_app_db_id != 0).then_some((self.next_app_card_no, self.next_app_db_id))
    }

    /// 请求在客户机下次空闲时切换应用
    pub fn set_next_app(&mut self, card_no: u16, db_id: u32) {
        self.next_app_card_no = card_no;
        self.next_app_db_id = db_id;
    }

    pub fn clear_next_app(&mut self) {
        self.set_next_app(0, 0);
    }

    /// 按版本写出一个阶段的字段
    pub fn save<W: Write>(&self, w: &mut W, version: i32, step: PersistStep) -> io::Result<()> {
        match step {
            PersistStep::Step1 => {
                if version >= 1 {
                    w.write_u8(self.ui_initialized as u8)?;
                    w.write_u8(self.heap_initialized as u8)?;
                }
                if version >= 2 {
                    w.write_u16::<BigEndian>(self.last_evt_trap)?;
                }
                if version >= 4 {
                    w.write_u32::<BigEndian>(self.os_version)?;
                }
            }
            PersistStep::Step2 => {
                if version >= 3 {
                    w.write_u16::<BigEndian>(self.next_app_card_no)?;
                    w.write_u32::<BigEndian>(self.next_app_db_id)?;
                }
            }
        }
        Ok(())
    }

    /// 按版本读入一个阶段的字段，旧版本中不存在的字段保持原值
    pub fn load<R: Read>(&mut self, r: &mut R, version: i32, step: PersistStep) -> io::Result<()> {
        match step {
            PersistStep::Step1 => {
                if version >= 1 {
                    self.ui_initialized = r.read_u8()? != 0;
                    self.heap_initialized = r.read_u8()? != 0;
                }
                if version >= 2 {
                    self.last_evt_trap = r.read_u16::<BigEndian>()?;
                }
                if version >= 4 {
                    self.os_version = r.read_u32::<BigEndian>()?;
                }
            }
            PersistStep::Step2 => {
                if version >= 3 {
                    self.next_app_card_no = r.read_u16::<BigEndian>()?;
                    self.next_app_db_id = r.read_u32::<BigEndian>()?;
                }
            }
        }
        Ok(())
    }
}
