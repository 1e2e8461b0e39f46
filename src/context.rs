//! 被拦截调用的上下文

use std::fmt;

/// 头补丁返回的后续动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallRom {
    /// 继续执行 ROM 中的原始例程
    #[default]
    Execute,
    /// 头补丁已完整处理该调用，跳过原始例程
    Skip,
}

/// 一次陷阱调用的快照，由解释器在每次陷阱时构造
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallContext {
    /// 陷阱指令所在 PC
    pub pc: u32,
    /// 原始例程返回后继续执行的地址，尾补丁断点挂在这里
    pub return_pc: u32,
    /// 例程目标地址
    pub dest_pc1: u32,
    /// 第二目标地址，几乎总与 dest_pc1 相同
    pub dest_pc2: u32,
    /// 陷阱字（调用类别）
    pub trap_word: u16,
    /// 模块内调用索引
    pub trap_index: u16,
    /// 库句柄或协议魔数
    pub extra: u32,
}

impl CallContext {
    /// 系统陷阱上下文
    pub fn system(trap_word: u16, pc: u32, return_pc: u32) -> Self {
        Self {
            pc,
            return_pc,
            dest_pc1: return_pc,
            dest_pc2: return_pc,
            trap_word,
            trap_index: crate::const_values::sys_trap_index(trap_word),
            extra: 0,
        }
    }

    /// 共享库调用上下文
    pub fn library(trap_word: u16, trap_index: u16, refnum: u32, pc: u32, return_pc: u32) -> Self {
        Self {
            pc,
            return_pc,
            dest_pc1: return_pc,
            dest_pc2: return_pc,
            trap_word,
            trap_index,
            extra: refnum,
        }
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trap {:#06x}[{}] extra={:#x} pc={:#010x} ret={:#010x}",
            self.trap_word, self.trap_index, self.extra, self.pc, self.return_pc
        )
    }
}
