//! 内置系统补丁模块

use tracing::trace;

use super::module::{HookEnv, PatchTable};
use crate::const_values::{
    EVT_WAIT_FOREVER, EngineConfig, SYS_TRAP_EVT_GET_EVENT, SYS_TRAP_EVT_GET_PEN,
    SYS_TRAP_SYS_EV_GROUP_WAIT, SYS_TRAP_SYS_SEMAPHORE_WAIT, sys_trap_index,
};
use crate::context::CallRom;
use crate::puppet::puppet_string;

pub fn system_module(config: &EngineConfig) -> PatchTable {
    PatchTable::new(&config.patch.system_module)
        .with_head(sys_trap_index(SYS_TRAP_EVT_GET_EVENT), remember_evt_trap)
        .with_head(sys_trap_index(SYS_TRAP_EVT_GET_PEN), remember_evt_trap)
        .with_head(sys_trap_index(SYS_TRAP_SYS_EV_GROUP_WAIT), idle_wait)
        .with_head(sys_trap_index(SYS_TRAP_SYS_SEMAPHORE_WAIT), idle_wait)
}

/// 记下客户机正在哪个取事件陷阱中等待
fn remember_evt_trap(env: &mut HookEnv<'_>) -> CallRom {
    env.state().set_last_evt_trap(env.context.trap_word);
    CallRom::Execute
}

/// 等待原语：注入事件，必要时把无限等待改成有限等待
fn idle_wait(env: &mut HookEnv<'_>) -> CallRom {
    let outcome = puppet_string(env);

    if outcome.clear_timeout && env.host.cpu().wait_timeout() == EVT_WAIT_FOREVER {
        let ticks = env.config().puppet.forced_wait_ticks;
        trace!(ticks, "清除无限等待");
        env.host.cpu().set_wait_timeout(ticks);
    }
    outcome.call_rom
}
