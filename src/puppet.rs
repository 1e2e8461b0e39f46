//! 合成事件注入（puppet stringing）
//!
//! 客户机在 EvtGetEvent / EvtGetPen 中找不到事件时会进入等待原语休眠。
//! 等待原语的头补丁调用这里，按优先级从回放、压力注入、真实输入或
//! 待切换应用中选一个事件源投递事件，避免客户机真正阻塞宿主。

use tracing::{debug, trace};

use crate::const_values::{
    FORCED_NIL_EVENT_RESULT, SYS_TRAP_EVT_GET_EVENT, SYS_TRAP_EVT_GET_PEN, key_mask,
};
use crate::context::CallRom;
use crate::host::{KeyEvent, Point};
use crate::patch::HookEnv;
use crate::patch::app_switch::switch_to_app;

/// 注入结果：是否继续执行原始等待例程，以及调用方是否需要把无限超时改为有限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PuppetOutcome {
    pub call_rom: CallRom,
    pub clear_timeout: bool,
}

impl PuppetOutcome {
    const PROCEED: Self = Self {
        call_rom: CallRom::Execute,
        clear_timeout: false,
    };

    const PROCEED_CLEAR_TIMEOUT: Self = Self {
        call_rom: CallRom::Execute,
        clear_timeout: true,
    };
}

/// 注入策略中的一条规则
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&mut HookEnv<'_>) -> bool,
    pub run: fn(&mut HookEnv<'_>) -> PuppetOutcome,
}

/// 按优先级排列，第一条适用的规则生效
pub const RULES: &[Rule] = &[
    Rule {
        name: "nested",
        applies: |env| env.host.session().is_nested(),
        run: force_nil_event,
    },
    Rule {
        name: "replay",
        applies: |env| env.host.playback().replaying(),
        run: replay_event,
    },
    Rule {
        name: "hordes",
        applies: |env| env.host.hordes().is_on(),
        run: post_hordes_event,
    },
    Rule {
        name: "key",
        applies: |env| env.host.session().has_key_event(),
        run: post_key_event,
    },
    Rule {
        name: "pen",
        applies: |env| env.host.session().has_pen_event(),
        run: post_pen_event,
    },
    Rule {
        name: "app_switch",
        applies: |env| env.state().next_app().is_some(),
        run: switch_pending_app,
    },
];

pub fn puppet_string(env: &mut HookEnv<'_>) -> PuppetOutcome {
    // 若跳过原始例程，返回值默认为 errNone
    env.host.cpu().set_result(0);

    if !env.host.session().evt_mgr_idle() {
        if env.config().puppet.log_enqueued_events && env.host.hordes().is_on() {
            debug!("事件管理器非空闲，不注入事件");
        }
        return PuppetOutcome::PROCEED;
    }

    if env.state().last_evt_trap() == SYS_TRAP_EVT_GET_EVENT {
        env.host.session().signal_idle_waiters();
    }

    for rule in RULES {
        if (rule.applies)(env) {
            trace!(rule = rule.name, "事件注入");
            return (rule.run)(env);
        }
    }
    PuppetOutcome::PROCEED
}

/// 让 EvtGetEvent 返回空事件：等待例程报告超时
fn force_nil_event(env: &mut HookEnv<'_>) -> PuppetOutcome {
    env.host.cpu().set_result(FORCED_NIL_EVENT_RESULT);
    PuppetOutcome {
        call_rom: CallRom::Skip,
        clear_timeout: false,
    }
}

fn replay_event(env: &mut HookEnv<'_>) -> PuppetOutcome {
    let last_evt_trap = env.state().last_evt_trap();
    match last_evt_trap {
        SYS_TRAP_EVT_GET_EVENT => {
            if !env.host.playback().replay_get_event() {
                debug!("回放没有产生事件");
                return force_nil_event(env);
            }
        }
        SYS_TRAP_EVT_GET_PEN => {
            env.host.playback().replay_get_pen();
        }
        _ => {}
    }
    PuppetOutcome::PROCEED_CLEAR_TIMEOUT
}

fn post_hordes_event(env: &mut HookEnv<'_>) -> PuppetOutcome {
    let log = env.config().puppet.log_enqueued_events;
    let last_evt_trap = env.state().last_evt_trap();
    match last_evt_trap {
        SYS_TRAP_EVT_GET_EVENT => {
            if !env.host.hordes().post_fake_event() {
                if log {
                    debug!("Hordes 没有投递事件");
                }
                return force_nil_event(env);
            }
        }
        SYS_TRAP_EVT_GET_PEN => {
            env.host.hordes().post_fake_pen_event();
        }
        other => {
            if log {
                debug!(
                    last_evt_trap = %format_args!("{:#06x}", other),
                    "上一个事件陷阱不是取事件，不投递"
                );
            }
        }
    }
    PuppetOutcome::PROCEED_CLEAR_TIMEOUT
}

/// 宿主修饰键到客户机修饰位；command 在客户机中另有含义，alt/windows 没有对应位
pub fn key_modifiers(event: &KeyEvent) -> u16 {
    let mut modifiers = 0;
    if event.shift_down {
        modifiers |= key_mask::SHIFT;
    }
    if event.caps_lock_down {
        modifiers |= key_mask::CAPS_LOCK;
    }
    if event.num_lock_down {
        modifiers |= key_mask::NUM_LOCK;
    }
    if event.option_down {
        modifiers |= key_mask::OPTION;
    }
    if event.control_down {
        modifiers |= key_mask::CONTROL;
    }
    modifiers
}

fn post_key_event(env: &mut HookEnv<'_>) -> PuppetOutcome {
    let event = env.host.session().get_key_event();
    let modifiers = key_modifiers(&event);
    trace!(key = event.key, modifiers, "投递按键事件");
    env.host.guest().enqueue_key(event.key, 0, modifiers);
    PuppetOutcome::PROCEED
}

fn post_pen_event(env: &mut HookEnv<'_>) -> PuppetOutcome {
    let event = env.host.session().get_pen_event();
    let point = if event.pen_down {
        event.point
    } else {
        Point::PEN_UP
    };
    trace!(x = point.x, y = point.y, "投递触笔事件");
    env.host.guest().enqueue_pen_point(point);
    PuppetOutcome::PROCEED
}

/// 切换期间客户机可能再次陷入引擎，不持有状态借用
fn switch_pending_app(env: &mut HookEnv<'_>) -> PuppetOutcome {
    let next_app = env.state().next_app();
    if let Some((card_no, db_id)) = next_app {
        if let Err(e) = switch_to_app(env.host.guest(), card_no, db_id) {
            debug!(card_no, db_id = %format_args!("{:#x}", db_id), error = %e, "应用切换失败");
        }
    }
    env.state().clear_next_app();
    PuppetOutcome::PROCEED_CLEAR_TIMEOUT
}
