use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{self, EnvFilter, fmt::format::FmtSpan};

use emu_patch::{Args, run_blocking};

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false) // 不显示目标模块
        .with_thread_ids(true) // 显示线程ID
        .with_thread_names(true) // 显示线程名称
        .with_file(true) // 显示文件名
        .with_line_number(true) // 显示行号
        .with_span_events(FmtSpan::ACTIVE)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "启动补丁引擎工具");

    run_blocking(args)
}
