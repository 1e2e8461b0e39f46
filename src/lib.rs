//! 掌上设备模拟器的系统调用补丁引擎

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use crate::const_values::EngineConfig;
use crate::patch::PatchEngine;
use crate::persist::PatchInfo;
use crate::session_file::{MemorySessionFile, SessionFile};

pub mod const_values;
pub mod context;
pub mod host;
pub mod meta_memory;
pub mod patch;
pub mod persist;
pub mod puppet;
pub mod session_file;

#[cfg(test)]
mod test_utils;

/// 补丁引擎工具：检查配置并解码会话中的补丁数据块
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "profile/config.toml")]
    pub config: String,

    /// 导出的补丁数据块文件
    #[arg(long)]
    pub chunk: Option<String>,

    /// 同时输出数据块原始字节
    #[arg(long)]
    pub hex: bool,
}

/// 相对路径按工程目录解析
fn resolve_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
    }
}

pub fn run_blocking(args: Args) -> Result<()> {
    let config = EngineConfig::new(resolve_path(&args.config))?;
    info!(
        system_module = %config.patch.system_module,
        save_version = config.persist.save_version,
        "加载配置"
    );

    let engine = PatchEngine::with_builtin(config);
    engine.initialize();

    let Some(chunk_path) = args.chunk else {
        return Ok(());
    };

    info!(path = %chunk_path, "解码补丁数据块");
    let file = MemorySessionFile::from_patch_info_file(&chunk_path)?;
    let chunk = file.read_patch_info().unwrap_or_default();
    let patch_info = PatchInfo::decode(&chunk)
        .with_context(|| format!("无法解码补丁数据块: {}", chunk_path))?;

    print_patch_info(&patch_info, engine.config().persist.save_version);
    if args.hex {
        print_hex(&chunk);
    }
    Ok(())
}

fn print_patch_info(info: &PatchInfo, current_version: i32) {
    let version = if info.version == current_version {
        info.version.to_string().green()
    } else {
        info.version.to_string().yellow()
    };
    println!("{} {}", "Patch info version:".bold(), version);

    let state = &info.state;
    println!("  UI initialized:   {}", state.ui_initialized());
    println!("  Heap initialized: {}", state.heap_initialized());
    println!("  Last event trap:  {:#06x}", state.last_evt_trap());
    println!("  OS version:       {:#010x}", state.os_version());
    match state.next_app() {
        Some((card_no, db_id)) => println!(
            "  Next app:         {}",
            format!("card {} db {:#010x}", card_no, db_id).cyan()
        ),
        None => println!("  Next app:         -"),
    }

    println!(
        "{} {}",
        "Pending tailpatches:".bold(),
        info.tailpatches.len()
    );
    for saved in &info.tailpatches {
        let count = if saved.count > 1 {
            format!("x{}", saved.count).red()
        } else {
            format!("x{}", saved.count).normal()
        };
        println!("  {} {}", saved.context, count);
    }
}

fn print_hex(chunk: &[u8]) {
    println!("{}", "Raw chunk:".bold());
    for (i, line) in chunk.chunks(16).enumerate() {
        println!("  {:06x}  {}", i * 16, hex::encode(line).dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path() {
        let rel = resolve_path("profile/config.toml");
        assert!(rel.ends_with("profile/config.toml"));
        assert!(rel.is_absolute());
        assert_eq!(resolve_path("/tmp/x.toml"), PathBuf::from("/tmp/x.toml"));
    }

    #[test]
    fn test_run_without_chunk() {
        let args = Args {
            config: "profile/config.toml".to_string(),
            chunk: None,
            hex: false,
        };
        run_blocking(args).unwrap();
    }

    #[test]
    fn test_run_with_missing_chunk_file() {
        let args = Args {
            config: "profile/config.toml".to_string(),
            chunk: Some("/nonexistent/patch.bin".to_string()),
            hex: true,
        };
        assert!(run_blocking(args).is_err());
    }
}
