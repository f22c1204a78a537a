//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了配置检查命令的实现。

use crate::cli::CheckConfigArgs;
use crate::config::Config;
use anyhow::{Context, Result};

pub fn execute(args: &CheckConfigArgs) -> Result<()> {
    let config = Config::from_file(&args.path)
        .with_context(|| format!("Invalid configuration: {}", args.path.display()))?;

    println!("=== Effective Configuration ===\n");
    println!("{}", toml::to_string_pretty(&config)?);
    println!("Configuration OK");
    Ok(())
}
