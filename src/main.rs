//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块是命令行工具的入口点。

#![recursion_limit = "256"]

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    starcache::cli::run().await
}
