//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了模拟负载命令的实现。
//!
//! 每个模拟玩家在独立的请求上下文中循环采矿、移动飞船、发起战斗并汇总战报，
//! 结束后排空关闭全部缓存并输出统计。

use crate::cli::SimulateArgs;
use crate::config::Config;
use crate::entity::{AccountId, BattleEvent};
use crate::error::Result as CacheResult;
use crate::lock::LockContext;
use crate::metrics::get_metrics_string;
use crate::registry::{CacheRegistry, Stores};
use crate::storage::memory::MemoryStores;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::try_join_all;
use tracing::info;

pub async fn execute(args: &SimulateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Invalid configuration: {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(interval_ms) = args.interval_ms {
        for cache in [
            &mut config.accounts,
            &mut config.world,
            &mut config.messages,
            &mut config.battles,
        ] {
            cache.persistence_interval_ms = interval_ms;
            cache.enable_auto_persistence = true;
        }
    }

    let memory = MemoryStores::new();
    let mut ctx = LockContext::new();
    let registry = CacheRegistry::initialize(&mut ctx, &config, Stores::from(&memory)).await?;
    let registry = &registry;

    let mut players = Vec::with_capacity(args.players);
    for i in 0..args.players {
        let account = registry
            .accounts
            .create_account(&mut ctx, &format!("pilot-{}", i))
            .await?;
        registry
            .world
            .spawn_player_ship(&mut ctx, &registry.accounts, account.id, i as f64 * 100.0, 0.0)
            .await?;
        players.push(account.id);
    }
    info!("已创建 {} 个玩家", players.len());

    let rounds = args.rounds;
    let workloads = players.iter().enumerate().map(|(i, &player)| {
        let opponent = players[(i + 1) % players.len()];
        async move { play(registry, player, opponent, rounds).await }
    });
    try_join_all(workloads).await?;

    for &player in &players {
        registry
            .accounts
            .with_accounts_locked(&mut ctx, |mut accounts_ctx| async move {
                registry
                    .messages
                    .summarize_for_account(&mut accounts_ctx, &registry.accounts, player)
                    .await
            })
            .await?;
    }

    registry.shutdown_all(&mut ctx).await?;

    println!("=== Cache Stats ===\n");
    println!("{}", serde_json::to_string_pretty(&registry.stats())?);
    println!("\nTotal saves: {}", memory.total_saves());
    if args.prometheus {
        println!("\n{}", get_metrics_string());
    }

    CacheRegistry::reset_all();
    Ok(())
}

/// 单个玩家的请求序列
async fn play(
    registry: &CacheRegistry,
    player: AccountId,
    opponent: AccountId,
    rounds: usize,
) -> CacheResult<()> {
    let mut ctx = LockContext::new();
    let ship_id = registry
        .accounts
        .get_account_by_id_with_lock(&mut ctx, player)
        .await
        .into_result()?
        .and_then(|account| account.ship_id);

    for round in 0..rounds {
        registry
            .accounts
            .credit_iron(&mut ctx, player, 1.0 + round as f64)
            .await?;

        if let Some(ship_id) = ship_id {
            registry
                .world
                .modify_object(&mut ctx, ship_id, |ship| {
                    ship.speed = 5.0;
                    ship.x += ship.speed;
                    ship.last_position_update = Utc::now();
                })
                .await?;
        }

        if player != opponent {
            if let Some(battle) = registry
                .battles
                .start_battle(&mut ctx, player, opponent)
                .await?
            {
                let hit = BattleEvent::hit(player, opponent, 10.0 + round as f64);
                registry.battles.record_event(&mut ctx, battle.id, hit).await?;
                let winner = if round % 2 == 0 { player } else { opponent };
                registry
                    .battles
                    .finish_battle_and_notify(&mut ctx, &registry.messages, battle.id, Some(winner))
                    .await?;
            }
        }

        if round % 5 == 4 {
            registry.messages.summarize_messages(&mut ctx, player).await?;
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}
