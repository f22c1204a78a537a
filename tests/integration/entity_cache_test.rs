//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 实体缓存集成测试

use serial_test::serial;
use starcache::config::CacheConfig;
use starcache::entity::{
    Account, AccountCache, AccountId, Battle, BattleCache, BattleEvent, MessageBody, MessageCache,
    ObjectId, ObjectKind, SpaceObject, WorldCache,
};
use starcache::error::CacheError;
use starcache::lock::{Accounts, LockContext};
use starcache::storage::memory::MemoryStores;
use std::sync::Arc;

#[path = "../common/mod.rs"]
mod common;

fn reset_instances() {
    AccountCache::reset_instance();
    WorldCache::reset_instance();
    MessageCache::reset_instance();
    BattleCache::reset_instance();
}

/// 测试未初始化时获取默认实例返回错误
#[tokio::test]
#[serial]
async fn test_get_instance_before_initialize() {
    common::setup_logging();
    reset_instances();

    assert!(matches!(
        AccountCache::get_instance(),
        Err(CacheError::NotInitialized(_))
    ));
    assert!(matches!(
        WorldCache::get_instance(),
        Err(CacheError::NotInitialized(_))
    ));
    assert!(matches!(
        MessageCache::get_instance(),
        Err(CacheError::NotInitialized(_))
    ));
    assert!(matches!(
        BattleCache::get_instance(),
        Err(CacheError::NotInitialized(_))
    ));
}

/// 测试重复初始化返回同一实例，重置后需要重新初始化
#[tokio::test]
#[serial]
async fn test_initialize_is_idempotent_and_resettable() {
    reset_instances();
    let stores = MemoryStores::new();
    let mut ctx = LockContext::new();

    let first = AccountCache::initialize(&mut ctx, &CacheConfig::manual(), stores.accounts.clone())
        .await
        .unwrap();
    let second = AccountCache::initialize(&mut ctx, &CacheConfig::manual(), stores.accounts.clone())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &AccountCache::get_instance().unwrap()));
    assert!(AccountCache::is_initialized());

    AccountCache::reset_instance();
    assert!(!AccountCache::is_initialized());
    assert!(matches!(
        AccountCache::get_instance(),
        Err(CacheError::NotInitialized(_))
    ));

    let fresh = AccountCache::initialize(&mut ctx, &CacheConfig::manual(), stores.accounts.clone())
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    reset_instances();
}

/// 测试无效配置不会创建实例
#[tokio::test]
#[serial]
async fn test_initialize_rejects_invalid_config() {
    reset_instances();
    let stores = MemoryStores::new();

    let result = MessageCache::initialize(
        &mut LockContext::new(),
        &CacheConfig::with_interval(1),
        stores.messages.clone(),
    )
    .await;
    assert!(matches!(result, Err(CacheError::ConfigError(_))));
    assert!(!MessageCache::is_initialized());
}

/// 测试世界和战斗缓存在初始化时预加载
#[tokio::test]
#[serial]
async fn test_world_and_battles_preload_on_initialize() {
    reset_instances();
    let stores = MemoryStores::new();
    stores
        .world
        .seed(SpaceObject::new(ObjectKind::Asteroid, 1.0, 2.0), 1);
    stores
        .world
        .seed(SpaceObject::new(ObjectKind::Shipwreck, 3.0, 4.0), 2);
    stores.battles.seed(Battle::new(AccountId(1), AccountId(2)), 1);

    let mut ctx = LockContext::new();
    let world = WorldCache::initialize(&mut ctx, &CacheConfig::manual(), stores.world.clone())
        .await
        .unwrap();
    let battles = BattleCache::initialize(&mut ctx, &CacheConfig::manual(), stores.battles.clone())
        .await
        .unwrap();

    assert_eq!(world.get_stats().cache_size, 2);
    assert_eq!(battles.get_stats().cache_size, 1);

    let objects = world.get_all_objects(&mut ctx).await.unwrap();
    assert_eq!(objects.len(), 2);
    let ongoing = battles
        .get_ongoing_battle_for_account(&mut ctx, AccountId(2))
        .await
        .unwrap();
    assert!(ongoing.is_some());
    assert_eq!(world.get_stats().misses, 0);
    reset_instances();
}

/// 测试各缓存写入后立即可读，存储在刷新前不变
#[tokio::test]
async fn test_read_after_write_per_cache() {
    let fixture = common::manual_fixture();
    fixture.stores.accounts.seed(Account::new("reader"), 1);
    fixture
        .stores
        .world
        .seed(SpaceObject::new(ObjectKind::EscapePod, 0.0, 0.0), 1);
    let mut ctx = LockContext::new();

    let mut account = fixture
        .accounts
        .get_account_by_id_with_lock(&mut ctx, AccountId(1))
        .await
        .into_result()
        .unwrap()
        .unwrap();
    account.username = "renamed".to_string();
    fixture
        .accounts
        .update_account_in_cache(&mut ctx, account)
        .await
        .unwrap();
    let reread = fixture
        .accounts
        .get_account_by_id_with_lock(&mut ctx, AccountId(1))
        .await
        .into_result()
        .unwrap()
        .unwrap();
    assert_eq!(reread.username, "renamed");
    assert_eq!(fixture.stores.accounts.get(AccountId(1)).unwrap().username, "reader");

    let pod = fixture
        .world
        .get_object_by_id_with_lock(&mut ctx, ObjectId(1))
        .await
        .into_result()
        .unwrap()
        .unwrap();
    let mut moved = pod.clone();
    moved.x = 42.0;
    fixture.world.update_object_in_cache(&mut ctx, moved).await.unwrap();
    let reread = fixture
        .world
        .get_object_by_id_with_lock(&mut ctx, pod.id)
        .await
        .into_result()
        .unwrap()
        .unwrap();
    assert_eq!(reread.x, 42.0);

    let battle = fixture
        .battles
        .start_battle(&mut ctx, AccountId(1), AccountId(2))
        .await
        .unwrap()
        .unwrap();
    let mut updated = battle.clone();
    updated.events.push(BattleEvent::hit(AccountId(2), AccountId(1), 3.0));
    fixture
        .battles
        .update_battle_in_cache(&mut ctx, updated)
        .await
        .unwrap();
    let reread = fixture
        .battles
        .get_battle_by_id_with_lock(&mut ctx, battle.id)
        .await
        .into_result()
        .unwrap()
        .unwrap();
    assert_eq!(reread.events.len(), 1);

    let sent = fixture
        .messages
        .send_message(&mut ctx, AccountId(1), MessageBody::Text("hi".to_string()))
        .await
        .unwrap();
    let inbox = fixture
        .messages
        .get_messages_for_user(&mut ctx, AccountId(1))
        .await
        .unwrap();
    assert_eq!(inbox, vec![sent]);

    assert_eq!(fixture.accounts.flush_to_database(&mut ctx).await.unwrap(), 1);
    assert_eq!(fixture.world.flush_to_database(&mut ctx).await.unwrap(), 1);
    assert_eq!(fixture.battles.flush_to_database(&mut ctx).await.unwrap(), 1);
    assert_eq!(fixture.stores.accounts.get(AccountId(1)).unwrap().username, "renamed");
}

/// 测试删除世界对象同时删除存储中的行
#[tokio::test]
async fn test_delete_object_removes_row() {
    let fixture = common::manual_fixture();
    let mut ctx = LockContext::new();

    let rock = fixture
        .world
        .insert_object(&mut ctx, SpaceObject::new(ObjectKind::Asteroid, 5.0, 5.0))
        .await
        .unwrap();
    assert!(fixture.stores.world.get(rock.id).is_some());

    assert!(fixture.world.delete_object(&mut ctx, rock.id).await.unwrap());
    assert!(fixture.stores.world.get(rock.id).is_none());
    assert!(fixture
        .world
        .get_object_by_id_with_lock(&mut ctx, rock.id)
        .await
        .into_result()
        .unwrap()
        .is_none());
}

/// 测试结束战斗后双方都收到战斗结果事件
#[tokio::test]
async fn test_finish_battle_notifies_both_participants() {
    let fixture = common::manual_fixture();
    let mut ctx = LockContext::new();

    let battle = fixture
        .battles
        .start_battle(&mut ctx, AccountId(1), AccountId(2))
        .await
        .unwrap()
        .unwrap();
    fixture
        .battles
        .record_event(&mut ctx, battle.id, BattleEvent::hit(AccountId(1), AccountId(2), 25.0))
        .await
        .unwrap();

    let ended = fixture
        .battles
        .finish_battle_and_notify(&mut ctx, &fixture.messages, battle.id, Some(AccountId(1)))
        .await
        .unwrap()
        .unwrap();
    assert!(!ended.is_ongoing());
    assert_eq!(ended.winner_id, Some(AccountId(1)));

    let winner_inbox = fixture
        .messages
        .get_unread_messages(&mut ctx, AccountId(1))
        .await
        .unwrap();
    assert_eq!(winner_inbox.len(), 1);
    match &winner_inbox[0].body {
        MessageBody::Event(stats) => {
            assert_eq!(stats.victories, 1);
            assert_eq!(stats.damage_dealt, 25.0);
        }
        other => panic!("unexpected body: {:?}", other),
    }

    let loser_inbox = fixture
        .messages
        .get_unread_messages(&mut ctx, AccountId(2))
        .await
        .unwrap();
    assert_eq!(loser_inbox.len(), 1);
    assert!(matches!(
        &loser_inbox[0].body,
        MessageBody::Event(stats) if stats.defeats == 1 && stats.damage_received == 25.0
    ));

    // 已结束的战斗不会再次通知
    let again = fixture
        .battles
        .finish_battle_and_notify(&mut ctx, &fixture.messages, battle.id, None)
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(fixture.stores.messages.len(), 2);
}

/// 测试并发的跨缓存操作全部完成
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cross_cache_operations() {
    let fixture = Arc::new(common::manual_fixture());
    for id in 1..=6u64 {
        fixture.stores.accounts.seed(Account::new(format!("pilot-{}", id)), id);
    }

    let mut handles = Vec::new();
    for id in 1..=6u64 {
        let fixture = fixture.clone();
        handles.push(tokio::spawn(async move {
            let mut ctx = LockContext::new();
            let me = AccountId(id);
            let opponent = AccountId(if id % 2 == 0 { id - 1 } else { id + 1 });
            fixture
                .world
                .spawn_player_ship(&mut ctx, &fixture.accounts, me, id as f64, 0.0)
                .await?;
            fixture.accounts.credit_iron(&mut ctx, me, 10.0).await?;
            if let Some(battle) = fixture.battles.start_battle(&mut ctx, me, opponent).await? {
                fixture
                    .battles
                    .finish_battle_and_notify(&mut ctx, &fixture.messages, battle.id, Some(me))
                    .await?;
            }
            fixture.messages.summarize_messages(&mut ctx, me).await?;
            Ok::<_, CacheError>(())
        }));
    }

    let all = futures::future::join_all(handles);
    let results = tokio::time::timeout(std::time::Duration::from_secs(10), all)
        .await
        .expect("cross-cache operations deadlocked");
    for result in results {
        result.unwrap().unwrap();
    }

    let mut ctx = LockContext::new();
    assert_eq!(fixture.world.get_all_objects(&mut ctx).await.unwrap().len(), 6);
    for id in 1..=6u64 {
        let account = fixture
            .accounts
            .get_account_by_id_with_lock(&mut ctx, AccountId(id))
            .await
            .into_result()
            .unwrap()
            .unwrap();
        assert_eq!(account.iron, 10.0);
        assert!(account.ship_id.is_some());
    }
}

/// 测试从账户锁区返回的上下文不能在锁释放后写入账户
#[tokio::test]
async fn test_returned_accounts_context_cannot_write() {
    let fixture = common::manual_fixture();
    fixture.stores.accounts.seed(Account::new("keeper"), 1);
    let mut ctx = LockContext::new();

    let kept = fixture
        .accounts
        .with_accounts_locked(&mut ctx, |locked| async move { locked })
        .await;
    assert!(!kept.holds::<Accounts>());

    let mut forged = Account::new("forged");
    forged.id = AccountId(1);
    assert!(matches!(
        fixture.accounts.update_account_under_lock(&kept, forged),
        Err(CacheError::LockNotHeld(_))
    ));
    let credited = fixture
        .accounts
        .modify_account_under_lock(&kept, AccountId(1), |account| account.iron += 1.0)
        .await;
    assert!(matches!(credited, Err(CacheError::LockNotHeld(_))));
    let read = fixture
        .accounts
        .get_account_under_lock(&kept, AccountId(1))
        .await
        .into_result();
    assert!(matches!(read, Err(CacheError::LockNotHeld(_))));

    let account = fixture
        .accounts
        .get_account_by_id_with_lock(&mut ctx, AccountId(1))
        .await
        .into_result()
        .unwrap()
        .unwrap();
    assert_eq!(account.username, "keeper");
    assert_eq!(account.iron, 0.0);
    assert_eq!(fixture.accounts.get_stats().dirty_count, 0);
}
