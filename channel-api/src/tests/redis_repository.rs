use common::context::Context;
use fred::interfaces::{KeysInterface, SetsInterface};
use serial_test::serial;
use uuid::Uuid;

use crate::repository::redis::RedisRepository;
use crate::repository::{ChannelRepository, FindAllPage, RepositoryError};
use crate::tests::{sample_channel, setup_redis};

#[tokio::test]
#[ignore]
#[serial]
async fn test_insert_find_round_trip() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis);
    let (ctx, _handler) = Context::new();

    let channel = sample_channel();
    repo.insert(&ctx, &channel).await.expect("insert failed");

    let found = repo
        .find_by_id(&ctx, channel.channel_id)
        .await
        .expect("find failed");
    assert_eq!(found, channel);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_duplicate_insert_leaves_original() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis);
    let (ctx, _handler) = Context::new();

    let original = sample_channel();
    repo.insert(&ctx, &original).await.expect("insert failed");

    let mut duplicate = original.clone();
    duplicate.name = Some("imposter".to_string());

    let err = repo
        .insert(&ctx, &duplicate)
        .await
        .expect_err("duplicate insert should fail");
    assert!(matches!(err, RepositoryError::AlreadyExists));

    let found = repo
        .find_by_id(&ctx, original.channel_id)
        .await
        .expect("find failed");
    assert_eq!(found, original);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_insert_and_delete_keep_index_in_sync() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis.clone());
    let (ctx, _handler) = Context::new();

    let channel = sample_channel();
    let key = format!("channel:{}", channel.channel_id);

    repo.insert(&ctx, &channel).await.expect("insert failed");
    let indexed: bool = redis
        .next()
        .sismember("channels", key.as_str())
        .await
        .expect("sismember failed");
    assert!(indexed);

    repo.delete_by_id(&ctx, channel.channel_id)
        .await
        .expect("delete failed");
    let indexed: bool = redis
        .next()
        .sismember("channels", key.as_str())
        .await
        .expect("sismember failed");
    assert!(!indexed);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_delete_absent_is_not_found() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis);
    let (ctx, _handler) = Context::new();

    let err = repo
        .delete_by_id(&ctx, Uuid::new_v4())
        .await
        .expect_err("delete of absent key should fail");
    assert!(matches!(err, RepositoryError::NotFound));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_update_absent_creates_nothing() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis);
    let (ctx, _handler) = Context::new();

    let channel = sample_channel();
    let err = repo
        .update(&ctx, &channel)
        .await
        .expect_err("update of absent key should fail");
    assert!(matches!(err, RepositoryError::NotFound));

    let err = repo
        .find_by_id(&ctx, channel.channel_id)
        .await
        .expect_err("the failed update must not have created a value");
    assert!(matches!(err, RepositoryError::NotFound));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_corrupt_value_surfaces_on_read() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis.clone());
    let (ctx, _handler) = Context::new();

    let id = Uuid::new_v4();
    let _: () = redis
        .next()
        .set(format!("channel:{}", id), "not json", None, None, false)
        .await
        .expect("set failed");

    let err = repo
        .find_by_id(&ctx, id)
        .await
        .expect_err("corrupt value must not decode");
    assert!(matches!(err, RepositoryError::CorruptRecord(_)));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_corrupt_value_fails_enumeration() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis.clone());
    let (ctx, _handler) = Context::new();

    repo.insert(&ctx, &sample_channel())
        .await
        .expect("insert failed");

    // An indexed key holding an undecodable value.
    let key = format!("channel:{}", Uuid::new_v4());
    let _: () = redis
        .next()
        .set(key.as_str(), "not json", None, None, false)
        .await
        .expect("set failed");
    let _: u64 = redis
        .next()
        .sadd("channels", key.as_str())
        .await
        .expect("sadd failed");

    // The scan fails loudly rather than silently skipping the bad record.
    let mut cursor = None;
    let err = loop {
        match repo.find_all(&ctx, FindAllPage { size: 10, cursor }).await {
            Ok(page) => match page.cursor {
                Some(next) => cursor = Some(next),
                None => panic!("corrupt record should fail the scan"),
            },
            Err(err) => break err,
        }
    };
    assert!(matches!(err, RepositoryError::CorruptRecord(_)));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_find_all_on_empty_store() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis);
    let (ctx, _handler) = Context::new();

    let page = repo
        .find_all(
            &ctx,
            FindAllPage {
                size: 10,
                cursor: None,
            },
        )
        .await
        .expect("find_all failed");

    assert!(page.channels.is_empty());
    assert_eq!(page.cursor, None);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_find_all_cursor_walk_sees_every_channel() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis);
    let (ctx, _handler) = Context::new();

    let mut expected = std::collections::HashSet::new();
    for _ in 0..25 {
        let channel = sample_channel();
        expected.insert(channel.channel_id);
        repo.insert(&ctx, &channel).await.expect("insert failed");
    }

    // SCAN pages are approximate in size but the walk is complete.
    let mut seen = std::collections::HashSet::new();
    let mut cursor = None;
    loop {
        let page = repo
            .find_all(&ctx, FindAllPage { size: 5, cursor })
            .await
            .expect("find_all failed");

        for channel in page.channels {
            seen.insert(channel.channel_id);
        }

        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(seen, expected);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_find_all_omits_value_deleted_out_of_band() {
    let redis = setup_redis().await;
    let repo = RedisRepository::new(redis.clone());
    let (ctx, _handler) = Context::new();

    let kept = sample_channel();
    let orphaned = sample_channel();
    repo.insert(&ctx, &kept).await.expect("insert failed");
    repo.insert(&ctx, &orphaned).await.expect("insert failed");

    // Drop the value but leave its index entry behind.
    let _: u64 = redis
        .next()
        .del(format!("channel:{}", orphaned.channel_id))
        .await
        .expect("del failed");

    let mut channels = Vec::new();
    let mut cursor = None;
    loop {
        let page = repo
            .find_all(&ctx, FindAllPage { size: 10, cursor })
            .await
            .expect("find_all failed");
        channels.extend(page.channels);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(channels, vec![kept]);
}
