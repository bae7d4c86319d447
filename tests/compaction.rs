mod common;

use common::{segment_file_count, test_config, wait_until};
use cask_log::Engine;
use std::time::Duration;
use test_log::test;

#[test(tokio::test)]
async fn rotation_creates_marker_and_second_segment() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let base = folder.path();

    // tiny rotation threshold, compaction effectively disabled
    let engine = Engine::open(test_config(base).max_segment_bytes(30))?;

    engine.set("k1", "v1").await?;
    engine.flush().await?;

    for i in 0..20 {
        engine.set("pad", &format!("padding-{i}")).await?;
        engine.flush().await?;

        if segment_file_count(base) == 2 {
            break;
        }
    }

    assert_eq!(2, segment_file_count(base));
    assert!(base.join("manifest.txt").exists());

    // k1 lives in the closed segment and is still readable
    assert_eq!(Some("v1".to_owned()), engine.get("k1")?);

    engine.shutdown().await;

    Ok(())
}

#[test(tokio::test)]
async fn compaction_merges_and_deletes_old_segments() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let base = folder.path();

    let engine = Engine::open(
        test_config(base)
            .max_segment_bytes(200)
            .compaction_interval(Duration::from_secs(1)),
    )?;

    engine.set("k1", "v1").await?;
    engine.flush().await?;

    // churn one key to pile up garbage and force rotations
    for i in 0..10 {
        engine.set("churn", &format!("{i}-{}", "x".repeat(40))).await?;
        engine.flush().await?;
    }
    assert!(segment_file_count(base) > 1);

    wait_until("compaction to settle", || {
        !base.join("manifest.txt").exists() && segment_file_count(base) == 1
    })
    .await;

    // live values survived the merge
    assert_eq!(Some("v1".to_owned()), engine.get("k1")?);
    assert_eq!(
        Some(format!("9-{}", "x".repeat(40))),
        engine.get("churn")?
    );

    engine.shutdown().await;

    Ok(())
}

#[test(tokio::test)]
async fn restart_with_backlog_recreates_marker_and_compacts() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let base = folder.path();

    {
        let engine = Engine::open(test_config(base).max_segment_bytes(30))?;

        engine.set("k1", "v1").await?;
        for i in 0..8 {
            engine.set("pad", &format!("padding-{i}")).await?;
        }
        engine.flush().await?;
        engine.shutdown().await;
    }

    assert!(segment_file_count(base) > 1);

    // the marker can get lost between runs; the on-disk backlog must
    // still be picked up after a restart
    std::fs::remove_file(base.join("manifest.txt"))?;

    {
        let engine = Engine::open(
            test_config(base)
                .max_segment_bytes(30)
                .compaction_interval(Duration::from_secs(1)),
        )?;

        assert!(base.join("manifest.txt").exists());

        wait_until("compaction to settle", || {
            !base.join("manifest.txt").exists() && segment_file_count(base) == 1
        })
        .await;

        assert_eq!(Some("v1".to_owned()), engine.get("k1")?);
        assert_eq!(Some("padding-7".to_owned()), engine.get("pad")?);

        engine.shutdown().await;
    }

    Ok(())
}

#[test(tokio::test)]
async fn tombstones_do_not_resurrect_after_compaction() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let base = folder.path();

    let engine = Engine::open(
        test_config(base)
            .max_segment_bytes(200)
            .compaction_interval(Duration::from_secs(1)),
    )?;

    engine.set("a", "1").await?;
    engine.flush().await?;

    // rotate so that "a" ends up in a closed segment
    for i in 0..5 {
        engine.set("churn", &format!("{i}-{}", "x".repeat(40))).await?;
    }
    engine.flush().await?;

    engine.delete("a").await?;
    engine.flush().await?;

    // rotate again so the tombstone is in a closed segment as well
    for i in 5..10 {
        engine.set("churn", &format!("{i}-{}", "x".repeat(40))).await?;
    }
    engine.flush().await?;

    wait_until("compaction to settle", || {
        !base.join("manifest.txt").exists() && segment_file_count(base) == 1
    })
    .await;

    // the old live version of "a" must not come back from the dead
    assert_eq!(None, engine.get("a")?);
    assert_eq!(
        Some(format!("9-{}", "x".repeat(40))),
        engine.get("churn")?
    );

    engine.shutdown().await;

    Ok(())
}
