mod common;

use common::test_config;
use cask_log::Engine;
use test_log::test;

const TASKS: usize = 4;
const WRITES_PER_TASK: usize = 100;
const KEYS_PER_TASK: usize = 20;

#[test(tokio::test)]
async fn concurrent_clients_observe_their_last_writes() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(test_config(folder.path()).max_segment_bytes(4_096))?;

    let mut clients = Vec::with_capacity(TASKS);

    for task in 0..TASKS {
        let engine = engine.clone();

        clients.push(tokio::spawn(async move {
            for i in 0..WRITES_PER_TASK {
                engine
                    .set(&format!("k{task}_{}", i % KEYS_PER_TASK), &format!("v{task}-{i}"))
                    .await?;
            }

            Ok::<_, cask_log::Error>(())
        }));
    }

    for client in clients {
        client.await.expect("client task panicked")?;
    }

    engine.flush().await?;

    // each task writes its own key space sequentially, so the last write
    // per key is deterministic
    for task in 0..TASKS {
        for j in 0..KEYS_PER_TASK {
            let last = WRITES_PER_TASK - KEYS_PER_TASK + j;

            assert_eq!(
                Some(format!("v{task}-{last}")),
                engine.get(&format!("k{task}_{j}"))?,
            );
        }
    }

    engine.shutdown().await;

    Ok(())
}
