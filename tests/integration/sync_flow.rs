//! End-to-end scenarios: a wired client over the stateful mock server,
//! with the event engine running under virtual time.

use strato_integration_tests::{wait_until, TestEnvironment, VOLUME_ID};
use strato_types::NodeUid;
use tokio_util::sync::CancellationToken;

fn uid(node_id: &str) -> NodeUid {
    NodeUid::new(VOLUME_ID, node_id).unwrap()
}

#[tokio::test(start_paused = true)]
async fn created_node_appears_after_the_event_round_trip() {
    let env = TestEnvironment::new();
    env.server.insert_folder("dir", "root", "dir");
    env.server.insert_file("f1", "dir", "one");
    let cancel = CancellationToken::new();

    // Warm the listing; it is complete with one child.
    let children = env
        .client
        .access()
        .iterate_children(&uid("dir"), &cancel)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert!(env
        .client
        .node_cache()
        .is_folder_children_loaded(&uid("dir"))
        .await
        .unwrap());

    let _sync = env.client.start_volume_sync(VOLUME_ID).await.unwrap();

    // Another client creates a file; the event invalidates the listing.
    env.server.insert_file("f2", "dir", "two");
    env.server.push_event(1, "f2");
    wait_until(|| async {
        !env.client
            .node_cache()
            .is_folder_children_loaded(&uid("dir"))
            .await
            .unwrap()
    })
    .await;

    let children = env
        .client
        .access()
        .iterate_children(&uid("dir"), &cancel)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let mut names: Vec<String> = children
        .iter()
        .map(|node| node.name.clone().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["one".to_string(), "two".to_string()]);

    env.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn updated_node_goes_stale_and_refetches_fresh_content() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    env.server.insert_folder("dir", "root", "dir");
    env.server.insert_file("f1", "dir", "before");
    let cancel = CancellationToken::new();

    let node = env.client.access().get_node(&uid("f1"), &cancel).await?;
    assert_eq!(node.name.as_deref().unwrap(), "before");

    let _sync = env.client.start_volume_sync(VOLUME_ID).await?;

    env.server.rename("f1", "after");
    env.server.push_event(2, "f1");
    wait_until(|| async {
        env.client
            .node_cache()
            .get_node(&uid("f1"))
            .await
            .map(|node| node.is_stale)
            .unwrap_or(false)
    })
    .await;

    let node = env.client.access().get_node(&uid("f1"), &cancel).await?;
    assert_eq!(node.name.as_deref().unwrap(), "after");
    assert!(!node.is_stale);

    env.client.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deleted_node_disappears_with_its_descendants() {
    let env = TestEnvironment::new();
    env.server.insert_folder("dir", "root", "dir");
    env.server.insert_folder("sub", "dir", "sub");
    env.server.insert_file("f1", "sub", "leaf");
    let cancel = CancellationToken::new();

    env.client.access().get_node(&uid("f1"), &cancel).await.unwrap();
    assert!(env.client.node_cache().get_node(&uid("sub")).await.is_ok());

    let _sync = env.client.start_volume_sync(VOLUME_ID).await.unwrap();

    env.server.remove("f1");
    env.server.remove("sub");
    env.server.push_event(0, "sub");
    wait_until(|| async {
        env.client
            .node_cache()
            .get_node(&uid("sub"))
            .await
            .is_err()
    })
    .await;

    assert!(env.client.node_cache().get_node(&uid("f1")).await.is_err());
    assert!(env.client.node_cache().get_node(&uid("dir")).await.is_ok());

    env.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tree_refresh_marks_the_whole_volume_stale() {
    let env = TestEnvironment::new();
    env.server.insert_folder("dir", "root", "dir");
    env.server.insert_file("f1", "dir", "one");
    let cancel = CancellationToken::new();

    env.client.access().get_node(&uid("f1"), &cancel).await.unwrap();
    env.client
        .node_cache()
        .set_folder_children_loaded(&uid("dir"))
        .await
        .unwrap();

    let _sync = env.client.start_volume_sync(VOLUME_ID).await.unwrap();

    env.server.push_refresh();
    wait_until(|| async {
        env.client
            .node_cache()
            .get_node(&uid("f1"))
            .await
            .map(|node| node.is_stale)
            .unwrap_or(false)
    })
    .await;

    // Every listing marker of the volume is gone with the refresh.
    assert!(!env
        .client
        .node_cache()
        .is_folder_children_loaded(&uid("dir"))
        .await
        .unwrap());

    env.client.shutdown().await;
}
