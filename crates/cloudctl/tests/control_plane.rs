//! End-to-end scenarios against an embedded store

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cloudctl::auth::AllowAll;
use cloudctl::cluster::{filter_by_host, register_live_node};
use cloudctl::{
    CloudControl, CloudError, Command, CommandOutput, Config, ReplicaState, StateMessage,
};
use coord::{EmbeddedServer, MemoryStore, StoreError};
use tokio::sync::watch;

async fn control(store: &MemoryStore) -> CloudControl {
    CloudControl::connect(Arc::new(store.connect()), &Config::default(), Arc::new(AllowAll))
        .await
        .unwrap()
}

fn write_conf(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("solrconfig.xml"), "<a/>").unwrap();
    std::fs::write(dir.join("schema.xml"), "<b/>").unwrap();
}

#[tokio::test]
async fn upload_link_download_scenario() {
    let data = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_conf(src.path());

    let server = EmbeddedServer::start(data.path()).await.unwrap();
    let ctl = control(server.store()).await;

    ctl.execute(Command::UpConfig {
        conf_dir: src.path().to_path_buf(),
        conf_name: "myconf".into(),
    })
    .await
    .unwrap();
    ctl.execute(Command::LinkConfig {
        collection: "collection1".into(),
        conf_name: "myconf".into(),
    })
    .await
    .unwrap();
    ctl.execute(Command::DownConfig {
        conf_name: "myconf".into(),
        conf_dir: dst.path().to_path_buf(),
    })
    .await
    .unwrap();

    assert_eq!(std::fs::read(dst.path().join("solrconfig.xml")).unwrap(), b"<a/>");
    assert_eq!(std::fs::read(dst.path().join("schema.xml")).unwrap(), b"<b/>");
    assert_eq!(
        ctl.registry().linked_config("collection1").await.unwrap().as_deref(),
        Some("myconf")
    );

    ctl.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn bootstrap_survives_restart_without_rewrites() {
    let data = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let core = home.path().join("collection1");
    write_conf(&core.join("conf"));
    std::fs::write(core.join("core.properties"), "configName=shared\n").unwrap();

    let solr_home = home.path().to_path_buf();
    let first = EmbeddedServer::scoped(data.path(), |store| async move {
        let ctl = control(&store).await;
        ctl.execute(Command::Bootstrap { solr_home }).await
    })
    .await
    .unwrap();
    match first {
        CommandOutput::Bootstrap { report } => {
            assert_eq!(report.uploaded, vec!["shared"]);
            assert_eq!(report.linked, vec!["collection1"]);
        }
        other => panic!("unexpected output {:?}", other),
    }

    // the tree came back from disk; a second run finds everything in place
    let server = EmbeddedServer::start(data.path()).await.unwrap();
    let ctl = control(server.store()).await;
    let revision = server.store().revision();
    let second = ctl
        .execute(Command::Bootstrap {
            solr_home: home.path().to_path_buf(),
        })
        .await
        .unwrap();
    match second {
        CommandOutput::Bootstrap { report } => assert_eq!(report.writes(), 0),
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(server.store().revision(), revision);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn scoped_server_stops_on_failure() {
    let data = tempfile::tempdir().unwrap();

    let result: Result<(), CloudError> = EmbeddedServer::scoped(data.path(), |store| async move {
        let ctl = control(&store).await;
        ctl.execute(Command::MakePath {
            path: "/before/failure".into(),
        })
        .await?;
        ctl.execute(Command::Get {
            path: "/missing".into(),
        })
        .await?;
        Ok(())
    })
    .await;
    assert!(matches!(
        result,
        Err(CloudError::Store(StoreError::NoSuchPath(_)))
    ));

    // the image was still written on the way out
    let server = EmbeddedServer::start(data.path()).await.unwrap();
    let ctl = control(server.store()).await;
    assert!(ctl.client().exists("/before/failure").await.unwrap());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_producers_keep_per_replica_order() {
    let store = MemoryStore::new();
    let ctl = Arc::new(control(&store).await);
    ctl.client().make_path("/collections/c1").await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = ctl.start_state_machine(shutdown_rx);

    let mut producers = Vec::new();
    for i in 0..4 {
        let ctl = ctl.clone();
        producers.push(tokio::spawn(async move {
            let replica = format!("core_node{}", i);
            let queue = ctl.queue();
            queue
                .offer(&StateMessage::Register {
                    collection: "c1".into(),
                    shard: "shard1".into(),
                    replica: replica.clone(),
                    core: format!("c1_shard1_replica{}", i),
                    node_name: format!("host{}:8983_solr", i % 2),
                    base_url: format!("http://host{}:8983/solr", i % 2),
                })
                .await
                .unwrap();
            for state in [ReplicaState::Recovering, ReplicaState::Active] {
                queue
                    .offer(&StateMessage::state("c1", "shard1", &replica, state))
                    .await
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    for i in 0..4 {
        ctl.reader()
            .wait_for_replica_state(
                "c1",
                "shard1",
                &format!("core_node{}", i),
                ReplicaState::Active,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
    }
    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap().unwrap();

    assert_eq!(ctl.queue().pending().await.unwrap(), 0);
    let state = ctl.reader().refresh().await.unwrap();
    let active = state.active_replicas("c1", None).unwrap();
    assert_eq!(active.len(), 4);
    assert_eq!(filter_by_host(active, "host1").len(), 2);
}

#[tokio::test]
async fn down_replica_leaves_routing() {
    let store = MemoryStore::new();
    let ctl = control(&store).await;
    ctl.client().make_path("/collections/c1").await.unwrap();
    register_live_node(ctl.client(), "hostA:8983_solr").await.unwrap();

    let queue = ctl.queue();
    for replica in ["core_node1", "core_node2"] {
        queue
            .offer(&StateMessage::Register {
                collection: "c1".into(),
                shard: "shard1".into(),
                replica: replica.into(),
                core: format!("c1_{}", replica),
                node_name: "hostA:8983_solr".into(),
                base_url: "http://hostA:8983/solr".into(),
            })
            .await
            .unwrap();
        for state in [ReplicaState::Recovering, ReplicaState::Active] {
            queue
                .offer(&StateMessage::state("c1", "shard1", replica, state))
                .await
                .unwrap();
        }
    }
    ctl.state_machine().process_pending().await.unwrap();
    assert_eq!(
        ctl.reader().refresh().await.unwrap().servable_replicas("c1", None).unwrap().len(),
        2
    );

    queue
        .offer(&StateMessage::state("c1", "shard1", "core_node2", ReplicaState::Down))
        .await
        .unwrap();
    ctl.state_machine().process_pending().await.unwrap();

    let output = ctl
        .execute(Command::GetCollections {
            host: Some("hostA".into()),
        })
        .await
        .unwrap();
    let text = output.to_string();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("name=\"c1_core_node1\""));
}
