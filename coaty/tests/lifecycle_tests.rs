//! Integration tests for cross-agent object lifecycle tracking:
//! added members via initial discovery and advertisement, changed
//! members via re-advertisement, removed members via deadvertisement.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use coaty::binding::{InProcessBinding, InProcessBroker};
use coaty::com::CommunicationManager;
use coaty::event::ResolveEventData;
use coaty::model::{CoatyObject, CoreType, Identity};
use coaty::runtime::CommunicationOptions;
use coaty::tracking::{ObjectLifecycleController, ObjectLifecycleInfo, TrackingError};
use coaty::EventStream;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const TRACKED_TYPE: &str = "com.mydomain.TrackedThing";

fn manager(broker: &InProcessBroker, name: &str) -> CommunicationManager<InProcessBinding> {
    CommunicationManager::new(
        Identity::new(name),
        CommunicationOptions::default(),
        Vec::new(),
        broker.binding(),
    )
}

async fn recv_info(stream: &mut EventStream<ObjectLifecycleInfo>) -> ObjectLifecycleInfo {
    timeout(RECV_TIMEOUT, stream.recv())
        .await
        .expect("timed out waiting for lifecycle info")
        .expect("lifecycle stream completed")
}

/// Answer Discover requests for the given object, as a remote holder
/// would.
fn spawn_holder(manager: &CommunicationManager<InProcessBinding>, object: CoatyObject) {
    let mut discovers = manager.observe_discover();
    tokio::spawn(async move {
        while let Some(incoming) = discovers.recv().await {
            if incoming.data().matches(&object) {
                incoming
                    .resolve(ResolveEventData::with_object(object.clone()))
                    .unwrap();
            }
        }
    });
}

#[tokio::test]
async fn test_initial_members_are_discovered() {
    let broker = InProcessBroker::new();
    let holder = manager(&broker, "Holder");
    let tracker_agent = manager(&broker, "Tracker");
    holder.start().await.unwrap();
    tracker_agent.start().await.unwrap();

    let existing = CoatyObject::new(CoreType::CoatyObject, TRACKED_TYPE, "pre-existing");
    spawn_holder(&holder, existing.clone());

    let tracker = ObjectLifecycleController::with_manager(tracker_agent.clone());
    let mut infos = tracker
        .observe_object_lifecycle_info_by_object_type(TRACKED_TYPE, None)
        .unwrap();

    let info = recv_info(&mut infos).await;
    let added = info.added.unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].object_id, existing.object_id);
    assert_eq!(added[0].name, "pre-existing");
}

#[tokio::test]
async fn test_advertise_deadvertise_cycle_yields_ordered_diffs() {
    let broker = InProcessBroker::new();
    let remote = manager(&broker, "Remote");
    let tracker_agent = manager(&broker, "Tracker");
    remote.start().await.unwrap();
    tracker_agent.start().await.unwrap();

    let tracker = ObjectLifecycleController::with_manager(tracker_agent.clone());
    let mut infos = tracker
        .observe_object_lifecycle_info_by_object_type(TRACKED_TYPE, None)
        .unwrap();

    // A new member appears.
    let mut object = CoatyObject::new(CoreType::CoatyObject, TRACKED_TYPE, "member");
    remote.publish_advertise(object.clone()).unwrap();
    let info = recv_info(&mut infos).await;
    assert_eq!(info.added.unwrap()[0].object_id, object.object_id);
    assert!(info.changed.is_none());
    assert!(info.removed.is_none());

    // A re-advertisement of a tracked id reports a change.
    object.extra.insert("revision".to_string(), json!(2));
    remote.publish_advertise(object.clone()).unwrap();
    let info = recv_info(&mut infos).await;
    let changed = info.changed.unwrap();
    assert_eq!(changed[0].extra_property("revision"), Some(&json!(2)));

    // Deadvertisement removes the member, reporting its last state.
    remote.publish_deadvertise(vec![object.object_id]).unwrap();
    let info = recv_info(&mut infos).await;
    let removed = info.removed.unwrap();
    assert_eq!(removed[0].object_id, object.object_id);
    assert_eq!(removed[0].extra_property("revision"), Some(&json!(2)));

    // Unrelated deadvertisements yield no diff.
    remote
        .publish_deadvertise(vec![uuid::Uuid::new_v4()])
        .unwrap();
    assert!(infos.try_recv().is_none());
}

#[tokio::test]
async fn test_predicate_narrows_tracked_set() {
    let broker = InProcessBroker::new();
    let remote = manager(&broker, "Remote");
    let tracker_agent = manager(&broker, "Tracker");
    remote.start().await.unwrap();
    tracker_agent.start().await.unwrap();

    let tracker = ObjectLifecycleController::with_manager(tracker_agent.clone());
    let predicate: coaty::tracking::ObjectPredicate =
        Arc::new(|object: &CoatyObject| object.name.starts_with("wanted"));
    let mut infos = tracker
        .observe_object_lifecycle_info_by_object_type(TRACKED_TYPE, Some(predicate))
        .unwrap();

    remote
        .publish_advertise(CoatyObject::new(CoreType::CoatyObject, TRACKED_TYPE, "ignored"))
        .unwrap();
    remote
        .publish_advertise(CoatyObject::new(CoreType::CoatyObject, TRACKED_TYPE, "wanted-1"))
        .unwrap();

    let info = recv_info(&mut infos).await;
    assert_eq!(info.added.unwrap()[0].name, "wanted-1");
    assert!(infos.try_recv().is_none());
}

#[tokio::test]
async fn test_agent_identities_are_trackable_by_core_type() {
    let broker = InProcessBroker::new();
    let tracker_agent = manager(&broker, "Tracker");
    tracker_agent.start().await.unwrap();

    let tracker = ObjectLifecycleController::with_manager(tracker_agent.clone());
    let mut infos = tracker
        .observe_object_lifecycle_info_by_core_type(CoreType::Identity, None)
        .unwrap();

    // A peer joining later is picked up through its join advertisement;
    // its orderly shutdown removes it through the unjoin deadvertisement.
    let peer = manager(&broker, "Peer");
    peer.start().await.unwrap();
    let peer_id = peer.identity().object_id;

    // The tracker's own identity may be reported first, via discovery.
    loop {
        let info = recv_info(&mut infos).await;
        if let Some(added) = &info.added {
            if added.iter().any(|object| object.object_id == peer_id) {
                break;
            }
        }
    }

    peer.stop().await.unwrap();
    loop {
        let info = recv_info(&mut infos).await;
        if let Some(removed) = &info.removed {
            if removed.iter().any(|object| object.object_id == peer_id) {
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_unresolved_controller_reports_error() {
    let tracker: ObjectLifecycleController<InProcessBinding> = ObjectLifecycleController::new();
    assert!(matches!(
        tracker.observe_object_lifecycle_info_by_core_type(CoreType::Identity, None),
        Err(TrackingError::NotResolved)
    ));
}
