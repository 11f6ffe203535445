//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use stoneforge::domain::{
    ContentType, Element, ElementPatch, NewActor, NewChannel, NewDocument, NewElement,
    NewMessage, NewPayload, NewTask, PayloadPatch, TaskPatch, TaskStatus,
};
use stoneforge::id::{ChannelId, DocumentId, EntityId};
use stoneforge::store::ElementStore;
use stoneforge::store::memory::MemoryStore;

/// A store plus the actor all fixtures are created by.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub actor: EntityId,
}

pub async fn fixture() -> Fixture {
    init_tracing();
    let store = MemoryStore::in_memory();
    let actor = create_actor(store.as_ref(), "tester").await;
    Fixture { store, actor }
}

/// Installs a subscriber once so `RUST_LOG` works in test runs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn create_actor(store: &dyn ElementStore, name: &str) -> EntityId {
    let element = store
        .create(NewElement::new(
            // Bootstrap: the first actor is attributed to itself via a
            // synthetic principal.
            EntityId::from(stoneforge::id::ElementId::new_unchecked("el-sys")),
            NewPayload::Entity(NewActor {
                name: name.to_string(),
                actor_kind: stoneforge::domain::ActorKind::Human,
            }),
        ))
        .await
        .expect("actor creates");
    EntityId::from(element.id)
}

pub async fn create_task(store: &dyn ElementStore, actor: &EntityId, title: &str) -> Element {
    create_task_with(store, actor, title, TaskStatus::Open, 3).await
}

pub async fn create_task_with(
    store: &dyn ElementStore,
    actor: &EntityId,
    title: &str,
    status: TaskStatus,
    priority: u8,
) -> Element {
    store
        .create(NewElement::new(
            actor.clone(),
            NewPayload::Task(NewTask {
                title: title.to_string(),
                status,
                priority,
                ..Default::default()
            }),
        ))
        .await
        .expect("task creates")
}

pub async fn create_document(
    store: &dyn ElementStore,
    actor: &EntityId,
    content: &str,
) -> Element {
    store
        .create(NewElement::new(
            actor.clone(),
            NewPayload::Document(NewDocument {
                content_type: ContentType::Markdown,
                content: content.to_string(),
                ..Default::default()
            }),
        ))
        .await
        .expect("document creates")
}

pub async fn create_direct_channel(
    store: &dyn ElementStore,
    creator: &EntityId,
    other: &EntityId,
) -> Element {
    store
        .create(NewElement::new(
            creator.clone(),
            NewPayload::Channel(NewChannel {
                name: None,
                channel_type: stoneforge::domain::ChannelType::Direct,
                members: BTreeSet::from([creator.clone(), other.clone()]),
                permissions: None,
            }),
        ))
        .await
        .expect("channel creates")
}

pub async fn create_message(
    store: &dyn ElementStore,
    sender: &EntityId,
    channel: &ChannelId,
    content_ref: &DocumentId,
) -> Element {
    store
        .create(NewElement::new(
            sender.clone(),
            NewPayload::Message(NewMessage {
                channel_id: channel.clone(),
                content_ref: content_ref.clone(),
                thread_id: None,
                attachments: vec![],
            }),
        ))
        .await
        .expect("message creates")
}

pub fn status_patch(status: TaskStatus) -> ElementPatch {
    ElementPatch {
        payload: Some(PayloadPatch::Task(TaskPatch {
            status: Some(status),
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn title_patch(title: &str) -> ElementPatch {
    ElementPatch {
        payload: Some(PayloadPatch::Task(TaskPatch {
            title: Some(title.to_string()),
            ..Default::default()
        })),
        ..Default::default()
    }
}
