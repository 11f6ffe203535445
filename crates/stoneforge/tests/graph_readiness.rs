//! Integration tests for the dependency graph engine and readiness
//! derivation: cycle prevention, gates, the blocked cache, and the
//! ready/blocked partition.

mod common;

use chrono::{Duration, Utc};
use common::{create_actor, create_task, create_task_with, fixture, status_patch};
use std::collections::BTreeSet;
use stoneforge::domain::{
    DependencyType, ElementFilter, ElementPatch, Gate, GateEvent, NewDependency, NewElement,
    NewPayload, NewPlan, NewWorkflow, PayloadPatch, PlanPatch, PlanStatus, TaskPatch, TaskStatus,
    TreeDirection, WorkflowPatch, WorkflowStatus,
};
use stoneforge::error::Error;
use stoneforge::id::{ElementId, EntityId, TaskId};
use stoneforge::store::{ElementStore, UpdateOptions};

fn blocks(blocked: &ElementId, blocker: &ElementId, actor: &EntityId) -> NewDependency {
    NewDependency {
        blocked: blocked.clone(),
        blocker: blocker.clone(),
        dep_type: DependencyType::Blocks,
        created_by: actor.clone(),
        gate: None,
        validation: None,
    }
}

#[tokio::test]
async fn cycle_insertion_fails_with_no_side_effect() {
    let fx = fixture().await;
    let t1 = create_task(fx.store.as_ref(), &fx.actor, "t1").await;
    let t2 = create_task(fx.store.as_ref(), &fx.actor, "t2").await;

    fx.store
        .add_dependency(blocks(&t1.id, &t2.id, &fx.actor))
        .await
        .unwrap();

    let err = fx
        .store
        .add_dependency(blocks(&t2.id, &t1.id, &fx.actor))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));

    // Graph still contains only t1 -> t2.
    let outgoing = fx.store.outgoing(&t1.id).await.unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].blocker, t2.id);
    assert!(fx.store.outgoing(&t2.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn blocked_until_blocker_closes() {
    let fx = fixture().await;
    let blocked = create_task(fx.store.as_ref(), &fx.actor, "waiting").await;
    let blocker = create_task(fx.store.as_ref(), &fx.actor, "doing").await;

    fx.store
        .add_dependency(blocks(&blocked.id, &blocker.id, &fx.actor))
        .await
        .unwrap();
    assert!(fx.store.is_blocked(&blocked.id).await.unwrap());

    // Closing the blocker invalidates the cache and releases the waiter.
    fx.store
        .update(&blocker.id, status_patch(TaskStatus::Closed), UpdateOptions::default())
        .await
        .unwrap();
    assert!(!fx.store.is_blocked(&blocked.id).await.unwrap());

    // Reopening re-blocks.
    fx.store
        .update(&blocker.id, status_patch(TaskStatus::Open), UpdateOptions::default())
        .await
        .unwrap();
    assert!(fx.store.is_blocked(&blocked.id).await.unwrap());
}

#[tokio::test]
async fn deleted_blocker_releases_waiters() {
    let fx = fixture().await;
    let blocked = create_task(fx.store.as_ref(), &fx.actor, "waiting").await;
    let blocker = create_task(fx.store.as_ref(), &fx.actor, "doomed").await;

    fx.store
        .add_dependency(blocks(&blocked.id, &blocker.id, &fx.actor))
        .await
        .unwrap();
    assert!(fx.store.is_blocked(&blocked.id).await.unwrap());

    fx.store
        .delete(&blocker.id, stoneforge::store::DeleteOptions::default())
        .await
        .unwrap();
    assert!(!fx.store.is_blocked(&blocked.id).await.unwrap());
}

#[tokio::test]
async fn timer_gate_blocks_until_due() {
    let fx = fixture().await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "timed").await;
    let anchor = create_task(fx.store.as_ref(), &fx.actor, "anchor").await;

    fx.store
        .add_dependency(NewDependency {
            blocked: task.id.clone(),
            blocker: anchor.id.clone(),
            dep_type: DependencyType::Awaits,
            created_by: fx.actor.clone(),
            gate: Some(Gate::Timer {
                wait_until: Utc::now() + Duration::hours(1),
            }),
            validation: None,
        })
        .await
        .unwrap();
    assert!(fx.store.is_blocked(&task.id).await.unwrap());

    // A second task gated on an already-elapsed timer is not blocked.
    let prompt = create_task(fx.store.as_ref(), &fx.actor, "prompt").await;
    fx.store
        .add_dependency(NewDependency {
            blocked: prompt.id.clone(),
            blocker: anchor.id.clone(),
            dep_type: DependencyType::Awaits,
            created_by: fx.actor.clone(),
            gate: Some(Gate::Timer {
                wait_until: Utc::now() - Duration::hours(1),
            }),
            validation: None,
        })
        .await
        .unwrap();
    assert!(!fx.store.is_blocked(&prompt.id).await.unwrap());
}

#[tokio::test]
async fn approval_gate_opens_on_quorum() {
    let fx = fixture().await;
    let alice = create_actor(fx.store.as_ref(), "alice").await;
    let bob = create_actor(fx.store.as_ref(), "bob").await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "gated").await;
    let review = create_task(fx.store.as_ref(), &fx.actor, "review").await;

    fx.store
        .add_dependency(NewDependency {
            blocked: task.id.clone(),
            blocker: review.id.clone(),
            dep_type: DependencyType::Awaits,
            created_by: fx.actor.clone(),
            gate: Some(Gate::Approval {
                required_approvers: BTreeSet::from([alice.clone(), bob.clone()]),
                approval_count: 2,
                approved_by: BTreeSet::new(),
            }),
            validation: None,
        })
        .await
        .unwrap();
    assert!(fx.store.is_blocked(&task.id).await.unwrap());

    fx.store
        .record_gate_event(&task.id, &review.id, GateEvent::Approval(alice))
        .await
        .unwrap();
    assert!(fx.store.is_blocked(&task.id).await.unwrap());

    fx.store
        .record_gate_event(&task.id, &review.id, GateEvent::Approval(bob))
        .await
        .unwrap();
    assert!(!fx.store.is_blocked(&task.id).await.unwrap());
}

#[tokio::test]
async fn relates_to_is_symmetric() {
    let fx = fixture().await;
    let a = create_task(fx.store.as_ref(), &fx.actor, "a").await;
    let b = create_task(fx.store.as_ref(), &fx.actor, "b").await;

    fx.store
        .add_dependency(NewDependency {
            blocked: b.id.clone(),
            blocker: a.id.clone(),
            dep_type: DependencyType::RelatesTo,
            created_by: fx.actor.clone(),
            gate: None,
            validation: None,
        })
        .await
        .unwrap();

    assert!(fx.store.are_related(&a.id, &b.id).await.unwrap());
    assert!(fx.store.are_related(&b.id, &a.id).await.unwrap());

    // Inserting the flipped pair is the same edge.
    fx.store
        .add_dependency(NewDependency {
            blocked: a.id.clone(),
            blocker: b.id.clone(),
            dep_type: DependencyType::RelatesTo,
            created_by: fx.actor.clone(),
            gate: None,
            validation: None,
        })
        .await
        .unwrap();
    let relates = fx
        .store
        .dependencies_of_type(DependencyType::RelatesTo)
        .await
        .unwrap();
    assert_eq!(relates.len(), 1);
}

#[tokio::test]
async fn tree_walk_respects_depth_and_direction() {
    let fx = fixture().await;
    let a = create_task(fx.store.as_ref(), &fx.actor, "a").await;
    let b = create_task(fx.store.as_ref(), &fx.actor, "b").await;
    let c = create_task(fx.store.as_ref(), &fx.actor, "c").await;

    fx.store.add_dependency(blocks(&a.id, &b.id, &fx.actor)).await.unwrap();
    fx.store.add_dependency(blocks(&b.id, &c.id, &fx.actor)).await.unwrap();

    let full = fx
        .store
        .dependency_tree(&a.id, TreeDirection::Outgoing, None)
        .await
        .unwrap();
    assert_eq!(full.len(), 2);
    assert_eq!(full[0].1, 1);
    assert_eq!(full[1].1, 2);

    let shallow = fx
        .store
        .dependency_tree(&a.id, TreeDirection::Outgoing, Some(1))
        .await
        .unwrap();
    assert_eq!(shallow.len(), 1);

    let upstream = fx
        .store
        .dependency_tree(&c.id, TreeDirection::Incoming, None)
        .await
        .unwrap();
    assert_eq!(upstream.len(), 2);
}

#[tokio::test]
async fn ready_and_blocked_partition_workable_tasks() {
    let fx = fixture().await;
    let free = create_task_with(fx.store.as_ref(), &fx.actor, "free", TaskStatus::Open, 2).await;
    let waiting =
        create_task_with(fx.store.as_ref(), &fx.actor, "waiting", TaskStatus::Open, 1).await;
    let blocker =
        create_task_with(fx.store.as_ref(), &fx.actor, "blocker", TaskStatus::InProgress, 4).await;
    // Out of scope for both sets:
    create_task_with(fx.store.as_ref(), &fx.actor, "parked", TaskStatus::Backlog, 1).await;
    let closed = create_task(fx.store.as_ref(), &fx.actor, "done").await;
    fx.store
        .update(&closed.id, status_patch(TaskStatus::Closed), UpdateOptions::default())
        .await
        .unwrap();

    fx.store
        .add_dependency(blocks(&waiting.id, &blocker.id, &fx.actor))
        .await
        .unwrap();

    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    let blocked = fx.store.blocked(&ElementFilter::default()).await.unwrap();

    let ready_ids: BTreeSet<_> = ready.iter().map(|e| e.id.clone()).collect();
    let blocked_ids: BTreeSet<_> = blocked.iter().map(|b| b.element.id.clone()).collect();

    assert!(ready_ids.contains(&free.id));
    assert!(ready_ids.contains(&blocker.id));
    assert!(blocked_ids.contains(&waiting.id));
    assert!(ready_ids.is_disjoint(&blocked_ids));

    // The blocked entry names its first blocker and a readable reason.
    let entry = blocked.iter().find(|b| b.element.id == waiting.id).unwrap();
    assert_eq!(entry.blocker.as_ref().unwrap().id, blocker.id);
    assert!(entry.reason.contains(blocker.id.as_str()));

    let backlog = fx.store.backlog().await.unwrap();
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].as_task().unwrap().title, "parked");
}

#[tokio::test]
async fn ready_orders_by_priority_then_age() {
    let fx = fixture().await;
    let low = create_task_with(fx.store.as_ref(), &fx.actor, "low", TaskStatus::Open, 4).await;
    let high = create_task_with(fx.store.as_ref(), &fx.actor, "high", TaskStatus::Open, 1).await;
    let older_high =
        create_task_with(fx.store.as_ref(), &fx.actor, "high2", TaskStatus::Open, 1).await;

    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    let ids: Vec<_> = ready.iter().map(|e| e.id.clone()).collect();

    // Priority ascending; equal priorities oldest first.
    assert_eq!(ids[0], high.id);
    assert_eq!(ids[1], older_high.id);
    assert_eq!(ids[2], low.id);
}

#[tokio::test]
async fn scheduled_for_future_excludes_from_ready() {
    let fx = fixture().await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "later").await;
    fx.store
        .update(
            &task.id,
            ElementPatch {
                payload: Some(PayloadPatch::Task(TaskPatch {
                    scheduled_for: Some(Some(Utc::now() + Duration::days(1))),
                    ..Default::default()
                })),
                ..Default::default()
            },
            UpdateOptions::default(),
        )
        .await
        .unwrap();

    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    assert!(!ready.iter().any(|e| e.id == task.id));
    // Not blocked either; just parked.
    let blocked = fx.store.blocked(&ElementFilter::default()).await.unwrap();
    assert!(!blocked.iter().any(|b| b.element.id == task.id));
}

#[tokio::test]
async fn draft_plan_membership_withholds_tasks() {
    let fx = fixture().await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "planned").await;

    let plan = fx
        .store
        .create(NewElement::new(
            fx.actor.clone(),
            NewPayload::Plan(NewPlan {
                name: "Q3 plan".to_string(),
                status: PlanStatus::Draft,
                tasks: BTreeSet::from([TaskId::from(task.id.clone())]),
            }),
        ))
        .await
        .unwrap();

    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    assert!(!ready.iter().any(|e| e.id == task.id));

    // Activating the plan releases its tasks.
    fx.store
        .update(
            &plan.id,
            ElementPatch {
                payload: Some(PayloadPatch::Plan(PlanPatch {
                    status: Some(PlanStatus::Active),
                    ..Default::default()
                })),
                ..Default::default()
            },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    assert!(ready.iter().any(|e| e.id == task.id));
}

#[tokio::test]
async fn ephemeral_terminal_workflow_withholds_tasks() {
    let fx = fixture().await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "scripted").await;

    let workflow = fx
        .store
        .create(NewElement::new(
            fx.actor.clone(),
            NewPayload::Workflow(NewWorkflow {
                name: "one-shot".to_string(),
                ephemeral: true,
                playbook_ref: None,
                tasks: BTreeSet::from([TaskId::from(task.id.clone())]),
            }),
        ))
        .await
        .unwrap();

    // Pending workflow: task is workable.
    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    assert!(ready.iter().any(|e| e.id == task.id));

    // Drive the workflow to a terminal state through the machine.
    for status in [WorkflowStatus::Running, WorkflowStatus::Completed] {
        fx.store
            .update(
                &workflow.id,
                ElementPatch {
                    payload: Some(PayloadPatch::Workflow(WorkflowPatch {
                        status: Some(status),
                        ..Default::default()
                    })),
                    ..Default::default()
                },
                UpdateOptions::default(),
            )
            .await
            .unwrap();
    }

    let ready = fx.store.ready(&ElementFilter::default()).await.unwrap();
    assert!(!ready.iter().any(|e| e.id == task.id));
}

#[tokio::test]
async fn workflow_terminal_states_absorb() {
    let fx = fixture().await;
    let workflow = fx
        .store
        .create(NewElement::new(
            fx.actor.clone(),
            NewPayload::Workflow(NewWorkflow {
                name: "pipeline".to_string(),
                ephemeral: false,
                playbook_ref: None,
                tasks: BTreeSet::new(),
            }),
        ))
        .await
        .unwrap();

    let set_status = |status: WorkflowStatus| ElementPatch {
        payload: Some(PayloadPatch::Workflow(WorkflowPatch {
            status: Some(status),
            ..Default::default()
        })),
        ..Default::default()
    };

    fx.store
        .update(&workflow.id, set_status(WorkflowStatus::Running), UpdateOptions::default())
        .await
        .unwrap();
    fx.store
        .update(&workflow.id, set_status(WorkflowStatus::Failed), UpdateOptions::default())
        .await
        .unwrap();

    let err = fx
        .store
        .update(&workflow.id, set_status(WorkflowStatus::Running), UpdateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_STATUS");
}
