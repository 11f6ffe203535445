//! Property tests for the core invariants: id grammar, deterministic
//! channel naming, hash stability, timestamp monotonicity, and the DAG
//! invariant under random edge streams.

mod common;

use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use stoneforge::domain::{DependencyType, NewDependency, direct_channel_name};
use stoneforge::error::Error;
use stoneforge::id::{ElementId, EntityId, IdGenerator};
use stoneforge::store::{ElementStore, UpdateOptions};
use stoneforge::sync::{ExternalState, TaskProjection};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds")
}

fn entity_id() -> impl Strategy<Value = EntityId> {
    "[a-z0-9]{3,8}".prop_map(|hash| {
        EntityId::from(ElementId::parse(format!("el-{hash}")).expect("valid grammar"))
    })
}

proptest! {
    #[test]
    fn direct_channel_name_is_order_independent(a in entity_id(), b in entity_id()) {
        prop_assert_eq!(direct_channel_name(&a, &b), direct_channel_name(&b, &a));
    }

    #[test]
    fn generated_ids_always_match_grammar(seeds in prop::collection::vec(".*", 1..50)) {
        let mut generator = IdGenerator::new(0);
        let mut seen = HashSet::new();
        for seed in &seeds {
            let id = generator.generate(seed).expect("generates");
            prop_assert!(ElementId::parse(id.as_str()).is_ok());
            prop_assert!(seen.insert(id));
        }
    }

    #[test]
    fn projection_hash_ignores_label_order(
        title in ".{1,40}",
        labels in prop::collection::vec("[a-z]{1,8}", 0..6),
    ) {
        let forward = TaskProjection {
            title: title.clone(),
            body: None,
            state: ExternalState::Open,
            labels: labels.iter().cloned().collect::<BTreeSet<_>>(),
            assignees: BTreeSet::new(),
            priority: Some(3),
        };
        let mut reversed_labels = labels.clone();
        reversed_labels.reverse();
        let reversed = TaskProjection {
            labels: reversed_labels.into_iter().collect(),
            ..forward.clone()
        };
        prop_assert_eq!(forward.content_hash(), reversed.content_hash());
    }

    #[test]
    fn updated_at_never_regresses(titles in prop::collection::vec(".{1,60}", 1..12)) {
        let rt = runtime();
        rt.block_on(async {
            let fx = common::fixture().await;
            let task = common::create_task(fx.store.as_ref(), &fx.actor, "seed").await;

            let mut last = task.updated_at;
            for title in titles {
                let trimmed = title.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let updated = fx
                    .store
                    .update(&task.id, common::title_patch(trimmed), UpdateOptions::default())
                    .await
                    .expect("update applies");
                assert!(updated.updated_at > last);
                assert!(updated.updated_at >= updated.created_at);
                last = updated.updated_at;
            }
        });
    }

    #[test]
    fn blocking_subgraph_stays_acyclic(ops in prop::collection::vec((0usize..6, 0usize..6), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let fx = common::fixture().await;
            let mut tasks = Vec::new();
            for i in 0..6 {
                tasks.push(common::create_task(fx.store.as_ref(), &fx.actor, &format!("t{i}")).await);
            }

            // Shadow adjacency for an independent acyclicity check.
            let mut shadow: HashMap<usize, HashSet<usize>> = HashMap::new();

            for (from, to) in ops {
                if from == to {
                    continue;
                }
                let result = fx
                    .store
                    .add_dependency(NewDependency {
                        blocked: tasks[from].id.clone(),
                        blocker: tasks[to].id.clone(),
                        dep_type: DependencyType::Blocks,
                        created_by: fx.actor.clone(),
                        gate: None,
                        validation: None,
                    })
                    .await;

                let closes_cycle = reaches(&shadow, to, from);
                match result {
                    Ok(_) => {
                        assert!(!closes_cycle, "engine accepted a cycle-closing edge");
                        shadow.entry(from).or_default().insert(to);
                        assert!(is_acyclic(&shadow), "shadow graph went cyclic");
                    }
                    Err(Error::CycleDetected { .. }) => {
                        assert!(closes_cycle, "engine rejected an acyclic edge");
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        });
    }
}

/// DFS reachability over the shadow adjacency.
fn reaches(graph: &HashMap<usize, HashSet<usize>>, from: usize, to: usize) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = graph.get(&node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

fn is_acyclic(graph: &HashMap<usize, HashSet<usize>>) -> bool {
    graph
        .keys()
        .all(|&node| !graph.get(&node).is_some_and(|next| {
            next.iter().any(|&succ| reaches(graph, succ, node))
        }))
}
