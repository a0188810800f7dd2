//! Integration Tests for the Graph Runtime
//!
//! These tests verify that definitions, kinds, dependency resolution,
//! execution contexts and scopes work together correctly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use smallvec::smallvec;

use reagraph_core::graph::Dependencies;
use reagraph_core::reactive::ContextHandle;
use reagraph_core::scope::ListenerGuard;
use reagraph_core::{
    define, props, provide, scope, sentinel, Dependency, FieldType, NodeDefinition, NodeKind, Operation,
    OperationName, Outcome, Request, Runtime, Shape, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `cell { initial }`: a stateful value that can be set.
fn cell_kind() -> &'static NodeKind {
    static KIND: OnceLock<NodeKind> = OnceLock::new();
    KIND.get_or_init(|| {
        define("cell", |kind| {
            kind.shape(Shape::empty().required("initial", FieldType::Any))
                .state(|props| props.get("initial").cloned().unwrap_or(Value::Null))
                .operation(
                    OperationName::Evaluate,
                    Operation::new(|args| {
                        let state = args.state().cloned().unwrap_or(Value::Null);
                        Ok(sentinel::value(state).into())
                    }),
                )
                .operation(
                    OperationName::Set,
                    Operation::new(|args| {
                        let next = args
                            .payload()
                            .and_then(sentinel::unwrap_value)
                            .cloned()
                            .unwrap_or(Value::Null);
                        args.set_state(|_| next);
                        Ok(sentinel::ok().into())
                    }),
                )
        })
    })
}

fn cell(initial: impl Into<Value>) -> NodeDefinition {
    NodeDefinition::create(cell_kind(), props! { "initial" => initial.into() }).unwrap()
}

fn int_of(node: &NodeDefinition) -> Option<i64> {
    sentinel::unwrap_value(node).and_then(Value::as_i64)
}

fn sum(values: &[NodeDefinition]) -> NodeDefinition {
    sentinel::value(values.iter().filter_map(int_of).sum::<i64>())
}

/// `add { left, right }`: evaluates both operands and sums them.
fn add_kind() -> &'static NodeKind {
    static KIND: OnceLock<NodeKind> = OnceLock::new();
    KIND.get_or_init(|| {
        define("add", |kind| {
            kind.shape(
                Shape::empty()
                    .required("left", FieldType::Node)
                    .required("right", FieldType::Node),
            )
            .operation(
                OperationName::Evaluate,
                Operation::new(|args| Ok(sum(args.dependencies()).into())).with_dependencies(|node, _| {
                    ["left", "right"]
                        .iter()
                        .filter_map(|name| node.node(name).cloned())
                        .map(Dependency::on)
                        .collect()
                }),
            )
        })
    })
}

fn add(left: NodeDefinition, right: NodeDefinition) -> NodeDefinition {
    NodeDefinition::create(add_kind(), props! { "left" => left, "right" => right }).unwrap()
}

fn recorder() -> (Arc<Mutex<Vec<NodeDefinition>>>, impl Fn(&NodeDefinition) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value: &NodeDefinition| sink.lock().push(value.clone()))
}

/// Test that structurally equal property bags produce the same id.
#[test]
fn identity_is_deterministic_for_equal_properties() {
    let left = NodeDefinition::create(
        add_kind(),
        props! { "left" => sentinel::value(1), "right" => sentinel::value(2) },
    )
    .unwrap();
    let right = NodeDefinition::create(
        add_kind(),
        props! { "right" => sentinel::value(2), "left" => sentinel::value(1) },
    )
    .unwrap();
    assert_eq!(left.id(), right.id());
    assert!(left.id().as_str().starts_with("add:"));

    let other = add(sentinel::value(1), sentinel::value(3));
    assert_ne!(left.id(), other.id());
}

/// Test that writing a structurally equal state notifies nobody.
#[test]
fn equal_state_writes_do_not_notify() {
    init_tracing();
    let runtime = Runtime::new();
    let node = runtime.node(cell(Value::Map(props! { "a" => 1, "b" => 2 })));

    let calls = Arc::new(AtomicI32::new(0));
    let counter = calls.clone();
    let _subscription = runtime.subscribe(&node, Request::evaluate(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Same content, different key order
    runtime.set(&node, sentinel::value(Value::Map(props! { "b" => 2, "a" => 1 })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    runtime.set(&node, sentinel::value(Value::Map(props! { "a" => 1, "b" => 3 })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Test that an error dependency short-circuits the combinator.
#[test]
fn error_dependency_short_circuits_combine() {
    let runtime = Runtime::new();
    let origin = runtime.node(sentinel::nil());
    let combined = Arc::new(AtomicI32::new(0));
    let counter = combined.clone();

    let failure = sentinel::error("upstream failed");
    let dependencies: Dependencies = smallvec![
        Dependency::on(sentinel::value(1)),
        Dependency::on(failure.clone()),
    ];
    let result = runtime.resolve_in(&origin, dependencies, move |values| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(sum(values))
    });

    assert_eq!(result, failure);
    assert_eq!(combined.load(Ordering::SeqCst), 0);
}

/// Test that a set acknowledged with `ok` reads back as the submitted value.
#[test]
fn set_reads_back_the_submitted_value() {
    let runtime = Runtime::new();
    let node = runtime.node(cell(0));
    let submitted = sentinel::value("hello");
    assert_eq!(runtime.set(&node, submitted.clone()), submitted);
    assert_eq!(runtime.evaluate(&node), sentinel::value("hello"));
}

/// Test that unsubscribing undoes everything subscribing did.
#[test]
fn unsubscribe_undoes_subscription_effects() {
    init_tracing();
    const GUARD: &str = "bus_listener";
    let kind = NodeKind::builder("listening_cell")
        .state(|_| Value::Int(0))
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| Ok(sentinel::value(args.state().cloned().unwrap_or(Value::Null)).into())),
        )
        .on_subscribe(|ctx| {
            let guard = ctx.scope().events().listen(|_| {});
            ctx.set_data(GUARD, guard);
        })
        .on_unsubscribe(|ctx| {
            drop(ctx.take_data::<ListenerGuard>(GUARD));
        })
        .build();

    let runtime = Runtime::new();
    let node = runtime.node(NodeDefinition::create(&kind, props! {}).unwrap());
    let bus = runtime.root_scope().events().clone();
    let store_key = node.key();

    let subscription = runtime.subscribe(&node, Request::evaluate(), |_| {});
    assert_eq!(bus.listener_count(), 1);
    assert_eq!(runtime.root_scope().store().ref_count(&store_key), Some(1));

    drop(subscription);
    assert_eq!(bus.listener_count(), 0);
    assert!(!runtime.root_scope().store().contains(&store_key));
    assert_eq!(runtime.subscriber_count(), 0);
}

/// Test the arithmetic composite: value(5) + value(3).
#[test]
fn composite_of_values_sums() {
    let runtime = Runtime::new();
    let node = runtime.node(add(sentinel::value(5), sentinel::value(3)));
    assert_eq!(runtime.evaluate(&node), sentinel::value(8));

    let origin = runtime.node(sentinel::nil());
    let resolved = runtime.resolve_in(
        &origin,
        smallvec![Dependency::on(sentinel::value(5)), Dependency::on(sentinel::value(3))],
        |values| Ok(sum(values)),
    );
    assert_eq!(resolved, sentinel::value(8));
}

/// Test that a pending operand makes the composite pending.
#[test]
fn pending_dependency_yields_pending() {
    let runtime = Runtime::new();
    let node = runtime.node(add(sentinel::pending(), sentinel::value(3)));
    assert!(sentinel::is_pending(&runtime.evaluate(&node)));

    let combined = Arc::new(AtomicI32::new(0));
    let counter = combined.clone();
    let origin = runtime.node(sentinel::nil());
    let resolved = runtime.resolve_in(
        &origin,
        smallvec![Dependency::on(sentinel::pending()), Dependency::on(sentinel::value(3))],
        move |values| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(sum(values))
        },
    );
    assert!(sentinel::is_pending(&resolved));
    assert_eq!(combined.load(Ordering::SeqCst), 0);
}

/// Test that events emitted inside a nested scope stay there.
#[test]
fn child_scope_events_do_not_reach_parent() {
    let emitter = NodeKind::builder("emitter")
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| {
                args.emit(&sentinel::value("ping"));
                Ok(sentinel::ok().into())
            }),
        )
        .build();
    let emit = NodeDefinition::create(&emitter, props! {}).unwrap();

    let runtime = Runtime::new();
    let heard = Arc::new(AtomicI32::new(0));
    let counter = heard.clone();
    let _guard = runtime.root_scope().events().listen(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(sentinel::is_ok(&runtime.evaluate(&runtime.node(scope(emit.clone())))));
    assert_eq!(heard.load(Ordering::SeqCst), 0);

    assert!(sentinel::is_ok(&runtime.evaluate(&runtime.node(emit))));
    assert_eq!(heard.load(Ordering::SeqCst), 1);
}

/// Test that structurally equal definitions share one computation.
#[test]
fn equal_definitions_share_one_computation() {
    let runs = Arc::new(AtomicI32::new(0));
    let counter = runs.clone();
    let kind = NodeKind::builder("counted")
        .shape(Shape::empty().required("a", FieldType::Int).required("b", FieldType::Int))
        .operation(
            OperationName::Evaluate,
            Operation::new(move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                let a = args.definition().get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.definition().get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(sentinel::value(a * b).into())
            }),
        )
        .build();

    let first = NodeDefinition::create(&kind, props! { "a" => 6, "b" => 7 }).unwrap();
    let second = NodeDefinition::create(&kind, props! { "b" => 7, "a" => 6 }).unwrap();

    let runtime = Runtime::new();
    assert_eq!(runtime.evaluate(&runtime.node(first)), sentinel::value(42));
    assert_eq!(runtime.evaluate(&runtime.node(second)), sentinel::value(42));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Test that subscriptions follow state through a derived node.
#[test]
fn subscriptions_follow_state_through_dependencies() {
    init_tracing();
    let runtime = Runtime::new();
    let source = cell(2);
    let total = runtime.node(add(source.clone(), sentinel::value(10)));

    let (seen, listener) = recorder();
    let _subscription = runtime.subscribe(&total, Request::evaluate(), listener);
    runtime.set(&runtime.node(source.clone()), sentinel::value(5));
    runtime.set(&runtime.node(source), sentinel::value(5));

    assert_eq!(*seen.lock(), vec![sentinel::value(12), sentinel::value(15)]);
}

/// Test that context values reach nodes below a `provide`.
#[test]
fn provided_context_is_visible_below() {
    let param = NodeKind::builder("param")
        .shape(Shape::empty().required("key", FieldType::String))
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| {
                let value = args.context_values().first().cloned().flatten();
                Ok(value.unwrap_or_else(sentinel::nil).into())
            })
            .with_context(|node, _| {
                node.get("key")
                    .and_then(Value::as_str)
                    .map(|key| vec![key.to_string()])
                    .unwrap_or_default()
            }),
        )
        .build();
    let id_param = NodeDefinition::create(&param, props! { "key" => "id" }).unwrap();

    let runtime = Runtime::new();
    let outer = provide("id", sentinel::value(1), provide("id", sentinel::value(7), id_param.clone()));
    assert_eq!(runtime.evaluate(&runtime.node(outer)), sentinel::value(7));
    assert!(sentinel::is_nil(&runtime.evaluate(&runtime.node(id_param))));
}

/// Test that a node depending on itself fails instead of looping.
#[test]
fn self_dependency_is_a_cycle() {
    let kind = NodeKind::builder("ouroboros")
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| Ok(sum(args.dependencies()).into()))
                .with_dependencies(|node, _| smallvec![Dependency::on(node.clone())]),
        )
        .build();
    let runtime = Runtime::new();
    let result = runtime.evaluate(&runtime.node(NodeDefinition::create(&kind, props! {}).unwrap()));
    assert!(sentinel::is_error(&result));
    assert!(sentinel::error_message(&result).unwrap().contains("Cycle detected"));
}

/// Test that a `once` dependency is not re-resolved within a subscription.
#[test]
fn once_dependencies_are_not_tracked() {
    let snapshot = NodeKind::builder("snapshot")
        .shape(Shape::empty().required("source", FieldType::Node))
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| Ok(args.dependency(0).cloned().unwrap_or_else(sentinel::nil).into()))
                .with_dependencies(|node, _| {
                    node.node("source")
                        .cloned()
                        .map(|source| Dependency::on(source).once())
                        .into_iter()
                        .collect()
                }),
        )
        .build();
    let source = cell(1);
    let runtime = Runtime::new();
    let node = runtime.node(NodeDefinition::create(&snapshot, props! { "source" => source.clone() }).unwrap());

    let (seen, listener) = recorder();
    let subscription = runtime.subscribe(&node, Request::evaluate(), listener);
    runtime.set(&runtime.node(source), sentinel::value(2));

    assert_eq!(*seen.lock(), vec![sentinel::value(1)]);
    assert_eq!(subscription.current(), Some(sentinel::value(1)));
}

/// Test that update and invalidate hooks fire on active nodes.
#[test]
fn lifecycle_hooks_fire_on_active_nodes() {
    let updates = Arc::new(AtomicI32::new(0));
    let invalidations = Arc::new(AtomicI32::new(0));
    let (u, i) = (updates.clone(), invalidations.clone());

    let source = cell(1);
    let watcher = NodeKind::builder("watcher")
        .shape(Shape::empty().required("source", FieldType::Node))
        .state(|_| Value::Int(0))
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| Ok(args.dependency(0).cloned().unwrap_or_else(sentinel::nil).into()))
                .with_dependencies(|node, _| node.node("source").cloned().map(Dependency::on).into_iter().collect()),
        )
        .operation(
            OperationName::Call,
            Operation::new(|args| {
                args.set_state(|n| Value::Int(n.as_i64().unwrap_or(0) + 1));
                Ok(sentinel::ok().into())
            }),
        )
        .on_update(move |_| {
            u.fetch_add(1, Ordering::SeqCst);
        })
        .on_invalidate(move |_| {
            i.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let runtime = Runtime::new();
    let node = runtime.node(NodeDefinition::create(&watcher, props! { "source" => source.clone() }).unwrap());
    let _subscription = runtime.subscribe(&node, Request::evaluate(), |_| {});

    runtime.set(&runtime.node(source), sentinel::value(2));
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(updates.load(Ordering::SeqCst), 0);

    runtime.perform(&node, Request::call());
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

/// Test that writes through a handle are dropped once the context is gone.
#[test]
fn handle_writes_after_disposal_are_dropped() {
    let captured: Arc<Mutex<Option<ContextHandle>>> = Arc::new(Mutex::new(None));
    let slot = captured.clone();
    let kind = NodeKind::builder("handled")
        .state(|_| Value::Int(0))
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| Ok(sentinel::value(args.state().cloned().unwrap_or(Value::Null)).into())),
        )
        .on_subscribe(move |ctx| {
            *slot.lock() = Some(ctx.handle());
        })
        .build();

    let runtime = Runtime::new();
    let node = runtime.node(NodeDefinition::create(&kind, props! {}).unwrap());
    let (seen, listener) = recorder();
    let subscription = runtime.subscribe(&node, Request::evaluate(), listener);
    let handle = captured.lock().clone().unwrap();

    assert!(handle.set_state(|_| Value::Int(1)));
    assert_eq!(*seen.lock(), vec![sentinel::value(0), sentinel::value(1)]);

    drop(subscription);
    assert!(!handle.is_live());
    assert!(!handle.set_state(|_| Value::Int(2)));
}

/// Test that idle contexts are collected.
#[test]
fn gc_disposes_idle_contexts() {
    let runtime = Runtime::new();
    runtime.evaluate(&runtime.node(cell(1)));
    runtime.evaluate(&runtime.node(cell(2)));
    assert_eq!(runtime.root_scope().store().len(), 2);

    let kept = runtime.node(cell(3));
    let _subscription = runtime.subscribe(&kept, Request::evaluate(), |_| {});

    assert_eq!(runtime.gc(runtime.root_scope()), 2);
    assert_eq!(runtime.root_scope().store().len(), 1);
    assert!(runtime.root_scope().store().contains(&kept.key()));
}

/// Test an asynchronous source that resolves on another task.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_source_resolves_pending_subscribers() {
    init_tracing();
    let kind = NodeKind::builder("remote")
        .shape(Shape::empty().required("url", FieldType::String))
        .state(|_| Value::Null)
        .operation(
            OperationName::Evaluate,
            Operation::new(|args| match args.state() {
                Some(Value::Node(loaded)) => Ok(Outcome::Definition(loaded.clone())),
                _ => Ok(sentinel::pending().into()),
            }),
        )
        .on_subscribe(|ctx| {
            let handle = ctx.handle();
            let url = ctx
                .definition()
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tokio::spawn(async move {
                let _hold = handle.hold();
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                handle.set_state(|_| Value::Node(sentinel::value(format!("body of {url}"))));
            });
        })
        .build();

    let runtime = Runtime::new();
    let node = runtime.node(NodeDefinition::create(&kind, props! { "url" => "/index" }).unwrap());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = runtime.subscribe(&node, Request::evaluate(), move |value| {
        let _ = tx.send(value.clone());
    });

    let first = rx.recv().await.unwrap();
    assert!(sentinel::is_pending(&first));

    let loaded = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, sentinel::value("body of /index"));
}
