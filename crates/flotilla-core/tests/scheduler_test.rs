use flotilla_core::{
    CancellationToken, DependencyGraph, Direction, NodeState, Scheduler, ServiceKind, ServiceNode,
    TaskFailure,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(String),
    Finish(String),
}

fn graph(nodes: &[(&str, &[&str])]) -> DependencyGraph<ServiceNode> {
    DependencyGraph::build(nodes.iter().map(|(name, deps)| {
        ServiceNode::new(*name, ServiceKind::Alias).with_dependencies(deps.iter().copied())
    }))
    .unwrap()
}

fn position(events: &[Event], event: &Event) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing event {:?}", event))
}

fn start(name: &str) -> Event {
    Event::Start(name.to_string())
}

fn finish(name: &str) -> Event {
    Event::Finish(name.to_string())
}

/// 開始・終了イベントを記録しながら実行
async fn run_recording(
    graph: &DependencyGraph<ServiceNode>,
    direction: Direction,
    failing: &[&str],
) -> (flotilla_core::RunReport<String>, Vec<Event>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let failing: Vec<String> = failing.iter().map(|s| s.to_string()).collect();

    let report = Scheduler::new()
        .run(graph, direction, |name, _cancel| {
            let events = events.clone();
            let fail = failing.contains(&name);
            async move {
                events.lock().unwrap().push(Event::Start(name.clone()));
                tokio::time::sleep(Duration::from_millis(10)).await;
                events.lock().unwrap().push(Event::Finish(name.clone()));
                if fail {
                    Err(format!("{} failed", name))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    let events = events.lock().unwrap().clone();
    (report, events)
}

/// Up では依存先が全て成功してから開始する
#[tokio::test]
async fn test_up_runs_dependencies_first() {
    let graph = graph(&[("db", &[]), ("web", &["db"]), ("worker", &["db"])]);
    let (report, events) = run_recording(&graph, Direction::Up, &[]).await;

    assert!(report.is_success());
    assert!(position(&events, &finish("db")) < position(&events, &start("web")));
    assert!(position(&events, &finish("db")) < position(&events, &start("worker")));
}

/// Down では依存元が全て終わってから開始する
#[tokio::test]
async fn test_down_runs_dependents_first() {
    let graph = graph(&[("db", &[]), ("web", &["db"]), ("worker", &["db"])]);
    let (report, events) = run_recording(&graph, Direction::Down, &[]).await;

    assert!(report.is_success());
    assert!(position(&events, &finish("web")) < position(&events, &start("db")));
    assert!(position(&events, &finish("worker")) < position(&events, &start("db")));
}

/// 長い依存チェーンでも順序を守る
#[tokio::test]
async fn test_chain_order() {
    let graph = graph(&[
        ("d", &["c"]),
        ("c", &["b"]),
        ("b", &["a"]),
        ("a", &[]),
    ]);
    let (_, events) = run_recording(&graph, Direction::Up, &[]).await;
    let starts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Start(n) => Some(n.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec!["a", "b", "c", "d"]);
}

/// 失敗したノードの下流はスキップされ、無関係な枝は成功する
#[tokio::test]
async fn test_failure_skips_only_reachable_nodes() {
    let graph = graph(&[
        ("db", &[]),
        ("web", &["db"]),
        ("worker", &["db"]),
        ("api", &["web"]),
        ("cron", &[]),
    ]);
    let (report, events) = run_recording(&graph, Direction::Up, &["web"]).await;

    assert_eq!(report.state("db"), Some(NodeState::Succeeded));
    assert_eq!(report.state("web"), Some(NodeState::Failed));
    assert_eq!(report.state("api"), Some(NodeState::Skipped));
    assert_eq!(report.state("worker"), Some(NodeState::Succeeded));
    assert_eq!(report.state("cron"), Some(NodeState::Succeeded));
    assert!(!events.contains(&start("api")));

    let err = report.into_result().unwrap_err();
    assert_eq!(err.len(), 1);
    assert_eq!(err.failures[0].0, "web");
}

/// Down で依存元が失敗すると依存先は破棄されない
#[tokio::test]
async fn test_down_failure_keeps_dependencies() {
    let graph = graph(&[("db", &[]), ("web", &["db"]), ("worker", &["db"])]);
    let (report, events) = run_recording(&graph, Direction::Down, &["web"]).await;

    assert_eq!(report.state("web"), Some(NodeState::Failed));
    assert_eq!(report.state("worker"), Some(NodeState::Succeeded));
    assert_eq!(report.state("db"), Some(NodeState::Skipped));
    assert!(!events.contains(&start("db")));
}

/// 独立した複数の失敗はまとめて報告される
#[tokio::test]
async fn test_multiple_failures_are_aggregated() {
    let graph = graph(&[("a", &[]), ("b", &[]), ("c", &[])]);
    let (report, _) = run_recording(&graph, Direction::Up, &["a", "c"]).await;

    assert_eq!(report.state("b"), Some(NodeState::Succeeded));
    let err = report.into_result().unwrap_err();
    let mut names: Vec<_> = err.failures.iter().map(|(n, _)| n.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["a", "c"]);
    let message = err.to_string();
    assert!(message.contains("a failed"));
    assert!(message.contains("c failed"));
}

/// 依存関係のないノードは並行に実行される
#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    let graph = graph(&[("db", &[]), ("web", &["db"]), ("worker", &["db"])]);
    let barrier = Arc::new(Barrier::new(2));

    let scheduler = Scheduler::new();
    let run = scheduler.run(&graph, Direction::Up, |name, _| {
        let barrier = barrier.clone();
        async move {
            if name != "db" {
                // web と worker が同時に走っていなければここで止まる
                barrier.wait().await;
            }
            Ok::<(), String>(())
        }
    });

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("web and worker should run concurrently");
    assert!(report.is_success());
}

/// キャンセル後は新しいタスクを開始しない
#[tokio::test]
async fn test_cancellation_stops_new_launches() {
    let graph = graph(&[("db", &[]), ("web", &["db"]), ("worker", &["db"])]);
    let token = CancellationToken::new();
    let scheduler = Scheduler::with_cancellation(token.clone());
    let launched = Arc::new(Mutex::new(Vec::new()));

    let report = scheduler
        .run(&graph, Direction::Up, |name, cancel| {
            let token = token.clone();
            let launched = launched.clone();
            async move {
                launched.lock().unwrap().push(name.clone());
                token.cancel();
                cancel.cancelled().await;
                Err::<(), String>(format!("{} interrupted", name))
            }
        })
        .await;

    assert_eq!(*launched.lock().unwrap(), vec!["db".to_string()]);
    assert!(report.was_cancelled());
    assert_eq!(report.state("db"), Some(NodeState::Failed));
    assert_eq!(report.state("web"), Some(NodeState::Skipped));
    assert_eq!(report.state("worker"), Some(NodeState::Skipped));
    assert!(matches!(
        report.failures()[0].1,
        TaskFailure::Cancelled(_)
    ));
}

/// キャンセル後に成功で戻ったタスクがあっても、実行全体は失敗として扱う
#[tokio::test]
async fn test_cancelled_run_is_not_success() {
    let graph = graph(&[("db", &[]), ("web", &["db"])]);
    let token = CancellationToken::new();
    let scheduler = Scheduler::with_cancellation(token.clone());

    let report = scheduler
        .run(&graph, Direction::Up, |_, _| {
            let token = token.clone();
            async move {
                token.cancel();
                Ok::<(), String>(())
            }
        })
        .await;

    assert_eq!(report.state("db"), Some(NodeState::Succeeded));
    assert_eq!(report.state("web"), Some(NodeState::Skipped));
    assert!(report.failures().is_empty());
    assert!(!report.is_success());

    let err = report.into_result().unwrap_err();
    assert!(err.cancelled);
    assert!(err.is_empty());
    assert_eq!(err.to_string(), "実行がキャンセルされました");
}

/// ready_sets はスケジューラの実行順と一致する
#[tokio::test]
async fn test_ready_sets_match_execution_layers() {
    let graph = graph(&[
        ("db", &[]),
        ("cache", &[]),
        ("web", &["db", "cache"]),
        ("edge", &["web"]),
    ]);
    let layers: Vec<_> = graph.ready_sets(Direction::Up).collect();
    assert_eq!(
        layers,
        vec![vec!["cache", "db"], vec!["web"], vec!["edge"]]
    );

    let (report, events) = run_recording(&graph, Direction::Up, &[]).await;
    assert!(report.is_success());
    assert!(position(&events, &finish("web")) < position(&events, &start("edge")));
}
