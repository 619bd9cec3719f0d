mod support;

use std::sync::Arc;
use std::time::Duration;

use scanflow_core::ScanError;
use scanflow_core::scan::{JobGraph, StagePayload};
use scanflow_model::{JobStatus, StageId};
use tokio::sync::{Barrier, Notify};
use tokio_util::sync::CancellationToken;

use support::{Behaviour, ProbeStage, RecordingPublisher, probe_context};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_in_node_runs_once_after_every_parent() {
    const PARENTS: usize = 8;
    let parent_names: [&'static str; PARENTS] =
        ["p0", "p1", "p2", "p3", "p4", "p5", "p6", "p7"];

    let (root, root_probe) = ProbeStage::new("root", Behaviour::Succeed);
    let (sink, sink_probe) = ProbeStage::new("sink", Behaviour::Succeed);
    let mut builder = JobGraph::builder().stage(root).stage(sink);
    let mut parent_probes = Vec::new();
    for (i, name) in parent_names.iter().enumerate() {
        // Staggered sleeps shuffle the order in which parents finish.
        let delay = Duration::from_millis(((i * 7) % 5) as u64);
        let (stage, probe) = ProbeStage::new(*name, Behaviour::Sleep(delay));
        parent_probes.push(probe);
        builder = builder.stage(stage).edge("root", *name).edge(*name, "sink");
    }
    let graph = builder.build().unwrap();

    const RUNS: usize = 10;
    for _ in 0..RUNS {
        let publisher = Arc::new(RecordingPublisher::new());
        let run = graph.instantiate(probe_context(publisher.clone())).unwrap();

        run.execute(CancellationToken::new()).await.unwrap();

        assert_eq!(run.status_of(&StageId::new("sink")), Some(JobStatus::Completed));
        assert_eq!(run.node(&StageId::new("sink")).unwrap().payload_runs(), 1);
        assert_eq!(publisher.count("scan.finished").await, 1);
        assert_eq!(publisher.count("scan.progress").await, PARENTS + 2);
    }

    // Every run instantiates fresh nodes, so probes count one run per scan.
    assert_eq!(root_probe.runs(), RUNS);
    assert_eq!(sink_probe.runs(), RUNS);
    for probe in &parent_probes {
        assert_eq!(probe.runs(), RUNS);
    }
    for parents_seen in sink_probe.inputs().await {
        assert_eq!(parents_seen.len(), PARENTS);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_notifications_trigger_payload_once() {
    let names: [&'static str; 6] = ["a", "b", "c", "d", "e", "f"];
    let (sink, sink_probe) = ProbeStage::new("sink", Behaviour::Succeed);
    let mut builder = JobGraph::builder().stage(sink);
    for name in names {
        let (stage, _) = ProbeStage::new(name, Behaviour::Succeed);
        builder = builder.stage(stage).edge(name, "sink");
    }
    let graph = builder.build().unwrap();
    let run = graph
        .instantiate(probe_context(Arc::new(RecordingPublisher::new())))
        .unwrap();
    let node = run.node(&StageId::new("sink")).unwrap().clone();

    let mut tasks = Vec::new();
    for name in names {
        let node = node.clone();
        tasks.push(tokio::spawn(async move {
            node.execute(
                Some((StageId::new(name), StagePayload::Empty)),
                CancellationToken::new(),
            )
            .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(sink_probe.runs(), 1);
    assert_eq!(sink_probe.inputs().await[0].len(), names.len());

    // A stray extra notification never reruns the payload.
    node.clone()
        .execute(Some((StageId::new("a"), StagePayload::Empty)), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sink_probe.runs(), 1);
}

#[tokio::test]
async fn root_without_parents_runs_exactly_once() {
    let (only, probe) = ProbeStage::new("only", Behaviour::Succeed);
    let graph = JobGraph::builder().stage(only).build().unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let run = graph.instantiate(probe_context(publisher.clone())).unwrap();

    run.execute(CancellationToken::new()).await.unwrap();
    run.execute(CancellationToken::new()).await.unwrap();

    assert_eq!(probe.runs(), 1);
    assert_eq!(publisher.count("scan.finished").await, 1);
    assert_eq!(publisher.count("scan.progress").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn diamond_join_runs_once_when_branches_finish_together() {
    let barrier = Arc::new(Barrier::new(2));
    let (root, _) = ProbeStage::new("root", Behaviour::Succeed);
    let (left, left_probe) = ProbeStage::new("left", Behaviour::Rendezvous(barrier.clone()));
    let (right, right_probe) = ProbeStage::new("right", Behaviour::Rendezvous(barrier));
    let (join, join_probe) = ProbeStage::new("join", Behaviour::Succeed);
    let graph = JobGraph::builder()
        .stage(root)
        .stage(left)
        .stage(right)
        .stage(join)
        .edge("root", "left")
        .edge("root", "right")
        .edge("left", "join")
        .edge("right", "join")
        .build()
        .unwrap();

    for _ in 0..25 {
        let publisher = Arc::new(RecordingPublisher::new());
        let run = graph.instantiate(probe_context(publisher.clone())).unwrap();
        run.execute(CancellationToken::new()).await.unwrap();

        assert_eq!(run.node(&StageId::new("join")).unwrap().payload_runs(), 1);
        assert_eq!(publisher.count("scan.finished").await, 1);
        let completed = publisher.completed_stages().await;
        assert_eq!(completed.first(), Some(&StageId::new("root")));
        assert_eq!(completed.last(), Some(&StageId::new("join")));
    }
    assert_eq!(left_probe.runs(), 25);
    assert_eq!(right_probe.runs(), 25);
    assert_eq!(join_probe.runs(), 25);
    let mut parents = join_probe.inputs().await[0].clone();
    parents.sort();
    assert_eq!(parents, vec![StageId::new("left"), StageId::new("right")]);
}

#[tokio::test]
async fn cancelling_before_start_runs_nothing() {
    let (root, root_probe) = ProbeStage::new("root", Behaviour::Succeed);
    let (child, child_probe) = ProbeStage::new("child", Behaviour::Succeed);
    let graph = JobGraph::builder()
        .stage(root)
        .stage(child)
        .edge("root", "child")
        .build()
        .unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let run = graph.instantiate(probe_context(publisher.clone())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run.execute(cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(root_probe.runs(), 0);
    assert_eq!(child_probe.runs(), 0);
    assert_eq!(run.status_of(&StageId::new("root")), Some(JobStatus::Canceled));
    assert_eq!(run.status_of(&StageId::new("child")), Some(JobStatus::Pending));
    assert!(publisher.events().await.is_empty());
}

#[tokio::test]
async fn cancelling_mid_payload_stops_before_children() {
    let started = Arc::new(Notify::new());
    let (root, root_probe) =
        ProbeStage::new("root", Behaviour::BlockUntilCancelled(started.clone()));
    let (child, child_probe) = ProbeStage::new("child", Behaviour::Succeed);
    let graph = JobGraph::builder()
        .stage(root)
        .stage(child)
        .edge("root", "child")
        .build()
        .unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let run = graph.instantiate(probe_context(publisher.clone())).unwrap();
    let cancel = CancellationToken::new();

    let trigger = {
        let cancel = cancel.clone();
        async move {
            started.notified().await;
            cancel.cancel();
        }
    };
    let (outcome, ()) = tokio::join!(run.execute(cancel.clone()), trigger);

    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(root_probe.runs(), 1);
    assert_eq!(child_probe.runs(), 0);
    assert_eq!(run.status_of(&StageId::new("root")), Some(JobStatus::Canceled));
    assert_eq!(run.status_of(&StageId::new("child")), Some(JobStatus::Pending));
    assert_eq!(publisher.count("scan.progress").await, 0);
    assert_eq!(publisher.count("scan.finished").await, 0);
}

#[tokio::test]
async fn failing_stage_publishes_failure_and_skips_children() {
    let (root, _) = ProbeStage::new("root", Behaviour::Succeed);
    let (broken, _) = ProbeStage::new("broken", Behaviour::Fail("disk on fire"));
    let (healthy, healthy_probe) = ProbeStage::new("healthy", Behaviour::Succeed);
    let (join, join_probe) = ProbeStage::new("join", Behaviour::Succeed);
    let graph = JobGraph::builder()
        .stage(root)
        .stage(broken)
        .stage(healthy)
        .stage(join)
        .edge("root", "broken")
        .edge("root", "healthy")
        .edge("broken", "join")
        .edge("healthy", "join")
        .build()
        .unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let run = graph.instantiate(probe_context(publisher.clone())).unwrap();

    let err = run.execute(CancellationToken::new()).await.unwrap_err();

    assert!(err.to_string().contains("disk on fire"));
    assert_eq!(run.status_of(&StageId::new("broken")), Some(JobStatus::Failed));
    // The sibling either finished first or was stopped by the failure.
    assert!(matches!(
        run.status_of(&StageId::new("healthy")),
        Some(JobStatus::Completed | JobStatus::Canceled)
    ));
    assert_eq!(run.status_of(&StageId::new("join")), Some(JobStatus::Pending));
    assert!(healthy_probe.runs() <= 1);
    assert_eq!(join_probe.runs(), 0);
    assert_eq!(publisher.count("scan.failed").await, 1);
    assert_eq!(publisher.count("scan.finished").await, 0);

    let failed = publisher
        .events()
        .await
        .into_iter()
        .find_map(|event| match event {
            scanflow_model::ScanEvent::ScanFailed(failed) => Some(failed),
            _ => None,
        })
        .unwrap();
    assert_eq!(failed.stage, Some(StageId::new("broken")));
}

fn scan_failures(events: Vec<scanflow_model::ScanEvent>) -> Vec<scanflow_model::ScanFailed> {
    events
        .into_iter()
        .filter_map(|event| match event {
            scanflow_model::ScanEvent::ScanFailed(failed) => Some(failed),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sibling_failures_report_a_single_scan_failed() {
    for _ in 0..25 {
        let barrier = Arc::new(Barrier::new(2));
        let (root, _) = ProbeStage::new("root", Behaviour::Succeed);
        let (left, _) = ProbeStage::new("left", Behaviour::FailTogether(barrier.clone(), "left broke"));
        let (right, _) =
            ProbeStage::new("right", Behaviour::FailTogether(barrier, "right broke"));
        let (sink, sink_probe) = ProbeStage::new("sink", Behaviour::Succeed);
        let graph = JobGraph::builder()
            .stage(root)
            .stage(left)
            .stage(right)
            .stage(sink)
            .edge("root", "left")
            .edge("root", "right")
            .edge("left", "sink")
            .edge("right", "sink")
            .build()
            .unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let run = graph.instantiate(probe_context(publisher.clone())).unwrap();

        let err = run.execute(CancellationToken::new()).await.unwrap_err();

        assert!(!err.is_cancelled());
        assert_eq!(run.status_of(&StageId::new("left")), Some(JobStatus::Failed));
        assert_eq!(run.status_of(&StageId::new("right")), Some(JobStatus::Failed));
        assert_eq!(run.status_of(&StageId::new("sink")), Some(JobStatus::Pending));
        assert_eq!(sink_probe.runs(), 0);
        assert!(run.context().failure_reported());

        let failures = scan_failures(publisher.events().await);
        assert_eq!(failures.len(), 1);
        let stage = failures[0].stage.clone().unwrap();
        assert!(stage == StageId::new("left") || stage == StageId::new("right"));
        assert_eq!(publisher.count("scan.finished").await, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_stops_the_sibling_branch() {
    let started = Arc::new(Notify::new());
    let (root, _) = ProbeStage::new("root", Behaviour::Succeed);
    let (broken, _) = ProbeStage::new("broken", Behaviour::Fail("bad sector"));
    let (waiting, _) = ProbeStage::new("waiting", Behaviour::BlockUntilCancelled(started));
    let (sink, sink_probe) = ProbeStage::new("sink", Behaviour::Succeed);
    let graph = JobGraph::builder()
        .stage(root)
        .stage(broken)
        .stage(waiting)
        .stage(sink)
        .edge("root", "broken")
        .edge("root", "waiting")
        .edge("broken", "sink")
        .edge("waiting", "sink")
        .build()
        .unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let run = graph.instantiate(probe_context(publisher.clone())).unwrap();
    let cancel = CancellationToken::new();

    let err = tokio::time::timeout(Duration::from_secs(5), run.execute(cancel.clone()))
        .await
        .expect("failure should stop the waiting branch")
        .unwrap_err();

    assert!(err.to_string().contains("bad sector"));
    assert_eq!(run.status_of(&StageId::new("waiting")), Some(JobStatus::Canceled));
    assert_eq!(sink_probe.runs(), 0);
    assert_eq!(publisher.count("scan.failed").await, 1);
    // The run halts through its own token; the caller's stays usable.
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn progress_overrun_fails_the_stage() {
    let (overrun, _) = ProbeStage::new("overrun", Behaviour::OverrunProgress);
    let (child, child_probe) = ProbeStage::new("child", Behaviour::Succeed);
    let graph = JobGraph::builder()
        .stage(overrun)
        .stage(child)
        .edge("overrun", "child")
        .build()
        .unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let run = graph.instantiate(probe_context(publisher.clone())).unwrap();

    let err = run.execute(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err,
        ScanError::StageFailed { ref stage, ref reason }
            if *stage == StageId::new("overrun") && reason.contains("invalid progress")
    ));
    assert_eq!(run.status_of(&StageId::new("overrun")), Some(JobStatus::Failed));
    assert_eq!(run.status_of(&StageId::new("child")), Some(JobStatus::Pending));
    assert_eq!(child_probe.runs(), 0);

    let failures = scan_failures(publisher.events().await);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Some(StageId::new("overrun")));
    assert_eq!(publisher.count("scan.progress").await, 0);
    assert_eq!(publisher.count("scan.finished").await, 0);
}
