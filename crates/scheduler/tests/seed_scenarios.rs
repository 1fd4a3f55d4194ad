//! End-to-end scheduling scenarios over a fake cluster
//!
//! Each test builds a snapshot through the real cache, opens a session
//! with the standard plugin tier, runs one action, and asserts on the
//! dispatched binds and evictions.

use std::cmp::Ordering;

use gangway_core::{JobId, PodGroupPhase, PreemptPolicy, QueueId, Resource, TaskStatus};
use gangway_scheduler::framework::{registry, PluginSpec, SchedulerConf, Session, Tier};
use gangway_scheduler::testing::{recording_ports, RecordingBinder, RecordingEvictor, SnapshotBuilder, GIB};
use gangway_scheduler::{Arguments, ClusterSnapshot};

fn standard_conf(actions: &[&str]) -> SchedulerConf {
    SchedulerConf {
        actions: actions.iter().map(|a| a.to_string()).collect(),
        tiers: vec![Tier {
            plugins: vec![
                PluginSpec::new("priority"),
                PluginSpec::new("gang"),
                PluginSpec::new("conformance"),
                PluginSpec::new("proportion"),
                PluginSpec::new("predicates"),
                PluginSpec::new("nodeorder"),
            ],
        }],
    }
}

async fn run_actions(
    snapshot: ClusterSnapshot,
    conf: &SchedulerConf,
) -> (RecordingBinder, RecordingEvictor) {
    let (ports, binder, evictor) = recording_ports();
    let mut ssn = Session::open(snapshot, conf, ports);
    for name in &conf.actions {
        let action = registry::new_action(name).expect("action registered");
        action.execute(&mut ssn).await.expect("action never fails");
    }
    ssn.close().await;
    (binder, evictor)
}

/// Gang reclaim with one preemptable mid pod: two equal-weight queues,
/// the over-served queue loses exactly its one preemptable task.
#[tokio::test]
async fn reclaim_evicts_the_single_preemptable_pod() {
    let snapshot = SnapshotBuilder::new()
        .queue("q1", 1)
        .queue("q2", 1)
        .node("n1", 3000.0)
        .pod_group("pg1", "q1", 0)
        .running_task("pg1", "pre1", 1000.0, "n1", false)
        .running_task("pg1", "pre2", 1000.0, "n1", true)
        .running_task("pg1", "pre3", 1000.0, "n1", false)
        .pod_group("pg2", "q2", 0)
        .pending_task("pg2", "preemptor1", 1000.0)
        .build();

    let conf = standard_conf(&["reclaim"]);
    let (_, evictor) = run_actions(snapshot, &conf).await;

    let evicted = evictor.evicted.lock().clone();
    assert_eq!(evicted, vec!["pre2".to_string()]);
}

/// Priority-aware reclaim: victims across queues bleed lowest job
/// priority first.
#[tokio::test]
async fn reclaim_prefers_lowest_priority_job() {
    let snapshot = SnapshotBuilder::new()
        .priority_class("low-priority", 100, PreemptPolicy::PreemptLowerPriority)
        .priority_class("mid-priority", 500, PreemptPolicy::PreemptLowerPriority)
        .priority_class("high-priority", 1000, PreemptPolicy::PreemptLowerPriority)
        .queue("q1", 1)
        .queue("q2", 1)
        .queue("q3", 1)
        .node("n1", 4000.0)
        .pod_group("pg1", "q1", 0)
        .running_task_pc("pg1", "preemptee1-1", 1000.0, "n1", true, "mid-priority")
        .running_task_pc("pg1", "preemptee1-2", 1000.0, "n1", true, "mid-priority")
        .pod_group("pg2", "q2", 0)
        .running_task_pc("pg2", "preemptee2-1", 1000.0, "n1", true, "low-priority")
        .running_task_pc("pg2", "preemptee2-2", 1000.0, "n1", false, "low-priority")
        .pod_group("pg3", "q3", 0)
        .pending_task_pc("pg3", "preemptor1", 1000.0, "high-priority")
        .build();

    let conf = standard_conf(&["reclaim"]);
    let (_, evictor) = run_actions(snapshot, &conf).await;

    let evicted = evictor.evicted.lock().clone();
    assert_eq!(evicted, vec!["preemptee2-1".to_string()]);
}

/// A preempt-never priority class can never cause evictions, however
/// over-provisioned the other queues are.
#[tokio::test]
async fn preempt_never_causes_no_evictions() {
    let snapshot = SnapshotBuilder::new()
        .priority_class("no-preempt", 2000, PreemptPolicy::Never)
        .queue("q1", 1)
        .queue("q2", 1)
        .node("n1", 3000.0)
        .pod_group("pg1", "q1", 0)
        .running_task("pg1", "pre1", 1000.0, "n1", true)
        .running_task("pg1", "pre2", 1000.0, "n1", true)
        .running_task("pg1", "pre3", 1000.0, "n1", true)
        .pod_group("pg2", "q2", 0)
        .pending_task_pc("pg2", "preemptor1", 1000.0, "no-preempt")
        .build();

    let conf = standard_conf(&["reclaim", "preempt"]);
    let (_, evictor) = run_actions(snapshot, &conf).await;

    assert!(evictor.evicted.lock().is_empty());
}

/// Gang-safe reclaim gate: when the victim gang has no slack, the gate
/// blocks reclaim entirely; switched off, partial reclaim goes through.
#[tokio::test]
async fn gang_check_gates_partial_reclaim() {
    let build = || {
        SnapshotBuilder::new()
            .queue("q1", 1)
            .queue("q2", 1)
            .node("n1", 3000.0)
            .pod_group("pg1", "q1", 3)
            .running_task("pg1", "pre1", 1000.0, "n1", true)
            .running_task("pg1", "pre2", 1000.0, "n1", true)
            .running_task("pg1", "pre3", 1000.0, "n1", true)
            .pod_group("pg2", "q2", 0)
            .pending_task("pg2", "waiter", 1000.0)
            .build()
    };

    // gate on (the default): the gang cannot spare anyone
    let conf = standard_conf(&["reclaim"]);
    let (_, evictor) = run_actions(build(), &conf).await;
    assert!(evictor.evicted.lock().is_empty());

    // gate off: partial reclaim of one task is allowed
    let mut args = Arguments::new();
    args.insert("enableGangCheckOverused", serde_yaml::Value::from(false));
    let mut conf = standard_conf(&["reclaim"]);
    conf.tiers[0].plugins[1] = PluginSpec::new("gang").with_arguments(args);
    let (_, evictor) = run_actions(build(), &conf).await;
    assert_eq!(evictor.evicted.lock().len(), 1);
}

/// Allocation reduces idle by exactly the request and moves tasks out of
/// Pending; gang-short jobs leave no trace behind.
#[tokio::test]
async fn allocate_commits_ready_gangs_and_discards_short_ones() {
    let snapshot = SnapshotBuilder::new()
        .queue("q1", 1)
        .node("n1", 4000.0)
        .job("pg1", "q1", 2, &[("w0", 1000.0), ("w1", 1000.0)])
        .build();

    let conf = standard_conf(&["allocate"]);
    let (ports, binder, _) = recording_ports();
    let mut ssn = Session::open(snapshot, &conf, ports);
    registry::new_action("allocate")
        .unwrap()
        .execute(&mut ssn)
        .await
        .unwrap();

    let job = ssn.job(&JobId::from("default/pg1")).unwrap();
    assert_eq!(job.count_in(TaskStatus::Pending), 0);
    assert_eq!(job.count_in(TaskStatus::Allocated), 2);
    let node = ssn.node("n1").unwrap();
    assert_eq!(node.idle.milli_cpu, 2000.0);
    ssn.close().await;

    let mut bound: Vec<String> = binder.bound.lock().iter().map(|(t, _)| t.clone()).collect();
    bound.sort();
    assert_eq!(bound, vec!["w0".to_string(), "w1".to_string()]);
}

/// A gang that cannot fully fit is discarded: no binds, idle untouched.
#[tokio::test]
async fn allocate_discards_unsatisfiable_gang() {
    let snapshot = SnapshotBuilder::new()
        .queue("q1", 1)
        .node("n1", 1000.0)
        .job("pg1", "q1", 3, &[("w0", 1000.0), ("w1", 1000.0), ("w2", 1000.0)])
        .build();

    let conf = standard_conf(&["allocate"]);
    let (ports, binder, _) = recording_ports();
    let mut ssn = Session::open(snapshot, &conf, ports);
    registry::new_action("allocate")
        .unwrap()
        .execute(&mut ssn)
        .await
        .unwrap();

    let job = ssn.job(&JobId::from("default/pg1")).unwrap();
    assert_eq!(job.count_in(TaskStatus::Pending), 3);
    assert_eq!(ssn.node("n1").unwrap().idle.milli_cpu, 1000.0);
    ssn.close().await;
    assert!(binder.bound.lock().is_empty());
}

/// BestEffort tasks are skipped by allocate and placed by backfill.
#[tokio::test]
async fn backfill_places_zero_request_tasks() {
    let snapshot = SnapshotBuilder::new()
        .queue("q1", 1)
        .node("n1", 1000.0)
        .pod_group("pg1", "q1", 0)
        .pending_task("pg1", "sidecar", 0.0)
        .build();

    // zero-request pods get zero memory too
    let mut snapshot = snapshot;
    {
        let job = snapshot.jobs.get_mut(&JobId::from("default/pg1")).unwrap();
        let uid = job.tasks.keys().next().unwrap().clone();
        let task = job.tasks.get_mut(&uid).unwrap();
        task.resreq = Resource::empty();
        task.init_resreq = Resource::empty();
        task.best_effort = true;
    }

    let conf = standard_conf(&["allocate", "backfill"]);
    let (binder, _) = run_actions(snapshot, &conf).await;
    let bound = binder.bound.lock().clone();
    assert_eq!(bound, vec![("sidecar".to_string(), "n1".to_string())]);
}

/// Enqueue admits podgroups that fit the queue quota and leaves the rest
/// pending.
#[tokio::test]
async fn enqueue_gates_on_queue_capability() {
    let capped = gangway_core::QueueInfo::new("capped", 1)
        .with_capability(Resource::new(1000.0, 4.0 * GIB));
    let mut small_pg = gangway_core::PodGroup {
        namespace: "default".into(),
        name: "small".into(),
        min_member: 1,
        min_resources: Some(Resource::new(500.0, GIB)),
        queue: "capped".into(),
        priority_class_name: None,
        phase: PodGroupPhase::Pending,
        creation_timestamp: chrono::Utc::now(),
    };
    let mut big_pg = small_pg.clone();
    big_pg.name = "big".into();
    big_pg.min_resources = Some(Resource::new(5000.0, GIB));

    let snapshot = SnapshotBuilder::new()
        .queue_info(capped)
        .node("n1", 8000.0)
        .pod_group_full(small_pg)
        .pod_group_full(big_pg)
        .build();

    let conf = standard_conf(&["enqueue"]);
    let (ports, _, _) = recording_ports();
    let mut ssn = Session::open(snapshot, &conf, ports);
    registry::new_action("enqueue")
        .unwrap()
        .execute(&mut ssn)
        .await
        .unwrap();

    let small = ssn.job(&JobId::from("default/small")).unwrap();
    let big = ssn.job(&JobId::from("default/big")).unwrap();
    assert_eq!(small.pod_group.phase, PodGroupPhase::Inqueue);
    assert_eq!(big.pod_group.phase, PodGroupPhase::Pending);
    ssn.close().await;
}

/// Discarding a statement restores idle, releasing, and the task status
/// index exactly (the round-trip law).
#[tokio::test]
async fn statement_discard_is_a_round_trip() {
    let snapshot = SnapshotBuilder::new()
        .queue("q1", 1)
        .node("n1", 4000.0)
        .pod_group("pg1", "q1", 0)
        .running_task("pg1", "victim", 1000.0, "n1", true)
        .pod_group("pg2", "q1", 0)
        .pending_task("pg2", "incoming", 1000.0)
        .build();

    let conf = standard_conf(&[]);
    let (ports, _, _) = recording_ports();
    let mut ssn = Session::open(snapshot, &conf, ports);

    let incoming: gangway_core::TaskId = {
        let job = ssn.job(&JobId::from("default/pg2")).unwrap();
        job.tasks.keys().next().unwrap().clone()
    };
    let victim: gangway_core::TaskId = {
        let job = ssn.job(&JobId::from("default/pg1")).unwrap();
        job.tasks.keys().next().unwrap().clone()
    };

    let idle_before = ssn.node("n1").unwrap().idle.clone();
    let releasing_before = ssn.node("n1").unwrap().releasing.clone();

    let mut stmt = gangway_scheduler::Statement::new();
    stmt.allocate(&mut ssn, &incoming, "n1", None).unwrap();
    stmt.evict(&mut ssn, &victim, "test").unwrap();
    assert_ne!(ssn.node("n1").unwrap().idle, idle_before);
    stmt.discard(&mut ssn);

    let node = ssn.node("n1").unwrap();
    assert_eq!(node.idle, idle_before);
    assert_eq!(node.releasing, releasing_before);
    let pg1 = ssn.job(&JobId::from("default/pg1")).unwrap();
    assert_eq!(pg1.count_in(TaskStatus::Running), 1);
    let pg2 = ssn.job(&JobId::from("default/pg2")).unwrap();
    assert_eq!(pg2.count_in(TaskStatus::Pending), 1);
    ssn.close().await;
}

/// Queue ordering stays a total order over randomized weights and
/// shares: antisymmetric and transitive for every sampled triple.
#[tokio::test]
async fn queue_order_is_a_total_order() {
    // deterministic linear congruential sweep instead of a live cluster
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    let mut builder = SnapshotBuilder::new().node("n1", 64_000.0);
    let mut names = Vec::new();
    for i in 0..12 {
        let name = format!("q{i}");
        let weight = (next() % 5 + 1) as u32;
        builder = builder.queue(&name, weight);
        let demand = (next() % 8 + 1) as f64 * 1000.0;
        builder = builder.job(&format!("job{i}"), &name, 1, &[(&format!("p{i}"), demand)]);
        names.push(name);
    }
    let snapshot = builder.build();

    let conf = standard_conf(&[]);
    let (ports, _, _) = recording_ports();
    let ssn = Session::open(snapshot, &conf, ports);

    let queues: Vec<&gangway_core::QueueInfo> = names
        .iter()
        .map(|n| ssn.queues.get(&QueueId::from(n.as_str())).unwrap())
        .collect();

    for a in &queues {
        assert_eq!(ssn.queue_order(a, a), Ordering::Equal);
        for b in &queues {
            let ab = ssn.queue_order(a, b);
            let ba = ssn.queue_order(b, a);
            assert_eq!(ab, ba.reverse(), "antisymmetry {} vs {}", a.name, b.name);
            for c in &queues {
                if ssn.queue_order(a, b) != Ordering::Greater
                    && ssn.queue_order(b, c) != Ordering::Greater
                {
                    assert_ne!(
                        ssn.queue_order(a, c),
                        Ordering::Greater,
                        "transitivity {} {} {}",
                        a.name,
                        b.name,
                        c.name
                    );
                }
            }
        }
    }
}
