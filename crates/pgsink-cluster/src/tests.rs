use crate::{
    Cluster, ClusterConfig, Fleet, FleetEvent,
    state::{CLEAN_EXIT, UNCLEAN_EXIT},
};
use core::time::Duration;
use pgsink_core::{Error, Result};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::{sync::mpsc, time::Instant};

const TIMEOUT: Duration = Duration::from_secs(100);

/// How a fake worker reacts to SIGTERM.
#[derive(Debug, Clone, Copy)]
enum OnTerminate {
    ExitWith(i32),
    Hang,
}

struct FakeFleet {
    behaviour: Vec<OnTerminate>,
    workers: HashMap<u32, (OnTerminate, mpsc::UnboundedSender<FleetEvent>)>,
    terminated: Arc<Mutex<Vec<u32>>>,
}

impl FakeFleet {
    fn new(behaviour: Vec<OnTerminate>) -> (Self, Arc<Mutex<Vec<u32>>>) {
        let terminated = Arc::new(Mutex::new(Vec::new()));
        let fleet = Self {
            behaviour,
            workers: HashMap::new(),
            terminated: Arc::clone(&terminated),
        };
        (fleet, terminated)
    }
}

impl Fleet for FakeFleet {
    fn spawn(&mut self, index: usize, events: mpsc::UnboundedSender<FleetEvent>) -> Result<u32> {
        let behaviour = *self.behaviour.get(index).ok_or_else(|| Error::Spawn {
            reason: format!("no behaviour for worker {index}"),
        })?;
        let pid = 1000 + index as u32;
        events.send(FleetEvent::Listening { pid }).unwrap();
        self.workers.insert(pid, (behaviour, events));
        Ok(pid)
    }

    fn terminate(&mut self, pid: u32) -> Result<()> {
        self.terminated.lock().unwrap().push(pid);
        let (behaviour, events) = self.workers.get(&pid).cloned().ok_or(Error::Signal {
            reason: format!("unknown pid {pid}"),
        })?;
        if let OnTerminate::ExitWith(code) = behaviour {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let _ = events.send(FleetEvent::Exited {
                    pid,
                    code: Some(code),
                });
            });
        }
        Ok(())
    }
}

fn cluster(workers: usize) -> Cluster {
    Cluster::new(ClusterConfig {
        workers,
        shutdown_timeout: TIMEOUT,
    })
}

/// Runs the coordinator loop and requests `requests` shutdowns one second in.
async fn run_with_shutdown(cluster: Cluster, fleet: FakeFleet, requests: usize) -> (i32, Duration) {
    let (tx, rx) = mpsc::unbounded_channel();
    let signals = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        for _ in 0..requests {
            let _ = signals.send(FleetEvent::ShutdownRequested { signal: "SIGTERM" });
        }
    });

    let start = Instant::now();
    let code = cluster.drive(fleet, tx, rx).await;
    (code, start.elapsed())
}

#[tokio::test(start_paused = true)]
async fn all_clean_worker_exits_give_clean_code() {
    let (fleet, terminated) = FakeFleet::new(vec![OnTerminate::ExitWith(0); 3]);
    let (code, elapsed) = run_with_shutdown(cluster(3), fleet, 1).await;

    assert_eq!(code, CLEAN_EXIT);
    assert!(elapsed < TIMEOUT);
    let mut terminated = terminated.lock().unwrap().clone();
    terminated.sort_unstable();
    assert_eq!(terminated, vec![1000, 1001, 1002]);
}

#[tokio::test(start_paused = true)]
async fn one_failing_worker_gives_unclean_code() {
    let (fleet, _) = FakeFleet::new(vec![
        OnTerminate::ExitWith(0),
        OnTerminate::ExitWith(1),
        OnTerminate::ExitWith(0),
    ]);
    let (code, _) = run_with_shutdown(cluster(3), fleet, 1).await;

    assert_eq!(code, UNCLEAN_EXIT);
}

#[tokio::test(start_paused = true)]
async fn hanging_worker_triggers_forced_exit_at_timeout() {
    let (fleet, _) = FakeFleet::new(vec![OnTerminate::ExitWith(0), OnTerminate::Hang]);
    let (code, elapsed) = run_with_shutdown(cluster(2), fleet, 1).await;

    // The one worker that did exit was clean.
    assert_eq!(code, CLEAN_EXIT);
    let signal_at = Duration::from_secs(1);
    assert!(elapsed >= signal_at + TIMEOUT);
    assert!(elapsed <= signal_at + TIMEOUT + Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn forced_exit_reports_unclean_exit_seen_so_far() {
    let (fleet, _) = FakeFleet::new(vec![OnTerminate::ExitWith(3), OnTerminate::Hang]);
    let (code, _) = run_with_shutdown(cluster(2), fleet, 1).await;

    assert_eq!(code, UNCLEAN_EXIT);
}

#[tokio::test(start_paused = true)]
async fn repeated_signals_terminate_each_worker_once() {
    let (fleet, terminated) = FakeFleet::new(vec![OnTerminate::ExitWith(0); 2]);
    let (code, _) = run_with_shutdown(cluster(2), fleet, 3).await;

    assert_eq!(code, CLEAN_EXIT);
    assert_eq!(terminated.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_spawns_are_skipped() {
    // Only one behaviour for two workers: the second spawn fails.
    let (fleet, terminated) = FakeFleet::new(vec![OnTerminate::ExitWith(0)]);
    let (code, _) = run_with_shutdown(cluster(2), fleet, 1).await;

    assert_eq!(code, CLEAN_EXIT);
    assert_eq!(*terminated.lock().unwrap(), vec![1000]);
}

#[tokio::test(start_paused = true)]
async fn empty_fleet_exits_on_first_signal() {
    let (fleet, terminated) = FakeFleet::new(Vec::new());
    let (code, elapsed) = run_with_shutdown(cluster(0), fleet, 1).await;

    assert_eq!(code, CLEAN_EXIT);
    assert!(elapsed < Duration::from_secs(2));
    assert!(terminated.lock().unwrap().is_empty());
}
