use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hostkit_exec::*;
use hostkit_types::HostRecord;

// Mock implementations
#[derive(Default)]
struct MockFactory {
    unreachable: HashSet<String>,
    panics: HashSet<String>,
    slow: HashSet<String>,
    open_delay: Duration,
    exec_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockFactory {
    fn unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    fn panics(mut self, name: &str) -> Self {
        self.panics.insert(name.to_string());
        self
    }

    fn slow(mut self, name: &str) -> Self {
        self.slow.insert(name.to_string());
        self
    }
}

struct MockSession {
    host: String,
    panics: bool,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn open(&self, host: &HostRecord) -> Result<Box<dyn RemoteSession>, ExecError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.open_delay).await;

        if self.unreachable.contains(&host.name) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecError::ConnectionFailed {
                endpoint: host.endpoint(),
                reason: "connection refused".to_string(),
            });
        }

        let delay = if self.slow.contains(&host.name) {
            Duration::from_secs(30)
        } else {
            self.exec_delay
        };

        Ok(Box::new(MockSession {
            host: host.name.clone(),
            panics: self.panics.contains(&host.name),
            delay,
            in_flight: Arc::clone(&self.in_flight),
        }))
    }

    fn factory_type(&self) -> &'static str {
        "mock"
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecError> {
        tokio::time::sleep(self.delay).await;
        if self.panics {
            panic!("session for {} blew up", self.host);
        }
        Ok(CommandOutput {
            stdout: format!("{}: {command}\n", self.host).into_bytes(),
            stderr: Vec::new(),
            exit_status: Some(0),
            exit_signal: None,
        })
    }

    async fn close(self: Box<Self>) {}
}

fn host(name: &str) -> HostRecord {
    HostRecord::new(name, "root", format!("{name}.lan")).with_password("secret")
}

fn hosts(n: usize) -> Vec<HostRecord> {
    (0..n).map(|i| host(&format!("host{i:02}"))).collect()
}

fn collector() -> Mutex<Vec<ExecutionResult>> {
    Mutex::new(Vec::new())
}

#[tokio::test]
async fn test_failing_host_does_not_block_others() {
    let factory = MockFactory {
        open_delay: Duration::from_millis(10),
        ..Default::default()
    }
    .unreachable("h2");
    let dispatcher = Dispatcher::new(Arc::new(factory));
    let results = collector();

    let summary = dispatcher
        .dispatch(
            vec![host("h1"), host("h2")],
            |_| "uptime".to_string(),
            &|r: ExecutionResult| results.lock().unwrap().push(r),
        )
        .await;

    let results = results.into_inner().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let h1 = results.iter().find(|r| r.host_name() == "h1").unwrap();
    let h2 = results.iter().find(|r| r.host_name() == "h2").unwrap();
    assert!(h1.success());
    assert_eq!(h1.stdout_lossy(), "h1: uptime\n");
    assert!(matches!(h2.error, Some(ExecError::ConnectionFailed { .. })));
    assert!(h2.stdout.is_empty());
}

#[tokio::test]
async fn test_slow_host_does_not_delay_fast_host() {
    let factory = MockFactory::default().slow("slow");
    let dispatcher = Dispatcher::new(Arc::new(factory)).with_config(DispatchConfig {
        command_timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let order = Mutex::new(Vec::new());

    dispatcher
        .dispatch(
            vec![host("slow"), host("fast")],
            |_| "true".to_string(),
            &|r: ExecutionResult| order.lock().unwrap().push(r.host.name.clone()),
        )
        .await;

    assert_eq!(order.into_inner().unwrap(), vec!["fast", "slow"]);
}

#[tokio::test]
async fn test_empty_host_set_never_calls_handler() {
    let dispatcher = Dispatcher::new(Arc::new(MockFactory::default()));
    let calls = AtomicUsize::new(0);

    let summary = dispatcher
        .dispatch(Vec::new(), |_| "true".to_string(), &|_: ExecutionResult| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert_eq!(summary.total, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeat_dispatch_has_no_hidden_state() {
    let dispatcher = Dispatcher::new(Arc::new(LocalSessionFactory::new()));
    let target = vec![host("localhost")];
    let command = |_: &HostRecord| "printf 'out'; printf 'err' >&2".to_string();

    let first = collector();
    dispatcher
        .dispatch(target.clone(), command, &|r: ExecutionResult| {
            first.lock().unwrap().push(r);
        })
        .await;

    let second = collector();
    dispatcher
        .dispatch(target, command, &|r: ExecutionResult| {
            second.lock().unwrap().push(r);
        })
        .await;

    let first = first.into_inner().unwrap();
    let second = second.into_inner().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].stdout, b"out");
    assert_eq!(first[0].stderr, b"err");
    assert_eq!(first[0].stdout, second[0].stdout);
    assert_eq!(first[0].stderr, second[0].stderr);
}

#[tokio::test]
async fn test_tally_sums_to_host_count() {
    let targets = hosts(40);
    let mut factory = MockFactory {
        exec_delay: Duration::from_millis(2),
        ..Default::default()
    };
    for h in targets.iter().step_by(3) {
        factory = factory.unreachable(&h.name);
    }
    let dispatcher = Dispatcher::new(Arc::new(factory));
    let tally = ResultTally::new();

    let summary = dispatcher
        .dispatch(targets, |h| format!("echo {}", h.name), &tally)
        .await;

    assert_eq!(tally.total(), 40);
    assert_eq!(tally.succeeded().len() + tally.failed().len(), 40);
    assert_eq!(tally.failed().len(), 14);
    assert_eq!(summary.succeeded, tally.succeeded().len());
    assert_eq!(summary.failed, tally.failed().len());
}

#[tokio::test]
async fn test_in_flight_is_bounded() {
    let factory = MockFactory {
        exec_delay: Duration::from_millis(30),
        ..Default::default()
    };
    let peak = Arc::clone(&factory.peak);
    let dispatcher = Dispatcher::new(Arc::new(factory)).with_config(DispatchConfig {
        max_in_flight: 3,
        command_timeout: None,
    });
    let tally = ResultTally::new();

    let summary = dispatcher
        .dispatch(hosts(12), |_| "true".to_string(), &tally)
        .await;

    assert_eq!(summary.succeeded, 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_timeout_yields_one_result_per_host() {
    let factory = MockFactory::default().slow("stuck");
    let dispatcher = Dispatcher::new(Arc::new(factory)).with_config(DispatchConfig {
        command_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let results = collector();

    let summary = dispatcher
        .dispatch(
            vec![host("ok"), host("stuck")],
            |_| "true".to_string(),
            &|r: ExecutionResult| results.lock().unwrap().push(r),
        )
        .await;

    let results = results.into_inner().unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(results.len(), 2);
    let stuck = results.iter().find(|r| r.host_name() == "stuck").unwrap();
    assert_eq!(
        stuck.error,
        Some(ExecError::Timeout {
            timeout: Duration::from_millis(100)
        })
    );
    assert!(results.iter().any(|r| r.host_name() == "ok" && r.success()));
}

#[tokio::test]
async fn test_cancellation_yields_one_result_per_host() {
    let mut factory = MockFactory::default();
    let targets = hosts(5);
    for h in &targets {
        factory = factory.slow(&h.name);
    }
    let dispatcher = Dispatcher::new(Arc::new(factory));
    let token = dispatcher.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let results = collector();

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.dispatch(targets, |_| "sleep 30".to_string(), &|r: ExecutionResult| {
            results.lock().unwrap().push(r);
        }),
    )
    .await
    .expect("dispatch should return once cancelled");

    let results = results.into_inner().unwrap();
    assert_eq!(summary.failed, 5);
    assert_eq!(results.len(), 5);
    assert!(
        results
            .iter()
            .all(|r| r.error == Some(ExecError::Cancelled))
    );
}

#[tokio::test]
async fn test_panicking_session_still_reports() {
    let factory = MockFactory::default().panics("bad");
    let dispatcher = Dispatcher::new(Arc::new(factory));
    let results = collector();

    let summary = dispatcher
        .dispatch(
            vec![host("good"), host("bad")],
            |_| "true".to_string(),
            &|r: ExecutionResult| results.lock().unwrap().push(r),
        )
        .await;

    let results = results.into_inner().unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(results.len(), 2);
    let bad = results.iter().find(|r| r.host_name() == "bad").unwrap();
    assert!(matches!(bad.error, Some(ExecError::TaskFailed(_))));
    assert_eq!(bad.command, "true");
    assert!(results.iter().any(|r| r.host_name() == "good" && r.success()));
}
