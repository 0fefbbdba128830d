use std::sync::{Arc, Mutex};

use cluster_coordinator::error::{CoordinatorError, Result};
use cluster_coordinator::work::{map_sink, oneshot_sink, FnSink, ResultSink, WorkQueue};

#[tokio::test]
async fn test_units_run_in_submission_order() {
    let (queue, worker) = WorkQueue::start("order-test", Vec::new()).unwrap();

    for i in 0..100u32 {
        queue
            .submit("push", move |state: &mut Vec<u32>, _| state.push(i))
            .unwrap();
    }
    let seen = queue.call("read", |state, _| state.clone()).await.unwrap();

    assert_eq!(seen, (0..100).collect::<Vec<_>>());
    worker.stop();
}

#[tokio::test]
async fn test_units_run_on_the_named_queue_thread() {
    let (queue, worker) = WorkQueue::start("cc-test-queue", ()).unwrap();

    let name = queue
        .call("thread_name", |_, _| {
            std::thread::current().name().map(str::to_string)
        })
        .await
        .unwrap();

    assert_eq!(name.as_deref(), Some("cc-test-queue"));
    worker.stop();
}

#[tokio::test]
async fn test_follow_up_work_runs_after_current_unit() {
    let (queue, worker) = WorkQueue::start("follow-up-test", Vec::new()).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();

    queue
        .submit("outer", move |state: &mut Vec<&'static str>, queue| {
            queue
                .submit("inner", move |state, _| {
                    state.push("follow-up");
                    let _ = tx.send(state.clone());
                })
                .unwrap();
            state.push("outer");
        })
        .unwrap();
    let seen = rx.await.unwrap();

    assert_eq!(seen, vec!["outer", "follow-up"]);
    worker.stop();
}

#[tokio::test]
async fn test_panicking_unit_does_not_stop_queue() {
    let (queue, worker) = WorkQueue::start("panic-test", 0u32).unwrap();

    let result = queue
        .call("boom", |_: &mut u32, _| -> u32 { panic!("unit failed") })
        .await;
    assert_eq!(result, Err(CoordinatorError::WorkAborted));

    queue.submit("increment", |count, _| *count += 1).unwrap();
    let count = queue.call("read", |count, _| *count).await.unwrap();
    assert_eq!(count, 1);

    assert_eq!(worker.stop(), Some(1));
}

#[tokio::test]
async fn test_stop_drains_submitted_units_and_returns_state() {
    let (queue, worker) = WorkQueue::start("drain-test", Vec::new()).unwrap();

    for i in 0..10u32 {
        queue
            .submit("push", move |state: &mut Vec<u32>, _| state.push(i))
            .unwrap();
    }
    let state = tokio::task::spawn_blocking(move || worker.stop())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.len(), 10);
    assert!(queue.is_closed());
    assert_eq!(
        queue.submit("late", |state, _| state.push(99)),
        Err(CoordinatorError::WorkQueueStopped)
    );
}

#[test]
fn test_call_blocking_from_plain_thread() {
    let (queue, worker) = WorkQueue::start("blocking-test", 41u32).unwrap();

    let value = queue
        .call_blocking("increment", |value, _| {
            *value += 1;
            *value
        })
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(worker.stop(), Some(42));
}

#[test]
fn test_call_blocking_inside_unit_is_rejected() {
    let (queue, worker) = WorkQueue::start("reentrant-test", ()).unwrap();

    let inner = queue
        .call_blocking("outer", |_, queue| {
            queue.call_blocking("inner", |_, _| ())
        })
        .unwrap();

    assert!(matches!(inner, Err(CoordinatorError::Internal(_))));
    worker.stop();
}

#[tokio::test]
async fn test_oneshot_sink_delivers_value_and_error() {
    let (sink, rx) = oneshot_sink::<u32>();
    sink.set_value(7);
    assert_eq!(rx.await.unwrap(), Ok(7));

    let (sink, rx) = oneshot_sink::<u32>();
    sink.set_error(CoordinatorError::WorkAborted);
    assert_eq!(rx.await.unwrap(), Err(CoordinatorError::WorkAborted));
}

#[tokio::test]
async fn test_map_sink_converts_value() {
    let (sink, rx) = oneshot_sink::<String>();
    let mapped = map_sink(sink, |n: u32| format!("n={}", n));
    mapped.set_value(3);
    assert_eq!(rx.await.unwrap(), Ok("n=3".to_string()));
}

#[test]
fn test_fn_sink_receives_outcome() {
    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let sink: Box<dyn ResultSink<u32>> = Box::new(FnSink(move |result: Result<u32>| {
        *record.lock().unwrap() = Some(result);
    }));
    sink.set_error(CoordinatorError::Malformed("bad".to_string()));
    assert_eq!(
        *seen.lock().unwrap(),
        Some(Err(CoordinatorError::Malformed("bad".to_string())))
    );

}
