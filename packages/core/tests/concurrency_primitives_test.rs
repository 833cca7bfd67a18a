//! Integration tests for the shared-state building blocks
//!
//! Tests cover:
//! - ThreadSafeList under concurrent inserts and removal re-linking
//! - RetryContext attempt budget
//! - Priority ordering of the bounded scheduler

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storykeep_core::operations::RetryContext;
use storykeep_core::services::{Priority, TaskScheduler};
use storykeep_core::utils::ThreadSafeList;
use tokio::sync::mpsc;

// =========================================================================
// ThreadSafeList
// =========================================================================

#[test]
fn test_concurrent_tail_inserts_keep_every_node() {
    let list = ThreadSafeList::new();
    list.add_to_tail(0usize);

    std::thread::scope(|scope| {
        for worker in 0..3 {
            let list = &list;
            scope.spawn(move || {
                for i in 0..33 {
                    list.add_to_tail(1 + worker * 33 + i);
                    assert!(!list.is_empty());
                }
            });
        }
    });

    let values = list.convert_to_array();
    assert_eq!(values.len(), 100);
    let unique: HashSet<_> = values.iter().copied().collect();
    assert_eq!(unique.len(), 100);
    assert_eq!(values[0], 0);
    assert!(!list.is_empty());

    assert_eq!(list.remove_all().len(), 100);
    assert!(list.is_empty());
    assert!(list.head().is_none());
}

#[test]
fn test_removals_relink_neighbours() {
    let list = ThreadSafeList::new();
    let handles: Vec<_> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|v| list.add_to_tail(v))
        .collect();

    // head
    assert_eq!(list.remove(handles[0]), "a");
    assert_eq!(list.head(), Some(handles[1]));
    assert_eq!(list.prev(handles[1]), None);

    // tail
    assert_eq!(list.remove(handles[4]), "e");
    assert_eq!(list.tail(), Some(handles[3]));
    assert_eq!(list.next(handles[3]), None);

    // middle
    assert_eq!(list.remove(handles[2]), "c");
    assert_eq!(list.next(handles[1]), Some(handles[3]));
    assert_eq!(list.prev(handles[3]), Some(handles[1]));

    assert_eq!(list.convert_to_array(), vec!["b", "d"]);
    assert!(!list.contains(handles[2]));
}

#[test]
#[should_panic(expected = "not in this list")]
fn test_removing_foreign_node_panics() {
    let list = ThreadSafeList::new();
    let other = ThreadSafeList::new();
    list.add_to_tail(1);
    let foreign = other.add_to_tail(2);
    list.remove(foreign);
}

#[test]
#[should_panic(expected = "not in this list")]
fn test_removing_twice_panics() {
    let list = ThreadSafeList::new();
    let handle = list.add_to_head("only");
    list.remove(handle);
    list.remove(handle);
}

// =========================================================================
// RetryContext
// =========================================================================

#[tokio::test]
async fn test_always_retrying_work_runs_exactly_max_count_times() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let context = RetryContext::new(TaskScheduler::unbounded());
    context.start("always-failing upload", 3, move || {
        let _ = tx.send(());
    });

    let mut scheduled = Vec::new();
    while rx.recv().await.is_some() {
        let again = context.attempt(Duration::from_millis(1), Priority::Background);
        scheduled.push(again);
        if !again {
            break;
        }
    }

    assert_eq!(context.invocations(), 3);
    assert_eq!(scheduled, vec![true, true, false]);
    // Exhaustion releases the work closure and with it the sender
    assert!(rx.recv().await.is_none());
}

// =========================================================================
// TaskScheduler
// =========================================================================

#[tokio::test]
async fn test_bounded_scheduler_admits_higher_priority_first() {
    let scheduler = TaskScheduler::bounded(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = scheduler.schedule(Priority::Low, async {
        tokio::time::sleep(Duration::from_millis(30)).await;
    });
    tokio::task::yield_now().await;

    let mut waiting = Vec::new();
    for priority in [Priority::Background, Priority::Low, Priority::High] {
        let order = order.clone();
        waiting.push(scheduler.schedule(priority, async move {
            order.lock().unwrap().push(priority);
        }));
        tokio::task::yield_now().await;
    }

    blocker.await.unwrap();
    for handle in waiting {
        handle.await.unwrap();
    }
    assert_eq!(
        *order.lock().unwrap(),
        vec![Priority::High, Priority::Low, Priority::Background]
    );
}
