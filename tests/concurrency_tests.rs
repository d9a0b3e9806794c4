//! # Concurrency Tests using Loom / 使用 Loom 的并发测试
//!
//! Models the two races the scheduler relies on: workers claiming entries
//! from the plan, and sibling leaves finishing their parent group.
//!
//! The loom models replay the locking protocol on loom primitives, since the
//! crate itself locks with `parking_lot`. The `stress` module runs the same
//! two races against the real `ExecutionPlan` and `Lifecycle` on OS threads.
//!
//! 对调度器依赖的两个竞争进行建模：工作者从计划中认领条目，以及兄弟叶子完成其父组。
//! loom 模型在 loom 原语上重现加锁协议；`stress` 模块在真实代码上用操作系统线程运行同样的竞争。

mod common;

#[cfg(test)]
mod tests {
    use loom::sync::atomic::{AtomicUsize, Ordering};
    use loom::sync::{Arc, Mutex};
    use loom::thread;

    const STACK_SIZE: usize = 8 * 1024 * 1024; // 8 MB

    /// Runs a loom model on a thread with a larger stack.
    fn run_model<F>(model: F)
    where
        F: Fn() + Sync + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name("loom-test-thread".into())
            .stack_size(STACK_SIZE)
            .spawn(move || loom::model(model))
            .unwrap();
        handle.join().unwrap();
    }

    /// A ready entry is marked as claimed under the same lock that found it,
    /// so two workers can never dispatch the same leaf.
    #[test]
    fn test_plan_entries_are_claimed_once() {
        run_model(|| {
            // (leaf, claimed)
            let entries = Arc::new(Mutex::new(vec![(0usize, false), (1usize, false)]));
            let dispatched = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let entries = entries.clone();
                    let dispatched = dispatched.clone();
                    thread::spawn(move || {
                        let claimed = {
                            let mut entries = entries.lock().unwrap();
                            entries.iter_mut().find(|(_, claimed)| !*claimed).map(|entry| {
                                entry.1 = true;
                                entry.0
                            })
                        };
                        if let Some(leaf) = claimed {
                            dispatched.fetch_add(1 << (leaf * 8), Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            // Each leaf dispatched exactly once.
            assert_eq!(dispatched.load(Ordering::SeqCst), 1 | (1 << 8));
        });
    }

    /// Sibling leaves decrement their parent's pending counter under the
    /// lifecycle lock; exactly one of them finishes the group.
    #[test]
    fn test_group_finishes_exactly_once() {
        run_model(|| {
            let pending = Arc::new(Mutex::new(2usize));
            let group_finished = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let pending = pending.clone();
                    let group_finished = group_finished.clone();
                    thread::spawn(move || {
                        let mut pending = pending.lock().unwrap();
                        *pending -= 1;
                        if *pending == 0 {
                            group_finished.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(group_finished.load(Ordering::SeqCst), 1);
            assert_eq!(*pending.lock().unwrap(), 0);
        });
    }
}

#[cfg(test)]
mod stress {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use parking_lot::Mutex;

    use crate::common::{RecordingListener, new_tree, passing};
    use suite_scheduler::core::tree::NodeId;
    use suite_scheduler::core::{ExecutionMode, ExecutionPlan, Lifecycle, ListenerRegistry};

    const THREADS: usize = 8;

    #[test]
    fn test_plan_claims_each_leaf_once_under_contention() {
        let mut tree = new_tree();
        let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
        for i in 0..200 {
            tree.add_leaf(passing(), &format!("leaf-{i}"), Some(root)).unwrap();
        }
        let plan = Arc::new(ExecutionPlan::build(Arc::new(tree)).unwrap());
        let claimed = Arc::new(Mutex::new(Vec::new()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let plan = plan.clone();
                let claimed = claimed.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    while let Some(leaf) = plan.next_executable_leaf() {
                        claimed.lock().push(leaf);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let claimed = claimed.lock();
        let distinct: BTreeSet<NodeId> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), 200);
        assert_eq!(distinct.len(), 200);
    }

    #[test]
    fn test_group_finishes_once_under_contention() {
        let mut tree = new_tree();
        let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
        let leaves: Vec<NodeId> = (0..64)
            .map(|i| tree.add_leaf(passing(), &format!("leaf-{i}"), Some(root)).unwrap())
            .collect();
        let listeners = Arc::new(ListenerRegistry::new());
        let recorder = RecordingListener::new();
        listeners.register(recorder.clone());
        let lifecycle = Arc::new(Lifecycle::new(Arc::new(tree), listeners));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = leaves
            .chunks(leaves.len() / THREADS)
            .map(|chunk| {
                let chunk = chunk.to_vec();
                let lifecycle = lifecycle.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for leaf in chunk {
                        lifecycle.leaf_started(leaf).unwrap();
                        lifecycle.leaf_finished(leaf, None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let labels = recorder.labels();
        assert_eq!(recorder.count("enter:root"), 1);
        assert_eq!(recorder.count("leave:root"), 1);
        assert_eq!(labels.first().map(String::as_str), Some("enter:root"));
        assert_eq!(labels.last().map(String::as_str), Some("leave:root"));
        assert_eq!(labels.iter().filter(|l| l.starts_with("finish:")).count(), 64);
    }
}
