#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use parking_lot::Mutex;

    use crate::{
        config::ServerConfig,
        data_model::Strategy,
        scheduler::Scheduler,
        testing::{MockDriver, test_config},
    };

    fn build(mutate: impl FnOnce(&mut ServerConfig)) -> (Arc<Scheduler>, Arc<MockDriver>) {
        let mut config = test_config();
        mutate(&mut config);
        let driver = Arc::new(MockDriver::new());
        (Scheduler::new(&config, driver.clone()), driver)
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_then_warm_start() {
        let (scheduler, driver) = build(|c| {
            c.preconfigured_pools.insert("a".to_string(), 1);
        });

        scheduler.dispatch("a").await.unwrap();
        let snapshot = scheduler.stats().function_snapshot("a");
        assert_eq!(snapshot.cold_starts, 1);
        assert_eq!(snapshot.warm_starts, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;

        scheduler.dispatch("a").await.unwrap();
        let snapshot = scheduler.stats().function_snapshot("a");
        assert_eq!(snapshot.cold_starts, 1);
        assert_eq!(snapshot.warm_starts, 1);
        assert_eq!(driver.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn five_concurrent_against_cap_three() {
        let (scheduler, driver) = build(|_| {});
        driver.set_launch_delay(Duration::from_millis(100));
        driver.set_default_invoke_delay(Duration::from_millis(500));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(
                async move { scheduler.dispatch("b").await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = scheduler.stats().function_snapshot("b");
        assert_eq!(snapshot.cold_starts, 3);
        assert_eq!(snapshot.requests_queued, 2);
        assert!(snapshot.warm_starts >= 2);
        // Every accepted dispatch classified exactly once.
        assert_eq!(
            snapshot.cold_starts + snapshot.warm_starts + snapshot.requests_failed,
            5
        );
        assert_eq!(driver.launch_count(), 3);

        let pool = scheduler.pool("b").snapshot();
        assert_eq!(pool.busy, 0);
        assert_eq!(pool.queue_depth, 0);
        assert_eq!(pool.idle, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pools_are_isolated_per_function() {
        let (scheduler, driver) = build(|c| {
            c.preconfigured_pools.insert("a".to_string(), 5);
            c.preconfigured_pools.insert("c".to_string(), 3);
        });
        driver.set_launch_delay(Duration::from_millis(100));
        driver.set_default_invoke_delay(Duration::from_millis(500));

        let mut handles = Vec::new();
        for function_id in ["a", "c"] {
            for _ in 0..4 {
                let scheduler = scheduler.clone();
                handles.push(tokio::spawn(async move {
                    scheduler.dispatch(function_id).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let a = scheduler.stats().function_snapshot("a");
        assert_eq!(a.cold_starts, 4);
        assert_eq!(a.requests_queued, 0);

        let c = scheduler.stats().function_snapshot("c");
        assert_eq!(c.cold_starts, 3);
        assert_eq!(c.requests_queued, 1);
    }

    /// Drive two containers to idle with distinct ages, then check which
    /// one the next dispatch picks under each strategy.
    async fn reuse_pick(strategy: Strategy) -> (String, String, String) {
        let (scheduler, driver) = build(|c| {
            c.initial_strategy = strategy;
            c.preconfigured_pools.insert("f".to_string(), 2);
        });
        driver.push_invoke_delay(Duration::from_millis(100));
        driver.push_invoke_delay(Duration::from_millis(200));

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.dispatch("f").await })
        };
        let second = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.dispatch("f").await })
        };
        let older = first.await.unwrap().unwrap().container_id;
        let newer = second.await.unwrap().unwrap().container_id;
        assert_ne!(older, newer);

        let picked = scheduler.dispatch("f").await.unwrap().container_id;
        (older, newer, picked)
    }

    #[tokio::test(start_paused = true)]
    async fn lru_reuses_the_oldest_idle_container() {
        let (older, _newer, picked) = reuse_pick(Strategy::Lru).await;
        assert_eq!(picked, older);
    }

    #[tokio::test(start_paused = true)]
    async fn mru_reuses_the_newest_idle_container() {
        let (_older, newer, picked) = reuse_pick(Strategy::Mru).await;
        assert_eq!(picked, newer);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_waiters_are_served_in_arrival_order() {
        let (scheduler, driver) = build(|c| {
            c.preconfigured_pools.insert("a".to_string(), 1);
        });
        driver.set_default_invoke_delay(Duration::from_millis(100));

        // Occupy the single slot, then queue three more dispatches.
        let blocker = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.dispatch("a").await })
        };
        tokio::task::yield_now().await;

        let completions: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let scheduler = scheduler.clone();
            let completions = completions.clone();
            handles.push(tokio::spawn(async move {
                let result = scheduler.dispatch("a").await;
                completions.lock().push(i);
                result
            }));
            // Enqueue order must match spawn order.
            tokio::task::yield_now().await;
        }

        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*completions.lock(), vec![0, 1, 2]);

        let snapshot = scheduler.stats().function_snapshot("a");
        assert_eq!(snapshot.cold_starts, 1);
        assert_eq!(snapshot.warm_starts, 3);
        assert_eq!(snapshot.requests_queued, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_survive_reset_epochs_consistently() {
        let (scheduler, _driver) = build(|_| {});
        scheduler.dispatch("a").await.unwrap();
        scheduler.dispatch("a").await.unwrap();

        let before = scheduler.stats().global_snapshot();
        assert_eq!(before.cold_starts + before.warm_starts, 2);

        scheduler.stats().reset();
        let after = scheduler.stats().global_snapshot();
        assert_eq!(after.cold_starts, 0);
        assert_eq!(after.warm_starts, 0);

        // New dispatches count against the fresh epoch.
        scheduler.dispatch("a").await.unwrap();
        let next = scheduler.stats().global_snapshot();
        assert_eq!(next.warm_starts, 1);
        assert_eq!(next.cold_starts, 0);
    }
}
