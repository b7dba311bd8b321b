// src/attempt/reaper.rs

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use super::service::AttemptService;

/// Background sweep that closes attempts nobody came back to finish.
pub async fn run_attempt_reaper(service: AttemptService, scan_interval: Duration) {
    info!(
        scan_interval_secs = scan_interval.as_secs(),
        "Starting abandoned attempt reaper"
    );

    let mut interval = tokio::time::interval(scan_interval);

    loop {
        interval.tick().await;

        match service.reap_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(closed) => info!(closed, "Finalized expired attempts"),
            Err(e) => error!(error = %e, "Expired attempt scan failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    use super::*;
    use crate::{
        models::practice_test::{Choice, NewQuestion, NewTest},
        store::{MemoryStore, Store},
    };

    #[tokio::test]
    async fn test_reaper_task_sweeps_on_first_tick() {
        let store = Arc::new(MemoryStore::new());
        let test = store
            .create_test(NewTest {
                title: "Sweep".into(),
                description: None,
                duration_minutes: 1,
                passing_score: 40.0,
            })
            .await
            .unwrap();
        store
            .add_question(
                test.id,
                NewQuestion {
                    prompt: "?".into(),
                    options: ["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_option: Choice::A,
                    explanation: None,
                },
            )
            .await
            .unwrap();
        let attempt = store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now() - ChronoDuration::minutes(5))
            .await
            .unwrap();

        let handle = tokio::spawn(run_attempt_reaper(
            AttemptService::new(store.clone()),
            Duration::from_secs(3600),
        ));

        let mut completed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.get_attempt(attempt.id).await.unwrap().unwrap().is_completed() {
                completed = true;
                break;
            }
        }
        handle.abort();
        assert!(completed, "reaper should finalize the abandoned attempt");
    }
}
