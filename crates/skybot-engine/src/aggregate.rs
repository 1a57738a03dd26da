use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use skybot_db::Database;

use crate::client::{DirectorySource, SocialClient};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::templates;

/// Export pages pulled per tick, so a cold mirror catches up gradually.
const MAX_EXPORT_BATCHES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// First snapshot stored; nothing announced.
    Seeded { count: u64 },
    Unchanged { count: u64 },
    Counted { count: u64 },
    Announced { count: u64, milestone: u64 },
    /// The announcement was rejected outright; the count is stored anyway.
    Abandoned { count: u64, milestone: u64 },
}

/// Mirrors the account directory and announces user-count milestones.
///
/// Owns its own storage handle and touches only the directory mirror and
/// the count snapshots.
pub struct Aggregator {
    db: Arc<Database>,
    directory: Arc<dyn DirectorySource>,
    social: Arc<dyn SocialClient>,
    dispatcher: Arc<Dispatcher>,
    endpoint: String,
    step: u64,
    chunk_chars: usize,
}

impl Aggregator {
    pub fn new(
        db: Arc<Database>,
        directory: Arc<dyn DirectorySource>,
        social: Arc<dyn SocialClient>,
        dispatcher: Arc<Dispatcher>,
        endpoint: impl Into<String>,
        step: u64,
        chunk_chars: usize,
    ) -> Self {
        Self {
            db,
            directory,
            social,
            dispatcher,
            endpoint: endpoint.into(),
            step: step.max(1),
            chunk_chars,
        }
    }

    pub async fn run(self, interval_secs: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            interval.tick().await;

            match self.tick(Utc::now()).await {
                Ok(TickOutcome::Announced { count, milestone }) => {
                    info!(count, milestone, "Aggregation: milestone announced");
                }
                Ok(outcome) => debug!(?outcome, "Aggregation tick"),
                Err(e) => warn!("Aggregation error: {}", e),
            }
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, EngineError> {
        let inserted = self.sync_directory().await?;
        if inserted > 0 {
            info!(inserted, "Directory mirror updated");
        }

        let count = self.db.directory_user_count(&self.endpoint)?;
        let Some(last) = self.db.latest_aggregate_count()? else {
            self.db.insert_aggregate_count(count, now)?;
            info!(count, "Seeded user count");
            return Ok(TickOutcome::Seeded { count });
        };

        if count == last {
            return Ok(TickOutcome::Unchanged { count });
        }

        let milestone = count / self.step * self.step;
        let previous = last / self.step * self.step;
        if milestone > previous && milestone > 0 {
            let text = templates::milestone_message(milestone, self.step);
            let posted = self
                .dispatcher
                .post(self.social.as_ref(), &text, self.chunk_chars)
                .await;
            let outcome = match posted {
                Ok(_) => TickOutcome::Announced { count, milestone },
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(e) => {
                    warn!(count, milestone, "Milestone announcement abandoned: {}", e);
                    TickOutcome::Abandoned { count, milestone }
                }
            };
            self.db.insert_aggregate_count(count, now)?;
            return Ok(outcome);
        }

        self.db.insert_aggregate_count(count, now)?;
        Ok(TickOutcome::Counted { count })
    }

    /// Pull export records newer than the mirror's newest entry.
    async fn sync_directory(&self) -> Result<usize, EngineError> {
        let mut inserted = 0;
        for _ in 0..MAX_EXPORT_BATCHES {
            let after = self.db.last_directory_created_at()?;
            let directory = self.directory.as_ref();
            let batch = self
                .dispatcher
                .call("plc_export", || directory.export_after(after.as_deref()))
                .await?;
            if batch.is_empty() {
                break;
            }
            let added = self.db.insert_directory_users(&batch)?;
            inserted += added;
            // Only duplicates came back, so the export has nothing newer.
            if added == 0 {
                break;
            }
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::RetryPolicy;
    use async_trait::async_trait;
    use skybot_types::api::{BlobRef, NotificationPage, PostDraft, SessionInfo, TimelinePage};
    use skybot_types::{ClientError, DirectoryUser, PostRef};
    use std::sync::Mutex;

    const PDS: &str = "https://bsky.social";

    #[derive(Default)]
    struct FakeDirectory {
        batches: Mutex<Vec<Vec<DirectoryUser>>>,
    }

    #[async_trait]
    impl DirectorySource for FakeDirectory {
        async fn export_after(&self, _after: Option<&str>) -> Result<Vec<DirectoryUser>, ClientError> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(batches.remove(0))
            }
        }
    }

    #[derive(Default)]
    struct FakeSocial {
        posts: Mutex<Vec<String>>,
        reject_posts: bool,
        post_attempts: Mutex<u32>,
    }

    #[async_trait]
    impl SocialClient for FakeSocial {
        async fn login(&self) -> Result<SessionInfo, ClientError> {
            Ok(SessionInfo { did: "did:plc:bot".into(), handle: "bot.test".into() })
        }
        async fn timeline(&self, _: Option<&str>, _: u32) -> Result<TimelinePage, ClientError> {
            Ok(TimelinePage::default())
        }
        async fn notifications(&self, _: Option<&str>, _: u32) -> Result<NotificationPage, ClientError> {
            Ok(NotificationPage::default())
        }
        async fn create_post(&self, draft: &PostDraft) -> Result<PostRef, ClientError> {
            *self.post_attempts.lock().unwrap() += 1;
            if self.reject_posts {
                return Err(ClientError::Malformed("record rejected".into()));
            }
            let mut posts = self.posts.lock().unwrap();
            posts.push(draft.text.clone());
            Ok(PostRef::new(format!("at://did:plc:bot/app.bsky.feed.post/{}", posts.len()), "c"))
        }
        async fn upload_image(&self, _: &[u8]) -> Result<BlobRef, ClientError> {
            Err(ClientError::Malformed("unused".into()))
        }
        async fn follow(&self, _: &str) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn users(from: u32, to: u32, endpoint: &str) -> Vec<DirectoryUser> {
        (from..to)
            .map(|i| DirectoryUser {
                did: format!("did:plc:u{i:05}"),
                handle: format!("u{i}.test"),
                endpoint: endpoint.into(),
                created_at: format!("2023-01-01T00:{:02}:{:02}.000Z", i / 60 % 60, i % 60),
            })
            .collect()
    }

    fn aggregator(directory: Arc<FakeDirectory>, social: Arc<FakeSocial>) -> Aggregator {
        let dispatcher = Dispatcher::new(
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            Duration::ZERO,
        );
        Aggregator::new(
            Arc::new(Database::open_in_memory().unwrap()),
            directory,
            social,
            Arc::new(dispatcher),
            PDS,
            100,
            280,
        )
    }

    #[tokio::test]
    async fn first_tick_seeds_without_posting() {
        let directory = Arc::new(FakeDirectory::default());
        directory.batches.lock().unwrap().push(users(0, 250, PDS));
        let social = Arc::new(FakeSocial::default());
        let agg = aggregator(directory, social.clone());

        let outcome = agg.tick(Utc::now()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Seeded { count: 250 });
        assert!(social.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn crossing_a_step_posts_once() {
        let directory = Arc::new(FakeDirectory::default());
        directory.batches.lock().unwrap().push(users(0, 190, PDS));
        let social = Arc::new(FakeSocial::default());
        let agg = aggregator(directory.clone(), social.clone());
        agg.tick(Utc::now()).await.unwrap();

        {
            let mut batches = directory.batches.lock().unwrap();
            batches.push(users(190, 205, PDS));
            batches.push(users(205, 210, "https://other.pds"));
        }
        let outcome = agg.tick(Utc::now()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Announced { count: 205, milestone: 200 });
        assert_eq!(
            social.posts.lock().unwrap().as_slice(),
            ["We now have 200 users.".to_string()]
        );

        directory.batches.lock().unwrap().push(users(210, 230, PDS));
        let outcome = agg.tick(Utc::now()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Counted { count: 225 });
        assert_eq!(social.posts.lock().unwrap().len(), 1);

        let outcome = agg.tick(Utc::now()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Unchanged { count: 225 });
    }

    #[tokio::test]
    async fn rejected_announcement_is_not_retried_every_tick() {
        let directory = Arc::new(FakeDirectory::default());
        directory.batches.lock().unwrap().push(users(0, 190, PDS));
        let social = Arc::new(FakeSocial {
            reject_posts: true,
            ..FakeSocial::default()
        });
        let agg = aggregator(directory.clone(), social.clone());
        agg.tick(Utc::now()).await.unwrap();

        directory.batches.lock().unwrap().push(users(190, 205, PDS));
        let outcome = agg.tick(Utc::now()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Abandoned { count: 205, milestone: 200 });

        for _ in 0..4 {
            let outcome = agg.tick(Utc::now()).await.unwrap();
            assert_eq!(outcome, TickOutcome::Unchanged { count: 205 });
        }
        assert_eq!(*social.post_attempts.lock().unwrap(), 1);
        assert!(social.posts.lock().unwrap().is_empty());
    }
}
