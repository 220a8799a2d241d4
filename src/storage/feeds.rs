use sqlx::QueryBuilder;
use std::collections::HashMap;
use std::sync::Arc;

use super::schema::Database;
use super::types::{ArticleDbRow, DatabaseError, Feed, FeedRow, Settings};

/// Max bound parameters per IN (...) list, well under SQLite's variable limit
const ID_CHUNK_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Feed & Settings Mutations
    // ========================================================================

    /// Insert a feed for a user, returning its id.
    ///
    /// Subscription management lives outside this service; this exists for
    /// seeding and tests.
    pub async fn insert_feed(&self, user_id: i64, name: &str, url: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("INSERT INTO feeds (user_id, name, url) VALUES (?, ?, ?) RETURNING id")
                .bind(user_id)
                .bind(name)
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Insert or replace a user's settings row.
    pub async fn upsert_settings(&self, settings: Settings) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO settings (user_id, rss_enabled) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET rss_enabled = excluded.rss_enabled
        "#,
        )
        .bind(settings.user_id)
        .bind(settings.rss_enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Ids of every user whose settings enable RSS updates.
    pub async fn get_rss_enabled_user_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM settings WHERE rss_enabled = 1 ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Feeds owned by any of `user_ids`, with their articles loaded.
    pub async fn get_feeds_for_users(&self, user_ids: &[i64]) -> Result<Vec<Feed>, DatabaseError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows: Vec<FeedRow> = Vec::new();
        for chunk in user_ids.chunks(ID_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT id, user_id, name, url FROM feeds WHERE user_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let mut chunk_rows: Vec<FeedRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            rows.append(&mut chunk_rows);
        }
        rows.sort_by_key(|row| row.0);

        self.attach_articles(rows).await
    }

    /// Every feed in the store, with its articles loaded.
    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> = sqlx::query_as("SELECT id, user_id, name, url FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        self.attach_articles(rows).await
    }

    /// Batch-load articles for the given feed rows (one query per chunk
    /// instead of one per feed) and build [`Feed`] values.
    async fn attach_articles(&self, rows: Vec<FeedRow>) -> Result<Vec<Feed>, DatabaseError> {
        let mut by_feed: HashMap<i64, Vec<_>> = HashMap::with_capacity(rows.len());
        let feed_ids: Vec<i64> = rows.iter().map(|row| row.0).collect();

        for chunk in feed_ids.chunks(ID_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT id, feed_id, title, body, link, date, is_read, is_bookmark \
                 FROM articles WHERE feed_id IN (",
            );
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY id");

            let articles: Vec<ArticleDbRow> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            for article in articles {
                by_feed
                    .entry(article.feed_id)
                    .or_default()
                    .push(article.into_article());
            }
        }

        let feeds = rows
            .into_iter()
            .map(|(id, user_id, name, url)| Feed {
                id,
                user_id,
                url,
                name: Arc::from(name),
                articles: by_feed.remove(&id).unwrap_or_default(),
            })
            .collect();

        Ok(feeds)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewArticle, Settings};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn article(feed_id: i64, link: &str) -> NewArticle {
        NewArticle {
            feed_id,
            title: format!("Title {}", link),
            body: "Body".to_string(),
            link: link.to_string(),
            date: 1704067200,
            is_read: false,
            is_bookmark: false,
        }
    }

    async fn enable(db: &Database, user_id: i64, rss_enabled: bool) {
        db.upsert_settings(Settings {
            user_id,
            rss_enabled,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_rss_enabled_user_ids() {
        let db = test_db().await;
        enable(&db, 1, true).await;
        enable(&db, 2, false).await;
        enable(&db, 3, true).await;

        let ids = db.get_rss_enabled_user_ids().await.unwrap();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_rss_enabled_user_ids_empty() {
        let db = test_db().await;
        assert!(db.get_rss_enabled_user_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_settings_toggles() {
        let db = test_db().await;
        enable(&db, 7, true).await;
        enable(&db, 7, false).await;

        assert!(db.get_rss_enabled_user_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feeds_for_users_filters_by_owner() {
        let db = test_db().await;
        let a = db.insert_feed(1, "A", "https://a.example.com/rss").await.unwrap();
        db.insert_feed(2, "B", "https://b.example.com/rss").await.unwrap();
        let c = db.insert_feed(3, "C", "https://c.example.com/rss").await.unwrap();

        let feeds = db.get_feeds_for_users(&[1, 3]).await.unwrap();
        let ids: Vec<i64> = feeds.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(&*feeds[0].name, "A");
        assert_eq!(feeds[1].user_id, 3);
    }

    #[tokio::test]
    async fn test_feeds_for_no_users_is_empty() {
        let db = test_db().await;
        db.insert_feed(1, "A", "https://a.example.com/rss").await.unwrap();

        assert!(db.get_feeds_for_users(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feeds_have_articles_eager_loaded() {
        let db = test_db().await;
        let a = db.insert_feed(1, "A", "https://a.example.com/rss").await.unwrap();
        let b = db.insert_feed(1, "B", "https://b.example.com/rss").await.unwrap();

        db.save_articles(&[article(a, "a1"), article(a, "a2"), article(b, "b1")])
            .await
            .unwrap();

        let feeds = db.get_feeds_for_users(&[1]).await.unwrap();
        let links: Vec<&str> = feeds[0].articles.iter().map(|x| x.link.as_str()).collect();
        assert_eq!(links, vec!["a1", "a2"]);
        assert_eq!(feeds[1].articles.len(), 1);
        assert_eq!(feeds[1].articles[0].feed_id, b);
    }

    #[tokio::test]
    async fn test_all_feeds_includes_disabled_users() {
        let db = test_db().await;
        enable(&db, 1, false).await;
        db.insert_feed(1, "A", "https://a.example.com/rss").await.unwrap();
        db.insert_feed(2, "B", "https://b.example.com/rss").await.unwrap();

        let feeds = db.get_all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 2);
        assert!(feeds.iter().all(|f| f.articles.is_empty()));
    }

    #[tokio::test]
    async fn test_feeds_for_many_users_chunked() {
        let db = test_db().await;
        for user in 0..600 {
            db.insert_feed(user, "F", "https://f.example.com/rss").await.unwrap();
        }

        let users: Vec<i64> = (0..600).collect();
        let feeds = db.get_feeds_for_users(&users).await.unwrap();
        assert_eq!(feeds.len(), 600);
    }
}
