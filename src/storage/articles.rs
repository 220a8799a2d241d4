use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, ArticleDbRow, DatabaseError, NewArticle};

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Store a batch of new articles, returns the number of rows written.
    ///
    /// The whole batch is one transaction: either every article lands or
    /// none does. Batch size of 50 keeps us well under SQLite's parameter
    /// limit (7 columns * 50 = 350).
    pub async fn save_articles(&self, articles: &[NewArticle]) -> Result<u64, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let mut tx = self.pool.begin().await?;
        let mut written: u64 = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (feed_id, title, body, link, date, is_read, is_bookmark) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.feed_id)
                    .push_bind(&article.title)
                    .push_bind(&article.body)
                    .push_bind(&article.link)
                    .push_bind(article.date)
                    .push_bind(article.is_read)
                    .push_bind(article.is_bookmark);
            });

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Delete one feed's articles that are older than `older_than` (Unix
    /// seconds), already read and not bookmarked. Returns the number deleted.
    ///
    /// The predicate is always constrained to `feed_id`; other feeds are
    /// never touched.
    pub async fn delete_stale_articles(
        &self,
        feed_id: i64,
        older_than: i64,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE feed_id = ? AND date < ? AND is_bookmark = 0 AND is_read = 1
        "#,
        )
        .bind(feed_id)
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// All articles of one feed, in insertion order.
    pub async fn get_articles_for_feed(&self, feed_id: i64) -> Result<Vec<Article>, DatabaseError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, feed_id, title, body, link, date, is_read, is_bookmark
            FROM articles
            WHERE feed_id = ?
            ORDER BY id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    // ========================================================================
    // Article Mutations (reader-facing, used for seeding and tests)
    // ========================================================================

    /// Mark article as read (idempotent), returns whether it was changed
    pub async fn mark_article_read(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET is_read = 1 WHERE id = ? AND is_read = 0")
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set the bookmark flag, returns whether the article exists
    pub async fn set_article_bookmark(
        &self,
        article_id: i64,
        bookmarked: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET is_bookmark = ? WHERE id = ?")
            .bind(bookmarked)
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
