mod articles;
mod feeds;
mod postgres;
mod schema;
mod store;
mod types;

pub use postgres::PgDatabase;
pub use schema::Database;
pub use store::FeedStore;
pub use types::{Article, DatabaseError, Feed, NewArticle, Settings};
