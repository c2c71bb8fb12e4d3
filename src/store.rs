//! SQLite persistence for every VidTube entity.
//!
//! The store keeps no connection of its own: each call opens a short-lived
//! connection against the database file, so the handle is cheap to share
//! between blocking tasks. Multi-step operations are deliberately not wrapped
//! in transactions; callers compose them and live with partial failure.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::models::{
    Comment, Like, LikeTarget, MediaAsset, Playlist, Subscription, Tweet, User, Video,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        full_name TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        avatar_url TEXT NOT NULL DEFAULT '',
        avatar_public_id TEXT NOT NULL DEFAULT '',
        cover_image_url TEXT NOT NULL DEFAULT '',
        cover_image_public_id TEXT NOT NULL DEFAULT '',
        refresh_token TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS watch_history (
        user_id TEXT NOT NULL,
        video_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (user_id, video_id)
    );

    CREATE TABLE IF NOT EXISTS videos (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        duration REAL NOT NULL DEFAULT 0,
        views INTEGER NOT NULL DEFAULT 0 CHECK (views >= 0),
        is_published INTEGER NOT NULL DEFAULT 1,
        video_file_url TEXT NOT NULL,
        video_file_public_id TEXT NOT NULL,
        thumbnail_url TEXT NOT NULL,
        thumbnail_public_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner);
    CREATE INDEX IF NOT EXISTS idx_videos_created ON videos(created_at, id);

    CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        video TEXT NOT NULL,
        owner TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video);

    CREATE TABLE IF NOT EXISTS likes (
        id TEXT PRIMARY KEY,
        liked_by TEXT NOT NULL,
        video TEXT,
        comment TEXT,
        tweet TEXT,
        created_at TEXT NOT NULL,
        CHECK ((video IS NOT NULL) + (comment IS NOT NULL) + (tweet IS NOT NULL) = 1)
    );

    CREATE INDEX IF NOT EXISTS idx_likes_liked_by ON likes(liked_by);
    CREATE INDEX IF NOT EXISTS idx_likes_video ON likes(video);
    CREATE INDEX IF NOT EXISTS idx_likes_comment ON likes(comment);
    CREATE INDEX IF NOT EXISTS idx_likes_tweet ON likes(tweet);

    CREATE TABLE IF NOT EXISTS tweets (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        owner TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tweets_owner ON tweets(owner);

    CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT PRIMARY KEY,
        subscriber TEXT NOT NULL,
        channel TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber ON subscriptions(subscriber);
    CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel);

    CREATE TABLE IF NOT EXISTS playlists (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        owner TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_playlists_owner ON playlists(owner);

    CREATE TABLE IF NOT EXISTS playlist_videos (
        playlist_id TEXT NOT NULL,
        video_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (playlist_id, video_id)
    );
"#;

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, avatar_url, \
     avatar_public_id, cover_image_url, cover_image_public_id, refresh_token, created_at, updated_at";

const VIDEO_COLUMNS: &str = "id, owner, title, description, duration, views, is_published, \
     video_file_url, video_file_public_id, thumbnail_url, thumbnail_public_id, created_at, updated_at";

/// Fields supplied at registration time.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar: MediaAsset,
    pub cover_image: MediaAsset,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub owner: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub video_file: MediaAsset,
    pub thumbnail: MediaAsset,
}

/// Handle on the SQLite database file.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Opens (and if necessary creates) the database and ensures the schema
    /// exists. WAL mode keeps readers from blocking the writer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("setting synchronous mode")?;

        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA).context("creating schema")?;
        tx.commit()?;

        Ok(Self {
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        f(&conn)
    }

    // ---- users ----

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let now = now();
        let user = User {
            id: new_id(),
            username: new.username.clone(),
            email: new.email.clone(),
            full_name: new.full_name.clone(),
            avatar: new.avatar.clone(),
            cover_image: new.cover_image.clone(),
            password_hash: new.password_hash.clone(),
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO users (
                    id, username, email, full_name, password_hash,
                    avatar_url, avatar_public_id, cover_image_url, cover_image_public_id,
                    refresh_token, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)
                "#,
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.full_name,
                    user.password_hash,
                    user.avatar.url,
                    user.avatar.public_id,
                    user.cover_image.url,
                    user.cover_image.public_id,
                    stamp,
                ],
            )
            .context("inserting user")?;
            Ok(())
        })?;
        Ok(user)
    }

    pub fn find_user(&self, id: &str) -> Result<Option<User>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_user(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Matches on either field; `None` fields never match.
    pub fn find_user_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?2 LIMIT 1"
            ))?;
            let mut rows = stmt.query(params![username, email])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_user(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn update_account(&self, id: &str, full_name: &str, email: &str) -> Result<Option<User>> {
        self.update_user(
            id,
            "full_name = ?2, email = ?3",
            &[&full_name as &dyn rusqlite::ToSql, &email],
        )
    }

    pub fn update_avatar(&self, id: &str, avatar: &MediaAsset) -> Result<Option<User>> {
        self.update_user(
            id,
            "avatar_url = ?2, avatar_public_id = ?3",
            &[&avatar.url as &dyn rusqlite::ToSql, &avatar.public_id],
        )
    }

    pub fn update_cover_image(&self, id: &str, cover: &MediaAsset) -> Result<Option<User>> {
        self.update_user(
            id,
            "cover_image_url = ?2, cover_image_public_id = ?3",
            &[&cover.url as &dyn rusqlite::ToSql, &cover.public_id],
        )
    }

    pub fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<bool> {
        let stamp = format_timestamp(&now());
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, password_hash, stamp],
            )?;
            Ok(changed > 0)
        })
    }

    /// Overwrites the persisted refresh token; `None` logs the user out.
    pub fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
                params![id, token],
            )?;
            Ok(changed > 0)
        })
    }

    /// Appends to the user's watch history unless the video is already there.
    pub fn add_to_watch_history(&self, user_id: &str, video_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO watch_history (user_id, video_id, position)
                VALUES (
                    ?1, ?2,
                    (SELECT COALESCE(MAX(position), 0) + 1 FROM watch_history WHERE user_id = ?1)
                )
                "#,
                params![user_id, video_id],
            )?;
            Ok(())
        })
    }

    pub fn watch_history_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT video_id FROM watch_history WHERE user_id = ?1 ORDER BY position ASC",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    fn update_user(
        &self,
        id: &str,
        assignments: &str,
        values: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<User>> {
        let stamp = format_timestamp(&now());
        let changed = self.with_connection(|conn| {
            let sql = format!(
                "UPDATE users SET {assignments}, updated_at = ?{} WHERE id = ?1",
                values.len() + 2
            );
            let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(values.len() + 2);
            bound.push(&id);
            bound.extend_from_slice(values);
            bound.push(&stamp);
            Ok(conn.execute(&sql, bound.as_slice())?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_user(id)
    }

    // ---- videos ----

    pub fn create_video(&self, new: &NewVideo) -> Result<Video> {
        let now = now();
        let video = Video {
            id: new_id(),
            video_file: new.video_file.clone(),
            thumbnail: new.thumbnail.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            duration: new.duration,
            views: 0,
            is_published: true,
            owner: new.owner.clone(),
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO videos (
                    id, owner, title, description, duration, views, is_published,
                    video_file_url, video_file_public_id, thumbnail_url, thumbnail_public_id,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6, ?7, ?8, ?9, ?10, ?10)
                "#,
                params![
                    video.id,
                    video.owner,
                    video.title,
                    video.description,
                    video.duration,
                    video.video_file.url,
                    video.video_file.public_id,
                    video.thumbnail.url,
                    video.thumbnail.public_id,
                    stamp,
                ],
            )
            .context("inserting video")?;
            Ok(())
        })?;
        Ok(video)
    }

    pub fn find_video(&self, id: &str) -> Result<Option<Video>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_video(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn update_video_details(
        &self,
        id: &str,
        title: &str,
        description: &str,
        thumbnail: &MediaAsset,
    ) -> Result<Option<Video>> {
        let stamp = format_timestamp(&now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                r#"
                UPDATE videos
                SET title = ?2, description = ?3, thumbnail_url = ?4,
                    thumbnail_public_id = ?5, updated_at = ?6
                WHERE id = ?1
                "#,
                params![id, title, description, thumbnail.url, thumbnail.public_id, stamp],
            )?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_video(id)
    }

    pub fn set_video_published(&self, id: &str, published: bool) -> Result<Option<Video>> {
        let stamp = format_timestamp(&now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE videos SET is_published = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, published, stamp],
            )?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_video(id)
    }

    pub fn increment_views(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute("UPDATE videos SET views = views + 1 WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Removes the video row only. Comments, likes, playlist memberships and
    /// watch-history entries pointing at it are left in place.
    pub fn delete_video(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| Ok(conn.execute("DELETE FROM videos WHERE id = ?1", [id])? > 0))
    }

    // ---- comments ----

    pub fn create_comment(&self, video: &str, owner: &str, content: &str) -> Result<Comment> {
        let now = now();
        let comment = Comment {
            id: new_id(),
            content: content.to_string(),
            video: video.to_string(),
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO comments (id, content, video, owner, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                "#,
                params![comment.id, comment.content, comment.video, comment.owner, stamp],
            )?;
            Ok(())
        })?;
        Ok(comment)
    }

    pub fn find_comment(&self, id: &str) -> Result<Option<Comment>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, video, owner, created_at, updated_at FROM comments WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(Comment {
                    id: row.get("id")?,
                    content: row.get("content")?,
                    video: row.get("video")?,
                    owner: row.get("owner")?,
                    created_at: row_time(row, "created_at")?,
                    updated_at: row_time(row, "updated_at")?,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn update_comment(&self, id: &str, content: &str) -> Result<Option<Comment>> {
        let stamp = format_timestamp(&now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, content, stamp],
            )?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_comment(id)
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| Ok(conn.execute("DELETE FROM comments WHERE id = ?1", [id])? > 0))
    }

    // ---- likes ----

    pub fn find_like(&self, liked_by: &str, target: &LikeTarget) -> Result<Option<Like>> {
        let column = target.column();
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, liked_by, created_at FROM likes WHERE liked_by = ?1 AND {column} = ?2 LIMIT 1"
            ))?;
            let mut rows = stmt.query(params![liked_by, target.id()])?;
            match rows.next()? {
                Some(row) => Ok(Some(Like {
                    id: row.get("id")?,
                    target: target.clone(),
                    liked_by: row.get("liked_by")?,
                    created_at: row_time(row, "created_at")?,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn create_like(&self, liked_by: &str, target: &LikeTarget) -> Result<Like> {
        let like = Like {
            id: new_id(),
            target: target.clone(),
            liked_by: liked_by.to_string(),
            created_at: now(),
        };
        let stamp = format_timestamp(&like.created_at);
        let column = target.column();
        self.with_connection(|conn| {
            conn.execute(
                &format!("INSERT INTO likes (id, liked_by, {column}, created_at) VALUES (?1, ?2, ?3, ?4)"),
                params![like.id, like.liked_by, target.id(), stamp],
            )?;
            Ok(())
        })?;
        Ok(like)
    }

    pub fn delete_like(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| Ok(conn.execute("DELETE FROM likes WHERE id = ?1", [id])? > 0))
    }

    pub fn count_likes(&self, target: &LikeTarget) -> Result<i64> {
        let column = target.column();
        self.with_connection(|conn| {
            Ok(conn.query_row(
                &format!("SELECT COUNT(*) FROM likes WHERE {column} = ?1"),
                [target.id()],
                |row| row.get(0),
            )?)
        })
    }

    // ---- tweets ----

    pub fn create_tweet(&self, owner: &str, content: &str) -> Result<Tweet> {
        let now = now();
        let tweet = Tweet {
            id: new_id(),
            content: content.to_string(),
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tweets (id, content, owner, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![tweet.id, tweet.content, tweet.owner, stamp],
            )?;
            Ok(())
        })?;
        Ok(tweet)
    }

    pub fn find_tweet(&self, id: &str) -> Result<Option<Tweet>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, owner, created_at, updated_at FROM tweets WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(Tweet {
                    id: row.get("id")?,
                    content: row.get("content")?,
                    owner: row.get("owner")?,
                    created_at: row_time(row, "created_at")?,
                    updated_at: row_time(row, "updated_at")?,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn update_tweet(&self, id: &str, content: &str) -> Result<Option<Tweet>> {
        let stamp = format_timestamp(&now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE tweets SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, content, stamp],
            )?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_tweet(id)
    }

    pub fn delete_tweet(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| Ok(conn.execute("DELETE FROM tweets WHERE id = ?1", [id])? > 0))
    }

    // ---- subscriptions ----

    pub fn find_subscription(&self, subscriber: &str, channel: &str) -> Result<Option<Subscription>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, subscriber, channel, created_at, updated_at
                FROM subscriptions
                WHERE subscriber = ?1 AND channel = ?2
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![subscriber, channel])?;
            match rows.next()? {
                Some(row) => Ok(Some(Subscription {
                    id: row.get("id")?,
                    subscriber: row.get("subscriber")?,
                    channel: row.get("channel")?,
                    created_at: row_time(row, "created_at")?,
                    updated_at: row_time(row, "updated_at")?,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn create_subscription(&self, subscriber: &str, channel: &str) -> Result<Subscription> {
        let now = now();
        let subscription = Subscription {
            id: new_id(),
            subscriber: subscriber.to_string(),
            channel: channel.to_string(),
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO subscriptions (id, subscriber, channel, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                "#,
                params![subscription.id, subscription.subscriber, subscription.channel, stamp],
            )?;
            Ok(())
        })?;
        Ok(subscription)
    }

    pub fn delete_subscription(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM subscriptions WHERE id = ?1", [id])? > 0)
        })
    }

    // ---- playlists ----

    pub fn create_playlist(&self, owner: &str, name: &str, description: &str) -> Result<Playlist> {
        let now = now();
        let playlist = Playlist {
            id: new_id(),
            name: name.to_string(),
            description: description.to_string(),
            owner: owner.to_string(),
            videos: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO playlists (id, name, description, owner, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                "#,
                params![playlist.id, playlist.name, playlist.description, playlist.owner, stamp],
            )?;
            Ok(())
        })?;
        Ok(playlist)
    }

    pub fn find_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        self.with_connection(|conn| {
            let playlist = conn
                .query_row(
                    r#"
                    SELECT id, name, description, owner, created_at, updated_at
                    FROM playlists WHERE id = ?1
                    "#,
                    [id],
                    |row| {
                        Ok((
                            row.get::<_, String>("id")?,
                            row.get::<_, String>("name")?,
                            row.get::<_, String>("description")?,
                            row.get::<_, String>("owner")?,
                            row.get::<_, String>("created_at")?,
                            row.get::<_, String>("updated_at")?,
                        ))
                    },
                )
                .optional()?;
            let Some((id, name, description, owner, created_at, updated_at)) = playlist else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT video_id FROM playlist_videos WHERE playlist_id = ?1 ORDER BY position ASC",
            )?;
            let videos = stmt
                .query_map([&id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;

            Ok(Some(Playlist {
                id,
                name,
                description,
                owner,
                videos,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            }))
        })
    }

    pub fn update_playlist(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Option<Playlist>> {
        let stamp = format_timestamp(&now());
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET name = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, name, description, stamp],
            )?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_playlist(id)
    }

    /// Deletes the playlist together with its own membership list.
    pub fn delete_playlist(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM playlist_videos WHERE playlist_id = ?1", [id])?;
            Ok(conn.execute("DELETE FROM playlists WHERE id = ?1", [id])? > 0)
        })
    }

    /// Set-union insert: adding a member twice keeps its original position.
    pub fn add_video_to_playlist(&self, playlist_id: &str, video_id: &str) -> Result<Option<Playlist>> {
        let stamp = format_timestamp(&now());
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO playlist_videos (playlist_id, video_id, position)
                VALUES (
                    ?1, ?2,
                    (SELECT COALESCE(MAX(position), 0) + 1 FROM playlist_videos WHERE playlist_id = ?1)
                )
                "#,
                params![playlist_id, video_id],
            )?;
            conn.execute(
                "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
                params![playlist_id, stamp],
            )?;
            Ok(())
        })?;
        self.find_playlist(playlist_id)
    }

    pub fn remove_video_from_playlist(
        &self,
        playlist_id: &str,
        video_id: &str,
    ) -> Result<Option<Playlist>> {
        let stamp = format_timestamp(&now());
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
                params![playlist_id, video_id],
            )?;
            conn.execute(
                "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
                params![playlist_id, stamp],
            )?;
            Ok(())
        })?;
        self.find_playlist(playlist_id)
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time truncated to the precision the database keeps, so values
/// returned from create calls compare equal to what a later read produces.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339: lexical order of the stored text is chronological.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("parsing stored timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

pub(crate) fn row_time(row: &Row<'_>, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw)
}

fn row_to_user(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        full_name: row.get("full_name")?,
        avatar: MediaAsset {
            url: row.get("avatar_url")?,
            public_id: row.get("avatar_public_id")?,
        },
        cover_image: MediaAsset {
            url: row.get("cover_image_url")?,
            public_id: row.get("cover_image_public_id")?,
        },
        password_hash: row.get("password_hash")?,
        refresh_token: row.get("refresh_token")?,
        created_at: row_time(row, "created_at")?,
        updated_at: row_time(row, "updated_at")?,
    })
}

pub(crate) fn row_to_video(row: &Row<'_>) -> Result<Video> {
    Ok(Video {
        id: row.get("id")?,
        video_file: MediaAsset {
            url: row.get("video_file_url")?,
            public_id: row.get("video_file_public_id")?,
        },
        thumbnail: MediaAsset {
            url: row.get("thumbnail_url")?,
            public_id: row.get("thumbnail_public_id")?,
        },
        title: row.get("title")?,
        description: row.get("description")?,
        duration: row.get("duration")?,
        views: row.get("views")?,
        is_published: row.get::<_, i64>("is_published").map(|value| value != 0)?,
        owner: row.get("owner")?,
        created_at: row_time(row, "created_at")?,
        updated_at: row_time(row, "updated_at")?,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn open_is_idempotent() {
        let (dir, store) = temp_store();
        let again = Store::open(store.path()).unwrap();
        assert_eq!(again.path(), dir.path().join("vidtube.db"));
    }

    #[test]
    fn timestamps_round_trip_at_stored_precision() {
        let stamp = now();
        assert_eq!(parse_timestamp(&format_timestamp(&stamp)).unwrap(), stamp);
        assert_eq!(format_timestamp(&stamp).len(), "2024-01-01T00:00:00.000000Z".len());
    }

    #[test]
    fn user_lookup_by_username_or_email() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");

        let by_name = store
            .find_user_by_username_or_email(Some("alice"), None)
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, alice.id);
        let by_email = store
            .find_user_by_username_or_email(None, Some("alice@example.test"))
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, alice.id);
        assert!(store
            .find_user_by_username_or_email(Some("bob"), Some("bob@example.test"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn refresh_token_overwrite_and_clear() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");

        store.set_refresh_token(&alice.id, Some("first")).unwrap();
        store.set_refresh_token(&alice.id, Some("second")).unwrap();
        let loaded = store.find_user(&alice.id).unwrap().unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("second"));

        store.set_refresh_token(&alice.id, None).unwrap();
        let loaded = store.find_user(&alice.id).unwrap().unwrap();
        assert!(loaded.refresh_token.is_none());
    }

    #[test]
    fn account_and_media_updates_reselect() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");

        let updated = store
            .update_account(&alice.id, "Alice Liddell", "liddell@example.test")
            .unwrap()
            .unwrap();
        assert_eq!(updated.full_name, "Alice Liddell");
        assert_eq!(updated.email, "liddell@example.test");

        let cover = asset("image", "cover.png");
        let updated = store.update_cover_image(&alice.id, &cover).unwrap().unwrap();
        assert_eq!(updated.cover_image, cover);
        assert_eq!(updated.avatar, alice.avatar);

        assert!(store.update_account(&new_id(), "x", "y").unwrap().is_none());
    }

    #[test]
    fn watch_history_has_set_semantics() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let first = video(&store, &alice, "first");
        let second = video(&store, &alice, "second");

        store.add_to_watch_history(&alice.id, &first.id).unwrap();
        store.add_to_watch_history(&alice.id, &second.id).unwrap();
        store.add_to_watch_history(&alice.id, &first.id).unwrap();

        assert_eq!(
            store.watch_history_ids(&alice.id).unwrap(),
            vec![first.id.clone(), second.id.clone()]
        );
    }

    #[test]
    fn video_views_and_publish_flag() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let clip = video(&store, &alice, "clip");
        assert!(clip.is_published);
        assert_eq!(clip.views, 0);

        store.increment_views(&clip.id).unwrap();
        store.increment_views(&clip.id).unwrap();
        let hidden = store.set_video_published(&clip.id, false).unwrap().unwrap();
        assert_eq!(hidden.views, 2);
        assert!(!hidden.is_published);
        assert!(!store.increment_views(&new_id()).unwrap());
    }

    #[test]
    fn deleting_a_video_leaves_related_rows() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let clip = video(&store, &alice, "clip");
        let comment = store.create_comment(&clip.id, &alice.id, "nice").unwrap();
        store
            .create_like(&alice.id, &LikeTarget::Video(clip.id.clone()))
            .unwrap();

        assert!(store.delete_video(&clip.id).unwrap());
        assert!(store.find_video(&clip.id).unwrap().is_none());
        assert!(store.find_comment(&comment.id).unwrap().is_some());
        assert_eq!(
            store.count_likes(&LikeTarget::Video(clip.id.clone())).unwrap(),
            1
        );
    }

    #[test]
    fn likes_are_keyed_by_target_kind() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let tweet = store.create_tweet(&alice.id, "hello").unwrap();

        let target = LikeTarget::Tweet(tweet.id.clone());
        let like = store.create_like(&alice.id, &target).unwrap();
        assert_eq!(
            store.find_like(&alice.id, &target).unwrap().unwrap().id,
            like.id
        );
        // Same identifier under another target kind is a different edge.
        assert!(store
            .find_like(&alice.id, &LikeTarget::Video(tweet.id.clone()))
            .unwrap()
            .is_none());

        assert!(store.delete_like(&like.id).unwrap());
        assert!(store.find_like(&alice.id, &target).unwrap().is_none());
    }

    #[test]
    fn playlist_membership_is_an_ordered_set() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let a = video(&store, &alice, "a");
        let b = video(&store, &alice, "b");
        let playlist = store.create_playlist(&alice.id, "mix", "songs").unwrap();

        store.add_video_to_playlist(&playlist.id, &a.id).unwrap();
        store.add_video_to_playlist(&playlist.id, &b.id).unwrap();
        let loaded = store.add_video_to_playlist(&playlist.id, &a.id).unwrap().unwrap();
        assert_eq!(loaded.videos, vec![a.id.clone(), b.id.clone()]);

        let loaded = store
            .remove_video_from_playlist(&playlist.id, &a.id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.videos, vec![b.id.clone()]);

        assert!(store.delete_playlist(&playlist.id).unwrap());
        assert!(store.find_playlist(&playlist.id).unwrap().is_none());
    }

    #[test]
    fn subscriptions_find_by_pair() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");

        let sub = store.create_subscription(&bob.id, &alice.id).unwrap();
        assert_eq!(
            store.find_subscription(&bob.id, &alice.id).unwrap().unwrap().id,
            sub.id
        );
        assert!(store.find_subscription(&alice.id, &bob.id).unwrap().is_none());
        assert!(store.delete_subscription(&sub.id).unwrap());
    }
}
