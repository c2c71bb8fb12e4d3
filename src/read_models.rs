//! Viewer-relative read views.
//!
//! Every view here is assembled with a single SQL statement (or a short,
//! fixed sequence of them) that joins the base tables and computes counts and
//! `is*` flags with correlated subqueries. Nothing is cached or persisted:
//! flags always reflect the edges present at call time.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::Serialize;

use crate::{
    models::{MediaAsset, MediaUrl},
    pagination::{Page, PageParams, paginate},
    store::{Store, parse_timestamp, row_time},
};

const OWNER_COLUMNS: &str = "u.id AS owner_id, u.username AS owner_username, \
     u.full_name AS owner_full_name, u.avatar_url AS owner_avatar_url";

const CARD_COLUMNS: &str = "v.id, v.title, v.description, v.duration, v.views, v.is_published, \
     v.video_file_url, v.thumbnail_url, v.created_at, v.updated_at";

/// Public face of a user inside other views.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub avatar: MediaUrl,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub avatar: MediaAsset,
    pub cover_image: MediaAsset,
    pub subscribers_count: i64,
    pub channels_subscribed_to_count: i64,
    pub is_subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOwner {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub avatar: MediaUrl,
    pub subscribers_count: i64,
    pub is_subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetail {
    #[serde(rename = "_id")]
    pub id: String,
    pub video_file: MediaAsset,
    pub thumbnail: MediaAsset,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub like_count: i64,
    pub is_liked: bool,
    pub owner: VideoOwner,
    pub created_at: DateTime<Utc>,
}

/// Compact video projection used by listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCard {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub video_file: MediaUrl,
    pub thumbnail: MediaUrl,
    pub owner: OwnerSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikedVideo {
    /// Identifier of the like edge.
    #[serde(rename = "_id")]
    pub id: String,
    pub liked_at: DateTime<Utc>,
    pub liked_video: LikedVideoCard,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikedVideoCard {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub video_file: MediaUrl,
    pub thumbnail: MediaUrl,
    pub owner_details: OwnerSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistVideo {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub video_file: MediaUrl,
    pub thumbnail: MediaUrl,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistContents {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: OwnerSummary,
    pub total_videos: i64,
    pub total_views: i64,
    pub videos: Vec<PlaylistVideo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub total_videos: i64,
    pub total_views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub like_count: i64,
    pub is_liked: bool,
    pub owner: OwnerSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetView {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub like_count: i64,
    pub is_liked: bool,
    pub owner: OwnerSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    #[serde(flatten)]
    pub user: OwnerSummary,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSubscribers {
    pub total_subscribers: i64,
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestVideo {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub video_file: MediaUrl,
    pub thumbnail: MediaUrl,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedChannel {
    #[serde(flatten)]
    pub channel: OwnerSummary,
    pub subscribers_count: i64,
    pub latest_video: Option<LatestVideo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub total_videos: i64,
    pub total_views: i64,
    pub total_subscribers: i64,
    pub total_likes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardVideo {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub like_count: i64,
    pub video_file: MediaUrl,
    pub thumbnail: MediaUrl,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Views,
    CreatedAt,
    Duration,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            Self::Views => "v.views",
            Self::CreatedAt => "v.created_at",
            Self::Duration => "v.duration",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "views" => Ok(Self::Views),
            "createdAt" => Ok(Self::CreatedAt),
            "duration" => Ok(Self::Duration),
            other => Err(format!(
                "invalid sortBy {other:?}; expected one of views, createdAt, duration"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(format!("invalid sortType {other:?}; expected asc or desc")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for VideoSort {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl VideoSort {
    /// Parses the optional `sortBy`/`sortType` pair. A missing field means
    /// newest first; a missing direction means descending.
    pub fn parse(sort_by: Option<&str>, sort_type: Option<&str>) -> Result<Self, String> {
        let field = match sort_by.filter(|v| !v.is_empty()) {
            Some(raw) => raw.parse()?,
            None => SortField::CreatedAt,
        };
        let direction = match sort_type.filter(|v| !v.is_empty()) {
            Some(raw) => raw.parse()?,
            None => SortDirection::Desc,
        };
        Ok(Self { field, direction })
    }

    fn order_by(self) -> String {
        let dir = self.direction.keyword();
        format!("{} {dir}, v.id {dir}", self.field.column())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    /// Whitespace-separated terms; a video matches when any term occurs in
    /// its title or description.
    pub query: Option<String>,
    pub owner: Option<String>,
    pub sort: VideoSort,
}

impl Store {
    pub fn channel_profile(&self, username: &str, viewer: &str) -> Result<Option<ChannelProfile>> {
        let username = username.trim().to_lowercase();
        self.with_connection(|conn| {
            conn.query_row(
                r#"
                SELECT u.id, u.username, u.full_name, u.email,
                       u.avatar_url, u.avatar_public_id,
                       u.cover_image_url, u.cover_image_public_id,
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = u.id) AS subscribers_count,
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber = u.id) AS subscribed_to_count,
                       EXISTS(
                           SELECT 1 FROM subscriptions s WHERE s.channel = u.id AND s.subscriber = ?2
                       ) AS is_subscribed
                FROM users u
                WHERE u.username = ?1
                "#,
                params![username, viewer],
                |row| {
                    Ok(ChannelProfile {
                        id: row.get("id")?,
                        username: row.get("username")?,
                        full_name: row.get("full_name")?,
                        email: row.get("email")?,
                        avatar: MediaAsset {
                            url: row.get("avatar_url")?,
                            public_id: row.get("avatar_public_id")?,
                        },
                        cover_image: MediaAsset {
                            url: row.get("cover_image_url")?,
                            public_id: row.get("cover_image_public_id")?,
                        },
                        subscribers_count: row.get("subscribers_count")?,
                        channels_subscribed_to_count: row.get("subscribed_to_count")?,
                        is_subscribed: row.get("is_subscribed")?,
                    })
                },
            )
            .optional()
            .context("loading channel profile")
        })
    }

    /// Pure read; the view-count and watch-history side effects belong to the
    /// caller.
    pub fn video_detail(&self, video_id: &str, viewer: &str) -> Result<Option<VideoDetail>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT v.id, v.title, v.description, v.duration, v.views, v.is_published,
                       v.video_file_url, v.video_file_public_id,
                       v.thumbnail_url, v.thumbnail_public_id, v.created_at,
                       (SELECT COUNT(*) FROM likes l WHERE l.video = v.id) AS like_count,
                       EXISTS(
                           SELECT 1 FROM likes l WHERE l.video = v.id AND l.liked_by = ?2
                       ) AS is_liked,
                       {OWNER_COLUMNS},
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = v.owner) AS owner_subscribers,
                       EXISTS(
                           SELECT 1 FROM subscriptions s WHERE s.channel = v.owner AND s.subscriber = ?2
                       ) AS owner_is_subscribed
                FROM videos v
                JOIN users u ON u.id = v.owner
                WHERE v.id = ?1
                "#
            ))?;
            let mut rows = stmt.query([video_id, viewer])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            Ok(Some(VideoDetail {
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
                is_published: row.get("is_published")?,
                like_count: row.get("like_count")?,
                is_liked: row.get("is_liked")?,
                owner: VideoOwner {
                    id: row.get("owner_id")?,
                    username: row.get("owner_username")?,
                    full_name: row.get("owner_full_name")?,
                    avatar: MediaUrl {
                        url: row.get("owner_avatar_url")?,
                    },
                    subscribers_count: row.get("owner_subscribers")?,
                    is_subscribed: row.get("owner_is_subscribed")?,
                },
                created_at: row_time(row, "created_at")?,
            }))
        })
    }

    /// Published videos only, filtered and sorted as requested.
    pub fn list_videos(&self, filter: &VideoFilter, page: PageParams) -> Result<Page<VideoCard>> {
        let mut clauses = vec!["v.is_published = 1".to_string()];
        let mut values: Vec<String> = Vec::new();

        if let Some(owner) = &filter.owner {
            values.push(owner.clone());
            clauses.push(format!("v.owner = ?{}", values.len()));
        }

        let terms: Vec<&str> = filter
            .query
            .as_deref()
            .map(|q| q.split_whitespace().collect())
            .unwrap_or_default();
        if !terms.is_empty() {
            let mut any = Vec::with_capacity(terms.len());
            for term in terms {
                values.push(format!("%{}%", escape_like(term)));
                let idx = values.len();
                any.push(format!(
                    "v.title LIKE ?{idx} ESCAPE '\\' OR v.description LIKE ?{idx} ESCAPE '\\'"
                ));
            }
            clauses.push(format!("({})", any.join(" OR ")));
        }

        let select = format!(
            "SELECT {CARD_COLUMNS}, {OWNER_COLUMNS} FROM videos v JOIN users u ON u.id = v.owner WHERE {}",
            clauses.join(" AND ")
        );
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        self.with_connection(|conn| {
            paginate(
                conn,
                &select,
                &filter.sort.order_by(),
                &params,
                page,
                row_to_card,
            )
        })
    }

    pub fn video_comments(
        &self,
        video_id: &str,
        viewer: &str,
        page: PageParams,
    ) -> Result<Page<CommentView>> {
        let select = format!(
            r#"
            SELECT c.id, c.content, c.created_at,
                   (SELECT COUNT(*) FROM likes l WHERE l.comment = c.id) AS like_count,
                   EXISTS(
                       SELECT 1 FROM likes l WHERE l.comment = c.id AND l.liked_by = ?2
                   ) AS is_liked,
                   {OWNER_COLUMNS}
            FROM comments c
            JOIN users u ON u.id = c.owner
            WHERE c.video = ?1
            "#
        );
        self.with_connection(|conn| {
            paginate(
                conn,
                &select,
                "c.created_at DESC, c.id DESC",
                &[&video_id, &viewer],
                page,
                |row| {
                    Ok(CommentView {
                        id: row.get("id")?,
                        content: row.get("content")?,
                        like_count: row.get("like_count")?,
                        is_liked: row.get("is_liked")?,
                        owner: owner_summary(row)?,
                        created_at: row_time(row, "created_at")?,
                    })
                },
            )
        })
    }

    /// Most recently liked first.
    pub fn liked_videos(&self, viewer: &str) -> Result<Vec<LikedVideo>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT l.id AS like_id, l.created_at AS liked_at, {CARD_COLUMNS}, {OWNER_COLUMNS}
                FROM likes l
                JOIN videos v ON v.id = l.video
                JOIN users u ON u.id = v.owner
                WHERE l.liked_by = ?1
                ORDER BY l.created_at DESC, l.id DESC
                "#
            ))?;
            let mut rows = stmt.query([viewer])?;
            let mut liked = Vec::new();
            while let Some(row) = rows.next()? {
                liked.push(LikedVideo {
                    id: row.get("like_id")?,
                    liked_at: row_time(row, "liked_at")?,
                    liked_video: LikedVideoCard {
                        id: row.get("id")?,
                        title: row.get("title")?,
                        description: row.get("description")?,
                        duration: row.get("duration")?,
                        views: row.get("views")?,
                        video_file: MediaUrl {
                            url: row.get("video_file_url")?,
                        },
                        thumbnail: MediaUrl {
                            url: row.get("thumbnail_url")?,
                        },
                        owner_details: owner_summary(row)?,
                    },
                });
            }
            Ok(liked)
        })
    }

    /// Member videos that still exist and are published, in playlist order.
    pub fn playlist_contents(&self, playlist_id: &str) -> Result<Option<PlaylistContents>> {
        self.with_connection(|conn| {
            let header = conn
                .query_row(
                    &format!(
                        r#"
                        SELECT p.id, p.name, p.description, p.created_at, p.updated_at, {OWNER_COLUMNS}
                        FROM playlists p
                        JOIN users u ON u.id = p.owner
                        WHERE p.id = ?1
                        "#
                    ),
                    [playlist_id],
                    |row| {
                        Ok((
                            row.get::<_, String>("id")?,
                            row.get::<_, String>("name")?,
                            row.get::<_, String>("description")?,
                            row.get::<_, String>("created_at")?,
                            row.get::<_, String>("updated_at")?,
                            OwnerSummary {
                                id: row.get("owner_id")?,
                                username: row.get("owner_username")?,
                                full_name: row.get("owner_full_name")?,
                                avatar: MediaUrl {
                                    url: row.get("owner_avatar_url")?,
                                },
                            },
                        ))
                    },
                )
                .optional()?;
            let Some((id, name, description, created_at, updated_at, owner)) = header else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {CARD_COLUMNS}
                FROM playlist_videos pv
                JOIN videos v ON v.id = pv.video_id
                WHERE pv.playlist_id = ?1 AND v.is_published = 1
                ORDER BY pv.position ASC
                "#
            ))?;
            let mut rows = stmt.query([&id])?;
            let mut videos = Vec::new();
            while let Some(row) = rows.next()? {
                videos.push(PlaylistVideo {
                    id: row.get("id")?,
                    title: row.get("title")?,
                    description: row.get("description")?,
                    duration: row.get("duration")?,
                    views: row.get("views")?,
                    video_file: MediaUrl {
                        url: row.get("video_file_url")?,
                    },
                    thumbnail: MediaUrl {
                        url: row.get("thumbnail_url")?,
                    },
                    created_at: row_time(row, "created_at")?,
                });
            }

            Ok(Some(PlaylistContents {
                id,
                name,
                description,
                owner,
                total_videos: videos.len() as i64,
                total_views: videos.iter().map(|v| v.views).sum(),
                videos,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            }))
        })
    }

    pub fn user_playlists(&self, owner: &str) -> Result<Vec<PlaylistSummary>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT p.id, p.name, p.description, p.created_at, p.updated_at,
                       (SELECT COUNT(*) FROM playlist_videos pv
                        JOIN videos v ON v.id = pv.video_id
                        WHERE pv.playlist_id = p.id) AS total_videos,
                       (SELECT COALESCE(SUM(v.views), 0) FROM playlist_videos pv
                        JOIN videos v ON v.id = pv.video_id
                        WHERE pv.playlist_id = p.id) AS total_views
                FROM playlists p
                WHERE p.owner = ?1
                ORDER BY p.created_at DESC, p.id DESC
                "#,
            )?;
            let mut rows = stmt.query([owner])?;
            let mut playlists = Vec::new();
            while let Some(row) = rows.next()? {
                playlists.push(PlaylistSummary {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    description: row.get("description")?,
                    total_videos: row.get("total_videos")?,
                    total_views: row.get("total_views")?,
                    created_at: row_time(row, "created_at")?,
                    updated_at: row_time(row, "updated_at")?,
                });
            }
            Ok(playlists)
        })
    }

    /// Videos in first-watched order.
    pub fn watch_history(&self, user_id: &str) -> Result<Vec<VideoCard>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {CARD_COLUMNS}, {OWNER_COLUMNS}
                FROM watch_history w
                JOIN videos v ON v.id = w.video_id
                JOIN users u ON u.id = v.owner
                WHERE w.user_id = ?1
                ORDER BY w.position ASC
                "#
            ))?;
            let mut rows = stmt.query([user_id])?;
            let mut videos = Vec::new();
            while let Some(row) = rows.next()? {
                videos.push(row_to_card(row)?);
            }
            Ok(videos)
        })
    }

    /// Newest first.
    pub fn user_tweets(&self, owner: &str, viewer: &str) -> Result<Vec<TweetView>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT t.id, t.content, t.created_at,
                       (SELECT COUNT(*) FROM likes l WHERE l.tweet = t.id) AS like_count,
                       EXISTS(
                           SELECT 1 FROM likes l WHERE l.tweet = t.id AND l.liked_by = ?2
                       ) AS is_liked,
                       {OWNER_COLUMNS}
                FROM tweets t
                JOIN users u ON u.id = t.owner
                WHERE t.owner = ?1
                ORDER BY t.created_at DESC, t.id DESC
                "#
            ))?;
            let mut rows = stmt.query([owner, viewer])?;
            let mut tweets = Vec::new();
            while let Some(row) = rows.next()? {
                tweets.push(TweetView {
                    id: row.get("id")?,
                    content: row.get("content")?,
                    like_count: row.get("like_count")?,
                    is_liked: row.get("is_liked")?,
                    owner: owner_summary(row)?,
                    created_at: row_time(row, "created_at")?,
                });
            }
            Ok(tweets)
        })
    }

    pub fn channel_subscribers(&self, channel: &str) -> Result<ChannelSubscribers> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT s.created_at AS subscribed_at, {OWNER_COLUMNS}
                FROM subscriptions s
                JOIN users u ON u.id = s.subscriber
                WHERE s.channel = ?1
                ORDER BY s.created_at DESC, s.id DESC
                "#
            ))?;
            let mut rows = stmt.query([channel])?;
            let mut subscribers = Vec::new();
            while let Some(row) = rows.next()? {
                subscribers.push(Subscriber {
                    user: owner_summary(row)?,
                    subscribed_at: row_time(row, "subscribed_at")?,
                });
            }
            Ok(ChannelSubscribers {
                total_subscribers: subscribers.len() as i64,
                subscribers,
            })
        })
    }

    pub fn subscribed_channels(&self, subscriber: &str) -> Result<Vec<SubscribedChannel>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {OWNER_COLUMNS},
                       (SELECT COUNT(*) FROM subscriptions x WHERE x.channel = u.id) AS subscribers_count
                FROM subscriptions s
                JOIN users u ON u.id = s.channel
                WHERE s.subscriber = ?1
                ORDER BY s.created_at DESC, s.id DESC
                "#
            ))?;
            let mut rows = stmt.query([subscriber])?;
            let mut channels = Vec::new();
            while let Some(row) = rows.next()? {
                channels.push(SubscribedChannel {
                    channel: owner_summary(row)?,
                    subscribers_count: row.get("subscribers_count")?,
                    latest_video: None,
                });
            }
            for entry in &mut channels {
                entry.latest_video = latest_published_video(conn, &entry.channel.id)?;
            }
            Ok(channels)
        })
    }

    pub fn channel_stats(&self, channel: &str) -> Result<ChannelStats> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM videos WHERE owner = ?1) AS total_videos,
                    (SELECT COALESCE(SUM(views), 0) FROM videos WHERE owner = ?1) AS total_views,
                    (SELECT COUNT(*) FROM subscriptions WHERE channel = ?1) AS total_subscribers,
                    (SELECT COUNT(*) FROM likes l JOIN videos v ON v.id = l.video
                     WHERE v.owner = ?1) AS total_likes
                "#,
                [channel],
                |row| {
                    Ok(ChannelStats {
                        total_videos: row.get("total_videos")?,
                        total_views: row.get("total_views")?,
                        total_subscribers: row.get("total_subscribers")?,
                        total_likes: row.get("total_likes")?,
                    })
                },
            )?)
        })
    }

    /// Every video the channel owns, published or not, newest first.
    pub fn channel_videos(&self, channel: &str) -> Result<Vec<DashboardVideo>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {CARD_COLUMNS},
                       (SELECT COUNT(*) FROM likes l WHERE l.video = v.id) AS like_count
                FROM videos v
                WHERE v.owner = ?1
                ORDER BY v.created_at DESC, v.id DESC
                "#
            ))?;
            let mut rows = stmt.query([channel])?;
            let mut videos = Vec::new();
            while let Some(row) = rows.next()? {
                videos.push(DashboardVideo {
                    id: row.get("id")?,
                    title: row.get("title")?,
                    description: row.get("description")?,
                    duration: row.get("duration")?,
                    views: row.get("views")?,
                    is_published: row.get("is_published")?,
                    like_count: row.get("like_count")?,
                    video_file: MediaUrl {
                        url: row.get("video_file_url")?,
                    },
                    thumbnail: MediaUrl {
                        url: row.get("thumbnail_url")?,
                    },
                    created_at: row_time(row, "created_at")?,
                    updated_at: row_time(row, "updated_at")?,
                });
            }
            Ok(videos)
        })
    }
}

fn latest_published_video(conn: &Connection, owner: &str) -> Result<Option<LatestVideo>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {CARD_COLUMNS}, v.owner
        FROM videos v
        WHERE v.owner = ?1 AND v.is_published = 1
        ORDER BY v.created_at DESC, v.id DESC
        LIMIT 1
        "#
    ))?;
    let mut rows = stmt.query([owner])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    Ok(Some(LatestVideo {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        duration: row.get("duration")?,
        views: row.get("views")?,
        video_file: MediaUrl {
            url: row.get("video_file_url")?,
        },
        thumbnail: MediaUrl {
            url: row.get("thumbnail_url")?,
        },
        owner: row.get("owner")?,
        created_at: row_time(row, "created_at")?,
        updated_at: row_time(row, "updated_at")?,
    }))
}

fn owner_summary(row: &Row<'_>) -> Result<OwnerSummary> {
    Ok(OwnerSummary {
        id: row.get("owner_id")?,
        username: row.get("owner_username")?,
        full_name: row.get("owner_full_name")?,
        avatar: MediaUrl {
            url: row.get("owner_avatar_url")?,
        },
    })
}

fn row_to_card(row: &Row<'_>) -> Result<VideoCard> {
    Ok(VideoCard {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        duration: row.get("duration")?,
        views: row.get("views")?,
        is_published: row.get("is_published")?,
        video_file: MediaUrl {
            url: row.get("video_file_url")?,
        },
        thumbnail: MediaUrl {
            url: row.get("thumbnail_url")?,
        },
        owner: owner_summary(row)?,
        created_at: row_time(row, "created_at")?,
        updated_at: row_time(row, "updated_at")?,
    })
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LikeTarget;
    use crate::store::test_support::*;

    #[test]
    fn sort_parsing() {
        assert_eq!(VideoSort::parse(None, None).unwrap(), VideoSort::default());
        let sort = VideoSort::parse(Some("views"), Some("asc")).unwrap();
        assert_eq!(sort.field, SortField::Views);
        assert_eq!(sort.direction, SortDirection::Asc);
        let sort = VideoSort::parse(Some("duration"), None).unwrap();
        assert_eq!(sort.direction, SortDirection::Desc);
        assert!(VideoSort::parse(Some("title"), None).is_err());
        assert!(VideoSort::parse(Some("views"), Some("sideways")).is_err());
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
    }

    #[test]
    fn channel_profile_counts_and_viewer_flag() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let carol = user(&store, "carol");
        store.create_subscription(&bob.id, &alice.id).unwrap();
        store.create_subscription(&carol.id, &alice.id).unwrap();
        store.create_subscription(&alice.id, &bob.id).unwrap();

        let profile = store.channel_profile("ALICE", &bob.id).unwrap().unwrap();
        assert_eq!(profile.subscribers_count, 2);
        assert_eq!(profile.channels_subscribed_to_count, 1);
        assert!(profile.is_subscribed);

        let profile = store.channel_profile("alice", &alice.id).unwrap().unwrap();
        assert!(!profile.is_subscribed);
        assert!(store.channel_profile("nobody", &alice.id).unwrap().is_none());
    }

    #[test]
    fn video_detail_flags_follow_edges() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let clip = video(&store, &alice, "clip");

        let detail = store.video_detail(&clip.id, &bob.id).unwrap().unwrap();
        assert_eq!(detail.like_count, 0);
        assert!(!detail.is_liked);
        assert!(!detail.owner.is_subscribed);
        assert_eq!(detail.owner.username, "alice");

        store
            .create_like(&bob.id, &LikeTarget::Video(clip.id.clone()))
            .unwrap();
        store.create_subscription(&bob.id, &alice.id).unwrap();

        let detail = store.video_detail(&clip.id, &bob.id).unwrap().unwrap();
        assert_eq!(detail.like_count, 1);
        assert!(detail.is_liked);
        assert_eq!(detail.owner.subscribers_count, 1);
        assert!(detail.owner.is_subscribed);

        let as_owner = store.video_detail(&clip.id, &alice.id).unwrap().unwrap();
        assert!(!as_owner.is_liked);
        assert!(!as_owner.owner.is_subscribed);
    }

    #[test]
    fn listing_hides_unpublished_and_searches_terms() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let rust = video(&store, &alice, "rust");
        let go = video(&store, &bob, "go");
        let hidden = video(&store, &alice, "rustacean");
        store.set_video_published(&hidden.id, false).unwrap();

        let all = store
            .list_videos(&VideoFilter::default(), PageParams::default())
            .unwrap();
        assert_eq!(all.total_items, 2);

        let filter = VideoFilter {
            query: Some("rust".into()),
            ..VideoFilter::default()
        };
        let found = store.list_videos(&filter, PageParams::default()).unwrap();
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.items[0].id, rust.id);

        let filter = VideoFilter {
            query: Some("rust go".into()),
            ..VideoFilter::default()
        };
        assert_eq!(
            store
                .list_videos(&filter, PageParams::default())
                .unwrap()
                .total_items,
            2
        );

        let filter = VideoFilter {
            owner: Some(bob.id.clone()),
            ..VideoFilter::default()
        };
        let mine = store.list_videos(&filter, PageParams::default()).unwrap();
        assert_eq!(mine.items.len(), 1);
        assert_eq!(mine.items[0].id, go.id);
        assert_eq!(mine.items[0].owner.username, "bob");
    }

    #[test]
    fn listing_sorts_by_views() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let quiet = video(&store, &alice, "quiet");
        let popular = video(&store, &alice, "popular");
        for _ in 0..3 {
            store.increment_views(&popular.id).unwrap();
        }
        store.increment_views(&quiet.id).unwrap();

        let filter = VideoFilter {
            sort: VideoSort::parse(Some("views"), Some("asc")).unwrap(),
            ..VideoFilter::default()
        };
        let page = store.list_videos(&filter, PageParams::default()).unwrap();
        let ids: Vec<_> = page.items.iter().map(|v| v.id.clone()).collect();
        assert_eq!(ids, vec![quiet.id, popular.id]);
    }

    #[test]
    fn liked_videos_newest_like_first() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let first = video(&store, &alice, "first");
        let second = video(&store, &alice, "second");
        store
            .create_like(&alice.id, &LikeTarget::Video(first.id.clone()))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store
            .create_like(&alice.id, &LikeTarget::Video(second.id.clone()))
            .unwrap();
        store
            .create_like(&alice.id, &LikeTarget::Comment(first.id.clone()))
            .unwrap();

        let liked = store.liked_videos(&alice.id).unwrap();
        assert_eq!(liked.len(), 2);
        assert_eq!(liked[0].liked_video.id, second.id);
        assert_eq!(liked[1].liked_video.owner_details.username, "alice");
    }

    #[test]
    fn playlist_contents_only_counts_published() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let a = video(&store, &alice, "a");
        let b = video(&store, &alice, "b");
        store.increment_views(&a.id).unwrap();
        store.increment_views(&b.id).unwrap();
        store.increment_views(&b.id).unwrap();
        let playlist = store.create_playlist(&alice.id, "mix", "").unwrap();
        store.add_video_to_playlist(&playlist.id, &a.id).unwrap();
        store.add_video_to_playlist(&playlist.id, &b.id).unwrap();

        let contents = store.playlist_contents(&playlist.id).unwrap().unwrap();
        assert_eq!(contents.total_videos, 2);
        assert_eq!(contents.total_views, 3);

        store.set_video_published(&b.id, false).unwrap();
        let contents = store.playlist_contents(&playlist.id).unwrap().unwrap();
        assert_eq!(contents.total_videos, 1);
        assert_eq!(contents.total_views, 1);
        assert_eq!(contents.videos[0].id, a.id);
        assert_eq!(contents.owner.username, "alice");
    }

    #[test]
    fn comments_carry_like_state() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let clip = video(&store, &alice, "clip");
        let comment = store.create_comment(&clip.id, &alice.id, "first!").unwrap();
        store
            .create_like(&bob.id, &LikeTarget::Comment(comment.id.clone()))
            .unwrap();

        let page = store
            .video_comments(&clip.id, &bob.id, PageParams::default())
            .unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].like_count, 1);
        assert!(page.items[0].is_liked);

        let page = store
            .video_comments(&clip.id, &alice.id, PageParams::default())
            .unwrap();
        assert!(!page.items[0].is_liked);
    }

    #[test]
    fn subscriptions_views() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let old = video(&store, &alice, "old");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let newer = video(&store, &alice, "newer");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let draft = video(&store, &alice, "draft");
        store.set_video_published(&draft.id, false).unwrap();
        store.create_subscription(&bob.id, &alice.id).unwrap();

        let subs = store.channel_subscribers(&alice.id).unwrap();
        assert_eq!(subs.total_subscribers, 1);
        assert_eq!(subs.subscribers[0].user.id, bob.id);

        let channels = store.subscribed_channels(&bob.id).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].subscribers_count, 1);
        let latest = channels[0].latest_video.as_ref().unwrap();
        assert_eq!(latest.id, newer.id);
        assert_ne!(latest.id, old.id);
    }

    #[test]
    fn dashboard_stats_cover_own_videos() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let clip = video(&store, &alice, "clip");
        let draft = video(&store, &alice, "draft");
        store.set_video_published(&draft.id, false).unwrap();
        store.increment_views(&clip.id).unwrap();
        store
            .create_like(&bob.id, &LikeTarget::Video(clip.id.clone()))
            .unwrap();
        store.create_subscription(&bob.id, &alice.id).unwrap();

        let stats = store.channel_stats(&alice.id).unwrap();
        assert_eq!(
            stats,
            ChannelStats {
                total_videos: 2,
                total_views: 1,
                total_subscribers: 1,
                total_likes: 1,
            }
        );
        assert_eq!(store.channel_videos(&alice.id).unwrap().len(), 2);
        assert_eq!(store.channel_stats(&bob.id).unwrap(), ChannelStats::default());
    }

    #[test]
    fn user_playlists_and_tweets() {
        let (_dir, store) = temp_store();
        let alice = user(&store, "alice");
        let bob = user(&store, "bob");
        let clip = video(&store, &alice, "clip");
        store.increment_views(&clip.id).unwrap();
        let playlist = store.create_playlist(&alice.id, "mix", "").unwrap();
        store.add_video_to_playlist(&playlist.id, &clip.id).unwrap();

        let playlists = store.user_playlists(&alice.id).unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].total_videos, 1);
        assert_eq!(playlists[0].total_views, 1);

        let tweet = store.create_tweet(&alice.id, "hello").unwrap();
        store
            .create_like(&bob.id, &LikeTarget::Tweet(tweet.id.clone()))
            .unwrap();
        let tweets = store.user_tweets(&alice.id, &bob.id).unwrap();
        assert_eq!(tweets.len(), 1);
        assert!(tweets[0].is_liked);
        assert_eq!(tweets[0].like_count, 1);
    }
}
