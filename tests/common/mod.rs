#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc};

use chrono::Duration;
use tempfile::TempDir;
use vidtube::{
    api::{
        AppState,
        users::{RegisterForm, register_user},
    },
    auth::TokenService,
    media::{LocalMediaStorage, StagedFile},
    models::User,
    store::Store,
};

pub struct Harness {
    dir: TempDir,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("vidtube.db")).unwrap();
        let media = LocalMediaStorage::new(dir.path().join("media"), "/media").unwrap();
        let tokens = TokenService::new(
            "integration-access",
            Duration::minutes(15),
            "integration-refresh",
            Duration::days(1),
        );
        let state = AppState::new(
            store,
            Arc::new(media),
            tokens,
            dir.path().join("uploads"),
            false,
        );
        Self { dir, state }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("vidtube.db")
    }

    pub fn media_root(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    pub fn staged(&self, name: &str, contents: &[u8]) -> StagedFile {
        StagedFile::from_bytes(&self.state.upload_dir, name, contents).unwrap()
    }

    pub fn password(username: &str) -> String {
        format!("secret-{username}")
    }

    /// Registers through the public operation, password `secret-<username>`.
    pub async fn register(&self, username: &str) -> User {
        register_user(
            &self.state,
            RegisterForm {
                full_name: Some(format!("{username} tester")),
                username: Some(username.to_string()),
                email: Some(format!("{username}@example.test")),
                password: Some(Self::password(username)),
                avatar: Some(self.staged("avatar.png", b"avatar")),
                cover_image: None,
            },
        )
        .await
        .unwrap()
    }
}
