use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tower::ServiceExt;

use piazza::application::accounts::AccountService;
use piazza::application::authoring::AuthoringService;
use piazza::application::feed::FeedService;
use piazza::application::follows::FollowService;
use piazza::application::repos::{
    CommentItemRecord, CommentsRepo, CreateCommentParams, CreateGroupParams, CreatePostParams,
    CreateUserParams, FeedItemRecord, FeedQueryFilter, FollowsRepo, GroupRef, GroupsRepo,
    PostsRepo, PostsWriteRepo, RepoError, SessionsRepo, UpdatePostParams, UsersRepo,
};
use piazza::domain::entities::{
    CommentRecord, GroupRecord, PostRecord, SessionRecord, UserRecord,
};
use piazza::infra::http::{HttpState, SESSION_COOKIE, build_router};
use piazza::infra::media::MediaStorage;

#[derive(Default)]
struct Store {
    users: Vec<UserRecord>,
    groups: Vec<GroupRecord>,
    posts: Vec<PostRecord>,
    comments: Vec<CommentRecord>,
    follows: Vec<(i64, i64)>,
    sessions: HashMap<String, SessionRecord>,
    next_id: i64,
}

impl Store {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn username_of(&self, user_id: i64) -> String {
        self.users
            .iter()
            .find(|user| user.id == user_id)
            .map(|user| user.username.clone())
            .unwrap_or_default()
    }

    fn group_ref(&self, group_id: Option<i64>) -> Option<GroupRef> {
        let id = group_id?;
        self.groups.iter().find(|group| group.id == id).map(|group| GroupRef {
            title: group.title.clone(),
            slug: group.slug.clone(),
        })
    }

    fn feed_item(&self, post: &PostRecord) -> FeedItemRecord {
        FeedItemRecord {
            post: post.clone(),
            author_username: self.username_of(post.author_id),
            group: self.group_ref(post.group_id),
            comment_count: self
                .comments
                .iter()
                .filter(|comment| comment.post_id == post.id)
                .count() as u64,
        }
    }

    fn matching_posts(&self, filter: &FeedQueryFilter) -> Vec<PostRecord> {
        let mut posts: Vec<PostRecord> = self
            .posts
            .iter()
            .filter(|post| {
                if let Some(group_id) = filter.group_id {
                    if post.group_id != Some(group_id) {
                        return false;
                    }
                }
                if let Some(author_id) = filter.author_id {
                    if post.author_id != author_id {
                        return false;
                    }
                }
                if let Some(user_id) = filter.followed_by {
                    let followed = self
                        .follows
                        .iter()
                        .any(|(follower, author)| *follower == user_id && *author == post.author_id);
                    if !followed {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        posts.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.id.cmp(&a.id))
        });
        posts
    }
}

#[derive(Default)]
struct InMemoryRepos {
    state: Mutex<Store>,
}

#[async_trait]
impl UsersRepo for InMemoryRepos {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|user| user.username == params.username) {
            return Err(RepoError::Duplicate {
                constraint: "users_username_key".to_string(),
            });
        }
        let user = UserRecord {
            id: state.allocate_id(),
            username: params.username,
            password_hash: params.password_hash,
            joined_at: OffsetDateTime::now_utc(),
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|user| user.username == username).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|user| user.id == id).cloned())
    }
}

#[async_trait]
impl GroupsRepo for InMemoryRepos {
    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
        let mut state = self.state.lock().await;
        if state.groups.iter().any(|group| group.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "groups_slug_key".to_string(),
            });
        }
        let group = GroupRecord {
            id: state.allocate_id(),
            title: params.title,
            slug: params.slug,
            description: params.description,
        };
        state.groups.push(group.clone());
        Ok(group)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.groups.iter().find(|group| group.slug == slug).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<GroupRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.groups.iter().find(|group| group.id == id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut groups = state.groups.clone();
        groups.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(groups)
    }
}

#[async_trait]
impl PostsRepo for InMemoryRepos {
    async fn list_feed(
        &self,
        filter: &FeedQueryFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<FeedItemRecord>, RepoError> {
        let state = self.state.lock().await;
        let posts = state.matching_posts(filter);
        Ok(posts
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|post| state.feed_item(&post))
            .collect())
    }

    async fn count_feed(&self, filter: &FeedQueryFilter) -> Result<u64, RepoError> {
        let state = self.state.lock().await;
        Ok(state.matching_posts(filter).len() as u64)
    }

    async fn find_feed_item(&self, id: i64) -> Result<Option<FeedItemRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .find(|post| post.id == id)
            .map(|post| state.feed_item(post)))
    }
}

#[async_trait]
impl PostsWriteRepo for InMemoryRepos {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        let post = PostRecord {
            id: state.allocate_id(),
            text: params.text,
            published_at: OffsetDateTime::now_utc(),
            author_id: params.author_id,
            group_id: params.group_id,
            image_path: params.image_path,
        };
        state.posts.push(post.clone());
        Ok(post)
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == params.id)
            .ok_or(RepoError::NotFound)?;
        post.text = params.text;
        post.group_id = params.group_id;
        if let Some(path) = params.new_image_path {
            post.image_path = Some(path);
        }
        Ok(post.clone())
    }
}

#[async_trait]
impl CommentsRepo for InMemoryRepos {
    async fn create_comment(&self, params: CreateCommentParams) -> Result<CommentRecord, RepoError> {
        let mut state = self.state.lock().await;
        let comment = CommentRecord {
            id: state.allocate_id(),
            post_id: params.post_id,
            author_id: params.author_id,
            text: params.text,
            created_at: OffsetDateTime::now_utc(),
        };
        state.comments.push(comment.clone());
        Ok(comment)
    }

    async fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentItemRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut comments: Vec<CommentRecord> = state
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments
            .into_iter()
            .map(|comment| {
                let author_username = state.username_of(comment.author_id);
                CommentItemRecord {
                    comment,
                    author_username,
                }
            })
            .collect())
    }
}

#[async_trait]
impl FollowsRepo for InMemoryRepos {
    async fn insert_edge(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        if state.follows.contains(&(user_id, author_id)) {
            return Ok(false);
        }
        state.follows.push((user_id, author_id));
        Ok(true)
    }

    async fn delete_edge(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.follows.len();
        state.follows.retain(|edge| *edge != (user_id, author_id));
        Ok(state.follows.len() < before)
    }

    async fn edge_exists(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let state = self.state.lock().await;
        Ok(state.follows.contains(&(user_id, author_id)))
    }

    async fn count_followers(&self, author_id: i64) -> Result<u64, RepoError> {
        let state = self.state.lock().await;
        Ok(state.follows.iter().filter(|(_, a)| *a == author_id).count() as u64)
    }

    async fn count_following(&self, user_id: i64) -> Result<u64, RepoError> {
        let state = self.state.lock().await;
        Ok(state.follows.iter().filter(|(u, _)| *u == user_id).count() as u64)
    }
}

#[async_trait]
impl SessionsRepo for InMemoryRepos {
    async fn insert_session(&self, session: SessionRecord) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.token.clone(), session);
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.sessions.remove(token);
        Ok(())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, session| session.expires_at > now);
        Ok((before - state.sessions.len()) as u64)
    }
}

struct TestApp {
    repos: Arc<InMemoryRepos>,
    router: Router,
    _media_dir: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        let repos = Arc::new(InMemoryRepos::default());
        let media_dir = tempfile::tempdir().expect("tempdir");
        let media = Arc::new(
            MediaStorage::new(media_dir.path().to_path_buf()).expect("media storage"),
        );

        let users: Arc<dyn UsersRepo> = repos.clone();
        let groups: Arc<dyn GroupsRepo> = repos.clone();
        let posts: Arc<dyn PostsRepo> = repos.clone();
        let posts_write: Arc<dyn PostsWriteRepo> = repos.clone();
        let comments: Arc<dyn CommentsRepo> = repos.clone();
        let follows: Arc<dyn FollowsRepo> = repos.clone();
        let sessions: Arc<dyn SessionsRepo> = repos.clone();

        let state = HttpState {
            feed: Arc::new(FeedService::new(
                posts.clone(),
                groups.clone(),
                users.clone(),
                comments.clone(),
            )),
            authoring: Arc::new(AuthoringService::new(
                posts,
                posts_write,
                groups.clone(),
                comments,
                media.clone(),
            )),
            follows: Arc::new(FollowService::new(follows)),
            accounts: Arc::new(AccountService::new(users.clone(), sessions, 24)),
            users,
            groups,
            media,
            body_limit_bytes: 10 * 1024 * 1024,
        };

        Self {
            repos,
            router: build_router(state),
            _media_dir: media_dir,
        }
    }

    async fn seed_user(&self, username: &str) -> UserRecord {
        let users: &dyn UsersRepo = self.repos.as_ref();
        users
            .create_user(CreateUserParams {
                username: username.to_string(),
                password_hash: "unusable".to_string(),
            })
            .await
            .expect("seed user")
    }

    async fn seed_session(&self, user_id: i64) -> String {
        let token = format!("token-for-{user_id}");
        let now = OffsetDateTime::now_utc();
        let sessions: &dyn SessionsRepo = self.repos.as_ref();
        sessions
            .insert_session(SessionRecord {
                token: token.clone(),
                user_id,
                created_at: now,
                expires_at: now + Duration::hours(24),
            })
            .await
            .expect("seed session");
        token
    }

    async fn seed_group(&self, title: &str, slug: &str) -> GroupRecord {
        let groups: &dyn GroupsRepo = self.repos.as_ref();
        groups
            .create_group(CreateGroupParams {
                title: title.to_string(),
                slug: slug.to_string(),
                description: String::new(),
            })
            .await
            .expect("seed group")
    }

    async fn seed_post(&self, author_id: i64, text: &str, group_id: Option<i64>) -> PostRecord {
        let posts: &dyn PostsWriteRepo = self.repos.as_ref();
        posts
            .create_post(CreatePostParams {
                author_id,
                text: text.to_string(),
                group_id,
                image_path: None,
            })
            .await
            .expect("seed post")
    }

    async fn get(&self, path: &str, session: Option<&str>) -> axum::response::Response {
        let mut request = Request::builder().uri(path).method("GET");
        if let Some(token) = session {
            request = request.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn post_form(
        &self,
        path: &str,
        body: &str,
        session: Option<&str>,
    ) -> axum::response::Response {
        let mut request = Request::builder()
            .uri(path)
            .method("POST")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(token) = session {
            request = request.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).expect("request"))
            .await
            .expect("response")
    }

    async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        image: Option<(&str, &[u8])>,
        session: Option<&str>,
    ) -> axum::response::Response {
        let boundary = "piazza-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, bytes)) = image {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        let mut request = Request::builder().uri(path).method("POST").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        );
        if let Some(token) = session {
            request = request.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::from(body)).expect("request"))
            .await
            .expect("response")
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn location_of(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Smallest payload imagesize recognises as a 1x1 PNG.
fn tiny_png() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13]);
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&[0, 0, 0, 1]);
    bytes.extend_from_slice(&[0, 0, 0, 1]);
    bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes
}

#[tokio::test]
async fn new_post_appears_first_in_global_feed() {
    let app = TestApp::new();
    let author = app.seed_user("leo").await;
    app.seed_post(author.id, "the very first entry", None).await;
    let token = app.seed_session(author.id).await;

    let response = app
        .post_multipart("/new/", &[("text", "fresh off the press")], None, Some(&token))
        .await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), "/");

    let body = body_string(app.get("/", None).await).await;
    let newest = body.find("fresh off the press").expect("new post rendered");
    let older = body.find("the very first entry").expect("old post rendered");
    assert!(newest < older, "newest post must render first");
}

#[tokio::test]
async fn group_feeds_are_isolated() {
    let app = TestApp::new();
    let kurt = app.seed_user("kurt").await;
    let rock = app.seed_group("Rock", "rock").await;
    app.seed_group("Rap", "rap").await;
    let token = app.seed_session(kurt.id).await;

    let response = app
        .post_multipart(
            "/new/",
            &[
                ("text", "Курт Кобейн жив"),
                ("group", &rock.id.to_string()),
            ],
            None,
            Some(&token),
        )
        .await;
    assert!(response.status().is_redirection());

    let rock_body = body_string(app.get("/group/rock/", None).await).await;
    assert!(rock_body.contains("Курт Кобейн жив"));

    let rap_body = body_string(app.get("/group/rap/", None).await).await;
    assert!(!rap_body.contains("Курт Кобейн жив"));

    let index_body = body_string(app.get("/", None).await).await;
    assert!(index_body.contains("Курт Кобейн жив"));

    let profile_body = body_string(app.get("/kurt/", None).await).await;
    assert!(profile_body.contains("Курт Кобейн жив"));
}

#[tokio::test]
async fn unknown_group_renders_not_found() {
    let app = TestApp::new();
    let response = app.get("/group/jazz/", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn following_twice_leaves_one_edge() {
    let app = TestApp::new();
    let reader = app.seed_user("reader").await;
    let author = app.seed_user("author").await;
    let token = app.seed_session(reader.id).await;

    for _ in 0..2 {
        let response = app.get("/author/follow/", Some(&token)).await;
        assert!(response.status().is_redirection());
        assert_eq!(location_of(&response), "/author/");
    }

    let state = app.repos.state.lock().await;
    let edges: Vec<_> = state
        .follows
        .iter()
        .filter(|edge| **edge == (reader.id, author.id))
        .collect();
    assert_eq!(edges.len(), 1, "repeat follow must not add a second edge");
}

#[tokio::test]
async fn self_follow_is_a_silent_redirect() {
    let app = TestApp::new();
    let user = app.seed_user("narcissus").await;
    let token = app.seed_session(user.id).await;

    let response = app.get("/narcissus/follow/", Some(&token)).await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), "/narcissus/");

    let state = app.repos.state.lock().await;
    assert!(state.follows.is_empty());
}

#[tokio::test]
async fn profile_counters_track_follow_round_trip() {
    let app = TestApp::new();
    let reader = app.seed_user("reader").await;
    app.seed_user("author").await;
    let token = app.seed_session(reader.id).await;

    let body = body_string(app.get("/author/", Some(&token)).await).await;
    assert!(body.contains("Followers: 0"));

    app.get("/author/follow/", Some(&token)).await;

    let body = body_string(app.get("/author/", Some(&token)).await).await;
    assert!(body.contains("Followers: 1"));
    let body = body_string(app.get("/reader/", Some(&token)).await).await;
    assert!(body.contains("Following: 1"));

    app.get("/author/unfollow/", Some(&token)).await;

    let body = body_string(app.get("/author/", Some(&token)).await).await;
    assert!(body.contains("Followers: 0"));
    let body = body_string(app.get("/reader/", Some(&token)).await).await;
    assert!(body.contains("Following: 0"));
}

#[tokio::test]
async fn following_feed_tracks_follow_state() {
    let app = TestApp::new();
    let reader = app.seed_user("reader").await;
    let author = app.seed_user("author").await;
    let stranger = app.seed_user("stranger").await;
    app.seed_post(author.id, "words from a followed author", None)
        .await;
    app.seed_post(stranger.id, "words from a stranger", None).await;
    let token = app.seed_session(reader.id).await;

    let body = body_string(app.get("/follow/", Some(&token)).await).await;
    assert!(!body.contains("words from a followed author"));

    app.get("/author/follow/", Some(&token)).await;

    let body = body_string(app.get("/follow/", Some(&token)).await).await;
    assert!(body.contains("words from a followed author"));
    assert!(!body.contains("words from a stranger"));

    app.get("/author/unfollow/", Some(&token)).await;

    let body = body_string(app.get("/follow/", Some(&token)).await).await;
    assert!(!body.contains("words from a followed author"));
}

#[tokio::test]
async fn non_author_edit_redirects_without_changes() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let intruder = app.seed_user("intruder").await;
    let post = app.seed_post(author.id, "original wording", None).await;
    let token = app.seed_session(intruder.id).await;

    let response = app
        .post_multipart(
            &format!("/author/{}/edit/", post.id),
            &[("text", "defaced wording")],
            None,
            Some(&token),
        )
        .await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), format!("/author/{}/", post.id));

    let state = app.repos.state.lock().await;
    let stored = state.posts.iter().find(|p| p.id == post.id).expect("post");
    assert_eq!(stored.text, "original wording");
}

#[tokio::test]
async fn author_can_edit_own_post() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let post = app.seed_post(author.id, "first draft", None).await;
    let token = app.seed_session(author.id).await;

    let response = app
        .post_multipart(
            &format!("/author/{}/edit/", post.id),
            &[("text", "second draft")],
            None,
            Some(&token),
        )
        .await;
    assert!(response.status().is_redirection());

    let state = app.repos.state.lock().await;
    let stored = state.posts.iter().find(|p| p.id == post.id).expect("post");
    assert_eq!(stored.text, "second draft");
}

#[tokio::test]
async fn corrupt_image_rejects_post_with_fixed_message() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let token = app.seed_session(author.id).await;

    let response = app
        .post_multipart(
            "/new/",
            &[("text", "picture post")],
            Some(("photo.png", b"definitely not an image")),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains(
        "Upload a valid image. The file you uploaded was either not an image or a corrupted image."
    ));

    let state = app.repos.state.lock().await;
    assert!(state.posts.is_empty(), "rejected upload must not create a post");
}

#[tokio::test]
async fn corrupt_image_on_edit_keeps_stored_image() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let post = app.seed_post(author.id, "illustrated entry", None).await;
    {
        let mut state = app.repos.state.lock().await;
        let stored = state.posts.iter_mut().find(|p| p.id == post.id).expect("post");
        stored.image_path = Some("posts/abc12345-original.png".to_string());
    }
    let token = app.seed_session(author.id).await;

    let response = app
        .post_multipart(
            &format!("/author/{}/edit/", post.id),
            &[("text", "illustrated entry")],
            Some(("broken.png", b"definitely not an image")),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains(
        "Upload a valid image. The file you uploaded was either not an image or a corrupted image."
    ));

    let state = app.repos.state.lock().await;
    let stored = state.posts.iter().find(|p| p.id == post.id).expect("post");
    assert_eq!(
        stored.image_path.as_deref(),
        Some("posts/abc12345-original.png"),
        "rejected upload must not replace the stored image"
    );
}

#[tokio::test]
async fn valid_image_is_stored_and_served() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let token = app.seed_session(author.id).await;
    let png = tiny_png();

    let response = app
        .post_multipart(
            "/new/",
            &[("text", "picture post")],
            Some(("photo.png", &png)),
            Some(&token),
        )
        .await;
    assert!(response.status().is_redirection());

    let image_path = {
        let state = app.repos.state.lock().await;
        state.posts[0].image_path.clone().expect("image stored")
    };

    let response = app.get(&format!("/media/{image_path}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("image/png")
    );
}

#[tokio::test]
async fn empty_post_text_redisplays_form() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let token = app.seed_session(author.id).await;

    let response = app
        .post_multipart("/new/", &[("text", "   ")], None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Add some text to the post."));

    let state = app.repos.state.lock().await;
    assert!(state.posts.is_empty());
}

#[tokio::test]
async fn anonymous_authoring_redirects_to_login() {
    let app = TestApp::new();

    let response = app.get("/new/", None).await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), "/auth/login/?next=/new/");

    let response = app.get("/follow/", None).await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), "/auth/login/?next=/follow/");
}

#[tokio::test]
async fn page_parameter_is_clamped() {
    let app = TestApp::new();
    let author = app.seed_user("prolific").await;
    for n in 1..=13 {
        app.seed_post(author.id, &format!("entry number {n}"), None).await;
    }

    let body = body_string(app.get("/?page=abc", None).await).await;
    assert!(body.contains("Page 1 of 2"));
    assert!(body.contains("entry number 13"));

    let body = body_string(app.get("/?page=999", None).await).await;
    assert!(body.contains("Page 2 of 2"));
    assert!(body.contains("entry number 1"));
    assert!(!body.contains("entry number 13"));

    let body = body_string(app.get("/?page=0", None).await).await;
    assert!(body.contains("Page 1 of 2"));
}

#[tokio::test]
async fn empty_feed_renders_single_page() {
    let app = TestApp::new();
    let body = body_string(app.get("/?page=5", None).await).await;
    assert!(body.contains("No posts yet."));
    assert!(!body.contains("Page "));
}

#[tokio::test]
async fn comment_round_trip_and_validation() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    let commenter = app.seed_user("commenter").await;
    let post = app.seed_post(author.id, "worth discussing", None).await;
    let token = app.seed_session(commenter.id).await;

    let response = app
        .post_form(
            &format!("/author/{}/comment/", post.id),
            "text=Great+observation",
            Some(&token),
        )
        .await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), format!("/author/{}/", post.id));

    let body = body_string(app.get(&format!("/author/{}/", post.id), None).await).await;
    assert!(body.contains("Great observation"));
    assert!(body.contains("commenter"));

    let response = app
        .post_form(
            &format!("/author/{}/comment/", post.id),
            "text=++",
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Add some text to the comment."));

    let state = app.repos.state.lock().await;
    assert_eq!(state.comments.len(), 1);
}

#[tokio::test]
async fn post_detail_checks_username_segment() {
    let app = TestApp::new();
    let author = app.seed_user("author").await;
    app.seed_user("other").await;
    let post = app.seed_post(author.id, "addressed precisely", None).await;

    let response = app.get(&format!("/author/{}/", post.id), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get(&format!("/other/{}/", post.id), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/author/not-a-number/", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signup_login_logout_round_trip() {
    let app = TestApp::new();

    let response = app
        .post_form(
            "/auth/signup/",
            "username=neo&password=whiterabbit1",
            None,
        )
        .await;
    assert!(response.status().is_redirection());
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("session cookie set")
        .to_string();
    assert!(cookie.starts_with(SESSION_COOKIE));
    let token = cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split('=').nth(1))
        .expect("token value")
        .to_string();

    let body = body_string(app.get("/", Some(&token)).await).await;
    assert!(body.contains("/neo/"), "nav must link the viewer profile");

    let response = app
        .post_form(
            "/auth/login/",
            "username=neo&password=wrong-password&next=/",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Please enter a correct username and password."));

    let response = app.post_form("/auth/logout/", "", Some(&token)).await;
    assert!(response.status().is_redirection());

    let state = app.repos.state.lock().await;
    assert!(state.sessions.is_empty(), "logout must delete the session row");
}

#[tokio::test]
async fn short_password_is_rejected_at_signup() {
    let app = TestApp::new();
    let response = app
        .post_form("/auth/signup/", "username=shorty&password=tiny", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let state = app.repos.state.lock().await;
    assert!(state.users.is_empty());
}

#[tokio::test]
async fn duplicate_username_is_rejected_at_signup() {
    let app = TestApp::new();
    app.seed_user("taken").await;

    let response = app
        .post_form("/auth/signup/", "username=taken&password=whiterabbit1", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("A user with that username already exists."));
}

#[tokio::test]
async fn expired_session_is_anonymous() {
    let app = TestApp::new();
    let user = app.seed_user("sleeper").await;
    let now = OffsetDateTime::now_utc();
    let sessions: &dyn SessionsRepo = app.repos.as_ref();
    sessions
        .insert_session(SessionRecord {
            token: "stale".to_string(),
            user_id: user.id,
            created_at: now - Duration::hours(48),
            expires_at: now - Duration::hours(24),
        })
        .await
        .expect("seed session");

    let response = app.get("/new/", Some("stale")).await;
    assert!(response.status().is_redirection());
    assert_eq!(location_of(&response), "/auth/login/?next=/new/");
}

#[tokio::test]
async fn unknown_routes_render_not_found() {
    let app = TestApp::new();
    let response = app.get("/nobody-here/", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_string(response).await;
    assert!(body.contains("Page Not Found"));
}

#[tokio::test]
async fn media_path_traversal_is_not_found() {
    let app = TestApp::new();
    let response = app.get("/media/..%2F..%2Fetc%2Fpasswd", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
