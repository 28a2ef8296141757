#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use atrium::application::catalog::CatalogService;
use atrium::application::loaders::{LoaderRepos, SnapshotLoader, SnapshotTtls};
use atrium::application::repos::{
    CoursesRepo, CreateReviewParams, EnrollOutcome, EnrollmentsRepo, RecordViewOutcome,
    RepoError, ReviewsRepo, UpdateCourseParams, UsersRepo,
};
use atrium::cache::{
    CacheClient, CacheConfig, CacheStore, Invalidator, MemoryStore, Pipeline, StoreError,
};
use atrium::domain::entities::{
    AvatarRecord, CourseCounters, CourseRecord, EnrollmentRecord, GoalRecord, ReviewRecord,
    SessionRecord, UserRecord,
};
use atrium::domain::types::{CourseStatus, EnrollmentStatus};
use atrium::infra::http::{AppState, DatabaseProbe};

#[derive(Default)]
struct Tables {
    users: Vec<UserRecord>,
    avatars: Vec<AvatarRecord>,
    goals: Vec<GoalRecord>,
    sessions: Vec<SessionRecord>,
    courses: Vec<CourseRecord>,
    enrollments: Vec<EnrollmentRecord>,
    reviews: Vec<ReviewRecord>,
    views: BTreeSet<(Uuid, Uuid)>,
}

/// Repository fake backed by plain vectors.
#[derive(Default)]
pub struct InMemoryRepos {
    tables: Mutex<Tables>,
    reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryRepos {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let tables = self.tables.lock().expect("tables lock");
        Ok(f(&*tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, RepoError>) -> Result<T, RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let mut tables = self.tables.lock().expect("tables lock");
        f(&mut *tables)
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.tables.lock().unwrap().users.push(user);
    }

    pub fn insert_avatar(&self, avatar: AvatarRecord) {
        self.tables.lock().unwrap().avatars.push(avatar);
    }

    pub fn insert_goal(&self, goal: GoalRecord) {
        self.tables.lock().unwrap().goals.push(goal);
    }

    pub fn insert_session(&self, session: SessionRecord) {
        self.tables.lock().unwrap().sessions.push(session);
    }

    pub fn insert_course(&self, course: CourseRecord) {
        self.tables.lock().unwrap().courses.push(course);
    }

    pub fn insert_enrollment(&self, enrollment: EnrollmentRecord) {
        self.tables.lock().unwrap().enrollments.push(enrollment);
    }

    pub fn insert_review(&self, review: ReviewRecord) {
        self.tables.lock().unwrap().reviews.push(review);
    }

    /// Change a course title behind the services' back.
    pub fn rename_course(&self, course_id: Uuid, title: &str) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(course) = tables.courses.iter_mut().find(|c| c.id == course_id) {
            course.title = title.to_string();
        }
    }
}

#[async_trait]
impl UsersRepo for InMemoryRepos {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        self.read(|t| t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, RepoError> {
        self.read(|t| {
            t.users
                .iter()
                .filter(|u| ids.contains(&u.id))
                .cloned()
                .collect()
        })
    }

    async fn list_avatars_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<AvatarRecord>, RepoError> {
        self.read(|t| {
            t.avatars
                .iter()
                .filter(|a| user_ids.contains(&a.user_id))
                .cloned()
                .collect()
        })
    }

    async fn list_goals(&self, user_id: Uuid) -> Result<Vec<GoalRecord>, RepoError> {
        self.read(|t| {
            t.goals
                .iter()
                .filter(|g| g.user_id == user_id)
                .cloned()
                .collect()
        })
    }

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionRecord>, RepoError> {
        self.read(|t| {
            t.sessions
                .iter()
                .filter(|s| s.user_id == user_id && s.expires_at > now)
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl CoursesRepo for InMemoryRepos {
    async fn list_published_courses(&self) -> Result<Vec<CourseRecord>, RepoError> {
        self.read(|t| {
            let mut courses: Vec<CourseRecord> = t
                .courses
                .iter()
                .filter(|c| c.status == CourseStatus::Published)
                .cloned()
                .collect();
            courses.sort_by(|a, b| {
                b.published_at
                    .unwrap_or(b.created_at)
                    .cmp(&a.published_at.unwrap_or(a.created_at))
                    .then(a.id.cmp(&b.id))
            });
            courses
        })
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<CourseRecord>, RepoError> {
        self.read(|t| t.courses.iter().find(|c| c.id == id).cloned())
    }

    async fn update_course(&self, params: UpdateCourseParams) -> Result<CourseRecord, RepoError> {
        self.write(|t| {
            let course = t
                .courses
                .iter_mut()
                .find(|c| c.id == params.id)
                .ok_or(RepoError::NotFound)?;
            if let Some(title) = params.title {
                course.title = title.trim().to_string();
            }
            if let Some(summary) = params.summary {
                course.summary = summary;
            }
            if let Some(price) = params.price_cents {
                course.price_cents = price;
            }
            if let Some(status) = params.status {
                if status == CourseStatus::Published && course.published_at.is_none() {
                    course.published_at = Some(OffsetDateTime::now_utc());
                }
                course.status = status;
            }
            course.updated_at = OffsetDateTime::now_utc();
            Ok(course.clone())
        })
    }

    async fn course_counters(&self, course_id: Uuid) -> Result<CourseCounters, RepoError> {
        self.read(|t| {
            let course = t.courses.iter().find(|c| c.id == course_id)?;
            let ratings: Vec<i16> = t
                .reviews
                .iter()
                .filter(|r| r.course_id == course_id)
                .map(|r| r.rating)
                .collect();
            let average_rating = (!ratings.is_empty()).then(|| {
                ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / ratings.len() as f64
            });
            Some(CourseCounters {
                course_id,
                enrollment_count: t
                    .enrollments
                    .iter()
                    .filter(|e| e.course_id == course_id && e.status.grants_access())
                    .count() as u64,
                review_count: ratings.len() as u64,
                average_rating,
                view_count: course.view_count as u64,
            })
        })?
        .ok_or(RepoError::NotFound)
    }

    async fn record_view(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<RecordViewOutcome, RepoError> {
        self.write(|t| {
            let first_view = t.views.insert((user_id, course_id));
            let course = t
                .courses
                .iter_mut()
                .find(|c| c.id == course_id)
                .ok_or(RepoError::NotFound)?;
            if first_view {
                course.view_count += 1;
            }
            Ok(RecordViewOutcome {
                first_view,
                view_count: course.view_count,
            })
        })
    }
}

#[async_trait]
impl EnrollmentsRepo for InMemoryRepos {
    async fn count_by_courses(&self, course_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>, RepoError> {
        self.read(|t| {
            let mut counts = HashMap::new();
            for enrollment in &t.enrollments {
                if course_ids.contains(&enrollment.course_id) && enrollment.status.grants_access()
                {
                    *counts.entry(enrollment.course_id).or_insert(0) += 1;
                }
            }
            counts
        })
    }

    async fn list_for_user_in_courses(
        &self,
        user_id: Uuid,
        course_ids: &[Uuid],
    ) -> Result<Vec<EnrollmentRecord>, RepoError> {
        self.read(|t| {
            t.enrollments
                .iter()
                .filter(|e| e.user_id == user_id && course_ids.contains(&e.course_id))
                .cloned()
                .collect()
        })
    }

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, RepoError> {
        self.read(|t| {
            t.enrollments
                .iter()
                .find(|e| e.user_id == user_id && e.course_id == course_id)
                .cloned()
        })
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<EnrollmentRecord>, RepoError> {
        self.read(|t| {
            let mut enrollments: Vec<EnrollmentRecord> = t
                .enrollments
                .iter()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect();
            enrollments.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at).then(a.id.cmp(&b.id)));
            enrollments
        })
    }

    async fn count_for_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        self.read(|t| {
            t.enrollments
                .iter()
                .filter(|e| e.user_id == user_id && e.status.grants_access())
                .count() as u64
        })
    }

    async fn enroll(&self, user_id: Uuid, course_id: Uuid) -> Result<EnrollOutcome, RepoError> {
        self.write(|t| {
            if let Some(existing) = t
                .enrollments
                .iter()
                .find(|e| e.user_id == user_id && e.course_id == course_id)
            {
                return Ok(EnrollOutcome {
                    enrollment: existing.clone(),
                    created: false,
                });
            }
            let enrollment = EnrollmentRecord {
                id: Uuid::new_v4(),
                user_id,
                course_id,
                status: EnrollmentStatus::Active,
                progress_percent: 0,
                enrolled_at: OffsetDateTime::now_utc(),
            };
            t.enrollments.push(enrollment.clone());
            Ok(EnrollOutcome {
                enrollment,
                created: true,
            })
        })
    }
}

#[async_trait]
impl ReviewsRepo for InMemoryRepos {
    async fn list_for_course(
        &self,
        course_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ReviewRecord>, RepoError> {
        self.read(|t| {
            let mut reviews: Vec<ReviewRecord> = t
                .reviews
                .iter()
                .filter(|r| r.course_id == course_id)
                .cloned()
                .collect();
            reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
            reviews.truncate(limit as usize);
            reviews
        })
    }

    async fn create_review(&self, params: CreateReviewParams) -> Result<ReviewRecord, RepoError> {
        self.write(|t| {
            let review = ReviewRecord {
                id: Uuid::new_v4(),
                course_id: params.course_id,
                author_id: params.author_id,
                rating: params.rating,
                body: params.body,
                created_at: OffsetDateTime::now_utc(),
            };
            t.reviews.push(review.clone());
            Ok(review)
        })
    }
}

#[async_trait]
impl DatabaseProbe for InMemoryRepos {
    async fn probe(&self) -> Result<(), RepoError> {
        self.read(|_| ())
    }
}

/// Store whose every operation fails, standing in for an unreachable Redis.
#[derive(Default)]
pub struct FailingStore {
    pub calls: AtomicUsize,
}

impl FailingStore {
    fn fail(&self, command: &'static str) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::Command {
            command,
            message: "connection refused".into(),
        }
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(self.fail("GET"))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        Err(self.fail("SET"))
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(self.fail("DEL"))
    }

    async fn ttl(&self, _key: &str) -> Result<Option<u64>, StoreError> {
        Err(self.fail("TTL"))
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(self.fail("EXISTS"))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Err(self.fail("SCAN"))
    }

    async fn exec_pipeline(&self, _pipeline: Pipeline) -> Result<(), StoreError> {
        Err(self.fail("MULTI"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(self.fail("PING"))
    }
}

/// Store that never answers; only the client's operation timeout ends a call.
#[derive(Default)]
pub struct HangingStore;

impl HangingStore {
    async fn hang<T>(&self) -> Result<T, StoreError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Err(StoreError::Unavailable("hung".into()))
    }
}

#[async_trait]
impl CacheStore for HangingStore {
    fn backend(&self) -> &'static str {
        "hanging"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        self.hang().await
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        self.hang().await
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        self.hang().await
    }

    async fn ttl(&self, _key: &str) -> Result<Option<u64>, StoreError> {
        self.hang().await
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        self.hang().await
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        self.hang().await
    }

    async fn exec_pipeline(&self, _pipeline: Pipeline) -> Result<(), StoreError> {
        self.hang().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.hang().await
    }
}

/// Ids of the seeded rows.
#[derive(Debug, Clone, Copy)]
pub struct Seed {
    pub instructor: Uuid,
    pub student: Uuid,
    pub stranger: Uuid,
    pub course_a: Uuid,
    pub course_b: Uuid,
    pub draft: Uuid,
}

pub fn ts(offset_minutes: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_760_000_000).expect("valid timestamp")
        + time::Duration::minutes(offset_minutes)
}

pub fn user(id: Uuid, username: &str, avatar_id: Option<Uuid>) -> UserRecord {
    UserRecord {
        id,
        username: username.to_string(),
        display_name: username.to_uppercase(),
        email: format!("{username}@example.test"),
        xp: 120,
        level: 3,
        avatar_id,
        created_at: ts(0),
        updated_at: ts(0),
    }
}

pub fn course(
    id: Uuid,
    instructor_id: Uuid,
    title: &str,
    status: CourseStatus,
    published_minute: Option<i64>,
) -> CourseRecord {
    CourseRecord {
        id,
        slug: title.to_lowercase().replace(' ', "-"),
        title: title.to_string(),
        summary: format!("About {title}"),
        instructor_id,
        price_cents: 4_900,
        currency: "EUR".into(),
        status,
        view_count: 0,
        published_at: published_minute.map(ts),
        created_at: ts(0),
        updated_at: ts(0),
    }
}

pub fn enrollment(user_id: Uuid, course_id: Uuid, status: EnrollmentStatus) -> EnrollmentRecord {
    EnrollmentRecord {
        id: Uuid::new_v4(),
        user_id,
        course_id,
        status,
        progress_percent: 40,
        enrolled_at: ts(30),
    }
}

/// One instructor with an avatar, a student with goals and a session, two
/// published courses, one draft, one review and one enrollment.
pub fn seeded_repos() -> (Arc<InMemoryRepos>, Seed) {
    let repos = Arc::new(InMemoryRepos::default());
    let seed = Seed {
        instructor: Uuid::from_u128(0x10),
        student: Uuid::from_u128(0x20),
        stranger: Uuid::from_u128(0x30),
        course_a: Uuid::from_u128(0xa0),
        course_b: Uuid::from_u128(0xb0),
        draft: Uuid::from_u128(0xd0),
    };
    let avatar_id = Uuid::from_u128(0x11);

    repos.insert_user(user(seed.instructor, "ines", Some(avatar_id)));
    repos.insert_avatar(AvatarRecord {
        id: avatar_id,
        user_id: seed.instructor,
        url: "https://cdn.example.test/ines.png".into(),
        updated_at: ts(0),
    });
    repos.insert_user(user(seed.student, "sam", None));
    repos.insert_user(user(seed.stranger, "tess", None));
    repos.insert_goal(GoalRecord {
        id: Uuid::from_u128(0x21),
        user_id: seed.student,
        title: "Finish Rust course".into(),
        progress: 2,
        target: 10,
        completed: false,
        created_at: ts(5),
    });
    repos.insert_session(SessionRecord {
        id: Uuid::from_u128(0x22),
        user_id: seed.student,
        device: "laptop".into(),
        two_factor_verified: true,
        last_seen_at: OffsetDateTime::now_utc(),
        expires_at: OffsetDateTime::now_utc() + time::Duration::days(1),
    });

    repos.insert_course(course(
        seed.course_a,
        seed.instructor,
        "Async Rust",
        CourseStatus::Published,
        Some(60),
    ));
    repos.insert_course(course(
        seed.course_b,
        seed.instructor,
        "Cache Design",
        CourseStatus::Published,
        Some(120),
    ));
    repos.insert_course(course(
        seed.draft,
        seed.instructor,
        "Unreleased",
        CourseStatus::Draft,
        None,
    ));

    repos.insert_enrollment(enrollment(
        seed.student,
        seed.course_a,
        EnrollmentStatus::Active,
    ));
    repos.insert_review(ReviewRecord {
        id: Uuid::from_u128(0x41),
        course_id: seed.course_a,
        author_id: seed.student,
        rating: 4,
        body: "Clear and practical".into(),
        created_at: ts(90),
    });

    (repos, seed)
}

/// Fully wired services over the given store.
pub struct Harness {
    pub repos: Arc<InMemoryRepos>,
    pub seed: Seed,
    pub config: CacheConfig,
    pub store: Arc<dyn CacheStore>,
    pub cache: Arc<CacheClient>,
    pub loader: SnapshotLoader,
    pub invalidator: Invalidator,
    pub catalog: Arc<CatalogService>,
}

impl Harness {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn memory() -> Self {
        let config = CacheConfig::default();
        Self::with_config(Arc::new(MemoryStore::new(&config)), config)
    }

    pub fn with_config(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        let (repos, seed) = seeded_repos();
        let cache = Arc::new(CacheClient::new(store.clone(), &config));
        let loader = SnapshotLoader::new(
            LoaderRepos {
                users: repos.clone(),
                courses: repos.clone(),
                enrollments: repos.clone(),
                reviews: repos.clone(),
            },
            cache.clone(),
            SnapshotTtls::from(&config),
        );
        let invalidator = Invalidator::new(cache.clone());
        let catalog = Arc::new(CatalogService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            invalidator.clone(),
        ));

        Self {
            repos,
            seed,
            config,
            store,
            cache,
            loader,
            invalidator,
            catalog,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            loader: Arc::new(self.loader.clone()),
            catalog: self.catalog.clone(),
            invalidator: self.invalidator.clone(),
            cache: self.cache.clone(),
            db: self.repos.clone(),
        }
    }
}
