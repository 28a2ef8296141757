//! Typed per-view aggregates produced by the loaders.
//!
//! Every id-to-entity mapping is a `BTreeMap<Uuid, _>`, serialized as a JSON
//! object keyed by the hyphenated id. Each snapshot records when it was
//! assembled so clients can tell how old a cached copy is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    AvatarRecord, CourseCounters, CourseRecord, EnrollmentRecord, GoalRecord, ReviewRecord,
    SessionRecord, UserRecord,
};
use crate::domain::error::DomainError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavbarSnapshot {
    pub user: Option<UserRecord>,
    pub avatar: Option<AvatarRecord>,
    pub goals: Vec<GoalRecord>,
    pub sessions: Vec<SessionRecord>,
    pub enrollment_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl NavbarSnapshot {
    /// Snapshot for a visitor without a resolvable account.
    pub fn reduced(timestamp: OffsetDateTime) -> Self {
        Self {
            user: None,
            avatar: None,
            goals: Vec::new(),
            sessions: Vec::new(),
            enrollment_count: 0,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseListSnapshot {
    pub courses: Vec<CourseRecord>,
    /// Instructors of the listed courses.
    pub users: BTreeMap<Uuid, UserRecord>,
    /// Avatars keyed by owning user id.
    pub avatars: BTreeMap<Uuid, AvatarRecord>,
    /// Requesting user's enrollments keyed by course id.
    pub enrollments: BTreeMap<Uuid, EnrollmentRecord>,
    pub enrollment_counts: BTreeMap<Uuid, u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CourseListSnapshot {
    /// Every id referenced by the snapshot must resolve inside it.
    pub fn check_references(&self) -> Result<(), DomainError> {
        let listed: std::collections::BTreeSet<Uuid> =
            self.courses.iter().map(|course| course.id).collect();

        for course in &self.courses {
            let Some(instructor) = self.users.get(&course.instructor_id) else {
                return Err(DomainError::invariant(format!(
                    "course {} references missing instructor {}",
                    course.id, course.instructor_id
                )));
            };
            check_avatar(instructor, self.avatars.get(&instructor.id))?;
        }

        if let Some(course_id) = self
            .enrollments
            .keys()
            .chain(self.enrollment_counts.keys())
            .find(|id| !listed.contains(id))
        {
            return Err(DomainError::invariant(format!(
                "enrollment data references unlisted course {course_id}"
            )));
        }

        Ok(())
    }

    pub fn course_ids(&self) -> Vec<Uuid> {
        self.courses.iter().map(|course| course.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub course_id: Uuid,
    pub enrollment_count: u64,
    pub review_count: u64,
    pub average_rating: Option<f64>,
    pub view_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CourseStats {
    pub fn from_counters(counters: CourseCounters, timestamp: OffsetDateTime) -> Self {
        Self {
            course_id: counters.course_id,
            enrollment_count: counters.enrollment_count,
            review_count: counters.review_count,
            average_rating: counters.average_rating,
            view_count: counters.view_count,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetailSnapshot {
    pub course: CourseRecord,
    pub instructor: UserRecord,
    pub instructor_avatar: Option<AvatarRecord>,
    pub reviews: Vec<ReviewRecord>,
    pub reviewers: BTreeMap<Uuid, UserRecord>,
    pub stats: CourseStats,
    /// Requesting user's enrollment in this course.
    pub enrollment: Option<EnrollmentRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CourseDetailSnapshot {
    pub fn check_references(&self) -> Result<(), DomainError> {
        if self.instructor.id != self.course.instructor_id {
            return Err(DomainError::invariant(format!(
                "course {} carries instructor {} instead of {}",
                self.course.id, self.instructor.id, self.course.instructor_id
            )));
        }
        check_avatar(&self.instructor, self.instructor_avatar.as_ref())?;

        if let Some(review) = self
            .reviews
            .iter()
            .find(|review| !self.reviewers.contains_key(&review.author_id))
        {
            return Err(DomainError::invariant(format!(
                "review {} references missing author {}",
                review.id, review.author_id
            )));
        }

        if self.stats.course_id != self.course.id
            || self
                .enrollment
                .as_ref()
                .is_some_and(|enrollment| enrollment.course_id != self.course.id)
        {
            return Err(DomainError::invariant(format!(
                "detail of course {} embeds data of another course",
                self.course.id
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEnrollmentsSnapshot {
    pub user_id: Uuid,
    pub enrollments: Vec<EnrollmentRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSnapshot {
    pub user: UserRecord,
    pub course: CourseRecord,
    pub instructor: UserRecord,
    pub existing_enrollment: Option<EnrollmentRecord>,
    pub already_enrolled: bool,
    pub price_cents: i64,
    pub currency: String,
    pub two_factor_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Any loader result, tagged by view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Snapshot {
    Navbar(NavbarSnapshot),
    CourseList(CourseListSnapshot),
    CourseDetail(CourseDetailSnapshot),
    CourseStats(CourseStats),
    UserEnrollments(UserEnrollmentsSnapshot),
    Checkout(CheckoutSnapshot),
}

impl Snapshot {
    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Snapshot::Navbar(s) => s.timestamp,
            Snapshot::CourseList(s) => s.timestamp,
            Snapshot::CourseDetail(s) => s.timestamp,
            Snapshot::CourseStats(s) => s.timestamp,
            Snapshot::UserEnrollments(s) => s.timestamp,
            Snapshot::Checkout(s) => s.timestamp,
        }
    }
}

fn check_avatar(user: &UserRecord, avatar: Option<&AvatarRecord>) -> Result<(), DomainError> {
    match (user.avatar_id, avatar) {
        (None, _) => Ok(()),
        (Some(expected), Some(avatar)) if avatar.id == expected => Ok(()),
        (Some(expected), _) => Err(DomainError::invariant(format!(
            "user {} references missing avatar {expected}",
            user.id
        ))),
    }
}
