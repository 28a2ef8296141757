//! Invalidation planning.
//!
//! Maps one mutation to the closed set of keys and patterns whose snapshots may
//! embed the mutated data. The sets deliberately over-select: an extra miss is
//! cheap, a stale snapshot is a bug.

use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

use super::events::{InvalidationRequest, InvalidationScope, ResourceType};
use super::keys::{Audience, CacheKey, KeyPattern};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Exact keys, deleted in one batch.
    pub keys: BTreeSet<String>,
    /// Wildcard selections, each enumerated then deleted.
    pub patterns: BTreeSet<KeyPattern>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ keys: {}, patterns: {} }}",
            self.keys.len(),
            self.patterns.len()
        )
    }
}

impl InvalidationPlan {
    pub fn for_request(request: &InvalidationRequest) -> Self {
        let mut plan = Self::default();
        let scope = request.scope;

        match (request.resource_type, request.resource_id) {
            (ResourceType::Course, Some(course_id)) => {
                plan.course_detail(course_id, scope);
                plan.key(CacheKey::course_stats(course_id));
                plan.course_lists(scope);
            }
            (ResourceType::Enrollment, Some(course_id)) => {
                plan.key(CacheKey::course_stats(course_id));
                plan.course_detail(course_id, scope);
                plan.course_lists(scope);
            }
            (ResourceType::Review, Some(course_id)) => {
                plan.course_detail(course_id, scope);
                plan.key(CacheKey::course_stats(course_id));
            }
            (ResourceType::CourseView, Some(course_id)) => {
                // Detail and list snapshots embed the view counter too.
                plan.key(CacheKey::course_stats(course_id));
                plan.course_detail(course_id, scope);
                plan.course_lists(scope);
            }
            (
                ResourceType::Course
                | ResourceType::Enrollment
                | ResourceType::Review
                | ResourceType::CourseView,
                None,
            ) => {
                plan.every_course_detail(scope);
                plan.pattern(KeyPattern::AllCourseStats);
                plan.course_lists(scope);
            }
            (ResourceType::User | ResourceType::Avatar, subject) => {
                if let Some(user_id) = subject.or(request.user_id) {
                    plan.personal(user_id);
                }
                // Users appear as instructors and reviewers inside shared views.
                plan.every_course_detail(scope);
                plan.course_lists(scope);
            }
            (ResourceType::Goal | ResourceType::Session, subject) => {
                if let Some(user_id) = subject.or(request.user_id) {
                    plan.key(CacheKey::navbar(user_id));
                }
            }
        }

        if let Some(user_id) = request.user_id {
            plan.personal(user_id);
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }

    /// Rendered keys in deletion order.
    pub fn key_list(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }

    fn key(&mut self, key: CacheKey) {
        self.keys.insert(key.render());
    }

    fn pattern(&mut self, pattern: KeyPattern) {
        self.patterns.insert(pattern);
    }

    fn course_detail(&mut self, course_id: Uuid, scope: InvalidationScope) {
        match scope {
            InvalidationScope::All => self.pattern(KeyPattern::CourseDetailAllAudiences(course_id)),
            InvalidationScope::Anonymous => {
                self.key(CacheKey::course_detail(course_id, Audience::Anonymous))
            }
        }
    }

    fn every_course_detail(&mut self, scope: InvalidationScope) {
        match scope {
            InvalidationScope::All => self.pattern(KeyPattern::AllCourseDetails),
            InvalidationScope::Anonymous => self.pattern(KeyPattern::AnonymousCourseDetails),
        }
    }

    fn course_lists(&mut self, scope: InvalidationScope) {
        match scope {
            InvalidationScope::All => self.pattern(KeyPattern::AllCourseLists),
            InvalidationScope::Anonymous => self.key(CacheKey::course_list(Audience::Anonymous)),
        }
    }

    /// Every snapshot personalised for one user.
    fn personal(&mut self, user_id: Uuid) {
        self.key(CacheKey::course_list(Audience::User(user_id)));
        self.key(CacheKey::navbar(user_id));
        self.key(CacheKey::user_enrollments(user_id));
    }
}
