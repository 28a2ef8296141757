//! Cache key namespace.
//!
//! Pure mapping from logical resources to store keys. Every key starts with a
//! fixed namespace segment and ends with the most specific component, so a
//! trailing `*` always selects every variant of a resource
//! (`courses:detail:<id>:*` covers all audiences of one course).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const COURSE_LIST_NS: &str = "courses:public:list";
const COURSE_DETAIL_NS: &str = "courses:detail";
const COURSE_STATS_NS: &str = "course:stats";
const USER_ENROLLMENTS_NS: &str = "user:enrollments";
const NAVBAR_NS: &str = "navbar";
const ANONYMOUS: &str = "anonymous";

/// Who a cached view is built for.
///
/// Authenticated views are always keyed by the user id so a cache entry is
/// never shared between users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "userId")]
pub enum Audience {
    Anonymous,
    User(Uuid),
}

impl Audience {
    pub fn from_user(user_id: Option<Uuid>) -> Self {
        match user_id {
            Some(id) => Audience::User(id),
            None => Audience::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Audience::Anonymous)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Audience::Anonymous => None,
            Audience::User(id) => Some(*id),
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Anonymous => f.write_str(ANONYMOUS),
            Audience::User(id) => write!(f, "{}", id.hyphenated()),
        }
    }
}

/// A single cache entry address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    CourseList { audience: Audience },
    CourseDetail { course_id: Uuid, audience: Audience },
    CourseStats { course_id: Uuid },
    UserEnrollments { user_id: Uuid },
    Navbar { user_id: Uuid },
}

impl CacheKey {
    pub fn course_list(audience: Audience) -> Self {
        CacheKey::CourseList { audience }
    }

    pub fn course_detail(course_id: Uuid, audience: Audience) -> Self {
        CacheKey::CourseDetail {
            course_id,
            audience,
        }
    }

    pub fn course_stats(course_id: Uuid) -> Self {
        CacheKey::CourseStats { course_id }
    }

    pub fn user_enrollments(user_id: Uuid) -> Self {
        CacheKey::UserEnrollments { user_id }
    }

    pub fn navbar(user_id: Uuid) -> Self {
        CacheKey::Navbar { user_id }
    }

    /// Render the store key.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Low-cardinality label used for metrics.
    pub fn view(&self) -> &'static str {
        match self {
            CacheKey::CourseList { .. } => "course_list",
            CacheKey::CourseDetail { .. } => "course_detail",
            CacheKey::CourseStats { .. } => "course_stats",
            CacheKey::UserEnrollments { .. } => "user_enrollments",
            CacheKey::Navbar { .. } => "navbar",
        }
    }

    /// True when the snapshot under this key is identical for every visitor.
    pub fn is_shared(&self) -> bool {
        match self {
            CacheKey::CourseList { audience } | CacheKey::CourseDetail { audience, .. } => {
                audience.is_anonymous()
            }
            CacheKey::CourseStats { .. } => true,
            CacheKey::UserEnrollments { .. } | CacheKey::Navbar { .. } => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::CourseList { audience } => write!(f, "{COURSE_LIST_NS}:{audience}"),
            CacheKey::CourseDetail {
                course_id,
                audience,
            } => write!(
                f,
                "{COURSE_DETAIL_NS}:{}:{audience}",
                course_id.hyphenated()
            ),
            CacheKey::CourseStats { course_id } => {
                write!(f, "{COURSE_STATS_NS}:{}", course_id.hyphenated())
            }
            CacheKey::UserEnrollments { user_id } => {
                write!(f, "{USER_ENROLLMENTS_NS}:{}", user_id.hyphenated())
            }
            CacheKey::Navbar { user_id } => write!(f, "{NAVBAR_NS}:{}", user_id.hyphenated()),
        }
    }
}

/// Wildcard selections over the key namespace, used for batch deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPattern {
    /// Every audience variant of one course detail.
    CourseDetailAllAudiences(Uuid),
    /// Every course detail.
    AllCourseDetails,
    /// The anonymous variant of every course detail.
    AnonymousCourseDetails,
    /// Every audience variant of the course list.
    AllCourseLists,
    /// Stats of every course.
    AllCourseStats,
}

impl KeyPattern {
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::CourseDetailAllAudiences(id) => {
                write!(f, "{COURSE_DETAIL_NS}:{}:*", id.hyphenated())
            }
            KeyPattern::AllCourseDetails => write!(f, "{COURSE_DETAIL_NS}:*"),
            KeyPattern::AnonymousCourseDetails => write!(f, "{COURSE_DETAIL_NS}:*:{ANONYMOUS}"),
            KeyPattern::AllCourseLists => write!(f, "{COURSE_LIST_NS}:*"),
            KeyPattern::AllCourseStats => write!(f, "{COURSE_STATS_NS}:*"),
        }
    }
}
