//! Invalidation requests and the broadcast wire message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of resource whose mutation triggers invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Course,
    Enrollment,
    Review,
    User,
    Avatar,
    Goal,
    Session,
    /// A counted course view; only the stats snapshot changes.
    CourseView,
}

impl ResourceType {
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Course,
        ResourceType::Enrollment,
        ResourceType::Review,
        ResourceType::User,
        ResourceType::Avatar,
        ResourceType::Goal,
        ResourceType::Session,
        ResourceType::CourseView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Course => "course",
            ResourceType::Enrollment => "enrollment",
            ResourceType::Review => "review",
            ResourceType::User => "user",
            ResourceType::Avatar => "avatar",
            ResourceType::Goal => "goal",
            ResourceType::Session => "session",
            ResourceType::CourseView => "course_view",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource type `{s}`"))
    }
}

/// Which audience variants an invalidation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Only the shared anonymous snapshots.
    Anonymous,
    #[default]
    All,
}

impl InvalidationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationScope::Anonymous => "anonymous",
            InvalidationScope::All => "all",
        }
    }
}

impl FromStr for InvalidationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anonymous" => Ok(InvalidationScope::Anonymous),
            "all" => Ok(InvalidationScope::All),
            other => Err(format!("unknown invalidation scope `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Raised by a mutation on this instance; broadcast to peers.
    #[default]
    Local,
    /// Received from a peer; never re-broadcast.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationRequest {
    pub resource_type: ResourceType,
    pub resource_id: Option<Uuid>,
    pub scope: InvalidationScope,
    /// Acting user whose personalised snapshots must be evicted.
    pub user_id: Option<Uuid>,
    pub origin: Origin,
}

impl InvalidationRequest {
    pub fn new(resource_type: ResourceType, resource_id: Option<Uuid>) -> Self {
        Self {
            resource_type,
            resource_id,
            scope: InvalidationScope::All,
            user_id: None,
            origin: Origin::Local,
        }
    }

    pub fn course(course_id: Uuid) -> Self {
        Self::new(ResourceType::Course, Some(course_id))
    }

    pub fn all_courses() -> Self {
        Self::new(ResourceType::Course, None)
    }

    pub fn enrollment(course_id: Uuid, user_id: Uuid) -> Self {
        Self::new(ResourceType::Enrollment, Some(course_id)).with_user(user_id)
    }

    pub fn review(course_id: Uuid, author_id: Uuid) -> Self {
        Self::new(ResourceType::Review, Some(course_id)).with_user(author_id)
    }

    pub fn course_view(course_id: Uuid) -> Self {
        Self::new(ResourceType::CourseView, Some(course_id))
    }

    pub fn user(user_id: Uuid) -> Self {
        Self::new(ResourceType::User, Some(user_id))
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_scope(mut self, scope: InvalidationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn remote(mut self) -> Self {
        self.origin = Origin::Remote;
        self
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

/// Payload posted to peer instances.
///
/// `{ "type": "course", "resourceId": "...", "data": { "scope": "all", "userId": null, "instance": "..." } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub resource_id: Option<Uuid>,
    #[serde(default)]
    pub data: BroadcastData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastData {
    #[serde(default)]
    pub scope: InvalidationScope,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Sender instance id, used to drop echoes of our own messages.
    #[serde(default)]
    pub instance: Option<String>,
}

impl BroadcastMessage {
    pub fn from_request(request: &InvalidationRequest, instance: &str) -> Self {
        Self {
            resource_type: request.resource_type,
            resource_id: request.resource_id,
            data: BroadcastData {
                scope: request.scope,
                user_id: request.user_id,
                instance: Some(instance.to_string()),
            },
        }
    }

    /// Request to apply locally; always marked remote.
    pub fn into_request(self) -> InvalidationRequest {
        InvalidationRequest {
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            scope: self.data.scope,
            user_id: self.data.user_id,
            origin: Origin::Remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_parses_its_own_name() {
        for kind in ResourceType::ALL {
            assert_eq!(kind.as_str().parse::<ResourceType>(), Ok(kind));
        }
        assert!("post".parse::<ResourceType>().is_err());
    }

    #[test]
    fn broadcast_message_wire_shape() {
        let course = Uuid::from_u128(9);
        let request = InvalidationRequest::course(course);
        let message = BroadcastMessage::from_request(&request, "node-a");
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "course");
        assert_eq!(json["resourceId"], course.to_string());
        assert_eq!(json["data"]["scope"], "all");
        assert_eq!(json["data"]["instance"], "node-a");
    }

    #[test]
    fn received_message_is_remote() {
        let raw = r#"{"type":"enrollment","resourceId":"00000000-0000-0000-0000-000000000001"}"#;
        let message: BroadcastMessage = serde_json::from_str(raw).unwrap();
        let request = message.into_request();

        assert_eq!(request.resource_type, ResourceType::Enrollment);
        assert_eq!(request.origin, Origin::Remote);
        assert_eq!(request.scope, InvalidationScope::All);
        assert!(request.user_id.is_none());
    }
}
