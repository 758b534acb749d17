use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{Cacheable, SnapshotStore};

use super::fields::{FieldMapping, RawRecord, RawView};
use super::registry::{CacheRegistry, EntityCache, SnapshotStores};

/// Entity types with their own cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
  Projects,
  Users,
  Iterations,
  UserStories,
  Defects,
}

impl EntityType {
  pub const ALL: [EntityType; 5] = [
    EntityType::Projects,
    EntityType::Users,
    EntityType::Iterations,
    EntityType::UserStories,
    EntityType::Defects,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Projects => "projects",
      Self::Users => "users",
      Self::Iterations => "iterations",
      Self::UserStories => "userStories",
      Self::Defects => "defects",
    }
  }

  /// WSAPI type path segment.
  pub fn api_type(&self) -> &'static str {
    match self {
      Self::Projects => "project",
      Self::Users => "user",
      Self::Iterations => "iteration",
      Self::UserStories => "hierarchicalrequirement",
      Self::Defects => "defect",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityType {
  type Err = String;

  /// Accepts singular/plural, camelCase, kebab-case and the WSAPI type name.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized: String = s
      .chars()
      .filter(|c| *c != '-' && *c != '_')
      .collect::<String>()
      .to_lowercase();

    match normalized.trim_end_matches('s') {
      "project" => Ok(Self::Projects),
      "user" => Ok(Self::Users),
      "iteration" => Ok(Self::Iterations),
      "userstory" | "userstorie" | "story" | "storie" | "hierarchicalrequirement" => {
        Ok(Self::UserStories)
      }
      "defect" => Ok(Self::Defects),
      _ => Err(format!(
        "Unknown entity type '{}' (expected projects, users, iterations, user-stories or defects)",
        s
      )),
    }
  }
}

/// A record type served through the cache tiers.
pub trait Entity: Cacheable + Sized {
  const TYPE: EntityType;

  /// Ordered field-mapping table for raw records and filters.
  const FIELDS: &'static [FieldMapping];

  /// Normalized field naming the owning project, for default scoping.
  const PROJECT_FIELD: Option<&'static str> = None;

  /// Normalize a raw record. Missing fields fall back to defaults.
  fn from_raw(raw: &RawRecord) -> Self;

  fn into_record(self) -> Record;

  fn ttl_cache(registry: &CacheRegistry) -> Arc<EntityCache<Self>>;

  fn snapshots(stores: &SnapshotStores) -> &SnapshotStore<Self>;
}

/// Project summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub object_id: String,
  pub name: String,
  pub description: Option<String>,
  pub state: String,
  pub owner: String,
  pub parent: Option<String>,
  pub workspace: Option<String>,
}

/// Workspace user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub object_id: String,
  pub user_name: String,
  pub display_name: String,
  pub email_address: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub disabled: bool,
}

/// Iteration (sprint)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
  pub object_id: String,
  pub name: String,
  pub state: String,
  pub start_date: Option<String>,
  pub end_date: Option<String>,
  pub project: Option<String>,
  pub project_name: Option<String>,
  pub plan_estimate: Option<f64>,
  pub notes: Option<String>,
}

/// User story (WSAPI `HierarchicalRequirement`)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStory {
  pub object_id: String,
  pub formatted_id: String,
  pub name: String,
  pub description: Option<String>,
  pub notes: Option<String>,
  pub schedule_state: String,
  pub flow_state: Option<String>,
  pub plan_estimate: Option<f64>,
  pub task_estimate_total: Option<f64>,
  pub task_remaining_total: Option<f64>,
  pub owner: String,
  pub project: Option<String>,
  pub project_name: Option<String>,
  pub iteration: Option<String>,
  pub iteration_name: Option<String>,
  pub blocked: bool,
  pub blocked_reason: Option<String>,
  pub ready: bool,
  pub creation_date: Option<String>,
  pub last_update_date: Option<String>,
}

/// Defect
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Defect {
  pub object_id: String,
  pub formatted_id: String,
  pub name: String,
  pub description: Option<String>,
  pub notes: Option<String>,
  pub state: String,
  pub severity: Option<String>,
  pub priority: Option<String>,
  pub schedule_state: String,
  pub owner: String,
  pub project: Option<String>,
  pub project_name: Option<String>,
  pub iteration: Option<String>,
  pub iteration_name: Option<String>,
  pub requirement: Option<String>,
  pub blocked: bool,
  pub creation_date: Option<String>,
  pub last_update_date: Option<String>,
}

/// Any normalized record, for callers that pick the entity type at runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
  Project(Project),
  User(User),
  Iteration(Iteration),
  UserStory(UserStory),
  Defect(Defect),
}

impl Record {
  pub fn object_id(&self) -> &str {
    match self {
      Record::Project(p) => &p.object_id,
      Record::User(u) => &u.object_id,
      Record::Iteration(i) => &i.object_id,
      Record::UserStory(s) => &s.object_id,
      Record::Defect(d) => &d.object_id,
    }
  }
}

// ============================================================================
// Field tables
// ============================================================================

const PROJECT_FIELDS: &[FieldMapping] = &[
  FieldMapping::new("objectId", &["ObjectID", "objectId"]).identifier(),
  FieldMapping::new("name", &["Name", "name"]).contains(),
  FieldMapping::new("description", &["Description", "description"]),
  FieldMapping::new("state", &["State", "state"]),
  FieldMapping::new("owner", &["Owner", "owner"]),
  FieldMapping::new("parent", &["Parent", "parent"]).reference(),
  FieldMapping::new("workspace", &["Workspace", "workspace"]).reference(),
];

const USER_FIELDS: &[FieldMapping] = &[
  FieldMapping::new("objectId", &["ObjectID", "objectId"]).identifier(),
  FieldMapping::new("userName", &["UserName", "userName"]).contains(),
  FieldMapping::new("displayName", &["DisplayName", "displayName"]).contains(),
  FieldMapping::new("emailAddress", &["EmailAddress", "emailAddress"]),
  FieldMapping::new("firstName", &["FirstName", "firstName"]),
  FieldMapping::new("lastName", &["LastName", "lastName"]),
  FieldMapping::new("disabled", &["Disabled", "disabled"]),
];

const ITERATION_FIELDS: &[FieldMapping] = &[
  FieldMapping::new("objectId", &["ObjectID", "objectId"]).identifier(),
  FieldMapping::new("name", &["Name", "name"]).contains(),
  FieldMapping::new("state", &["State", "state"]),
  FieldMapping::new("startDate", &["StartDate", "startDate"]),
  FieldMapping::new("endDate", &["EndDate", "endDate"]),
  FieldMapping::new("project", &["Project", "project"]).reference(),
  FieldMapping::new("projectName", &["projectName"]),
  FieldMapping::new("planEstimate", &["PlanEstimate", "planEstimate"]),
  FieldMapping::new("notes", &["Notes", "notes"]),
];

const USER_STORY_FIELDS: &[FieldMapping] = &[
  FieldMapping::new("objectId", &["ObjectID", "objectId"]).identifier(),
  FieldMapping::new("formattedId", &["FormattedID", "formattedId"]).identifier(),
  FieldMapping::new("name", &["Name", "name"]).contains(),
  FieldMapping::new("description", &["Description", "description"]),
  FieldMapping::new("notes", &["Notes", "notes"]),
  FieldMapping::new("scheduleState", &["ScheduleState", "scheduleState"]),
  FieldMapping::new("flowState", &["FlowState", "flowState"]),
  FieldMapping::new("planEstimate", &["PlanEstimate", "planEstimate"]),
  FieldMapping::new("taskEstimateTotal", &["TaskEstimateTotal", "taskEstimateTotal"]),
  FieldMapping::new("taskRemainingTotal", &["TaskRemainingTotal", "taskRemainingTotal"]),
  FieldMapping::new("owner", &["Owner", "owner"]),
  FieldMapping::new("project", &["Project", "project"]).reference(),
  FieldMapping::new("projectName", &["projectName"]),
  FieldMapping::new("iteration", &["Iteration", "iteration"]).reference(),
  FieldMapping::new("iterationName", &["iterationName"]),
  FieldMapping::new("blocked", &["Blocked", "blocked"]),
  FieldMapping::new("blockedReason", &["BlockedReason", "blockedReason"]),
  FieldMapping::new("ready", &["Ready", "ready"]),
  FieldMapping::new("creationDate", &["CreationDate", "creationDate"]),
  FieldMapping::new("lastUpdateDate", &["LastUpdateDate", "lastUpdateDate"]),
];

const DEFECT_FIELDS: &[FieldMapping] = &[
  FieldMapping::new("objectId", &["ObjectID", "objectId"]).identifier(),
  FieldMapping::new("formattedId", &["FormattedID", "formattedId"]).identifier(),
  FieldMapping::new("name", &["Name", "name"]).contains(),
  FieldMapping::new("description", &["Description", "description"]),
  FieldMapping::new("notes", &["Notes", "notes"]),
  FieldMapping::new("state", &["State", "state"]),
  FieldMapping::new("severity", &["Severity", "severity"]),
  FieldMapping::new("priority", &["Priority", "priority"]),
  FieldMapping::new("scheduleState", &["ScheduleState", "scheduleState"]),
  FieldMapping::new("owner", &["Owner", "owner"]),
  FieldMapping::new("project", &["Project", "project"]).reference(),
  FieldMapping::new("projectName", &["projectName"]),
  FieldMapping::new("iteration", &["Iteration", "iteration"]).reference(),
  FieldMapping::new("iterationName", &["iterationName"]),
  FieldMapping::new("requirement", &["Requirement", "requirement"]).reference(),
  FieldMapping::new("blocked", &["Blocked", "blocked"]),
  FieldMapping::new("creationDate", &["CreationDate", "creationDate"]),
  FieldMapping::new("lastUpdateDate", &["LastUpdateDate", "lastUpdateDate"]),
];

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Project {
  const TYPE: EntityType = EntityType::Projects;
  const FIELDS: &'static [FieldMapping] = PROJECT_FIELDS;

  fn from_raw(raw: &RawRecord) -> Self {
    let v = RawView::new(raw, Self::FIELDS);
    Project {
      object_id: v.object_id("objectId"),
      name: v.text_or_default("name"),
      description: v.html("description"),
      state: v.text_or_default("state"),
      owner: v.owner("owner"),
      parent: v.reference("parent"),
      workspace: v.reference("workspace"),
    }
  }

  fn into_record(self) -> Record {
    Record::Project(self)
  }

  fn ttl_cache(registry: &CacheRegistry) -> Arc<EntityCache<Self>> {
    registry.projects()
  }

  fn snapshots(stores: &SnapshotStores) -> &SnapshotStore<Self> {
    &stores.projects
  }
}

impl Entity for User {
  const TYPE: EntityType = EntityType::Users;
  const FIELDS: &'static [FieldMapping] = USER_FIELDS;

  fn from_raw(raw: &RawRecord) -> Self {
    let v = RawView::new(raw, Self::FIELDS);
    let user_name = v.text_or_default("userName");
    User {
      object_id: v.object_id("objectId"),
      display_name: v
        .text("displayName")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| user_name.clone()),
      user_name,
      email_address: v.text("emailAddress"),
      first_name: v.text("firstName"),
      last_name: v.text("lastName"),
      disabled: v.flag("disabled"),
    }
  }

  fn into_record(self) -> Record {
    Record::User(self)
  }

  fn ttl_cache(registry: &CacheRegistry) -> Arc<EntityCache<Self>> {
    registry.users()
  }

  fn snapshots(stores: &SnapshotStores) -> &SnapshotStore<Self> {
    &stores.users
  }
}

impl Entity for Iteration {
  const TYPE: EntityType = EntityType::Iterations;
  const FIELDS: &'static [FieldMapping] = ITERATION_FIELDS;
  const PROJECT_FIELD: Option<&'static str> = Some("project");

  fn from_raw(raw: &RawRecord) -> Self {
    let v = RawView::new(raw, Self::FIELDS);
    Iteration {
      object_id: v.object_id("objectId"),
      name: v.text_or_default("name"),
      state: v.text_or_default("state"),
      start_date: v.text("startDate"),
      end_date: v.text("endDate"),
      project: v.reference("project"),
      project_name: v.reference_name("project").or_else(|| v.text("projectName")),
      plan_estimate: v.number("planEstimate"),
      notes: v.html("notes"),
    }
  }

  fn into_record(self) -> Record {
    Record::Iteration(self)
  }

  fn ttl_cache(registry: &CacheRegistry) -> Arc<EntityCache<Self>> {
    registry.iterations()
  }

  fn snapshots(stores: &SnapshotStores) -> &SnapshotStore<Self> {
    &stores.iterations
  }
}

impl Entity for UserStory {
  const TYPE: EntityType = EntityType::UserStories;
  const FIELDS: &'static [FieldMapping] = USER_STORY_FIELDS;
  const PROJECT_FIELD: Option<&'static str> = Some("project");

  fn from_raw(raw: &RawRecord) -> Self {
    let v = RawView::new(raw, Self::FIELDS);
    UserStory {
      object_id: v.object_id("objectId"),
      formatted_id: v.text_or_default("formattedId"),
      name: v.text_or_default("name"),
      description: v.html("description"),
      notes: v.html("notes"),
      schedule_state: v.text_or_default("scheduleState"),
      flow_state: v.label("flowState"),
      plan_estimate: v.number("planEstimate"),
      task_estimate_total: v.number("taskEstimateTotal"),
      task_remaining_total: v.number("taskRemainingTotal"),
      owner: v.owner("owner"),
      project: v.reference("project"),
      project_name: v.reference_name("project").or_else(|| v.text("projectName")),
      iteration: v.reference("iteration"),
      iteration_name: v
        .reference_name("iteration")
        .or_else(|| v.text("iterationName")),
      blocked: v.flag("blocked"),
      blocked_reason: v.text("blockedReason").filter(|r| !r.is_empty()),
      ready: v.flag("ready"),
      creation_date: v.text("creationDate"),
      last_update_date: v.text("lastUpdateDate"),
    }
  }

  fn into_record(self) -> Record {
    Record::UserStory(self)
  }

  fn ttl_cache(registry: &CacheRegistry) -> Arc<EntityCache<Self>> {
    registry.user_stories()
  }

  fn snapshots(stores: &SnapshotStores) -> &SnapshotStore<Self> {
    &stores.user_stories
  }
}

impl Entity for Defect {
  const TYPE: EntityType = EntityType::Defects;
  const FIELDS: &'static [FieldMapping] = DEFECT_FIELDS;
  const PROJECT_FIELD: Option<&'static str> = Some("project");

  fn from_raw(raw: &RawRecord) -> Self {
    let v = RawView::new(raw, Self::FIELDS);
    Defect {
      object_id: v.object_id("objectId"),
      formatted_id: v.text_or_default("formattedId"),
      name: v.text_or_default("name"),
      description: v.html("description"),
      notes: v.html("notes"),
      state: v.text_or_default("state"),
      severity: v.text("severity"),
      priority: v.text("priority"),
      schedule_state: v.text_or_default("scheduleState"),
      owner: v.owner("owner"),
      project: v.reference("project"),
      project_name: v.reference_name("project").or_else(|| v.text("projectName")),
      iteration: v.reference("iteration"),
      iteration_name: v
        .reference_name("iteration")
        .or_else(|| v.text("iterationName")),
      requirement: v.reference("requirement"),
      blocked: v.flag("blocked"),
      creation_date: v.text("creationDate"),
      last_update_date: v.text("lastUpdateDate"),
    }
  }

  fn into_record(self) -> Record {
    Record::Defect(self)
  }

  fn ttl_cache(registry: &CacheRegistry) -> Arc<EntityCache<Self>> {
    registry.defects()
  }

  fn snapshots(stores: &SnapshotStores) -> &SnapshotStore<Self> {
    &stores.defects
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn raw(value: serde_json::Value) -> RawRecord {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn test_entity_type_parsing() {
    assert_eq!("user-stories".parse::<EntityType>(), Ok(EntityType::UserStories));
    assert_eq!("userStory".parse::<EntityType>(), Ok(EntityType::UserStories));
    assert_eq!("HierarchicalRequirement".parse::<EntityType>(), Ok(EntityType::UserStories));
    assert_eq!("projects".parse::<EntityType>(), Ok(EntityType::Projects));
    assert_eq!("Defect".parse::<EntityType>(), Ok(EntityType::Defects));
    assert!("milestones".parse::<EntityType>().is_err());
  }

  #[test]
  fn test_user_story_from_wsapi_record() {
    let story = UserStory::from_raw(&raw(json!({
      "ObjectID": 5001,
      "FormattedID": "US42",
      "Name": "Login page",
      "Description": "<p>As a <b>user</b> I can log in</p>",
      "ScheduleState": "In-Progress",
      "FlowState": {"_refObjectName": "Building"},
      "PlanEstimate": 3.0,
      "Owner": {"_refObjectName": "Jane Doe"},
      "Project": {
        "_ref": "https://rally1.rallydev.com/slm/webservice/v2.0/project/123",
        "_refObjectName": "Platform"
      },
      "Iteration": null,
      "Blocked": false,
      "Ready": true
    })));

    assert_eq!(story.object_id, "5001");
    assert_eq!(story.formatted_id, "US42");
    assert_eq!(story.description.as_deref(), Some("As a user I can log in"));
    assert_eq!(story.flow_state.as_deref(), Some("Building"));
    assert_eq!(story.plan_estimate, Some(3.0));
    assert_eq!(story.owner, "Jane Doe");
    assert_eq!(story.project.as_deref(), Some("/project/123"));
    assert_eq!(story.project_name.as_deref(), Some("Platform"));
    assert_eq!(story.iteration, None);
    assert!(story.ready);
  }

  #[test]
  fn test_user_story_from_normalized_record() {
    let story = UserStory::from_raw(&raw(json!({
      "objectId": "5001",
      "formattedId": "US42",
      "name": "Login page",
      "owner": "Jane Doe",
      "project": "/project/123",
      "projectName": "Platform"
    })));

    assert_eq!(story.object_id, "5001");
    assert_eq!(story.formatted_id, "US42");
    assert_eq!(story.owner, "Jane Doe");
    assert_eq!(story.project.as_deref(), Some("/project/123"));
    assert_eq!(story.project_name.as_deref(), Some("Platform"));
  }

  #[test]
  fn test_malformed_record_gets_defaults() {
    let defect = Defect::from_raw(&raw(json!({"Name": 12, "Owner": [1, 2]})));
    assert_eq!(defect.object_id, "");
    assert_eq!(defect.name, "12");
    assert_eq!(defect.owner, "Unknown");
    assert_eq!(defect.schedule_state, "");
    assert!(!defect.blocked);
  }

  #[test]
  fn test_user_display_name_falls_back_to_user_name() {
    let user = User::from_raw(&raw(json!({"ObjectID": 1, "UserName": "jdoe@example.com"})));
    assert_eq!(user.display_name, "jdoe@example.com");
  }

  #[test]
  fn test_record_serializes_flat() {
    let project = Project::from_raw(&raw(json!({"ObjectID": 9, "Name": "Platform"})));
    let json = serde_json::to_value(project.into_record()).unwrap();
    assert_eq!(json["objectId"], "9");
    assert_eq!(json["name"], "Platform");
    assert_eq!(json["owner"], "Unknown");
  }
}
