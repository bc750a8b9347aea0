use serde::{
  Deserialize,
  Serialize
};

/// A task as it travels across the
/// persistence boundary. `date` is kept
/// serialized; readers parse it.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskDto {
  pub id:          u64,
  #[serde(default)]
  pub title:       String,
  #[serde(default)]
  pub description: String,
  pub date:        String,
  #[serde(default)]
  pub done:        bool
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskCreate {
  pub title:       String,
  pub description: String,
  pub date:        String,
  #[serde(default)]
  pub done:        bool
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct TaskPatch {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:       Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub date:        Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub done:        Option<bool>
}

impl TaskPatch {
  pub fn is_empty(&self) -> bool {
    self.title.is_none()
      && self.description.is_none()
      && self.date.is_none()
      && self.done.is_none()
  }

  /// Writes every present field onto
  /// `dto`, leaving the rest untouched.
  pub fn apply_to(
    &self,
    dto: &mut TaskDto
  ) {
    if let Some(title) = &self.title {
      dto.title = title.clone();
    }
    if let Some(description) =
      &self.description
    {
      dto.description =
        description.clone();
    }
    if let Some(date) = &self.date {
      dto.date = date.clone();
    }
    if let Some(done) = self.done {
      dto.done = done;
    }
  }
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TaskUpdateArgs {
  pub id:    u64,
  pub patch: TaskPatch
}

#[cfg(test)]
mod tests {
  use super::{
    TaskDto,
    TaskPatch
  };

  #[test]
  fn dto_missing_optional_fields_use_defaults()
   {
    let dto: TaskDto =
      serde_json::from_str(
        r#"{"id":7,"date":"2026-03-01T10:00:00Z"}"#
      )
      .expect("parse dto");
    assert_eq!(dto.id, 7);
    assert!(dto.title.is_empty());
    assert!(dto.description.is_empty());
    assert!(!dto.done);
  }

  #[test]
  fn patch_skips_absent_fields() {
    let patch = TaskPatch {
      done: Some(true),
      ..TaskPatch::default()
    };
    let json = serde_json::to_string(
      &patch
    )
    .expect("serialize patch");
    assert_eq!(json, r#"{"done":true}"#);
  }

  #[test]
  fn patch_applies_only_present_fields()
  {
    let mut dto = TaskDto {
      id:          1,
      title:       "buy milk".to_string(),
      description: "two litres"
        .to_string(),
      date:        "2026-03-01T10:00:00Z"
        .to_string(),
      done:        false
    };
    let patch = TaskPatch {
      title: Some("buy oat milk".to_string()),
      done: Some(true),
      ..TaskPatch::default()
    };
    assert!(!patch.is_empty());
    patch.apply_to(&mut dto);
    assert_eq!(dto.title, "buy oat milk");
    assert_eq!(dto.description, "two litres");
    assert!(dto.done);
  }
}
