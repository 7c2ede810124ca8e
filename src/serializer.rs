//! Field-level filtering of serialized records

use serde_json::{Map, Value};

use crate::permission::RequestPermission;

/// Primary key field, always visible
pub const PK_FIELD: &str = "id";

/// Remove the fields of `model` records the request may not see.
///
/// Objects are filtered directly, arrays element by element. When field
/// permissions apply but the model has no granted fields only the primary
/// key survives.
pub fn filter_fields(value: Value, model: &str, permission: &RequestPermission) -> Value {
    if permission.ignore_field_permission {
        return value;
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| filter_fields(item, model, permission))
                .collect(),
        ),
        Value::Object(record) => Value::Object(filter_record(record, model, permission)),
        other => other,
    }
}

fn filter_record(
    record: Map<String, Value>,
    model: &str,
    permission: &RequestPermission,
) -> Map<String, Value> {
    let allowed = permission.fields.get(model);
    record
        .into_iter()
        .filter(|(name, _)| {
            name == PK_FIELD || allowed.is_some_and(|fields| fields.contains(name.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn permission(fields: &[&str]) -> RequestPermission {
        let mut permission = RequestPermission::default();
        permission.fields.insert(
            "system.userinfo".to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        permission
    }

    #[test]
    fn test_keeps_granted_fields_and_pk() {
        let record = json!({"id": 1, "username": "alice", "dept_id": 3});
        let filtered = filter_fields(record, "system.userinfo", &permission(&["username"]));
        assert_eq!(filtered, json!({"id": 1, "username": "alice"}));
    }

    #[test]
    fn test_unknown_model_keeps_only_pk() {
        let records = json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]);
        let filtered = filter_fields(records, "demo.book", &permission(&["username"]));
        assert_eq!(filtered, json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn test_ignored_permission_passes_through() {
        let record = json!({"id": 1, "secret": true});
        let permission = RequestPermission {
            ignore_field_permission: true,
            ..Default::default()
        };
        assert_eq!(filter_fields(record.clone(), "demo.book", &permission), record);
    }
}
