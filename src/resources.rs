//! Resources extracted from the Strava API.

use std::fmt;

use serde_json::Value;

/// Stream types requested for each activity.
pub const STREAM_KEYS: &str =
    "time,distance,altitude,velocity_smooth,heartrate,cadence,watts,temp,moving,grade_smooth,latlng";

/// Field added to child records naming their parent activity.
pub const PARENT_ID_FIELD: &str = "_activities_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Paginated activity summaries, bounded by `after`/`before`.
    Activities,
    /// Time series for one activity.
    ActivityStreams,
    /// Heart rate and power zones for one activity.
    ActivityZones,
}

impl Resource {
    /// Name used for checkpoints, log lines and output files.
    pub fn name(self) -> &'static str {
        match self {
            Resource::Activities => "activities",
            Resource::ActivityStreams => "activity_streams",
            Resource::ActivityZones => "activity_zones",
        }
    }

    /// Endpoint path relative to the API base URL.
    pub fn path(self, activity_id: Option<u64>) -> String {
        match (self, activity_id) {
            (Resource::Activities, _) => "activities".to_string(),
            (Resource::ActivityStreams, Some(id)) => format!("activities/{}/streams", id),
            (Resource::ActivityZones, Some(id)) => format!("activities/{}/zones", id),
            (child, None) => format!("activities/{{activity_id}}/{}", child.suffix()),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Resource::Activities => "",
            Resource::ActivityStreams => "streams",
            Resource::ActivityZones => "zones",
        }
    }

    /// Query parameters fixed for this resource.
    pub fn static_params(self) -> Vec<(String, String)> {
        match self {
            Resource::ActivityStreams => vec![("keys".to_string(), STREAM_KEYS.to_string())],
            _ => Vec::new(),
        }
    }

    /// Child resources fetch exactly one page.
    pub fn maximum_page(self) -> Option<u32> {
        match self {
            Resource::Activities => None,
            _ => Some(1),
        }
    }

    /// Whether a 404 means "no data" rather than a failure.
    pub fn ignores_not_found(self) -> bool {
        self != Resource::Activities
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Split a response body into records.
///
/// Arrays yield their elements; an object yields itself; null yields nothing.
pub fn records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Tag a child record with its parent activity id.
///
/// Non-object records are wrapped as `{"value": ...}` first.
pub fn with_parent_id(record: Value, activity_id: u64) -> Value {
    let mut object = match record {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    object.insert(PARENT_ID_FIELD.to_string(), Value::from(activity_id));
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        assert_eq!(Resource::Activities.path(None), "activities");
        assert_eq!(
            Resource::ActivityStreams.path(Some(7)),
            "activities/7/streams"
        );
        assert_eq!(Resource::ActivityZones.path(Some(7)), "activities/7/zones");
    }

    #[test]
    fn test_child_resources_are_single_page() {
        assert_eq!(Resource::Activities.maximum_page(), None);
        assert_eq!(Resource::ActivityZones.maximum_page(), Some(1));
        assert!(Resource::ActivityStreams.ignores_not_found());
        assert!(!Resource::Activities.ignores_not_found());
    }

    #[test]
    fn test_records_and_parent_id() {
        assert_eq!(records(json!([1, 2])).len(), 2);
        assert_eq!(records(json!({"a": 1})).len(), 1);
        assert!(records(Value::Null).is_empty());

        let tagged = with_parent_id(json!({"type": "heartrate"}), 42);
        assert_eq!(tagged["_activities_id"], 42);
        assert_eq!(tagged["type"], "heartrate");

        let wrapped = with_parent_id(json!(3), 42);
        assert_eq!(wrapped, json!({"value": 3, "_activities_id": 42}));
    }
}
