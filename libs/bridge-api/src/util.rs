/// Resolve a field path in a `serde_json::Value`.
///
/// The whole path is tried as a literal key first, so keys that contain
/// dots (`"@iot.id"`) resolve directly. Otherwise the path is walked by
/// dot-separated segments:
/// - `"sensorId"` → `value["sensorId"]`
/// - `"Datastream.@iot.id"` → `value["Datastream"]["@iot.id"]`
///
/// Returns `None` if any segment is missing.
pub fn resolve_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if let Some(v) = value.get(path) {
        return Some(v);
    }
    let (head, rest) = path.split_once('.')?;
    resolve_path(value.get(head)?, rest)
}
