//! Page-context scripts that detect and remove residual automation markers.
//!
//! Even with a patched driver, a control session can leave `*_*_Array` /
//! `*_*_Promise` / `*_*_Symbol` style properties on the page's global
//! object. These scripts walk the global prototype chain and filter own
//! property names against that pattern; the probe reports matches, the
//! cleanup deletes them.

/// Returns the list of global property names matching the automation-marker
/// pattern.
pub(crate) const PROBE_MARKERS_SCRIPT: &str = r#"
let objectToInspect = window,
    result = [];
while (objectToInspect !== null) {
  result = result.concat(Object.getOwnPropertyNames(objectToInspect));
  objectToInspect = Object.getPrototypeOf(objectToInspect);
}
return result.filter((p) => p.match(/.+_.+_(Array|Promise|Symbol)/ig));
"#;

/// Deletes every global property matching the automation-marker pattern.
/// Registered as a new-document script so it also covers the document
/// created by the upcoming navigation.
pub(crate) const REMOVE_MARKERS_SCRIPT: &str = r#"
let objectToInspect = window,
    result = [];
while (objectToInspect !== null) {
  result = result.concat(Object.getOwnPropertyNames(objectToInspect));
  objectToInspect = Object.getPrototypeOf(objectToInspect);
}
result.forEach((p) => p.match(/.+_.+_(Array|Promise|Symbol)/ig)
    && delete window[p]);
"#;

/// Interpret a probe-script result: any non-empty array means markers are
/// present. Non-array results (errored or unexpected pages) count as clean,
/// keeping navigation available.
pub(crate) fn markers_present(probe_result: &serde_json::Value) -> bool {
    probe_result.as_array().is_some_and(|names| !names.is_empty())
}
