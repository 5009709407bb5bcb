/// Whether a worker capability pattern covers a requested capability.
///
/// Segments are compared positionally up to the pattern's length; a `*`
/// segment matches anything, and request segments beyond the pattern are
/// unconstrained. A pattern longer than the request never matches.
pub fn capability_matches(pattern: &str, requested: &str) -> bool {
  if pattern == requested {
    return true;
  }

  let pattern: Vec<&str> = pattern.split('.').collect();
  let requested: Vec<&str> = requested.split('.').collect();
  if pattern.len() > requested.len() {
    return false;
  }

  pattern
    .iter()
    .zip(&requested)
    .all(|(p, r)| *p == "*" || p == r)
}
