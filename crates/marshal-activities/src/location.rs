/// The floor part of a location: `floor-3/room-305` → `floor-3`.
pub fn floor_of(location: &str) -> &str {
  location.split('/').next().unwrap_or(location)
}

/// Floor number of a floor id or location: the trailing `-N`, else 1.
pub fn floor_number(location: &str) -> u32 {
  floor_of(location)
    .rsplit_once('-')
    .and_then(|(_, n)| n.parse().ok())
    .unwrap_or(1)
}
