//! Merging pages into an ordered, duplicate-free sequence.

use std::collections::HashSet;

/// Items that carry an identity key.
pub trait Keyed {
  /// Identity used for de-duplication (e.g. a Pokémon's name)
  fn identity_key(&self) -> &str;
}

/// Merge an incoming page into `items`.
///
/// With `reset`, `items` is replaced; otherwise the page is appended. Either way
/// the result is de-duplicated by identity key with the first occurrence keeping
/// its position, so loading the same page twice neither reorders nor duplicates.
pub fn merge_page<T: Keyed>(items: &mut Vec<T>, incoming: Vec<T>, reset: bool) {
  if reset {
    items.clear();
  }

  let mut seen: HashSet<String> = HashSet::with_capacity(items.len() + incoming.len());
  items.retain(|item| seen.insert(item.identity_key().to_string()));

  for item in incoming {
    if seen.insert(item.identity_key().to_string()) {
      items.push(item);
    }
  }
}
