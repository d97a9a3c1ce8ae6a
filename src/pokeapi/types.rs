//! PokéAPI payloads and the domain types built from them.

use serde::{Deserialize, Serialize};

use crate::list::Keyed;

/// Entry of a paginated `pokemon` listing, as cached under `list-{offset}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonRef {
  pub name: String,
  pub url: String,
}

impl PokemonRef {
  /// Numeric id: the last non-empty path segment of the resource URL.
  pub fn id(&self) -> Option<u32> {
    self
      .url
      .split('/')
      .filter(|segment| !segment.is_empty())
      .last()
      .and_then(|segment| segment.parse().ok())
  }
}

impl Keyed for PokemonRef {
  fn identity_key(&self) -> &str {
    &self.name
  }
}

// ============================================================================
// Detail response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiNamedResource {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTypeSlot {
  pub slot: u8,
  #[serde(rename = "type")]
  pub kind: ApiNamedResource,
}

/// The subset of `GET pokemon/{name}` this crate reads.
#[derive(Debug, Deserialize)]
pub struct ApiPokemon {
  pub id: u32,
  pub name: String,
  #[serde(default)]
  pub height: u32,
  #[serde(default)]
  pub weight: u32,
  #[serde(default)]
  pub types: Vec<ApiTypeSlot>,
}

/// Pokémon details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PokemonDetail {
  pub id: u32,
  pub name: String,
  /// Decimetres
  pub height: u32,
  /// Hectograms
  pub weight: u32,
  /// Type names in slot order
  pub types: Vec<String>,
}

impl From<ApiPokemon> for PokemonDetail {
  fn from(api: ApiPokemon) -> Self {
    let mut slots = api.types;
    slots.sort_by_key(|t| t.slot);
    Self {
      id: api.id,
      name: api.name,
      height: api.height,
      weight: api.weight,
      types: slots.into_iter().map(|t| t.kind.name).collect(),
    }
  }
}
