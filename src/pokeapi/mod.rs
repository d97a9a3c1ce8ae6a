mod client;
mod types;

pub use client::{detail_endpoint, detail_key, normalize_query, PokeApi, SearchError, DEFAULT_BASE_URL};
pub use types::{ApiPokemon, PokemonDetail, PokemonRef};
