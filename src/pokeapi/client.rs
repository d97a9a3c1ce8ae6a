//! PokéAPI facade over the revalidating loader.

use thiserror::Error;
use tracing::debug;

use super::types::{ApiPokemon, PokemonDetail, PokemonRef};
use crate::cache::{DurableStore, Fetched};
use crate::fetch::{CancelSignal, FetchError, Transport};
use crate::list::{ListConfig, ListController};
use crate::revalidate::{whole_body, Revalidator};

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2/";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
  #[error("search query is empty")]
  EmptyQuery,
  #[error(transparent)]
  Fetch(#[from] FetchError),
}

pub fn detail_key(name: &str) -> String {
  format!("pokemon-details-{}", name)
}

pub fn detail_endpoint(name: &str) -> String {
  format!("pokemon/{}", name)
}

/// Normalize a search query the way names appear in the API.
pub fn normalize_query(query: &str) -> Option<String> {
  let name = query.trim().to_lowercase();
  (!name.is_empty()).then_some(name)
}

/// Cached PokéAPI access.
///
/// Every lookup goes through the same [`Revalidator`], so list pages and details
/// share one cache and one set of background refreshes.
pub struct PokeApi<S: DurableStore, T: Transport> {
  loader: Revalidator<S, T>,
  page_size: usize,
}

impl<S: DurableStore, T: Transport> PokeApi<S, T> {
  pub fn new(loader: Revalidator<S, T>) -> Self {
    Self {
      loader,
      page_size: ListConfig::default().page_size,
    }
  }

  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn loader(&self) -> &Revalidator<S, T> {
    &self.loader
  }

  /// A fresh list controller over the `pokemon` collection.
  pub fn list_controller(&self) -> ListController<PokemonRef, S, T> {
    let config = ListConfig {
      page_size: self.page_size,
      ..ListConfig::default()
    };
    ListController::new(self.loader.clone(), config)
  }

  /// Details for one Pokémon, served from cache when valid.
  ///
  /// A blank name would resolve to the collection endpoint, so it is rejected
  /// before any I/O.
  pub async fn detail(&self, name: &str) -> Result<Fetched<PokemonDetail>, FetchError> {
    if name.trim().is_empty() {
      return Err(FetchError::InvalidUrl("Pokémon name is empty".to_string()));
    }

    let fetched = self
      .loader
      .load(
        &detail_key(name),
        &detail_endpoint(name),
        whole_body,
        false,
        &CancelSignal::never(),
      )
      .await?;

    let source = fetched.source;
    let api: ApiPokemon =
      serde_json::from_value(fetched.data).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(Fetched {
      data: api.into(),
      source,
    })
  }

  /// Look a Pokémon up by name. A 404 is "not found", not an error.
  pub async fn search(&self, query: &str) -> Result<Option<Fetched<PokemonDetail>>, SearchError> {
    let name = normalize_query(query).ok_or(SearchError::EmptyQuery)?;

    match self.detail(&name).await {
      Ok(found) => Ok(Some(found)),
      Err(e) if e.is_not_found() => {
        debug!(name, "search found nothing");
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }
}

impl<S: DurableStore, T: Transport> Clone for PokeApi<S, T> {
  fn clone(&self) -> Self {
    Self {
      loader: self.loader.clone(),
      page_size: self.page_size,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStore, TtlCache};
  use crate::fetch::{Reply, ResilientClient, ScriptedTransport};
  use serde_json::json;
  use url::Url;

  fn api(replies: impl IntoIterator<Item = Reply>) -> PokeApi<MemoryStore, ScriptedTransport> {
    let client = ResilientClient::new(
      ScriptedTransport::new(replies),
      Url::parse(DEFAULT_BASE_URL).unwrap(),
    );
    PokeApi::new(Revalidator::new(TtlCache::new(MemoryStore::new()), client))
  }

  fn pikachu() -> serde_json::Value {
    json!({
      "id": 25,
      "name": "pikachu",
      "height": 4,
      "weight": 60,
      "types": [{"slot": 1, "type": {"name": "electric", "url": "https://pokeapi.co/api/v2/type/13/"}}]
    })
  }

  #[tokio::test]
  async fn test_detail_is_cached_under_name() {
    let api = api([Reply::Json(pikachu())]);

    let first = api.detail("pikachu").await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data.types, ["electric"]);
    assert!(api.loader().cache().memory_entry("pokemon-details-pikachu").is_some());

    let second = api.detail("pikachu").await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, first.data);

    api.loader().settle().await;
    let urls = api.loader().client().transport().urls.lock().unwrap().clone();
    assert_eq!(urls.len(), 2, "cache hit still revalidates in the background");
    assert!(urls.iter().all(|u| u == "https://pokeapi.co/api/v2/pokemon/pikachu"));
  }

  #[tokio::test]
  async fn test_search_normalizes_query() {
    let api = api([Reply::Json(pikachu())]);

    let found = api.search("  PikaChu ").await.unwrap().unwrap();
    assert_eq!(found.data.id, 25);

    let urls = api.loader().client().transport().urls.lock().unwrap().clone();
    assert_eq!(urls, ["https://pokeapi.co/api/v2/pokemon/pikachu"]);
  }

  #[tokio::test]
  async fn test_search_not_found() {
    let api = api([Reply::Status(404, "Not Found".to_string())]);

    assert_eq!(api.search("missingno").await.unwrap(), None);
    assert_eq!(api.loader().client().transport().calls(), 1);
  }

  #[tokio::test]
  async fn test_empty_search_does_no_io() {
    let api = api([]);

    assert_eq!(api.search("   ").await.unwrap_err(), SearchError::EmptyQuery);
    assert_eq!(api.loader().client().transport().calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_search_propagates_other_failures() {
    let api = api([Reply::Status(500, String::new())]);

    let err = api.search("pikachu").await.unwrap_err();
    assert!(matches!(
      err,
      SearchError::Fetch(FetchError::RetriesExhausted { attempts: 3, .. })
    ));
  }

  #[tokio::test]
  async fn test_list_controller_uses_page_size() {
    let api = api([]).with_page_size(50);
    let list = api.list_controller();
    assert_eq!(list.config().page_endpoint(0), "pokemon?limit=50&offset=0");
  }

  #[tokio::test]
  async fn test_blank_detail_is_rejected_without_io() {
    let api = api([Reply::Json(json!({"results": []}))]);

    let err = api.detail("  ").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
    assert_eq!(api.loader().client().transport().calls(), 0);
    assert!(api.loader().cache().memory_entry("pokemon-details-").is_none());
  }
}
