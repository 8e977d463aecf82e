//! Router bridge: in-process history with a data-load gate
//!
//! Two write modes: `replace` rewrites the current entry (hydration must
//! not grow the back stack), `push` appends a new one. The loader runs
//! only when the session loop asks (hydrate mode); steady-state pushes
//! re-resolve reactively downstream.

use std::sync::Arc;

use futures::future::BoxFuture;
use percent_encoding::percent_decode_str;
use tracing::debug;
use url::form_urlencoded;

use fovea_common::state::Navigation;
use fovea_common::Result;

use crate::reducer::RouteTarget;

/// One history entry: a location plus the payload the destination route
/// hydrates from, without any further round trip
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub path: String,
    /// Query string without the leading `?`
    pub search: String,
    pub nav: Option<Navigation>,
}

impl HistoryEntry {
    fn root() -> Self {
        Self {
            path: "/".to_string(),
            search: String::new(),
            nav: None,
        }
    }

    /// Full location string
    pub fn href(&self) -> String {
        if self.search.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.search)
        }
    }
}

/// The router's data-loading phase, pluggable so tests can stub it
pub trait RouteLoader: Send + Sync {
    fn load<'a>(&'a self, entry: &'a HistoryEntry) -> BoxFuture<'a, Result<()>>;
}

/// Loader that resolves immediately; unit tests and stateless tools
pub struct NoopLoader;

impl RouteLoader for NoopLoader {
    fn load<'a>(&'a self, _entry: &'a HistoryEntry) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Browser-history stand-in owned by the session
pub struct Router {
    entries: Vec<HistoryEntry>,
    index: usize,
    loader: Arc<dyn RouteLoader>,
}

impl Router {
    pub fn new(loader: Arc<dyn RouteLoader>) -> Self {
        Self {
            entries: vec![HistoryEntry::root()],
            index: 0,
            loader,
        }
    }

    /// The current location
    pub fn location(&self) -> &HistoryEntry {
        &self.entries[self.index]
    }

    /// Rewrite the current entry without growing the back stack
    pub fn replace(&mut self, target: RouteTarget) {
        debug!(href = %target.href(), "history replace");
        self.entries[self.index] = entry_from(target);
    }

    /// Append a new entry, dropping any forward history
    pub fn push(&mut self, target: RouteTarget) {
        debug!(href = %target.href(), "history push");
        self.entries.truncate(self.index + 1);
        self.entries.push(entry_from(target));
        self.index += 1;
    }

    /// Step back one entry, if there is one
    pub fn back(&mut self) -> Option<&HistoryEntry> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(&self.entries[self.index])
    }

    /// Number of entries in the back stack (current included)
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Run the data-loading phase for the current entry
    pub async fn load(&self) -> Result<()> {
        self.loader.load(self.location()).await
    }
}

fn entry_from(target: RouteTarget) -> HistoryEntry {
    HistoryEntry {
        path: target.path,
        search: target.search,
        nav: Some(target.nav),
    }
}

/// Extract the dataset slug from a `/datasets/{slug}` path, decoded
///
/// Exact match only: nested paths and the root do not carry a slug.
pub fn dataset_slug(path: &str) -> Option<String> {
    let slug = path.strip_prefix("/datasets/")?;
    if slug.is_empty() || slug.contains('/') {
        return None;
    }
    Some(percent_decode_str(slug).decode_utf8_lossy().into_owned())
}

/// Extract the saved-view name from the `view` query parameter, decoded
///
/// Only meaningful on a dataset path; the root never names a view.
pub fn saved_view_name(path: &str, search: &str) -> Option<String> {
    dataset_slug(path)?;

    let raw = search.strip_prefix('?').unwrap_or(search);
    form_urlencoded::parse(raw.as_bytes())
        .find(|(name, _)| name == "view")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fovea_common::state::Description;

    fn target(path: &str, search: &str) -> RouteTarget {
        RouteTarget {
            path: path.to_string(),
            search: search.to_string(),
            nav: Navigation {
                state: Description::default(),
                colorscale: None,
                config: None,
                refresh: false,
                variables: None,
            },
        }
    }

    #[test]
    fn replace_does_not_grow_the_stack() {
        let mut router = Router::new(Arc::new(NoopLoader));
        router.replace(target("/datasets/a", ""));
        assert_eq!(router.depth(), 1);
        assert_eq!(router.location().href(), "/datasets/a");
    }

    #[test]
    fn push_grows_the_stack_and_back_returns() {
        let mut router = Router::new(Arc::new(NoopLoader));
        router.replace(target("/datasets/a", ""));
        router.push(target("/datasets/a", "view=b"));
        assert_eq!(router.depth(), 2);
        assert_eq!(router.location().href(), "/datasets/a?view=b");

        let back = router.back().unwrap();
        assert_eq!(back.href(), "/datasets/a");
        assert!(router.back().is_none());
    }

    #[test]
    fn push_drops_forward_history() {
        let mut router = Router::new(Arc::new(NoopLoader));
        router.push(target("/datasets/a", ""));
        router.back();
        router.push(target("/datasets/b", ""));
        assert_eq!(router.depth(), 2);
        assert_eq!(router.location().path, "/datasets/b");
    }

    #[test]
    fn entries_carry_navigation_for_hydration() {
        let mut router = Router::new(Arc::new(NoopLoader));
        let mut the_target = target("/datasets/a", "");
        the_target.nav.state.dataset = Some("a".to_string());
        router.replace(the_target);

        let nav = router.location().nav.as_ref().unwrap();
        assert_eq!(nav.state.dataset.as_deref(), Some("a"));
    }

    #[test]
    fn slug_extraction_decodes_reserved_characters() {
        assert_eq!(
            dataset_slug("/datasets/my%20set%2F2024%3F").as_deref(),
            Some("my set/2024?")
        );
        assert_eq!(dataset_slug("/"), None);
        assert_eq!(dataset_slug("/datasets/"), None);
        assert_eq!(dataset_slug("/datasets/a/samples"), None);
    }

    #[test]
    fn saved_view_name_needs_a_dataset_path() {
        assert_eq!(
            saved_view_name("/datasets/d", "view=sunny%20days").as_deref(),
            Some("sunny days")
        );
        assert_eq!(saved_view_name("/", "view=x"), None);
        assert_eq!(saved_view_name("/datasets/d", "other=1"), None);
    }

    #[test]
    fn saved_view_name_decodes_plus_as_space() {
        assert_eq!(
            saved_view_name("/datasets/d", "view=sunny+days").as_deref(),
            Some("sunny days")
        );
    }

    #[tokio::test]
    async fn load_runs_the_pluggable_loader() {
        struct Failing;
        impl RouteLoader for Failing {
            fn load<'a>(&'a self, _entry: &'a HistoryEntry) -> BoxFuture<'a, Result<()>> {
                Box::pin(async { Err(fovea_common::Error::Graphql("boom".to_string())) })
            }
        }

        let router = Router::new(Arc::new(Failing));
        assert!(router.load().await.is_err());

        let router = Router::new(Arc::new(NoopLoader));
        assert!(router.load().await.is_ok());
    }
}
