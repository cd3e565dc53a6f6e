//! The SSE change feed for a recipe.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures_util::{Stream, StreamExt, stream};

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::dto::EventParams;
use crate::server::events::{TiddlerChange, change_stream};
use crate::server::response::{ApiError, StoreResultExt};
use crate::store::SyncOptions;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Replays changes newer than the client's cursor, then goes live on the
/// broadcast channel. The live subscription is taken before the catch-up
/// query so a write landing between the two is not lost; a revision may be
/// seen twice across the seam, which clients absorb by id.
pub async fn recipe_events(
    State(state): State<Arc<AppState>>,
    Path(recipe_name): Path<String>,
    Query(params): Query<EventParams>,
    AuthUser(user): AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let grant = access::require_recipe_read(state.store.as_ref(), &user, &recipe_name)?;
    let bag_names: HashSet<String> = grant.bags.iter().map(|b| b.bag_name.clone()).collect();

    let live = change_stream(&state.changes, bag_names);

    let mut catchup: Vec<TiddlerChange> = Vec::new();
    if let Some(since) = params.last_known_revision_id {
        for recipe_bag in &grant.bags {
            let infos = state
                .store
                .bag_state(
                    recipe_bag.bag_id,
                    SyncOptions {
                        last_known_revision_id: Some(since),
                        include_deleted: true,
                    },
                )
                .api_err("Failed to read change history")?;
            for info in infos {
                catchup.push(TiddlerChange {
                    bag_name: recipe_bag.bag_name.clone(),
                    title: info.title,
                    revision_id: info.revision_id,
                    is_deleted: info.is_deleted,
                });
            }
        }
        catchup.sort_by_key(|c| c.revision_id);
    }

    let replay = stream::iter(catchup).filter_map(|change| async move {
        let id = change.revision_id;
        let data = serde_json::to_string(&change).ok()?;
        Some(Ok::<_, axum::Error>(
            Event::default().event("change").id(id.to_string()).data(data),
        ))
    });

    Ok(Sse::new(replay.chain(live)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
