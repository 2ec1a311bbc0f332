use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use angel_shared::errors::{AppError, AppResult};
use angel_shared::types::{ApiResponse, Paginated};

use crate::models::companion_profile::{CompanionLocation, CompanionProfile, CompanionProfileView, OwnerFlags};
use crate::schema::{companion_profiles, users};
use crate::services::search_query::{self, SearchFilters, SortKey, DEFAULT_SEARCH_LIMIT};
use crate::AppState;

const FEATURED_LIMIT: i64 = 10;

pub type SearchResult = CompanionProfileView<Option<OwnerFlags>>;

/// Attaches each owner's verification flag, preserving result order.
fn with_owners(conn: &mut PgConnection, profiles: Vec<CompanionProfile>) -> AppResult<Vec<SearchResult>> {
    let owner_ids: Vec<Uuid> = profiles.iter().map(|p| p.user_id).collect();
    let owners: HashMap<Uuid, OwnerFlags> = users::table
        .filter(users::id.eq_any(owner_ids))
        .select((users::id, users::is_verified))
        .load::<OwnerFlags>(conn)?
        .into_iter()
        .map(|o| (o.id, o))
        .collect();

    Ok(profiles
        .into_iter()
        .map(|p| {
            let owner = owners.get(&p.user_id).copied();
            p.view(owner)
        })
        .collect())
}

fn load(conn: &mut PgConnection, query: companion_profiles::BoxedQuery<'static, diesel::pg::Pg>) -> AppResult<Vec<SearchResult>> {
    let profiles = query.select(CompanionProfile::as_select()).load(conn)?;
    with_owners(conn, profiles)
}

// --- GET /companions ---

pub async fn search_companions(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> AppResult<Json<ApiResponse<Paginated<SearchResult>>>> {
    let (filters, page) = SearchFilters::from_pairs(&pairs)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let total: i64 = filters.filtered().count().get_result(&mut conn)?;
    let results = load(&mut conn, filters.page_query(&page))?;

    tracing::debug!(total, page = page.page, sort = ?filters.sort, "companion search");

    Ok(Json(ApiResponse::ok(Paginated::new(results, total, &page))))
}

// --- GET /featured ---

pub async fn featured(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<SearchResult>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let results = load(&mut conn, search_query::featured_query(Utc::now(), FEATURED_LIMIT))?;
    Ok(Json(ApiResponse::ok(results)))
}

// --- GET /popular ---

pub async fn popular(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<SearchResult>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let query = search_query::sorted(SearchFilters::default().filtered(), SortKey::Popularity).limit(DEFAULT_SEARCH_LIMIT);
    Ok(Json(ApiResponse::ok(load(&mut conn, query)?)))
}

// --- GET /new ---

pub async fn newest(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<SearchResult>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let query = search_query::sorted(SearchFilters::default().filtered(), SortKey::Newest).limit(DEFAULT_SEARCH_LIMIT);
    Ok(Json(ApiResponse::ok(load(&mut conn, query)?)))
}

// --- GET /location/:location ---

pub async fn by_location(
    State(state): State<Arc<AppState>>,
    Path(place): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<SearchResult>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let results = load(&mut conn, search_query::location_query(&place, DEFAULT_SEARCH_LIMIT))?;
    Ok(Json(ApiResponse::ok(results)))
}

// --- GET /locations ---

pub async fn locations(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let found: Vec<CompanionLocation> = companion_profiles::table
        .filter(companion_profiles::is_active.eq(true))
        .select(companion_profiles::location)
        .load(&mut conn)?;
    Ok(Json(ApiResponse::ok(distinct_places(&found))))
}

// --- GET /services ---

pub async fn services(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let found: Vec<Vec<String>> = companion_profiles::table
        .filter(companion_profiles::is_active.eq(true))
        .select(companion_profiles::services)
        .load(&mut conn)?;
    Ok(Json(ApiResponse::ok(distinct_non_blank(found.iter().flatten()))))
}

fn distinct_non_blank<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    values
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sorted cities, then any state not already listed.
fn distinct_places(found: &[CompanionLocation]) -> Vec<String> {
    let mut places = distinct_non_blank(found.iter().map(|l| &l.city));
    for state in distinct_non_blank(found.iter().map(|l| &l.state)) {
        if !places.contains(&state) {
            places.push(state);
        }
    }
    places
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(city: &str, state: &str) -> CompanionLocation {
        CompanionLocation {
            city: city.into(),
            state: state.into(),
            country: "Australia".into(),
            travel_availability: false,
            travel_locations: Vec::new(),
        }
    }

    #[test]
    fn places_are_deduplicated_and_blank_free() {
        let found = vec![at("Sydney", "NSW"), at("Melbourne", "VIC"), at("Sydney", "NSW"), at(" ", "QLD")];
        assert_eq!(distinct_places(&found), vec!["Melbourne", "Sydney", "NSW", "QLD", "VIC"]);
    }

    #[test]
    fn services_are_trimmed_and_unique() {
        let raw = vec![vec!["dinner".to_string(), " travel ".to_string()], vec!["dinner".to_string(), String::new()]];
        assert_eq!(distinct_non_blank(raw.iter().flatten()), vec!["dinner", "travel"]);
    }
}
