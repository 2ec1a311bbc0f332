//! Translates search parameters into a filtered, sorted companion query.
//!
//! Text filters are case-insensitive substring matches. A parameter given
//! several times (`services=a&services=b`, or the `services[]=` form) matches
//! when any of its values does. Different parameters are combined with AND.

use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Array, Bool, Double, Text};

use angel_shared::errors::{AppError, AppResult};
use angel_shared::types::pagination::{PageRequest, PaginationParams};

use crate::schema::companion_profiles;

pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    Newest,
    Oldest,
    PriceLow,
    PriceHigh,
    Rating,
    #[default]
    Popularity,
}

impl SortKey {
    /// Unknown keys fall back to popularity.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "newest" => SortKey::Newest,
            "oldest" => SortKey::Oldest,
            "price_low" => SortKey::PriceLow,
            "price_high" => SortKey::PriceHigh,
            "rating" => SortKey::Rating,
            _ => SortKey::Popularity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub locations: Vec<String>,
    pub services: Vec<String>,
    pub ethnicities: Vec<String>,
    pub languages: Vec<String>,
    pub body_types: Vec<String>,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub min_rate: Option<i64>,
    pub max_rate: Option<i64>,
    pub sort: SortKey,
}

fn parse_min(field: &str, raw: &str, min: i64, message: &str) -> AppResult<i64> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::invalid_field(field, format!("{field} must be an integer")))?;
    if value < min {
        return Err(AppError::invalid_field(field, message));
    }
    Ok(value)
}

fn parse_age(field: &str, raw: &str, message: &str) -> AppResult<i32> {
    let value = parse_min(field, raw, 18, message)?;
    i32::try_from(value).map_err(|_| AppError::invalid_field(field, message))
}

impl SearchFilters {
    /// Parses raw query pairs. Empty values are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> AppResult<(Self, PageRequest)> {
        let mut filters = SearchFilters::default();
        let mut paging = PaginationParams::default();

        for (key, value) in pairs {
            let key = key.strip_suffix("[]").unwrap_or(key);
            if value.trim().is_empty() {
                continue;
            }
            match key {
                "location" => filters.locations.push(value.clone()),
                "services" => filters.services.push(value.clone()),
                "ethnicity" => filters.ethnicities.push(value.clone()),
                "languages" => filters.languages.push(value.clone()),
                "bodyType" => filters.body_types.push(value.clone()),
                "minAge" => filters.min_age = Some(parse_age(key, value, "minimum age must be at least 18")?),
                "maxAge" => filters.max_age = Some(parse_age(key, value, "maximum age must be at least 18")?),
                "minRate" => filters.min_rate = Some(parse_min(key, value, 0, "minimum rate must be non-negative")?),
                "maxRate" => filters.max_rate = Some(parse_min(key, value, 0, "maximum rate must be non-negative")?),
                "sortBy" => filters.sort = SortKey::parse(value),
                "page" => paging.page = Some(value.clone()),
                "limit" => paging.limit = Some(value.clone()),
                _ => {}
            }
        }

        let page = paging.resolve(DEFAULT_SEARCH_LIMIT)?;
        Ok((filters, page))
    }

    /// Active profiles matching every supplied filter. No ordering or paging.
    pub fn filtered(&self) -> companion_profiles::BoxedQuery<'static, Pg> {
        use crate::schema::companion_profiles::dsl::*;

        let mut query = companion_profiles.filter(is_active.eq(true)).into_boxed();

        if !self.locations.is_empty() {
            query = query.filter(location_matches(&self.locations));
        }
        if !self.services.is_empty() {
            query = query.filter(array_matches("services", &self.services));
        }
        if !self.languages.is_empty() {
            query = query.filter(array_matches("languages", &self.languages));
        }
        if !self.ethnicities.is_empty() {
            query = query.filter(
                sql::<Bool>("companion_profiles.ethnicity ILIKE ANY(")
                    .bind::<Array<Text>, _>(substring_patterns(&self.ethnicities))
                    .sql(")"),
            );
        }
        if !self.body_types.is_empty() {
            query = query.filter(body_type.eq_any(self.body_types.clone()));
        }
        if let Some(min) = self.min_age {
            query = query.filter(age.ge(min));
        }
        if let Some(max) = self.max_age {
            query = query.filter(age.le(max));
        }
        if let Some(min) = self.min_rate {
            query = query.filter(sql::<Bool>("(companion_profiles.rates->>'hourly')::float8 >= ").bind::<Double, _>(min as f64));
        }
        if let Some(max) = self.max_rate {
            query = query.filter(sql::<Bool>("(companion_profiles.rates->>'hourly')::float8 <= ").bind::<Double, _>(max as f64));
        }

        query
    }

    pub fn page_query(&self, page: &PageRequest) -> companion_profiles::BoxedQuery<'static, Pg> {
        sorted(self.filtered(), self.sort).limit(page.limit()).offset(page.offset())
    }
}

/// Applies a sort key, with the id as a stable tiebreaker.
pub fn sorted(
    query: companion_profiles::BoxedQuery<'static, Pg>,
    key: SortKey,
) -> companion_profiles::BoxedQuery<'static, Pg> {
    use crate::schema::companion_profiles::dsl::*;

    let query = match key {
        SortKey::Newest => query.order(created_at.desc()),
        SortKey::Oldest => query.order(created_at.asc()),
        SortKey::PriceLow => query.order(sql::<Double>("(companion_profiles.rates->>'hourly')::float8 ASC NULLS LAST")),
        SortKey::PriceHigh => query.order(sql::<Double>("(companion_profiles.rates->>'hourly')::float8 DESC NULLS LAST")),
        SortKey::Rating => query.order(rating.desc().nulls_last()),
        SortKey::Popularity => query.order(profile_views.desc()),
    };
    query.then_order_by(id.asc())
}

/// Featured and still inside the paid window.
pub fn featured_query(now: chrono::DateTime<chrono::Utc>, limit: i64) -> companion_profiles::BoxedQuery<'static, Pg> {
    use crate::schema::companion_profiles::dsl::*;

    let base = companion_profiles
        .filter(is_active.eq(true))
        .filter(is_featured.eq(true))
        .filter(featured_until.gt(now))
        .into_boxed();
    sorted(base, SortKey::Popularity).limit(limit)
}

pub fn location_query(place: &str, limit: i64) -> companion_profiles::BoxedQuery<'static, Pg> {
    let filters = SearchFilters { locations: vec![place.to_string()], ..Default::default() };
    sorted(filters.filtered(), SortKey::Popularity).limit(limit)
}

pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn substring_patterns(values: &[String]) -> Vec<String> {
    values.iter().map(|v| format!("%{}%", escape_like(v.trim()))).collect()
}

type Predicate = Box<dyn BoxableExpression<companion_profiles::table, Pg, SqlType = Bool>>;

fn location_matches(values: &[String]) -> Predicate {
    let patterns = substring_patterns(values);
    Box::new(sql::<Bool>("((companion_profiles.location->>'city') ILIKE ANY(")
        .bind::<Array<Text>, _>(patterns.clone())
        .sql(") OR (companion_profiles.location->>'state') ILIKE ANY(")
        .bind::<Array<Text>, _>(patterns)
        .sql("))"))
}

fn array_matches(column: &'static str, values: &[String]) -> Predicate {
    Box::new(
        sql::<Bool>(&format!(
            "EXISTS (SELECT 1 FROM unnest(companion_profiles.{column}) AS v WHERE v ILIKE ANY("
        ))
        .bind::<Array<Text>, _>(substring_patterns(values))
        .sql("))"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn render(query: companion_profiles::BoxedQuery<'static, Pg>) -> String {
        diesel::debug_query::<Pg, _>(&query).to_string()
    }

    #[test]
    fn repeated_and_bracketed_keys_collect_lists() {
        let (filters, page) = SearchFilters::from_pairs(&pairs(&[
            ("services", "dinner"),
            ("services[]", "travel"),
            ("location", "Sydney"),
            ("bodyType", ""),
        ]))
        .unwrap();
        assert_eq!(filters.services, vec!["dinner", "travel"]);
        assert_eq!(filters.locations, vec!["Sydney"]);
        assert!(filters.body_types.is_empty());
        assert_eq!(page, PageRequest { page: 1, limit: 20 });
    }

    #[test]
    fn bounds_are_validated() {
        assert!(SearchFilters::from_pairs(&pairs(&[("minAge", "17")])).is_err());
        assert!(SearchFilters::from_pairs(&pairs(&[("maxRate", "-5")])).is_err());
        assert!(SearchFilters::from_pairs(&pairs(&[("limit", "101")])).is_err());
        assert!(SearchFilters::from_pairs(&pairs(&[("page", "0")])).is_err());
        assert!(SearchFilters::from_pairs(&pairs(&[("minAge", "abc")])).is_err());
    }

    #[test]
    fn unknown_sort_falls_back_to_popularity() {
        let (filters, _) = SearchFilters::from_pairs(&pairs(&[("sortBy", "cheapest")])).unwrap();
        assert_eq!(filters.sort, SortKey::Popularity);
        let sql = render(filters.page_query(&PageRequest::new(1, 20)));
        assert!(sql.contains(r#"ORDER BY "companion_profiles"."profile_views" DESC"#), "{sql}");
    }

    #[test]
    fn age_range_is_inclusive() {
        let (filters, _) = SearchFilters::from_pairs(&pairs(&[("minAge", "25"), ("maxAge", "30")])).unwrap();
        let sql = render(filters.filtered());
        assert!(sql.contains(r#""companion_profiles"."age" >= $"#), "{sql}");
        assert!(sql.contains(r#""companion_profiles"."age" <= $"#), "{sql}");
        assert!(sql.contains("25") && sql.contains("30"));
    }

    #[test]
    fn text_filters_use_escaped_substring_patterns() {
        let (filters, _) = SearchFilters::from_pairs(&pairs(&[("location", "Gold_Coast"), ("languages", "English")])).unwrap();
        let sql = render(filters.filtered());
        assert!(sql.contains("location->>'city') ILIKE ANY("), "{sql}");
        assert!(sql.contains("unnest(companion_profiles.languages)"), "{sql}");
        assert!(sql.contains(r#"%Gold\\_Coast%"#), "{sql}");
        assert!(sql.contains("%English%"), "{sql}");
    }

    #[test]
    fn only_active_profiles_by_default() {
        let sql = render(SearchFilters::default().filtered());
        assert!(sql.contains(r#""companion_profiles"."is_active" = $"#), "{sql}");
        assert!(!sql.contains("ILIKE"));
    }

    #[test]
    fn paging_applies_limit_and_offset() {
        let sql = render(SearchFilters::default().page_query(&PageRequest::new(3, 10)));
        assert!(sql.contains("LIMIT $"), "{sql}");
        assert!(sql.contains("OFFSET $"), "{sql}");
        assert!(sql.contains("20"), "{sql}");
    }

    #[test]
    fn escape_like_handles_wildcards() {
        assert_eq!(escape_like("50%_off\\"), r"50\%\_off\\");
    }
}
