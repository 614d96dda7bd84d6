//! Lowering of individual filters to SQL predicates.

use std::borrow::Cow;
use std::collections::HashMap;

use geo_types::{LineString, Polygon};

use super::{KeyEscaper, SqlDialect};
use crate::error::{Error, Result};
use crate::overpass::{AroundCenter, Filter, Pattern};

/// Named sets visible to a filter inside a whole-query lowering.
pub(crate) struct SetScope<'a> {
    /// Set name to CTE name.
    pub sets: &'a HashMap<String, String>,
    /// Element type of the rows being filtered.
    pub osm_type: &'a str,
}

impl SetScope<'_> {
    fn resolve(&self, name: &str) -> Result<&str> {
        self.sets
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::UnsupportedFilter(format!("set `.{}` is not defined", name)))
    }
}

pub(crate) struct FilterLowering<'a> {
    dialect: &'a dyn SqlDialect,
    srid: u32,
    key_escaper: Option<&'a dyn KeyEscaper>,
    anchored_regexes: bool,
}

impl<'a> FilterLowering<'a> {
    pub fn new(
        dialect: &'a dyn SqlDialect,
        srid: u32,
        key_escaper: Option<&'a dyn KeyEscaper>,
        anchored_regexes: bool,
    ) -> Self {
        FilterLowering {
            dialect,
            srid,
            key_escaper,
            anchored_regexes,
        }
    }

    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }

    fn key(&self, key: &str) -> String {
        match self.key_escaper {
            Some(escaper) => escaper.escape_key(key),
            None => self.dialect.quote_literal(key),
        }
    }

    fn regex<'p>(&self, pattern: &'p Pattern) -> Cow<'p, str> {
        if self.anchored_regexes {
            Cow::Owned(pattern.anchored_source())
        } else {
            Cow::Borrowed(pattern.source())
        }
    }

    /// All filters joined with `AND`; `TRUE` when there are none.
    pub fn conjunction(&self, filters: &[Filter], scope: Option<&SetScope<'_>>) -> Result<String> {
        if filters.is_empty() {
            return Ok("TRUE".to_string());
        }
        let predicates = filters
            .iter()
            .map(|filter| self.filter(filter, scope))
            .collect::<Result<Vec<_>>>()?;
        Ok(predicates.join(" AND "))
    }

    pub fn filter(&self, filter: &Filter, scope: Option<&SetScope<'_>>) -> Result<String> {
        let d = self.dialect;
        let sql = match filter {
            Filter::TagExists { key } => d.tag_exists(&self.key(key)),
            Filter::TagNotExists { key } => format!("NOT ({})", d.tag_exists(&self.key(key))),
            Filter::TagEquals { key, value } => format!(
                "{} = {}",
                d.tag_value(&self.key(key)),
                d.quote_literal(value)
            ),
            Filter::TagNotEquals { key, value } => format!(
                "{} IS DISTINCT FROM {}",
                d.tag_value(&self.key(key)),
                d.quote_literal(value)
            ),
            Filter::TagRegex { key, pattern } => d.regex_match(
                &d.tag_value(&self.key(key)),
                &self.regex(pattern),
                pattern.is_case_insensitive(),
                false,
            ),
            Filter::TagNotRegex { key, pattern } => d.regex_match(
                &d.tag_value(&self.key(key)),
                &self.regex(pattern),
                pattern.is_case_insensitive(),
                true,
            ),
            Filter::KeyRegex { key, value } => d.key_value_regex(
                &self.regex(key),
                &self.regex(value),
                key.is_case_insensitive() || value.is_case_insensitive(),
            ),
            Filter::BoundingBox(bbox) => d.intersects("geom", &d.envelope(bbox, self.srid)),
            Filter::Around { radius, center } => {
                let other = match center {
                    AroundCenter::Point(point) => d.point(point.x, point.y, self.srid),
                    AroundCenter::Set(name) => {
                        let cte = required(scope, filter)?.resolve(name)?;
                        format!("(SELECT {} FROM {})", d.union_agg("geom"), cte)
                    }
                };
                d.distance_within("geom", &other, *radius, self.srid)
            }
            Filter::Polygon { points } => {
                d.intersects("geom", &d.polygon(&polygon_wkt(points), self.srid))
            }
            Filter::IdList { ids } => {
                let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
                format!("id IN ({})", ids.join(", "))
            }
            Filter::SetFilter { name } => {
                let scope = required(scope, filter)?;
                let cte = scope.resolve(name)?;
                format!(
                    "id IN (SELECT id FROM {} WHERE osm_type = {})",
                    cte,
                    d.quote_literal(scope.osm_type)
                )
            }
            Filter::Area { name } => {
                let cte = required(scope, filter)?.resolve(name)?;
                d.intersects(
                    "geom",
                    &format!("(SELECT {} FROM {})", d.union_agg("geom"), cte),
                )
            }
        };
        tracing::trace!(filter = %filter, sql = %sql, "lowered filter");
        Ok(sql)
    }
}

fn required<'s, 'a>(scope: Option<&'s SetScope<'a>>, filter: &Filter) -> Result<&'s SetScope<'a>> {
    scope.ok_or_else(|| {
        Error::UnsupportedFilter(format!(
            "{} refers to a named set, which a lone selector set cannot resolve",
            filter
        ))
    })
}

/// WKT for the polygon through `points` (x=lon, y=lat); the ring is closed.
fn polygon_wkt(points: &[geo_types::Coord<f64>]) -> String {
    let polygon = Polygon::new(LineString::from(points.to_vec()), vec![]);
    let ring: Vec<String> = polygon
        .exterior()
        .coords()
        .map(|c| format!("{} {}", c.x, c.y))
        .collect();
    format!("POLYGON(({}))", ring.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overpass::parse;
    use crate::sql::{duckdb::DuckDb, postgres::Postgres};

    fn filters(input: &str) -> Vec<Filter> {
        let query = parse(&format!("node{};", input)).unwrap();
        query.first_selectors().unwrap().filters().to_vec()
    }

    fn lower(dialect: &dyn SqlDialect, input: &str) -> Vec<String> {
        let lowering = FilterLowering::new(dialect, 4326, None, false);
        filters(input)
            .iter()
            .map(|f| lowering.filter(f, None).unwrap())
            .collect()
    }

    #[test]
    fn test_postgres_tag_predicates() {
        assert_eq!(
            lower(
                &Postgres,
                r#"[shop][!fee][amenity=cafe][cuisine!=pizza][name~"^Caf"][ref!~"x",i]"#
            ),
            vec![
                "tags?'shop'",
                "NOT (tags?'fee')",
                "tags->>'amenity' = 'cafe'",
                "tags->>'cuisine' IS DISTINCT FROM 'pizza'",
                "tags->>'name' ~ '^Caf'",
                "NOT coalesce(tags->>'ref' ~* 'x', FALSE)",
            ]
        );
    }

    #[test]
    fn test_postgres_geometry_predicates() {
        assert_eq!(
            lower(&Postgres, "(50.7,7.1,50.8,7.2)(around:100,50.7,7.1)(id:1,2)"),
            vec![
                "ST_Intersects(geom, ST_SetSRID(ST_MakeEnvelope(7.1, 50.7, 7.2, 50.8), 4326))",
                "ST_DWithin(geom::geography, ST_SetSRID(ST_MakePoint(7.1, 50.7), 4326)::geography, 100)",
                "id IN (1, 2)",
            ]
        );
    }

    #[test]
    fn test_polygon_ring_is_closed() {
        assert_eq!(
            lower(&Postgres, r#"(poly:"10 20 11 20 11 21")"#),
            vec![
                "ST_Intersects(geom, ST_SetSRID(ST_GeomFromText('POLYGON((20 10, 20 11, 21 11, 20 10))'), 4326))"
            ]
        );
    }

    #[test]
    fn test_duckdb_predicates() {
        assert_eq!(
            lower(
                &DuckDb,
                r#"[shop][amenity=cafe][name~"^Caf",i](1,2,3,4)(around:5,1,2)"#
            ),
            vec![
                "map_contains(tags, 'shop')",
                "element_at(tags, 'amenity')[1] = 'cafe'",
                "regexp_matches(element_at(tags, 'name')[1], '^Caf', 'i')",
                "ST_Intersects(geom, ST_MakeEnvelope(2, 1, 4, 3))",
                "ST_Distance_Sphere(\
                 ST_FlipCoordinates(ST_StartPoint(ST_ShortestLine(geom, ST_Point(2, 1)))), \
                 ST_FlipCoordinates(ST_EndPoint(ST_ShortestLine(geom, ST_Point(2, 1))))) <= 5",
            ]
        );
    }

    #[test]
    fn test_around_radius_in_metres_for_projected_srid() {
        let lowering = FilterLowering::new(&Postgres, 3857, None, false);
        let sql: Vec<String> = filters("(around:250,50.7,7.1)")
            .iter()
            .map(|f| lowering.filter(f, None).unwrap())
            .collect();
        assert_eq!(
            sql,
            vec![
                "ST_DWithin(ST_Transform(geom, 4326)::geography, \
                 ST_Transform(ST_SetSRID(ST_MakePoint(7.1, 50.7), 3857), 4326)::geography, 250)"
            ]
        );
    }

    #[test]
    fn test_anchored_regexes() {
        let lowering = FilterLowering::new(&DuckDb, 4326, None, true);
        let sql: Vec<String> = filters(r#"[name~"Caf"][ref!~"A|B",i]"#)
            .iter()
            .map(|f| lowering.filter(f, None).unwrap())
            .collect();
        assert_eq!(
            sql,
            vec![
                "regexp_matches(element_at(tags, 'name')[1], '^(?:Caf)$')",
                "NOT coalesce(regexp_matches(element_at(tags, 'ref')[1], '^(?:A|B)$', 'i'), FALSE)",
            ]
        );
    }

    #[test]
    fn test_values_are_escaped() {
        assert_eq!(
            lower(&Postgres, r#"[name="Joe's"][note~"it's"]"#),
            vec!["tags->>'name' = 'Joe''s'", "tags->>'note' ~ 'it''s'"]
        );
    }

    #[test]
    fn test_set_filters_with_scope() {
        let sets = HashMap::from([("a".to_string(), "_q0".to_string())]);
        let scope = SetScope {
            sets: &sets,
            osm_type: "way",
        };
        let lowering = FilterLowering::new(&Postgres, 4326, None, false);
        let sql: Vec<String> = filters(".a(area.a)(around.a:10)")
            .iter()
            .map(|f| lowering.filter(f, Some(&scope)).unwrap())
            .collect();
        assert_eq!(
            sql,
            vec![
                "id IN (SELECT id FROM _q0 WHERE osm_type = 'way')",
                "ST_Intersects(geom, (SELECT ST_Union(geom) FROM _q0))",
                "ST_DWithin(geom::geography, (SELECT ST_Union(geom) FROM _q0)::geography, 10)",
            ]
        );

        let err = lowering
            .filter(&Filter::SetFilter { name: "b".into() }, Some(&scope))
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedFilter("set `.b` is not defined".to_string())
        );
    }
}
