//! DuckDB with the spatial extension; tags are a `MAP(VARCHAR, VARCHAR)`,
//! relation members a list of `STRUCT(type, ref, role)`.
//!
//! Spatial constructors carry no SRID: DuckDB geometries are untyped.

use super::SqlDialect;
use crate::overpass::BoundingBox;

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn tag_exists(&self, key: &str) -> String {
        format!("map_contains(tags, {})", key)
    }

    fn tag_value(&self, key: &str) -> String {
        format!("element_at(tags, {})[1]", key)
    }

    fn regex_match(
        &self,
        subject: &str,
        pattern: &str,
        case_insensitive: bool,
        negated: bool,
    ) -> String {
        let options = if case_insensitive { ", 'i'" } else { "" };
        let test = format!(
            "regexp_matches({}, {}{})",
            subject,
            self.quote_literal(pattern),
            options
        );
        if negated {
            format!("NOT coalesce({}, FALSE)", test)
        } else {
            test
        }
    }

    fn key_value_regex(&self, key: &str, value: &str, case_insensitive: bool) -> String {
        format!(
            "EXISTS (SELECT 1 FROM (SELECT unnest(map_keys(tags)) AS key, \
             unnest(map_values(tags)) AS value) AS kv WHERE {} AND {})",
            self.regex_match("kv.key", key, case_insensitive, false),
            self.regex_match("kv.value", value, case_insensitive, false)
        )
    }

    fn point(&self, lon: f64, lat: f64, _srid: u32) -> String {
        format!("ST_Point({}, {})", lon, lat)
    }

    fn envelope(&self, bbox: &BoundingBox, _srid: u32) -> String {
        format!(
            "ST_MakeEnvelope({}, {}, {}, {})",
            bbox.west, bbox.south, bbox.east, bbox.north
        )
    }

    fn polygon(&self, wkt: &str, _srid: u32) -> String {
        format!("ST_GeomFromText({})", self.quote_literal(wkt))
    }

    /// Haversine distance between the closest points of the two geometries.
    /// Coordinates are taken as lon/lat; `ST_Distance_Sphere` wants lat/lon.
    fn distance_within(&self, geom: &str, other: &str, metres: f64, _srid: u32) -> String {
        let line = format!("ST_ShortestLine({}, {})", geom, other);
        format!(
            "ST_Distance_Sphere(ST_FlipCoordinates(ST_StartPoint({line})), \
             ST_FlipCoordinates(ST_EndPoint({line}))) <= {metres}"
        )
    }

    fn union_agg(&self, geom: &str) -> String {
        format!("ST_Union_Agg({})", geom)
    }

    fn null_tags(&self) -> &'static str {
        "NULL::MAP(VARCHAR, VARCHAR)"
    }

    fn null_geometry(&self) -> &'static str {
        "NULL::GEOMETRY"
    }

    fn empty_set(&self) -> String {
        format!(
            "SELECT NULL::VARCHAR AS osm_type, NULL::BIGINT AS id, {} AS tags, {} AS geom \
             WHERE FALSE",
            self.null_tags(),
            self.null_geometry()
        )
    }

    fn statement_timeout(&self, _seconds: u32) -> Option<String> {
        None
    }

    fn member_from(&self) -> &'static str {
        "unnest(r.members) AS u(m)"
    }

    fn member_type(&self) -> &'static str {
        "m.type"
    }

    fn member_ref(&self) -> &'static str {
        "m.ref"
    }
}
