//! PostgreSQL with PostGIS; tags are a `jsonb` object, relation members a
//! `jsonb` array of `{"type", "ref", "role"}` objects.

use super::SqlDialect;
use crate::overpass::BoundingBox;

/// SRID of the `geography` type's WGS 84 coordinates.
const WGS84: u32 = 4326;

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Postgres {
    /// `geom` as `geography`, whose distances are in metres.
    fn geography(geom: &str, srid: u32) -> String {
        if srid == WGS84 {
            format!("{}::geography", geom)
        } else {
            format!("ST_Transform({}, {})::geography", geom, WGS84)
        }
    }
}

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn tag_exists(&self, key: &str) -> String {
        format!("tags?{}", key)
    }

    fn tag_value(&self, key: &str) -> String {
        format!("tags->>{}", key)
    }

    fn regex_match(
        &self,
        subject: &str,
        pattern: &str,
        case_insensitive: bool,
        negated: bool,
    ) -> String {
        let operator = if case_insensitive { "~*" } else { "~" };
        let test = format!(
            "{} {} {}",
            subject,
            operator,
            self.quote_literal(pattern)
        );
        if negated {
            format!("NOT coalesce({}, FALSE)", test)
        } else {
            test
        }
    }

    fn key_value_regex(&self, key: &str, value: &str, case_insensitive: bool) -> String {
        format!(
            "EXISTS (SELECT 1 FROM jsonb_each_text(tags) AS kv(key, value) WHERE {} AND {})",
            self.regex_match("kv.key", key, case_insensitive, false),
            self.regex_match("kv.value", value, case_insensitive, false)
        )
    }

    fn point(&self, lon: f64, lat: f64, srid: u32) -> String {
        format!("ST_SetSRID(ST_MakePoint({}, {}), {})", lon, lat, srid)
    }

    fn envelope(&self, bbox: &BoundingBox, srid: u32) -> String {
        format!(
            "ST_SetSRID(ST_MakeEnvelope({}, {}, {}, {}), {})",
            bbox.west, bbox.south, bbox.east, bbox.north, srid
        )
    }

    fn polygon(&self, wkt: &str, srid: u32) -> String {
        format!(
            "ST_SetSRID(ST_GeomFromText({}), {})",
            self.quote_literal(wkt),
            srid
        )
    }

    fn distance_within(&self, geom: &str, other: &str, metres: f64, srid: u32) -> String {
        format!(
            "ST_DWithin({}, {}, {})",
            Self::geography(geom, srid),
            Self::geography(other, srid),
            metres
        )
    }

    fn union_agg(&self, geom: &str) -> String {
        format!("ST_Union({})", geom)
    }

    fn null_tags(&self) -> &'static str {
        "NULL::jsonb"
    }

    fn null_geometry(&self) -> &'static str {
        "NULL::geometry"
    }

    fn empty_set(&self) -> String {
        format!(
            "SELECT NULL::text AS osm_type, NULL::bigint AS id, {} AS tags, {} AS geom WHERE FALSE",
            self.null_tags(),
            self.null_geometry()
        )
    }

    fn statement_timeout(&self, seconds: u32) -> Option<String> {
        Some(format!(
            "SET statement_timeout = {};",
            u64::from(seconds) * 1000
        ))
    }

    fn member_from(&self) -> &'static str {
        "jsonb_array_elements(r.members) AS m"
    }

    fn member_type(&self) -> &'static str {
        "m->>'type'"
    }

    fn member_ref(&self) -> &'static str {
        "(m->>'ref')::bigint"
    }
}
