//! Country code → credential shard placement.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use jobboard_core::CountryCode;

/// Name of a credential partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shard(String);

impl Shard {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Shard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure mapping from country code to shard. Unknown countries land on the fallback shard.
#[derive(Debug, Clone)]
pub struct ShardMap {
    by_country: HashMap<String, Shard>,
    fallback: Shard,
}

const APAC: &[&str] = &[
    "VN", "VNM", "AU", "AUS", "SG", "SGP", "JP", "JPN", "KR", "KOR", "TH", "THA", "ID", "IDN", "MY",
    "MYS", "PH", "PHL", "IN", "IND", "NZ", "NZL", "CN", "CHN", "HK", "HKG", "TW", "TWN",
];

const EMEA: &[&str] = &[
    "GB", "GBR", "UK", "DE", "DEU", "FR", "FRA", "NL", "NLD", "ES", "ESP", "IT", "ITA", "IE", "IRL",
    "SE", "SWE", "PL", "POL", "AE", "ARE", "ZA", "ZAF", "NG", "NGA", "EG", "EGY",
];

const AMER: &[&str] = &[
    "US", "USA", "CA", "CAN", "MX", "MEX", "BR", "BRA", "AR", "ARG", "CL", "CHL", "CO", "COL",
];

impl ShardMap {
    pub fn new(fallback: Shard) -> Self {
        Self {
            by_country: HashMap::new(),
            fallback,
        }
    }

    /// Route `country` to `shard`.
    pub fn with_country(mut self, country: &CountryCode, shard: Shard) -> Self {
        self.by_country.insert(country.as_str().to_string(), shard);
        self
    }

    pub fn shard_for(&self, country: &CountryCode) -> Shard {
        self.by_country
            .get(country.as_str())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn fallback(&self) -> &Shard {
        &self.fallback
    }
}

impl Default for ShardMap {
    /// Regional shards `apac`, `emea` and `amer`, falling back to `global`.
    fn default() -> Self {
        let mut by_country = HashMap::new();
        for (region, countries) in [("apac", APAC), ("emea", EMEA), ("amer", AMER)] {
            for country in countries {
                by_country.insert((*country).to_string(), Shard::new(region));
            }
        }
        Self {
            by_country,
            fallback: Shard::new("global"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(raw: &str) -> CountryCode {
        CountryCode::parse(raw).unwrap()
    }

    #[test]
    fn default_map_groups_countries_by_region() {
        let map = ShardMap::default();
        assert_eq!(map.shard_for(&cc("VN")).as_str(), "apac");
        assert_eq!(map.shard_for(&cc("AUS")).as_str(), "apac");
        assert_eq!(map.shard_for(&cc("de")).as_str(), "emea");
        assert_eq!(map.shard_for(&cc("USA")).as_str(), "amer");
    }

    #[test]
    fn unknown_country_uses_the_fallback() {
        let map = ShardMap::default();
        assert_eq!(map.shard_for(&cc("ZZ")), Shard::new("global"));
    }

    #[test]
    fn explicit_routes_override_nothing_else() {
        let map = ShardMap::new(Shard::new("eu-1")).with_country(&cc("VN"), Shard::new("vn-1"));
        assert_eq!(map.shard_for(&cc("VN")).as_str(), "vn-1");
        assert_eq!(map.shard_for(&cc("AUS")).as_str(), "eu-1");
    }
}
