//! Address heuristics for zone backfill and city correction

/// Administrative-unit prefixes that mark an address segment as a zone.
/// Matched as given: case- and accent-sensitive, `de` before the bare
/// `d` so elided forms ("Cercle d'Ouarzazate") still hit.
const ZONE_IDENTIFIERS: [&str; 14] = [
    "Cercle de",
    "Cercle d",
    "Prefecture de",
    "Prefecture d",
    "Province de",
    "Province d",
    "Arrondissement de",
    "Arrondissement d",
    "cadat de",
    "cadat d",
    "Pachalik de",
    "Pachalik d",
    "Commune de",
    "Commune d",
];

/// Fallback markers: the segment preceding one of these is taken as the
/// zone when no administrative prefix matched.
const REGION_INDICATORS: [&str; 3] = ["Marrakesh", "Province", "Prefecture"];

/// Derive a zone from address text. Addresses from the scraper separate
/// their components with double spaces; segments are trimmed before
/// matching. Returns `None` when neither heuristic yields anything.
pub fn zone_from_address(address: &str) -> Option<String> {
    let parts: Vec<&str> = address
        .split("  ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    for part in &parts {
        for identifier in ZONE_IDENTIFIERS {
            if part.starts_with(identifier) {
                return Some((*part).to_string());
            }
        }
    }

    // Last resort: the administrative part just before the region,
    // skipping a match on the very first segment.
    for (i, part) in parts.iter().enumerate() {
        if i > 0 && REGION_INDICATORS.iter().any(|ind| part.contains(ind)) {
            return Some(parts[i - 1].to_string());
        }
    }

    None
}

/// OSM occasionally assigns a nearby village name instead of the city.
/// For the two covered cities the address text is authoritative: when it
/// mentions the city, the city column is overwritten. Substring match is
/// case-sensitive and exact.
pub fn corrected_city(address: &str) -> Option<&'static str> {
    if address.contains("Marrakech") {
        Some("Marrakech")
    } else if address.contains("Tangier") {
        Some("Tangier")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_first_identifier_wins() {
        let address =
            "Hotel ABC  Cercle de Sidi Bennour  Province de Sidi Bennour  Morocco";
        assert_eq!(
            zone_from_address(address),
            Some("Cercle de Sidi Bennour".to_string())
        );
    }

    #[test]
    fn test_zone_elided_preposition() {
        assert_eq!(
            zone_from_address("Riad Dar  Cercle d'Ouarzazate  Morocco"),
            Some("Cercle d'Ouarzazate".to_string())
        );
    }

    #[test]
    fn test_zone_fallback_segment_before_region() {
        // No administrative prefix; "Marrakesh-Safi" marks the region, so
        // the preceding segment is returned.
        assert_eq!(
            zone_from_address("Villa 5  Mechouar Kasba  Marrakesh-Safi  Morocco"),
            Some("Mechouar Kasba".to_string())
        );
    }

    #[test]
    fn test_zone_fallback_skips_first_segment() {
        // The indicator sits in the first segment, which has no
        // predecessor, so the fallback yields nothing.
        assert_eq!(zone_from_address("Marrakesh-Safi  Morocco"), None);
    }

    #[test]
    fn test_zone_none_when_no_match() {
        assert_eq!(zone_from_address("12 Rue X  Casablanca  Morocco"), None);
    }

    #[test]
    fn test_corrected_city() {
        assert_eq!(
            corrected_city("12 Rue X, Douar Y, Marrakech, Morocco"),
            Some("Marrakech")
        );
        assert_eq!(corrected_city("Avenue Mohammed VI, Tangier"), Some("Tangier"));
        assert_eq!(corrected_city("Rue Centrale, Casablanca"), None);
        // Case-sensitive by design: lowercase variants are not fixed up.
        assert_eq!(corrected_city("rue x, marrakech"), None);
    }
}
