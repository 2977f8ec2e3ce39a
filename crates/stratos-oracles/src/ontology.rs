//! Ontology oracle: service catalogue and semantic-distance lookups used by
//! both the consumption engine (what do I want, how close is this offer?)
//! and the simulation harness (pick a service to request).

use std::collections::HashMap;

use rand::seq::SliceRandom;
use stratos_types::{OfferedService, SemanticDistance, ServiceId};

/// `random_service()` / `best_offered_for(s)` / `provides(s)`.
pub trait OntologyOracle: Send + Sync {
    /// A service drawn at random from the catalogue, for a requester that
    /// needs something to ask for.
    fn random_service(&self) -> ServiceId;

    /// This node's best matching offer for `wanted`, if it offers anything
    /// in the same family. The returned [`SemanticDistance`] is what the
    /// discovery/consumption engines compare across candidate providers.
    fn best_offered_for(&self, wanted: &ServiceId) -> Option<OfferedService>;

    /// Whether this node offers `service` at all (possibly at a distance).
    fn provides(&self, service: &ServiceId) -> bool {
        self.best_offered_for(service).is_some()
    }
}

/// Fixed catalogue assigned at construction: every service name maps to an
/// integer coordinate, and semantic distance between a request and an offer
/// is the absolute difference of their coordinates (spec.md's notion of
/// "semantic distance" is left abstract; this is the simulation's concrete
/// realization of it).
pub struct StaticOntology {
    /// Every service name known to the simulation, with its coordinate.
    catalogue: HashMap<ServiceId, i32>,
    /// What this particular node offers, by coordinate.
    offered: Vec<ServiceId>,
}

impl StaticOntology {
    pub fn new(catalogue: HashMap<ServiceId, i32>, offered: Vec<ServiceId>) -> Self {
        Self { catalogue, offered }
    }

    /// Builds a catalogue of `n_services` evenly spaced coordinates named
    /// `service-0..service-{n-1}`, with `offered` drawn from it.
    pub fn with_uniform_catalogue(n_services: u32, offered: Vec<ServiceId>) -> Self {
        let catalogue = (0..n_services)
            .map(|i| (ServiceId(format!("service-{i}")), i as i32))
            .collect();
        Self { catalogue, offered }
    }
}

impl OntologyOracle for StaticOntology {
    fn random_service(&self) -> ServiceId {
        let mut rng = rand::thread_rng();
        self.catalogue
            .keys()
            .collect::<Vec<_>>()
            .choose(&mut rng)
            .map(|s| (*s).clone())
            .unwrap_or_else(|| ServiceId("service-0".to_string()))
    }

    fn best_offered_for(&self, wanted: &ServiceId) -> Option<OfferedService> {
        let wanted_coord = *self.catalogue.get(wanted)?;
        self.offered
            .iter()
            .filter_map(|offer| {
                let coord = *self.catalogue.get(offer)?;
                Some(OfferedService {
                    service: offer.clone(),
                    semantic_distance: SemanticDistance((coord - wanted_coord).abs()),
                })
            })
            .min_by_key(|o| o.semantic_distance.0)
    }

    /// Exact membership, not `best_offered_for(service).is_some()`: a node
    /// offering only `weather` must not claim to provide `printing` just
    /// because the catalogue can still measure a distance to it.
    fn provides(&self, service: &ServiceId) -> bool {
        self.offered.contains(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> HashMap<ServiceId, i32> {
        [
            (ServiceId("printing".to_string()), 0),
            (ServiceId("colour-printing".to_string()), 1),
            (ServiceId("weather".to_string()), 10),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn exact_match_has_zero_distance() {
        let ont = StaticOntology::new(catalogue(), vec![ServiceId("printing".to_string())]);
        let offer = ont.best_offered_for(&ServiceId("printing".to_string())).unwrap();
        assert_eq!(offer.semantic_distance.0, 0);
    }

    #[test]
    fn closest_of_several_offers_wins() {
        let ont = StaticOntology::new(
            catalogue(),
            vec![ServiceId("colour-printing".to_string()), ServiceId("weather".to_string())],
        );
        let offer = ont.best_offered_for(&ServiceId("printing".to_string())).unwrap();
        assert_eq!(offer.service, ServiceId("colour-printing".to_string()));
        assert_eq!(offer.semantic_distance.0, 1);
    }

    #[test]
    fn unknown_service_has_no_offer() {
        let ont = StaticOntology::new(catalogue(), vec![ServiceId("printing".to_string())]);
        assert!(!ont.provides(&ServiceId("unobtainium".to_string())));
    }

    #[test]
    fn provides_is_exact_not_distance_based() {
        let ont = StaticOntology::new(catalogue(), vec![ServiceId("weather".to_string())]);
        assert!(ont.provides(&ServiceId("weather".to_string())));
        assert!(
            !ont.provides(&ServiceId("printing".to_string())),
            "node only offers weather, must not claim to provide printing merely because best_offered_for finds a distant match"
        );
    }
}
