use std::cmp::Ordering;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::engine::scoring::{score, CostModel, ScoreWeights, VehiclePosition};
use crate::models::assignment::ProfitabilityResult;
use crate::models::load::Load;
use crate::models::vehicle::{Vehicle, VehicleStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Ranked<T> {
    pub candidate: T,
    pub profitability: ProfitabilityResult,
    pub recommended: bool,
    #[serde(skip)]
    price_offered: f64,
    #[serde(skip)]
    insertion: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Excluded {
    pub id: Uuid,
    pub reason: String,
}

/// A fully evaluated ordering. Holding one never consumes the inputs, so
/// ranking the same candidates again yields the same result.
#[derive(Debug, Clone, Serialize)]
pub struct Ranking<T> {
    pub entries: Vec<Ranked<T>>,
    pub excluded: Vec<Excluded>,
}

impl<T> Ranking<T> {
    pub fn best(&self) -> Option<&Ranked<T>> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flags the top entry as the pick offered to a driver choosing by hand.
    pub fn with_recommendation(mut self) -> Self {
        for (position, entry) in self.entries.iter_mut().enumerate() {
            entry.recommended = position == 0;
        }
        self
    }
}

impl<T> Default for Ranking<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            excluded: Vec::new(),
        }
    }
}

pub type LoadRanking = Ranking<Load>;
pub type VehicleRanking = Ranking<Vehicle>;

/// Orders loads for a vehicle at `position`, best first. Loads that cannot
/// be scored are left out and reported in `excluded`.
pub fn rank_loads(
    loads: &[Load],
    position: &VehiclePosition,
    weights: &ScoreWeights,
    costs: &CostModel,
) -> LoadRanking {
    let mut ranking = Ranking::default();

    for (insertion, load) in loads.iter().enumerate() {
        match score(load, position, weights, costs) {
            Ok(profitability) => ranking.entries.push(Ranked {
                candidate: load.clone(),
                profitability,
                recommended: false,
                price_offered: load.price_offered,
                insertion,
            }),
            Err(err) => {
                warn!(load_id = %load.id, reason = %err, "load excluded from ranking");
                ranking.excluded.push(Excluded {
                    id: load.id,
                    reason: err.to_string(),
                });
            }
        }
    }

    sort_entries(&mut ranking.entries);
    ranking
}

/// Orders available vehicles for a single load by how well the load suits
/// each vehicle's current position.
pub fn rank_vehicles(
    vehicles: &[Vehicle],
    load: &Load,
    weights: &ScoreWeights,
    costs: &CostModel,
) -> VehicleRanking {
    let mut ranking = Ranking::default();

    let available = vehicles
        .iter()
        .filter(|vehicle| vehicle.status == VehicleStatus::Available);

    for (insertion, vehicle) in available.enumerate() {
        let position = VehiclePosition::at(vehicle.location);
        match score(load, &position, weights, costs) {
            Ok(profitability) => ranking.entries.push(Ranked {
                candidate: vehicle.clone(),
                profitability,
                recommended: false,
                price_offered: load.price_offered,
                insertion,
            }),
            Err(err) => {
                warn!(vehicle_id = %vehicle.id, load_id = %load.id, reason = %err, "vehicle excluded from ranking");
                ranking.excluded.push(Excluded {
                    id: vehicle.id,
                    reason: err.to_string(),
                });
            }
        }
    }

    sort_entries(&mut ranking.entries);
    ranking
}

fn sort_entries<T>(entries: &mut [Ranked<T>]) {
    entries.sort_by(compare);
}

fn compare<T>(a: &Ranked<T>, b: &Ranked<T>) -> Ordering {
    b.profitability
        .score
        .total_cmp(&a.profitability.score)
        .then_with(|| {
            a.profitability
                .distance_to_pickup_km
                .total_cmp(&b.profitability.distance_to_pickup_km)
        })
        .then_with(|| b.price_offered.total_cmp(&a.price_offered))
        .then_with(|| a.insertion.cmp(&b.insertion))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{rank_loads, rank_vehicles};
    use crate::engine::scoring::tests::load;
    use crate::engine::scoring::{CostModel, ScoreWeights, ScoringStrategy, VehiclePosition};
    use crate::geo::Coordinate;
    use crate::models::vehicle::{Vehicle, VehicleStatus};

    fn pune() -> VehiclePosition {
        VehiclePosition::at(Coordinate::new(18.5204, 73.8567))
    }

    fn vehicle(id_seed: u128, lat: f64, lng: f64, status: VehicleStatus) -> Vehicle {
        Vehicle {
            id: Uuid::from_u128(id_seed),
            name: format!("MH-12-{id_seed}"),
            location: Coordinate::new(lat, lng),
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn mumbai_outranks_noida_from_pune() {
        let loads = vec![
            load(2, (28.5355, 77.3910), 4_000.0),
            load(1, (19.0760, 72.8777), 12_000.0),
        ];

        let ranking = rank_loads(
            &loads,
            &pune(),
            &ScoringStrategy::Balanced.weights(),
            &CostModel::default(),
        );

        let order: Vec<u128> = ranking
            .entries
            .iter()
            .map(|entry| entry.candidate.id.as_u128())
            .collect();
        assert_eq!(order, vec![1, 2]);
        assert!(ranking.excluded.is_empty());
    }

    #[test]
    fn ties_prefer_closer_pickup_then_higher_price_then_insertion() {
        // Payment-only weights make every score depend on price alone.
        let weights = ScoreWeights::new(0.0, 1.0, 0.0, 0.0).unwrap();
        let loads = vec![
            load(1, (19.0760, 72.8777), 10_000.0),
            load(2, (18.6, 73.9), 10_000.0),
            load(3, (18.6, 73.9), 10_000.0),
        ];

        let ranking = rank_loads(&loads, &pune(), &weights, &CostModel::default());
        let order: Vec<u128> = ranking
            .entries
            .iter()
            .map(|entry| entry.candidate.id.as_u128())
            .collect();

        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn equal_score_and_distance_prefers_higher_price() {
        // Both prices saturate the payment component.
        let weights = ScoreWeights::new(0.0, 1.0, 0.0, 0.0).unwrap();
        let loads = vec![
            load(1, (18.6, 73.9), 25_000.0),
            load(2, (18.6, 73.9), 40_000.0),
        ];

        let ranking = rank_loads(&loads, &pune(), &weights, &CostModel::default());

        assert_eq!(ranking.entries[0].candidate.id.as_u128(), 2);
    }

    #[test]
    fn malformed_load_is_excluded_not_fatal() {
        let mut broken = load(9, (19.0, 72.0), 5_000.0);
        broken.destination.lng = None;
        let loads = vec![broken, load(1, (19.0760, 72.8777), 12_000.0)];

        let ranking = rank_loads(
            &loads,
            &pune(),
            &ScoringStrategy::Balanced.weights(),
            &CostModel::default(),
        );

        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking.excluded.len(), 1);
        assert_eq!(ranking.excluded[0].id.as_u128(), 9);
    }

    #[test]
    fn ranking_is_deterministic() {
        let loads: Vec<_> = (0..20)
            .map(|i| {
                let offset = (i % 4) as f64 * 0.5;
                load(i as u128, (18.0 + offset, 73.0 + offset), 8_000.0 + (i % 3) as f64 * 1_000.0)
            })
            .collect();
        let weights = ScoringStrategy::PickupProximity.weights();

        let first = rank_loads(&loads, &pune(), &weights, &CostModel::default());
        let second = rank_loads(&loads, &pune(), &weights, &CostModel::default());

        let ids = |ranking: &super::LoadRanking| -> Vec<u128> {
            ranking
                .entries
                .iter()
                .map(|entry| entry.candidate.id.as_u128())
                .collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn recommendation_flags_only_the_top_entry() {
        let loads = vec![
            load(1, (19.0760, 72.8777), 12_000.0),
            load(2, (28.5355, 77.3910), 4_000.0),
        ];

        let ranking = rank_loads(
            &loads,
            &pune(),
            &ScoringStrategy::Balanced.weights(),
            &CostModel::default(),
        )
        .with_recommendation();

        let flags: Vec<bool> = ranking.entries.iter().map(|entry| entry.recommended).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn vehicles_for_a_load_skip_busy_ones() {
        let mumbai_load = load(1, (19.0760, 72.8777), 12_000.0);
        let vehicles = vec![
            vehicle(10, 18.5204, 73.8567, VehicleStatus::Available),
            vehicle(11, 19.0700, 72.8700, VehicleStatus::Allocated),
            vehicle(12, 19.0000, 72.9000, VehicleStatus::Available),
            vehicle(13, 19.0760, 72.8777, VehicleStatus::Inactive),
        ];

        let ranking = rank_vehicles(
            &vehicles,
            &mumbai_load,
            &ScoringStrategy::Balanced.weights(),
            &CostModel::default(),
        );

        let order: Vec<u128> = ranking
            .entries
            .iter()
            .map(|entry| entry.candidate.id.as_u128())
            .collect();
        assert_eq!(order, vec![12, 10]);
    }
}
